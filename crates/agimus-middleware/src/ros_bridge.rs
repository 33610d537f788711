//! rosbridge-compatible WebSocket bridge.
//!
//! [`RosBridge`]:
//!
//! 1. **Ingests** rosbridge v2 `publish` operations carrying
//!    `sensor_msgs/PointCloud2` or `sensor_msgs/JointState` messages and
//!    republishes them on the internal [`EventBus`] under the same topic.
//!
//! 2. **Forwards** bus traffic to WebSocket clients that sent a `subscribe`
//!    operation, framed as rosbridge `publish` operations.
//!
//! Byte arrays (`PointCloud2::data`) are base64 strings, as rosbridge encodes
//! `uint8[]`; plain JSON number arrays are accepted on ingest too.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use agimus_types::{AgimusError, EventPayload, JointState, PointCloud2};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::bus::EventBus;

/// Default rosbridge port.
pub const DEFAULT_BRIDGE_PORT: u16 = 9090;

/// The rosbridge operations the bridge understands.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum BridgeOp {
    Publish {
        topic: String,
        #[serde(default, rename = "type")]
        msg_type: Option<String>,
        msg: Value,
    },
    Subscribe {
        topic: String,
    },
    Unsubscribe {
        topic: String,
    },
}

/// Bridge between rosbridge WebSocket clients and the internal [`EventBus`].
#[derive(Clone)]
pub struct RosBridge {
    bus: Arc<EventBus>,
}

impl RosBridge {
    /// Create a new bridge backed by `bus`.
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    /// Decode a rosbridge message body and publish it on `topic`.
    ///
    /// `msg_type` selects the decoder; when absent the body is tried as a
    /// point cloud first, then as a joint state.  Publishing on a topic
    /// nobody listens to is not an error and returns `Ok(0)`.
    pub fn ingest(
        &self,
        topic: &str,
        msg_type: Option<&str>,
        msg: Value,
    ) -> Result<usize, AgimusError> {
        let payload = decode_payload(msg_type, msg)?;
        match self.bus.publish(topic, payload) {
            Ok(n) => Ok(n),
            Err(AgimusError::Channel(_)) => {
                debug!(topic, "ingested message has no subscriber");
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    /// Start a WebSocket server on `addr`.
    ///
    /// The server runs until it encounters a fatal bind error.
    pub async fn run_ws_server(self, addr: SocketAddr) -> Result<(), AgimusError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| AgimusError::Transport(format!("bridge bind error on {addr}: {e}")))?;
        info!(%addr, "rosbridge listening");

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let bridge = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = bridge.handle_ws_client(stream, peer).await {
                            error!(peer = %peer, error = %e, "bridge client error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "bridge accept error");
                }
            }
        }
    }

    async fn handle_ws_client(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), AgimusError> {
        let ws_stream = accept_async(stream)
            .await
            .map_err(|e| AgimusError::Transport(format!("ws handshake from {peer}: {e}")))?;
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        // Forwarding tasks push serialized frames here.
        let (out_tx, mut out_rx) = mpsc::channel::<String>(64);
        let mut forwarders: HashMap<String, JoinHandle<()>> = HashMap::new();

        loop {
            tokio::select! {
                Some(frame) = out_rx.recv() => {
                    if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                        Some(Ok(Message::Text(text))) => {
                            if let Some(reply) = self.handle_frame(text.as_str(), &out_tx, &mut forwarders)
                                && ws_tx.send(Message::Text(reply.into())).await.is_err()
                            {
                                break;
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        for (_, task) in forwarders {
            task.abort();
        }
        Ok(())
    }

    /// Handle one text frame.  Returns a status frame to send back when the
    /// operation failed.
    fn handle_frame(
        &self,
        text: &str,
        out_tx: &mpsc::Sender<String>,
        forwarders: &mut HashMap<String, JoinHandle<()>>,
    ) -> Option<String> {
        let op = match serde_json::from_str::<BridgeOp>(text) {
            Ok(op) => op,
            Err(e) => return Some(status_frame(&format!("unsupported frame: {e}"))),
        };
        match op {
            BridgeOp::Publish { topic, msg_type, msg } => {
                match self.ingest(&topic, msg_type.as_deref(), msg) {
                    Ok(_) => None,
                    Err(e) => {
                        warn!(topic = %topic, error = %e, "rejected bridge publish");
                        Some(status_frame(&e.to_string()))
                    }
                }
            }
            BridgeOp::Subscribe { topic } => {
                if !forwarders.contains_key(&topic) {
                    let task = spawn_forwarder(&self.bus, &topic, out_tx.clone());
                    forwarders.insert(topic, task);
                }
                None
            }
            BridgeOp::Unsubscribe { topic } => {
                if let Some(task) = forwarders.remove(&topic) {
                    task.abort();
                }
                None
            }
        }
    }
}

fn decode_payload(msg_type: Option<&str>, msg: Value) -> Result<EventPayload, AgimusError> {
    let decode_cloud = |msg: Value| {
        serde_json::from_value::<PointCloud2>(msg)
            .map(EventPayload::PointCloud)
            .map_err(|e| AgimusError::Serialization(format!("PointCloud2: {e}")))
    };
    let decode_joints = |msg: Value| {
        serde_json::from_value::<JointState>(msg)
            .map(EventPayload::JointState)
            .map_err(|e| AgimusError::Serialization(format!("JointState: {e}")))
    };
    match msg_type {
        Some("sensor_msgs/PointCloud2") | Some("sensor_msgs/msg/PointCloud2") => decode_cloud(msg),
        Some("sensor_msgs/JointState") | Some("sensor_msgs/msg/JointState") => decode_joints(msg),
        Some(other) => Err(AgimusError::InvalidArgument(format!(
            "unsupported message type {other}"
        ))),
        None => decode_cloud(msg.clone()).or_else(|_| decode_joints(msg)),
    }
}

fn spawn_forwarder(bus: &EventBus, topic: &str, out_tx: mpsc::Sender<String>) -> JoinHandle<()> {
    let mut rx = bus.subscribe(topic);
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let frame = json!({
                        "op": "publish",
                        "topic": event.topic,
                        "msg": event.payload,
                    });
                    if out_tx.send(frame.to_string()).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = %rx.topic(), lagged_by = n, "bridge forwarder lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn status_frame(message: &str) -> String {
    json!({ "op": "status", "level": "error", "msg": message }).to_string()
}
