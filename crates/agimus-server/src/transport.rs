//! [`RemoteObjectServer`] – WebSocket transport of the remote-object
//! protocol.
//!
//! Listens on `0.0.0.0:13331` (configurable via
//! [`RemoteObjectServer::with_port`]).  Each text frame is one
//! [`Request`][crate::protocol::Request]; each request is answered by one
//! text frame holding its [`Response`][crate::protocol::Response].
//!
//! Service calls block (a capture waits for its sensor), so every request
//! runs on the blocking thread pool and answers may come back out of order;
//! clients match them by `id`.  Servants created on a connection are released
//! when it closes.

use std::net::SocketAddr;
use std::sync::Arc;

use agimus_types::AgimusError;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::plugin::ServerPlugin;
use crate::protocol::{Response, Session, parse_request};

/// Default TCP port of the remote-object server.
pub const DEFAULT_PORT: u16 = 13331;

pub struct RemoteObjectServer {
    plugin: Arc<ServerPlugin>,
    port: u16,
}

impl RemoteObjectServer {
    /// Serve `plugin` on the [`DEFAULT_PORT`].
    pub fn new(plugin: Arc<ServerPlugin>) -> Self {
        Self {
            plugin,
            port: DEFAULT_PORT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Bind the configured port and serve forever.
    ///
    /// # Errors
    ///
    /// [`AgimusError::Transport`] if the listener cannot bind.
    pub async fn run(self) -> Result<(), AgimusError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| AgimusError::Transport(format!("bind error on {addr}: {e}")))?;
        self.serve(listener).await
    }

    /// Serve connections accepted on `listener`.
    pub async fn serve(self, listener: TcpListener) -> Result<(), AgimusError> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "remote-object server listening");
        }
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let plugin = Arc::clone(&self.plugin);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, plugin).await {
                            error!(peer = %peer, error = %e, "client error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "accept error");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Per-connection handler
// ---------------------------------------------------------------------------

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    plugin: Arc<ServerPlugin>,
) -> Result<(), AgimusError> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| AgimusError::Transport(format!("ws handshake from {peer}: {e}")))?;
    debug!(peer = %peer, "client connected");

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let session = Arc::new(Session::new(plugin));
    let (out_tx, mut out_rx) = mpsc::channel::<String>(64);

    loop {
        tokio::select! {
            Some(frame) = out_rx.recv() => {
                if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match parse_request(text.as_str()) {
                        Ok(request) => {
                            let session = Arc::clone(&session);
                            let id = request.id.clone();
                            spawn_call(id, move || session.handle(request), out_tx.clone());
                        }
                        Err(response) => spawn_call(Value::Null, move || response, out_tx.clone()),
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(peer = %peer, error = %e, "websocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    // Shutting a servant down waits for a capture in progress.
    let released = tokio::task::spawn_blocking(move || session.release_all()).await;
    if let Err(e) = released {
        error!(peer = %peer, error = %e, "servant release failed");
    }
    debug!(peer = %peer, "client disconnected");
    Ok(())
}

/// Run `call` on the blocking pool and queue its response.
///
/// A panicking call is still answered, with a transport error under `id`.
fn spawn_call<F>(id: Value, call: F, out_tx: mpsc::Sender<String>)
where
    F: FnOnce() -> Response + Send + 'static,
{
    tokio::spawn(async move {
        let response = match tokio::task::spawn_blocking(call).await {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "servant call panicked");
                Response::err(id, &AgimusError::Transport("servant call panicked".into()))
            }
        };
        match serde_json::to_string(&response) {
            Ok(frame) => {
                // The connection may be gone; the answer is then dropped.
                let _ = out_tx.send(frame).await;
            }
            Err(e) => error!(error = %e, "response serialization error"),
        }
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use agimus_middleware::EventBus;
    use agimus_planning::{Device, ProblemSolver};
    use serde_json::json;
    use tokio_tungstenite::connect_async;

    fn plugin() -> Arc<ServerPlugin> {
        let mut ps = ProblemSolver::default();
        ps.set_robot(Device::new("robot").into_shared());
        let mut plugin = ServerPlugin::new(ps.into_shared(), Arc::new(EventBus::default()));
        plugin.start_server("hpp", "corbaserver");
        Arc::new(plugin)
    }

    #[test]
    fn default_port_is_13331() {
        let server = RemoteObjectServer::new(plugin());
        assert_eq!(server.port(), DEFAULT_PORT);
        assert_eq!(server.with_port(4000).port(), 4000);
    }

    #[tokio::test]
    async fn answers_requests_over_websocket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(RemoteObjectServer::new(plugin()).serve(listener));

        let (mut ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();
        let request = json!({ "id": 1, "servant": "server", "method": "getDiscretization" });
        ws.send(Message::Text(request.to_string().into())).await.unwrap();

        let reply = loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => break text,
                _ => continue,
            }
        };
        let response: Response = serde_json::from_str(reply.as_str()).unwrap();
        assert_eq!(response.id, json!(1));
        assert!(response.result.unwrap()["servant"].is_string());

        let request = json!({ "id": 2, "servant": "nobody", "method": "compute" });
        ws.send(Message::Text(request.to_string().into())).await.unwrap();
        let reply = loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => break text,
                _ => continue,
            }
        };
        let response: Response = serde_json::from_str(reply.as_str()).unwrap();
        assert_eq!(response.id, json!(2));
        assert!(response.error.unwrap().contains("No servant nobody"));

        ws.close(None).await.unwrap();
    }

    #[tokio::test]
    async fn panicking_call_is_answered_with_an_error() {
        let (out_tx, mut out_rx) = mpsc::channel(4);
        spawn_call(json!(7), || panic!("bad cloud"), out_tx);

        let frame = out_rx.recv().await.expect("an answer");
        let response: Response = serde_json::from_str(&frame).unwrap();
        assert_eq!(response.id, json!(7));
        assert!(response.result.is_none());
        assert!(response.error.unwrap().contains("servant call panicked"));
    }

    #[tokio::test]
    async fn malformed_frame_is_answered_over_websocket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(RemoteObjectServer::new(plugin()).serve(listener));

        let (mut ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();
        ws.send(Message::Text("not json".into())).await.unwrap();
        let reply = loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => break text,
                _ => continue,
            }
        };
        let response: Response = serde_json::from_str(reply.as_str()).unwrap();
        assert_eq!(response.id, Value::Null);
        assert!(response.error.unwrap().contains("malformed request"));
    }
}
