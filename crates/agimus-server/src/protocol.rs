//! Remote-object protocol.
//!
//! Every request names a servant and a method:
//!
//! ```json
//! {"id": 1, "servant": "server", "method": "getPointCloud", "params": {}}
//! {"id": 1, "result": {"servant": "5f0c…"}}
//!
//! {"id": 2, "servant": "5f0c…", "method": "initializeRosNode",
//!  "params": {"name": "agimus_point_cloud", "anonymous": true}}
//! {"id": 2, "result": true}
//! ```
//!
//! Failures answer `{"id": …, "error": "<message>"}`.
//!
//! Servants created by the factory methods are owned by the [`Session`] of
//! the connection that created them.  They live until the client calls
//! `deleteThis` on them or the session is closed.
//!
//! # Methods
//!
//! | Servant | Method | Params | Result |
//! |---|---|---|---|
//! | `server` | `getDiscretization` | – | `{"servant": id}` |
//! | `server` | `getPointCloud` | – | `{"servant": id}` |
//! | any service | `initializeRosNode` | `name`, `anonymous` | `bool` |
//! | any service | `shutdownRos` | – | `null` |
//! | any service | `deleteThis` | – | `null` |
//! | point cloud | `getPointCloud` | `octreeFrame`, `topic`, `sensorFrame`, `resolution`, `configuration`, `timeOut` | `bool` |
//! | discretization | `setPath` | `waypoints: [{time, configuration}]` | `null` |
//! | discretization | `setJointNames` | `names` | `null` |
//! | discretization | `addFrameTopic` | `frame`, `topic` | `null` |
//! | discretization | `resetTopics` | – | `null` |
//! | discretization | `compute` | `time` | `null` |
//! | discretization | `sample` | `step` | `[{time, configuration}]` |

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use agimus_planning::{Path, Waypoint};
use agimus_runtime::{Discretization, PointCloud};
use agimus_types::AgimusError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::plugin::{SERVER_SERVANT, ServerPlugin};

// ────────────────────────────────────────────────────────────────────────────
// Wire types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Value,
    pub servant: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Value, error: &AgimusError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error.to_string()),
        }
    }
}

/// Decode one text frame, or the error response answering it.
pub fn parse_request(text: &str) -> Result<Request, Response> {
    serde_json::from_str::<Request>(text).map_err(|e| {
        let error = AgimusError::Serialization(format!("malformed request: {e}"));
        warn!(error = %error, "rejected request");
        Response::err(Value::Null, &error)
    })
}

// ── Parameters ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct InitializeParams {
    name: String,
    #[serde(default)]
    anonymous: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetPointCloudParams {
    octree_frame: String,
    topic: String,
    sensor_frame: String,
    resolution: f64,
    configuration: Vec<f64>,
    #[serde(rename = "timeOut")]
    time_out: f64,
}

#[derive(Deserialize)]
struct SetPathParams {
    waypoints: Vec<Waypoint>,
}

#[derive(Deserialize)]
struct SetJointNamesParams {
    names: Vec<String>,
}

#[derive(Deserialize)]
struct FrameTopicParams {
    frame: String,
    topic: String,
}

#[derive(Deserialize)]
struct TimeParams {
    time: f64,
}

#[derive(Deserialize)]
struct StepParams {
    step: f64,
}

fn params<T: DeserializeOwned>(method: &str, value: Value) -> Result<T, AgimusError> {
    // Methods without parameters may omit `params` entirely.
    let value = if value.is_null() { json!({}) } else { value };
    serde_json::from_value(value)
        .map_err(|e| AgimusError::Serialization(format!("bad parameters for {method}: {e}")))
}

// ────────────────────────────────────────────────────────────────────────────
// Session
// ────────────────────────────────────────────────────────────────────────────

/// A servant created through the factory.
#[derive(Clone)]
pub enum Servant {
    PointCloud(Arc<PointCloud>),
    Discretization(Arc<Discretization>),
}

impl Servant {
    fn kind(&self) -> &'static str {
        match self {
            Servant::PointCloud(_) => "PointCloud",
            Servant::Discretization(_) => "Discretization",
        }
    }

    fn shutdown(&self) {
        match self {
            Servant::PointCloud(s) => s.shutdown(),
            Servant::Discretization(s) => s.shutdown(),
        }
    }
}

/// Per-connection dispatcher and servant registry.
///
/// Methods take `&self` so that calls on different servants may run
/// concurrently; the registry lock is never held during a call.
pub struct Session {
    plugin: Arc<ServerPlugin>,
    servants: Mutex<HashMap<String, Servant>>,
}

impl Session {
    pub fn new(plugin: Arc<ServerPlugin>) -> Self {
        Self {
            plugin,
            servants: Mutex::new(HashMap::new()),
        }
    }

    /// Handle one raw text frame.
    pub fn handle_text(&self, text: &str) -> Response {
        match parse_request(text) {
            Ok(request) => self.handle(request),
            Err(response) => response,
        }
    }

    pub fn handle(&self, request: Request) -> Response {
        let Request {
            id,
            servant,
            method,
            params,
        } = request;
        match self.dispatch(&servant, &method, params) {
            Ok(result) => Response::ok(id, result),
            Err(e) => {
                debug!(servant = %servant, method = %method, error = %e, "call failed");
                Response::err(id, &e)
            }
        }
    }

    pub fn dispatch(&self, servant: &str, method: &str, params: Value) -> Result<Value, AgimusError> {
        if servant == SERVER_SERVANT {
            return self.call_server(method);
        }
        let target = self
            .lock_servants()
            .get(servant)
            .cloned()
            .ok_or_else(|| AgimusError::InvalidArgument(format!("No servant {servant}")))?;

        if method == "deleteThis" {
            self.release(servant);
            return Ok(Value::Null);
        }
        match target {
            Servant::PointCloud(s) => call_point_cloud(&s, method, params),
            Servant::Discretization(s) => call_discretization(&s, method, params),
        }
    }

    /// Number of live servants owned by the session.
    pub fn servant_count(&self) -> usize {
        self.lock_servants().len()
    }

    /// Shut down and drop every servant of the session.
    pub fn release_all(&self) {
        let servants: Vec<(String, Servant)> = self.lock_servants().drain().collect();
        for (id, servant) in servants {
            servant.shutdown();
            debug!(servant = %id, kind = servant.kind(), "servant released");
        }
    }

    fn call_server(&self, method: &str) -> Result<Value, AgimusError> {
        let server = self.plugin.servant(SERVER_SERVANT)?;
        let servant = match method {
            "getDiscretization" => Servant::Discretization(Arc::new(server.get_discretization()?)),
            "getPointCloud" => Servant::PointCloud(Arc::new(server.get_point_cloud()?)),
            other => return Err(unknown_method("server", other)),
        };
        let id = Uuid::new_v4().to_string();
        debug!(servant = %id, kind = servant.kind(), "servant created");
        self.lock_servants().insert(id.clone(), servant);
        Ok(json!({ "servant": id }))
    }

    fn release(&self, id: &str) {
        if let Some(servant) = self.lock_servants().remove(id) {
            servant.shutdown();
            debug!(servant = %id, kind = servant.kind(), "servant deleted");
        }
    }

    fn lock_servants(&self) -> MutexGuard<'_, HashMap<String, Servant>> {
        self.servants.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.release_all();
    }
}

fn unknown_method(kind: &str, method: &str) -> AgimusError {
    AgimusError::InvalidArgument(format!("{kind} has no method {method}"))
}

fn call_point_cloud(s: &PointCloud, method: &str, value: Value) -> Result<Value, AgimusError> {
    match method {
        "initializeRosNode" => {
            let p: InitializeParams = params(method, value)?;
            Ok(json!(s.initialize_node(&p.name, p.anonymous)))
        }
        "shutdownRos" => {
            s.shutdown();
            Ok(Value::Null)
        }
        "getPointCloud" => {
            let p: GetPointCloudParams = params(method, value)?;
            let got = s.get_point_cloud(
                &p.octree_frame,
                &p.topic,
                &p.sensor_frame,
                p.resolution,
                &p.configuration,
                p.time_out,
            )?;
            Ok(json!(got))
        }
        other => Err(unknown_method("PointCloud", other)),
    }
}

fn call_discretization(s: &Discretization, method: &str, value: Value) -> Result<Value, AgimusError> {
    match method {
        "initializeRosNode" => {
            let p: InitializeParams = params(method, value)?;
            Ok(json!(s.initialize_node(&p.name, p.anonymous)))
        }
        "shutdownRos" => {
            s.shutdown();
            Ok(Value::Null)
        }
        "setPath" => {
            let p: SetPathParams = params(method, value)?;
            s.set_path(Path::new(p.waypoints)?)?;
            Ok(Value::Null)
        }
        "setJointNames" => {
            let p: SetJointNamesParams = params(method, value)?;
            s.set_joint_names(&p.names)?;
            Ok(Value::Null)
        }
        "addFrameTopic" => {
            let p: FrameTopicParams = params(method, value)?;
            s.add_frame_topic(&p.frame, &p.topic)?;
            Ok(Value::Null)
        }
        "resetTopics" => {
            s.reset_topics();
            Ok(Value::Null)
        }
        "compute" => {
            let p: TimeParams = params(method, value)?;
            s.compute(p.time)?;
            Ok(Value::Null)
        }
        "sample" => {
            let p: StepParams = params(method, value)?;
            let samples: Vec<Waypoint> = s
                .sample(p.step)?
                .into_iter()
                .map(|(time, configuration)| Waypoint {
                    time,
                    configuration,
                })
                .collect();
            serde_json::to_value(samples).map_err(|e| AgimusError::Serialization(e.to_string()))
        }
        other => Err(unknown_method("Discretization", other)),
    }
}
