//! 3-D viewer client.
//!
//! Services describe what they want displayed through the [`SceneViewer`]
//! trait.  [`BusSceneViewer`] turns each call into a [`SceneCommand`]
//! published on [`VIEWER_TOPIC`]; viewers subscribe through the rosbridge
//! endpoint and replay the commands.

use std::sync::Arc;

use agimus_middleware::EventBus;
use agimus_types::{AgimusError, EventPayload, SceneCommand};
use tracing::trace;

/// Topic scene commands are published on.
pub const VIEWER_TOPIC: &str = "/agimus/viewer";

/// Opaque white.
pub const WHITE: [f32; 4] = [1.0, 1.0, 1.0, 1.0];

/// Minimal scene-graph interface of a 3-D viewer.
///
/// Poses are `[x, y, z, qx, qy, qz, qw]`.
pub trait SceneViewer: Send + Sync {
    fn create_group(&self, group: &str) -> Result<(), AgimusError>;
    fn add_box(&self, name: &str, size: [f32; 3], color: [f32; 4]) -> Result<(), AgimusError>;
    fn add_to_group(&self, node: &str, group: &str) -> Result<(), AgimusError>;
    fn apply_configuration(&self, node: &str, pose: [f32; 7]) -> Result<(), AgimusError>;
}

/// [`SceneViewer`] publishing [`SceneCommand`]s on the bus.
pub struct BusSceneViewer {
    bus: Arc<EventBus>,
    topic: String,
}

impl BusSceneViewer {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self::with_topic(bus, VIEWER_TOPIC)
    }

    pub fn with_topic(bus: Arc<EventBus>, topic: impl Into<String>) -> Self {
        Self {
            bus,
            topic: topic.into(),
        }
    }

    fn send(&self, command: SceneCommand) -> Result<(), AgimusError> {
        match self.bus.publish(&self.topic, EventPayload::Scene(command)) {
            Ok(n) => {
                trace!(topic = %self.topic, receivers = n, "scene command sent");
                Ok(())
            }
            // No viewer connected: the command is dropped.
            Err(AgimusError::Channel(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl SceneViewer for BusSceneViewer {
    fn create_group(&self, group: &str) -> Result<(), AgimusError> {
        self.send(SceneCommand::CreateGroup {
            group: group.to_string(),
        })
    }

    fn add_box(&self, name: &str, size: [f32; 3], color: [f32; 4]) -> Result<(), AgimusError> {
        self.send(SceneCommand::AddBox {
            name: name.to_string(),
            size,
            color,
        })
    }

    fn add_to_group(&self, node: &str, group: &str) -> Result<(), AgimusError> {
        self.send(SceneCommand::AddToGroup {
            node: node.to_string(),
            group: group.to_string(),
        })
    }

    fn apply_configuration(&self, node: &str, pose: [f32; 7]) -> Result<(), AgimusError> {
        self.send(SceneCommand::ApplyConfiguration {
            node: node.to_string(),
            pose,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_are_published_in_order() {
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe(VIEWER_TOPIC);
        let viewer = BusSceneViewer::new(Arc::clone(&bus));

        viewer.create_group("robot/camera/octree").unwrap();
        viewer.add_box("robot/camera/octree/box_0", [0.1; 3], WHITE).unwrap();

        let first = rx.try_recv().unwrap();
        assert!(matches!(
            first.payload,
            EventPayload::Scene(SceneCommand::CreateGroup { ref group }) if group == "robot/camera/octree"
        ));
        let second = rx.try_recv().unwrap();
        assert!(matches!(
            second.payload,
            EventPayload::Scene(SceneCommand::AddBox { color, .. }) if color == WHITE
        ));
    }

    #[test]
    fn no_viewer_connected_is_not_an_error() {
        let viewer = BusSceneViewer::new(Arc::new(EventBus::default()));
        assert!(viewer.create_group("g").is_ok());
    }
}
