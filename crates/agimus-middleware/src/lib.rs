//! `agimus-middleware` – message transport.
//!
//! # Modules
//!
//! - [`bus`] – named-topic publish/subscribe bus built on Tokio broadcast
//!   channels.  Sensor messages reach the capture service through it and the
//!   discretization service publishes robot states on it.
//! - [`ros_bridge`] – rosbridge-compatible WebSocket endpoint that feeds
//!   external ROS traffic into the bus and streams bus topics back out.

pub mod bus;
pub mod ros_bridge;

pub use bus::{EventBus, TopicReceiver};
pub use ros_bridge::{DEFAULT_BRIDGE_PORT, RosBridge};
