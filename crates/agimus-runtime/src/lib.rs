//! `agimus-runtime` – the services exposed by the plugin.
//!
//! # Modules
//!
//! - [`point_cloud`] – [`PointCloud`][point_cloud::PointCloud]: waits for a
//!   sensor point cloud, builds an occupancy octree and attaches it to a
//!   frame of the robot.
//! - [`discretization`] – [`Discretization`][discretization::Discretization]:
//!   evaluates a path at requested times and publishes the robot state.
//! - [`node`] – [`NodeHandle`][node::NodeHandle]: the services' polling
//!   handle on the message bus.
//! - [`viewer`] – [`SceneViewer`][viewer::SceneViewer] trait and its bus
//!   implementation.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: global
//!   `tracing` subscriber with an optional OTLP span exporter.
//!
//! # Locking
//!
//! Each service serialises its calls on its node handle: a capture holds the
//! handle for the whole wait and [`PointCloud::shutdown`][point_cloud::PointCloud::shutdown]
//! takes the same lock.  When both are needed, the problem solver is locked
//! before the robot.

pub mod discretization;
pub mod node;
pub mod point_cloud;
pub mod telemetry;
pub mod viewer;

pub use discretization::Discretization;
pub use node::{NodeHandle, Publisher, Subscriber};
pub use point_cloud::PointCloud;
pub use telemetry::{TracerProviderGuard, init_tracing};
pub use viewer::{BusSceneViewer, SceneViewer, VIEWER_TOPIC};
