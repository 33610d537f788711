//! `agimus-perception` – from sensor messages to collision geometry.
//!
//! # Modules
//!
//! - [`transform`] – [`Transform3D`][transform::Transform3D]: rigid-body
//!   poses (translation + unit quaternion) with composition and inversion.
//! - [`point_cloud`] – validation of `PointCloud2` field layouts and
//!   conversion into an `N × 3` point matrix.
//! - [`octree`] – [`OcTree`][octree::OcTree]: occupancy tree built from a
//!   point matrix at a given resolution, used as a collision object.

pub mod octree;
pub mod point_cloud;
pub mod transform;

pub use octree::{Aabb, OcTree};
pub use point_cloud::{check_fields, to_point_matrix};
pub use transform::{Quaternion, Transform3D, Vec3};
