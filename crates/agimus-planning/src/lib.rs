//! `agimus-planning` – robot model and planner state.
//!
//! # Modules
//!
//! - [`device`] – kinematic tree, frames and forward kinematics.
//! - [`geometry`] – collision objects attached to joints.
//! - [`description`] – serde robot description used by the configuration.
//! - [`problem_solver`] – problem solver, problem and constraint graph.
//! - [`path`] – piecewise-linear time-parameterised paths.

pub mod description;
pub mod device;
pub mod geometry;
pub mod path;
pub mod problem_solver;

pub use description::RobotDescription;
pub use device::{
    Device, Frame, FrameIndex, FrameKind, Joint, JointIndex, JointKind, SharedDevice, UNIVERSE,
};
pub use geometry::{Geometry, GeometryIndex, GeometryModel, GeometryObject};
pub use path::{Path, Waypoint};
pub use problem_solver::{
    ConstraintGraph, Problem, ProblemSolver, ProblemSolverKind, SharedProblemSolver,
};
