//! Kinematic model of the robot.
//!
//! A [`Device`] is a tree of joints rooted at joint 0, `"universe"`.  Every
//! joint owns a contiguous slice of the configuration vector and a frame of
//! its own name; additional frames (links, sensors, tool tips) can be hung
//! off any joint with a fixed placement.
//!
//! | Joint kind | Config size | Configuration layout |
//! |---|---|---|
//! | `Fixed` | 0 | – |
//! | `Revolute` | 1 | angle (rad) |
//! | `RevoluteUnbounded` | 2 | `cos θ`, `sin θ` |
//! | `Prismatic` | 1 | displacement (m) |
//! | `FreeFlyer` | 7 | `x y z qx qy qz qw` |
//!
//! Forward kinematics is explicit: world placements are refreshed by
//! [`Device::compute_forward_kinematics`] and
//! [`Device::compute_frames_forward_kinematics`], and read back with
//! [`Device::joint_transform`] / [`Device::frame_transform`].

use std::ops::Range;
use std::sync::{Arc, RwLock};

use agimus_perception::{Quaternion, Transform3D, Vec3};
use agimus_types::AgimusError;

use crate::geometry::{GeometryIndex, GeometryModel};

/// Robot shared between the problem solver and the services.
pub type SharedDevice = Arc<RwLock<Device>>;

pub type JointIndex = usize;
pub type FrameIndex = usize;

/// Name of the root joint and of its frame.
pub const UNIVERSE: &str = "universe";

// ────────────────────────────────────────────────────────────────────────────
// Joints
// ────────────────────────────────────────────────────────────────────────────

/// Motion model of a joint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JointKind {
    Fixed,
    Revolute { axis: Vec3 },
    RevoluteUnbounded { axis: Vec3 },
    Prismatic { axis: Vec3 },
    FreeFlyer,
}

impl JointKind {
    /// Number of configuration variables of the joint.
    pub fn config_size(&self) -> usize {
        match self {
            JointKind::Fixed => 0,
            JointKind::Revolute { .. } | JointKind::Prismatic { .. } => 1,
            JointKind::RevoluteUnbounded { .. } => 2,
            JointKind::FreeFlyer => 7,
        }
    }

    /// Configuration of the joint at rest.
    pub fn neutral(&self) -> Vec<f64> {
        match self {
            JointKind::Fixed => vec![],
            JointKind::Revolute { .. } | JointKind::Prismatic { .. } => vec![0.0],
            JointKind::RevoluteUnbounded { .. } => vec![1.0, 0.0],
            JointKind::FreeFlyer => vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0],
        }
    }

    /// Transform applied by the joint for configuration slice `q`.
    ///
    /// `q.len()` must equal [`JointKind::config_size`].
    pub fn motion(&self, q: &[f64]) -> Transform3D {
        match *self {
            JointKind::Fixed => Transform3D::identity(),
            JointKind::Revolute { axis } => {
                Transform3D::from_rotation(Quaternion::from_axis_angle(axis, q[0]))
            }
            JointKind::RevoluteUnbounded { axis } => {
                let angle = q[1].atan2(q[0]);
                Transform3D::from_rotation(Quaternion::from_axis_angle(axis, angle))
            }
            JointKind::Prismatic { axis } => {
                let n = axis.norm();
                let unit = if n > 0.0 { axis.scale(1.0 / n) } else { axis };
                Transform3D::from_translation(unit.scale(q[0]))
            }
            JointKind::FreeFlyer => {
                Transform3D::from_xyz_quat([q[0], q[1], q[2], q[3], q[4], q[5], q[6]])
            }
        }
    }
}

/// One joint of the kinematic tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Joint {
    pub name: String,
    /// Parent joint.  The universe is its own parent.
    pub parent: JointIndex,
    /// Placement of the joint in its parent joint frame, at rest.
    pub placement: Transform3D,
    pub kind: JointKind,
    /// First index of the joint in the configuration vector.
    pub idx_q: usize,
}

// ────────────────────────────────────────────────────────────────────────────
// Frames
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Joint,
    Body,
    Sensor,
    Operational,
}

/// A named coordinate system rigidly attached to a joint.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub name: String,
    pub parent_joint: JointIndex,
    /// Placement of the frame in its parent joint frame.
    pub placement: Transform3D,
    pub kind: FrameKind,
}

// ────────────────────────────────────────────────────────────────────────────
// Device
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Device {
    name: String,
    joints: Vec<Joint>,
    frames: Vec<Frame>,
    configuration: Vec<f64>,
    joint_placements: Vec<Transform3D>,
    frame_placements: Vec<Transform3D>,
    geometry: GeometryModel,
}

impl Device {
    /// Create a device holding only the universe joint.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            joints: vec![Joint {
                name: UNIVERSE.to_string(),
                parent: 0,
                placement: Transform3D::identity(),
                kind: JointKind::Fixed,
                idx_q: 0,
            }],
            frames: vec![Frame {
                name: UNIVERSE.to_string(),
                parent_joint: 0,
                placement: Transform3D::identity(),
                kind: FrameKind::Joint,
            }],
            configuration: Vec::new(),
            joint_placements: vec![Transform3D::identity()],
            frame_placements: vec![Transform3D::identity()],
            geometry: GeometryModel::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a joint under `parent` and the frame of the same name.
    ///
    /// The configuration vector grows by the neutral configuration of the
    /// joint.
    pub fn add_joint(
        &mut self,
        name: impl Into<String>,
        parent: &str,
        kind: JointKind,
        placement: Transform3D,
    ) -> Result<JointIndex, AgimusError> {
        let name = name.into();
        let parent = self.joint_by_name(parent)?;
        if self.joints.iter().any(|j| j.name == name) || self.frame_by_name(&name).is_ok() {
            return Err(AgimusError::InvalidArgument(format!(
                "a joint or frame named \"{name}\" already exists"
            )));
        }

        let index = self.joints.len();
        self.joints.push(Joint {
            name: name.clone(),
            parent,
            placement,
            kind,
            idx_q: self.configuration.len(),
        });
        self.configuration.extend(kind.neutral());
        self.joint_placements.push(Transform3D::identity());
        self.frames.push(Frame {
            name,
            parent_joint: index,
            placement: Transform3D::identity(),
            kind: FrameKind::Joint,
        });
        self.frame_placements.push(Transform3D::identity());
        Ok(index)
    }

    /// Attach a frame to the joint named `parent_joint`.
    pub fn add_frame(
        &mut self,
        name: impl Into<String>,
        parent_joint: &str,
        placement: Transform3D,
        kind: FrameKind,
    ) -> Result<FrameIndex, AgimusError> {
        let name = name.into();
        let parent_joint = self.joint_by_name(parent_joint)?;
        if self.frame_by_name(&name).is_ok() {
            return Err(AgimusError::InvalidArgument(format!(
                "a frame named \"{name}\" already exists"
            )));
        }
        self.frames.push(Frame {
            name,
            parent_joint,
            placement,
            kind,
        });
        self.frame_placements.push(Transform3D::identity());
        Ok(self.frames.len() - 1)
    }

    // ── Configuration ──────────────────────────────────────────────────────

    pub fn config_size(&self) -> usize {
        self.configuration.len()
    }

    pub fn neutral_configuration(&self) -> Vec<f64> {
        self.joints.iter().flat_map(|j| j.kind.neutral()).collect()
    }

    pub fn current_configuration(&self) -> &[f64] {
        &self.configuration
    }

    /// Replace the current configuration.  World placements are *not*
    /// refreshed until forward kinematics is computed again.
    pub fn set_current_configuration(&mut self, q: &[f64]) -> Result<(), AgimusError> {
        if q.len() != self.config_size() {
            return Err(AgimusError::DimensionMismatch {
                what: "configuration".into(),
                expected: self.config_size(),
                got: q.len(),
            });
        }
        self.configuration.copy_from_slice(q);
        Ok(())
    }

    /// Slice of the configuration vector owned by `joint`.
    pub fn joint_config_range(&self, joint: JointIndex) -> Range<usize> {
        let j = &self.joints[joint];
        j.idx_q..j.idx_q + j.kind.config_size()
    }

    // ── Forward kinematics ─────────────────────────────────────────────────

    /// Refresh the world placement of every joint.
    pub fn compute_forward_kinematics(&mut self) {
        // Parents are always inserted before their children.
        for i in 1..self.joints.len() {
            let joint = &self.joints[i];
            let q = &self.configuration[joint.idx_q..joint.idx_q + joint.kind.config_size()];
            self.joint_placements[i] = self.joint_placements[joint.parent]
                .compose(joint.placement)
                .compose(joint.kind.motion(q));
        }
    }

    /// Refresh the world placement of every joint and every frame.
    pub fn compute_frames_forward_kinematics(&mut self) {
        self.compute_forward_kinematics();
        for (placement, frame) in self.frame_placements.iter_mut().zip(&self.frames) {
            *placement = self.joint_placements[frame.parent_joint].compose(frame.placement);
        }
    }

    /// World placement of `joint` as of the last forward kinematics.
    pub fn joint_transform(&self, joint: JointIndex) -> Transform3D {
        self.joint_placements[joint]
    }

    /// World placement of `frame` as of the last frame forward kinematics.
    pub fn frame_transform(&self, frame: FrameIndex) -> Transform3D {
        self.frame_placements[frame]
    }

    // ── Lookup ─────────────────────────────────────────────────────────────

    pub fn joint_by_name(&self, name: &str) -> Result<JointIndex, AgimusError> {
        self.joints
            .iter()
            .position(|j| j.name == name)
            .ok_or_else(|| AgimusError::UnknownJoint(name.to_string()))
    }

    pub fn joint(&self, index: JointIndex) -> &Joint {
        &self.joints[index]
    }

    pub fn joints(&self) -> &[Joint] {
        &self.joints
    }

    pub fn frame_by_name(&self, name: &str) -> Result<FrameIndex, AgimusError> {
        self.frames
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(|| AgimusError::UnknownFrame(name.to_string()))
    }

    pub fn frame(&self, index: FrameIndex) -> &Frame {
        &self.frames[index]
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    // ── Geometry ───────────────────────────────────────────────────────────

    pub fn geometry_model(&self) -> &GeometryModel {
        &self.geometry
    }

    pub fn geometry_model_mut(&mut self) -> &mut GeometryModel {
        &mut self.geometry
    }

    /// World placement of a geometry object as of the last forward
    /// kinematics.
    pub fn geometry_transform(&self, index: GeometryIndex) -> Option<Transform3D> {
        self.geometry
            .get(index)
            .map(|g| self.joint_placements[g.parent_joint].compose(g.placement))
    }

    /// Wrap the device for sharing.
    pub fn into_shared(self) -> SharedDevice {
        Arc::new(RwLock::new(self))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
