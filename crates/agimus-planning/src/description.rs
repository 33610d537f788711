//! Serializable robot description.
//!
//! The description is the `[robot]` table of the configuration file:
//!
//! ```toml
//! [robot]
//! name = "mobile_arm"
//!
//! [[robot.joints]]
//! name = "base"
//! type = "free_flyer"
//!
//! [[robot.joints]]
//! name = "shoulder"
//! parent = "base"
//! type = "revolute"
//! axis = [0.0, 0.0, 1.0]
//! placement = { translation = [0.0, 0.0, 0.5] }
//!
//! [[robot.frames]]
//! name = "camera"
//! joint = "shoulder"
//! kind = "sensor"
//! placement = { translation = [0.1, 0.0, 0.2], rotation = [0.0, 0.0, 0.0, 1.0] }
//! ```
//!
//! Rotations are quaternions in `[x, y, z, w]` order.  Joints must be listed
//! parents first.

use agimus_perception::{Quaternion, Transform3D, Vec3};
use agimus_types::AgimusError;
use serde::{Deserialize, Serialize};

use crate::device::{Device, FrameKind, JointKind, UNIVERSE};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotDescription {
    pub name: String,
    #[serde(default)]
    pub joints: Vec<JointDescription>,
    #[serde(default)]
    pub frames: Vec<FrameDescription>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JointType {
    Fixed,
    Revolute,
    RevoluteUnbounded,
    Prismatic,
    FreeFlyer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointDescription {
    pub name: String,
    #[serde(default = "universe")]
    pub parent: String,
    #[serde(rename = "type")]
    pub joint_type: JointType,
    /// Axis of revolute and prismatic joints; defaults to `z`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub axis: Option<[f64; 3]>,
    #[serde(default)]
    pub placement: Placement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKindDescription {
    Body,
    #[default]
    Operational,
    Sensor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameDescription {
    pub name: String,
    pub joint: String,
    #[serde(default)]
    pub kind: FrameKindDescription,
    #[serde(default)]
    pub placement: Placement,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    #[serde(default)]
    pub translation: [f64; 3],
    /// `[x, y, z, w]`
    #[serde(default = "identity_rotation")]
    pub rotation: [f64; 4],
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            translation: [0.0; 3],
            rotation: identity_rotation(),
        }
    }
}

impl From<Placement> for Transform3D {
    fn from(p: Placement) -> Self {
        let [x, y, z, w] = p.rotation;
        Transform3D::new(
            Vec3::from(p.translation),
            Quaternion::new(w, x, y, z).normalized(),
        )
    }
}

fn universe() -> String {
    UNIVERSE.to_string()
}

fn identity_rotation() -> [f64; 4] {
    [0.0, 0.0, 0.0, 1.0]
}

impl Device {
    /// Build a device from its description.
    ///
    /// # Errors
    ///
    /// [`AgimusError::UnknownJoint`] when a joint or frame names a parent
    /// that has not been declared before it, [`AgimusError::InvalidArgument`]
    /// on duplicate names.
    pub fn from_description(desc: &RobotDescription) -> Result<Self, AgimusError> {
        let mut device = Device::new(desc.name.clone());
        for joint in &desc.joints {
            let axis = Vec3::from(joint.axis.unwrap_or([0.0, 0.0, 1.0]));
            let kind = match joint.joint_type {
                JointType::Fixed => JointKind::Fixed,
                JointType::Revolute => JointKind::Revolute { axis },
                JointType::RevoluteUnbounded => JointKind::RevoluteUnbounded { axis },
                JointType::Prismatic => JointKind::Prismatic { axis },
                JointType::FreeFlyer => JointKind::FreeFlyer,
            };
            device.add_joint(
                joint.name.clone(),
                &joint.parent,
                kind,
                joint.placement.into(),
            )?;
        }
        for frame in &desc.frames {
            let kind = match frame.kind {
                FrameKindDescription::Body => FrameKind::Body,
                FrameKindDescription::Operational => FrameKind::Operational,
                FrameKindDescription::Sensor => FrameKind::Sensor,
            };
            device.add_frame(frame.name.clone(), &frame.joint, frame.placement.into(), kind)?;
        }
        device.compute_frames_forward_kinematics();
        Ok(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const MOBILE_ARM: &str = r#"
name = "mobile_arm"

[[joints]]
name = "base"
type = "free_flyer"

[[joints]]
name = "shoulder"
parent = "base"
type = "revolute"
placement = { translation = [0.0, 0.0, 0.5] }

[[frames]]
name = "camera"
joint = "shoulder"
kind = "sensor"
placement = { translation = [0.1, 0.0, 0.2] }
"#;

    #[test]
    fn parses_toml_description() {
        let desc: RobotDescription = toml::from_str(MOBILE_ARM).unwrap();
        assert_eq!(desc.joints.len(), 2);
        assert_eq!(desc.joints[0].parent, UNIVERSE);
        assert_eq!(desc.joints[1].joint_type, JointType::Revolute);
        assert_eq!(desc.frames[0].kind, FrameKindDescription::Sensor);
        assert_eq!(desc.frames[0].placement.rotation, [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn builds_device_with_placements() {
        let desc: RobotDescription = toml::from_str(MOBILE_ARM).unwrap();
        let device = Device::from_description(&desc).unwrap();

        assert_eq!(device.name(), "mobile_arm");
        assert_eq!(device.config_size(), 8);
        let camera = device.frame_by_name("camera").unwrap();
        assert_eq!(device.frame(camera).kind, FrameKind::Sensor);
        let t = device.frame_transform(camera).translation;
        assert_abs_diff_eq!(t.x, 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(t.z, 0.7, epsilon = 1e-12);
    }

    #[test]
    fn unknown_parent_is_rejected() {
        let desc = RobotDescription {
            name: "broken".into(),
            joints: vec![JointDescription {
                name: "elbow".into(),
                parent: "shoulder".into(),
                joint_type: JointType::Revolute,
                axis: None,
                placement: Placement::default(),
            }],
            frames: vec![],
        };
        assert_eq!(
            Device::from_description(&desc).unwrap_err(),
            AgimusError::UnknownJoint("shoulder".into())
        );
    }

    #[test]
    fn round_trips_through_toml() {
        let desc: RobotDescription = toml::from_str(MOBILE_ARM).unwrap();
        let raw = toml::to_string(&desc).unwrap();
        let back: RobotDescription = toml::from_str(&raw).unwrap();
        assert_eq!(back, desc);
    }
}
