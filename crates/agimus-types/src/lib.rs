//! `agimus-types` – shared vocabulary of the agimus plugin.
//!
//! Message layouts follow the ROS `sensor_msgs` / `geometry_msgs` definitions
//! closely enough that rosbridge JSON frames deserialize into them directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ────────────────────────────────────────────────────────────────────────────
// Message header
// ────────────────────────────────────────────────────────────────────────────

/// ROS-style time stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Stamp {
    pub secs: i64,
    pub nsecs: u32,
}

impl Stamp {
    /// The current wall-clock time.
    pub fn now() -> Self {
        let now = Utc::now();
        Self {
            secs: now.timestamp(),
            nsecs: now.timestamp_subsec_nanos(),
        }
    }
}

/// Standard message header.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Header {
    #[serde(default)]
    pub seq: u32,
    #[serde(default)]
    pub stamp: Stamp,
    #[serde(default)]
    pub frame_id: String,
}

impl Header {
    /// A header stamped now in `frame_id`.
    pub fn now(frame_id: impl Into<String>) -> Self {
        Self {
            seq: 0,
            stamp: Stamp::now(),
            frame_id: frame_id.into(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Point clouds
// ────────────────────────────────────────────────────────────────────────────

/// Numeric type of a [`PointField`], encoded with the `sensor_msgs` codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PointFieldDatatype {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Float64,
}

impl PointFieldDatatype {
    /// Size in bytes of one element.
    pub fn size(self) -> usize {
        match self {
            Self::Int8 | Self::Uint8 => 1,
            Self::Int16 | Self::Uint16 => 2,
            Self::Int32 | Self::Uint32 | Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }
}

impl TryFrom<u8> for PointFieldDatatype {
    type Error = AgimusError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            1 => Self::Int8,
            2 => Self::Uint8,
            3 => Self::Int16,
            4 => Self::Uint16,
            5 => Self::Int32,
            6 => Self::Uint32,
            7 => Self::Float32,
            8 => Self::Float64,
            other => {
                return Err(AgimusError::MalformedMessage(format!(
                    "unknown point field datatype {other}"
                )));
            }
        })
    }
}

impl From<PointFieldDatatype> for u8 {
    fn from(datatype: PointFieldDatatype) -> Self {
        match datatype {
            PointFieldDatatype::Int8 => 1,
            PointFieldDatatype::Uint8 => 2,
            PointFieldDatatype::Int16 => 3,
            PointFieldDatatype::Uint16 => 4,
            PointFieldDatatype::Int32 => 5,
            PointFieldDatatype::Uint32 => 6,
            PointFieldDatatype::Float32 => 7,
            PointFieldDatatype::Float64 => 8,
        }
    }
}

/// Describes one named channel inside each point record of a [`PointCloud2`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointField {
    pub name: String,
    /// Byte offset of the field from the start of the point record.
    pub offset: u32,
    pub datatype: PointFieldDatatype,
    #[serde(default = "default_count")]
    pub count: u32,
}

fn default_count() -> u32 {
    1
}

impl PointField {
    pub fn new(name: impl Into<String>, offset: u32, datatype: PointFieldDatatype) -> Self {
        Self {
            name: name.into(),
            offset,
            datatype,
            count: 1,
        }
    }
}

mod byte_array {
    use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Encoded {
        Base64(String),
        Numbers(Vec<u8>),
    }

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        match Encoded::deserialize(deserializer)? {
            Encoded::Base64(text) => BASE64
                .decode(text.as_bytes())
                .map_err(|e| D::Error::custom(format!("invalid base64 point data: {e}"))),
            Encoded::Numbers(bytes) => Ok(bytes),
        }
    }
}

/// A structured point cloud: `height` rows of `width` points, each point a
/// record of `point_step` bytes described by `fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointCloud2 {
    #[serde(default)]
    pub header: Header,
    pub height: u32,
    pub width: u32,
    pub fields: Vec<PointField>,
    #[serde(default)]
    pub is_bigendian: bool,
    pub point_step: u32,
    pub row_step: u32,
    /// Raw point records.  Serialized as base64 like rosbridge's `uint8[]`;
    /// a JSON number array is accepted as well.
    #[serde(with = "byte_array")]
    pub data: Vec<u8>,
    #[serde(default)]
    pub is_dense: bool,
}

impl PointCloud2 {
    /// Build an unorganized (`height == 1`) cloud of little-endian `FLOAT32`
    /// `x`, `y`, `z` records.
    pub fn from_xyz(frame_id: impl Into<String>, points: &[[f32; 3]]) -> Self {
        let mut data = Vec::with_capacity(points.len() * 12);
        for p in points {
            for c in p {
                data.extend_from_slice(&c.to_le_bytes());
            }
        }
        let width = points.len() as u32;
        Self {
            header: Header::now(frame_id),
            height: 1,
            width,
            fields: vec![
                PointField::new("x", 0, PointFieldDatatype::Float32),
                PointField::new("y", 4, PointFieldDatatype::Float32),
                PointField::new("z", 8, PointFieldDatatype::Float32),
            ],
            is_bigendian: false,
            point_step: 12,
            row_step: 12 * width,
            data,
            is_dense: true,
        }
    }

    /// Number of points the message claims to carry.
    pub fn point_count(&self) -> usize {
        self.height as usize * self.width as usize
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Robot state messages
// ────────────────────────────────────────────────────────────────────────────

/// Joint positions and velocities, keyed by joint name.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JointState {
    #[serde(default)]
    pub header: Header,
    pub name: Vec<String>,
    pub position: Vec<f64>,
    #[serde(default)]
    pub velocity: Vec<f64>,
}

/// Pose of `child_frame_id` expressed in `header.frame_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FramePose {
    pub header: Header,
    pub child_frame_id: String,
    pub translation: [f64; 3],
    /// Rotation as `[x, y, z, w]`.
    pub rotation: [f64; 4],
}

// ────────────────────────────────────────────────────────────────────────────
// Viewer scene commands
// ────────────────────────────────────────────────────────────────────────────

/// Scene-graph update understood by 3-D viewers.
///
/// Poses use the `[x, y, z, qx, qy, qz, qw]` layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum SceneCommand {
    CreateGroup {
        group: String,
    },
    AddBox {
        name: String,
        size: [f32; 3],
        color: [f32; 4],
    },
    AddToGroup {
        node: String,
        group: String,
    },
    ApplyConfiguration {
        node: String,
        pose: [f32; 7],
    },
}

// ────────────────────────────────────────────────────────────────────────────
// Bus envelope
// ────────────────────────────────────────────────────────────────────────────

/// Unified event wrapper for the message bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "/camera/depth/points"
    pub topic: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(topic: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            topic: topic.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    PointCloud(PointCloud2),
    JointState(JointState),
    /// Plain numeric vector (configuration, velocity, …).
    Vector(Vec<f64>),
    FramePose(FramePose),
    Scene(SceneCommand),
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Global error type of the plugin.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AgimusError {
    #[error("Not initialized: {0}")]
    NotInitialized(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0}")]
    MalformedMessage(String),

    #[error("There is no robot in the ProblemSolver instance")]
    MissingRobot,

    #[error("Unknown frame \"{0}\"")]
    UnknownFrame(String),

    #[error("Unknown joint \"{0}\"")]
    UnknownJoint(String),

    #[error("Dimension mismatch for {what}: expected {expected}, got {got}")]
    DimensionMismatch {
        what: String,
        expected: usize,
        got: usize,
    },

    #[error("No path has been set")]
    NoPath,

    #[error("Channel Error: {0}")]
    Channel(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Transport Error: {0}")]
    Transport(String),
}
