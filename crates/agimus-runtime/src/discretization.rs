//! Path discretization service.
//!
//! [`Discretization`] evaluates a path at the times requested by a controller
//! and publishes the resulting robot state:
//!
//! | Topic | Payload |
//! |---|---|
//! | position topic (`/hpp/target/position`) | `Vector(q(t))` |
//! | velocity topic (`/hpp/target/velocity`) | `Vector(dq/dt(t))` |
//! | `/hpp/target/joint_state` | `JointState` of the selected joints |
//! | one topic per registered frame | `FramePose` of the frame in the world |
//!
//! Computing a state also sets it as the robot's current configuration.

use std::sync::{Arc, Mutex, MutexGuard};

use agimus_middleware::EventBus;
use agimus_planning::{FrameIndex, JointIndex, JointKind, Path, SharedDevice};
use agimus_types::{AgimusError, EventPayload, FramePose, Header, JointState};
use tracing::{debug, instrument};

use crate::node::NodeHandle;

pub const DEFAULT_POSITION_TOPIC: &str = "/hpp/target/position";
pub const DEFAULT_VELOCITY_TOPIC: &str = "/hpp/target/velocity";
pub const JOINT_STATE_TOPIC: &str = "/hpp/target/joint_state";

/// Frame id of published poses.
const WORLD_FRAME: &str = "world";

#[derive(Debug, Clone)]
struct FrameTopic {
    frame: String,
    index: FrameIndex,
    topic: String,
}

#[derive(Debug, Clone)]
struct SelectedJoint {
    name: String,
    index: JointIndex,
}

#[derive(Debug)]
struct State {
    path: Option<Arc<Path>>,
    joints: Vec<SelectedJoint>,
    frame_topics: Vec<FrameTopic>,
    position_topic: String,
    velocity_topic: String,
}

impl Default for State {
    fn default() -> Self {
        Self {
            path: None,
            joints: Vec::new(),
            frame_topics: Vec::new(),
            position_topic: DEFAULT_POSITION_TOPIC.to_string(),
            velocity_topic: DEFAULT_VELOCITY_TOPIC.to_string(),
        }
    }
}

pub struct Discretization {
    robot: SharedDevice,
    bus: Arc<EventBus>,
    handle: Mutex<Option<NodeHandle>>,
    state: Mutex<State>,
}

impl Discretization {
    pub fn new(robot: SharedDevice, bus: Arc<EventBus>) -> Self {
        Self {
            robot,
            bus,
            handle: Mutex::new(None),
            state: Mutex::new(State::default()),
        }
    }

    pub fn robot(&self) -> &SharedDevice {
        &self.robot
    }

    /// Create the publishing node if it does not exist yet.
    ///
    /// Returns `true` only when a node was created by this call.
    pub fn initialize_node(&self, name: &str, anonymous: bool) -> bool {
        let mut handle = self.lock_handle();
        if handle.is_some() {
            return false;
        }
        *handle = Some(NodeHandle::new(Arc::clone(&self.bus), name, anonymous));
        true
    }

    /// Release the publishing node.  Calling it again is a no-op.
    pub fn shutdown(&self) {
        if let Some(node) = self.lock_handle().take() {
            debug!(node = %node.name(), "discretization node released");
        }
    }

    /// Set the path to discretize.
    ///
    /// # Errors
    ///
    /// [`AgimusError::DimensionMismatch`] when the path configurations do
    /// not match the robot.
    pub fn set_path(&self, path: Path) -> Result<(), AgimusError> {
        let expected = self.read_robot(|r| r.config_size());
        if path.output_size() != expected {
            return Err(AgimusError::DimensionMismatch {
                what: "path configuration".into(),
                expected,
                got: path.output_size(),
            });
        }
        debug!(start = path.time_range().0, end = path.time_range().1, "path set");
        self.lock_state().path = Some(Arc::new(path));
        Ok(())
    }

    pub fn path(&self) -> Option<Arc<Path>> {
        self.lock_state().path.clone()
    }

    /// Select the joints published in the joint state message, in order.
    ///
    /// # Errors
    ///
    /// [`AgimusError::UnknownJoint`], or
    /// [`AgimusError::InvalidArgument`] for joints that are not a single
    /// rotation or translation.
    pub fn set_joint_names(&self, names: &[String]) -> Result<(), AgimusError> {
        let joints = self.read_robot(|robot| {
            names
                .iter()
                .map(|name| {
                    let index = robot.joint_by_name(name)?;
                    match robot.joint(index).kind {
                        JointKind::Revolute { .. }
                        | JointKind::RevoluteUnbounded { .. }
                        | JointKind::Prismatic { .. } => Ok(SelectedJoint {
                            name: name.clone(),
                            index,
                        }),
                        kind => Err(AgimusError::InvalidArgument(format!(
                            "joint \"{name}\" ({kind:?}) cannot be published in a joint state"
                        ))),
                    }
                })
                .collect::<Result<Vec<_>, _>>()
        })?;
        self.lock_state().joints = joints;
        Ok(())
    }

    /// Publish the world pose of `frame` on `topic` at every computation.
    pub fn add_frame_topic(&self, frame: &str, topic: &str) -> Result<(), AgimusError> {
        let index = self.read_robot(|r| r.frame_by_name(frame))?;
        self.lock_state().frame_topics.push(FrameTopic {
            frame: frame.to_string(),
            index,
            topic: topic.to_string(),
        });
        Ok(())
    }

    /// Forget the frame topics and restore the default position and
    /// velocity topics.
    pub fn reset_topics(&self) {
        let mut state = self.lock_state();
        state.frame_topics.clear();
        state.position_topic = DEFAULT_POSITION_TOPIC.to_string();
        state.velocity_topic = DEFAULT_VELOCITY_TOPIC.to_string();
    }

    pub fn set_position_topic(&self, topic: &str) {
        self.lock_state().position_topic = topic.to_string();
    }

    pub fn set_velocity_topic(&self, topic: &str) {
        self.lock_state().velocity_topic = topic.to_string();
    }

    /// Evaluate the path at `time` and publish the robot state.
    ///
    /// # Errors
    ///
    /// [`AgimusError::NotInitialized`] without a node,
    /// [`AgimusError::NoPath`] without a path.
    #[instrument(skip(self))]
    pub fn compute(&self, time: f64) -> Result<(), AgimusError> {
        let handle = self.lock_handle();
        let node = handle.as_ref().ok_or_else(|| {
            AgimusError::NotInitialized(
                "the discretization node is not running; call initializeRosNode first".into(),
            )
        })?;
        let state = self.lock_state();
        let path = state.path.as_ref().ok_or(AgimusError::NoPath)?;

        let q = path.eval(time);
        let v = path.derivative(time);

        let (joint_state, frame_poses) = {
            let mut robot = self.robot.write().unwrap_or_else(|e| e.into_inner());
            robot.set_current_configuration(&q)?;
            robot.compute_frames_forward_kinematics();

            let mut joint_state = JointState {
                header: Header::now(WORLD_FRAME),
                name: Vec::with_capacity(state.joints.len()),
                position: Vec::with_capacity(state.joints.len()),
                velocity: Vec::with_capacity(state.joints.len()),
            };
            for joint in &state.joints {
                let range = robot.joint_config_range(joint.index);
                let (position, velocity) = match robot.joint(joint.index).kind {
                    JointKind::RevoluteUnbounded { .. } => {
                        let (c, s) = (q[range.start], q[range.start + 1]);
                        let (dc, ds) = (v[range.start], v[range.start + 1]);
                        (s.atan2(c), c * ds - s * dc)
                    }
                    _ => (q[range.start], v[range.start]),
                };
                joint_state.name.push(joint.name.clone());
                joint_state.position.push(position);
                joint_state.velocity.push(velocity);
            }

            let frame_poses: Vec<(String, FramePose)> = state
                .frame_topics
                .iter()
                .map(|ft| {
                    let [x, y, z, qx, qy, qz, qw] = robot.frame_transform(ft.index).to_xyz_quat();
                    let pose = FramePose {
                        header: Header::now(WORLD_FRAME),
                        child_frame_id: ft.frame.clone(),
                        translation: [x, y, z],
                        rotation: [qx, qy, qz, qw],
                    };
                    (ft.topic.clone(), pose)
                })
                .collect();
            (joint_state, frame_poses)
        };

        node.advertise(&state.position_topic)
            .publish(EventPayload::Vector(q))?;
        node.advertise(&state.velocity_topic)
            .publish(EventPayload::Vector(v))?;
        if !joint_state.name.is_empty() {
            node.advertise(JOINT_STATE_TOPIC)
                .publish(EventPayload::JointState(joint_state))?;
        }
        for (topic, pose) in frame_poses {
            node.advertise(&topic).publish(EventPayload::FramePose(pose))?;
        }
        debug!(time, "state published");
        Ok(())
    }

    /// Discretize the whole path every `step` seconds, end time included.
    pub fn sample(&self, step: f64) -> Result<Vec<(f64, Vec<f64>)>, AgimusError> {
        let path = self.path().ok_or(AgimusError::NoPath)?;
        path.sample(step)
    }

    fn read_robot<T>(&self, f: impl FnOnce(&agimus_planning::Device) -> T) -> T {
        let robot = self.robot.read().unwrap_or_else(|e| e.into_inner());
        f(&robot)
    }

    fn lock_handle(&self) -> MutexGuard<'_, Option<NodeHandle>> {
        self.handle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
