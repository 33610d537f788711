//! Point-cloud capture service.
//!
//! [`PointCloud`] waits for one `PointCloud2` message on a topic, turns it
//! into an occupancy tree and rigidly attaches the tree to a frame of the
//! robot, so that the planner accounts for the observed obstacles.
//!
//! # Capture sequence
//!
//! 1. The wait flag is cleared, the topic is subscribed with a queue of one
//!    message and the flag is raised.
//! 2. The subscription is spun every 10 ms until a message arrives or the
//!    timeout elapses.  The callback ignores messages while the flag is
//!    down; the first accepted message lowers it.
//! 3. The points (expressed in the sensor frame) become an [`OcTree`] placed
//!    at `oMs`, the sensor pose in the octree frame, for the given robot
//!    configuration.
//!
//! A timeout is not an error: [`PointCloud::get_point_cloud`] returns
//! `Ok(false)` and the robot is left untouched.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use agimus_middleware::EventBus;
use agimus_perception::{OcTree, Transform3D, to_point_matrix};
use agimus_planning::{Geometry, GeometryObject, SharedProblemSolver};
use agimus_types::{AgimusError, PointCloud2};
use ndarray::Array2;
use tracing::{debug, info, instrument, warn};

use crate::node::NodeHandle;
use crate::viewer::{SceneViewer, WHITE};

/// Delay between two spins of the subscription.
pub const POLL_PERIOD: Duration = Duration::from_millis(10);

pub struct PointCloud {
    problem_solver: SharedProblemSolver,
    bus: Arc<EventBus>,
    viewer: Option<Arc<dyn SceneViewer>>,
    waiting_for_data: AtomicBool,
    points: Mutex<Option<Array2<f64>>>,
    /// Held for the whole wait of a capture; teardown takes it too.
    handle: Mutex<Option<NodeHandle>>,
}

impl PointCloud {
    pub fn new(problem_solver: SharedProblemSolver, bus: Arc<EventBus>) -> Self {
        Self {
            problem_solver,
            bus,
            viewer: None,
            waiting_for_data: AtomicBool::new(false),
            points: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    /// Display attached octrees in `viewer`.
    pub fn with_viewer(mut self, viewer: Arc<dyn SceneViewer>) -> Self {
        self.viewer = Some(viewer);
        self
    }

    /// Create the acquisition node if it does not exist yet.
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

    /// Release the acquisition node.  Calling it again is a no-op.
    pub fn shutdown(&self) {
        if let Some(node) = self.lock_handle().take() {
            debug!(node = %node.name(), "acquisition node released");
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.lock_handle().is_some()
    }

    /// Wait for a point cloud on `topic` and attach it to the robot.
    ///
    /// `configuration` is the robot configuration at acquisition time; it
    /// becomes the robot's current configuration.  `timeout` is in seconds,
    /// negative values behave like zero.
    ///
    /// Returns `Ok(false)` when no message arrived in time.
    ///
    /// # Errors
    ///
    /// * [`AgimusError::NotInitialized`] – [`PointCloud::initialize_node`]
    ///   was not called.
    /// * [`AgimusError::InvalidArgument`] – non-positive resolution or
    ///   non-finite timeout.
    /// * [`AgimusError::MalformedMessage`] – the received message does not
    ///   describe XYZ points.
    /// * The errors of [`PointCloud::attach_octree_to_robot`].
    #[instrument(skip(self, configuration), fields(config_size = configuration.len()))]
    pub fn get_point_cloud(
        &self,
        octree_frame: &str,
        topic: &str,
        sensor_frame: &str,
        resolution: f64,
        configuration: &[f64],
        timeout: f64,
    ) -> Result<bool, AgimusError> {
        if !(resolution.is_finite() && resolution > 0.0) {
            return Err(AgimusError::InvalidArgument(format!(
                "resolution must be strictly positive, got {resolution}"
            )));
        }
        if !timeout.is_finite() {
            return Err(AgimusError::InvalidArgument(format!(
                "timeout must be finite, got {timeout}"
            )));
        }
        let timeout = Duration::from_secs_f64(timeout.max(0.0));

        let points = {
            let handle = self.lock_handle();
            let node = handle.as_ref().ok_or_else(|| {
                AgimusError::NotInitialized(
                    "the acquisition node is not running; call initializeRosNode first".into(),
                )
            })?;

            self.waiting_for_data.store(false, Ordering::SeqCst);
            *self.lock_points() = None;
            let mut subscriber = node.subscribe(topic, 1);
            self.waiting_for_data.store(true, Ordering::SeqCst);

            let start = Instant::now();
            while self.waiting_for_data.load(Ordering::SeqCst) {
                if start.elapsed() >= timeout {
                    self.waiting_for_data.store(false, Ordering::SeqCst);
                    warn!(topic, ?timeout, "no point cloud received before timeout");
                    return Ok(false);
                }
                let spun = subscriber.spin_once(|msg| self.point_cloud_callback(msg));
                if let Err(e) = spun {
                    self.waiting_for_data.store(false, Ordering::SeqCst);
                    return Err(e);
                }
                thread::sleep(POLL_PERIOD);
            }
            self.lock_points().take()
        };

        // The callback runs on this thread: a lowered flag means a filled
        // buffer.
        let Some(points) = points else {
            return Ok(false);
        };
        let octree = OcTree::from_points(&points, resolution)?;
        info!(
            points = points.nrows(),
            voxels = octree.len(),
            resolution,
            "point cloud captured"
        );
        self.attach_octree_to_robot(Arc::new(octree), octree_frame, sensor_frame, configuration)?;
        Ok(true)
    }

    fn point_cloud_callback(&self, msg: &PointCloud2) -> Result<(), AgimusError> {
        if !self.waiting_for_data.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.waiting_for_data.store(false, Ordering::SeqCst);
        let points = to_point_matrix(msg)?;
        debug!(
            frame_id = %msg.header.frame_id,
            height = msg.height,
            width = msg.width,
            "point cloud message accepted"
        );
        *self.lock_points() = Some(points);
        Ok(())
    }

    /// Attach `octree`, expressed in `sensor_frame`, to the joint carrying
    /// `octree_frame`.
    ///
    /// The object is named `<octree_frame>/octree` and replaces any previous
    /// capture with that name.  The constraint graph, if any, is invalidated
    /// and the problem, if any, is rebuilt.
    ///
    /// # Errors
    ///
    /// [`AgimusError::MissingRobot`], [`AgimusError::UnknownFrame`],
    /// [`AgimusError::DimensionMismatch`] for a configuration of the wrong
    /// size.
    #[instrument(skip(self, octree, configuration))]
    pub fn attach_octree_to_robot(
        &self,
        octree: Arc<OcTree>,
        octree_frame: &str,
        sensor_frame: &str,
        configuration: &[f64],
    ) -> Result<(), AgimusError> {
        let mut ps = self
            .problem_solver
            .write()
            .unwrap_or_else(|e| e.into_inner());
        let robot = ps.robot().ok_or(AgimusError::MissingRobot)?;

        let o_m_s = {
            let mut device = robot.write().unwrap_or_else(|e| e.into_inner());
            let octree_idx = device.frame_by_name(octree_frame)?;
            let sensor_idx = device.frame_by_name(sensor_frame)?;
            device.set_current_configuration(configuration)?;
            device.compute_frames_forward_kinematics();

            let w_m_o = device.frame_transform(octree_idx);
            let w_m_s = device.frame_transform(sensor_idx);
            let o_m_s = w_m_o.inverse().compose(w_m_s);

            let frame = device.frame(octree_idx).clone();
            let name = format!("{octree_frame}/octree");
            device.geometry_model_mut().add_geometry_object(GeometryObject {
                name: name.clone(),
                parent_joint: frame.parent_joint,
                parent_frame: Some(octree_idx),
                geometry: Geometry::OcTree(Arc::clone(&octree)),
                placement: frame.placement.compose(o_m_s),
            });
            info!(object = %name, voxels = octree.len(), "octree attached to robot");
            o_m_s
        };

        if let Some(graph) = ps.constraint_graph_mut() {
            graph.invalidate();
        }
        if ps.problem().is_some() {
            ps.reset_problem()?;
        }
        drop(ps);

        if let Some(viewer) = &self.viewer {
            self.display_octree(viewer.as_ref(), &octree, octree_frame, o_m_s)?;
        }
        Ok(())
    }

    /// Show `octree` in `viewer`: a group `robot/<octree_frame>/octree` placed
    /// at `o_m_s`, holding one white cube per occupied leaf.
    pub fn display_octree(
        &self,
        viewer: &dyn SceneViewer,
        octree: &OcTree,
        octree_frame: &str,
        o_m_s: Transform3D,
    ) -> Result<(), AgimusError> {
        let group = format!("robot/{octree_frame}/octree");
        viewer.create_group(&group)?;
        viewer.apply_configuration(&group, to_pose(o_m_s.to_xyz_quat()))?;

        let boxes = octree.to_boxes();
        for (i, b) in boxes.iter().enumerate() {
            let name = format!("{group}/box_{i}");
            let size = b[3] as f32;
            viewer.add_box(&name, [size; 3], WHITE)?;
            viewer.add_to_group(&name, &group)?;
            viewer.apply_configuration(&name, to_pose([b[0], b[1], b[2], 0.0, 0.0, 0.0, 1.0]))?;
        }
        debug!(group = %group, boxes = boxes.len(), "octree displayed");
        Ok(())
    }

    fn lock_handle(&self) -> MutexGuard<'_, Option<NodeHandle>> {
        self.handle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_points(&self) -> MutexGuard<'_, Option<Array2<f64>>> {
        self.points.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn to_pose(v: [f64; 7]) -> [f32; 7] {
    v.map(|x| x as f32)
}
