//! The `server` servant: factory of the plugin services.

use std::sync::Arc;

use agimus_middleware::EventBus;
use agimus_planning::SharedProblemSolver;
use agimus_runtime::{Discretization, PointCloud, SceneViewer};
use agimus_types::AgimusError;
use tracing::debug;

/// Creates the services, bound to the problem solver of the host.
pub struct Server {
    problem_solver: SharedProblemSolver,
    bus: Arc<EventBus>,
    viewer: Option<Arc<dyn SceneViewer>>,
}

impl Server {
    pub fn new(
        problem_solver: SharedProblemSolver,
        bus: Arc<EventBus>,
        viewer: Option<Arc<dyn SceneViewer>>,
    ) -> Self {
        Self {
            problem_solver,
            bus,
            viewer,
        }
    }

    pub fn problem_solver(&self) -> &SharedProblemSolver {
        &self.problem_solver
    }

    /// A discretization service bound to the current robot.
    ///
    /// # Errors
    ///
    /// [`AgimusError::MissingRobot`] when the problem solver has no robot.
    pub fn get_discretization(&self) -> Result<Discretization, AgimusError> {
        let robot = self
            .problem_solver
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .robot()
            .ok_or(AgimusError::MissingRobot)?;
        debug!("discretization servant created");
        Ok(Discretization::new(robot, Arc::clone(&self.bus)))
    }

    /// A point-cloud capture service.
    ///
    /// # Errors
    ///
    /// [`AgimusError::InvalidArgument`] unless the problem solver is the
    /// manipulation flavour.
    pub fn get_point_cloud(&self) -> Result<PointCloud, AgimusError> {
        let is_manipulation = self
            .problem_solver
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_manipulation();
        if !is_manipulation {
            return Err(AgimusError::InvalidArgument(
                "ProblemSolver instance is not of type manipulation ProblemSolver.".into(),
            ));
        }
        let service = PointCloud::new(Arc::clone(&self.problem_solver), Arc::clone(&self.bus));
        debug!("point cloud servant created");
        Ok(match &self.viewer {
            Some(viewer) => service.with_viewer(Arc::clone(viewer)),
            None => service,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agimus_planning::{Device, ProblemSolver, ProblemSolverKind};

    fn server(kind: ProblemSolverKind, with_robot: bool) -> Server {
        let mut ps = ProblemSolver::new(kind);
        if with_robot {
            ps.set_robot(Device::new("robot").into_shared());
        }
        Server::new(ps.into_shared(), Arc::new(EventBus::default()), None)
    }

    #[test]
    fn discretization_needs_a_robot() {
        assert!(matches!(
            server(ProblemSolverKind::Core, false).get_discretization(),
            Err(AgimusError::MissingRobot)
        ));
        assert!(server(ProblemSolverKind::Core, true).get_discretization().is_ok());
    }

    #[test]
    fn point_cloud_needs_manipulation_solver() {
        let err = server(ProblemSolverKind::Core, true)
            .get_point_cloud()
            .err()
            .unwrap();
        assert!(err
            .to_string()
            .contains("ProblemSolver instance is not of type manipulation ProblemSolver."));
        assert!(server(ProblemSolverKind::Manipulation, false).get_point_cloud().is_ok());
    }

    #[test]
    fn services_share_the_solver_robot() {
        let s = server(ProblemSolverKind::Manipulation, true);
        let d = s.get_discretization().unwrap();
        let robot = s.problem_solver().read().unwrap().robot().unwrap();
        assert!(Arc::ptr_eq(d.robot(), &robot));
    }
}
