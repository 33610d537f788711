//! Problem solver state shared with the services.
//!
//! The services only need the part of a planner that reacts to world-model
//! changes: the robot, the current [`Problem`] and, for the manipulation
//! flavour, the [`ConstraintGraph`].  When new geometry is attached to the
//! robot, cached validity data must be dropped: the graph is invalidated and
//! the problem is rebuilt from the robot.  Both carry counters so callers can
//! observe it.

use std::sync::{Arc, RwLock};

use agimus_types::AgimusError;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::device::SharedDevice;

pub type SharedProblemSolver = Arc<RwLock<ProblemSolver>>;

/// Flavour of problem solver hosting the plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProblemSolverKind {
    Core,
    #[default]
    Manipulation,
}

/// A planning problem bound to a robot.
#[derive(Debug, Clone)]
pub struct Problem {
    robot: SharedDevice,
    generation: u64,
}

impl Problem {
    pub fn robot(&self) -> &SharedDevice {
        &self.robot
    }

    /// Number of problems created before this one by the same solver.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Manipulation constraint graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintGraph {
    name: String,
    initialized: bool,
    invalidations: u64,
}

impl ConstraintGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            initialized: false,
            invalidations: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn initialize(&mut self) {
        self.initialized = true;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Mark cached data as stale; the graph must be initialized again.
    pub fn invalidate(&mut self) {
        self.initialized = false;
        self.invalidations += 1;
    }

    pub fn invalidation_count(&self) -> u64 {
        self.invalidations
    }
}

#[derive(Debug, Default)]
pub struct ProblemSolver {
    kind: ProblemSolverKind,
    robot: Option<SharedDevice>,
    problem: Option<Problem>,
    constraint_graph: Option<ConstraintGraph>,
    problems_created: u64,
    resets: u64,
}

impl ProblemSolver {
    pub fn new(kind: ProblemSolverKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    pub fn kind(&self) -> ProblemSolverKind {
        self.kind
    }

    pub fn is_manipulation(&self) -> bool {
        self.kind == ProblemSolverKind::Manipulation
    }

    pub fn robot(&self) -> Option<SharedDevice> {
        self.robot.clone()
    }

    /// Set the robot.  Any existing problem refers to the previous robot and
    /// is dropped.
    pub fn set_robot(&mut self, robot: SharedDevice) {
        self.robot = Some(robot);
        self.problem = None;
    }

    pub fn problem(&self) -> Option<&Problem> {
        self.problem.as_ref()
    }

    /// Create a problem for the current robot if none exists.
    pub fn create_problem(&mut self) -> Result<&Problem, AgimusError> {
        if self.problem.is_none() {
            let problem = self.new_problem()?;
            self.problem = Some(problem);
        }
        self.problem.as_ref().ok_or(AgimusError::MissingRobot)
    }

    /// Replace the problem by a fresh one built from the robot.
    pub fn reset_problem(&mut self) -> Result<(), AgimusError> {
        let problem = self.new_problem()?;
        debug!(generation = problem.generation, "problem reset");
        self.problem = Some(problem);
        self.resets += 1;
        Ok(())
    }

    /// Number of calls to [`ProblemSolver::reset_problem`] that succeeded.
    pub fn problem_reset_count(&self) -> u64 {
        self.resets
    }

    pub fn constraint_graph(&self) -> Option<&ConstraintGraph> {
        self.constraint_graph.as_ref()
    }

    pub fn constraint_graph_mut(&mut self) -> Option<&mut ConstraintGraph> {
        self.constraint_graph.as_mut()
    }

    /// Install a constraint graph.  Only manipulation solvers have one.
    pub fn set_constraint_graph(&mut self, graph: ConstraintGraph) -> Result<(), AgimusError> {
        if !self.is_manipulation() {
            return Err(AgimusError::InvalidArgument(
                "constraint graphs require a manipulation ProblemSolver".into(),
            ));
        }
        self.constraint_graph = Some(graph);
        Ok(())
    }

    pub fn into_shared(self) -> SharedProblemSolver {
        Arc::new(RwLock::new(self))
    }

    fn new_problem(&mut self) -> Result<Problem, AgimusError> {
        let robot = self.robot.clone().ok_or(AgimusError::MissingRobot)?;
        let problem = Problem {
            robot,
            generation: self.problems_created,
        };
        self.problems_created += 1;
        Ok(problem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;

    fn robot() -> SharedDevice {
        Device::new("robot").into_shared()
    }

    #[test]
    fn default_flavour_is_manipulation() {
        assert!(ProblemSolver::default().is_manipulation());
        assert!(!ProblemSolver::new(ProblemSolverKind::Core).is_manipulation());
    }

    #[test]
    fn problem_requires_robot() {
        let mut ps = ProblemSolver::default();
        assert_eq!(ps.create_problem().unwrap_err(), AgimusError::MissingRobot);
        assert_eq!(ps.reset_problem().unwrap_err(), AgimusError::MissingRobot);
        assert_eq!(ps.problem_reset_count(), 0);
    }

    #[test]
    fn create_problem_is_idempotent() {
        let mut ps = ProblemSolver::default();
        ps.set_robot(robot());
        assert_eq!(ps.create_problem().unwrap().generation(), 0);
        assert_eq!(ps.create_problem().unwrap().generation(), 0);
    }

    #[test]
    fn reset_builds_a_new_problem_on_the_same_robot() {
        let mut ps = ProblemSolver::default();
        let r = robot();
        ps.set_robot(Arc::clone(&r));
        ps.create_problem().unwrap();
        ps.reset_problem().unwrap();

        let problem = ps.problem().unwrap();
        assert_eq!(problem.generation(), 1);
        assert!(Arc::ptr_eq(problem.robot(), &r));
        assert_eq!(ps.problem_reset_count(), 1);
    }

    #[test]
    fn set_robot_drops_stale_problem() {
        let mut ps = ProblemSolver::default();
        ps.set_robot(robot());
        ps.create_problem().unwrap();
        ps.set_robot(robot());
        assert!(ps.problem().is_none());
    }

    #[test]
    fn graph_invalidation_is_counted() {
        let mut ps = ProblemSolver::default();
        let mut graph = ConstraintGraph::new("manipulation");
        graph.initialize();
        ps.set_constraint_graph(graph).unwrap();

        let graph = ps.constraint_graph_mut().unwrap();
        graph.invalidate();
        assert!(!graph.is_initialized());
        assert_eq!(graph.invalidation_count(), 1);
    }

    #[test]
    fn core_solver_has_no_graph() {
        let mut ps = ProblemSolver::new(ProblemSolverKind::Core);
        assert!(ps.set_constraint_graph(ConstraintGraph::new("g")).is_err());
        assert!(ps.constraint_graph().is_none());
    }

    #[test]
    fn kind_deserializes_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            kind: ProblemSolverKind,
        }
        let w: Wrapper = toml::from_str(r#"kind = "core""#).unwrap();
        assert_eq!(w.kind, ProblemSolverKind::Core);
    }
}
