//! Plugin registration.
//!
//! The host loads the plugin by name, starts it inside a naming context and
//! then asks it for servants by name.  The only named servant is `"server"`;
//! the services it creates are addressed by the id returned at creation.

use std::sync::Arc;

use agimus_middleware::EventBus;
use agimus_planning::SharedProblemSolver;
use agimus_runtime::SceneViewer;
use agimus_types::AgimusError;
use tracing::info;

use crate::server::Server;

/// Name under which the plugin registers.
pub const PLUGIN_NAME: &str = "agimus";

/// Name of the factory servant.
pub const SERVER_SERVANT: &str = "server";

pub struct ServerPlugin {
    problem_solver: SharedProblemSolver,
    bus: Arc<EventBus>,
    viewer: Option<Arc<dyn SceneViewer>>,
    server: Option<Arc<Server>>,
    registered_name: Option<String>,
}

impl ServerPlugin {
    pub fn new(problem_solver: SharedProblemSolver, bus: Arc<EventBus>) -> Self {
        Self {
            problem_solver,
            bus,
            viewer: None,
            server: None,
            registered_name: None,
        }
    }

    pub fn with_viewer(mut self, viewer: Arc<dyn SceneViewer>) -> Self {
        self.viewer = Some(viewer);
        self
    }

    pub fn name(&self) -> &'static str {
        PLUGIN_NAME
    }

    /// Create the server implementation and register it under
    /// `<context_id>/<context_kind>/agimus/server`.
    ///
    /// Starting an already started plugin replaces its server.
    pub fn start_server(&mut self, context_id: &str, context_kind: &str) {
        let server = Server::new(
            Arc::clone(&self.problem_solver),
            Arc::clone(&self.bus),
            self.viewer.clone(),
        );
        let name = format!("{context_id}/{context_kind}/{PLUGIN_NAME}/{SERVER_SERVANT}");
        info!(servant = %name, "agimus server registered");
        self.server = Some(Arc::new(server));
        self.registered_name = Some(name);
    }

    /// Full registration name, once started.
    pub fn registered_name(&self) -> Option<&str> {
        self.registered_name.as_deref()
    }

    /// Look up a named servant.
    ///
    /// # Errors
    ///
    /// [`AgimusError::InvalidArgument`] (`No servant <name>`) for any name
    /// other than `"server"`, [`AgimusError::NotInitialized`] before
    /// [`ServerPlugin::start_server`].
    pub fn servant(&self, name: &str) -> Result<Arc<Server>, AgimusError> {
        if name != SERVER_SERVANT {
            return Err(AgimusError::InvalidArgument(format!("No servant {name}")));
        }
        self.server
            .clone()
            .ok_or_else(|| AgimusError::NotInitialized("the agimus server is not started".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agimus_planning::ProblemSolver;

    fn plugin() -> ServerPlugin {
        ServerPlugin::new(
            ProblemSolver::default().into_shared(),
            Arc::new(EventBus::default()),
        )
    }

    #[test]
    fn name_is_agimus() {
        assert_eq!(plugin().name(), "agimus");
    }

    #[test]
    fn start_registers_server_in_context() {
        let mut p = plugin();
        assert!(p.registered_name().is_none());
        assert!(matches!(p.servant("server"), Err(AgimusError::NotInitialized(_))));

        p.start_server("hpp", "corbaserver");
        assert_eq!(p.registered_name(), Some("hpp/corbaserver/agimus/server"));
        assert!(p.servant("server").is_ok());
    }

    #[test]
    fn unknown_servant_is_rejected() {
        let mut p = plugin();
        p.start_server("hpp", "corbaserver");
        let err = p.servant("discretization").err().unwrap();
        assert!(err.to_string().ends_with("No servant discretization"));
    }
}
