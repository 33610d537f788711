//! `agimus-server` – plugin entry point and remote access.
//!
//! The host problem solver loads the plugin ([`ServerPlugin`]), starts it in
//! a naming context and exposes it to remote clients through the
//! [`RemoteObjectServer`].
//!
//! # Modules
//!
//! - [`plugin`] – registration and named-servant lookup.
//! - [`server`] – the `server` factory servant creating the services.
//! - [`protocol`] – JSON request/response protocol and per-connection
//!   servant registry.
//! - [`transport`] – WebSocket listener.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use agimus_middleware::EventBus;
//! use agimus_planning::ProblemSolver;
//! use agimus_server::{RemoteObjectServer, ServerPlugin};
//!
//! #[tokio::main]
//! async fn main() {
//!     let bus = Arc::new(EventBus::default());
//!     let mut plugin = ServerPlugin::new(ProblemSolver::default().into_shared(), bus);
//!     plugin.start_server("hpp", "corbaserver");
//!     RemoteObjectServer::new(Arc::new(plugin))
//!         .run()
//!         .await
//!         .expect("remote-object server failed");
//! }
//! ```

pub mod plugin;
pub mod protocol;
pub mod server;
pub mod transport;

pub use plugin::{PLUGIN_NAME, ServerPlugin};
pub use protocol::{Request, Response, Session};
pub use server::Server;
pub use transport::{DEFAULT_PORT, RemoteObjectServer};
