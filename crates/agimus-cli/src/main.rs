//! `agimus` – host process of the agimus plugin.
//!
//! 1. Loads `~/.agimus/config.toml`, writing the defaults on first run.
//! 2. Builds the problem solver and its robot from the `[robot]` table.
//! 3. Starts the plugin in its naming context.
//! 4. Serves the rosbridge adapter (sensor data in, viewer and targets out)
//!    and the remote-object server until **Ctrl-C**.

mod config;

use colored::Colorize;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use agimus_middleware::{EventBus, RosBridge};
use agimus_planning::{ConstraintGraph, Device, ProblemSolver};
use agimus_runtime::BusSceneViewer;
use agimus_server::{RemoteObjectServer, ServerPlugin};
use agimus_types::AgimusError;

use config::Config;

fn main() -> ExitCode {
    let _tracing = agimus_runtime::init_tracing("agimus");

    print_banner();

    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            match config::save(&Config::default()) {
                Ok(()) => println!(
                    "  Default config written to {}",
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => warn!(error = %e, "could not write the default config"),
            }
            config::default_with_env()
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::default_with_env()
        }
    };

    let problem_solver = match build_problem_solver(&cfg) {
        Ok(ps) => ps.into_shared(),
        Err(e) => {
            error!(error = %e, "cannot load the robot");
            return ExitCode::FAILURE;
        }
    };

    let bus = Arc::new(EventBus::default());
    let mut plugin = ServerPlugin::new(problem_solver, Arc::clone(&bus));
    if cfg.viewer {
        plugin = plugin.with_viewer(Arc::new(BusSceneViewer::new(Arc::clone(&bus))));
    }
    plugin.start_server(&cfg.context_id, &cfg.context_kind);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start the async runtime");
            return ExitCode::FAILURE;
        }
    };

    let stop = Arc::new(Notify::new());
    let stop_handler = Arc::clone(&stop);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        stop_handler.notify_one();
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    let bridge_addr = SocketAddr::from(([0, 0, 0, 0], cfg.bridge_port));
    let server = RemoteObjectServer::new(Arc::new(plugin)).with_port(cfg.server_port);
    let bridge = RosBridge::new(Arc::clone(&bus));

    let outcome = runtime.block_on(async move {
        tokio::select! {
            r = server.run() => r,
            r = bridge.run_ws_server(bridge_addr) => r,
            _ = stop.notified() => {
                info!("shutdown requested");
                Ok(())
            }
        }
    });

    match outcome {
        Ok(()) => {
            println!("{}", "  ✓ Exiting agimus.".green());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "agimus stopped");
            ExitCode::FAILURE
        }
    }
}

/// Problem solver of the configured flavour, holding the configured robot.
///
/// Without a `[robot]` table the solver starts with an empty device; both
/// services then answer with errors until frames exist.
fn build_problem_solver(cfg: &Config) -> Result<ProblemSolver, AgimusError> {
    let device = match &cfg.robot {
        Some(desc) => Device::from_description(desc)?,
        None => {
            warn!("no [robot] table in the config; starting with an empty robot");
            Device::new("robot")
        }
    };
    info!(
        robot = device.name(),
        dofs = device.config_size(),
        kind = ?cfg.problem_solver,
        "problem solver ready"
    );

    let mut ps = ProblemSolver::new(cfg.problem_solver);
    ps.set_robot(device.into_shared());
    ps.create_problem()?;
    if ps.is_manipulation() {
        let mut graph = ConstraintGraph::new("graph");
        graph.initialize();
        ps.set_constraint_graph(graph)?;
    }
    Ok(ps)
}

fn print_banner() {
    println!();
    println!("{}", "  agimus".bold().cyan());
    println!("{}", "  point-cloud capture and trajectory discretization".dimmed());
    println!();
}
