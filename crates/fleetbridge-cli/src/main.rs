//! `fleetbridge` – bridges a fleet of Kachaka robots to a control plane.
//!
//! 1. Loads `fleetbridge.toml` (see [`config`]) and installs tracing.
//! 2. Fits one frame transformer per level; a bad survey is fatal.
//! 3. Builds a robot client per configured robot (or a simulated robot with
//!    `--sim`) and registers it with the adapter core.
//! 4. Runs the adapter and the control-plane websocket until Ctrl-C.

mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use fleetbridge_frames::FrameRegistry;
use fleetbridge_hal::{KachakaClient, RobotClient, SimRobot};
use fleetbridge_middleware::{ControlPlaneLink, EventBus};
use fleetbridge_runtime::FleetAdapterCore;
use fleetbridge_runtime::telemetry::init_tracing;
use fleetbridge_types::FleetError;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::Config;

#[derive(Debug, Parser)]
#[command(name = "fleetbridge", version, about = "Kachaka fleet adapter")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "fleetbridge.toml")]
    config: PathBuf,

    /// Drive simulated robots instead of the fleet-manager API.
    #[arg(long)]
    sim: bool,

    /// Control-plane websocket URI; overrides the config file.
    #[arg(long)]
    server_uri: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut cfg = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("fleetbridge: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(uri) = cli.server_uri {
        cfg.control_plane.server_uri = uri;
    }

    // Before the runtime exists: the OTLP exporter is synchronous.
    let _guard = init_tracing("fleetbridge", &cfg.telemetry_settings());
    info!(config = %cli.config.display(), sim = cli.sim, "starting fleetbridge");

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to build tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cfg, cli.sim)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fleetbridge stopped with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: Config, sim: bool) -> Result<(), FleetError> {
    let registry = FrameRegistry::from_levels(
        cfg.reference_coordinates
            .iter()
            .map(|(level, coords)| (level.clone(), coords.correspondences())),
    )?;

    let settings = cfg.adapter_settings();
    let bus = Arc::new(EventBus::default());
    let mut core = FleetAdapterCore::new(Arc::clone(&bus), settings);

    for robot in &cfg.robots {
        let transformer = registry.lookup(&robot.level)?;
        let client: Arc<dyn RobotClient> = if sim {
            Arc::new(SimRobot::new(robot.name.clone()).with_map(robot.level.clone()))
        } else {
            Arc::new(KachakaClient::new(
                robot.name.clone(),
                cfg.fleet_manager.prefix.clone(),
                cfg.fleet_manager.credentials(),
                settings.poll_timeout.max(settings.dispatch.timeout),
            )?)
        };
        if !client.check_connection().await {
            warn!(robot = %robot.name, "robot is not reachable yet; it will be polled anyway");
        }
        core.add_robot(robot.name.clone(), client, transformer)?;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ctrlc_tx = shutdown_tx.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = ctrlc_tx.send(true);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler");
    }

    // Subscribes to the bus before the link so no early command is lost.
    core.start()?;
    let link = ControlPlaneLink::new(
        cfg.control_plane.server_uri.clone(),
        cfg.control_plane.fleet_name.clone(),
        Arc::clone(&bus),
    );
    let link_task = tokio::spawn(link.run(shutdown_rx.clone()));
    info!(
        robots = cfg.robots.len(),
        server_uri = %cfg.control_plane.server_uri,
        "fleetbridge running; press Ctrl-C to stop"
    );

    let mut shutdown = shutdown_rx;
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }

    info!("shutting down");
    core.shutdown().await;
    if let Err(e) = link_task.await {
        error!(error = %e, "control-plane link ended abnormally");
    }
    drop(shutdown_tx);
    Ok(())
}
