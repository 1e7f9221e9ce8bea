use std::sync::Arc;

use clap::Parser;
use instance_agent::{
    Coordinator, InstanceStore, RestartMonitor,
    api::{ApiState, spawn_api_server},
    config::read_config_file,
    control_plane::ControlPlaneClient,
    probe::mysql::MySqlProbe,
};
use tracing::{info, trace};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init() {
    dotenv::dotenv().ok();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("instance_agent=debug"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;

    let api = ControlPlaneClient::new(config.api_key.clone(), config.links.clone())?;
    let store = Arc::new(InstanceStore::new(&config.config_dir, api.clone()));
    let probe = Arc::new(MySqlProbe::new());

    let monitor = RestartMonitor::new(probe.clone());
    let monitor_task = monitor.start()?;

    let coordinator = Arc::new(Coordinator::new(store, monitor.clone(), probe, api));
    let _resync = coordinator.start().await?;

    let addr = spawn_api_server(config.listen, ApiState::new(coordinator.clone())).await?;
    info!("agent ready, commands on http://{addr}/api/v1/commands");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    coordinator.stop()?;
    monitor.stop();
    monitor_task.await?;

    Ok(())
}
