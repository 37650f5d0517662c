//! Agent binary: connects to (or discovers) a controller and services its
//! inventory/install/uninstall/transfer requests until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use lanmgr::{config, Agent, AgentConfig, AgentEvent, InventoryProvider, PackageExecutor};
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "lanmgr-agentd", about = "LAN fleet-management agent")]
struct Cli {
    /// Controller host to connect to. If omitted, the agent listens for the
    /// UDP discovery beacon instead.
    #[arg(long)]
    server: Option<String>,

    /// Controller TCP port (only used together with --server).
    #[arg(long, default_value_t = config::DEFAULT_TCP_PORT)]
    port: u16,

    /// UDP port to listen on for the discovery beacon when --server is absent.
    #[arg(long, default_value_t = config::DEFAULT_BROADCAST_PORT)]
    broadcast_port: u16,

    /// Overrides the RUST_LOG filter.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    let agent_config = match &cli.server {
        Some(host) => AgentConfig::explicit(host.clone(), cli.port),
        None => AgentConfig::discover(cli.broadcast_port),
    };

    let inventory: Arc<dyn InventoryProvider> = Arc::new(lanmgr::SysinfoInventory);
    let executor: Arc<dyn PackageExecutor> = Arc::new(lanmgr::ProcessExecutor);
    let temp_dir = std::env::temp_dir();

    let (agent, mut events_rx) = Agent::new(agent_config, inventory, executor, temp_dir);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let events_task = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            log_event(event);
        }
    });

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    agent.run(shutdown_rx).await.context("agent runtime failed")?;
    events_task.abort();
    Ok(())
}

fn log_event(event: AgentEvent) {
    match event {
        AgentEvent::Connected { addr } => info!(%addr, "connected"),
        AgentEvent::Disconnected => info!("disconnected"),
        AgentEvent::TransferProgress { percent } => info!(percent, "transfer progress"),
        AgentEvent::Log { message } => info!(message),
        AgentEvent::Error { message } => tracing::warn!(message),
    }
}

fn init_tracing(log_level: Option<&str>) {
    let filter = log_level
        .map(str::to_string)
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();
}
