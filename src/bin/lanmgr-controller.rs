//! Controller binary: accepts agent connections, emits the discovery beacon,
//! and prints a line-oriented event log to stdout in place of a full
//! operator console.

use anyhow::Context;
use clap::Parser;
use lanmgr::{config, Controller, ControllerConfig, ControllerEvent};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "lanmgr-controller", about = "LAN fleet-management controller")]
struct Cli {
    /// TCP port to listen for agent connections on.
    #[arg(long, default_value_t = config::DEFAULT_TCP_PORT)]
    port: u16,

    /// UDP port to broadcast the discovery beacon on.
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

    let config = ControllerConfig {
        tcp_port: cli.port,
        broadcast_port: cli.broadcast_port,
        ..ControllerConfig::default()
    };

    let controller = Controller::start(config)
        .await
        .context("failed to start controller")?;
    let mut events_rx = controller.subscribe();

    let events_task = tokio::spawn(async move {
        loop {
            match events_rx.recv().await {
                Ok(event) => log_event(event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event consumer lagged, some events were dropped");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    tokio::signal::ctrl_c().await.ok();
    info!("shutdown requested");
    controller.stop();
    events_task.abort();
    Ok(())
}

fn log_event(event: ControllerEvent) {
    match event {
        ControllerEvent::ClientConnected { id, addr } => info!(%id, %addr, "client connected"),
        ControllerEvent::ClientDisconnected { id } => info!(%id, "client disconnected"),
        ControllerEvent::ClientInfoUpdated { id, info } => {
            info!(%id, computer_name = %info.computer_name, "client info updated")
        }
        ControllerEvent::SysInfoReceived { id, .. } => info!(%id, "sysinfo received"),
        ControllerEvent::SoftwareListReceived { id, list } => {
            info!(%id, count = list.count, "software list received")
        }
        ControllerEvent::InstallResult { id, result } => {
            info!(%id, success = result.success, message = %result.message, "install result")
        }
        ControllerEvent::UninstallResult { id, result } => {
            info!(%id, success = result.success, message = %result.message, "uninstall result")
        }
        ControllerEvent::TransferProgress { id, percent } => {
            info!(%id, percent, "transfer progress")
        }
        ControllerEvent::Log { message } => info!(message),
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
