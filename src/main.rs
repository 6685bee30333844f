//! metalbootd - PXE bootstrap daemon
//!
//! Answers PXE clients with proxyDHCP offers and serves them iPXE images,
//! patched at startup with a script that chain-loads the provisioning API.

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::EnvFilter;

use metalboot::config::{Args, Config};
use metalboot::orchestrator::Orchestrator;
use metalboot::shutdown;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.tracing_filter()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = Config::from_args(args).context("invalid configuration")?;

    tracing::info!("Starting metalbootd PXE bootstrap");
    tracing::info!(
        api_host = %config.api_host,
        api_port = config.api_port,
        tftp_root = %config.tftp_root.display(),
        "configuration loaded"
    );

    // Handle SIGTERM and SIGINT for graceful shutdown
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    let (shutdown_tx, shutdown_rx) = shutdown::channel();

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, shutting down");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, shutting down");
            }
        }

        shutdown_tx.send_replace(true);
    });

    if let Err(e) = Orchestrator::new(config).run(shutdown_rx).await {
        tracing::error!("{e:#}");
        return Err(e);
    }

    tracing::info!("metalbootd stopped");
    Ok(())
}
