//! Boot pipeline lifecycle.
//!
//! Startup is strictly ordered: create the TFTP root, patch every boot image,
//! bind both sockets. Only then do the proxyDHCP and TFTP servers start, as
//! sibling tasks sharing one shutdown signal. The first component to fail
//! stops the others and its error is returned.

use std::future::Future;

use anyhow::{anyhow, Context, Result};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::config::Config;
use crate::ipxe::{BootScript, Compressor, PatchedImage, Patcher, Zbin};
use crate::proxydhcp::ProxyDhcpServer;
use crate::shutdown;
use crate::tftp::TftpServer;

pub struct Orchestrator {
    config: Config,
    compressor: Box<dyn Compressor>,
}

impl Orchestrator {
    pub fn new(config: Config) -> Self {
        let zbin = Zbin::new(&config.zbin);
        Self {
            config,
            compressor: Box::new(zbin),
        }
    }

    /// Replace the `zbin` compressor.
    pub fn with_compressor(mut self, compressor: impl Compressor + 'static) -> Self {
        self.compressor = Box::new(compressor);
        self
    }

    /// Run until `shutdown` turns true or a component fails.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let Self { config, compressor } = self;

        tokio::fs::create_dir_all(&config.tftp_root)
            .await
            .with_context(|| {
                format!("failed to create TFTP root {}", config.tftp_root.display())
            })?;

        let images = patch_images(&config, compressor).await?;
        info!(images = images.len(), "successfully patched iPXE binaries");

        let dhcp = ProxyDhcpServer::bind(
            config.dhcp_addr,
            config.interface.as_deref(),
            config.api_host,
            config.api_port,
            config.dhcp_workers,
        )
        .context("proxy DHCP")?;

        let tftp = TftpServer::bind(
            config.tftp_addr,
            config.interface.as_deref(),
            &config.tftp_root,
        )
        .context("TFTP")?
        .with_timeout(config.tftp_timeout)
        .with_shutdown_grace(config.tftp_shutdown_grace);

        let (stop_tx, stop_rx) = shutdown::channel();
        let mut components = JoinSet::new();
        components.spawn(run_component("proxy DHCP", dhcp.run(stop_rx.clone())));
        components.spawn(run_component("TFTP", tftp.run(stop_rx)));

        let mut stopping = false;
        let mut first_error: Option<anyhow::Error> = None;

        loop {
            tokio::select! {
                _ = shutdown::requested(&mut shutdown), if !stopping => {
                    info!("shutdown requested, stopping components");
                    stopping = true;
                    stop_tx.send_replace(true);
                }
                joined = components.join_next() => {
                    let Some(joined) = joined else { break };

                    let failure = match joined {
                        Ok(Ok(())) => None,
                        Ok(Err(e)) => Some(e),
                        Err(e) => Some(anyhow!(e).context("component task failed")),
                    };

                    if let Some(e) = failure {
                        first_error.get_or_insert(e);
                        stopping = true;
                        stop_tx.send_replace(true);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Render the boot script and patch every image, off the async runtime.
async fn patch_images(
    config: &Config,
    compressor: Box<dyn Compressor>,
) -> Result<Vec<PatchedImage>> {
    let script = BootScript::render(&config.ipxe_endpoint, config.ipxe_port)
        .context("failed to build boot script")?;

    info!(
        endpoint = %config.ipxe_endpoint,
        port = config.ipxe_port,
        ipxe_dir = %config.ipxe_dir.display(),
        "patching iPXE binaries"
    );

    let patcher = Patcher::new(&config.ipxe_dir, &config.tftp_root, compressor);
    tokio::task::spawn_blocking(move || patcher.patch_all(&script))
        .await
        .context("patch task failed")?
        .context("failed to patch iPXE binaries")
}

/// Log a component's lifecycle and tag its failure with its name.
async fn run_component(
    name: &'static str,
    component: impl Future<Output = Result<()>>,
) -> Result<()> {
    info!(component = name, "starting component");

    match component.await {
        Ok(()) => {
            info!(component = name, "component stopped");
            Ok(())
        }
        Err(e) => {
            error!(component = name, error = %format_args!("{e:#}"), "component failed");
            Err(e.context(format!("{name} failed")))
        }
    }
}
