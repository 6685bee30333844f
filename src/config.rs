//! Runtime configuration.
//!
//! Command-line flags, with environment overrides for the on-disk paths,
//! resolved once at startup into an immutable [`Config`].

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::error::ConfigError;
use crate::ipxe::DEFAULT_ZBIN;
use crate::net;
use crate::tftp::{DEFAULT_SHUTDOWN_GRACE, DEFAULT_TIMEOUT};

const DEFAULT_API_PORT: u16 = 50042;
const DEFAULT_DHCP_PORT: u16 = 67;
const DEFAULT_TFTP_PORT: u16 = 69;
const DEFAULT_IPXE_DIR: &str = "/var/lib/ipxe";
const DEFAULT_TFTP_ROOT: &str = "/var/lib/tftp";
const DEFAULT_DHCP_WORKERS: usize = 64;

const ENV_IPXE_DIR: &str = "METALBOOT_IPXE_DIR";
const ENV_TFTP_ROOT: &str = "METALBOOT_TFTP_ROOT";
const ENV_ZBIN: &str = "METALBOOT_ZBIN";

#[derive(Parser, Debug, Clone)]
#[command(name = "metalbootd")]
#[command(about = "PXE bootstrap daemon - proxyDHCP, iPXE image patching and TFTP")]
pub struct Args {
    /// IPv4 address advertised to booting clients (default: the host's only routable address)
    #[arg(long)]
    pub api_host: Option<Ipv4Addr>,

    /// HTTP port used in HTTP-boot URLs
    #[arg(long, default_value_t = DEFAULT_API_PORT)]
    pub api_port: u16,

    /// Host the boot script chain-loads from (default: --api-host)
    #[arg(long)]
    pub ipxe_endpoint: Option<String>,

    /// Port the boot script chain-loads from (default: --api-port)
    #[arg(long)]
    pub ipxe_port: Option<u16>,

    /// ProxyDHCP listen port
    #[arg(long, default_value_t = DEFAULT_DHCP_PORT)]
    pub dhcp_port: u16,

    /// TFTP listen port, used for the whole transfer
    #[arg(long, default_value_t = DEFAULT_TFTP_PORT)]
    pub tftp_port: u16,

    /// Network interface to bind to (e.g., eth0)
    #[arg(short, long)]
    pub interface: Option<String>,

    /// Directory holding the unpatched iPXE images [env: METALBOOT_IPXE_DIR]
    #[arg(long)]
    pub ipxe_dir: Option<PathBuf>,

    /// Directory served over TFTP [env: METALBOOT_TFTP_ROOT]
    #[arg(long)]
    pub tftp_root: Option<PathBuf>,

    /// zbin compressor for the BIOS image [env: METALBOOT_ZBIN]
    #[arg(long)]
    pub zbin: Option<PathBuf>,

    /// Maximum DHCP packets handled concurrently
    #[arg(long, default_value_t = DEFAULT_DHCP_WORKERS)]
    pub dhcp_workers: usize,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,
}

impl Args {
    /// Default log filter when `RUST_LOG` is not set.
    pub fn tracing_filter(&self) -> &'static str {
        if self.debug {
            "debug"
        } else {
            "info"
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Address put into offers as boot server.
    pub api_host: Ipv4Addr,
    pub api_port: u16,
    /// Chain-load target embedded in the boot script.
    pub ipxe_endpoint: String,
    pub ipxe_port: u16,
    pub dhcp_addr: SocketAddr,
    pub tftp_addr: SocketAddr,
    pub interface: Option<String>,
    pub ipxe_dir: PathBuf,
    pub tftp_root: PathBuf,
    pub zbin: PathBuf,
    pub dhcp_workers: usize,
    pub tftp_timeout: Duration,
    pub tftp_shutdown_grace: Duration,
}

impl Config {
    /// Resolve flags against the process environment and host interfaces.
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        Self::resolve(args, |key| std::env::var(key).ok(), net::routable_ipv4s)
    }

    /// Resolve with explicit environment lookup and address discovery.
    ///
    /// Flags win over the environment, which wins over the defaults.
    pub fn resolve(
        args: Args,
        env: impl Fn(&str) -> Option<String>,
        discover: impl FnOnce() -> Vec<Ipv4Addr>,
    ) -> Result<Self, ConfigError> {
        if args.dhcp_workers == 0 {
            return Err(ConfigError::NoWorkers);
        }

        let api_host = match args.api_host {
            Some(host) => host,
            None => single_address(discover())?,
        };

        let path = |flag: Option<PathBuf>, key: &str, default: &str| {
            flag.or_else(|| env(key).filter(|v| !v.is_empty()).map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from(default))
        };

        Ok(Self {
            api_host,
            api_port: args.api_port,
            ipxe_endpoint: args
                .ipxe_endpoint
                .unwrap_or_else(|| api_host.to_string()),
            ipxe_port: args.ipxe_port.unwrap_or(args.api_port),
            dhcp_addr: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, args.dhcp_port).into(),
            tftp_addr: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, args.tftp_port).into(),
            interface: args.interface,
            ipxe_dir: path(args.ipxe_dir, ENV_IPXE_DIR, DEFAULT_IPXE_DIR),
            tftp_root: path(args.tftp_root, ENV_TFTP_ROOT, DEFAULT_TFTP_ROOT),
            zbin: path(args.zbin, ENV_ZBIN, DEFAULT_ZBIN),
            dhcp_workers: args.dhcp_workers,
            tftp_timeout: DEFAULT_TIMEOUT,
            tftp_shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        })
    }
}

fn single_address(addrs: Vec<Ipv4Addr>) -> Result<Ipv4Addr, ConfigError> {
    match addrs.len() {
        0 => Err(ConfigError::NoRoutableAddress),
        1 => Ok(addrs[0]),
        _ => Err(ConfigError::AmbiguousAddress(addrs)),
    }
}
