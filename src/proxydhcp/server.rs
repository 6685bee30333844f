//! ProxyDHCP server implementation.
//!
//! Listens for PXE boot requests and responds with boot server information.
//! Works alongside the existing DHCP server without providing IP addresses.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info};

use super::offer::{is_boot_request, offer};
use crate::domain::{classify, DhcpPacket};
use crate::net::bind_udp;
use crate::parser::{DhcpEncoder, DhcpParser};
use crate::shutdown;

/// DHCP ports
pub const DHCP_SERVER_PORT: u16 = 67;
pub const DHCP_CLIENT_PORT: u16 = 68;

/// Large enough for any DHCP message on an Ethernet link.
const MAX_DATAGRAM: usize = 1500;

/// Stateless per-datagram logic: parse, gate, classify, build the reply.
#[derive(Debug, Clone)]
pub struct PacketHandler {
    /// Address advertised as boot server.
    server_ip: Ipv4Addr,
    /// HTTP port for HTTP-boot URLs.
    http_port: u16,
}

impl PacketHandler {
    pub fn new(server_ip: Ipv4Addr, http_port: u16) -> Self {
        Self {
            server_ip,
            http_port,
        }
    }

    /// Handle one datagram, returning the encoded reply and where to send it.
    ///
    /// Anything that is not a well-formed PXE DISCOVER we can boot is logged
    /// and dropped.
    pub fn handle(&self, data: &[u8], peer: SocketAddr) -> Option<(Vec<u8>, SocketAddr)> {
        let request = match DhcpParser::new().parse(data) {
            Ok(packet) => packet,
            Err(e) => {
                debug!(%peer, error = %e, "ignoring malformed packet");
                return None;
            }
        };

        let client_mac = request.client_mac();

        if !request.is_request() {
            debug!(%client_mac, "ignoring BOOTREPLY");
            return None;
        }

        if let Err(e) = is_boot_request(&request) {
            info!(%client_mac, error = %e, "ignoring packet");
            return None;
        }

        let firmware = match classify(&request) {
            Ok(firmware) => firmware,
            Err(e) => {
                info!(%client_mac, error = %e, "invalid packet");
                return None;
            }
        };

        let reply = match offer(&request, self.server_ip, self.http_port, firmware) {
            Ok(reply) => reply,
            Err(e) => {
                error!(%client_mac, error = %e, "failed to construct ProxyDHCP offer");
                return None;
            }
        };

        let bytes = match DhcpEncoder::new().encode(&reply) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(%client_mac, error = %e, "failed to encode ProxyDHCP offer");
                return None;
            }
        };

        info!(
            %client_mac,
            xid = format_args!("0x{:08X}", request.xid),
            %firmware,
            server = reply.tftp_server_name().unwrap_or_default(),
            boot_filename = reply.boot_file_name().unwrap_or_default(),
            "offering boot response"
        );

        Some((bytes, reply_destination(&request, peer)))
    }
}

/// Where to send the reply to `request`, received from `peer`.
///
/// Relayed requests go back to the relay, clients without an address (or that
/// asked for it) get a broadcast, everyone else a unicast.
pub fn reply_destination(request: &DhcpPacket, peer: SocketAddr) -> SocketAddr {
    if !request.giaddr.is_unspecified() {
        return SocketAddr::V4(SocketAddrV4::new(request.giaddr, DHCP_SERVER_PORT));
    }

    let peer_unspecified = match peer {
        SocketAddr::V4(addr) => addr.ip().is_unspecified(),
        SocketAddr::V6(addr) => addr.ip().is_unspecified(),
    };

    if peer_unspecified || request.is_broadcast() {
        let port = match peer.port() {
            0 => DHCP_CLIENT_PORT,
            port => port,
        };
        return SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, port));
    }

    peer
}

/// ProxyDHCP server for PXE boot.
pub struct ProxyDhcpServer {
    socket: Arc<UdpSocket>,
    handler: PacketHandler,
    workers: Arc<Semaphore>,
}

impl ProxyDhcpServer {
    /// Bind the proxyDHCP socket.
    ///
    /// # Arguments
    /// * `bind_addr` - Listen address (usually 0.0.0.0:67)
    /// * `interface` - Optional interface to pin the socket to
    /// * `server_ip` - Our advertised IP address
    /// * `http_port` - Port of the HTTP server for HTTP-boot clients
    /// * `max_workers` - Bound on datagrams handled concurrently
    pub fn bind(
        bind_addr: SocketAddr,
        interface: Option<&str>,
        server_ip: Ipv4Addr,
        http_port: u16,
        max_workers: usize,
    ) -> Result<Self> {
        let socket = bind_udp(bind_addr, interface).context("Failed to create DHCP socket")?;

        Ok(Self {
            socket: Arc::new(socket),
            handler: PacketHandler::new(server_ip, http_port),
            workers: Arc::new(Semaphore::new(max_workers.max(1))),
        })
    }

    /// The bound address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Serve until `shutdown` turns true (or its sender goes away).
    ///
    /// Each datagram is handled by its own task; the worker semaphore bounds
    /// how many run at once. Receive errors are fatal.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            addr = %self.local_addr()?,
            server_ip = %self.handler.server_ip,
            "ProxyDHCP server listening"
        );

        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            tokio::select! {
                _ = shutdown::requested(&mut shutdown) => break,
                received = self.socket.recv_from(&mut buf) => {
                    let (len, peer) = received.context("Failed to read from DHCP socket")?;

                    let permit = self
                        .workers
                        .clone()
                        .acquire_owned()
                        .await
                        .context("DHCP worker pool closed")?;

                    let data = buf[..len].to_vec();
                    let socket = Arc::clone(&self.socket);
                    let handler = self.handler.clone();

                    tokio::spawn(async move {
                        let _permit = permit;
                        if let Some((reply, dest)) = handler.handle(&data, peer) {
                            if let Err(e) = socket.send_to(&reply, dest).await {
                                error!(%dest, error = %e, "failure sending response");
                            }
                        }
                    });
                }
            }
        }

        info!("ProxyDHCP server stopped");
        Ok(())
    }
}
