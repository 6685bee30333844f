//! Network helpers shared by the UDP servers.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use anyhow::{Context, Result};
use pnet::datalink;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

/// Create a non-blocking UDP socket bound to `addr`, with address reuse and
/// broadcast enabled, optionally pinned to one network interface.
pub fn bind_udp(addr: SocketAddr, interface: Option<&str>) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .context("Failed to create socket")?;

    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;

    if let Some(name) = interface {
        bind_to_device(&socket, name)
            .with_context(|| format!("Failed to bind socket to interface {name}"))?;
    }

    socket
        .bind(&addr.into())
        .with_context(|| format!("Failed to bind to {addr}"))?;
    socket.set_nonblocking(true)?;

    UdpSocket::from_std(socket.into()).context("Failed to register socket with runtime")
}

#[cfg(target_os = "linux")]
fn bind_to_device(socket: &Socket, name: &str) -> std::io::Result<()> {
    use std::os::fd::AsRawFd;

    let name = name.as_bytes();
    // SAFETY: the pointer and length describe `name`, which outlives the call.
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_BINDTODEVICE,
            name.as_ptr().cast(),
            name.len() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn bind_to_device(_socket: &Socket, _name: &str) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "binding to an interface is only supported on Linux",
    ))
}

/// List the routable IPv4 addresses of this host.
pub fn routable_ipv4s() -> Vec<Ipv4Addr> {
    datalink::interfaces()
        .into_iter()
        .flat_map(|iface| iface.ips)
        .filter_map(|network| match network.ip() {
            IpAddr::V4(ip) if is_routable_ipv4(ip) => Some(ip),
            _ => None,
        })
        .collect()
}

/// Whether an IPv4 address can be advertised to booting clients.
pub fn is_routable_ipv4(ip: Ipv4Addr) -> bool {
    !(ip.is_loopback()
        || ip.is_link_local()
        || ip.is_multicast()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.octets()[0] >= 240)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routable_addresses() {
        assert!(is_routable_ipv4(Ipv4Addr::new(192, 168, 1, 10)));
        assert!(is_routable_ipv4(Ipv4Addr::new(10, 0, 0, 1)));
        assert!(is_routable_ipv4(Ipv4Addr::new(8, 8, 8, 8)));
    }

    #[test]
    fn test_non_routable_addresses() {
        assert!(!is_routable_ipv4(Ipv4Addr::LOCALHOST));
        assert!(!is_routable_ipv4(Ipv4Addr::UNSPECIFIED));
        assert!(!is_routable_ipv4(Ipv4Addr::BROADCAST));
        assert!(!is_routable_ipv4(Ipv4Addr::new(169, 254, 1, 1)));
        assert!(!is_routable_ipv4(Ipv4Addr::new(224, 0, 0, 251)));
        assert!(!is_routable_ipv4(Ipv4Addr::new(240, 0, 0, 1)));
    }

    #[tokio::test]
    async fn test_bind_udp_ephemeral() {
        let socket = bind_udp("127.0.0.1:0".parse().unwrap(), None).unwrap();
        let addr = socket.local_addr().unwrap();
        assert_eq!(addr.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_ne!(addr.port(), 0);
    }
}
