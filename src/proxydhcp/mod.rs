//! ProxyDHCP server module.
//!
//! Implements a proxyDHCP server that provides PXE boot information
//! without interfering with the main DHCP server's IP allocation.

mod offer;
mod server;

pub use offer::{boot_file, is_boot_request, offer, BootFile, DEFAULT_VENDOR_CLASS};
pub use server::{
    reply_destination, PacketHandler, ProxyDhcpServer, DHCP_CLIENT_PORT, DHCP_SERVER_PORT,
};
