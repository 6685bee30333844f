//! TFTP server module.
//!
//! Serves the patched boot images to PXE clients from a single port.

mod packet;
mod path;
mod server;

pub use packet::{ErrorCode, Packet, Request};
pub use path::{clean_path, resolve};
pub use server::{TftpServer, DEFAULT_SHUTDOWN_GRACE, DEFAULT_TIMEOUT};
