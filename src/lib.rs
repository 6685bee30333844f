//! metalboot - PXE bootstrap for bare-metal nodes.
//!
//! A proxyDHCP server classifies PXE clients and points them at the right
//! iPXE build, which is served over TFTP after the boot script that
//! chain-loads the provisioning API has been patched into it.

pub mod config;
pub mod domain;
pub mod error;
pub mod ipxe;
pub mod net;
pub mod orchestrator;
pub mod parser;
pub mod proxydhcp;
pub mod shutdown;
pub mod tftp;
