//! DHCP wire format module.
//!
//! This module is responsible for turning raw bytes into domain DHCP types
//! and back.

mod dhcp_encoder;
mod dhcp_parser;

pub use dhcp_encoder::DhcpEncoder;
pub use dhcp_parser::DhcpParser;
