//! Domain models for PXE boot negotiation.
//!
//! This module contains the core domain types that are independent
//! of any infrastructure concerns: the DHCP packet model, PXE client
//! architectures and the firmware classifier.

mod arch;
mod dhcp;
mod firmware;

pub use arch::ClientArch;
pub use dhcp::{
    option_codes, DhcpMessageType, DhcpOption, DhcpPacket, BOOTREPLY, BOOTREQUEST,
    FLAG_BROADCAST,
};
pub use firmware::{classify, firmware_for_arch, Firmware};
