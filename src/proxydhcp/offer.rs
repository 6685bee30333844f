//! ProxyDHCP offer construction.
//!
//! Decides whether a packet is a PXE boot request at all, and builds the
//! proxy offer that points the client at its boot loader.

use std::net::Ipv4Addr;

use crate::domain::{
    option_codes, DhcpMessageType, DhcpOption, DhcpPacket, Firmware, BOOTREPLY,
};
use crate::error::{ClassifyError, OfferError};

/// Vendor class sent back when the client did not send one.
pub const DEFAULT_VENDOR_CLASS: &[u8] = b"PXEClient";

/// How a firmware kind fetches its boot loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootFile {
    /// Plain PXE: bare filename fetched over TFTP from the server name option.
    Tftp(&'static str),
    /// iPXE ROM: `tftp://<server>/<file>` URL.
    TftpUrl(&'static str),
    /// UEFI HTTP boot: `http://<server>:<port>/tftp/<file>` URL.
    Http(&'static str),
}

impl BootFile {
    /// Render the boot filename option value.
    pub fn filename(&self, server_ip: Ipv4Addr, http_port: u16) -> String {
        match self {
            Self::Tftp(file) => file.to_string(),
            Self::TftpUrl(file) => format!("tftp://{server_ip}/{file}"),
            Self::Http(file) => format!("http://{server_ip}:{http_port}/tftp/{file}"),
        }
    }

    /// Whether the TFTP server name option accompanies the filename.
    pub fn sets_tftp_server(&self) -> bool {
        matches!(self, Self::Tftp(_))
    }
}

/// Boot loader per firmware. `Unsupported` has no entry.
const BOOT_FILES: &[(Firmware, BootFile)] = &[
    (Firmware::X86Pc, BootFile::Tftp("undionly.kpxe")),
    (Firmware::X86Ipxe, BootFile::TftpUrl("undionly.kpxe")),
    (Firmware::X86Efi, BootFile::Tftp("snp.efi")),
    (Firmware::ArmEfi, BootFile::Tftp("snp-arm64.efi")),
    (Firmware::X86Http, BootFile::Http("snp.efi")),
    (Firmware::ArmHttp, BootFile::Http("snp-arm64.efi")),
];

/// Look up the boot loader for a firmware kind.
pub fn boot_file(firmware: Firmware) -> Option<BootFile> {
    BOOT_FILES
        .iter()
        .find(|(known, _)| *known == firmware)
        .map(|(_, file)| *file)
}

/// Check that a packet is a PXE DISCOVER the proxy should answer.
pub fn is_boot_request(packet: &DhcpPacket) -> Result<(), ClassifyError> {
    match packet.message_type() {
        Some(DhcpMessageType::Discover) => {}
        Some(other) => return Err(ClassifyError::NotDiscover(other)),
        None => return Err(ClassifyError::MissingMessageType),
    }

    if !packet.has_option(option_codes::CLIENT_ARCH) {
        return Err(ClassifyError::MissingClientArch);
    }

    Ok(())
}

/// Build the proxy OFFER for a classified request.
///
/// No address is offered; the reply only carries the boot server and boot
/// filename, plus the client GUID and vendor class echoed back.
pub fn offer(
    request: &DhcpPacket,
    server_ip: Ipv4Addr,
    http_port: u16,
    firmware: Firmware,
) -> Result<DhcpPacket, OfferError> {
    let boot = boot_file(firmware).ok_or(OfferError::UnsupportedFirmware(firmware))?;

    let mut reply = DhcpPacket::empty(BOOTREPLY);
    reply.htype = request.htype;
    reply.hlen = request.hlen;
    reply.xid = request.xid;
    reply.flags = request.flags;
    reply.giaddr = request.giaddr;
    reply.chaddr = request.chaddr;
    reply.siaddr = server_ip;

    reply.set_option(DhcpOption::MessageType(DhcpMessageType::Offer));
    reply.set_option(DhcpOption::ServerIdentifier(server_ip));

    if let Some(guid) = request.option(option_codes::CLIENT_MACHINE_ID) {
        reply.set_option(guid.clone());
    }

    let vendor_class = request
        .vendor_class_id()
        .map(<[u8]>::to_vec)
        .unwrap_or_else(|| DEFAULT_VENDOR_CLASS.to_vec());
    reply.set_option(DhcpOption::VendorClassId(vendor_class));

    if boot.sets_tftp_server() {
        reply.set_option(DhcpOption::TftpServerName(server_ip.to_string()));
    }
    reply.set_option(DhcpOption::BootFileName(boot.filename(server_ip, http_port)));

    Ok(reply)
}
