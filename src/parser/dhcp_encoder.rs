//! DHCP packet encoder.
//!
//! Serializes domain DHCP packets back to RFC 2131 wire format.

use crate::domain::{option_codes, DhcpOption, DhcpPacket};
use crate::error::OfferError;

use super::dhcp_parser::{BOOTP_HEADER_SIZE, DHCP_MAGIC_COOKIE};

/// Minimum BOOTP message size; some PXE ROMs drop shorter replies.
const MIN_PACKET_SIZE: usize = 300;

/// Encoder for DHCP packets.
pub struct DhcpEncoder;

impl DhcpEncoder {
    /// Create a new DHCP encoder.
    pub fn new() -> Self {
        Self
    }

    /// Encode a packet, terminating the options with END and padding to the
    /// BOOTP minimum.
    pub fn encode(&self, packet: &DhcpPacket) -> Result<Vec<u8>, OfferError> {
        let mut out = vec![0u8; BOOTP_HEADER_SIZE];

        out[0] = packet.op;
        out[1] = packet.htype;
        out[2] = packet.hlen;
        out[3] = packet.hops;
        out[4..8].copy_from_slice(&packet.xid.to_be_bytes());
        out[8..10].copy_from_slice(&packet.secs.to_be_bytes());
        out[10..12].copy_from_slice(&packet.flags.to_be_bytes());
        out[12..16].copy_from_slice(&packet.ciaddr.octets());
        out[16..20].copy_from_slice(&packet.yiaddr.octets());
        out[20..24].copy_from_slice(&packet.siaddr.octets());
        out[24..28].copy_from_slice(&packet.giaddr.octets());
        out[28..44].copy_from_slice(&packet.chaddr);
        // sname and file stay zeroed, boot parameters travel as options 66/67

        out.extend_from_slice(&DHCP_MAGIC_COOKIE);

        for option in &packet.options {
            let value = option_value(option);
            if value.len() > u8::MAX as usize {
                return Err(OfferError::OptionTooLong {
                    code: option.code(),
                    len: value.len(),
                });
            }
            out.push(option.code());
            out.push(value.len() as u8);
            out.extend_from_slice(&value);
        }

        out.push(option_codes::END);

        if out.len() < MIN_PACKET_SIZE {
            out.resize(MIN_PACKET_SIZE, 0);
        }

        Ok(out)
    }
}

impl Default for DhcpEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn option_value(option: &DhcpOption) -> Vec<u8> {
    match option {
        DhcpOption::MessageType(msg_type) => vec![msg_type.as_u8()],
        DhcpOption::ServerIdentifier(ip) => ip.octets().to_vec(),
        DhcpOption::VendorClassId(vc) => vc.clone(),
        DhcpOption::TftpServerName(name) => name.as_bytes().to_vec(),
        DhcpOption::BootFileName(name) => name.as_bytes().to_vec(),
        DhcpOption::UserClass(classes) => classes
            .iter()
            .flat_map(|class| {
                let bytes = class.as_bytes();
                std::iter::once(bytes.len() as u8).chain(bytes.iter().copied())
            })
            .collect(),
        DhcpOption::ClientArch(arches) => arches
            .iter()
            .flat_map(|arch| arch.as_u16().to_be_bytes())
            .collect(),
        DhcpOption::ClientMachineId(guid) => guid.clone(),
        DhcpOption::Unknown(_, data) => data.clone(),
    }
}
