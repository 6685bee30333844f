//! DHCP packet parser implementation.
//!
//! Parses raw DHCP packets according to RFC 2131.

use std::net::Ipv4Addr;

use crate::domain::{option_codes, ClientArch, DhcpMessageType, DhcpOption, DhcpPacket};
use crate::error::ParseError;

/// DHCP magic cookie: 0x63825363
pub(crate) const DHCP_MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];

/// Size of the fixed BOOTP header, up to the magic cookie.
pub(crate) const BOOTP_HEADER_SIZE: usize = 236;

/// Offset of the first option.
pub(crate) const OPTIONS_OFFSET: usize = BOOTP_HEADER_SIZE + DHCP_MAGIC_COOKIE.len();

/// Parser for DHCP packets.
///
/// Focuses solely on turning DHCP wire format into domain types.
pub struct DhcpParser;

impl DhcpParser {
    /// Create a new DHCP parser.
    pub fn new() -> Self {
        Self
    }

    /// Parse a DHCP packet from raw bytes.
    ///
    /// The input should be the UDP payload (not including IP/UDP headers).
    pub fn parse(&self, data: &[u8]) -> Result<DhcpPacket, ParseError> {
        if data.len() < OPTIONS_OFFSET {
            return Err(ParseError::PacketTooShort {
                expected: OPTIONS_OFFSET,
                actual: data.len(),
            });
        }

        if data[BOOTP_HEADER_SIZE..OPTIONS_OFFSET] != DHCP_MAGIC_COOKIE {
            return Err(ParseError::InvalidMagicCookie);
        }

        let mut chaddr = [0u8; 16];
        chaddr.copy_from_slice(&data[28..44]);

        // sname (44..108) and file (108..236) are not used by the proxy
        Ok(DhcpPacket {
            op: data[0],
            htype: data[1],
            hlen: data[2],
            hops: data[3],
            xid: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            secs: u16::from_be_bytes([data[8], data[9]]),
            flags: u16::from_be_bytes([data[10], data[11]]),
            ciaddr: ipv4_at(data, 12),
            yiaddr: ipv4_at(data, 16),
            siaddr: ipv4_at(data, 20),
            giaddr: ipv4_at(data, 24),
            chaddr,
            options: self.parse_options(&data[OPTIONS_OFFSET..])?,
        })
    }

    /// Parse DHCP options from the options section.
    fn parse_options(&self, data: &[u8]) -> Result<Vec<DhcpOption>, ParseError> {
        let mut options = Vec::new();
        let mut offset = 0;

        while offset < data.len() {
            let code = data[offset];

            if code == option_codes::PAD {
                offset += 1;
                continue;
            }

            if code == option_codes::END {
                break;
            }

            // Regular option: code + length + data
            if offset + 1 >= data.len() {
                return Err(ParseError::InvalidOption {
                    offset,
                    message: "option length missing".to_string(),
                });
            }

            let len = data[offset + 1] as usize;

            if offset + 2 + len > data.len() {
                return Err(ParseError::InvalidOption {
                    offset,
                    message: format!(
                        "option data truncated: expected {} bytes, have {}",
                        len,
                        data.len() - offset - 2
                    ),
                });
            }

            let option_data = &data[offset + 2..offset + 2 + len];

            if let Some(option) = self.parse_option(code, option_data) {
                options.push(option);
            }

            offset += 2 + len;
        }

        Ok(options)
    }

    /// Parse a single DHCP option.
    fn parse_option(&self, code: u8, data: &[u8]) -> Option<DhcpOption> {
        match code {
            option_codes::MESSAGE_TYPE => data
                .first()
                .and_then(|value| DhcpMessageType::from_u8(*value))
                .map(DhcpOption::MessageType),

            option_codes::SERVER_ID => {
                if data.len() < 4 {
                    return None;
                }
                Some(DhcpOption::ServerIdentifier(ipv4_at(data, 0)))
            }

            option_codes::VENDOR_CLASS_ID => Some(DhcpOption::VendorClassId(data.to_vec())),

            option_codes::TFTP_SERVER_NAME => Some(DhcpOption::TftpServerName(
                String::from_utf8_lossy(data).into_owned(),
            )),

            option_codes::BOOT_FILE_NAME => Some(DhcpOption::BootFileName(
                String::from_utf8_lossy(trim_nul(data)).into_owned(),
            )),

            option_codes::USER_CLASS => Some(DhcpOption::UserClass(parse_user_class(data))),

            // A malformed list still marks the packet as a PXE request, it just
            // carries no usable architecture.
            option_codes::CLIENT_ARCH => {
                let arches = if data.len() % 2 == 0 {
                    data.chunks_exact(2)
                        .map(|pair| ClientArch::from_u16(u16::from_be_bytes([pair[0], pair[1]])))
                        .collect()
                } else {
                    Vec::new()
                };
                Some(DhcpOption::ClientArch(arches))
            }

            option_codes::CLIENT_MACHINE_ID => Some(DhcpOption::ClientMachineId(data.to_vec())),

            _ => Some(DhcpOption::Unknown(code, data.to_vec())),
        }
    }
}

impl Default for DhcpParser {
    fn default() -> Self {
        Self::new()
    }
}

fn ipv4_at(data: &[u8], offset: usize) -> Ipv4Addr {
    Ipv4Addr::new(
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    )
}

fn trim_nul(data: &[u8]) -> &[u8] {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    &data[..end]
}

/// Decode option 77.
///
/// RFC 3004 encodes a list of length-prefixed entries. iPXE instead sends its
/// class as a bare string, so anything that does not decode as RFC 3004 is
/// taken as a single entry.
fn parse_user_class(data: &[u8]) -> Vec<String> {
    let mut classes = Vec::new();
    let mut offset = 0;

    while offset < data.len() {
        let len = data[offset] as usize;
        if len == 0 || offset + 1 + len > data.len() {
            return vec![String::from_utf8_lossy(data).into_owned()];
        }
        classes.push(String::from_utf8_lossy(&data[offset + 1..offset + 1 + len]).into_owned());
        offset += 1 + len;
    }

    classes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_packet() -> Vec<u8> {
        let mut packet = vec![0u8; OPTIONS_OFFSET];
        packet[0] = 1; // BOOTREQUEST
        packet[1] = 1; // Ethernet
        packet[2] = 6;
        packet[4..8].copy_from_slice(&0x12345678u32.to_be_bytes());
        packet[10..12].copy_from_slice(&0x8000u16.to_be_bytes());
        packet[24..28].copy_from_slice(&[10, 0, 0, 254]);
        packet[28..34].copy_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        packet[BOOTP_HEADER_SIZE..OPTIONS_OFFSET].copy_from_slice(&DHCP_MAGIC_COOKIE);
        packet
    }

    fn with_options(options: &[(u8, &[u8])]) -> Vec<u8> {
        let mut packet = base_packet();
        for (code, value) in options {
            packet.push(*code);
            packet.push(value.len() as u8);
            packet.extend_from_slice(value);
        }
        packet.push(option_codes::END);
        packet
    }

    mod header_tests {
        use super::*;

        #[test]
        fn test_parse_minimum_packet() {
            let parser = DhcpParser::new();
            let packet = with_options(&[(option_codes::MESSAGE_TYPE, &[1])]);

            let dhcp = parser.parse(&packet).unwrap();
            assert_eq!(dhcp.op, 1);
            assert_eq!(dhcp.xid, 0x12345678);
            assert!(dhcp.is_broadcast());
            assert_eq!(dhcp.giaddr, Ipv4Addr::new(10, 0, 0, 254));
            assert_eq!(&dhcp.chaddr[..6], &[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
            assert_eq!(dhcp.message_type(), Some(DhcpMessageType::Discover));
        }

        #[test]
        fn test_packet_too_short() {
            let parser = DhcpParser::new();
            let result = parser.parse(&[0u8; 100]);
            assert_eq!(
                result,
                Err(ParseError::PacketTooShort {
                    expected: 240,
                    actual: 100
                })
            );
        }

        #[test]
        fn test_bad_magic_cookie() {
            let parser = DhcpParser::new();
            let mut packet = base_packet();
            packet[236] = 0;
            assert_eq!(parser.parse(&packet), Err(ParseError::InvalidMagicCookie));
        }

        #[test]
        fn test_truncated_option() {
            let parser = DhcpParser::new();
            let mut packet = base_packet();
            packet.extend_from_slice(&[option_codes::VENDOR_CLASS_ID, 9, b'P', b'X']);
            assert!(matches!(
                parser.parse(&packet),
                Err(ParseError::InvalidOption { offset: 0, .. })
            ));
        }

        #[test]
        fn test_pad_and_missing_end() {
            let parser = DhcpParser::new();
            let mut packet = base_packet();
            packet.extend_from_slice(&[0, 0, option_codes::MESSAGE_TYPE, 1, 3]);
            let dhcp = parser.parse(&packet).unwrap();
            assert_eq!(dhcp.message_type(), Some(DhcpMessageType::Request));
        }
    }

    mod option_tests {
        use super::*;

        #[test]
        fn test_client_arch_list() {
            let parser = DhcpParser::new();
            let packet = with_options(&[(option_codes::CLIENT_ARCH, &[0, 7, 0, 11])]);
            let dhcp = parser.parse(&packet).unwrap();
            assert_eq!(
                dhcp.client_arches(),
                &[ClientArch::EfiBc, ClientArch::EfiArm64]
            );
        }

        #[test]
        fn test_odd_length_client_arch_is_present_but_empty() {
            let parser = DhcpParser::new();
            let packet = with_options(&[(option_codes::CLIENT_ARCH, &[0, 7, 0])]);
            let dhcp = parser.parse(&packet).unwrap();
            assert!(dhcp.has_option(option_codes::CLIENT_ARCH));
            assert!(dhcp.client_arches().is_empty());
        }

        #[test]
        fn test_unknown_message_type_is_dropped() {
            let parser = DhcpParser::new();
            let packet = with_options(&[(option_codes::MESSAGE_TYPE, &[42])]);
            let dhcp = parser.parse(&packet).unwrap();
            assert_eq!(dhcp.message_type(), None);
        }

        #[test]
        fn test_vendor_class_and_guid_are_raw() {
            let parser = DhcpParser::new();
            let guid = [0u8; 17];
            let packet = with_options(&[
                (option_codes::VENDOR_CLASS_ID, b"PXEClient:Arch:00007:UNDI:003016"),
                (option_codes::CLIENT_MACHINE_ID, &guid),
            ]);
            let dhcp = parser.parse(&packet).unwrap();
            assert_eq!(
                dhcp.vendor_class_id(),
                Some(&b"PXEClient:Arch:00007:UNDI:003016"[..])
            );
            assert_eq!(dhcp.client_machine_id(), &guid[..]);
        }

        #[test]
        fn test_unknown_option_is_kept() {
            let parser = DhcpParser::new();
            let packet = with_options(&[(12, b"node1")]);
            let dhcp = parser.parse(&packet).unwrap();
            assert_eq!(dhcp.options, vec![DhcpOption::Unknown(12, b"node1".to_vec())]);
        }
    }

    mod user_class_tests {
        use super::*;

        #[test]
        fn test_bare_ipxe_string() {
            assert_eq!(parse_user_class(b"iPXE"), vec!["iPXE".to_string()]);
        }

        #[test]
        fn test_rfc3004_list() {
            assert_eq!(
                parse_user_class(b"\x04iPXE\x03foo"),
                vec!["iPXE".to_string(), "foo".to_string()]
            );
        }

        #[test]
        fn test_overlong_entry_falls_back_to_single_string() {
            assert_eq!(parse_user_class(b"\x09abc"), vec!["\tabc".to_string()]);
        }

        #[test]
        fn test_empty_payload() {
            assert!(parse_user_class(b"").is_empty());
        }
    }
}
