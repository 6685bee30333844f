//! DHCP packet domain models.
//!
//! These types represent the logical structure of DHCP packets,
//! independent of wire format parsing.

use std::net::Ipv4Addr;

use macaddr::MacAddr6;

use super::ClientArch;

/// BOOTP operation codes.
pub const BOOTREQUEST: u8 = 1;
pub const BOOTREPLY: u8 = 2;

/// Broadcast bit of the BOOTP `flags` field.
pub const FLAG_BROADCAST: u16 = 0x8000;

/// DHCP option codes used by the proxy.
pub mod option_codes {
    pub const PAD: u8 = 0;
    pub const END: u8 = 255;
    pub const MESSAGE_TYPE: u8 = 53;
    pub const SERVER_ID: u8 = 54;
    pub const VENDOR_CLASS_ID: u8 = 60;
    pub const TFTP_SERVER_NAME: u8 = 66;
    pub const BOOT_FILE_NAME: u8 = 67;
    pub const USER_CLASS: u8 = 77;
    pub const CLIENT_ARCH: u8 = 93;
    pub const CLIENT_MACHINE_ID: u8 = 97;
}

/// DHCP message types as defined in RFC 2131.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpMessageType {
    Discover,
    Offer,
    Request,
    Decline,
    Ack,
    Nak,
    Release,
    Inform,
}

impl DhcpMessageType {
    /// Parse from the DHCP option 53 value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Discover),
            2 => Some(Self::Offer),
            3 => Some(Self::Request),
            4 => Some(Self::Decline),
            5 => Some(Self::Ack),
            6 => Some(Self::Nak),
            7 => Some(Self::Release),
            8 => Some(Self::Inform),
            _ => None,
        }
    }

    /// The option 53 wire value.
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Discover => 1,
            Self::Offer => 2,
            Self::Request => 3,
            Self::Decline => 4,
            Self::Ack => 5,
            Self::Nak => 6,
            Self::Release => 7,
            Self::Inform => 8,
        }
    }
}

impl std::fmt::Display for DhcpMessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discover => write!(f, "DISCOVER"),
            Self::Offer => write!(f, "OFFER"),
            Self::Request => write!(f, "REQUEST"),
            Self::Decline => write!(f, "DECLINE"),
            Self::Ack => write!(f, "ACK"),
            Self::Nak => write!(f, "NAK"),
            Self::Release => write!(f, "RELEASE"),
            Self::Inform => write!(f, "INFORM"),
        }
    }
}

/// DHCP options the proxy reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhcpOption {
    /// Option 53: DHCP Message Type
    MessageType(DhcpMessageType),
    /// Option 54: Server Identifier
    ServerIdentifier(Ipv4Addr),
    /// Option 60: Vendor Class Identifier, raw bytes (e.g. "PXEClient:Arch:00007:UNDI:003016")
    VendorClassId(Vec<u8>),
    /// Option 66: TFTP server name
    TftpServerName(String),
    /// Option 67: Boot file name
    BootFileName(String),
    /// Option 77: User Class, decoded into its entries
    UserClass(Vec<String>),
    /// Option 93: Client System Architecture list (PXE)
    ClientArch(Vec<ClientArch>),
    /// Option 97: Client Machine Identifier (UUID/GUID)
    ClientMachineId(Vec<u8>),
    /// Unknown option (code, data)
    Unknown(u8, Vec<u8>),
}

impl DhcpOption {
    /// The option code this value is carried under.
    pub fn code(&self) -> u8 {
        match self {
            Self::MessageType(_) => option_codes::MESSAGE_TYPE,
            Self::ServerIdentifier(_) => option_codes::SERVER_ID,
            Self::VendorClassId(_) => option_codes::VENDOR_CLASS_ID,
            Self::TftpServerName(_) => option_codes::TFTP_SERVER_NAME,
            Self::BootFileName(_) => option_codes::BOOT_FILE_NAME,
            Self::UserClass(_) => option_codes::USER_CLASS,
            Self::ClientArch(_) => option_codes::CLIENT_ARCH,
            Self::ClientMachineId(_) => option_codes::CLIENT_MACHINE_ID,
            Self::Unknown(code, _) => *code,
        }
    }
}

/// A parsed DHCP packet with all relevant fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpPacket {
    /// Operation: 1 = BOOTREQUEST, 2 = BOOTREPLY
    pub op: u8,
    /// Hardware type (1 = Ethernet)
    pub htype: u8,
    /// Hardware address length
    pub hlen: u8,
    /// Relay hops
    pub hops: u8,
    /// Transaction ID
    pub xid: u32,
    /// Seconds elapsed
    pub secs: u16,
    /// Flags
    pub flags: u16,
    /// Client IP address (if already known)
    pub ciaddr: Ipv4Addr,
    /// 'Your' IP address (assigned by server)
    pub yiaddr: Ipv4Addr,
    /// Next server IP address
    pub siaddr: Ipv4Addr,
    /// Relay agent IP address
    pub giaddr: Ipv4Addr,
    /// Client hardware address, all 16 bytes of the field
    pub chaddr: [u8; 16],
    /// DHCP options, in wire order
    pub options: Vec<DhcpOption>,
}

impl DhcpPacket {
    /// An empty packet with the given op code and all other fields zeroed.
    pub fn empty(op: u8) -> Self {
        Self {
            op,
            htype: 1,
            hlen: 6,
            hops: 0,
            xid: 0,
            secs: 0,
            flags: 0,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr: [0; 16],
            options: Vec::new(),
        }
    }

    /// Returns true if this is a client request (BOOTREQUEST).
    pub fn is_request(&self) -> bool {
        self.op == BOOTREQUEST
    }

    /// Returns true if this is a server reply (BOOTREPLY).
    pub fn is_reply(&self) -> bool {
        self.op == BOOTREPLY
    }

    /// Returns true if the client asked for broadcast replies.
    pub fn is_broadcast(&self) -> bool {
        self.flags & FLAG_BROADCAST != 0
    }

    /// The client MAC address (first 6 bytes of chaddr).
    pub fn client_mac(&self) -> MacAddr6 {
        let c = &self.chaddr;
        MacAddr6::new(c[0], c[1], c[2], c[3], c[4], c[5])
    }

    /// Get the first option carried under `code`.
    pub fn option(&self, code: u8) -> Option<&DhcpOption> {
        self.options.iter().find(|opt| opt.code() == code)
    }

    /// Returns true if an option with `code` is present, whatever its value.
    pub fn has_option(&self, code: u8) -> bool {
        self.option(code).is_some()
    }

    /// Insert an option, replacing any existing option with the same code.
    pub fn set_option(&mut self, option: DhcpOption) {
        let code = option.code();
        match self.options.iter_mut().find(|opt| opt.code() == code) {
            Some(existing) => *existing = option,
            None => self.options.push(option),
        }
    }

    /// Get the DHCP message type from options.
    pub fn message_type(&self) -> Option<DhcpMessageType> {
        self.options.iter().find_map(|opt| match opt {
            DhcpOption::MessageType(msg_type) => Some(*msg_type),
            _ => None,
        })
    }

    /// Get the raw vendor class identifier (Option 60).
    pub fn vendor_class_id(&self) -> Option<&[u8]> {
        self.options.iter().find_map(|opt| match opt {
            DhcpOption::VendorClassId(vc) => Some(vc.as_slice()),
            _ => None,
        })
    }

    /// Get the client architecture list (Option 93), empty if absent.
    pub fn client_arches(&self) -> &[ClientArch] {
        self.options
            .iter()
            .find_map(|opt| match opt {
                DhcpOption::ClientArch(arches) => Some(arches.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    /// Get the user class entries (Option 77), empty if absent.
    pub fn user_classes(&self) -> &[String] {
        self.options
            .iter()
            .find_map(|opt| match opt {
                DhcpOption::UserClass(classes) => Some(classes.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    /// Get the client machine identifier (Option 97), empty if absent.
    pub fn client_machine_id(&self) -> &[u8] {
        self.options
            .iter()
            .find_map(|opt| match opt {
                DhcpOption::ClientMachineId(guid) => Some(guid.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    /// Get the TFTP server name (Option 66).
    pub fn tftp_server_name(&self) -> Option<&str> {
        self.options.iter().find_map(|opt| match opt {
            DhcpOption::TftpServerName(name) => Some(name.as_str()),
            _ => None,
        })
    }

    /// Get the boot file name (Option 67).
    pub fn boot_file_name(&self) -> Option<&str> {
        self.options.iter().find_map(|opt| match opt {
            DhcpOption::BootFileName(name) => Some(name.as_str()),
            _ => None,
        })
    }
}
