//! Firmware classification of PXE clients.

use std::fmt;

use super::{ClientArch, DhcpPacket};
use crate::error::ClassifyError;

/// Kind of firmware attempting to boot.
///
/// This selects the boot loader only; kernel selection should key off the
/// more generic architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Firmware {
    #[default]
    Unsupported,
    /// "Classic" x86 BIOS with PXE/UNDI support
    X86Pc,
    /// EFI x86
    X86Efi,
    /// EFI ARM64
    ArmEfi,
    /// "Classic" x86 BIOS running iPXE (no UNDI support)
    X86Ipxe,
    /// HTTP Boot x86
    X86Http,
    /// HTTP Boot ARM64
    ArmHttp,
}

impl fmt::Display for Firmware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported => write!(f, "Unsupported"),
            Self::X86Pc => write!(f, "X86PC"),
            Self::X86Efi => write!(f, "X86EFI"),
            Self::ArmEfi => write!(f, "ARMEFI"),
            Self::X86Ipxe => write!(f, "X86Ipxe"),
            Self::X86Http => write!(f, "X86HTTP"),
            Self::ArmHttp => write!(f, "ARMHTTP"),
        }
    }
}

/// Architecture codes the proxy knows how to boot.
const ARCH_FIRMWARE: &[(ClientArch, Firmware)] = &[
    (ClientArch::IntelX86Pc, Firmware::X86Pc),
    (ClientArch::EfiIa32, Firmware::X86Efi),
    (ClientArch::EfiX86_64, Firmware::X86Efi),
    (ClientArch::EfiBc, Firmware::X86Efi),
    (ClientArch::EfiArm64, Firmware::ArmEfi),
    (ClientArch::EfiX86Http, Firmware::X86Http),
    (ClientArch::EfiX86_64Http, Firmware::X86Http),
    (ClientArch::EfiArm64Http, Firmware::ArmHttp),
];

/// User class announced by clients already running iPXE.
const IPXE_USER_CLASS: &str = "iPXE";

/// Length of a well-formed client machine identifier: type byte + 16-byte UUID.
const GUID_LEN: usize = 17;

/// Map a single architecture code, `None` for codes we cannot boot.
pub fn firmware_for_arch(arch: ClientArch) -> Option<Firmware> {
    ARCH_FIRMWARE
        .iter()
        .find(|(known, _)| *known == arch)
        .map(|(_, firmware)| *firmware)
}

/// Classify the firmware of a PXE discover packet.
///
/// The last recognized architecture in option 93 wins. A client already
/// running iPXE on x86 BIOS is reclassified to [`Firmware::X86Ipxe`] so it is
/// not handed an UNDI chainload. The client GUID (option 97) must be absent,
/// or 17 bytes with a zero type byte.
pub fn classify(packet: &DhcpPacket) -> Result<Firmware, ClassifyError> {
    let arches = packet.client_arches();

    let firmware = arches
        .iter()
        .filter_map(|arch| firmware_for_arch(*arch))
        .last()
        .ok_or_else(|| {
            ClassifyError::UnsupportedArch(arches.iter().map(ToString::to_string).collect())
        })?;

    let firmware = match packet.user_classes().first() {
        Some(class) if class == IPXE_USER_CLASS && firmware == Firmware::X86Pc => {
            Firmware::X86Ipxe
        }
        _ => firmware,
    };

    validate_guid(packet.client_machine_id())?;

    Ok(firmware)
}

/// Some PXE ROMs in the wild omit the GUID and still expect to boot; it is
/// only mirrored back, so an empty one is accepted.
fn validate_guid(guid: &[u8]) -> Result<(), ClassifyError> {
    match guid.len() {
        0 => Ok(()),
        GUID_LEN if guid[0] == 0 => Ok(()),
        GUID_LEN => Err(ClassifyError::GuidLeadingByte),
        other => Err(ClassifyError::GuidWrongSize(other)),
    }
}
