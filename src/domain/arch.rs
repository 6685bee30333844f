//! PXE client system architecture codes.

use std::fmt;

/// Client system architecture (DHCP option 93) as registered with IANA
/// (RFC 4578 and the "Processor Architecture Types" registry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientArch {
    IntelX86Pc,
    NecPc98,
    EfiItanium,
    DecAlpha,
    ArcX86,
    IntelLeanClient,
    EfiIa32,
    EfiBc,
    EfiXscale,
    EfiX86_64,
    EfiArm32,
    EfiArm64,
    EfiX86Http,
    EfiX86_64Http,
    EfiArm32Http,
    EfiArm64Http,
    Unknown(u16),
}

impl ClientArch {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => Self::IntelX86Pc,
            1 => Self::NecPc98,
            2 => Self::EfiItanium,
            3 => Self::DecAlpha,
            4 => Self::ArcX86,
            5 => Self::IntelLeanClient,
            6 => Self::EfiIa32,
            7 => Self::EfiBc,
            8 => Self::EfiXscale,
            9 => Self::EfiX86_64,
            10 => Self::EfiArm32,
            11 => Self::EfiArm64,
            15 => Self::EfiX86Http,
            16 => Self::EfiX86_64Http,
            18 => Self::EfiArm32Http,
            19 => Self::EfiArm64Http,
            other => Self::Unknown(other),
        }
    }

    pub fn as_u16(self) -> u16 {
        match self {
            Self::IntelX86Pc => 0,
            Self::NecPc98 => 1,
            Self::EfiItanium => 2,
            Self::DecAlpha => 3,
            Self::ArcX86 => 4,
            Self::IntelLeanClient => 5,
            Self::EfiIa32 => 6,
            Self::EfiBc => 7,
            Self::EfiXscale => 8,
            Self::EfiX86_64 => 9,
            Self::EfiArm32 => 10,
            Self::EfiArm64 => 11,
            Self::EfiX86Http => 15,
            Self::EfiX86_64Http => 16,
            Self::EfiArm32Http => 18,
            Self::EfiArm64Http => 19,
            Self::Unknown(code) => code,
        }
    }
}

impl fmt::Display for ClientArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IntelX86Pc => write!(f, "Intel x86PC"),
            Self::NecPc98 => write!(f, "NEC/PC98"),
            Self::EfiItanium => write!(f, "EFI Itanium"),
            Self::DecAlpha => write!(f, "DEC Alpha"),
            Self::ArcX86 => write!(f, "Arc x86"),
            Self::IntelLeanClient => write!(f, "Intel Lean Client"),
            Self::EfiIa32 => write!(f, "EFI IA32"),
            Self::EfiBc => write!(f, "EFI BC"),
            Self::EfiXscale => write!(f, "EFI Xscale"),
            Self::EfiX86_64 => write!(f, "EFI x86-64"),
            Self::EfiArm32 => write!(f, "EFI ARM32"),
            Self::EfiArm64 => write!(f, "EFI ARM64"),
            Self::EfiX86Http => write!(f, "EFI x86 boot from HTTP"),
            Self::EfiX86_64Http => write!(f, "EFI x86-64 boot from HTTP"),
            Self::EfiArm32Http => write!(f, "EFI ARM32 boot from HTTP"),
            Self::EfiArm64Http => write!(f, "EFI ARM64 boot from HTTP"),
            Self::Unknown(code) => write!(f, "unknown arch {code}"),
        }
    }
}
