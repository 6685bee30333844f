//! Error types for the boot pipeline.
//!
//! Per-request failures (parse, classify, offer, TFTP wire) are typed so the
//! servers can log and drop them. Startup failures (script, patch, compress)
//! are fatal and bubble up through `anyhow` in the orchestrator.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use thiserror::Error;

use crate::domain::{DhcpMessageType, Firmware};

/// Errors from decoding a DHCP packet off the wire.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("packet too short: expected at least {expected} bytes, got {actual}")]
    PacketTooShort { expected: usize, actual: usize },

    #[error("invalid DHCP magic cookie")]
    InvalidMagicCookie,

    #[error("invalid option at offset {offset}: {message}")]
    InvalidOption { offset: usize, message: String },
}

/// Reasons a packet is not answered by the proxy.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("packet is {0}, not DISCOVER")]
    NotDiscover(DhcpMessageType),

    #[error("packet has no message type (option 53)")]
    MissingMessageType,

    #[error("not a PXE boot request (missing option 93)")]
    MissingClientArch,

    #[error("unsupported client arch: {0:?}")]
    UnsupportedArch(Vec<String>),

    #[error("malformed client GUID (option 97), wrong size {0}")]
    GuidWrongSize(usize),

    #[error("malformed client GUID (option 97), leading byte must be zero")]
    GuidLeadingByte,
}

/// Errors building a proxy offer.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum OfferError {
    #[error("unsupported firmware type {0}")]
    UnsupportedFirmware(Firmware),

    #[error("option {code} value is {len} bytes, longer than 255")]
    OptionTooLong { code: u8, len: usize },
}

/// Errors rendering the embedded boot script.
#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("failed to render boot script: {0}")]
    Render(#[from] minijinja::Error),
}

/// Errors from the external compressor capability.
#[derive(Error, Debug)]
pub enum CompressError {
    #[error("failed to run {program:?}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{program:?} failed with {}, stderr: {stderr}", exit_status(.code))]
    Failed {
        program: PathBuf,
        code: Option<i32>,
        stderr: String,
    },
}

/// Errors patching a boot image.
#[derive(Error, Debug)]
pub enum PatchError {
    #[error("I/O error on {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("placeholder start not found in {0:?}")]
    StartMarkerNotFound(PathBuf),

    #[error("placeholder end not found in {0:?}")]
    EndMarkerNotFound(PathBuf),

    #[error("placeholder end before start in {0:?}")]
    MarkerOrder(PathBuf),

    #[error("script size {script} is larger than placeholder space {window}")]
    ScriptTooLarge { script: usize, window: usize },

    #[error("failed to compress {path:?}")]
    Compress {
        path: PathBuf,
        #[source]
        source: CompressError,
    },
}

impl PatchError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors resolving the runtime configuration.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no routable IPv4 address found, set --api-host")]
    NoRoutableAddress,

    #[error("several routable IPv4 addresses found ({}), set --api-host", join_addrs(.0))]
    AmbiguousAddress(Vec<Ipv4Addr>),

    #[error("--dhcp-workers must be at least 1")]
    NoWorkers,
}

fn exit_status(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code (killed by signal)".to_string(),
    }
}

fn join_addrs(addrs: &[Ipv4Addr]) -> String {
    addrs
        .iter()
        .map(Ipv4Addr::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors decoding a TFTP packet.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TftpError {
    #[error("packet too short ({0} bytes)")]
    PacketTooShort(usize),

    #[error("unknown opcode {0}")]
    UnknownOpcode(u16),

    #[error("malformed request: {0}")]
    MalformedRequest(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_discover_display() {
        let err = ClassifyError::NotDiscover(DhcpMessageType::Request);
        assert_eq!(err.to_string(), "packet is REQUEST, not DISCOVER");
    }

    #[test]
    fn test_script_too_large_display() {
        let err = PatchError::ScriptTooLarge {
            script: 10,
            window: 4,
        };
        assert_eq!(
            err.to_string(),
            "script size 10 is larger than placeholder space 4"
        );
    }

    #[test]
    fn test_ambiguous_address_display() {
        let err = ConfigError::AmbiguousAddress(vec![
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(192, 168, 1, 5),
        ]);
        assert_eq!(
            err.to_string(),
            "several routable IPv4 addresses found (10.0.0.1, 192.168.1.5), set --api-host"
        );
    }

    #[test]
    fn test_compress_failed_display() {
        let err = CompressError::Failed {
            program: PathBuf::from("/bin/zbin"),
            code: Some(2),
            stderr: "bad zinfo".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "\"/bin/zbin\" failed with exit code 2, stderr: bad zinfo"
        );
    }

    #[test]
    fn test_compress_killed_display() {
        let err = CompressError::Failed {
            program: PathBuf::from("/bin/zbin"),
            code: None,
            stderr: String::new(),
        };
        assert_eq!(
            err.to_string(),
            "\"/bin/zbin\" failed with no exit code (killed by signal), stderr: "
        );
    }

    #[test]
    fn test_wrapped_errors_name_their_cause_once() {
        let err = PatchError::Compress {
            path: PathBuf::from("undionly.kpxe.bin.patched"),
            source: CompressError::Failed {
                program: PathBuf::from("/bin/zbin"),
                code: Some(1),
                stderr: "boom".to_string(),
            },
        };
        assert_eq!(
            err.to_string(),
            "failed to compress \"undionly.kpxe.bin.patched\""
        );

        let chained = format!("{:#}", anyhow::Error::new(err));
        assert_eq!(chained.matches("boom").count(), 1, "{chained}");
    }

    #[test]
    fn test_io_error_keeps_cause_as_source() {
        let err = PatchError::io(
            "snp.efi",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.to_string(), "I/O error on \"snp.efi\"");
        assert_eq!(
            std::error::Error::source(&err).map(ToString::to_string),
            Some("gone".to_string())
        );
    }
}
