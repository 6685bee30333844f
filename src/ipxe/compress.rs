//! External compressor for the legacy BIOS image.
//!
//! `undionly.kpxe` is shipped compressed. The uncompressed image is patched
//! and then fed back through iPXE's `zbin` utility together with its zinfo
//! side file.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::error::CompressError;

/// Default location of the `zbin` binary.
pub const DEFAULT_ZBIN: &str = "/bin/zbin";

/// Turns a raw image plus side information into compressed image bytes.
pub trait Compressor: Send + Sync {
    fn compress(&self, raw: &Path, side_info: &Path) -> Result<Vec<u8>, CompressError>;
}

impl<C: Compressor + ?Sized> Compressor for Box<C> {
    fn compress(&self, raw: &Path, side_info: &Path) -> Result<Vec<u8>, CompressError> {
        (**self).compress(raw, side_info)
    }
}

/// Runs `<program> <raw> <side_info>` and captures stdout.
#[derive(Debug, Clone)]
pub struct Zbin {
    program: PathBuf,
}

impl Zbin {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Default for Zbin {
    fn default() -> Self {
        Self::new(DEFAULT_ZBIN)
    }
}

impl Compressor for Zbin {
    fn compress(&self, raw: &Path, side_info: &Path) -> Result<Vec<u8>, CompressError> {
        debug!(
            program = %self.program.display(),
            raw = %raw.display(),
            side_info = %side_info.display(),
            "running compressor"
        );

        let output = Command::new(&self.program)
            .arg(raw)
            .arg(side_info)
            .output()
            .map_err(|source| CompressError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(CompressError::Failed {
                program: self.program.clone(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
            });
        }

        Ok(output.stdout)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_stdout_is_captured() {
        let dir = TempDir::new().unwrap();
        let raw = dir.path().join("raw.bin");
        let info = dir.path().join("raw.zinfo");
        fs::write(&raw, b"raw-").unwrap();
        fs::write(&info, b"info").unwrap();

        // cat concatenates both inputs, standing in for the real codec
        let bytes = Zbin::new("cat").compress(&raw, &info).unwrap();
        assert_eq!(bytes, b"raw-info");
    }

    #[test]
    fn test_nonzero_exit_carries_code_and_stderr() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.bin");
        let info = dir.path().join("missing.zinfo");

        let err = Zbin::new("cat").compress(&missing, &info).unwrap_err();
        match err {
            CompressError::Failed { code, stderr, .. } => {
                assert_eq!(code, Some(1));
                assert!(stderr.contains("missing.bin"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_missing_program_fails_to_spawn() {
        let dir = TempDir::new().unwrap();
        let err = Zbin::new(dir.path().join("no-such-zbin"))
            .compress(Path::new("a"), Path::new("b"))
            .unwrap_err();
        assert!(matches!(err, CompressError::Spawn { .. }));
    }

    #[test]
    fn test_default_program() {
        assert_eq!(Zbin::default().program(), Path::new(DEFAULT_ZBIN));
    }
}
