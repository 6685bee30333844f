//! Boot script injection into iPXE binaries.
//!
//! The iPXE images are built with a placeholder script embedded, delimited by
//! two literal markers. Patching overwrites everything from the start marker
//! through the end marker with the rendered script, padded with newlines so
//! the image length never changes.

use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::info;

use super::compress::Compressor;
use super::script::BootScript;
use crate::error::PatchError;

pub const PLACEHOLDER_START: &[u8] = b"# *PLACEHOLDER START*";
pub const PLACEHOLDER_END: &[u8] = b"# *PLACEHOLDER END*";

/// Byte used to fill the window after the script.
const PADDING: u8 = b'\n';

/// EFI loader kinds shipped per architecture.
const EFI_KINDS: [&str; 2] = ["ipxe", "snp"];

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Locate the placeholder window in an image.
///
/// The window starts at the first start marker and ends right after the first
/// end marker, so both markers are overwritten.
pub fn placeholder_window(contents: &[u8], source: &Path) -> Result<Range<usize>, PatchError> {
    let start = find(contents, PLACEHOLDER_START)
        .ok_or_else(|| PatchError::StartMarkerNotFound(source.to_path_buf()))?;
    let end = find(contents, PLACEHOLDER_END)
        .ok_or_else(|| PatchError::EndMarkerNotFound(source.to_path_buf()))?;

    if end < start {
        return Err(PatchError::MarkerOrder(source.to_path_buf()));
    }

    Ok(start..end + PLACEHOLDER_END.len())
}

/// Overwrite `window` in `contents` with `script` plus newline padding.
pub fn patch_bytes(
    contents: &mut [u8],
    window: Range<usize>,
    script: &[u8],
) -> Result<(), PatchError> {
    let region = &mut contents[window];

    if script.len() > region.len() {
        return Err(PatchError::ScriptTooLarge {
            script: script.len(),
            window: region.len(),
        });
    }

    let (head, tail) = region.split_at_mut(script.len());
    head.copy_from_slice(script);
    tail.fill(PADDING);

    Ok(())
}

/// A file written by the patcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchedImage {
    pub path: PathBuf,
    pub len: usize,
    pub sha256: String,
}

impl PatchedImage {
    fn new(path: &Path, bytes: &[u8]) -> Self {
        Self {
            path: path.to_path_buf(),
            len: bytes.len(),
            sha256: format!("{:x}", Sha256::digest(bytes)),
        }
    }
}

/// Write `bytes` to `path` through a sibling temp file and a rename, creating
/// parent directories as needed.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PatchError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| PatchError::io(parent, e))?;
    }

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));

    if let Err(e) = fs::write(&tmp, bytes) {
        let _ = fs::remove_file(&tmp);
        return Err(PatchError::io(&tmp, e));
    }

    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        PatchError::io(path, e)
    })
}

/// Patch one image from `source` into `destination`.
///
/// Nothing is written unless the markers are found and the script fits.
pub fn patch_script(
    source: &Path,
    destination: &Path,
    script: &[u8],
) -> Result<PatchedImage, PatchError> {
    let mut contents = fs::read(source).map_err(|e| PatchError::io(source, e))?;

    let window = placeholder_window(&contents, source)?;
    patch_bytes(&mut contents, window, script)?;

    write_atomic(destination, &contents)?;

    Ok(PatchedImage::new(destination, &contents))
}

/// A source image and where its patched copy goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchTarget {
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// Produces every servable boot image under the TFTP root.
pub struct Patcher {
    ipxe_dir: PathBuf,
    tftp_root: PathBuf,
    compressor: Box<dyn Compressor>,
}

impl Patcher {
    pub fn new(
        ipxe_dir: impl Into<PathBuf>,
        tftp_root: impl Into<PathBuf>,
        compressor: impl Compressor + 'static,
    ) -> Self {
        Self {
            ipxe_dir: ipxe_dir.into(),
            tftp_root: tftp_root.into(),
            compressor: Box::new(compressor),
        }
    }

    /// The EFI images, patched directly.
    pub fn efi_targets(&self) -> Vec<PatchTarget> {
        EFI_KINDS
            .iter()
            .flat_map(|kind| {
                [
                    PatchTarget {
                        source: self.ipxe_dir.join("amd64").join(format!("{kind}.efi")),
                        destination: self.tftp_root.join(format!("{kind}.efi")),
                    },
                    PatchTarget {
                        source: self.ipxe_dir.join("arm64").join(format!("{kind}.efi")),
                        destination: self.tftp_root.join(format!("{kind}-arm64.efi")),
                    },
                ]
            })
            .collect()
    }

    fn kpxe_dir(&self) -> PathBuf {
        self.ipxe_dir.join("amd64").join("kpxe")
    }

    /// The uncompressed BIOS image; its patched copy stays next to the source.
    pub fn kpxe_target(&self) -> PatchTarget {
        let dir = self.kpxe_dir();
        PatchTarget {
            source: dir.join("undionly.kpxe.bin"),
            destination: dir.join("undionly.kpxe.bin.patched"),
        }
    }

    /// Side information the compressor needs for the BIOS image.
    pub fn kpxe_zinfo(&self) -> PathBuf {
        self.kpxe_dir().join("undionly.kpxe.zinfo")
    }

    /// Where the compressed BIOS image is served from.
    pub fn kpxe_outputs(&self) -> [PathBuf; 2] {
        [
            self.tftp_root.join("undionly.kpxe"),
            self.tftp_root.join("undionly.kpxe.0"),
        ]
    }

    /// Patch every image, stopping at the first failure.
    pub fn patch_all(&self, script: &BootScript) -> Result<Vec<PatchedImage>, PatchError> {
        let mut written = Vec::new();

        for target in self.efi_targets() {
            let image = patch_script(&target.source, &target.destination, script.as_bytes())?;
            log_image(&image);
            written.push(image);
        }

        let kpxe = self.kpxe_target();
        let raw = patch_script(&kpxe.source, &kpxe.destination, script.as_bytes())?;
        log_image(&raw);

        let zinfo = self.kpxe_zinfo();
        let compressed = self
            .compressor
            .compress(&raw.path, &zinfo)
            .map_err(|source| PatchError::Compress {
                path: raw.path.clone(),
                source,
            })?;
        written.push(raw);

        for output in self.kpxe_outputs() {
            write_atomic(&output, &compressed)?;
            let image = PatchedImage::new(&output, &compressed);
            log_image(&image);
            written.push(image);
        }

        Ok(written)
    }
}

fn log_image(image: &PatchedImage) {
    info!(
        path = %image.path.display(),
        size = image.len,
        sha256 = %image.sha256,
        "wrote boot image"
    );
}
