//! iPXE boot image preparation.
//!
//! Renders the embedded boot script and splices it into the iPXE binaries
//! served over TFTP.

mod compress;
mod patch;
mod script;

pub use compress::{Compressor, Zbin, DEFAULT_ZBIN};
pub use patch::{
    patch_bytes, patch_script, placeholder_window, PatchTarget, PatchedImage, Patcher,
    PLACEHOLDER_END, PLACEHOLDER_START,
};
pub use script::BootScript;
