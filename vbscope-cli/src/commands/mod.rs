pub mod decompile;
pub mod disasm;
pub mod info;
pub mod packer;
pub mod x86;

use std::path::Path;

use anyhow::Context;
use vbscope::{File, VbImage};

/// Load and validate a PE image.
pub fn load_file(path: &Path) -> anyhow::Result<File> {
    File::from_file(path).with_context(|| format!("failed to load '{}'", path.display()))
}

/// Load a PE image and parse its VB metadata.
pub fn load_image(path: &Path) -> anyhow::Result<VbImage> {
    let file = load_file(path)?;
    VbImage::parse(file).with_context(|| format!("'{}' is not a VB5/6 file", path.display()))
}
