//! Executable packer detection.
//!
//! VB executables in the wild are frequently wrapped in a runtime packer,
//! which hides the `VB5!` metadata until unpacked. Unpacking is out of scope;
//! this module only recognises the common wrappers so callers can say *why* a
//! file yields no VB metadata instead of a bare "not a VB file".
//!
//! Detection combines section-name signatures with a Shannon-entropy check:
//! packed payloads push section entropy close to 8 bits per byte.

use crate::File;

/// Known packer families seen around VB5/6 binaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackerType {
    /// UPX (Ultimate Packer for eXecutables), by far the most common.
    Upx,
    /// ASPack commercial packer.
    ASPack,
    /// PECompact commercial packer.
    PECompact,
    /// Themida / WinLicense protection.
    Themida,
    /// FSG (Fast Small Good).
    Fsg,
    /// Petite.
    Petite,
    /// MEW.
    Mew,
    /// NSPack.
    NsPack,
    /// High entropy without a recognised signature.
    Unknown,
}

impl PackerType {
    /// Human-readable packer name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            PackerType::Upx => "UPX",
            PackerType::ASPack => "ASPack",
            PackerType::PECompact => "PECompact",
            PackerType::Themida => "Themida/WinLicense",
            PackerType::Fsg => "FSG",
            PackerType::Petite => "Petite",
            PackerType::Mew => "MEW",
            PackerType::NsPack => "NSPack",
            PackerType::Unknown => "Unknown",
        }
    }

    /// A short advisory on how to proceed.
    #[must_use]
    pub fn advisory(&self) -> &'static str {
        match self {
            PackerType::Upx => "unpack with `upx -d <file>` and retry",
            PackerType::Themida => {
                "advanced protection; specialised unpacking required before analysis"
            }
            PackerType::Unknown => "high-entropy sections suggest packing or encryption",
            _ => "unpack with a dedicated or universal unpacker and retry",
        }
    }
}

/// Result of a packer scan.
#[derive(Debug, Clone)]
pub struct PackerDetection {
    /// The recognised packer family.
    pub packer: PackerType,
    /// Confidence in the range 0.0 - 1.0.
    pub confidence: f64,
    /// What triggered the detection (section name or entropy figure).
    pub method: String,
}

/// Section-name prefixes that identify a packer outright.
const SIGNATURES: &[(&str, PackerType)] = &[
    ("UPX0", PackerType::Upx),
    ("UPX1", PackerType::Upx),
    ("UPX2", PackerType::Upx),
    (".aspack", PackerType::ASPack),
    (".adata", PackerType::ASPack),
    ("PEC2", PackerType::PECompact),
    ("PECompact2", PackerType::PECompact),
    (".themida", PackerType::Themida),
    ("Themida", PackerType::Themida),
    ("FSG!", PackerType::Fsg),
    (".petite", PackerType::Petite),
    ("MEW", PackerType::Mew),
    (".MEW", PackerType::Mew),
    ("nsp0", PackerType::NsPack),
    ("nsp1", PackerType::NsPack),
    (".nsp", PackerType::NsPack),
];

/// Entropy above which a section counts as packed/encrypted.
const ENTROPY_THRESHOLD: f64 = 7.2;

/// Scans a PE image for signs of a runtime packer.
///
/// Returns `None` for apparently unpacked images. Signature hits score 0.9
/// confidence; an entropy-only hit scores proportionally to how far above
/// the threshold the hottest section sits.
#[must_use]
pub fn detect_packer(file: &File) -> Option<PackerDetection> {
    for section in file.sections() {
        for (prefix, packer) in SIGNATURES {
            if section.name.starts_with(prefix) {
                return Some(PackerDetection {
                    packer: *packer,
                    confidence: 0.9,
                    method: format!("section name '{}'", section.name),
                });
            }
        }
    }

    // No signature; fall back to entropy over executable/initialised data.
    let mut hottest: Option<(&str, f64)> = None;
    for section in file.sections() {
        if section.data.len() < 256 {
            continue;
        }
        let entropy = shannon_entropy(&section.data);
        if hottest.map_or(true, |(_, best)| entropy > best) {
            hottest = Some((&section.name, entropy));
        }
    }

    match hottest {
        Some((name, entropy)) if entropy >= ENTROPY_THRESHOLD => Some(PackerDetection {
            packer: PackerType::Unknown,
            confidence: ((entropy - ENTROPY_THRESHOLD) / (8.0 - ENTROPY_THRESHOLD)).min(1.0),
            method: format!("section '{name}' entropy {entropy:.2} bits/byte"),
        }),
        _ => None,
    }
}

/// Shannon entropy of a byte buffer, in bits per byte.
#[must_use]
pub fn shannon_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }

    let mut counts = [0u64; 256];
    for &byte in data {
        counts[byte as usize] += 1;
    }

    #[allow(clippy::cast_precision_loss)]
    let total = data.len() as f64;
    counts
        .iter()
        .filter(|&&c| c != 0)
        .map(|&c| {
            #[allow(clippy::cast_precision_loss)]
            let p = c as f64 / total;
            -p * p.log2()
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entropy_extremes() {
        assert_eq!(shannon_entropy(&[]), 0.0);
        assert_eq!(shannon_entropy(&[0x41; 4096]), 0.0);

        // All 256 byte values equally often: exactly 8 bits per byte.
        let uniform: Vec<u8> = (0..=255u8).cycle().take(256 * 16).collect();
        let entropy = shannon_entropy(&uniform);
        assert!((entropy - 8.0).abs() < 1e-9);
    }

    #[test]
    fn entropy_midrange() {
        // Two symbols, evenly split: 1 bit per byte.
        let data: Vec<u8> = [0u8, 1u8].iter().copied().cycle().take(1024).collect();
        let entropy = shannon_entropy(&data);
        assert!((entropy - 1.0).abs() < 1e-9);
    }
}
