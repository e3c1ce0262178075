//! PE container parsing and address-space translation.
//!
//! This module loads a 32-bit PE executable, validates that it is the kind of
//! binary the VB6 toolchain produces (PE32, i386), and snapshots every section
//! into owned memory so the rest of the pipeline can work against an immutable
//! image. The container itself is parsed with `goblin`; the section snapshot
//! and the RVA arithmetic on top of it are ours.
//!
//! # Address spaces
//!
//! Three address spaces are in play:
//!
//! - **File offset** - a byte position in the file on disk.
//! - **RVA** - relative virtual address, an offset from the image base.
//! - **VA** - absolute virtual address. VB metadata stores VAs; subtract the
//!   image base before lookup.
//!
//! The invariant `rva_to_offset(section.va + k) == section.raw_offset + k`
//! holds for every `k` within a section's virtual size.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use vbscope::File;
//!
//! let file = File::from_file(Path::new("program.exe"))?;
//! println!("image base 0x{:x}, {} sections", file.image_base(), file.sections().len());
//!
//! if file.has_vb_runtime_import() {
//!     println!("links against the VB runtime");
//! }
//! # Ok::<(), vbscope::Error>(())
//! ```

pub mod io;
pub mod parser;

mod memory;
mod physical;

use std::path::Path;

use crate::{
    Error::{Empty, NotSupported, OutOfBounds},
    Result,
};
use goblin::pe::PE;
use memory::Memory;
use physical::Physical;

/// PE32 optional-header magic.
const PE32_MAGIC: u16 = 0x10B;
/// `IMAGE_FILE_MACHINE_I386`.
const MACHINE_I386: u16 = 0x014C;

/// Backend trait for file data sources.
///
/// Abstracts over the source of PE data, allowing both in-memory buffers and
/// memory-mapped files. The backend only lives for the duration of
/// [`File::from_file`] / [`File::from_mem`]; after parsing, all data the
/// pipeline needs has been copied into the [`File`].
pub trait Backend: Send + Sync {
    /// Returns a bounds-checked slice of the data.
    ///
    /// # Errors
    /// Returns an error if the requested range is out of bounds.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]>;

    /// Returns the entire data buffer.
    fn data(&self) -> &[u8];

    /// Returns the total length of the data buffer.
    fn len(&self) -> usize;
}

/// An owned snapshot of one PE section.
///
/// Captured at load time so the image stays immutable and self-contained; the
/// `data` field holds `raw_size` bytes copied from `raw_offset` in the file.
#[derive(Debug, Clone)]
pub struct Section {
    /// Section name with trailing NULs stripped (e.g. `.text`, `.data`).
    pub name: String,
    /// RVA at which the section is mapped.
    pub virtual_address: u32,
    /// Size of the section once mapped.
    pub virtual_size: u32,
    /// File offset of the raw section bytes.
    pub raw_offset: u32,
    /// Number of raw bytes stored in the file.
    pub raw_size: u32,
    /// `IMAGE_SCN_*` characteristics flags.
    pub characteristics: u32,
    /// Snapshot of the raw section bytes.
    pub data: Vec<u8>,
}

impl Section {
    /// Returns true when `rva` falls inside this section's virtual range.
    #[must_use]
    pub fn contains_rva(&self, rva: u32) -> bool {
        rva >= self.virtual_address
            && u64::from(rva) < u64::from(self.virtual_address) + u64::from(self.virtual_size)
    }
}

/// One imported symbol, snapshotted from the PE import directory.
#[derive(Debug, Clone)]
pub struct Import {
    /// Name of the DLL the symbol is imported from.
    pub dll: String,
    /// Imported symbol name (empty for ordinal-only imports).
    pub name: String,
}

/// A loaded, validated PE32 image.
///
/// Immutable after parse. Construction fails for anything that is not a
/// PE32 / i386 binary, which is the only output the VB5/6 toolchain produces.
///
/// # Examples
///
/// ```rust,no_run
/// use vbscope::File;
///
/// let data = std::fs::read("program.exe")?;
/// let file = File::from_mem(data)?;
///
/// let text = file.section_by_name(".text").expect("no .text section");
/// println!(".text: rva=0x{:x} {} raw bytes", text.virtual_address, text.raw_size);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct File {
    image_base: u32,
    entry_point: u32,
    machine: u16,
    is_dll: bool,
    sections: Vec<Section>,
    imports: Vec<Import>,
}

impl File {
    /// Loads a PE file from the given path via a memory map.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid PE, or is
    /// not a PE32 / i386 image.
    pub fn from_file(file: &Path) -> Result<File> {
        let input = Physical::new(file)?;

        Self::load(&input)
    }

    /// Loads a PE file from a memory buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is empty, is not valid PE, or is not a
    /// PE32 / i386 image.
    pub fn from_mem(data: Vec<u8>) -> Result<File> {
        let input = Memory::new(data);

        Self::load(&input)
    }

    /// Internal loader for any backend.
    fn load<T: Backend>(input: &T) -> Result<File> {
        if input.len() == 0 {
            return Err(Empty);
        }

        let data = input.data();
        let pe = PE::parse(data)?;

        let Some(optional_header) = pe.header.optional_header else {
            return Err(malformed_error!("File does not have an optional header"));
        };

        // The VB6 compiler only ever emits PE32 for i386; everything else is
        // an unsupported architecture, not a malformed file.
        if optional_header.standard_fields.magic != PE32_MAGIC {
            return Err(NotSupported(format!(
                "optional-header magic 0x{:X} is not PE32 (0x10B)",
                optional_header.standard_fields.magic
            )));
        }

        let machine = pe.header.coff_header.machine;
        if machine != MACHINE_I386 {
            return Err(NotSupported(format!(
                "machine type 0x{machine:04X} is not IMAGE_FILE_MACHINE_I386 (0x014C)"
            )));
        }

        #[allow(clippy::cast_possible_truncation)]
        let image_base = optional_header.windows_fields.image_base as u32;
        #[allow(clippy::cast_possible_truncation)]
        let entry_point = optional_header.standard_fields.address_of_entry_point as u32;

        let mut sections = Vec::with_capacity(pe.sections.len());
        for section in &pe.sections {
            let raw_offset = section.pointer_to_raw_data as usize;
            let raw_size = section.size_of_raw_data as usize;
            let snapshot = if raw_size == 0 {
                Vec::new()
            } else {
                input.data_slice(raw_offset, raw_size)?.to_vec()
            };

            // Uninitialised-data sections report a zero virtual size in some
            // linkers; fall back to the raw size so RVA lookups still land.
            let virtual_size = if section.virtual_size == 0 {
                section.size_of_raw_data
            } else {
                section.virtual_size
            };

            sections.push(Section {
                name: section.name().map_or_else(
                    |_| String::from_utf8_lossy(&section.name).trim_end_matches('\0').to_string(),
                    |n| n.to_string(),
                ),
                virtual_address: section.virtual_address,
                virtual_size,
                raw_offset: section.pointer_to_raw_data,
                raw_size: section.size_of_raw_data,
                characteristics: section.characteristics,
                data: snapshot,
            });
        }

        let imports = pe
            .imports
            .iter()
            .map(|import| Import {
                dll: import.dll.to_string(),
                name: import.name.to_string(),
            })
            .collect();

        Ok(File {
            image_base,
            entry_point,
            machine,
            is_dll: pe.is_lib,
            sections,
            imports,
        })
    }

    /// Returns the preferred image base address.
    #[must_use]
    pub fn image_base(&self) -> u32 {
        self.image_base
    }

    /// Returns the entry-point RVA.
    #[must_use]
    pub fn entry_point(&self) -> u32 {
        self.entry_point
    }

    /// Returns the COFF machine type (always `0x014C` after validation).
    #[must_use]
    pub fn machine(&self) -> u16 {
        self.machine
    }

    /// Returns true for DLL / OCX images.
    #[must_use]
    pub fn is_dll(&self) -> bool {
        self.is_dll
    }

    /// Returns the section snapshots in header order.
    #[must_use]
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Finds a section by exact name.
    #[must_use]
    pub fn section_by_name(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Finds the unique section whose virtual range contains `rva`.
    #[must_use]
    pub fn section_by_rva(&self, rva: u32) -> Option<&Section> {
        self.sections.iter().find(|s| s.contains_rva(rva))
    }

    /// Translates an RVA to a file offset.
    ///
    /// # Errors
    /// Returns [`OutOfBounds`] when `rva` is not within any section.
    pub fn rva_to_offset(&self, rva: u32) -> Result<usize> {
        let section = self.section_by_rva(rva).ok_or(OutOfBounds)?;

        Ok(section.raw_offset as usize + (rva - section.virtual_address) as usize)
    }

    /// Reads up to `size` bytes at `rva` from the owning section's snapshot.
    ///
    /// The slice is clamped at the end of the section's raw data, so callers
    /// reading variable-length structures get whatever is physically present.
    ///
    /// # Errors
    /// Returns [`OutOfBounds`] when `rva` is not within any section or no raw
    /// bytes back it.
    pub fn read_at_rva(&self, rva: u32, size: usize) -> Result<&[u8]> {
        let section = self.section_by_rva(rva).ok_or(OutOfBounds)?;

        let start = (rva - section.virtual_address) as usize;
        if start >= section.data.len() {
            return Err(OutOfBounds);
        }

        let end = section.data.len().min(start.saturating_add(size));
        Ok(&section.data[start..end])
    }

    /// Returns the deduplicated list of imported DLL names.
    #[must_use]
    pub fn imported_dlls(&self) -> Vec<&str> {
        let mut dlls: Vec<&str> = Vec::new();
        for import in &self.imports {
            if !dlls.contains(&import.dll.as_str()) {
                dlls.push(&import.dll);
            }
        }
        dlls
    }

    /// Returns the symbols imported from one DLL (case-insensitive match).
    #[must_use]
    pub fn imports_from_dll(&self, dll: &str) -> Vec<&str> {
        self.imports
            .iter()
            .filter(|import| import.dll.eq_ignore_ascii_case(dll))
            .map(|import| import.name.as_str())
            .collect()
    }

    /// Returns true when the image imports an `msvbvm*.dll` runtime.
    ///
    /// This is the cheap "is this VB?" heuristic; the authoritative check is
    /// locating the `VB5!` header in [`crate::metadata::VbImage`].
    #[must_use]
    pub fn has_vb_runtime_import(&self) -> bool {
        self.imports
            .iter()
            .any(|import| import.dll.to_ascii_lowercase().starts_with("msvbvm"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input() {
        assert!(matches!(File::from_mem(Vec::new()), Err(Empty)));
    }

    #[test]
    fn not_a_pe() {
        let result = File::from_mem(vec![0u8; 128]);
        assert!(result.is_err());
    }

    #[test]
    fn section_rva_roundtrip() {
        let section = Section {
            name: ".data".to_string(),
            virtual_address: 0x2000,
            virtual_size: 0x100,
            raw_offset: 0x800,
            raw_size: 0x100,
            characteristics: 0,
            data: vec![0u8; 0x100],
        };
        let file = File {
            image_base: 0x40_0000,
            entry_point: 0,
            machine: MACHINE_I386,
            is_dll: false,
            sections: vec![section],
            imports: Vec::new(),
        };

        for k in [0u32, 1, 0x42, 0xFF] {
            assert_eq!(file.rva_to_offset(0x2000 + k).unwrap(), 0x800 + k as usize);
        }
        assert!(file.rva_to_offset(0x2100).is_err());
        assert!(file.rva_to_offset(0x1FFF).is_err());

        assert_eq!(file.read_at_rva(0x2000, 0x100).unwrap().len(), 0x100);
        // Clamped at the end of raw data.
        assert_eq!(file.read_at_rva(0x20F0, 0x100).unwrap().len(), 0x10);
    }
}
