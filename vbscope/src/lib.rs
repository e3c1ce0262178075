//! # vbscope
//!
//! Analysis and decompilation of Visual Basic 5/6 executables.
//!
//! VB5/6 compiles either to **P-Code** - a stack-based bytecode executed by
//! the MSVBVM runtime - or to native x86. This library parses the PE
//! container, walks the VB runtime metadata behind the `VB5!` signature to
//! enumerate objects and methods, disassembles both encodings, lifts P-Code
//! to a typed intermediate representation, recovers structured control flow
//! and types, and emits readable VB6 source text.
//!
//! ```text
//! bytes -> File (PE) -> VbImage (VB5! metadata) -> per method:
//!     P-Code decode -> IR lift (CFG) -> structure + type recovery -> VB6 text
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use vbscope::Decompiler;
//!
//! let decompiler = Decompiler::new();
//! let result = decompiler.decompile_file("program.exe")?;
//! println!("{}", result.vb6_source);
//! # Ok::<(), vbscope::Error>(())
//! ```
//!
//! # Modules
//!
//! - [`file`] - PE container parsing, section snapshots, byte-level [`Parser`]
//! - [`metadata`] - VB header, project info, object table, method extraction
//! - [`pcode`] - P-Code instruction decoder
//! - [`x86`] - 32-bit x86 instruction decoder (ModR/M + SIB)
//! - [`ir`] - typed three-address IR and the P-Code lifter
//! - [`decompiler`] - control-flow structuring, type recovery, VB6 emission
//! - [`ffi`] - handle-based C boundary for host UIs
//!
//! Emitted source is for study; recompilability is not a goal. Packed or
//! encrypted binaries are detected ([`metadata::packer`]) but not unpacked.

#![warn(missing_docs)]

#[macro_use]
mod error;

pub mod decompiler;
pub mod ffi;
pub mod file;
pub mod ir;
pub mod metadata;
pub mod pcode;
pub mod x86;

pub use decompiler::{DecompilationResult, Decompiler};
pub use error::Error;
pub use file::{parser::Parser, File, Section};
pub use metadata::VbImage;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
