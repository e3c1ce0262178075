use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// vbscope - Visual Basic 5/6 executable inspection and decompilation
#[derive(Debug, Parser)]
#[command(name = "vbscope", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared across all subcommands.
#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Emit output as JSON instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose (debug-level) logging output.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Display PE structure, VB header, project info, objects and methods.
    Info {
        /// Path to the VB executable (.exe, .dll, .ocx).
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },

    /// Disassemble P-Code method bodies.
    Disasm {
        /// Path to the VB executable.
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Only methods of this object.
        #[arg(short, long)]
        object: Option<String>,

        /// Only methods with this name.
        #[arg(short, long)]
        method: Option<String>,

        /// Show raw instruction bytes.
        #[arg(short, long)]
        bytes: bool,
    },

    /// Disassemble native x86 code.
    X86 {
        /// Path to the executable.
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Start RVA (defaults to the entry point).
        #[arg(long, value_parser = parse_hex_or_dec)]
        rva: Option<u32>,

        /// Number of bytes to disassemble.
        #[arg(long, default_value_t = 64)]
        len: usize,
    },

    /// Decompile to VB6 source.
    Decompile {
        /// Path to the VB executable.
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Write the source to a file instead of stdout.
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,

        /// Emit labelled blocks with gotos instead of structured control flow.
        #[arg(long)]
        no_structure: bool,
    },

    /// Check whether an executable is wrapped in a known packer.
    Packer {
        /// Path to the executable.
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
}

/// Accepts `0x1000` and `4096` alike.
fn parse_hex_or_dec(value: &str) -> Result<u32, String> {
    let parsed = if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        value.parse()
    };
    parsed.map_err(|e| format!("invalid address '{value}': {e}"))
}
