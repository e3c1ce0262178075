mod app;
mod commands;
mod output;

use clap::Parser;

use crate::app::{Cli, Command};

fn main() -> anyhow::Result<()> {
    ctrlc::set_handler(|| {
        eprintln!("\nCancelled.");
        std::process::exit(130);
    })
    .expect("failed to set Ctrl+C handler");

    let cli = Cli::parse();

    // Show vbscope info+ on stderr unless --json; --verbose enables debug; RUST_LOG overrides
    if !cli.global.json {
        let level = if cli.global.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        env_logger::Builder::new()
            .filter_module("vbscope", level)
            .parse_default_env()
            .target(env_logger::Target::Stderr)
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .init();
    }

    match &cli.command {
        Command::Info { path } => commands::info::run(path, &cli.global),
        Command::Disasm {
            path,
            object,
            method,
            bytes,
        } => commands::disasm::run(path, object.as_deref(), method.as_deref(), *bytes),
        Command::X86 { path, rva, len } => commands::x86::run(path, *rva, *len),
        Command::Decompile {
            path,
            output,
            no_structure,
        } => commands::decompile::run(path, output.as_deref(), *no_structure),
        Command::Packer { path } => commands::packer::run(path, &cli.global),
    }
}
