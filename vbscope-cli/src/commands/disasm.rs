use std::path::Path;

use anyhow::bail;
use vbscope::{pcode, x86};

use crate::output::rule;

pub fn run(
    path: &Path,
    object: Option<&str>,
    method: Option<&str>,
    show_bytes: bool,
) -> anyhow::Result<()> {
    let image = super::load_image(path)?;

    let methods: Vec<_> = image
        .methods()
        .into_iter()
        .filter(|m| object.is_none_or_matches(&m.object_name))
        .filter(|m| method.is_none_or_matches(&m.method_name))
        .collect();

    if methods.is_empty() {
        bail!("no methods match the given filters");
    }

    for descriptor in &methods {
        rule(&format!(
            "{}.{} ({} bytes at 0x{:08X})",
            descriptor.object_name,
            descriptor.method_name,
            descriptor.code_bytes.len(),
            descriptor.start_address
        ));

        if image.is_pcode() {
            for instr in
                pcode::disassemble_procedure(&descriptor.code_bytes, descriptor.start_address)
            {
                if show_bytes {
                    println!("0x{:08X}  {:<24}  {}", instr.address, instr.bytes_hex(), instr);
                } else {
                    println!("0x{:08X}  {}", instr.address, instr);
                }
            }
        } else {
            for instr in
                x86::disassemble_function(&descriptor.code_bytes, descriptor.start_address)
            {
                if show_bytes {
                    println!("0x{:08X}  {:<24}  {}", instr.address, instr.bytes_hex(), instr);
                } else {
                    println!("0x{:08X}  {}", instr.address, instr);
                }
            }
        }
        println!();
    }

    Ok(())
}

/// `None` matches everything; `Some` matches case-insensitively.
trait FilterExt {
    fn is_none_or_matches(&self, candidate: &str) -> bool;
}

impl FilterExt for Option<&str> {
    fn is_none_or_matches(&self, candidate: &str) -> bool {
        self.is_none() || self.is_some_and(|f| f.eq_ignore_ascii_case(candidate))
    }
}
