use std::path::Path;

use anyhow::Context;
use vbscope::x86;

use crate::output::rule;

pub fn run(path: &Path, rva: Option<u32>, len: usize) -> anyhow::Result<()> {
    let file = super::load_file(path)?;

    let rva = rva.unwrap_or_else(|| file.entry_point());
    let bytes = file
        .read_at_rva(rva, len)
        .with_context(|| format!("rva 0x{rva:08X} is not mapped by any section"))?;

    rule(&format!("x86 at rva 0x{rva:08X} ({} bytes)", bytes.len()));
    let va = file.image_base().wrapping_add(rva);
    for instr in x86::disassemble(bytes, va, 0) {
        println!("0x{:08X}  {:<24}  {}", instr.address, instr.bytes_hex(), instr);
    }

    Ok(())
}
