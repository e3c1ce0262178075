//! P-Code instruction decoding.
//!
//! The decoder turns raw method-body bytes into [`Instruction`] records: one
//! primary opcode byte, a secondary byte for the extended range
//! `0xFB..=0xFF`, then operands driven by the opcode's format string.
//! Unknown opcodes produce an `Unknown`-category record carrying the opcode
//! byte(s) so listings can show them and downstream passes can skip them; a
//! hard failure is reserved for operands truncated by the end of the buffer.

use log::debug;

use super::{
    instruction::{
        Instruction, InstructionCategory, Operand, OperandKind, OperandValue, PCodeType,
    },
    opcodes::{extended_opcode_info, is_extended, opcode_info},
};
use crate::{Parser, Result};

/// Decodes one instruction at `*offset`, advancing the offset by exactly the
/// instruction's encoded length.
///
/// `address` is the virtual address of the instruction's first byte, used
/// for display and for resolving relative branches.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] when the buffer ends in the middle
/// of the instruction. Unknown opcodes are not an error.
pub fn decode_instruction(data: &[u8], offset: &mut usize, address: u32) -> Result<Instruction> {
    let start = *offset;
    let mut parser = Parser::new(data);
    parser.seek(start)?;

    let opcode = parser.read_le::<u8>()?;

    let info = if is_extended(opcode) {
        let secondary = parser.read_le::<u8>()?;
        match extended_opcode_info(opcode, secondary) {
            Some(info) => info,
            None => {
                debug!("unknown extended opcode 0x{opcode:02X} 0x{secondary:02X} at 0x{address:08X}");
                let instr = unknown_instruction(data, start, address, opcode, secondary, 2);
                *offset = start + 2;
                return Ok(instr);
            }
        }
    } else {
        match opcode_info(opcode) {
            Some(info) => info,
            None => {
                debug!("unknown opcode 0x{opcode:02X} at 0x{address:08X}");
                let instr = unknown_instruction(data, start, address, opcode, 0, 1);
                *offset = start + 1;
                return Ok(instr);
            }
        }
    };

    let mut instr = Instruction::from_info(address, info);
    decode_operands(&mut parser, info.format, &mut instr)?;

    #[allow(clippy::cast_possible_truncation)]
    let length = (parser.pos() - start) as u32;
    instr.length = length;
    instr.bytes = data[start..parser.pos()].to_vec();

    // Branch displacement is the instruction's inline integer operand,
    // relative to the end of the encoded instruction. Loop opcodes whose
    // first operand is a variable slot carry no displacement we can use.
    if instr.is_branch {
        instr.branch_offset = instr
            .operands
            .iter()
            .find(|operand| matches!(operand.kind, OperandKind::Int16 | OperandKind::Int32))
            .and_then(Operand::as_int)
            .and_then(|v| i32::try_from(v).ok());
    }

    *offset = parser.pos();
    Ok(instr)
}

fn unknown_instruction(
    data: &[u8],
    start: usize,
    address: u32,
    opcode: u8,
    ext_opcode: u8,
    length: u32,
) -> Instruction {
    Instruction {
        address,
        length,
        opcode,
        ext_opcode,
        mnemonic: "Unknown",
        category: InstructionCategory::Unknown,
        operands: Vec::new(),
        bytes: data[start..start + length as usize].to_vec(),
        stack_delta: 0,
        is_branch: false,
        is_conditional_branch: false,
        is_call: false,
        is_return: false,
        branch_offset: None,
    }
}

/// Decodes the operands of one instruction per its format string.
fn decode_operands(parser: &mut Parser<'_>, format: &str, instr: &mut Instruction) -> Result<()> {
    let mut chars = format.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            'b' => {
                let value = parser.read_le::<u8>()?;
                instr.operands.push(Operand {
                    kind: OperandKind::Byte,
                    value: OperandValue::Byte(value),
                    data_type: PCodeType::Byte,
                });
            }
            '%' => {
                let value = parser.read_le::<i16>()?;
                instr.operands.push(Operand {
                    kind: OperandKind::Int16,
                    value: OperandValue::Int16(value),
                    data_type: PCodeType::Integer,
                });
            }
            '&' => {
                let value = parser.read_le::<i32>()?;
                instr.operands.push(Operand {
                    kind: OperandKind::Int32,
                    value: OperandValue::Int32(value),
                    data_type: PCodeType::Long,
                });
            }
            '!' => {
                let value = parser.read_le::<f32>()?;
                instr.operands.push(Operand {
                    kind: OperandKind::Float,
                    value: OperandValue::Float(value),
                    data_type: PCodeType::Single,
                });
            }
            'z' => {
                let value = parser.read_string_utf16()?;
                instr.operands.push(Operand {
                    kind: OperandKind::String,
                    value: OperandValue::String(value),
                    data_type: PCodeType::String,
                });
            }
            'a' | 'l' => {
                let index = parser.read_le::<i16>()?;

                // A type character directly after `a`/`l` annotates the slot
                // without consuming instruction bytes.
                let data_type = chars
                    .peek()
                    .copied()
                    .and_then(PCodeType::from_type_char)
                    .map_or(PCodeType::Variant, |t| {
                        chars.next();
                        t
                    });

                instr.operands.push(Operand {
                    kind: if ch == 'a' {
                        OperandKind::Argument
                    } else {
                        OperandKind::Local
                    },
                    value: OperandValue::Int16(index),
                    data_type,
                });
            }
            'c' => {
                let index = parser.read_le::<i16>()?;
                instr.operands.push(Operand {
                    kind: OperandKind::Control,
                    value: OperandValue::Int16(index),
                    data_type: PCodeType::Object,
                });
            }
            'v' => {
                let index = parser.read_le::<i16>()?;
                instr.operands.push(Operand {
                    kind: OperandKind::VTable,
                    value: OperandValue::Int16(index),
                    data_type: PCodeType::Object,
                });
            }
            // Stray type characters in a format are annotations for the
            // preceding operand; nothing to consume.
            _ => {}
        }
    }

    Ok(())
}

/// Disassembles from the start of `data` until the buffer is exhausted or an
/// instruction is truncated.
#[must_use]
pub fn disassemble(data: &[u8], address: u32) -> Vec<Instruction> {
    let mut instructions = Vec::new();
    let mut offset = 0;

    while offset < data.len() {
        #[allow(clippy::cast_possible_truncation)]
        let va = address.wrapping_add(offset as u32);
        match decode_instruction(data, &mut offset, va) {
            Ok(instr) => instructions.push(instr),
            Err(_) => {
                debug!("truncated instruction at 0x{va:08X}; stopping disassembly");
                break;
            }
        }
    }

    instructions
}

/// Disassembles one procedure: stops after the first returning instruction
/// (`Ret`, `ExitProc`, `ExitProcHresult`, ...) or at the end of the buffer.
#[must_use]
pub fn disassemble_procedure(data: &[u8], address: u32) -> Vec<Instruction> {
    let mut instructions = Vec::new();
    let mut offset = 0;

    while offset < data.len() {
        #[allow(clippy::cast_possible_truncation)]
        let va = address.wrapping_add(offset as u32);
        match decode_instruction(data, &mut offset, va) {
            Ok(instr) => {
                let done = instr.is_return;
                instructions.push(instr);
                if done {
                    break;
                }
            }
            Err(_) => {
                debug!("truncated instruction at 0x{va:08X}; stopping disassembly");
                break;
            }
        }
    }

    instructions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_literal_i4() {
        // LitI4 10
        let data = [0xF5, 0x0A, 0x00, 0x00, 0x00];
        let mut offset = 0;
        let instr = decode_instruction(&data, &mut offset, 0x1000).unwrap();

        assert_eq!(offset, 5);
        assert_eq!(instr.length, 5);
        assert_eq!(instr.mnemonic, "LitI4");
        assert_eq!(instr.bytes, data);
        assert_eq!(instr.operands.len(), 1);
        assert_eq!(instr.operands[0].as_int(), Some(10));
        assert_eq!(instr.to_string(), "LitI4 0x0000000A");
    }

    #[test]
    fn decode_local_with_type_char() {
        // LdLocStr local_2 - format "lz": the z annotates, it is not decoded
        let data = [0x07, 0x02, 0x00];
        let mut offset = 0;
        let instr = decode_instruction(&data, &mut offset, 0).unwrap();

        assert_eq!(instr.length, 3);
        assert_eq!(instr.operands.len(), 1);
        assert_eq!(instr.operands[0].kind, OperandKind::Local);
        assert_eq!(instr.operands[0].data_type, PCodeType::String);
    }

    #[test]
    fn decode_string_literal() {
        // LitStr "Hi"
        let data = [0x1B, 0x48, 0x00, 0x69, 0x00, 0x00, 0x00];
        let mut offset = 0;
        let instr = decode_instruction(&data, &mut offset, 0).unwrap();

        assert_eq!(instr.length, 7);
        assert_eq!(
            instr.operands[0].value,
            OperandValue::String("Hi".to_string())
        );
    }

    #[test]
    fn decode_branch_offset() {
        // Branch -6 at 0x1000, length 3: target = 0x1000 + 3 - 6 = 0xFFD
        let data = [0x1E, 0xFA, 0xFF];
        let mut offset = 0;
        let instr = decode_instruction(&data, &mut offset, 0x1000).unwrap();

        assert!(instr.is_branch && !instr.is_conditional_branch);
        assert_eq!(instr.branch_offset, Some(-6));
        assert_eq!(instr.branch_target(), Some(0xFFD));
    }

    #[test]
    fn unknown_opcode_is_not_fatal() {
        let data = [0x02, 0xF5, 0x01, 0x00, 0x00, 0x00];
        let instructions = disassemble(&data, 0);

        assert_eq!(instructions.len(), 2);
        assert_eq!(instructions[0].category, InstructionCategory::Unknown);
        assert_eq!(instructions[0].length, 1);
        assert_eq!(instructions[1].mnemonic, "LitI4");
    }

    #[test]
    fn unknown_extended_opcode_consumes_both_bytes() {
        let data = [0xFE, 0x00, 0x14];
        let instructions = disassemble(&data, 0);

        assert_eq!(instructions.len(), 2);
        assert_eq!(instructions[0].category, InstructionCategory::Unknown);
        assert_eq!(instructions[0].opcode, 0xFE);
        assert_eq!(instructions[0].ext_opcode, 0x00);
        assert_eq!(instructions[0].length, 2);
        assert_eq!(instructions[1].mnemonic, "ExitProc");
    }

    #[test]
    fn procedure_stops_at_return() {
        // AddI4; ExitProc; LitI4 1 (dead)
        let data = [0xA1, 0x14, 0xF5, 0x01, 0x00, 0x00, 0x00];
        let instructions = disassemble_procedure(&data, 0);

        assert_eq!(instructions.len(), 2);
        assert_eq!(instructions[1].mnemonic, "ExitProc");
    }

    #[test]
    fn cursor_advance_matches_length() {
        let data = [
            0xF5, 0x0A, 0x00, 0x00, 0x00, // LitI4 10
            0xF3, 0x05, 0x00, // LitI2 5
            0xA1, // AddI4
            0x12, // Ret
        ];
        let mut offset = 0;
        let mut total = 0u32;
        while offset < data.len() {
            let before = offset;
            let instr = decode_instruction(&data, &mut offset, total).unwrap();
            assert_eq!(offset - before, instr.length as usize);
            assert_eq!(instr.bytes.len(), instr.length as usize);
            total += instr.length;
        }
        assert_eq!(total as usize, data.len());
    }

    #[test]
    fn truncated_operand_is_an_error() {
        let data = [0xF5, 0x0A]; // LitI4 missing 3 bytes
        let mut offset = 0;
        assert!(decode_instruction(&data, &mut offset, 0).is_err());
    }
}
