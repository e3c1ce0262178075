//! Decoded P-Code instruction representation.
//!
//! A [`Instruction`] aggregates everything the rest of the pipeline needs
//! from one decoded P-Code instruction: location, identity, operands, stack
//! effect and control-flow behavior. Instances are immutable once built by
//! the decoder.

use std::fmt;

use super::opcodes::OpcodeInfo;

/// P-Code data type annotations, from the type characters of the format
/// strings (`%` `&` `!` `~` `z` `?` `b` `o`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PCodeType {
    /// No annotation present.
    Unknown,
    /// `b` - 8-bit unsigned.
    Byte,
    /// `?` - Boolean.
    Boolean,
    /// `%` - 16-bit integer.
    Integer,
    /// `&` - 32-bit integer.
    Long,
    /// `!` - 32-bit float.
    Single,
    /// `~` - Variant.
    Variant,
    /// `z` - String.
    String,
    /// `o` - object reference.
    Object,
}

impl PCodeType {
    /// Maps a type character to its annotation, `None` for non-type chars.
    #[must_use]
    pub fn from_type_char(ch: char) -> Option<PCodeType> {
        match ch {
            '%' => Some(PCodeType::Integer),
            '&' => Some(PCodeType::Long),
            '!' => Some(PCodeType::Single),
            '~' => Some(PCodeType::Variant),
            'z' => Some(PCodeType::String),
            '?' => Some(PCodeType::Boolean),
            'b' => Some(PCodeType::Byte),
            'o' => Some(PCodeType::Object),
            _ => None,
        }
    }
}

/// What role an operand plays in its instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// Inline 8-bit value.
    Byte,
    /// Inline 16-bit value.
    Int16,
    /// Inline 32-bit value.
    Int32,
    /// Inline 32-bit float.
    Float,
    /// Inline string literal.
    String,
    /// Local variable slot index.
    Local,
    /// Argument slot index.
    Argument,
    /// Control (form widget) index.
    Control,
    /// VTable reference.
    VTable,
}

/// An operand's decoded value.
#[derive(Debug, Clone, PartialEq)]
pub enum OperandValue {
    /// 8-bit payload.
    Byte(u8),
    /// 16-bit payload (also slot indices).
    Int16(i16),
    /// 32-bit payload (also code addresses).
    Int32(i32),
    /// 32-bit float payload.
    Float(f32),
    /// String payload, converted from UTF-16LE.
    String(String),
}

/// One decoded operand: role, payload, and data type annotation.
#[derive(Debug, Clone, PartialEq)]
pub struct Operand {
    /// The operand's role.
    pub kind: OperandKind,
    /// The decoded payload.
    pub value: OperandValue,
    /// Data type annotation from the format string, when present.
    pub data_type: PCodeType,
}

impl Operand {
    /// The payload as an i64, `None` for strings and floats.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match &self.value {
            OperandValue::Byte(v) => Some(i64::from(*v)),
            OperandValue::Int16(v) => Some(i64::from(*v)),
            OperandValue::Int32(v) => Some(i64::from(*v)),
            OperandValue::Float(_) | OperandValue::String(_) => None,
        }
    }

    /// The payload as a slot index, `None` when negative or non-integer.
    #[must_use]
    pub fn as_index(&self) -> Option<u32> {
        self.as_int().and_then(|v| u32::try_from(v).ok())
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.kind, &self.value) {
            (OperandKind::Local, OperandValue::Int16(v)) => write!(f, "local_{v}"),
            (OperandKind::Argument, OperandValue::Int16(v)) => write!(f, "arg_{v}"),
            (OperandKind::Control, OperandValue::Int16(v)) => write!(f, "ctl_{v}"),
            (OperandKind::VTable, OperandValue::Int16(v)) => write!(f, "vtbl_{v}"),
            (_, OperandValue::Byte(v)) => write!(f, "0x{v:02X}"),
            (_, OperandValue::Int16(v)) => write!(f, "{v}"),
            (_, OperandValue::Int32(v)) => write!(f, "0x{v:08X}"),
            (_, OperandValue::Float(v)) => write!(f, "{v}"),
            (_, OperandValue::String(s)) => write!(f, "\"{s}\""),
        }
    }
}

/// Functional grouping of P-Code opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionCategory {
    /// Branch, return, exit.
    ControlFlow,
    /// Literal pushes and stack shuffling.
    Stack,
    /// Local / argument / control load and store.
    Variable,
    /// Procedure and method calls.
    Call,
    /// String runtime helpers.
    String,
    /// Array element access.
    Array,
    /// For/Next bookkeeping.
    Loop,
    /// Memory management helpers.
    Memory,
    /// Arithmetic.
    Arithmetic,
    /// Boolean connectives.
    Logical,
    /// Relational operators.
    Comparison,
    /// Numeric and variant conversions.
    Conversion,
    /// Unrecognised encoding.
    Unknown,
}

impl InstructionCategory {
    /// Short lowercase label for listings.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            InstructionCategory::ControlFlow => "control",
            InstructionCategory::Stack => "stack",
            InstructionCategory::Variable => "variable",
            InstructionCategory::Call => "call",
            InstructionCategory::String => "string",
            InstructionCategory::Array => "array",
            InstructionCategory::Loop => "loop",
            InstructionCategory::Memory => "memory",
            InstructionCategory::Arithmetic => "arithmetic",
            InstructionCategory::Logical => "logical",
            InstructionCategory::Comparison => "comparison",
            InstructionCategory::Conversion => "conversion",
            InstructionCategory::Unknown => "unknown",
        }
    }
}

/// A fully decoded P-Code instruction.
#[derive(Debug, Clone)]
pub struct Instruction {
    /// Virtual address of the first byte.
    pub address: u32,
    /// Encoded length in bytes.
    pub length: u32,
    /// Primary opcode byte.
    pub opcode: u8,
    /// Secondary opcode byte, 0 unless the primary is `0xFB..=0xFF`.
    pub ext_opcode: u8,
    /// Mnemonic, `"Unknown"` for unrecognised encodings.
    pub mnemonic: &'static str,
    /// Functional category.
    pub category: InstructionCategory,
    /// Decoded operands in format-string order.
    pub operands: Vec<Operand>,
    /// Raw instruction bytes.
    pub bytes: Vec<u8>,
    /// Net evaluation-stack depth change.
    pub stack_delta: i8,
    /// Transfers control.
    pub is_branch: bool,
    /// Branches only on a popped condition.
    pub is_conditional_branch: bool,
    /// Calls a procedure.
    pub is_call: bool,
    /// Ends the procedure.
    pub is_return: bool,
    /// Relative branch displacement from the end of this instruction.
    pub branch_offset: Option<i32>,
}

impl Instruction {
    /// Builds an instruction skeleton from opcode metadata; the decoder
    /// fills in operands, length and raw bytes.
    #[must_use]
    pub fn from_info(address: u32, info: &OpcodeInfo) -> Self {
        Instruction {
            address,
            length: 0,
            opcode: info.opcode,
            ext_opcode: info.ext_opcode,
            mnemonic: info.mnemonic,
            category: info.category,
            operands: Vec::new(),
            bytes: Vec::new(),
            stack_delta: info.stack_delta,
            is_branch: info.is_branch,
            is_conditional_branch: info.is_conditional_branch,
            is_call: info.is_call,
            is_return: info.is_return,
            branch_offset: None,
        }
    }

    /// True when this is an extended (two-byte) encoding.
    #[must_use]
    pub fn is_extended(&self) -> bool {
        super::opcodes::is_extended(self.opcode)
    }

    /// Absolute branch target: `address + length + branch_offset`.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn branch_target(&self) -> Option<u32> {
        self.branch_offset.map(|offset| {
            self.address
                .wrapping_add(self.length)
                .wrapping_add(offset as u32)
        })
    }

    /// Raw bytes as spaced uppercase hex.
    #[must_use]
    pub fn bytes_hex(&self) -> String {
        self.bytes
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic)?;

        if self.is_branch {
            if let Some(target) = self.branch_target() {
                return write!(f, " 0x{target:08X}");
            }
        }

        for (i, operand) in self.operands.iter().enumerate() {
            if i == 0 {
                write!(f, " ")?;
            } else {
                write!(f, ", ")?;
            }
            write!(f, "{operand}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_target_arithmetic() {
        let info = crate::pcode::opcodes::opcode_info(0x1E).unwrap();
        let mut instr = Instruction::from_info(0x1000, info);
        instr.length = 3;
        instr.branch_offset = Some(-8);
        assert_eq!(instr.branch_target(), Some(0xFFB));

        instr.branch_offset = Some(5);
        assert_eq!(instr.branch_target(), Some(0x1008));
    }

    #[test]
    fn operand_accessors() {
        let operand = Operand {
            kind: OperandKind::Local,
            value: OperandValue::Int16(7),
            data_type: PCodeType::Integer,
        };
        assert_eq!(operand.as_int(), Some(7));
        assert_eq!(operand.as_index(), Some(7));
        assert_eq!(operand.to_string(), "local_7");

        let negative = Operand {
            kind: OperandKind::Int16,
            value: OperandValue::Int16(-3),
            data_type: PCodeType::Unknown,
        };
        assert_eq!(negative.as_index(), None);
    }

    #[test]
    fn type_chars() {
        assert_eq!(PCodeType::from_type_char('%'), Some(PCodeType::Integer));
        assert_eq!(PCodeType::from_type_char('~'), Some(PCodeType::Variant));
        assert_eq!(PCodeType::from_type_char('o'), Some(PCodeType::Object));
        assert_eq!(PCodeType::from_type_char('x'), None);
    }
}
