//! P-Code opcode metadata.
//!
//! The VB P-Code instruction set was never published; this table is populated
//! empirically from runtime observation and prior decompiler research. An
//! instruction is one primary opcode byte, a secondary byte when the primary
//! is in the extended range `0xFB..=0xFF`, and operands driven by the format
//! string.
//!
//! # Format characters
//!
//! | char | operand |
//! |------|---------|
//! | `b`  | u8 |
//! | `%`  | i16 (also the type character for Integer) |
//! | `&`  | i32 (also Long) |
//! | `!`  | f32 literal (also Single) |
//! | `a`  | argument reference, i16 index |
//! | `l`  | local variable reference, i16 index |
//! | `c`  | control index, i16 |
//! | `v`  | vtable reference, i16 |
//! | `z`  | NUL-terminated UTF-16LE string literal |
//!
//! A type character (`%` `&` `!` `~` `z` `?` `b` `o`) directly after `a` or
//! `l` annotates that operand's data type without consuming instruction
//! bytes, so operand widths are static per opcode.
#![allow(clippy::too_many_lines)]

use super::instruction::InstructionCategory;

/// Lowest primary byte of the extended (two-byte) opcode range.
pub const EXTENDED_MIN: u8 = 0xFB;

/// Returns true when `opcode` needs a secondary opcode byte.
#[must_use]
pub fn is_extended(opcode: u8) -> bool {
    opcode >= EXTENDED_MIN
}

/// Static metadata for one opcode.
#[derive(Debug, Clone, Copy)]
pub struct OpcodeInfo {
    /// Primary opcode byte.
    pub opcode: u8,
    /// Secondary opcode byte, 0 for single-byte opcodes.
    pub ext_opcode: u8,
    /// Instruction mnemonic.
    pub mnemonic: &'static str,
    /// Operand format string.
    pub format: &'static str,
    /// Functional category.
    pub category: InstructionCategory,
    /// Net change in evaluation-stack depth.
    pub stack_delta: i8,
    /// Transfers control to another address.
    pub is_branch: bool,
    /// Branches only when the popped condition says so.
    pub is_conditional_branch: bool,
    /// Calls a procedure.
    pub is_call: bool,
    /// Ends the procedure.
    pub is_return: bool,
}

impl OpcodeInfo {
    const fn new(
        opcode: u8,
        ext_opcode: u8,
        mnemonic: &'static str,
        format: &'static str,
        category: InstructionCategory,
        stack_delta: i8,
    ) -> Self {
        OpcodeInfo {
            opcode,
            ext_opcode,
            mnemonic,
            format,
            category,
            stack_delta,
            is_branch: false,
            is_conditional_branch: false,
            is_call: false,
            is_return: false,
        }
    }

    const fn branch(mut self, conditional: bool) -> Self {
        self.is_branch = true;
        self.is_conditional_branch = conditional;
        self
    }

    const fn call(mut self) -> Self {
        self.is_call = true;
        self
    }

    const fn ret(mut self) -> Self {
        self.is_return = true;
        self
    }
}

use InstructionCategory as C;

/// Single-byte opcode table, sorted by opcode for binary search.
static OPCODES: &[OpcodeInfo] = &[
    // Statement boundaries emitted by the front end; no run-time effect.
    OpcodeInfo::new(0x00, 0, "LargeBos", "%", C::Stack, 0),
    OpcodeInfo::new(0x01, 0, "Bos", "b", C::Stack, 0),
    // Local variable loads, one per slot type.
    OpcodeInfo::new(0x04, 0, "LdLocI2", "l%", C::Variable, 1),
    OpcodeInfo::new(0x05, 0, "LdLocI4", "l&", C::Variable, 1),
    OpcodeInfo::new(0x06, 0, "LdLocR4", "l!", C::Variable, 1),
    OpcodeInfo::new(0x07, 0, "LdLocStr", "lz", C::Variable, 1),
    OpcodeInfo::new(0x08, 0, "LdLocVar", "l~", C::Variable, 1),
    // Local variable stores.
    OpcodeInfo::new(0x09, 0, "StLocI2", "l%", C::Variable, -1),
    OpcodeInfo::new(0x0A, 0, "StLocI4", "l&", C::Variable, -1),
    OpcodeInfo::new(0x0B, 0, "StLocR4", "l!", C::Variable, -1),
    OpcodeInfo::new(0x0C, 0, "StLocStr", "lz", C::Variable, -1),
    OpcodeInfo::new(0x0D, 0, "StLocVar", "l~", C::Variable, -1),
    // Argument access.
    OpcodeInfo::new(0x0E, 0, "LdArgI2", "a%", C::Variable, 1),
    OpcodeInfo::new(0x0F, 0, "LdArgI4", "a&", C::Variable, 1),
    OpcodeInfo::new(0x10, 0, "LdArgVar", "a~", C::Variable, 1),
    OpcodeInfo::new(0x11, 0, "StArgVar", "a~", C::Variable, -1),
    // Returns. `Ret` carries the function result on the stack.
    OpcodeInfo::new(0x12, 0, "Ret", "", C::ControlFlow, -1).ret(),
    OpcodeInfo::new(0x13, 0, "ExitProcHresult", "", C::ControlFlow, 0).ret(),
    OpcodeInfo::new(0x14, 0, "ExitProc", "", C::ControlFlow, 0).ret(),
    OpcodeInfo::new(0x15, 0, "ExitProcI4", "", C::ControlFlow, -1).ret(),
    OpcodeInfo::new(0x16, 0, "ExitProcStr", "", C::ControlFlow, -1).ret(),
    // Literal pushes.
    OpcodeInfo::new(0x1A, 0, "LitI2_Byte", "b", C::Stack, 1),
    OpcodeInfo::new(0x1B, 0, "LitStr", "z", C::Stack, 1),
    // Branches; the i16 operand is the offset from the following instruction.
    OpcodeInfo::new(0x1C, 0, "BranchF", "%", C::ControlFlow, -1).branch(true),
    OpcodeInfo::new(0x1D, 0, "BranchT", "%", C::ControlFlow, -1).branch(true),
    OpcodeInfo::new(0x1E, 0, "Branch", "%", C::ControlFlow, 0).branch(false),
    // Calls. Address-operand calls name the target by VA; `CallNamed*`
    // carry the callee name inline.
    OpcodeInfo::new(0x20, 0, "CallSub", "&", C::Call, 0).call(),
    OpcodeInfo::new(0x21, 0, "CallFuncVar", "&", C::Call, 1).call(),
    OpcodeInfo::new(0x22, 0, "CallI4", "&", C::Call, 1).call(),
    OpcodeInfo::new(0x23, 0, "CallNamedSub", "z", C::Call, 0).call(),
    OpcodeInfo::new(0x24, 0, "CallNamedFunc", "z", C::Call, 1).call(),
    OpcodeInfo::new(0x25, 0, "CallVtbl", "v", C::Call, 0).call(),
    // String runtime helpers.
    OpcodeInfo::new(0x2A, 0, "StrMove", "", C::String, 0),
    OpcodeInfo::new(0x2B, 0, "StrCopy", "", C::String, 0),
    OpcodeInfo::new(0x2C, 0, "StrFree", "l~", C::String, 0),
    // Array element access.
    OpcodeInfo::new(0x30, 0, "AryLdI2", "", C::Array, -1),
    OpcodeInfo::new(0x31, 0, "AryLdVar", "", C::Array, -1),
    OpcodeInfo::new(0x32, 0, "AryStI2", "", C::Array, -3),
    OpcodeInfo::new(0x33, 0, "AryStVar", "", C::Array, -3),
    // For/Next loop bookkeeping.
    OpcodeInfo::new(0x40, 0, "ForInitI2", "l%", C::Loop, -2),
    OpcodeInfo::new(0x41, 0, "ForStepI2", "l%", C::Loop, 0),
    OpcodeInfo::new(0x42, 0, "ForNextI2", "l%", C::Loop, 0).branch(true),
    // Memory management helpers.
    OpcodeInfo::new(0x50, 0, "MemLdI2", "&", C::Memory, 1),
    OpcodeInfo::new(0x51, 0, "MemStI2", "&", C::Memory, -1),
    OpcodeInfo::new(0x52, 0, "FFree1Ad", "l~", C::Memory, 0),
    OpcodeInfo::new(0x53, 0, "FFreeAd", "b", C::Memory, 0),
    // Control (form widget) access.
    OpcodeInfo::new(0x58, 0, "LdCtl", "c", C::Variable, 1),
    OpcodeInfo::new(0x59, 0, "StCtl", "c", C::Variable, -1),
    // Arithmetic, typed variants. All pop two and push one.
    OpcodeInfo::new(0xA0, 0, "AddI2", "", C::Arithmetic, -1),
    OpcodeInfo::new(0xA1, 0, "AddI4", "", C::Arithmetic, -1),
    OpcodeInfo::new(0xA2, 0, "AddR4", "", C::Arithmetic, -1),
    OpcodeInfo::new(0xA3, 0, "AddR8", "", C::Arithmetic, -1),
    OpcodeInfo::new(0xA4, 0, "SubI2", "", C::Arithmetic, -1),
    OpcodeInfo::new(0xA5, 0, "SubI4", "", C::Arithmetic, -1),
    OpcodeInfo::new(0xA6, 0, "SubR4", "", C::Arithmetic, -1),
    OpcodeInfo::new(0xA7, 0, "SubR8", "", C::Arithmetic, -1),
    OpcodeInfo::new(0xA8, 0, "MulI2", "", C::Arithmetic, -1),
    OpcodeInfo::new(0xA9, 0, "MulI4", "", C::Arithmetic, -1),
    OpcodeInfo::new(0xAA, 0, "MulR4", "", C::Arithmetic, -1),
    OpcodeInfo::new(0xAB, 0, "MulR8", "", C::Arithmetic, -1),
    OpcodeInfo::new(0xAC, 0, "DivR4", "", C::Arithmetic, -1),
    OpcodeInfo::new(0xAD, 0, "DivR8", "", C::Arithmetic, -1),
    OpcodeInfo::new(0xAE, 0, "IdivI2", "", C::Arithmetic, -1),
    OpcodeInfo::new(0xAF, 0, "IdivI4", "", C::Arithmetic, -1),
    OpcodeInfo::new(0xB0, 0, "ModI2", "", C::Arithmetic, -1),
    OpcodeInfo::new(0xB1, 0, "ModI4", "", C::Arithmetic, -1),
    OpcodeInfo::new(0xB2, 0, "ConcatStr", "", C::String, -1),
    // Comparisons. Pop two, push a Boolean.
    OpcodeInfo::new(0xC0, 0, "EqI2", "", C::Comparison, -1),
    OpcodeInfo::new(0xC1, 0, "EqI4", "", C::Comparison, -1),
    OpcodeInfo::new(0xC2, 0, "EqR8", "", C::Comparison, -1),
    OpcodeInfo::new(0xC3, 0, "EqStr", "", C::Comparison, -1),
    OpcodeInfo::new(0xC4, 0, "NeI2", "", C::Comparison, -1),
    OpcodeInfo::new(0xC5, 0, "NeI4", "", C::Comparison, -1),
    OpcodeInfo::new(0xC6, 0, "NeR8", "", C::Comparison, -1),
    OpcodeInfo::new(0xC7, 0, "NeStr", "", C::Comparison, -1),
    OpcodeInfo::new(0xC8, 0, "LtI2", "", C::Comparison, -1),
    OpcodeInfo::new(0xC9, 0, "LtI4", "", C::Comparison, -1),
    OpcodeInfo::new(0xCA, 0, "LtR8", "", C::Comparison, -1),
    OpcodeInfo::new(0xCB, 0, "LeI2", "", C::Comparison, -1),
    OpcodeInfo::new(0xCC, 0, "LeI4", "", C::Comparison, -1),
    OpcodeInfo::new(0xCD, 0, "LeR8", "", C::Comparison, -1),
    OpcodeInfo::new(0xCE, 0, "GtI2", "", C::Comparison, -1),
    OpcodeInfo::new(0xCF, 0, "GtI4", "", C::Comparison, -1),
    OpcodeInfo::new(0xD0, 0, "GtR8", "", C::Comparison, -1),
    OpcodeInfo::new(0xD1, 0, "GeI2", "", C::Comparison, -1),
    OpcodeInfo::new(0xD2, 0, "GeI4", "", C::Comparison, -1),
    OpcodeInfo::new(0xD3, 0, "GeR8", "", C::Comparison, -1),
    // Logical. `Not` is the only unary one.
    OpcodeInfo::new(0xD8, 0, "AndI4", "", C::Logical, -1),
    OpcodeInfo::new(0xD9, 0, "OrI4", "", C::Logical, -1),
    OpcodeInfo::new(0xDA, 0, "XorI4", "", C::Logical, -1),
    OpcodeInfo::new(0xDB, 0, "NotI4", "", C::Logical, 0),
    // Conversions between the numeric slots.
    OpcodeInfo::new(0xE0, 0, "CI2I4", "", C::Conversion, 0),
    OpcodeInfo::new(0xE1, 0, "CI4I2", "", C::Conversion, 0),
    OpcodeInfo::new(0xE2, 0, "CR8I4", "", C::Conversion, 0),
    OpcodeInfo::new(0xE3, 0, "CI4R8", "", C::Conversion, 0),
    OpcodeInfo::new(0xE4, 0, "CVarStr", "", C::Conversion, 0),
    // Literal pushes, wide forms.
    OpcodeInfo::new(0xF3, 0, "LitI2", "%", C::Stack, 1),
    OpcodeInfo::new(0xF4, 0, "LitR4", "!", C::Stack, 1),
    OpcodeInfo::new(0xF5, 0, "LitI4", "&", C::Stack, 1),
];

/// Extended opcode table, keyed by (primary, secondary), sorted.
static EXTENDED_OPCODES: &[OpcodeInfo] = &[
    // 0xFB page: currency and date arithmetic.
    OpcodeInfo::new(0xFB, 0x10, "AddCy", "", C::Arithmetic, -1),
    OpcodeInfo::new(0xFB, 0x11, "SubCy", "", C::Arithmetic, -1),
    OpcodeInfo::new(0xFB, 0x12, "MulCy", "", C::Arithmetic, -1),
    OpcodeInfo::new(0xFB, 0x13, "DivCy", "", C::Arithmetic, -1),
    OpcodeInfo::new(0xFB, 0x20, "EqCy", "", C::Comparison, -1),
    OpcodeInfo::new(0xFB, 0x21, "NeCy", "", C::Comparison, -1),
    OpcodeInfo::new(0xFB, 0x22, "LtCy", "", C::Comparison, -1),
    OpcodeInfo::new(0xFB, 0x23, "GtCy", "", C::Comparison, -1),
    // 0xFC page: wide variable access and structure fields.
    OpcodeInfo::new(0xFC, 0x0D, "LdLocR8", "l~", C::Variable, 1),
    OpcodeInfo::new(0xFC, 0x0E, "StLocR8", "l~", C::Variable, -1),
    OpcodeInfo::new(0xFC, 0x20, "LdField", "%", C::Memory, 0),
    OpcodeInfo::new(0xFC, 0x21, "StField", "%", C::Memory, -2),
    OpcodeInfo::new(0xFC, 0x30, "AryLd2D", "", C::Array, -2),
    OpcodeInfo::new(0xFC, 0x31, "ArySt2D", "", C::Array, -4),
    // 0xFD page: variant helpers.
    OpcodeInfo::new(0xFD, 0x40, "VarAdd", "", C::Arithmetic, -1),
    OpcodeInfo::new(0xFD, 0x41, "VarSub", "", C::Arithmetic, -1),
    OpcodeInfo::new(0xFD, 0x42, "VarMul", "", C::Arithmetic, -1),
    OpcodeInfo::new(0xFD, 0x43, "VarDiv", "", C::Arithmetic, -1),
    OpcodeInfo::new(0xFD, 0x50, "VarForInit", "l~", C::Loop, -2),
    OpcodeInfo::new(0xFD, 0x51, "VarForNext", "l~", C::Loop, 0).branch(true),
    // 0xFE page: late-bound member dispatch.
    OpcodeInfo::new(0xFE, 0x60, "MemLdVar", "z", C::Memory, 0),
    OpcodeInfo::new(0xFE, 0x61, "MemStVar", "z", C::Memory, -2),
    OpcodeInfo::new(0xFE, 0x64, "CallFuncVtbl", "v", C::Call, 1).call(),
    OpcodeInfo::new(0xFE, 0x65, "CallSubVtbl", "v", C::Call, 0).call(),
    // 0xFF page: wide exits and error handling.
    OpcodeInfo::new(0xFF, 0x10, "OnErrorGoto", "%", C::ControlFlow, 0),
    OpcodeInfo::new(0xFF, 0x11, "OnErrorResumeNext", "", C::ControlFlow, 0),
    OpcodeInfo::new(0xFF, 0x1C, "ExitProcCy", "", C::ControlFlow, -1).ret(),
    OpcodeInfo::new(0xFF, 0x1D, "ExitProcR8", "", C::ControlFlow, -1).ret(),
];

/// Looks up a single-byte opcode.
#[must_use]
pub fn opcode_info(opcode: u8) -> Option<&'static OpcodeInfo> {
    OPCODES
        .binary_search_by_key(&opcode, |info| info.opcode)
        .ok()
        .map(|index| &OPCODES[index])
}

/// Looks up an extended (two-byte) opcode.
#[must_use]
pub fn extended_opcode_info(primary: u8, secondary: u8) -> Option<&'static OpcodeInfo> {
    EXTENDED_OPCODES
        .binary_search_by_key(&(primary, secondary), |info| (info.opcode, info.ext_opcode))
        .ok()
        .map(|index| &EXTENDED_OPCODES[index])
}

/// Byte width of a format character's operand field, `None` for
/// variable-width (`z`) and for type annotation characters.
#[must_use]
pub fn format_char_width(ch: char) -> Option<usize> {
    match ch {
        'b' => Some(1),
        '%' | 'a' | 'l' | 'c' | 'v' => Some(2),
        '&' | '!' => Some(4),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_are_sorted_and_unique() {
        for window in OPCODES.windows(2) {
            assert!(
                window[0].opcode < window[1].opcode,
                "unsorted or duplicate opcode 0x{:02X}",
                window[1].opcode
            );
        }
        for window in EXTENDED_OPCODES.windows(2) {
            assert!(
                (window[0].opcode, window[0].ext_opcode)
                    < (window[1].opcode, window[1].ext_opcode),
                "unsorted or duplicate extended opcode 0x{:02X} 0x{:02X}",
                window[1].opcode,
                window[1].ext_opcode
            );
        }
    }

    #[test]
    fn no_single_byte_entries_in_extended_range() {
        for info in OPCODES {
            assert!(!is_extended(info.opcode), "0x{:02X} needs 2 bytes", info.opcode);
        }
        for info in EXTENDED_OPCODES {
            assert!(is_extended(info.opcode));
        }
    }

    #[test]
    fn lookups() {
        let lit = opcode_info(0xF5).unwrap();
        assert_eq!(lit.mnemonic, "LitI4");
        assert_eq!(lit.format, "&");
        assert_eq!(lit.stack_delta, 1);

        let add = opcode_info(0xA1).unwrap();
        assert_eq!(add.mnemonic, "AddI4");

        let ret = opcode_info(0x12).unwrap();
        assert!(ret.is_return);

        assert!(opcode_info(0x02).is_none());

        let vcall = extended_opcode_info(0xFE, 0x64).unwrap();
        assert_eq!(vcall.mnemonic, "CallFuncVtbl");
        assert!(vcall.is_call);
        assert!(extended_opcode_info(0xFE, 0x00).is_none());
    }

    #[test]
    fn branch_flags() {
        let branch_f = opcode_info(0x1C).unwrap();
        assert!(branch_f.is_branch && branch_f.is_conditional_branch);

        let branch = opcode_info(0x1E).unwrap();
        assert!(branch.is_branch && !branch.is_conditional_branch);
    }

    #[test]
    fn format_widths() {
        assert_eq!(format_char_width('b'), Some(1));
        assert_eq!(format_char_width('%'), Some(2));
        assert_eq!(format_char_width('&'), Some(4));
        assert_eq!(format_char_width('!'), Some(4));
        assert_eq!(format_char_width('z'), None);
        assert_eq!(format_char_width('~'), None);
    }
}
