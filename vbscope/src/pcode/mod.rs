//! VB P-Code disassembly.
//!
//! P-Code is the stack-based bytecode the MSVBVM runtime interprets. The
//! instruction set was never published, so the opcode table in [`opcodes`]
//! is populated empirically; encodings it does not know decode to
//! `Unknown`-category records instead of failing, and are reported with
//! their opcode byte(s).
//!
//! # Example
//!
//! ```rust
//! use vbscope::pcode;
//!
//! // LitI4 10; LitI4 20; AddI4; Ret
//! let body = [
//!     0xF5, 0x0A, 0x00, 0x00, 0x00,
//!     0xF5, 0x14, 0x00, 0x00, 0x00,
//!     0xA1,
//!     0x12,
//! ];
//! let instructions = pcode::disassemble_procedure(&body, 0x1000);
//! assert_eq!(instructions.len(), 4);
//! assert_eq!(instructions[2].mnemonic, "AddI4");
//! assert!(instructions[3].is_return);
//! ```

pub mod decoder;
pub mod instruction;
pub mod opcodes;

pub use decoder::{decode_instruction, disassemble, disassemble_procedure};
pub use instruction::{
    Instruction, InstructionCategory, Operand, OperandKind, OperandValue, PCodeType,
};
pub use opcodes::{extended_opcode_info, is_extended, opcode_info, OpcodeInfo};
