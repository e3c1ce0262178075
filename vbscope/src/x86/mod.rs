//! 32-bit x86 disassembly.
//!
//! A hand-written partial decoder for the instruction mix the VB6 native
//! compiler produces. Native methods are disassembled for listings only;
//! lifting x86 to the IR is out of scope, so a native image decompiles to
//! annotated disassembly instead of VB6 source.
//!
//! # Example
//!
//! ```rust
//! use vbscope::x86;
//!
//! let code = [0xB8, 0x2A, 0x00, 0x00, 0x00, 0xC3]; // mov eax, 0x2A; ret
//! let instructions = x86::disassemble(&code, 0, 0);
//! assert_eq!(instructions.len(), 2);
//! assert_eq!(instructions[0].to_string(), "mov eax, 0x2A");
//! ```

pub mod decoder;
pub mod instruction;

pub use decoder::{decode_instruction, disassemble, disassemble_function};
pub use instruction::{Instruction, Memory, Opcode, Operand, Register};
