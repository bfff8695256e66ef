//! CIL (Common Intermediate Language) instruction decoding and re-encoding.
//!
//! This module turns raw method bytecode into a sequence of [`Instruction`] values and
//! back again. Every instruction keeps the operand kind of the opcode it came from, so a
//! stream can be re-emitted with its tokens rewritten while every offset and branch
//! delta stays exactly where it was.
//!
//! # Key Types
//! - [`Instruction`] - A decoded CIL instruction
//! - [`Operand`] - Instruction operands (immediates, tokens, targets)
//! - [`OperandType`] - The ECMA-335 operand kind of an opcode
//! - [`FlowType`] - How instructions affect control flow
//! - [`InstructionStream`] - Restartable iterator over a bytecode buffer
//!
//! # Main Functions
//! - [`decode_instruction`] - Decode a single instruction
//! - [`decode_stream`] - Decode a sequence of instructions
//! - [`encode_instruction`] / [`encode_stream`] - Re-emit instructions width-preserving
//!
//! # Example
//! ```rust
//! use cildetour::disassembler::{decode_stream, encode_stream};
//! use cildetour::Parser;
//!
//! let bytecode = [0x02, 0x03, 0x58, 0x2A]; // ldarg.0, ldarg.1, add, ret
//! let mut parser = Parser::new(&bytecode);
//! let instructions = decode_stream(&mut parser)?;
//! assert_eq!(instructions[2].to_string(), "IL_0002: add");
//! assert_eq!(encode_stream(&instructions)?, bytecode);
//! # Ok::<(), cildetour::Error>(())
//! ```

mod decoder;
mod encoder;
mod instruction;
mod instructions;

pub use decoder::{decode_instruction, decode_stream, InstructionStream};
pub use encoder::{encode_instruction, encode_stream};
pub use instruction::{FlowType, Immediate, Instruction, Operand, OperandType};
pub use instructions::*;
