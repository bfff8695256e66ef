//! CIL instruction representation and operand types.
//!
//! This module defines the types the decoder produces and the encoder consumes. The
//! central [`crate::disassembler::Instruction`] keeps the exact operand kind of the
//! opcode it was decoded from, which is what allows the method cloner to re-emit every
//! instruction with the same byte width and only swap out metadata tokens.
//!
//! # Key Components
//!
//! - [`crate::disassembler::Instruction`] - A decoded instruction
//! - [`crate::disassembler::OperandType`] - The ECMA-335 operand kind of an opcode
//! - [`crate::disassembler::Operand`] - The decoded operand payload
//! - [`crate::disassembler::Immediate`] - Numeric immediates
//! - [`crate::disassembler::FlowType`] - Control flow behaviour

use std::fmt;

use crate::metadata::token::Token;

/// ECMA-335 operand kinds.
///
/// Unlike a purely numeric view of operands, the reference kinds are kept apart
/// (`String`, `Field`, `Method`, `Type`, `Tok`, `Sig`) because each of them has to be
/// translated through a different resolver call when code moves between scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    /// No operand present (`InlineNone`)
    None,
    /// Signed 1-byte branch offset (`ShortInlineBrTarget`)
    ShortBranchTarget,
    /// Signed 4-byte branch offset (`InlineBrTarget`)
    BranchTarget,
    /// Signed 1-byte immediate (`ShortInlineI`)
    Int8,
    /// Unsigned 1-byte argument or local index (`ShortInlineVar`)
    UInt8,
    /// Unsigned 2-byte argument or local index (`InlineVar`)
    UInt16,
    /// Signed 4-byte immediate (`InlineI`)
    Int32,
    /// Signed 8-byte immediate (`InlineI8`)
    Int64,
    /// 4-byte float (`ShortInlineR`)
    Float32,
    /// 8-byte float (`InlineR`)
    Float64,
    /// User string token (`InlineString`)
    String,
    /// Field token (`InlineField`)
    Field,
    /// Method or constructor token (`InlineMethod`)
    Method,
    /// Type token (`InlineType`)
    Type,
    /// Type, field or method token (`InlineTok`)
    Tok,
    /// Stand-alone signature token (`InlineSig`)
    Sig,
    /// Jump table: a `u32` count followed by that many `i32` offsets (`InlineSwitch`)
    Switch,
}

impl OperandType {
    /// Returns the size in bytes of this operand type.
    ///
    /// Returns `None` for [`OperandType::Switch`] whose size depends on its count.
    #[must_use]
    pub const fn size(&self) -> Option<usize> {
        match self {
            OperandType::None => Some(0),
            OperandType::ShortBranchTarget | OperandType::Int8 | OperandType::UInt8 => Some(1),
            OperandType::UInt16 => Some(2),
            OperandType::BranchTarget
            | OperandType::Int32
            | OperandType::Float32
            | OperandType::String
            | OperandType::Field
            | OperandType::Method
            | OperandType::Type
            | OperandType::Tok
            | OperandType::Sig => Some(4),
            OperandType::Int64 | OperandType::Float64 => Some(8),
            OperandType::Switch => None,
        }
    }

    /// Returns `true` if the operand is a metadata token.
    #[must_use]
    pub const fn is_token(&self) -> bool {
        matches!(
            self,
            OperandType::String
                | OperandType::Field
                | OperandType::Method
                | OperandType::Type
                | OperandType::Tok
                | OperandType::Sig
        )
    }
}

/// A numeric immediate embedded in an instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Immediate {
    /// Signed 8-bit immediate value
    Int8(i8),
    /// Unsigned 8-bit immediate value
    UInt8(u8),
    /// Unsigned 16-bit immediate value
    UInt16(u16),
    /// Signed 32-bit immediate value
    Int32(i32),
    /// Signed 64-bit immediate value
    Int64(i64),
    /// 32-bit floating point immediate value
    Float32(f32),
    /// 64-bit floating point immediate value
    Float64(f64),
}

impl From<Immediate> for u64 {
    fn from(val: Immediate) -> Self {
        match val {
            // For signed integers, we preserve the bit pattern
            #[allow(clippy::cast_sign_loss)]
            Immediate::Int8(value) => value as u64,
            Immediate::UInt8(value) => u64::from(value),
            Immediate::UInt16(value) => u64::from(value),
            #[allow(clippy::cast_sign_loss)]
            Immediate::Int32(value) => value as u64,
            #[allow(clippy::cast_sign_loss)]
            Immediate::Int64(value) => value as u64,
            Immediate::Float32(value) => u64::from(value.to_bits()),
            Immediate::Float64(value) => value.to_bits(),
        }
    }
}

impl fmt::Display for Immediate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Immediate::Int8(value) => write!(f, "{value}"),
            Immediate::UInt8(value) => write!(f, "{value}"),
            Immediate::UInt16(value) => write!(f, "{value}"),
            Immediate::Int32(value) => write!(f, "{value}"),
            Immediate::Int64(value) => write!(f, "{value}"),
            Immediate::Float32(value) => write!(f, "{value:?}"),
            Immediate::Float64(value) => write!(f, "{value:?}"),
        }
    }
}

/// A decoded operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand present
    None,
    /// Immediate value (constant or argument/local index embedded in the instruction)
    Immediate(Immediate),
    /// Short branch offset, relative to the end of the instruction
    ShortTarget(i8),
    /// Long branch offset, relative to the end of the instruction
    Target(i32),
    /// Metadata token reference
    Token(Token),
    /// Switch table with signed offsets relative to the end of the instruction
    Switch(Vec<i32>),
}

/// How an instruction affects control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Normal execution continues to next instruction
    Sequential,
    /// Conditional branch to another location
    ConditionalBranch,
    /// Always branches to another location (unconditional jump)
    UnconditionalBranch,
    /// Call to another method
    Call,
    /// Returns from current method
    Return,
    /// Multi-way branch (switch statement)
    Switch,
    /// Exception throwing
    Throw,
    /// End of finally, fault or filter block
    EndFinally,
    /// Leave protected region (try/catch/finally)
    Leave,
    /// Prefix that modifies the following instruction
    Prefix,
}

/// A decoded CIL instruction.
///
/// Offsets are relative to the start of the instruction stream; within one stream
/// every instruction starts exactly where the previous one ended.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Offset of the instruction within its stream
    pub offset: u64,
    /// Size of this instruction in bytes, opcode included
    pub size: u64,
    /// Primary opcode byte (the second byte for two-byte opcodes)
    pub opcode: u8,
    /// Prefix byte (0 if no prefix)
    pub prefix: u8,
    /// Human-readable instruction mnemonic (e.g., "add", "ldloc.s", "ret")
    pub mnemonic: &'static str,
    /// The operand kind declared by the opcode
    pub op_type: OperandType,
    /// How this instruction affects control flow
    pub flow_type: FlowType,
    /// The operand data for this instruction
    pub operand: Operand,
    /// Computed branch targets, as stream offsets
    pub branch_targets: Vec<u64>,
}

impl Instruction {
    /// Check if this instruction can transfer control to one of its branch targets.
    #[must_use]
    pub fn is_branch(&self) -> bool {
        matches!(
            self.flow_type,
            FlowType::ConditionalBranch
                | FlowType::UnconditionalBranch
                | FlowType::Switch
                | FlowType::Leave
        )
    }

    /// Check if control never falls through to the next instruction.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.flow_type,
            FlowType::Return
                | FlowType::Throw
                | FlowType::UnconditionalBranch
                | FlowType::Leave
                | FlowType::EndFinally
        )
    }

    /// The metadata token operand, if the opcode carries one.
    #[must_use]
    pub fn token(&self) -> Option<Token> {
        match self.operand {
            Operand::Token(token) => Some(token),
            _ => None,
        }
    }

    /// Offset of the instruction that follows this one.
    #[must_use]
    pub fn next_offset(&self) -> u64 {
        self.offset + self.size
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IL_{:04x}: {}", self.offset, self.mnemonic)?;

        match &self.operand {
            Operand::None => Ok(()),
            Operand::Immediate(imm) => write!(f, " {imm}"),
            Operand::Token(token) => write!(f, " {token}"),
            Operand::ShortTarget(_) | Operand::Target(_) => match self.branch_targets.first() {
                Some(target) => write!(f, " IL_{target:04x}"),
                None => Ok(()),
            },
            Operand::Switch(_) => {
                let labels: Vec<String> = self
                    .branch_targets
                    .iter()
                    .map(|target| format!("IL_{target:04x}"))
                    .collect();
                write!(f, " ({})", labels.join(", "))
            }
        }
    }
}
