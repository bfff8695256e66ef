//! CIL instruction decoding.
//!
//! Turns raw bytecode into [`crate::disassembler::Instruction`] values. Operand width
//! and layout are fully determined by the opcode tables in
//! [`crate::disassembler::instructions`], so decoding is a single linear pass without
//! any control flow analysis.
//!
//! # Key Components
//!
//! - [`crate::disassembler::decode_instruction`] - Decode one instruction at the parser position
//! - [`crate::disassembler::decode_stream`] - Decode everything up to the end of the buffer
//! - [`crate::disassembler::InstructionStream`] - Lazy, restartable iterator over a buffer
//!
//! # Usage Examples
//!
//! ```rust
//! use cildetour::{Parser, disassembler::{decode_instruction, decode_stream}};
//!
//! let code = [0x1F, 0x2A]; // ldc.i4.s 42
//! let mut parser = Parser::new(&code);
//! let instr = decode_instruction(&mut parser)?;
//! assert_eq!(instr.mnemonic, "ldc.i4.s");
//!
//! let code = [0x00, 0x2A]; // nop, ret
//! let mut parser = Parser::new(&code);
//! assert_eq!(decode_stream(&mut parser)?.len(), 2);
//! # Ok::<(), cildetour::Error>(())
//! ```

use crate::{
    disassembler::{
        CilInstruction, FlowType, Immediate, Instruction, Operand, OperandType, INSTRUCTIONS,
        INSTRUCTIONS_FE,
    },
    file::parser::Parser,
    metadata::token::Token,
    Error, Result,
};

/// First byte of the reserved two-byte opcode range.
const TWO_BYTE_LEAD: u8 = 0xF8;

/// Decode the instruction at the current parser position.
///
/// The instruction offset is the parser position before decoding. On success the parser
/// is left directly after the instruction.
///
/// # Errors
///
/// Returns [`crate::Error::MalformedBytecode`] if the bytes map to no known opcode, the
/// opcode is reserved, the buffer ends inside the instruction or a branch target lies
/// before the start of the stream.
pub fn decode_instruction(parser: &mut Parser) -> Result<Instruction> {
    let offset = parser.pos() as u64;

    let first_byte = read::<u8>(parser, offset)?;
    let (cil_instruction, prefix, opcode) = if first_byte >= TWO_BYTE_LEAD {
        let second_byte = read::<u8>(parser, offset)?;
        if first_byte != 0xFE {
            return Err(malformed_error!(
                "Invalid opcode {:02X} {:02X} at offset {}",
                first_byte,
                second_byte,
                offset
            ));
        }

        match INSTRUCTIONS_FE.get(second_byte as usize) {
            Some(instr) => (instr, 0xFE, second_byte),
            None => {
                return Err(malformed_error!(
                    "Invalid opcode FE {:02X} at offset {}",
                    second_byte,
                    offset
                ))
            }
        }
    } else {
        match INSTRUCTIONS.get(first_byte as usize) {
            Some(instr) => (instr, 0, first_byte),
            None => {
                return Err(malformed_error!(
                    "Invalid opcode {:02X} at offset {}",
                    first_byte,
                    offset
                ))
            }
        }
    };

    if cil_instruction.is_reserved() {
        return Err(malformed_error!(
            "Reserved opcode {:02X}{:02X} at offset {}",
            prefix,
            opcode,
            offset
        ));
    }

    let operand = read_operand(parser, cil_instruction, offset)?;
    let size = parser.pos() as u64 - offset;

    let mut instruction = Instruction {
        offset,
        size,
        opcode,
        prefix,
        mnemonic: cil_instruction.instr,
        op_type: cil_instruction.op_type,
        flow_type: cil_instruction.flow,
        operand,
        branch_targets: Vec::new(),
    };

    let next = instruction.next_offset();
    instruction.branch_targets = match &instruction.operand {
        Operand::ShortTarget(delta) => vec![branch_target(next, i64::from(*delta))?],
        Operand::Target(delta) => vec![branch_target(next, i64::from(*delta))?],
        Operand::Switch(deltas) => deltas
            .iter()
            .map(|delta| branch_target(next, i64::from(*delta)))
            .collect::<Result<Vec<u64>>>()?,
        _ => Vec::new(),
    };

    debug_assert!(
        instruction.branch_targets.is_empty()
            || matches!(
                instruction.flow_type,
                FlowType::ConditionalBranch
                    | FlowType::UnconditionalBranch
                    | FlowType::Switch
                    | FlowType::Leave
            )
    );

    Ok(instruction)
}

/// Decode every instruction from the current parser position to the end of the buffer.
///
/// # Errors
///
/// Returns [`crate::Error::MalformedBytecode`] on the first instruction that fails to
/// decode; nothing is returned for the instructions before it.
pub fn decode_stream(parser: &mut Parser) -> Result<Vec<Instruction>> {
    let mut instructions = Vec::new();
    while parser.has_more_data() {
        instructions.push(decode_instruction(parser)?);
    }

    Ok(instructions)
}

/// A lazy, restartable sequence of instructions over a bytecode buffer.
///
/// Iteration yields `Result<Instruction>`; after the first error the stream is exhausted
/// until [`InstructionStream::reset`] is called.
///
/// ```rust
/// use cildetour::disassembler::InstructionStream;
///
/// let code = [0x02, 0x03, 0x58, 0x2A]; // ldarg.0, ldarg.1, add, ret
/// let mut stream = InstructionStream::new(&code);
/// assert_eq!(stream.by_ref().count(), 4);
///
/// stream.reset();
/// let first = stream.next().unwrap()?;
/// assert_eq!(first.mnemonic, "ldarg.0");
/// # Ok::<(), cildetour::Error>(())
/// ```
#[derive(Clone)]
pub struct InstructionStream<'a> {
    parser: Parser<'a>,
    failed: bool,
}

impl<'a> InstructionStream<'a> {
    /// Create a stream positioned at offset 0 of `code`.
    #[must_use]
    pub fn new(code: &'a [u8]) -> Self {
        InstructionStream {
            parser: Parser::new(code),
            failed: false,
        }
    }

    /// Restart iteration from offset 0.
    pub fn reset(&mut self) {
        self.parser.reset();
        self.failed = false;
    }

    /// Offset of the next instruction to be decoded.
    #[must_use]
    pub fn position(&self) -> usize {
        self.parser.pos()
    }

    /// The underlying bytecode.
    #[must_use]
    pub fn code(&self) -> &'a [u8] {
        self.parser.data()
    }
}

impl Iterator for InstructionStream<'_> {
    type Item = Result<Instruction>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || !self.parser.has_more_data() {
            return None;
        }

        let result = decode_instruction(&mut self.parser);
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }
}

fn read_operand(
    parser: &mut Parser,
    cil_instruction: &CilInstruction,
    offset: u64,
) -> Result<Operand> {
    let operand = match cil_instruction.op_type {
        OperandType::None => Operand::None,
        OperandType::ShortBranchTarget => Operand::ShortTarget(read::<i8>(parser, offset)?),
        OperandType::BranchTarget => Operand::Target(read::<i32>(parser, offset)?),
        OperandType::Int8 => Operand::Immediate(Immediate::Int8(read(parser, offset)?)),
        OperandType::UInt8 => Operand::Immediate(Immediate::UInt8(read(parser, offset)?)),
        OperandType::UInt16 => Operand::Immediate(Immediate::UInt16(read(parser, offset)?)),
        OperandType::Int32 => Operand::Immediate(Immediate::Int32(read(parser, offset)?)),
        OperandType::Int64 => Operand::Immediate(Immediate::Int64(read(parser, offset)?)),
        OperandType::Float32 => Operand::Immediate(Immediate::Float32(read(parser, offset)?)),
        OperandType::Float64 => Operand::Immediate(Immediate::Float64(read(parser, offset)?)),
        OperandType::String
        | OperandType::Field
        | OperandType::Method
        | OperandType::Type
        | OperandType::Tok
        | OperandType::Sig => Operand::Token(Token::new(read::<u32>(parser, offset)?)),
        OperandType::Switch => {
            let case_count = read::<u32>(parser, offset)? as usize;
            // Bound the allocation by what the buffer can actually hold
            if case_count > parser.remaining() / 4 {
                return Err(malformed_error!(
                    "switch at offset {} declares {} targets, buffer holds {} bytes",
                    offset,
                    case_count,
                    parser.remaining()
                ));
            }

            let mut targets = Vec::with_capacity(case_count);
            for _ in 0..case_count {
                targets.push(read::<i32>(parser, offset)?);
            }
            Operand::Switch(targets)
        }
    };

    Ok(operand)
}

/// Reads one value, reporting a truncated buffer as malformed bytecode.
fn read<T: crate::file::io::CilIO>(parser: &mut Parser, offset: u64) -> Result<T> {
    parser.read_le::<T>().map_err(|error| match error {
        Error::OutOfBounds => malformed_error!("Truncated instruction at offset {}", offset),
        other => other,
    })
}

fn branch_target(next: u64, delta: i64) -> Result<u64> {
    next.checked_add_signed(delta).ok_or_else(|| {
        malformed_error!(
            "Branch target {} bytes from offset {} lies before the stream",
            delta,
            next
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_short_var() {
        // ldloc.s 16
        let mut parser = Parser::new(&[0x11, 0x10]);
        let result = decode_instruction(&mut parser).unwrap();

        assert_eq!(result.offset, 0);
        assert_eq!(result.size, 2);
        assert_eq!(result.opcode, 0x11);
        assert_eq!(result.prefix, 0);
        assert_eq!(result.mnemonic, "ldloc.s");
        assert_eq!(result.op_type, OperandType::UInt8);
        assert_eq!(result.operand, Operand::Immediate(Immediate::UInt8(0x10)));
    }

    #[test]
    fn decode_two_byte() {
        // ceq, then stloc 0x0102
        let mut parser = Parser::new(&[0xFE, 0x01, 0xFE, 0x0E, 0x02, 0x01]);

        let ceq = decode_instruction(&mut parser).unwrap();
        assert_eq!((ceq.prefix, ceq.opcode, ceq.size), (0xFE, 0x01, 2));
        assert_eq!(ceq.mnemonic, "ceq");

        let stloc = decode_instruction(&mut parser).unwrap();
        assert_eq!(stloc.offset, 2);
        assert_eq!(stloc.size, 4);
        assert_eq!(stloc.operand, Operand::Immediate(Immediate::UInt16(0x0102)));
    }

    #[test]
    fn decode_branches() {
        // br.s +2, brtrue -7 (back to 0)
        let code = [0x2B, 0x02, 0x00, 0x00, 0x3A, 0xF7, 0xFF, 0xFF, 0xFF];
        let mut parser = Parser::new(&code);
        let instrs = decode_stream(&mut parser).unwrap();

        assert_eq!(instrs[0].branch_targets, vec![4]);
        assert_eq!(instrs[0].flow_type, FlowType::UnconditionalBranch);
        assert_eq!(instrs[3].operand, Operand::Target(-9));
        assert_eq!(instrs[3].branch_targets, vec![0]);
        assert_eq!(instrs[3].flow_type, FlowType::ConditionalBranch);
    }

    #[test]
    fn decode_switch() {
        let code = [
            0x45, 0x02, 0x00, 0x00, 0x00, // switch (2 targets)
            0x00, 0x00, 0x00, 0x00, // +0
            0x01, 0x00, 0x00, 0x00, // +1
            0x00, 0x2A,
        ];
        let mut parser = Parser::new(&code);
        let switch = decode_instruction(&mut parser).unwrap();

        assert_eq!(switch.size, 13);
        assert_eq!(switch.operand, Operand::Switch(vec![0, 1]));
        assert_eq!(switch.branch_targets, vec![13, 14]);
        assert_eq!(switch.to_string(), "IL_0000: switch (IL_000d, IL_000e)");
    }

    #[test]
    fn decode_tokens() {
        let code = [0x72, 0x01, 0x00, 0x00, 0x70, 0xD0, 0x05, 0x00, 0x00, 0x02];
        let mut parser = Parser::new(&code);
        let instrs = decode_stream(&mut parser).unwrap();

        assert_eq!(instrs[0].op_type, OperandType::String);
        assert_eq!(instrs[0].token(), Some(Token::new(0x7000_0001)));
        assert_eq!(instrs[1].op_type, OperandType::Tok);
        assert_eq!(instrs[1].to_string(), "IL_0005: ldtoken 0x02000005");
    }

    #[test]
    fn decode_no_prefix() {
        // no. 1, then ret
        let mut parser = Parser::new(&[0xFE, 0x19, 0x01, 0x2A]);
        let no = decode_instruction(&mut parser).unwrap();

        assert_eq!(no.mnemonic, "no.");
        assert_eq!(no.flow_type, FlowType::Prefix);
        assert_eq!(no.operand, Operand::Immediate(Immediate::Int8(1)));
    }

    #[test]
    fn decode_errors() {
        let malformed = |code: &[u8]| {
            let mut parser = Parser::new(code);
            matches!(
                decode_instruction(&mut parser),
                Err(Error::MalformedBytecode { .. })
            )
        };

        assert!(malformed(&[0x24]), "reserved single byte");
        assert!(malformed(&[0xE1]), "past the single byte table");
        assert!(malformed(&[0xFE, 0x08]), "reserved two byte");
        assert!(malformed(&[0xFE, 0x1F]), "past the two byte table");
        assert!(malformed(&[0xF8, 0x00]), "unpopulated two byte lead");
        assert!(malformed(&[0xFE]), "missing second opcode byte");
        assert!(malformed(&[0x20, 0x01, 0x02]), "truncated ldc.i4");
        assert!(malformed(&[0x45, 0xFF, 0xFF, 0xFF, 0x7F]), "oversized switch");
        assert!(malformed(&[0x2B, 0x80]), "branch before start");
    }

    #[test]
    fn stream_reset_and_error() {
        let code = [0x00, 0x2A];
        let mut stream = InstructionStream::new(&code);

        let offsets: Vec<u64> = stream.by_ref().map(|i| i.unwrap().offset).collect();
        assert_eq!(offsets, vec![0, 1]);
        assert_eq!(stream.position(), 2);
        assert!(stream.next().is_none());

        stream.reset();
        assert_eq!(stream.position(), 0);
        assert_eq!(stream.count(), 2);

        let broken = [0x00, 0x24, 0x2A];
        let mut stream = InstructionStream::new(&broken);
        assert!(stream.next().unwrap().is_ok());
        assert!(stream.next().unwrap().is_err());
        assert!(stream.next().is_none());
    }

    #[test]
    fn offsets_are_cumulative() {
        let code = [
            0x00, 0x1F, 0x05, 0x20, 0x01, 0x00, 0x00, 0x00, 0x21, 0, 0, 0, 0, 0, 0, 0, 0, 0x26,
            0x26, 0x26, 0x2A,
        ];
        let mut parser = Parser::new(&code);
        let instrs = decode_stream(&mut parser).unwrap();

        let mut expected = 0;
        for instr in &instrs {
            assert_eq!(instr.offset, expected);
            expected += instr.size;
        }
        assert_eq!(expected, code.len() as u64);
    }
}
