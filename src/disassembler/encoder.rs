//! CIL instruction re-encoding.
//!
//! The encoder is the inverse of [`crate::disassembler::decode_instruction`]: it writes an
//! instruction back with its original opcode and the exact operand width declared by
//! that opcode. It never relaxes or widens anything, so offsets and branch deltas of a
//! decoded stream stay valid after a re-encode even when tokens have been swapped.

use crate::{
    disassembler::{
        Immediate, Instruction, Operand, OperandType, INSTRUCTIONS, INSTRUCTIONS_FE,
    },
    file::io::emit_le,
    Result,
};

/// Append the encoding of `instruction` to `buffer`.
///
/// # Errors
///
/// Returns [`crate::Error::MalformedBytecode`] if the operand payload does not match the
/// operand kind of the opcode, or if opcode and mnemonic disagree. `buffer` is left
/// untouched on error.
pub fn encode_instruction(instruction: &Instruction, buffer: &mut Vec<u8>) -> Result<()> {
    let (prefix, opcode) = (instruction.prefix, instruction.opcode);
    let entry = match prefix {
        0 => INSTRUCTIONS.get(opcode as usize),
        0xFE => INSTRUCTIONS_FE.get(opcode as usize),
        _ => None,
    };
    let Some(entry) = entry.filter(|entry| !entry.is_reserved()) else {
        return Err(malformed_error!(
            "Invalid opcode {:02X}{:02X} for '{}'",
            prefix,
            opcode,
            instruction.mnemonic
        ));
    };
    if entry.instr != instruction.mnemonic {
        return Err(malformed_error!(
            "Opcode {:02X}{:02X} is '{}', instruction says '{}'",
            prefix,
            opcode,
            entry.instr,
            instruction.mnemonic
        ));
    }
    if entry.op_type != instruction.op_type {
        return Err(malformed_error!(
            "'{}' takes {:?}, instruction declares {:?}",
            instruction.mnemonic,
            entry.op_type,
            instruction.op_type
        ));
    }

    let mut encoded = Vec::with_capacity(instruction.size as usize);
    if prefix != 0 {
        encoded.push(prefix);
    }
    encoded.push(opcode);
    emit_operand(&mut encoded, &instruction.operand, entry.op_type, instruction)?;

    buffer.extend_from_slice(&encoded);
    Ok(())
}

/// Encode a whole instruction sequence.
///
/// # Errors
///
/// Returns the first error of [`encode_instruction`].
pub fn encode_stream(instructions: &[Instruction]) -> Result<Vec<u8>> {
    let capacity = instructions.iter().map(|i| i.size as usize).sum();
    let mut buffer = Vec::with_capacity(capacity);
    for instruction in instructions {
        encode_instruction(instruction, &mut buffer)?;
    }

    Ok(buffer)
}

fn emit_operand(
    buffer: &mut Vec<u8>,
    operand: &Operand,
    expected: OperandType,
    instruction: &Instruction,
) -> Result<()> {
    match (expected, operand) {
        (OperandType::None, Operand::None) => {}
        (OperandType::ShortBranchTarget, Operand::ShortTarget(delta)) => emit_le(buffer, *delta),
        (OperandType::BranchTarget, Operand::Target(delta)) => emit_le(buffer, *delta),
        (OperandType::Int8, Operand::Immediate(Immediate::Int8(value))) => emit_le(buffer, *value),
        (OperandType::UInt8, Operand::Immediate(Immediate::UInt8(value))) => {
            emit_le(buffer, *value);
        }
        (OperandType::UInt16, Operand::Immediate(Immediate::UInt16(value))) => {
            emit_le(buffer, *value);
        }
        (OperandType::Int32, Operand::Immediate(Immediate::Int32(value))) => {
            emit_le(buffer, *value);
        }
        (OperandType::Int64, Operand::Immediate(Immediate::Int64(value))) => {
            emit_le(buffer, *value);
        }
        (OperandType::Float32, Operand::Immediate(Immediate::Float32(value))) => {
            emit_le(buffer, *value);
        }
        (OperandType::Float64, Operand::Immediate(Immediate::Float64(value))) => {
            emit_le(buffer, *value);
        }
        (kind, Operand::Token(token)) if kind.is_token() => emit_le(buffer, token.value()),
        (OperandType::Switch, Operand::Switch(targets)) => {
            let count = u32::try_from(targets.len())
                .map_err(|_| malformed_error!("Too many switch targets: {}", targets.len()))?;
            emit_le(buffer, count);
            for target in targets {
                emit_le(buffer, *target);
            }
        }
        (kind, operand) => {
            return Err(malformed_error!(
                "IL_{:04x}: '{}' expects a {:?} operand, found {:?}",
                instruction.offset,
                instruction.mnemonic,
                kind,
                operand
            ))
        }
    }

    Ok(())
}
