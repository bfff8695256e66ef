use crate::{
    disassembler::{encode_instruction, InstructionStream, Operand},
    metadata::resolver::{resolve_operand, MetadataScope, TokenProvider},
    Result,
};

/// Re-emit `code` with every token operand translated from `source` into `destination`.
///
/// Opcodes, immediates, branch offsets and switch tables are copied as they are, and
/// every operand keeps its width, so offsets (and with them branch targets and exception
/// regions) stay valid.
///
/// # Errors
///
/// Returns [`crate::Error::MalformedBytecode`] if `code` does not decode, and propagates
/// token resolution errors.
pub fn rewrite_code(
    code: &[u8],
    source: &dyn MetadataScope,
    destination: &dyn TokenProvider,
) -> Result<Vec<u8>> {
    let mut rewritten = Vec::with_capacity(code.len());

    for instruction in InstructionStream::new(code) {
        let mut instruction = instruction?;
        if let Operand::Token(token) = instruction.operand {
            let translated = resolve_operand(source, destination, instruction.op_type, token)?;
            instruction.operand = Operand::Token(translated);
        }

        encode_instruction(&instruction, &mut rewritten)?;
    }

    Ok(rewritten)
}
