use crate::{
    patch::{atomic, Redirector, INDIRECT_JUMP},
    Error, Result,
};

/// Redirector for 32-bit x86.
///
/// Jumps are relative, `jmp rel32`, 5 bytes; in a 32-bit address space every target is
/// in range.
#[derive(Debug, Clone, Copy, Default)]
pub struct X86Redirector;

impl X86Redirector {
    const JUMP_SIZE: usize = 5;
}

impl Redirector for X86Redirector {
    fn architecture(&self) -> &'static str {
        "x86"
    }

    fn jump_size(&self) -> usize {
        Self::JUMP_SIZE
    }

    fn encode_jump(&self, from: usize, to: usize) -> Result<Vec<u8>> {
        let narrow = |address: usize| {
            u32::try_from(address)
                .map_err(|_| Error::Error(format!("0x{address:x} is outside the 32-bit address space")))
        };
        let (from, to) = (narrow(from)?, narrow(to)?);
        let displacement = to.wrapping_sub(from.wrapping_add(Self::JUMP_SIZE as u32));

        let mut jump = Vec::with_capacity(Self::JUMP_SIZE);
        jump.push(0xE9);
        jump.extend_from_slice(&displacement.to_le_bytes());
        Ok(jump)
    }

    unsafe fn resolve_indirection(&self, target: usize) -> usize {
        // SAFETY: guaranteed by the caller
        unsafe {
            if atomic::read_u16(target) != INDIRECT_JUMP {
                return target;
            }

            // jmp [abs32]
            let slot = ((target + 2) as *const u32).read_unaligned() as usize;
            (slot as *const u32).read_unaligned() as usize
        }
    }
}
