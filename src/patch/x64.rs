use crate::{
    patch::{atomic, Redirector, INDIRECT_JUMP},
    Result,
};

/// Redirector for x86-64.
///
/// Jumps are absolute so any replacement is reachable: `mov rax, imm64; push rax; ret`,
/// 12 bytes. `rax` is free to clobber at a function entry in both the System V and the
/// Microsoft calling convention.
#[derive(Debug, Clone, Copy, Default)]
pub struct X64Redirector;

impl X64Redirector {
    const JUMP_SIZE: usize = 12;
}

impl Redirector for X64Redirector {
    fn architecture(&self) -> &'static str {
        "x86_64"
    }

    fn jump_size(&self) -> usize {
        Self::JUMP_SIZE
    }

    fn encode_jump(&self, _from: usize, to: usize) -> Result<Vec<u8>> {
        let mut jump = Vec::with_capacity(Self::JUMP_SIZE);
        jump.extend_from_slice(&[0x48, 0xB8]);
        jump.extend_from_slice(&(to as u64).to_le_bytes());
        jump.extend_from_slice(&[0x50, 0xC3]);
        Ok(jump)
    }

    unsafe fn resolve_indirection(&self, target: usize) -> usize {
        // SAFETY: guaranteed by the caller
        unsafe {
            if atomic::read_u16(target) != INDIRECT_JUMP {
                return target;
            }

            // jmp [rip + disp32], rip being the end of the 6-byte instruction
            let displacement = ((target + 2) as *const i32).read_unaligned();
            let slot = (target + 6).wrapping_add_signed(displacement as isize);
            (slot as *const usize).read_unaligned()
        }
    }
}
