//! x86-64 adapter stub.
//!
//! The stub spills the argument registers into a block on its own frame and calls the
//! dispatcher as `dispatcher(context, registers, stack_args, return_slot)`. On return the
//! slot is loaded into `rax` and `xmm0`, which covers integer and floating point returns
//! alike.

/// Spilled registers of the System V stub: `rdi, rsi, rdx, rcx, r8, r9`, then the low
/// 64 bits of `xmm0..xmm7`.
pub const SYSV_GPR_COUNT: usize = 6;
/// Number of `xmm` registers carrying System V arguments.
pub const SYSV_XMM_COUNT: usize = 8;

fn emit_call(code: &mut Vec<u8>, dispatcher: u64) {
    // mov rax, imm64; call rax
    code.extend_from_slice(&[0x48, 0xB8]);
    code.extend_from_slice(&dispatcher.to_le_bytes());
    code.extend_from_slice(&[0xFF, 0xD0]);
}

fn emit_epilogue(code: &mut Vec<u8>, slot: u8) {
    // mov rax, [rsp + slot]; movq xmm0, rax; leave; ret
    code.extend_from_slice(&[0x48, 0x8B, 0x44, 0x24, slot]);
    code.extend_from_slice(&[0x66, 0x48, 0x0F, 0x6E, 0xC0]);
    code.extend_from_slice(&[0xC9, 0xC3]);
}

/// Stub for the System V AMD64 calling convention.
///
/// Frame after the prologue: `[rsp, rsp+0x30)` general purpose registers,
/// `[rsp+0x30, rsp+0x70)` `xmm` registers, `[rsp+0x70]` the return slot. Stack arguments
/// start at `rbp+0x10`.
#[must_use]
pub fn emit_sysv(context: u64, dispatcher: u64) -> Vec<u8> {
    let mut code = Vec::with_capacity(160);

    // push rbp; mov rbp, rsp; sub rsp, 0x80
    code.extend_from_slice(&[0x55, 0x48, 0x89, 0xE5]);
    code.extend_from_slice(&[0x48, 0x81, 0xEC, 0x80, 0x00, 0x00, 0x00]);

    // mov [rsp], rdi .. mov [rsp+0x28], r9
    code.extend_from_slice(&[0x48, 0x89, 0x3C, 0x24]);
    code.extend_from_slice(&[0x48, 0x89, 0x74, 0x24, 0x08]);
    code.extend_from_slice(&[0x48, 0x89, 0x54, 0x24, 0x10]);
    code.extend_from_slice(&[0x48, 0x89, 0x4C, 0x24, 0x18]);
    code.extend_from_slice(&[0x4C, 0x89, 0x44, 0x24, 0x20]);
    code.extend_from_slice(&[0x4C, 0x89, 0x4C, 0x24, 0x28]);

    // movq [rsp+0x30+8*n], xmmN
    for n in 0..SYSV_XMM_COUNT as u8 {
        code.extend_from_slice(&[0x66, 0x0F, 0xD6, 0x44 | (n << 3), 0x24, 0x30 + 8 * n]);
    }

    // mov rdi, context; mov rsi, rsp; lea rdx, [rbp+0x10]; lea rcx, [rsp+0x70]
    code.extend_from_slice(&[0x48, 0xBF]);
    code.extend_from_slice(&context.to_le_bytes());
    code.extend_from_slice(&[0x48, 0x89, 0xE6]);
    code.extend_from_slice(&[0x48, 0x8D, 0x55, 0x10]);
    code.extend_from_slice(&[0x48, 0x8D, 0x4C, 0x24, 0x70]);

    emit_call(&mut code, dispatcher);
    emit_epilogue(&mut code, 0x70);
    code
}
