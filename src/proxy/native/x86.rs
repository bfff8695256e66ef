//! x86 (cdecl) adapter stub.
//!
//! Every argument is on the stack, so the stub only hands the dispatcher the address of
//! the first one. Integer results come back in `edx:eax`, floating point results on the
//! x87 stack.

use crate::metadata::signatures::{ElementType, ParamType};

/// Stub for the cdecl calling convention.
///
/// Frame after the prologue: `[esp, esp+0x10)` the dispatcher's four arguments,
/// `[esp+0x10]` the 8-byte return slot. Stack arguments start at `ebp+8`. The register
/// block pointer passed to the dispatcher is null.
#[must_use]
pub fn emit_cdecl(context: u32, dispatcher: u32, return_type: ParamType) -> Vec<u8> {
    let mut code = Vec::with_capacity(64);

    // push ebp; mov ebp, esp; sub esp, 0x18
    code.extend_from_slice(&[0x55, 0x89, 0xE5, 0x83, 0xEC, 0x18]);

    // lea eax, [ebp+8]; lea ecx, [esp+0x10]
    code.extend_from_slice(&[0x8D, 0x45, 0x08]);
    code.extend_from_slice(&[0x8D, 0x4C, 0x24, 0x10]);

    // dispatcher(context, null, eax, ecx)
    code.extend_from_slice(&[0x89, 0x4C, 0x24, 0x0C]);
    code.extend_from_slice(&[0x89, 0x44, 0x24, 0x08]);
    code.extend_from_slice(&[0xC7, 0x44, 0x24, 0x04, 0x00, 0x00, 0x00, 0x00]);
    code.extend_from_slice(&[0xC7, 0x04, 0x24]);
    code.extend_from_slice(&context.to_le_bytes());

    // mov eax, dispatcher; call eax
    code.push(0xB8);
    code.extend_from_slice(&dispatcher.to_le_bytes());
    code.extend_from_slice(&[0xFF, 0xD0]);

    // mov eax, [esp+0x10]; mov edx, [esp+0x14]
    code.extend_from_slice(&[0x8B, 0x44, 0x24, 0x10]);
    code.extend_from_slice(&[0x8B, 0x54, 0x24, 0x14]);

    if !return_type.by_ref {
        match return_type.element {
            // fld dword [esp+0x10]
            ElementType::R4 => code.extend_from_slice(&[0xD9, 0x44, 0x24, 0x10]),
            // fld qword [esp+0x10]
            ElementType::R8 => code.extend_from_slice(&[0xDD, 0x44, 0x24, 0x10]),
            _ => {}
        }
    }

    // leave; ret
    code.extend_from_slice(&[0xC9, 0xC3]);
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_return() {
        let code = emit_cdecl(0xAABB_CCDD, 0x1020_3040, ElementType::I4.into());

        assert_eq!(&code[..6], &[0x55, 0x89, 0xE5, 0x83, 0xEC, 0x18]);
        let context = code
            .windows(3)
            .position(|window| window == [0xC7, 0x04, 0x24])
            .unwrap();
        assert_eq!(&code[context + 3..context + 7], &0xAABB_CCDDu32.to_le_bytes());
        assert_eq!(code[context + 7], 0xB8);
        assert_eq!(&code[context + 8..context + 12], &0x1020_3040u32.to_le_bytes());
        assert!(!code.windows(4).any(|window| window == [0xDD, 0x44, 0x24, 0x10]));
        assert_eq!(&code[code.len() - 2..], &[0xC9, 0xC3]);
    }

    #[test]
    fn float_returns() {
        let double = emit_cdecl(0, 0, ElementType::R8.into());
        assert_eq!(&double[double.len() - 6..double.len() - 2], &[0xDD, 0x44, 0x24, 0x10]);

        let single = emit_cdecl(0, 0, ElementType::R4.into());
        assert_eq!(&single[single.len() - 6..single.len() - 2], &[0xD9, 0x44, 0x24, 0x10]);

        let integer = emit_cdecl(0, 0, ElementType::I8.into());
        assert_eq!(double.len(), integer.len() + 4);
    }
}
