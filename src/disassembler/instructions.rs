//! The ECMA-335 Partition III opcode tables.
//!
//! [`INSTRUCTIONS`] is indexed by the single opcode byte, [`INSTRUCTIONS_FE`] by the
//! byte following the `0xFE` prefix. Unassigned slots carry an empty mnemonic and are
//! rejected by the decoder.
#![allow(clippy::too_many_lines)]

use crate::disassembler::{FlowType, OperandType};

/// Static description of one opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CilInstruction {
    /// Operand kind that follows the opcode
    pub op_type: OperandType,
    /// Mnemonic, empty for reserved opcodes
    pub instr: &'static str,
    /// Control flow behaviour
    pub flow: FlowType,
}

impl CilInstruction {
    /// Returns `true` for unassigned opcode slots.
    #[must_use]
    pub const fn is_reserved(&self) -> bool {
        self.instr.is_empty()
    }
}

const fn op(instr: &'static str, op_type: OperandType, flow: FlowType) -> CilInstruction {
    CilInstruction {
        op_type,
        instr,
        flow,
    }
}

const fn seq(instr: &'static str) -> CilInstruction {
    op(instr, OperandType::None, FlowType::Sequential)
}

const fn cond_s(instr: &'static str) -> CilInstruction {
    op(
        instr,
        OperandType::ShortBranchTarget,
        FlowType::ConditionalBranch,
    )
}

const fn cond(instr: &'static str) -> CilInstruction {
    op(instr, OperandType::BranchTarget, FlowType::ConditionalBranch)
}

const fn typed(instr: &'static str) -> CilInstruction {
    op(instr, OperandType::Type, FlowType::Sequential)
}

const fn field(instr: &'static str) -> CilInstruction {
    op(instr, OperandType::Field, FlowType::Sequential)
}

const RESERVED: CilInstruction = op("", OperandType::None, FlowType::Sequential);

/// Single-byte opcodes, `0x00..=0xE0`.
pub const INSTRUCTIONS: [CilInstruction; 0xE1] = [
    /* 0x00 */ seq("nop"),
    /* 0x01 */ seq("break"),
    /* 0x02 */ seq("ldarg.0"),
    /* 0x03 */ seq("ldarg.1"),
    /* 0x04 */ seq("ldarg.2"),
    /* 0x05 */ seq("ldarg.3"),
    /* 0x06 */ seq("ldloc.0"),
    /* 0x07 */ seq("ldloc.1"),
    /* 0x08 */ seq("ldloc.2"),
    /* 0x09 */ seq("ldloc.3"),
    /* 0x0A */ seq("stloc.0"),
    /* 0x0B */ seq("stloc.1"),
    /* 0x0C */ seq("stloc.2"),
    /* 0x0D */ seq("stloc.3"),
    /* 0x0E */ op("ldarg.s", OperandType::UInt8, FlowType::Sequential),
    /* 0x0F */ op("ldarga.s", OperandType::UInt8, FlowType::Sequential),
    /* 0x10 */ op("starg.s", OperandType::UInt8, FlowType::Sequential),
    /* 0x11 */ op("ldloc.s", OperandType::UInt8, FlowType::Sequential),
    /* 0x12 */ op("ldloca.s", OperandType::UInt8, FlowType::Sequential),
    /* 0x13 */ op("stloc.s", OperandType::UInt8, FlowType::Sequential),
    /* 0x14 */ seq("ldnull"),
    /* 0x15 */ seq("ldc.i4.m1"),
    /* 0x16 */ seq("ldc.i4.0"),
    /* 0x17 */ seq("ldc.i4.1"),
    /* 0x18 */ seq("ldc.i4.2"),
    /* 0x19 */ seq("ldc.i4.3"),
    /* 0x1A */ seq("ldc.i4.4"),
    /* 0x1B */ seq("ldc.i4.5"),
    /* 0x1C */ seq("ldc.i4.6"),
    /* 0x1D */ seq("ldc.i4.7"),
    /* 0x1E */ seq("ldc.i4.8"),
    /* 0x1F */ op("ldc.i4.s", OperandType::Int8, FlowType::Sequential),
    /* 0x20 */ op("ldc.i4", OperandType::Int32, FlowType::Sequential),
    /* 0x21 */ op("ldc.i8", OperandType::Int64, FlowType::Sequential),
    /* 0x22 */ op("ldc.r4", OperandType::Float32, FlowType::Sequential),
    /* 0x23 */ op("ldc.r8", OperandType::Float64, FlowType::Sequential),
    /* 0x24 */ RESERVED,
    /* 0x25 */ seq("dup"),
    /* 0x26 */ seq("pop"),
    /* 0x27 */ op("jmp", OperandType::Method, FlowType::Call),
    /* 0x28 */ op("call", OperandType::Method, FlowType::Call),
    /* 0x29 */ op("calli", OperandType::Sig, FlowType::Call),
    /* 0x2A */ op("ret", OperandType::None, FlowType::Return),
    /* 0x2B */ op("br.s", OperandType::ShortBranchTarget, FlowType::UnconditionalBranch),
    /* 0x2C */ cond_s("brfalse.s"),
    /* 0x2D */ cond_s("brtrue.s"),
    /* 0x2E */ cond_s("beq.s"),
    /* 0x2F */ cond_s("bge.s"),
    /* 0x30 */ cond_s("bgt.s"),
    /* 0x31 */ cond_s("ble.s"),
    /* 0x32 */ cond_s("blt.s"),
    /* 0x33 */ cond_s("bne.un.s"),
    /* 0x34 */ cond_s("bge.un.s"),
    /* 0x35 */ cond_s("bgt.un.s"),
    /* 0x36 */ cond_s("ble.un.s"),
    /* 0x37 */ cond_s("blt.un.s"),
    /* 0x38 */ op("br", OperandType::BranchTarget, FlowType::UnconditionalBranch),
    /* 0x39 */ cond("brfalse"),
    /* 0x3A */ cond("brtrue"),
    /* 0x3B */ cond("beq"),
    /* 0x3C */ cond("bge"),
    /* 0x3D */ cond("bgt"),
    /* 0x3E */ cond("ble"),
    /* 0x3F */ cond("blt"),
    /* 0x40 */ cond("bne.un"),
    /* 0x41 */ cond("bge.un"),
    /* 0x42 */ cond("bgt.un"),
    /* 0x43 */ cond("ble.un"),
    /* 0x44 */ cond("blt.un"),
    /* 0x45 */ op("switch", OperandType::Switch, FlowType::Switch),
    /* 0x46 */ seq("ldind.i1"),
    /* 0x47 */ seq("ldind.u1"),
    /* 0x48 */ seq("ldind.i2"),
    /* 0x49 */ seq("ldind.u2"),
    /* 0x4A */ seq("ldind.i4"),
    /* 0x4B */ seq("ldind.u4"),
    /* 0x4C */ seq("ldind.i8"),
    /* 0x4D */ seq("ldind.i"),
    /* 0x4E */ seq("ldind.r4"),
    /* 0x4F */ seq("ldind.r8"),
    /* 0x50 */ seq("ldind.ref"),
    /* 0x51 */ seq("stind.ref"),
    /* 0x52 */ seq("stind.i1"),
    /* 0x53 */ seq("stind.i2"),
    /* 0x54 */ seq("stind.i4"),
    /* 0x55 */ seq("stind.i8"),
    /* 0x56 */ seq("stind.r4"),
    /* 0x57 */ seq("stind.r8"),
    /* 0x58 */ seq("add"),
    /* 0x59 */ seq("sub"),
    /* 0x5A */ seq("mul"),
    /* 0x5B */ seq("div"),
    /* 0x5C */ seq("div.un"),
    /* 0x5D */ seq("rem"),
    /* 0x5E */ seq("rem.un"),
    /* 0x5F */ seq("and"),
    /* 0x60 */ seq("or"),
    /* 0x61 */ seq("xor"),
    /* 0x62 */ seq("shl"),
    /* 0x63 */ seq("shr"),
    /* 0x64 */ seq("shr.un"),
    /* 0x65 */ seq("neg"),
    /* 0x66 */ seq("not"),
    /* 0x67 */ seq("conv.i1"),
    /* 0x68 */ seq("conv.i2"),
    /* 0x69 */ seq("conv.i4"),
    /* 0x6A */ seq("conv.i8"),
    /* 0x6B */ seq("conv.r4"),
    /* 0x6C */ seq("conv.r8"),
    /* 0x6D */ seq("conv.u4"),
    /* 0x6E */ seq("conv.u8"),
    /* 0x6F */ op("callvirt", OperandType::Method, FlowType::Call),
    /* 0x70 */ typed("cpobj"),
    /* 0x71 */ typed("ldobj"),
    /* 0x72 */ op("ldstr", OperandType::String, FlowType::Sequential),
    /* 0x73 */ op("newobj", OperandType::Method, FlowType::Call),
    /* 0x74 */ typed("castclass"),
    /* 0x75 */ typed("isinst"),
    /* 0x76 */ seq("conv.r.un"),
    /* 0x77 */ RESERVED,
    /* 0x78 */ RESERVED,
    /* 0x79 */ typed("unbox"),
    /* 0x7A */ op("throw", OperandType::None, FlowType::Throw),
    /* 0x7B */ field("ldfld"),
    /* 0x7C */ field("ldflda"),
    /* 0x7D */ field("stfld"),
    /* 0x7E */ field("ldsfld"),
    /* 0x7F */ field("ldsflda"),
    /* 0x80 */ field("stsfld"),
    /* 0x81 */ typed("stobj"),
    /* 0x82 */ seq("conv.ovf.i1.un"),
    /* 0x83 */ seq("conv.ovf.i2.un"),
    /* 0x84 */ seq("conv.ovf.i4.un"),
    /* 0x85 */ seq("conv.ovf.i8.un"),
    /* 0x86 */ seq("conv.ovf.u1.un"),
    /* 0x87 */ seq("conv.ovf.u2.un"),
    /* 0x88 */ seq("conv.ovf.u4.un"),
    /* 0x89 */ seq("conv.ovf.u8.un"),
    /* 0x8A */ seq("conv.ovf.i.un"),
    /* 0x8B */ seq("conv.ovf.u.un"),
    /* 0x8C */ typed("box"),
    /* 0x8D */ typed("newarr"),
    /* 0x8E */ seq("ldlen"),
    /* 0x8F */ typed("ldelema"),
    /* 0x90 */ seq("ldelem.i1"),
    /* 0x91 */ seq("ldelem.u1"),
    /* 0x92 */ seq("ldelem.i2"),
    /* 0x93 */ seq("ldelem.u2"),
    /* 0x94 */ seq("ldelem.i4"),
    /* 0x95 */ seq("ldelem.u4"),
    /* 0x96 */ seq("ldelem.i8"),
    /* 0x97 */ seq("ldelem.i"),
    /* 0x98 */ seq("ldelem.r4"),
    /* 0x99 */ seq("ldelem.r8"),
    /* 0x9A */ seq("ldelem.ref"),
    /* 0x9B */ seq("stelem.i"),
    /* 0x9C */ seq("stelem.i1"),
    /* 0x9D */ seq("stelem.i2"),
    /* 0x9E */ seq("stelem.i4"),
    /* 0x9F */ seq("stelem.i8"),
    /* 0xA0 */ seq("stelem.r4"),
    /* 0xA1 */ seq("stelem.r8"),
    /* 0xA2 */ seq("stelem.ref"),
    /* 0xA3 */ typed("ldelem"),
    /* 0xA4 */ typed("stelem"),
    /* 0xA5 */ typed("unbox.any"),
    /* 0xA6 */ RESERVED,
    /* 0xA7 */ RESERVED,
    /* 0xA8 */ RESERVED,
    /* 0xA9 */ RESERVED,
    /* 0xAA */ RESERVED,
    /* 0xAB */ RESERVED,
    /* 0xAC */ RESERVED,
    /* 0xAD */ RESERVED,
    /* 0xAE */ RESERVED,
    /* 0xAF */ RESERVED,
    /* 0xB0 */ RESERVED,
    /* 0xB1 */ RESERVED,
    /* 0xB2 */ RESERVED,
    /* 0xB3 */ seq("conv.ovf.i1"),
    /* 0xB4 */ seq("conv.ovf.u1"),
    /* 0xB5 */ seq("conv.ovf.i2"),
    /* 0xB6 */ seq("conv.ovf.u2"),
    /* 0xB7 */ seq("conv.ovf.i4"),
    /* 0xB8 */ seq("conv.ovf.u4"),
    /* 0xB9 */ seq("conv.ovf.i8"),
    /* 0xBA */ seq("conv.ovf.u8"),
    /* 0xBB */ RESERVED,
    /* 0xBC */ RESERVED,
    /* 0xBD */ RESERVED,
    /* 0xBE */ RESERVED,
    /* 0xBF */ RESERVED,
    /* 0xC0 */ RESERVED,
    /* 0xC1 */ RESERVED,
    /* 0xC2 */ typed("refanyval"),
    /* 0xC3 */ seq("ckfinite"),
    /* 0xC4 */ RESERVED,
    /* 0xC5 */ RESERVED,
    /* 0xC6 */ typed("mkrefany"),
    /* 0xC7 */ RESERVED,
    /* 0xC8 */ RESERVED,
    /* 0xC9 */ RESERVED,
    /* 0xCA */ RESERVED,
    /* 0xCB */ RESERVED,
    /* 0xCC */ RESERVED,
    /* 0xCD */ RESERVED,
    /* 0xCE */ RESERVED,
    /* 0xCF */ RESERVED,
    /* 0xD0 */ op("ldtoken", OperandType::Tok, FlowType::Sequential),
    /* 0xD1 */ seq("conv.u2"),
    /* 0xD2 */ seq("conv.u1"),
    /* 0xD3 */ seq("conv.i"),
    /* 0xD4 */ seq("conv.ovf.i"),
    /* 0xD5 */ seq("conv.ovf.u"),
    /* 0xD6 */ seq("add.ovf"),
    /* 0xD7 */ seq("add.ovf.un"),
    /* 0xD8 */ seq("mul.ovf"),
    /* 0xD9 */ seq("mul.ovf.un"),
    /* 0xDA */ seq("sub.ovf"),
    /* 0xDB */ seq("sub.ovf.un"),
    /* 0xDC */ op("endfinally", OperandType::None, FlowType::EndFinally),
    /* 0xDD */ op("leave", OperandType::BranchTarget, FlowType::Leave),
    /* 0xDE */ op("leave.s", OperandType::ShortBranchTarget, FlowType::Leave),
    /* 0xDF */ seq("stind.i"),
    /* 0xE0 */ seq("conv.u"),
];

/// Two-byte opcodes, `0xFE 0x00..=0x1E`.
pub const INSTRUCTIONS_FE: [CilInstruction; 0x1F] = [
    /* 0x00 */ seq("arglist"),
    /* 0x01 */ seq("ceq"),
    /* 0x02 */ seq("cgt"),
    /* 0x03 */ seq("cgt.un"),
    /* 0x04 */ seq("clt"),
    /* 0x05 */ seq("clt.un"),
    /* 0x06 */ op("ldftn", OperandType::Method, FlowType::Sequential),
    /* 0x07 */ op("ldvirtftn", OperandType::Method, FlowType::Sequential),
    /* 0x08 */ RESERVED,
    /* 0x09 */ op("ldarg", OperandType::UInt16, FlowType::Sequential),
    /* 0x0A */ op("ldarga", OperandType::UInt16, FlowType::Sequential),
    /* 0x0B */ op("starg", OperandType::UInt16, FlowType::Sequential),
    /* 0x0C */ op("ldloc", OperandType::UInt16, FlowType::Sequential),
    /* 0x0D */ op("ldloca", OperandType::UInt16, FlowType::Sequential),
    /* 0x0E */ op("stloc", OperandType::UInt16, FlowType::Sequential),
    /* 0x0F */ seq("localloc"),
    /* 0x10 */ RESERVED,
    /* 0x11 */ op("endfilter", OperandType::None, FlowType::EndFinally),
    /* 0x12 */ op("unaligned.", OperandType::Int8, FlowType::Prefix),
    /* 0x13 */ op("volatile.", OperandType::None, FlowType::Prefix),
    /* 0x14 */ op("tail.", OperandType::None, FlowType::Prefix),
    /* 0x15 */ typed("initobj"),
    /* 0x16 */ op("constrained.", OperandType::Type, FlowType::Prefix),
    /* 0x17 */ seq("cpblk"),
    /* 0x18 */ seq("initblk"),
    /* 0x19 */ op("no.", OperandType::Int8, FlowType::Prefix),
    /* 0x1A */ op("rethrow", OperandType::None, FlowType::Throw),
    /* 0x1B */ RESERVED,
    /* 0x1C */ typed("sizeof"),
    /* 0x1D */ seq("refanytype"),
    /* 0x1E */ op("readonly.", OperandType::None, FlowType::Prefix),
];

/// Looks up the opcode for a mnemonic, returning `(prefix, opcode, description)`.
#[must_use]
pub fn lookup_mnemonic(mnemonic: &str) -> Option<(u8, u8, &'static CilInstruction)> {
    let single = INSTRUCTIONS
        .iter()
        .enumerate()
        .find(|(_, entry)| !entry.is_reserved() && entry.instr == mnemonic)
        .map(|(index, entry)| (0u8, index as u8, entry));

    single.or_else(|| {
        INSTRUCTIONS_FE
            .iter()
            .enumerate()
            .find(|(_, entry)| !entry.is_reserved() && entry.instr == mnemonic)
            .map(|(index, entry)| (0xFEu8, index as u8, entry))
    })
}
