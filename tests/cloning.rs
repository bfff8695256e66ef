//! Integration tests for decoding, re-encoding and cloning method bodies.

mod common;

use std::sync::Arc;

use cildetour::{
    metadata::method::{encode_exception_regions, write_fat_body},
    prelude::*,
};
use common::{ArithmeticEngine, TableScope};

/// A body touching every operand kind the cloner has to translate.
const CODE: [u8; 47] = [
    0x00, // nop
    0x72, 0x01, 0x00, 0x00, 0x70, // ldstr "greeting"
    0x28, 0x01, 0x00, 0x00, 0x0A, // call Console::WriteLine
    0x73, 0x02, 0x00, 0x00, 0x0A, // newobj List`1<int32>::.ctor
    0x7B, 0x03, 0x00, 0x00, 0x04, // ldfld Widget::count
    0xD0, 0x04, 0x00, 0x00, 0x02, // ldtoken Widget
    0x29, 0x05, 0x00, 0x00, 0x11, // calli (int32)
    0x20, 0x78, 0x56, 0x34, 0x12, // ldc.i4 0x12345678
    0x45, 0x01, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, // switch (IL_002e)
    0x26, 0x26, // pop, pop
];

fn widget() -> TypeRef {
    TypeRef::new(0x200, "Widget")
}

fn module() -> TableScope {
    let list = TypeRef {
        is_generic: true,
        ..TypeRef::new(0x201, "List`1<int32>")
    };

    let mut scope = TableScope::default();
    scope.strings.insert(Token(0x7000_0001), "greeting".into());
    scope.members.insert(
        Token(0x0A00_0001),
        Member::Method(MethodRef {
            handle: RuntimeHandle(0x300),
            name: "WriteLine".into(),
            declaring: Some(TypeRef::new(0x202, "System.Console")),
            is_constructor: false,
            is_dynamic: false,
        }),
    );
    scope.members.insert(
        Token(0x0A00_0002),
        Member::Method(MethodRef {
            handle: RuntimeHandle(0x301),
            name: ".ctor".into(),
            declaring: Some(list),
            is_constructor: true,
            is_dynamic: false,
        }),
    );
    scope.members.insert(
        Token(0x0400_0003),
        Member::Field(FieldRef {
            handle: RuntimeHandle(0x302),
            name: "count".into(),
            declaring: Some(widget()),
        }),
    );
    scope.members.insert(Token(0x0200_0004), Member::Type(widget()));
    scope.members.insert(
        Token(0x0100_0006),
        Member::Type(TypeRef::new(0x203, "System.Exception")),
    );
    scope.signatures.insert(Token(0x1100_0005), vec![0x00, 0x00, 0x08]);
    scope.signatures.insert(Token(0x1100_0007), vec![0x07, 0x02, 0x08, 0x0E]);
    scope
}

fn descriptor(body: MethodBody) -> MethodDescriptor {
    MethodDescriptor {
        name: "Run".into(),
        handle: RuntimeHandle(0x400),
        is_static: false,
        declaring_type: Some(widget()),
        module: Arc::new(module()),
        signature: MethodSignature::new(vec![ParamType::new(ElementType::I4)], ParamType::void())
            .with_this(),
        is_generic_definition: false,
        is_dynamic: false,
        body: Some(body),
        entry_point: 0,
        engine: Arc::new(ArithmeticEngine::default()),
    }
}

/// Decoding a body and encoding the instructions again reproduces it byte for byte.
#[test]
fn test_decode_encode_roundtrip() -> Result<()> {
    let instructions = decode_stream(&mut Parser::new(&CODE))?;
    assert_eq!(instructions.len(), 11);
    assert_eq!(instructions[8].mnemonic, "switch");
    assert_eq!(instructions[8].branch_targets, vec![0x2E]);

    assert_eq!(encode_stream(&instructions)?, CODE);
    Ok(())
}

/// Every token of the clone is issued by its scope and names what the original named.
#[test]
fn test_clone_translates_tokens() -> Result<()> {
    let code = CODE.to_vec();
    let mut body = MethodBody::new(code.clone());
    body.local_var_sig_token = Token(0x1100_0007);
    body.max_stack = 4;
    body.init_locals = true;

    let cloned = clone_method(&descriptor(body))?;
    assert_eq!(cloned.code.len(), code.len());
    assert_eq!(
        cloned.params,
        vec![ParamType::new(ElementType::Object), ParamType::new(ElementType::I4)]
    );

    let entries: Vec<DynamicEntry> = InstructionStream::new(&cloned.code)
        .collect::<Result<Vec<_>>>()?
        .iter()
        .filter_map(Instruction::token)
        .map(|token| cloned.scope.entry(token).expect("token issued by the clone's scope"))
        .collect();

    assert_eq!(entries.len(), 6);
    assert_eq!(entries[0], DynamicEntry::String("greeting".into()));
    assert!(matches!(&entries[1], DynamicEntry::Method(method) if method.name == "WriteLine"));
    // a constructor of a generic instantiation is interned with its owner
    assert!(matches!(&entries[2], DynamicEntry::GenericMethod(method) if method.is_constructor));
    assert!(matches!(&entries[3], DynamicEntry::Field(field) if field.name == "count"));
    assert_eq!(entries[4], DynamicEntry::Type(widget()));
    assert_eq!(entries[5], DynamicEntry::Signature(vec![0x00, 0x00, 0x08]));

    assert_eq!(
        cloned.scope.entry(cloned.local_sig_token),
        Some(DynamicEntry::Signature(vec![0x07, 0x02, 0x08, 0x0E]))
    );

    let reparsed = MethodBody::from(&cloned.to_body_bytes()?)?;
    assert_eq!(reparsed.code, cloned.code);
    assert_eq!(reparsed.max_stack, 4);
    assert!(reparsed.init_locals);

    Ok(())
}

/// Clones of several methods share entries of a common scope.
#[test]
fn test_shared_scope() -> Result<()> {
    let scope = Arc::new(DynamicScope::new());
    let body = MethodBody::new(vec![0x72, 0x01, 0x00, 0x00, 0x70, 0x26, 0x2A]);

    let first = clone_method_into(&descriptor(body.clone()), scope.clone())?;
    let second = clone_method_into(&descriptor(body), scope.clone())?;

    assert_eq!(first.code, second.code);
    // the string and the empty local signature
    assert_eq!(scope.len(), 2);
    Ok(())
}

/// Exception sections are all-thin when every clause fits, all-fat otherwise.
#[test]
fn test_exception_section_layout() -> Result<()> {
    let source = module();
    let thin = [
        ExceptionRegion::catch(0, 0x10, 0x10, 0x08, Token(0x0100_0006)),
        ExceptionRegion::finally(0, 0x18, 0x18, 0x04),
    ];
    let section = encode_exception_regions(&thin, &source, &DynamicScope::new())?;
    assert_eq!(section[0], 0x01);
    assert_eq!(section.len(), 4 + 2 * 12);

    let mixed = [
        ExceptionRegion::catch(0, 0x10, 0x10, 0x08, Token(0x0100_0006)),
        ExceptionRegion::fault(0, 0x1_0000, 0x1_0000, 0x04),
    ];
    let section = encode_exception_regions(&mixed, &source, &DynamicScope::new())?;
    assert_eq!(section[0], 0x41);
    assert_eq!(section.len(), 4 + 2 * 24);

    let body = write_fat_body(&vec![0x00; 0x1_0004], 1, Token::NULL, false, &section)?;
    let parsed = MethodBody::from(&body)?;
    assert_eq!(parsed.exception_regions.len(), 2);
    assert_eq!(parsed.exception_regions[1].kind(), ExceptionRegionKind::Fault);
    Ok(())
}

/// Bodies that cannot be cloned fail with the reason, not with a partial clone.
#[test]
fn test_clone_failures() {
    let truncated = descriptor(MethodBody::new(vec![0x28, 0x01, 0x00]));
    assert!(matches!(
        clone_method(&truncated),
        Err(Error::MalformedBytecode { .. })
    ));

    let unknown = descriptor(MethodBody::new(vec![0x28, 0x09, 0x00, 0x00, 0x0A, 0x2A]));
    assert!(matches!(
        clone_method(&unknown),
        Err(Error::UnresolvedToken(Token(0x0A00_0009)))
    ));

    let mut untyped = MethodBody::new(vec![0x00; 8]);
    untyped.exception_regions = vec![ExceptionRegion::catch(0, 2, 2, 2, Token::NULL)];
    assert!(matches!(
        clone_method(&descriptor(untyped)),
        Err(Error::InvalidExceptionData(_))
    ));
}
