//! Copying compiled method bodies into a fresh scope.
//!
//! Detouring a method destroys its entry point, so the original behaviour has to live on
//! somewhere else. The cloner copies the CIL body of a method into a [`ClonedMethod`]
//! whose tokens all belong to a new [`DynamicScope`]: the local signature is copied
//! verbatim, exception regions are re-encoded, and every instruction is re-emitted with
//! its original width, only swapping metadata tokens for their translation.
//!
//! The clone is decoupled from the original's metadata; the method's execution engine
//! compiles it into something invocable (see [`crate::runtime::ExecutionEngine`]).
//!
//! # Examples
//!
//! ```rust,no_run
//! use cildetour::cloner::clone_method;
//! # fn descriptor() -> cildetour::MethodDescriptor { unimplemented!() }
//!
//! let method = descriptor();
//! let cloned = clone_method(&method)?;
//! println!("{} bytes of code, {} tokens", cloned.code.len(), cloned.scope.len());
//! # Ok::<(), cildetour::Error>(())
//! ```

mod rewrite;

pub use rewrite::rewrite_code;

use std::{fmt, sync::Arc};

use log::{debug, warn};

use crate::{
    metadata::{
        method::{encode_exception_regions, write_fat_body, MethodDescriptor},
        resolver::{DynamicScope, TokenProvider},
        signatures::ParamType,
        token::Token,
    },
    Error, Result,
};

/// Local variable signature of a method without locals (`LOCAL_SIG`, zero entries).
pub const EMPTY_LOCAL_SIGNATURE: [u8; 2] = [0x07, 0x00];

/// An independently invocable copy of a compiled method.
///
/// All tokens in `code`, `exception_section` and `local_sig_token` were issued by `scope`.
/// Instance methods are flattened: the receiver is the first entry of `params`.
#[derive(Clone)]
pub struct ClonedMethod {
    /// Name of the original method
    pub name: String,
    /// Rewritten instruction stream
    pub code: Vec<u8>,
    /// Encoded exception handling section, empty if the method has no regions
    pub exception_section: Vec<u8>,
    /// The local variable signature blob
    pub local_signature: Vec<u8>,
    /// Token of `local_signature` inside `scope`
    pub local_sig_token: Token,
    /// Maximum operand stack depth
    pub max_stack: u16,
    /// Zero-initialize locals on entry
    pub init_locals: bool,
    /// Parameters, receiver first for instance methods
    pub params: Vec<ParamType>,
    /// Return type
    pub return_type: ParamType,
    /// The scope every token of this clone belongs to
    pub scope: Arc<DynamicScope>,
}

impl ClonedMethod {
    /// Lay the clone out as a fat method body.
    ///
    /// # Errors
    /// Returns [`crate::Error::MalformedBytecode`] if the code does not fit a method body.
    pub fn to_body_bytes(&self) -> Result<Vec<u8>> {
        write_fat_body(
            &self.code,
            self.max_stack,
            self.local_sig_token,
            self.init_locals,
            &self.exception_section,
        )
    }

    /// Returns `true` if the clone carries exception handling data.
    #[must_use]
    pub fn has_exception_section(&self) -> bool {
        !self.exception_section.is_empty()
    }
}

impl fmt::Debug for ClonedMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClonedMethod")
            .field("name", &self.name)
            .field("code_size", &self.code.len())
            .field("exception_section_size", &self.exception_section.len())
            .field("local_sig_token", &self.local_sig_token)
            .field("max_stack", &self.max_stack)
            .field("init_locals", &self.init_locals)
            .field("params", &self.params)
            .field("return_type", &self.return_type)
            .field("scope_entries", &self.scope.len())
            .finish()
    }
}

/// Clone `method` into a new [`DynamicScope`].
///
/// # Errors
/// See [`clone_method_into`].
pub fn clone_method(method: &MethodDescriptor) -> Result<ClonedMethod> {
    clone_method_into(method, Arc::new(DynamicScope::new()))
}

/// Clone `method` into `scope`.
///
/// Several clones can share one scope; equal entities then share their tokens.
///
/// # Errors
///
/// - [`crate::Error::UnsupportedMethodShape`] for dynamic methods, open generic
///   definitions, variable argument lists and methods without CIL body
/// - [`crate::Error::Impossible`] for an instance method without declaring type
/// - [`crate::Error::MalformedBytecode`] if the body does not decode
/// - [`crate::Error::InvalidExceptionData`] if a catch region has no type
/// - Token resolution errors of the method's module
pub fn clone_method_into(method: &MethodDescriptor, scope: Arc<DynamicScope>) -> Result<ClonedMethod> {
    method.ensure_cloneable()?;
    let Some(body) = method.body.as_ref() else {
        return Err(Error::UnsupportedMethodShape(format!(
            "{}: method has no CIL body",
            method.name
        )));
    };

    let params = method.flattened_params()?;
    let source = method.module.as_ref();

    let local_signature = if body.local_var_sig_token.is_null() {
        EMPTY_LOCAL_SIGNATURE.to_vec()
    } else {
        source
            .resolve_signature(body.local_var_sig_token)
            .inspect_err(|error| {
                warn!(
                    "{method}: local signature {} cannot be resolved: {error}",
                    body.local_var_sig_token
                );
            })?
    };
    let local_sig_token = scope.token_for_signature(&local_signature)?;

    let exception_section =
        encode_exception_regions(&body.exception_regions, source, scope.as_ref())?;
    let code = rewrite_code(&body.code, source, scope.as_ref())?;

    debug!(
        "cloned {method}: {} bytes of code, {} exception regions, {} scope entries",
        code.len(),
        body.exception_regions.len(),
        scope.len()
    );

    Ok(ClonedMethod {
        name: method.name.clone(),
        code,
        exception_section,
        local_signature,
        local_sig_token,
        max_stack: body.max_stack,
        init_locals: body.init_locals,
        params,
        return_type: method.signature.return_type,
        scope,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        disassembler::{decode_stream, Operand},
        file::parser::Parser,
        metadata::{
            method::{ExceptionRegion, ExceptionRegionKind, MethodBody},
            resolver::{DynamicEntry, Member, MethodRef, RuntimeHandle, TypeRef},
            signatures::ElementType,
            token::TokenTable,
        },
        test::{add_method, MethodBuilder, TableScope},
    };

    const CODE: [u8; 21] = [
        0x72, 0x01, 0x00, 0x00, 0x70, // ldstr 0x70000001
        0x28, 0x01, 0x00, 0x00, 0x0A, // call 0x0A000001
        0x1F, 0x2A, // ldc.i4.s 42
        0x2B, 0x00, // br.s IL_000e
        0xD0, 0x03, 0x00, 0x00, 0x02, // ldtoken 0x02000003
        0x26, // pop
        0x2A, // ret
    ];

    fn module() -> TableScope {
        TableScope::new()
            .with_string(0x7000_0001, "hello")
            .with_member(
                0x0A00_0001,
                Member::Method(MethodRef {
                    handle: RuntimeHandle(100),
                    name: "WriteLine".into(),
                    declaring: Some(TypeRef::new(101, "System.Console")),
                    is_constructor: false,
                    is_dynamic: false,
                }),
            )
            .with_member(0x0200_0003, Member::Type(TypeRef::new(102, "Widget")))
            .with_member(0x0100_0005, Member::Type(TypeRef::new(103, "System.Exception")))
            .with_signature(0x1100_0001, vec![0x07, 0x01, 0x08])
    }

    #[test]
    fn rewrites_every_token() {
        let mut body = MethodBody::new(CODE.to_vec());
        body.local_var_sig_token = Token(0x1100_0001);
        body.init_locals = true;
        body.max_stack = 3;

        let method = MethodBuilder::new("Run").module(module()).body(body).build();
        let cloned = clone_method(&method).unwrap();

        assert_eq!(cloned.code.len(), CODE.len());
        assert_eq!(cloned.max_stack, 3);
        assert!(cloned.init_locals);
        assert_eq!(cloned.local_signature, vec![0x07, 0x01, 0x08]);
        assert_eq!(
            cloned.scope.entry(cloned.local_sig_token),
            Some(DynamicEntry::Signature(vec![0x07, 0x01, 0x08]))
        );

        let original = decode_stream(&mut Parser::new(&CODE)).unwrap();
        let rewritten = decode_stream(&mut Parser::new(&cloned.code)).unwrap();
        assert_eq!(original.len(), rewritten.len());

        for (before, after) in original.iter().zip(&rewritten) {
            assert_eq!(before.mnemonic, after.mnemonic);
            assert_eq!(before.offset, after.offset);
            if !before.op_type.is_token() {
                assert_eq!(before.operand, after.operand);
            }
        }

        let Operand::Token(string) = rewritten[0].operand else {
            panic!("ldstr lost its token");
        };
        assert_eq!(string.table_kind(), Some(TokenTable::UserString));
        assert_eq!(
            cloned.scope.entry(string),
            Some(DynamicEntry::String("hello".into()))
        );

        let Operand::Token(call) = rewritten[1].operand else {
            panic!("call lost its token");
        };
        assert!(matches!(
            cloned.scope.entry(call),
            Some(DynamicEntry::Method(ref method)) if method.name == "WriteLine"
        ));

        let Operand::Token(ty) = rewritten[4].operand else {
            panic!("ldtoken lost its token");
        };
        assert!(matches!(cloned.scope.entry(ty), Some(DynamicEntry::Type(_))));
    }

    #[test]
    fn empty_locals_and_exceptions() {
        let code = vec![0x00; 0x20];
        let mut body = MethodBody::new(code.clone());
        body.exception_regions = vec![
            ExceptionRegion::catch(0, 4, 4, 4, Token(0x0100_0005)),
            ExceptionRegion::finally(0, 8, 8, 2),
        ];

        let method = MethodBuilder::new("Guarded").module(module()).body(body).build();
        let cloned = clone_method(&method).unwrap();

        assert_eq!(cloned.local_signature, EMPTY_LOCAL_SIGNATURE.to_vec());
        assert!(cloned.has_exception_section());
        assert_eq!(cloned.exception_section[0], 0x01);

        let reparsed = MethodBody::from(&cloned.to_body_bytes().unwrap()).unwrap();
        assert_eq!(reparsed.code, code);
        assert_eq!(reparsed.local_var_sig_token, cloned.local_sig_token);
        assert_eq!(reparsed.exception_regions.len(), 2);
        assert_eq!(reparsed.exception_regions[0].kind(), ExceptionRegionKind::Catch);
        assert_eq!(reparsed.exception_regions[1].kind(), ExceptionRegionKind::Finally);

        let catch_type = reparsed.exception_regions[0].catch_type.unwrap();
        assert!(matches!(
            cloned.scope.entry(catch_type),
            Some(DynamicEntry::Type(ref ty)) if ty.name == "System.Exception"
        ));
    }

    #[test]
    fn flattened_receiver() {
        let method = MethodBuilder::new("Get")
            .instance_of(TypeRef::new(3, "Widget"))
            .params(vec![ElementType::I4.into()])
            .returns(ElementType::I4.into())
            .build();
        let cloned = clone_method(&method).unwrap();

        assert_eq!(
            cloned.params,
            vec![ElementType::Object.into(), ElementType::I4.into()]
        );
        assert_eq!(cloned.return_type, ElementType::I4.into());
    }

    #[test]
    fn shared_scope() {
        let scope = Arc::new(DynamicScope::new());
        let first = clone_method_into(&add_method(), scope.clone()).unwrap();
        let second = clone_method_into(&add_method(), scope.clone()).unwrap();

        assert_eq!(first.local_sig_token, second.local_sig_token);
        assert_eq!(scope.len(), 1);
    }

    #[test]
    fn refused_shapes() {
        let mut method = add_method();
        method.is_dynamic = true;
        assert!(matches!(
            clone_method(&method),
            Err(Error::UnsupportedMethodShape(_))
        ));

        let mut method = add_method();
        method.body = None;
        assert!(matches!(
            clone_method(&method),
            Err(Error::UnsupportedMethodShape(_))
        ));

        let mut method = add_method();
        method.is_static = false;
        assert!(matches!(clone_method(&method), Err(Error::Impossible(_))));
    }

    #[test]
    fn unresolved_local_signature() {
        let mut body = MethodBody::new(vec![0x2A]);
        body.local_var_sig_token = Token(0x1100_0042);
        let method = MethodBuilder::new("Broken").module(module()).body(body).build();

        assert!(matches!(
            clone_method(&method),
            Err(Error::UnresolvedToken(Token(0x1100_0042)))
        ));
    }

    #[test]
    fn malformed_body() {
        let method = MethodBuilder::new("Garbage")
            .body(MethodBody::new(vec![0x20, 0x01]))
            .build();
        assert!(matches!(
            clone_method(&method),
            Err(Error::MalformedBytecode { .. })
        ));
    }
}
