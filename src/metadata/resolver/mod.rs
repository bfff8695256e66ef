//! Token resolution between metadata scopes.
//!
//! A [`crate::metadata::token::Token`] only means something inside the scope that
//! issued it. Moving a method body from its defining module into a fresh dynamic scope
//! therefore means translating every token operand: the source scope resolves the
//! token to the logical entity it names ([`MetadataScope`]), and the destination scope
//! hands out its own token for that entity ([`TokenProvider`]).
//!
//! # Key Components
//!
//! - [`MetadataScope`] - Source side, token to entity
//! - [`TokenProvider`] - Destination side, entity to token
//! - [`Member`], [`MethodRef`], [`FieldRef`], [`TypeRef`] - The entities a token can name
//! - [`DynamicScope`] - An interning destination scope for cloned methods
//! - [`resolve_operand`] - Per-operand routing used by the method cloner
//!
//! # Examples
//!
//! ```rust
//! use cildetour::disassembler::OperandType;
//! use cildetour::metadata::resolver::{resolve_operand, DynamicScope, MetadataScope, Member};
//! use cildetour::metadata::token::Token;
//! use cildetour::Result;
//!
//! struct Strings;
//!
//! impl MetadataScope for Strings {
//!     fn resolve_member(&self, token: Token) -> Result<Member> {
//!         Err(cildetour::Error::UnresolvedToken(token))
//!     }
//!     fn resolve_string(&self, _token: Token) -> Result<String> {
//!         Ok("hello".to_string())
//!     }
//!     fn resolve_signature(&self, token: Token) -> Result<Vec<u8>> {
//!         Err(cildetour::Error::UnresolvedToken(token))
//!     }
//! }
//!
//! let scope = DynamicScope::new();
//! let a = resolve_operand(&Strings, &scope, OperandType::String, Token::new(0x7000_0001))?;
//! let b = resolve_operand(&Strings, &scope, OperandType::String, Token::new(0x7000_0009))?;
//! assert_eq!(a, b);
//! # Ok::<(), cildetour::Error>(())
//! ```

mod dynamic;

pub use dynamic::{DynamicEntry, DynamicScope};

use std::fmt;

use crate::{disassembler::OperandType, metadata::token::Token, Error, Result};

/// Stable identity of a runtime entity (method, field or type).
///
/// Handles are what the execution environment uses to tell entities apart; two
/// references with the same handle name the same entity regardless of which scope the
/// reference came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RuntimeHandle(pub u64);

impl fmt::Display for RuntimeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl From<u64> for RuntimeHandle {
    fn from(value: u64) -> Self {
        RuntimeHandle(value)
    }
}

/// A resolved type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeRef {
    /// Identity of the type
    pub handle: RuntimeHandle,
    /// Display name, informational only
    pub name: String,
    /// Constructed generic type (its members need the owner to be resolved)
    pub is_generic: bool,
    /// Value type; instance methods receive `this` by reference
    pub is_value_type: bool,
}

impl TypeRef {
    /// A non-generic reference type
    pub fn new(handle: impl Into<RuntimeHandle>, name: impl Into<String>) -> Self {
        TypeRef {
            handle: handle.into(),
            name: name.into(),
            is_generic: false,
            is_value_type: false,
        }
    }
}

/// A resolved method or constructor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodRef {
    /// Identity of the method
    pub handle: RuntimeHandle,
    /// Display name, informational only
    pub name: String,
    /// Declaring type, `None` for global methods
    pub declaring: Option<TypeRef>,
    /// Instance or type constructor
    pub is_constructor: bool,
    /// Generated at runtime, has no backing metadata row
    pub is_dynamic: bool,
}

impl MethodRef {
    /// Returns `true` if the owner is a constructed generic type.
    #[must_use]
    pub fn has_generic_owner(&self) -> bool {
        self.declaring.as_ref().is_some_and(|owner| owner.is_generic)
    }
}

/// A resolved field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    /// Identity of the field
    pub handle: RuntimeHandle,
    /// Display name, informational only
    pub name: String,
    /// Declaring type, `None` for global fields
    pub declaring: Option<TypeRef>,
}

impl FieldRef {
    /// Returns `true` if the owner is a constructed generic type.
    #[must_use]
    pub fn has_generic_owner(&self) -> bool {
        self.declaring.as_ref().is_some_and(|owner| owner.is_generic)
    }
}

/// The entity a member token resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Member {
    /// A method or constructor
    Method(MethodRef),
    /// A field
    Field(FieldRef),
    /// A type
    Type(TypeRef),
}

/// The source side of token resolution.
///
/// Implemented by whatever owns the metadata a method body was compiled against,
/// typically the module of the method being cloned.
pub trait MetadataScope: Send + Sync {
    /// Resolve a field, method or type token.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnresolvedToken`] if the token names nothing in this scope.
    fn resolve_member(&self, token: Token) -> Result<Member>;

    /// Resolve a user string token.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnresolvedToken`] if the token names nothing in this scope.
    fn resolve_string(&self, token: Token) -> Result<String>;

    /// Resolve a stand-alone signature token to its raw blob.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnresolvedToken`] if the token names nothing in this scope.
    fn resolve_signature(&self, token: Token) -> Result<Vec<u8>>;
}

/// The destination side of token resolution.
///
/// Resolving the same logical entity twice must yield tokens the destination's consumer
/// treats as equivalent.
pub trait TokenProvider: Send + Sync {
    /// Token for an ordinary method
    ///
    /// # Errors
    /// Returns an error if the destination cannot issue another token.
    fn token_for_method(&self, method: &MethodRef) -> Result<Token>;

    /// Token for a constructor
    ///
    /// # Errors
    /// Returns an error if the destination cannot issue another token.
    fn token_for_constructor(&self, constructor: &MethodRef) -> Result<Token>;

    /// Token for a runtime-generated method
    ///
    /// # Errors
    /// Returns an error if the destination cannot issue another token.
    fn token_for_dynamic_method(&self, method: &MethodRef) -> Result<Token>;

    /// Token for a field
    ///
    /// # Errors
    /// Returns an error if the destination cannot issue another token.
    fn token_for_field(&self, field: &FieldRef) -> Result<Token>;

    /// Token for a type
    ///
    /// # Errors
    /// Returns an error if the destination cannot issue another token.
    fn token_for_type(&self, ty: &TypeRef) -> Result<Token>;

    /// Token for a string literal
    ///
    /// # Errors
    /// Returns an error if the destination cannot issue another token.
    fn token_for_string(&self, literal: &str) -> Result<Token>;

    /// Token for a signature blob (local variables, `calli` call sites)
    ///
    /// # Errors
    /// Returns an error if the destination cannot issue another token.
    fn token_for_signature(&self, blob: &[u8]) -> Result<Token>;
}

/// Translate one token operand of kind `kind` from `source` into `destination`.
///
/// A null token stays null. Member tokens are routed by what they resolve to, not by
/// the operand kind, so an `ldtoken` naming a method and a `call` naming the same method
/// end up with the same destination token.
///
/// # Errors
///
/// Propagates resolution errors of either side, and returns [`crate::Error::Impossible`]
/// if `kind` does not carry a token.
pub fn resolve_operand(
    source: &dyn MetadataScope,
    destination: &dyn TokenProvider,
    kind: OperandType,
    token: Token,
) -> Result<Token> {
    if token.is_null() {
        return Ok(Token::NULL);
    }

    match kind {
        OperandType::String => destination.token_for_string(&source.resolve_string(token)?),
        OperandType::Sig => destination.token_for_signature(&source.resolve_signature(token)?),
        OperandType::Field | OperandType::Method | OperandType::Type | OperandType::Tok => {
            resolve_member(destination, &source.resolve_member(token)?)
        }
        other => Err(Error::Impossible(format!(
            "{other:?} operand {token} is not a metadata reference"
        ))),
    }
}

/// Issue the destination token for an already resolved member.
///
/// # Errors
///
/// Propagates the error of the destination.
pub fn resolve_member(destination: &dyn TokenProvider, member: &Member) -> Result<Token> {
    match member {
        Member::Method(method) if method.is_dynamic => destination.token_for_dynamic_method(method),
        Member::Method(method) if method.is_constructor => {
            destination.token_for_constructor(method)
        }
        Member::Method(method) => destination.token_for_method(method),
        Member::Field(field) => destination.token_for_field(field),
        Member::Type(ty) => destination.token_for_type(ty),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{metadata::token::TokenTable, test::TableScope};

    fn scope() -> TableScope {
        let list = TypeRef {
            is_generic: true,
            ..TypeRef::new(20, "List`1<int32>")
        };
        TableScope::new()
            .with_member(
                0x0A00_0001,
                Member::Method(MethodRef {
                    handle: RuntimeHandle(1),
                    name: "Add".into(),
                    declaring: Some(list.clone()),
                    is_constructor: false,
                    is_dynamic: false,
                }),
            )
            .with_member(
                0x0600_0002,
                Member::Method(MethodRef {
                    handle: RuntimeHandle(2),
                    name: ".ctor".into(),
                    declaring: Some(TypeRef::new(21, "Point")),
                    is_constructor: true,
                    is_dynamic: false,
                }),
            )
            .with_member(0x0200_0003, Member::Type(list))
            .with_string(0x7000_0001, "hi")
            .with_signature(0x1100_0001, vec![0x07, 0x01, 0x08])
    }

    #[test]
    fn null_stays_null() {
        let destination = DynamicScope::new();
        let token = resolve_operand(&scope(), &destination, OperandType::Method, Token::NULL);
        assert_eq!(token.unwrap(), Token::NULL);
        assert!(destination.is_empty());
    }

    #[test]
    fn routes_by_entity() {
        let source = scope();
        let destination = DynamicScope::new();

        let add = resolve_operand(&source, &destination, OperandType::Method, Token(0x0A00_0001));
        let add = add.unwrap();
        assert_eq!(add.table_kind(), Some(TokenTable::MemberRef));

        let ldtoken = resolve_operand(&source, &destination, OperandType::Tok, Token(0x0A00_0001));
        assert_eq!(ldtoken.unwrap(), add);

        let ctor = resolve_operand(&source, &destination, OperandType::Method, Token(0x0600_0002));
        assert!(matches!(
            destination.entry(ctor.unwrap()),
            Some(DynamicEntry::Constructor(_))
        ));

        let sig = resolve_operand(&source, &destination, OperandType::Sig, Token(0x1100_0001));
        assert_eq!(
            destination.entry(sig.unwrap()),
            Some(DynamicEntry::Signature(vec![0x07, 0x01, 0x08]))
        );
    }

    #[test]
    fn unresolved_and_impossible() {
        let source = scope();
        let destination = DynamicScope::new();

        let missing = resolve_operand(&source, &destination, OperandType::Field, Token(0x0400_0009));
        assert!(matches!(missing, Err(Error::UnresolvedToken(_))));

        let bogus = resolve_operand(&source, &destination, OperandType::Int32, Token(1));
        assert!(matches!(bogus, Err(Error::Impossible(_))));
    }
}
