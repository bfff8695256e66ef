//! An interning destination scope for cloned method bodies.

use dashmap::{mapref::entry::Entry, DashMap};

use crate::{
    metadata::{
        resolver::{FieldRef, MethodRef, TokenProvider, TypeRef},
        token::{Token, TokenTable},
    },
    Error, Result,
};

/// Largest row a token can carry.
const MAX_ROW: usize = 0x00FF_FFFF;

/// Something a [`DynamicScope`] has issued a token for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DynamicEntry {
    /// An ordinary method
    Method(MethodRef),
    /// A method of a constructed generic type, interned together with its owner
    GenericMethod(MethodRef),
    /// A constructor
    Constructor(MethodRef),
    /// A runtime-generated method
    DynamicMethod(MethodRef),
    /// A field
    Field(FieldRef),
    /// A field of a constructed generic type, interned together with its owner
    GenericField(FieldRef),
    /// A type
    Type(TypeRef),
    /// A string literal
    String(String),
    /// A signature blob
    Signature(Vec<u8>),
}

impl DynamicEntry {
    /// The token table tokens for this entry are tagged with.
    #[must_use]
    pub fn table(&self) -> TokenTable {
        match self {
            DynamicEntry::Method(_)
            | DynamicEntry::Constructor(_)
            | DynamicEntry::DynamicMethod(_) => TokenTable::MethodDef,
            DynamicEntry::GenericMethod(_) | DynamicEntry::GenericField(_) => {
                TokenTable::MemberRef
            }
            DynamicEntry::Field(_) => TokenTable::Field,
            DynamicEntry::Type(_) => TokenTable::TypeDef,
            DynamicEntry::String(_) => TokenTable::UserString,
            DynamicEntry::Signature(_) => TokenTable::StandAloneSig,
        }
    }
}

/// A scope that issues tokens on demand and remembers what each token stands for.
///
/// Every distinct entry gets exactly one token, no matter how many threads ask for it
/// concurrently: the entry to token map is a [`DashMap`] whose shard lock is held while a
/// new entry is appended to the token to entry list (a [`boxcar::Vec`], which never moves
/// or drops what it holds). The row of a token is its position in that list plus one; the
/// table byte reflects the kind of entry.
///
/// The execution engine that compiles a cloned body uses [`DynamicScope::entry`] to turn
/// the rewritten tokens back into entities.
///
/// ```rust
/// use cildetour::metadata::resolver::{DynamicEntry, DynamicScope, TokenProvider, TypeRef};
///
/// let scope = DynamicScope::new();
/// let int32 = TypeRef::new(8, "System.Int32");
/// let token = scope.token_for_type(&int32)?;
///
/// assert_eq!(scope.token_for_type(&int32)?, token);
/// assert_eq!(scope.entry(token), Some(DynamicEntry::Type(int32)));
/// # Ok::<(), cildetour::Error>(())
/// ```
#[derive(Default)]
pub struct DynamicScope {
    tokens: DashMap<DynamicEntry, Token>,
    entries: boxcar::Vec<DynamicEntry>,
}

impl DynamicScope {
    /// Create an empty scope.
    #[must_use]
    pub fn new() -> Self {
        DynamicScope {
            tokens: DashMap::new(),
            entries: boxcar::Vec::new(),
        }
    }

    /// What `token` was issued for, if this scope issued it.
    #[must_use]
    pub fn entry(&self, token: Token) -> Option<DynamicEntry> {
        let index = (token.row() as usize).checked_sub(1)?;
        let entry = self.entries.get(index)?;
        (entry.table() as u8 == token.table()).then(|| entry.clone())
    }

    /// Number of distinct entries interned so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.count()
    }

    /// Returns `true` if no token has been issued yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn intern(&self, entry: DynamicEntry) -> Result<Token> {
        if let Some(token) = self.tokens.get(&entry) {
            return Ok(*token);
        }

        match self.tokens.entry(entry) {
            Entry::Occupied(occupied) => Ok(*occupied.get()),
            Entry::Vacant(vacant) => {
                let table = vacant.key().table();
                let index = self.entries.push(vacant.key().clone());
                let row = u32::try_from(index + 1)
                    .ok()
                    .filter(|row| *row as usize <= MAX_ROW)
                    .ok_or_else(|| {
                        Error::Error(format!("dynamic scope is full ({index} entries)"))
                    })?;

                let token = Token::from_parts(table, row);
                vacant.insert(token);
                Ok(token)
            }
        }
    }
}

impl TokenProvider for DynamicScope {
    fn token_for_method(&self, method: &MethodRef) -> Result<Token> {
        if method.has_generic_owner() {
            self.intern(DynamicEntry::GenericMethod(method.clone()))
        } else {
            self.intern(DynamicEntry::Method(method.clone()))
        }
    }

    fn token_for_constructor(&self, constructor: &MethodRef) -> Result<Token> {
        if constructor.has_generic_owner() {
            self.intern(DynamicEntry::GenericMethod(constructor.clone()))
        } else {
            self.intern(DynamicEntry::Constructor(constructor.clone()))
        }
    }

    fn token_for_dynamic_method(&self, method: &MethodRef) -> Result<Token> {
        self.intern(DynamicEntry::DynamicMethod(method.clone()))
    }

    fn token_for_field(&self, field: &FieldRef) -> Result<Token> {
        if field.has_generic_owner() {
            self.intern(DynamicEntry::GenericField(field.clone()))
        } else {
            self.intern(DynamicEntry::Field(field.clone()))
        }
    }

    fn token_for_type(&self, ty: &TypeRef) -> Result<Token> {
        self.intern(DynamicEntry::Type(ty.clone()))
    }

    fn token_for_string(&self, literal: &str) -> Result<Token> {
        self.intern(DynamicEntry::String(literal.to_string()))
    }

    fn token_for_signature(&self, blob: &[u8]) -> Result<Token> {
        self.intern(DynamicEntry::Signature(blob.to_vec()))
    }
}
