use std::collections::HashMap;

use crate::{
    metadata::{
        resolver::{Member, MetadataScope},
        token::Token,
    },
    Error, Result,
};

/// A [`MetadataScope`] answering from fixed tables.
#[derive(Debug, Clone, Default)]
pub struct TableScope {
    members: HashMap<Token, Member>,
    strings: HashMap<Token, String>,
    signatures: HashMap<Token, Vec<u8>>,
}

impl TableScope {
    pub fn new() -> Self {
        TableScope::default()
    }

    pub fn with_member(mut self, token: u32, member: Member) -> Self {
        self.members.insert(Token(token), member);
        self
    }

    pub fn with_string(mut self, token: u32, literal: &str) -> Self {
        self.strings.insert(Token(token), literal.to_string());
        self
    }

    pub fn with_signature(mut self, token: u32, blob: Vec<u8>) -> Self {
        self.signatures.insert(Token(token), blob);
        self
    }
}

impl MetadataScope for TableScope {
    fn resolve_member(&self, token: Token) -> Result<Member> {
        self.members
            .get(&token)
            .cloned()
            .ok_or(Error::UnresolvedToken(token))
    }

    fn resolve_string(&self, token: Token) -> Result<String> {
        self.strings
            .get(&token)
            .cloned()
            .ok_or(Error::UnresolvedToken(token))
    }

    fn resolve_signature(&self, token: Token) -> Result<Vec<u8>> {
        self.signatures
            .get(&token)
            .cloned()
            .ok_or(Error::UnresolvedToken(token))
    }
}
