use std::fmt;
use std::hash::{Hash, Hasher};

use strum::{Display, FromRepr};

/// The metadata tables a token operand can point into.
///
/// Only the tables that can appear as CIL operands, as local signature tokens or as
/// catch type tokens are listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr)]
#[repr(u8)]
pub enum TokenTable {
    /// `TypeRef` (0x01)
    TypeRef = 0x01,
    /// `TypeDef` (0x02)
    TypeDef = 0x02,
    /// `Field` (0x04)
    Field = 0x04,
    /// `MethodDef` (0x06)
    MethodDef = 0x06,
    /// `MemberRef` (0x0A), also used for members of generic instantiations
    MemberRef = 0x0A,
    /// `StandAloneSig` (0x11), local variable and indirect call signatures
    StandAloneSig = 0x11,
    /// `TypeSpec` (0x1B), generic instantiations and constructed types
    TypeSpec = 0x1B,
    /// `MethodSpec` (0x2B)
    MethodSpec = 0x2B,
    /// The user string heap (0x70)
    UserString = 0x70,
}

/// A metadata token representing a reference to a metadata table entry.
///
/// Tokens in .NET metadata consist of a 32-bit value where:
/// - The high byte (bits 24-31) indicates the table type
/// - The low 24 bits (bits 0-23) indicate the row index within that table
///
/// A token is only meaningful inside the scope that issued it; moving code between
/// scopes means translating every token (see [`crate::metadata::resolver`]).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Token(pub u32);

impl Token {
    /// The null token
    pub const NULL: Token = Token(0);

    /// Creates a new token from a raw 32-bit value
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Creates a token from a table and a row index (only the low 24 bits of `row` are used)
    #[must_use]
    pub fn from_parts(table: TokenTable, row: u32) -> Self {
        Token((u32::from(table as u8) << 24) | (row & 0x00FF_FFFF))
    }

    /// Returns the raw token value
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Extracts the table type from the token (high byte)
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// The table as a [`TokenTable`], if it is one this crate knows
    #[must_use]
    pub fn table_kind(&self) -> Option<TokenTable> {
        TokenTable::from_repr(self.table())
    }

    /// Extracts the row index from the token (low 24 bits)
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Returns true if this is a null token (value 0)
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_token_parts() {
        let token = Token::new(0x0600_0001);
        assert_eq!(token.value(), 0x0600_0001);
        assert_eq!(token.table(), 0x06);
        assert_eq!(token.row(), 1);
        assert_eq!(token.table_kind(), Some(TokenTable::MethodDef));

        let max_token = Token(0xFFFF_FFFF);
        assert_eq!(max_token.table(), 0xFF);
        assert_eq!(max_token.row(), 0x00FF_FFFF);
        assert_eq!(max_token.table_kind(), None);
    }

    #[test]
    fn test_token_from_parts() {
        let token = Token::from_parts(TokenTable::UserString, 0x12);
        assert_eq!(token, Token(0x7000_0012));

        // Row overflow never leaks into the table byte
        let token = Token::from_parts(TokenTable::TypeRef, 0x0100_0002);
        assert_eq!(token, Token(0x0100_0002));
        assert_eq!(token.table_kind(), Some(TokenTable::TypeRef));
    }

    #[test]
    fn test_token_is_null() {
        assert!(Token::NULL.is_null());
        assert!(Token::default().is_null());
        assert!(!Token(0x0A00_0003).is_null());
    }

    #[test]
    fn test_token_from_conversion() {
        let value = 0x0400_0007u32;
        let token: Token = value.into();
        assert_eq!(token.table_kind(), Some(TokenTable::Field));

        let back_to_u32: u32 = token.into();
        assert_eq!(back_to_u32, value);
    }

    #[test]
    fn test_token_display_and_debug() {
        let token = Token(0x1100_0001);
        assert_eq!(format!("{}", token), "0x11000001");

        let debug_str = format!("{:?}", token);
        assert!(debug_str.contains("Token(0x11000001"));
        assert!(debug_str.contains("table: 0x11"));
        assert!(debug_str.contains("row: 1"));

        assert_eq!(TokenTable::StandAloneSig.to_string(), "StandAloneSig");
    }

    #[test]
    fn test_token_ordering_and_hash() {
        let token1 = Token(0x0600_0001);
        let token2 = Token(0x0600_0002);
        let token3 = Token(0x0A00_0001);
        assert!(token1 < token2 && token2 < token3);

        let mut map = HashMap::new();
        map.insert(token1, "first");
        map.insert(token3, "member");
        assert_eq!(map.get(&Token(0x0A00_0001)), Some(&"member"));
        assert_eq!(map.get(&token2), None);
    }
}
