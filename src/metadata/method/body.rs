//! Representation, parsing and assembly of CIL method bodies.
//!
//! A method body is a header (tiny or fat), the code, and for fat bodies an optional
//! chain of data sections carrying exception handling regions (ECMA-335 II.25.4).
//! [`MethodBody::from`] parses all of it; [`write_fat_body`] produces the bytes of a
//! fat body from its parts, which is how cloned methods are laid out.
//!
//! # Examples
//!
//! ```rust
//! use cildetour::metadata::method::MethodBody;
//!
//! // Tiny header: code size 4, then ldarg.0, ldarg.1, add, ret
//! let body = MethodBody::from(&[0x12, 0x02, 0x03, 0x58, 0x2A])?;
//! assert!(!body.is_fat);
//! assert_eq!(body.code, [0x02, 0x03, 0x58, 0x2A]);
//! assert_eq!(body.max_stack, 8);
//! # Ok::<(), cildetour::Error>(())
//! ```
//!
//! # References
//! - ECMA-335 6th Edition, Partition II, Section 25.4 - Method Header Format

use crate::{
    file::{io::emit_le, parser::Parser},
    metadata::{
        method::{
            parse_exception_sections, ExceptionRegion, MethodBodyFlags, FAT_HEADER_DWORDS,
            FAT_HEADER_SIZE,
        },
        token::Token,
    },
    Error, Result,
};

/// Maximum stack depth implied by a tiny header
const TINY_MAX_STACK: u16 = 8;
/// Largest code size a tiny header can describe
const TINY_MAX_CODE_SIZE: usize = 0x3F;

/// Describes one method that has been compiled to CIL bytecode.
///
/// Tokens inside `code`, `local_var_sig_token` and the catch types of
/// `exception_regions` all belong to the scope the body was compiled against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodBody {
    /// The instruction stream
    pub code: Vec<u8>,
    /// Maximum number of items on the operand stack
    pub max_stack: u16,
    /// Stand-alone signature describing the locals, null if there are none
    pub local_var_sig_token: Token,
    /// Zero-initialize all locals on entry
    pub init_locals: bool,
    /// The body was stored with a fat header
    pub is_fat: bool,
    /// Exception handling regions, in declaration order
    pub exception_regions: Vec<ExceptionRegion>,
}

impl MethodBody {
    /// A body without locals or exception regions.
    #[must_use]
    pub fn new(code: Vec<u8>) -> Self {
        MethodBody {
            is_fat: code.len() > TINY_MAX_CODE_SIZE,
            code,
            max_stack: TINY_MAX_STACK,
            local_var_sig_token: Token::NULL,
            init_locals: false,
            exception_regions: Vec::new(),
        }
    }

    /// Parse a method body from its raw bytes, starting at the header.
    ///
    /// # Arguments
    /// * `data` - The byte slice holding header, code and data sections
    ///
    /// # Errors
    /// Returns [`crate::Error::MalformedBytecode`] if the data is empty, truncated, or the
    /// header is neither tiny nor fat.
    pub fn from(data: &[u8]) -> Result<MethodBody> {
        let mut parser = Parser::new(data);
        Self::parse(&mut parser).map_err(|error| match error {
            Error::OutOfBounds => malformed_error!(
                "Method body of {} bytes is truncated at {}",
                data.len(),
                parser.pos()
            ),
            other => other,
        })
    }

    fn parse(parser: &mut Parser) -> Result<MethodBody> {
        if parser.is_empty() {
            return Err(malformed_error!("Provided data for body parsing is empty"));
        }

        let first_byte = parser.peek_byte()?;
        match MethodBodyFlags::from_bits_truncate(u16::from(first_byte & 0b_0000_0011)) {
            MethodBodyFlags::TINY_FORMAT => {
                parser.advance_by(1)?;
                let code = parser.read_bytes((first_byte >> 2) as usize)?;

                Ok(MethodBody {
                    code: code.to_vec(),
                    max_stack: TINY_MAX_STACK,
                    local_var_sig_token: Token::NULL,
                    init_locals: false,
                    is_fat: false,
                    exception_regions: Vec::new(),
                })
            }
            MethodBodyFlags::FAT_FORMAT => {
                let first_duo = parser.read_le::<u16>()?;
                let size_header = usize::from(first_duo >> 12) * 4;
                if size_header < FAT_HEADER_SIZE {
                    return Err(malformed_error!(
                        "Fat header declares {} bytes, needs {}",
                        size_header,
                        FAT_HEADER_SIZE
                    ));
                }

                let flags = MethodBodyFlags::from_bits_truncate(first_duo & 0x0FFF);
                let max_stack = parser.read_le::<u16>()?;
                let size_code = parser.read_le::<u32>()? as usize;
                let local_var_sig_token = Token::new(parser.read_le::<u32>()?);

                parser.seek(size_header)?;
                let code = parser.read_bytes(size_code)?.to_vec();

                // The extra sections currently can only contain exception handling data
                let exception_regions = if flags.contains(MethodBodyFlags::MORE_SECTS) {
                    parse_exception_sections(parser)?
                } else {
                    Vec::new()
                };

                Ok(MethodBody {
                    code,
                    max_stack,
                    local_var_sig_token,
                    init_locals: flags.contains(MethodBodyFlags::INIT_LOCALS),
                    is_fat: true,
                    exception_regions,
                })
            }
            _ => Err(malformed_error!(
                "MethodHeader is neither FAT nor TINY - {}",
                first_byte
            )),
        }
    }

    /// Returns `true` if the body has exception handling regions.
    #[must_use]
    pub fn has_exception_regions(&self) -> bool {
        !self.exception_regions.is_empty()
    }
}

/// Lay out a fat method body.
///
/// Writes the 12-byte fat header, the code, and, if `exception_section` is non-empty,
/// padding to the next 4-byte boundary followed by the section.
///
/// # Errors
/// Returns [`crate::Error::MalformedBytecode`] if the code does not fit the 32-bit size
/// field.
pub fn write_fat_body(
    code: &[u8],
    max_stack: u16,
    local_var_sig_token: Token,
    init_locals: bool,
    exception_section: &[u8],
) -> Result<Vec<u8>> {
    let size_code = u32::try_from(code.len())
        .map_err(|_| malformed_error!("Code of {} bytes is too large", code.len()))?;

    let mut flags = MethodBodyFlags::FAT_FORMAT;
    if init_locals {
        flags |= MethodBodyFlags::INIT_LOCALS;
    }
    if !exception_section.is_empty() {
        flags |= MethodBodyFlags::MORE_SECTS;
    }

    let mut body = Vec::with_capacity(FAT_HEADER_SIZE + code.len() + 3 + exception_section.len());
    emit_le(&mut body, (FAT_HEADER_DWORDS << 12) | flags.bits());
    emit_le(&mut body, max_stack);
    emit_le(&mut body, size_code);
    emit_le(&mut body, local_var_sig_token.value());
    body.extend_from_slice(code);

    if !exception_section.is_empty() {
        let padded = (body.len() + 3) & !3;
        body.resize(padded, 0);
        body.extend_from_slice(exception_section);
    }

    Ok(body)
}
