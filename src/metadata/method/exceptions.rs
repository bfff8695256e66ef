//! Exception handling regions of CIL method bodies.
//!
//! This module models try/catch/filter/finally/fault regions (ECMA-335 II.25.4.6) and
//! reads and writes the exception handling data sections that follow the code of a
//! method body. Regions are kept in the order they were declared; the runtime expects
//! inner regions before the regions that enclose them, and nothing here reorders them.
//!
//! # Section Layout
//!
//! A section is either *thin* (header `0x01`, 1-byte data size, 2 reserved bytes,
//! 12-byte clauses with 2-byte offsets and 1-byte lengths) or *fat* (header `0x41`,
//! 3-byte data size, 24-byte clauses with 4-byte fields). The encoder picks one layout
//! for the whole collection; it never mixes them.

use bitflags::bitflags;

use crate::{
    disassembler::OperandType,
    file::{io::emit_le, parser::Parser},
    metadata::{
        method::SectionFlags,
        resolver::{resolve_operand, MetadataScope, TokenProvider},
        token::Token,
    },
    Error, Result,
};

/// Size of a section header in bytes
const SECTION_HEADER_SIZE: usize = 4;
/// Size of a thin clause in bytes
const THIN_CLAUSE_SIZE: usize = 12;
/// Size of a fat clause in bytes
const FAT_CLAUSE_SIZE: usize = 24;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Kind flags of an exception handling clause
    pub struct ExceptionHandlerFlags: u16 {
        /// A typed exception clause
        const EXCEPTION = 0x0000;
        /// An exception filter and handler clause
        const FILTER = 0x0001;
        /// A finally clause
        const FINALLY = 0x0002;
        /// Fault clause (finally that is called on exception only)
        const FAULT = 0x0004;
    }
}

/// The kind of an [`ExceptionRegion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionRegionKind {
    /// Handles exceptions of one type
    Catch,
    /// Handles exceptions accepted by a filter block
    Filter,
    /// Always runs when the protected block is left
    Finally,
    /// Runs only when the protected block is left by an exception
    Fault,
}

/// One protected block and its handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionRegion {
    /// Clause kind
    pub flags: ExceptionHandlerFlags,
    /// Offset of the protected block
    pub try_offset: u32,
    /// Length of the protected block in bytes
    pub try_length: u32,
    /// Offset of the handler block
    pub handler_offset: u32,
    /// Length of the handler block in bytes
    pub handler_length: u32,
    /// Caught type for catch clauses, a token of the scope the body belongs to
    pub catch_type: Option<Token>,
    /// Offset of the filter block for filter clauses
    pub filter_offset: u32,
}

impl ExceptionRegion {
    fn with_flags(
        flags: ExceptionHandlerFlags,
        try_offset: u32,
        try_length: u32,
        handler_offset: u32,
        handler_length: u32,
    ) -> Self {
        ExceptionRegion {
            flags,
            try_offset,
            try_length,
            handler_offset,
            handler_length,
            catch_type: None,
            filter_offset: 0,
        }
    }

    /// A catch clause for `catch_type`.
    #[must_use]
    pub fn catch(
        try_offset: u32,
        try_length: u32,
        handler_offset: u32,
        handler_length: u32,
        catch_type: Token,
    ) -> Self {
        ExceptionRegion {
            catch_type: Some(catch_type),
            ..Self::with_flags(
                ExceptionHandlerFlags::EXCEPTION,
                try_offset,
                try_length,
                handler_offset,
                handler_length,
            )
        }
    }

    /// A filter clause whose filter block starts at `filter_offset`.
    #[must_use]
    pub fn filter(
        try_offset: u32,
        try_length: u32,
        handler_offset: u32,
        handler_length: u32,
        filter_offset: u32,
    ) -> Self {
        ExceptionRegion {
            filter_offset,
            ..Self::with_flags(
                ExceptionHandlerFlags::FILTER,
                try_offset,
                try_length,
                handler_offset,
                handler_length,
            )
        }
    }

    /// A finally clause.
    #[must_use]
    pub fn finally(
        try_offset: u32,
        try_length: u32,
        handler_offset: u32,
        handler_length: u32,
    ) -> Self {
        Self::with_flags(
            ExceptionHandlerFlags::FINALLY,
            try_offset,
            try_length,
            handler_offset,
            handler_length,
        )
    }

    /// A fault clause.
    #[must_use]
    pub fn fault(
        try_offset: u32,
        try_length: u32,
        handler_offset: u32,
        handler_length: u32,
    ) -> Self {
        Self::with_flags(
            ExceptionHandlerFlags::FAULT,
            try_offset,
            try_length,
            handler_offset,
            handler_length,
        )
    }

    /// The clause kind.
    #[must_use]
    pub fn kind(&self) -> ExceptionRegionKind {
        if self.flags.contains(ExceptionHandlerFlags::FILTER) {
            ExceptionRegionKind::Filter
        } else if self.flags.contains(ExceptionHandlerFlags::FINALLY) {
            ExceptionRegionKind::Finally
        } else if self.flags.contains(ExceptionHandlerFlags::FAULT) {
            ExceptionRegionKind::Fault
        } else {
            ExceptionRegionKind::Catch
        }
    }

    /// Returns `true` if this region does not fit a thin clause.
    #[must_use]
    pub fn requires_fat(&self) -> bool {
        self.try_offset > u32::from(u16::MAX)
            || self.handler_offset > u32::from(u16::MAX)
            || self.try_length > u32::from(u8::MAX)
            || self.handler_length > u32::from(u8::MAX)
    }

    /// The trailing clause field: the translated catch type, the filter offset or zero.
    fn trailer(
        &self,
        source: &dyn MetadataScope,
        destination: &dyn TokenProvider,
    ) -> Result<u32> {
        match self.kind() {
            ExceptionRegionKind::Catch => match self.catch_type {
                Some(catch_type) if !catch_type.is_null() => {
                    let token = resolve_operand(source, destination, OperandType::Type, catch_type)?;
                    Ok(token.value())
                }
                _ => Err(Error::InvalidExceptionData(format!(
                    "catch clause at IL_{:04x} has no exception type",
                    self.handler_offset
                ))),
            },
            ExceptionRegionKind::Filter => Ok(self.filter_offset),
            ExceptionRegionKind::Finally | ExceptionRegionKind::Fault => Ok(0),
        }
    }
}

/// Encode `regions` into a single exception handling data section.
///
/// Catch types are translated from `source` into `destination` on the way. The whole
/// collection is written thin if every region fits a thin clause and the section size
/// fits its 1-byte size field, and fat otherwise. An empty collection encodes to an
/// empty section.
///
/// # Errors
///
/// Returns [`crate::Error::InvalidExceptionData`] if a catch clause has no type, or if the
/// section exceeds the 3-byte size field of the fat layout, and propagates token
/// resolution errors.
#[allow(clippy::cast_possible_truncation)]
pub fn encode_exception_regions(
    regions: &[ExceptionRegion],
    source: &dyn MetadataScope,
    destination: &dyn TokenProvider,
) -> Result<Vec<u8>> {
    if regions.is_empty() {
        return Ok(Vec::new());
    }

    let thin_size = SECTION_HEADER_SIZE + regions.len() * THIN_CLAUSE_SIZE;
    let use_fat =
        thin_size > usize::from(u8::MAX) || regions.iter().any(ExceptionRegion::requires_fat);

    let mut section;
    if use_fat {
        let data_size = SECTION_HEADER_SIZE + regions.len() * FAT_CLAUSE_SIZE;
        let data_size = u32::try_from(data_size)
            .ok()
            .filter(|size| *size <= 0x00FF_FFFF)
            .ok_or_else(|| {
                Error::InvalidExceptionData(format!("{} regions do not fit a section", regions.len()))
            })?;

        section = Vec::with_capacity(data_size as usize);
        section.push((SectionFlags::EHTABLE | SectionFlags::FAT_FORMAT).bits());
        section.extend_from_slice(&data_size.to_le_bytes()[..3]);

        for region in regions {
            emit_le(&mut section, u32::from(region.flags.bits()));
            emit_le(&mut section, region.try_offset);
            emit_le(&mut section, region.try_length);
            emit_le(&mut section, region.handler_offset);
            emit_le(&mut section, region.handler_length);
            emit_le(&mut section, region.trailer(source, destination)?);
        }
    } else {
        section = Vec::with_capacity(thin_size);
        section.push(SectionFlags::EHTABLE.bits());
        section.push(thin_size as u8);
        section.extend_from_slice(&[0, 0]);

        // requires_fat() rules out truncation for every narrowed field
        for region in regions {
            emit_le(&mut section, region.flags.bits());
            emit_le(&mut section, region.try_offset as u16);
            emit_le(&mut section, region.try_length as u8);
            emit_le(&mut section, region.handler_offset as u16);
            emit_le(&mut section, region.handler_length as u8);
            emit_le(&mut section, region.trailer(source, destination)?);
        }
    }

    Ok(section)
}

/// Parse the chain of data sections starting at the parser position.
///
/// Sections that do not carry exception handling data end the chain.
///
/// # Errors
///
/// Returns [`crate::Error::MalformedBytecode`] if a section is truncated or its size is
/// inconsistent with its clause layout.
pub fn parse_exception_sections(parser: &mut Parser) -> Result<Vec<ExceptionRegion>> {
    let start = parser.pos();
    parse_sections(parser).map_err(|error| match error {
        Error::OutOfBounds => malformed_error!("Truncated exception section after {}", start),
        other => other,
    })
}

fn parse_sections(parser: &mut Parser) -> Result<Vec<ExceptionRegion>> {
    let mut regions = Vec::new();

    loop {
        parser.align(4)?;
        let start = parser.pos();
        let flags = SectionFlags::from_bits_truncate(parser.read_le::<u8>()?);
        if !flags.contains(SectionFlags::EHTABLE) {
            break;
        }

        let is_fat = flags.contains(SectionFlags::FAT_FORMAT);
        let (data_size, clause_size) = if is_fat {
            (parser.read_le_u24()? as usize, FAT_CLAUSE_SIZE)
        } else {
            let size = parser.read_le::<u8>()? as usize;
            parser.advance_by(2)?;
            (size, THIN_CLAUSE_SIZE)
        };

        if data_size < SECTION_HEADER_SIZE || (data_size - SECTION_HEADER_SIZE) % clause_size != 0
        {
            return Err(malformed_error!(
                "Exception section at {} has invalid size {}",
                start,
                data_size
            ));
        }
        if data_size - SECTION_HEADER_SIZE > parser.remaining() {
            return Err(malformed_error!(
                "Exception section at {} is truncated",
                start
            ));
        }

        for _ in 0..(data_size - SECTION_HEADER_SIZE) / clause_size {
            regions.push(if is_fat {
                read_fat_clause(parser)?
            } else {
                read_thin_clause(parser)?
            });
        }

        if !flags.contains(SectionFlags::MORE_SECTS) {
            break;
        }
    }

    Ok(regions)
}

fn read_thin_clause(parser: &mut Parser) -> Result<ExceptionRegion> {
    let flags = ExceptionHandlerFlags::from_bits_truncate(parser.read_le::<u16>()?);
    let try_offset = u32::from(parser.read_le::<u16>()?);
    let try_length = u32::from(parser.read_le::<u8>()?);
    let handler_offset = u32::from(parser.read_le::<u16>()?);
    let handler_length = u32::from(parser.read_le::<u8>()?);
    let trailer = parser.read_le::<u32>()?;

    Ok(region_from_raw(
        flags,
        [try_offset, try_length, handler_offset, handler_length],
        trailer,
    ))
}

fn read_fat_clause(parser: &mut Parser) -> Result<ExceptionRegion> {
    // Flags are a u32 in the fat layout, only the low bits are defined
    #[allow(clippy::cast_possible_truncation)]
    let flags = ExceptionHandlerFlags::from_bits_truncate(parser.read_le::<u32>()? as u16);
    let try_offset = parser.read_le::<u32>()?;
    let try_length = parser.read_le::<u32>()?;
    let handler_offset = parser.read_le::<u32>()?;
    let handler_length = parser.read_le::<u32>()?;
    let trailer = parser.read_le::<u32>()?;

    Ok(region_from_raw(
        flags,
        [try_offset, try_length, handler_offset, handler_length],
        trailer,
    ))
}

fn region_from_raw(
    flags: ExceptionHandlerFlags,
    blocks: [u32; 4],
    trailer: u32,
) -> ExceptionRegion {
    let [try_offset, try_length, handler_offset, handler_length] = blocks;
    let mut region = ExceptionRegion::with_flags(
        flags,
        try_offset,
        try_length,
        handler_offset,
        handler_length,
    );

    match region.kind() {
        ExceptionRegionKind::Catch => region.catch_type = Some(Token::new(trailer)),
        ExceptionRegionKind::Filter => region.filter_offset = trailer,
        ExceptionRegionKind::Finally | ExceptionRegionKind::Fault => {}
    }
    region
}
