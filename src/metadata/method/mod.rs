//! Method level metadata: bodies, exception regions and descriptors.
//!
//! # Key Types
//! - [`MethodBody`] - A parsed CIL method body
//! - [`ExceptionRegion`] - One try block and its handler
//! - [`MethodDescriptor`] - A compiled method as handed to the cloner and the detour
//!
//! # Key Functions
//! - [`encode_exception_regions`] - Write regions as one thin or fat section
//! - [`write_fat_body`] - Lay out a fat method body

mod body;
mod descriptor;
mod exceptions;
mod types;

pub use body::{write_fat_body, MethodBody};
pub use descriptor::MethodDescriptor;
pub use exceptions::{
    encode_exception_regions, parse_exception_sections, ExceptionHandlerFlags, ExceptionRegion,
    ExceptionRegionKind,
};
pub use types::*;
