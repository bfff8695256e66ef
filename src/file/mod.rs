//! Byte level reading and writing.
//!
//! Everything binary in this crate goes through two small building blocks:
//!
//! - [`crate::file::io`] - little-endian conversions for primitive types, bounds-checked
//! - [`crate::file::parser::Parser`] - a cursor over a byte slice
//!
//! Neither of them touches the file system; the name is kept because the same
//! primitives read method bodies whether they come from a PE image or from memory.

pub mod io;
pub mod parser;

pub use parser::Parser;
