//! Metadata as far as moving a method body between scopes needs it.
//!
//! # Key Components
//!
//! - [`token`] - Metadata table row references embedded in CIL
//! - [`signatures`] - Method signatures, element types and calling conventions
//! - [`resolver`] - Translating tokens from one scope into another
//! - [`method`] - Method bodies, exception regions and method descriptors

/// Implementation of method bodies, exception regions and descriptors
pub mod method;
/// Implementation of cross-scope token resolution
pub mod resolver;
/// Implementation of method signatures
pub mod signatures;
/// Implementation of metadata tokens
pub mod token;
