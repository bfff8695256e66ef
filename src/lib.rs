// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]
// - 'patch' writes into compiled code and changes page protections
// - 'proxy' maps executable memory and dispatches raw native frames

//! # cildetour
//!
//! Runtime interception of compiled CIL methods. A detour keeps the original behaviour
//! of a method callable while every call to it runs through user supplied hooks:
//!
//! - **Cloning** - the CIL body is copied into a fresh dynamic scope, every metadata
//!   token translated, exception regions re-encoded
//! - **Proxying** - a native adapter with the method's calling convention funnels every
//!   call into one uniform `(receiver, arguments) -> result` handler
//! - **Patching** - the entry point is redirected to the adapter with an atomic,
//!   spin-marker protected write
//! - **Hooking** - before-call, chain and after-call hooks run around the clone
//!
//! ## Quick Start
//!
//! The host environment describes the method to take over with a [`MethodDescriptor`]:
//! its metadata scope, CIL body, signature, compiled entry point and an
//! [`runtime::ExecutionEngine`] that can compile the clone.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cildetour::prelude::*;
//! # fn descriptor() -> MethodDescriptor { unimplemented!() }
//!
//! let detour = MethodDetour::detour(&descriptor())?;
//!
//! // Add(a, b) now returns a + b + 1
//! detour.add_chain_call(Arc::new(|next: &ChainNext, receiver, args: &mut [Value]| {
//!     let sum = next.call(receiver, args)?;
//!     Ok(Value::I4(sum.as_i64().unwrap_or_default() as i32 + 1))
//! }));
//! # Ok::<(), cildetour::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`prelude`] - Convenient re-exports of commonly used types and traits
//! - [`disassembler`] - CIL instruction decoding and re-encoding
//! - [`metadata`] - Tokens, signatures, method bodies and cross-scope token resolution
//! - [`cloner`] - Copying a method body into a fresh scope
//! - [`proxy`] - Boxed values, typed adapters and their native entry stubs
//! - [`patch`] - Architecture specific entry point redirection
//! - [`detour`] - The per-method orchestrator and its hooks
//! - [`Error`] and [`Result`] - Error handling
//!
//! ## Platform Support
//!
//! Patching and native proxies exist for x86 and x86-64. Executable memory and page
//! protection changes go through `mmap`/`mprotect`, so a detour can only be installed
//! on unix hosts; elsewhere [`Error::PlatformNotSupported`] is returned before anything
//! is touched. Decoding, cloning and the hook pipeline work everywhere.
//!
//! ## Standards Compliance
//!
//! Method bodies, exception sections and instruction encodings follow the
//! **ECMA-335 specification** (6th edition).
//!
//! - [ECMA-335 Standard](https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf) - Official CLI specification

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// ```rust,no_run
/// use cildetour::prelude::*;
/// # fn descriptor() -> MethodDescriptor { unimplemented!() }
///
/// let detour = MethodDetour::detour(&descriptor())?;
/// println!("{} bytes of cloned code", detour.cloned().code.len());
/// # Ok::<(), cildetour::Error>(())
/// ```
pub mod prelude;

/// Byte level readers and writers
pub mod file;

/// Instructions, Disassembler based on ECMA-355
///
/// Decoding keeps the exact operand kind and width of every instruction, which is what
/// lets the cloner re-emit a body with nothing but its tokens changed.
///
/// # Examples
///
/// ```rust
/// use cildetour::{disassembler::decode_instruction, Parser};
///
/// let bytecode = &[0x00, 0x2A]; // nop, ret
/// let mut parser = Parser::new(bytecode);
/// let instruction = decode_instruction(&mut parser)?;
///
/// assert_eq!(instruction.mnemonic, "nop");
/// # Ok::<(), cildetour::Error>(())
/// ```
pub mod disassembler;

/// CIL metadata as far as moving method bodies between scopes needs it
pub mod metadata;

/// Copying method bodies into fresh dynamic scopes
pub mod cloner;

/// Detour configuration
pub mod config;

/// The seam between cloned methods and the execution environment
pub mod runtime;

/// Boxed values, typed proxies and native entry stubs
pub mod proxy;

/// Architecture specific entry point redirection
pub mod patch;

/// The per-method interception orchestrator
pub mod detour;

/// `cildetour` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `cildetour` Error type
///
/// The main error type for all operations in this crate.
pub use error::Error;

/// The per-method interception orchestrator. See [`detour::MethodDetour`].
pub use detour::MethodDetour;

/// How a detour patches its target. See [`config::DetourConfig`].
pub use config::DetourConfig;

/// Everything the host knows about a compiled method.
pub use metadata::method::MethodDescriptor;

/// Low-level byte cursor
pub use file::Parser;
