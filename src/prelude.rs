//! # cildetour Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! of the cildetour library. Import it to get quick access to everything needed to
//! describe a method, detour it and hook its calls.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all cildetour operations
pub use crate::Error;

/// The result type used throughout cildetour
pub use crate::Result;

/// How a detour patches its target
pub use crate::DetourConfig;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// The per-method interception orchestrator
pub use crate::MethodDetour;

/// Hook callbacks, their results and the chain continuation
pub use crate::detour::{
    AfterCallHook, BeforeCallHook, BeforeCallResult, ChainCallHook, ChainNext, HookChain,
};

/// Cloning method bodies
pub use crate::cloner::{clone_method, clone_method_into, ClonedMethod};

// ================================================================================================
// Describing Methods
// ================================================================================================

/// Method descriptors, bodies and exception regions
pub use crate::metadata::method::{
    ExceptionHandlerFlags, ExceptionRegion, ExceptionRegionKind, MethodBody, MethodDescriptor,
};

/// Signatures and element types
pub use crate::metadata::signatures::{CallingConventions, ElementType, MethodSignature, ParamType};

/// Metadata token type for referencing table entries
pub use crate::metadata::token::{Token, TokenTable};

/// Token resolution between scopes
pub use crate::metadata::resolver::{
    DynamicEntry, DynamicScope, FieldRef, Member, MetadataScope, MethodRef, RuntimeHandle,
    TokenProvider, TypeRef,
};

/// The execution environment seam
pub use crate::runtime::{ExecutionEngine, Invoke};

// ================================================================================================
// Calling
// ================================================================================================

/// Boxed values and typed proxies
pub use crate::proxy::{take_native_error, NativeProxy, Proxy, ProxyHandler, ProxyKind, Value};

// ================================================================================================
// Disassembly
// ================================================================================================

/// Instruction decoding and encoding
pub use crate::disassembler::{
    decode_instruction, decode_stream, encode_instruction, encode_stream, FlowType, Instruction,
    InstructionStream, Operand, OperandType,
};

/// Low-level byte cursor
pub use crate::Parser;
