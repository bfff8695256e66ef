use thiserror::Error;

use crate::metadata::{resolver::RuntimeHandle, signatures::ElementType, token::Token};

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::MalformedBytecode {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::MalformedBytecode {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The variants follow the lifecycle of a detour: decoding and cloning a method body,
/// generating the proxy, patching the entry point and finally running hooks. Everything
/// that can fail before the entry point is patched fails *before* any memory is touched,
/// so a returned error never leaves a half-applied patch behind.
///
/// # Error Categories
///
/// ## Bytecode and Metadata Errors
/// - [`Error::MalformedBytecode`] - Undecodable or truncated CIL
/// - [`Error::OutOfBounds`] - Attempted to read or write beyond a buffer
/// - [`Error::InvalidExceptionData`] - Exception regions that cannot be encoded
/// - [`Error::UnresolvedToken`] - A token the source scope does not know
///
/// ## Shape and Platform Errors
/// - [`Error::UnsupportedMethodShape`] - Generic definitions, varargs, dynamic methods
/// - [`Error::PlatformNotSupported`] - Anything other than x86 / x86-64
/// - [`Error::MemoryProtection`] - Failed to map or protect code pages
///
/// ## Call-time Errors
/// - [`Error::TypeMismatch`] - A boxed value does not fit its declared type
/// - [`Error::ArgumentCount`] - Wrong number of arguments for a signature
/// - [`Error::Hook`] - A hook or the execution engine failed
///
/// # Examples
///
/// ```rust,no_run
/// use cildetour::{Error, MethodDetour};
/// # fn descriptor() -> cildetour::MethodDescriptor { unimplemented!() }
///
/// match MethodDetour::detour(&descriptor()) {
///     Ok(detour) => println!("detoured {}", detour.target().name),
///     Err(Error::UnsupportedMethodShape(reason)) => eprintln!("cannot detour: {reason}"),
///     Err(Error::PlatformNotSupported(arch)) => eprintln!("unsupported platform: {arch}"),
///     Err(e) => eprintln!("other error: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The bytecode is damaged and could not be decoded.
    ///
    /// Raised when a byte sequence maps to no known opcode or the buffer ends in the
    /// middle of an operand. Decoding happens before anything is mutated, so this
    /// error aborts cloning cleanly.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed bytecode - {file}:{line}: {message}")]
    MalformedBytecode {
        /// The message to be printed for the MalformedBytecode error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while reading or writing a buffer.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// The method cannot be cloned, proxied or detoured.
    ///
    /// Generic method definitions, variable-argument-list methods, methods that are
    /// themselves dynamically generated, methods without a bytecode body and
    /// signatures returning by reference are all refused with this error, always
    /// before any patch is attempted.
    #[error("Unsupported method shape - {0}")]
    UnsupportedMethodShape(String),

    /// Exception handling data could not be encoded.
    ///
    /// The most common cause is a catch clause that does not name a concrete type.
    #[error("Invalid exception data - {0}")]
    InvalidExceptionData(String),

    /// The current platform cannot be patched.
    ///
    /// Only x86 and x86-64 are supported. This error is raised the first time the
    /// redirector is requested, not in the middle of a patch.
    #[error("Platform not supported - {0}")]
    PlatformNotSupported(String),

    /// The target is already detoured.
    ///
    /// Internal signal of the registration path; [`crate::MethodDetour::detour`] catches
    /// it and hands out the existing registration instead.
    #[error("Method {0} is already detoured")]
    AlreadyDetoured(RuntimeHandle),

    /// A metadata token could not be resolved by its owning scope.
    #[error("Failed to resolve token - {0}")]
    UnresolvedToken(Token),

    /// A boxed value cannot be converted to the declared type.
    #[error("Type mismatch - expected {expected}, found {found}")]
    TypeMismatch {
        /// The declared element type
        expected: ElementType,
        /// The kind of value that was supplied
        found: &'static str,
    },

    /// Wrong number of arguments supplied for a signature.
    #[error("Argument count mismatch - expected {expected}, found {found}")]
    ArgumentCount {
        /// Number of arguments the signature declares
        expected: usize,
        /// Number of arguments supplied
        found: usize,
    },

    /// Mapping memory or changing its protection failed.
    #[error("Memory protection failed - {0}")]
    MemoryProtection(#[from] std::io::Error),

    /// An internal invariant was violated.
    ///
    /// These conditions cannot be reached through the public API; seeing one is a bug.
    #[error("Internal invariant violated - {0}")]
    Impossible(String),

    /// A hook callback or the execution engine failed.
    ///
    /// The inner error is passed through untouched; the orchestrator never catches or
    /// rewrites errors raised by hooks.
    #[error("{0}")]
    Hook(Box<dyn std::error::Error + Send + Sync>),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}

impl Error {
    /// Wraps an arbitrary error raised by a hook or an execution engine.
    pub fn hook<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error::Hook(error.into())
    }
}
