//! The seam to the execution environment.
//!
//! Cloning produces a [`crate::cloner::ClonedMethod`], which is only bytes and tokens.
//! Something has to turn it into a callable unit again; that something is the
//! [`ExecutionEngine`] of the method's host, which hands back an [`Invoke`].

use std::sync::Arc;

use crate::{cloner::ClonedMethod, proxy::Value, Result};

/// A callable unit taking boxed arguments.
///
/// The argument slice follows the flattened parameter list of the method: the receiver
/// first for instance methods, then the declared parameters. By-reference arguments are
/// updated in place.
pub trait Invoke: Send + Sync {
    /// Run the unit.
    ///
    /// # Errors
    /// Returns whatever the unit raises; errors are propagated to the caller unchanged.
    fn invoke(&self, args: &mut [Value]) -> Result<Value>;
}

impl<F> Invoke for F
where
    F: Fn(&mut [Value]) -> Result<Value> + Send + Sync,
{
    fn invoke(&self, args: &mut [Value]) -> Result<Value> {
        self(args)
    }
}

/// Compiles cloned method bodies.
pub trait ExecutionEngine: Send + Sync {
    /// Turn `method` into something invocable.
    ///
    /// The tokens inside the clone belong to [`ClonedMethod::scope`], which the engine
    /// uses to find out what they refer to.
    ///
    /// # Errors
    /// Returns an error if the body is rejected by the engine.
    fn compile(&self, method: Arc<ClonedMethod>) -> Result<Arc<dyn Invoke>>;
}
