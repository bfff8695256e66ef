//! Adapters between concretely typed signatures and one untyped handler.
//!
//! A detoured entry point is called with whatever signature the original method has,
//! but the hook pipeline works on boxed arguments. A [`Proxy`] bridges the two: it
//! collects the arguments of a call into one [`Value`] array, hands the array to a
//! [`ProxyHandler`] together with the receiver, converts the handler's result back to
//! the declared return type and writes by-reference arguments back to the caller.
//!
//! [`Proxy`] is the portable core, invoked with boxed arguments. [`NativeProxy`] puts
//! machine code following the platform C calling convention in front of it, so the
//! same proxy can be the target of a patched entry point.
//!
//! # Adapter shapes
//!
//! - [`Proxy::this_call`] - the first parameter is the receiver
//! - [`Proxy::embedded`] - a receiver fixed when the proxy is generated
//! - [`Proxy::static_call`] - no receiver
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use cildetour::metadata::signatures::{ElementType, MethodSignature, ParamType};
//! use cildetour::proxy::{Proxy, Value};
//!
//! // static void Swap(ref int a, ref int b)
//! let signature = MethodSignature::new(
//!     vec![ParamType::by_ref(ElementType::I4), ParamType::by_ref(ElementType::I4)],
//!     ParamType::void(),
//! );
//! let proxy = Proxy::static_call(
//!     signature,
//!     Arc::new(|_receiver, args: &mut [Value]| {
//!         args.swap(0, 1);
//!         Ok(Value::Null)
//!     }),
//! )?;
//!
//! let mut args = [Value::I4(1), Value::I4(2)];
//! proxy.invoke(&mut args)?;
//! assert_eq!(args, [Value::I4(2), Value::I4(1)]);
//! # Ok::<(), cildetour::Error>(())
//! ```

pub mod memory;
mod native;
mod value;

pub use native::{take_native_error, Abi, ArgSlot, NativeProxy};
pub use value::Value;

use std::{fmt, sync::Arc};

use crate::{
    metadata::signatures::{MethodSignature, ParamType},
    Error, Result,
};

/// The uniform handler behind a proxy: `(receiver, arguments) -> result`.
///
/// Arguments arrive boxed, in declaration order, without the receiver. Slots of
/// by-reference parameters are written back to the caller after the handler returns.
pub type ProxyHandler = Arc<dyn Fn(Option<&Value>, &mut [Value]) -> Result<Value> + Send + Sync>;

/// Where the receiver of a proxied call comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ProxyKind {
    /// The first parameter of the call
    ThisCall,
    /// A receiver fixed at generation time
    Embedded(Value),
    /// No receiver
    Static,
}

/// A concretely typed adapter in front of a [`ProxyHandler`].
///
/// The signature describes the adapter exactly as callers see it: for a this-call proxy
/// its first parameter is the receiver. Calling convention flags other than
/// [`crate::metadata::signatures::CallingConventions::VARARG`] are ignored.
#[derive(Clone)]
pub struct Proxy {
    signature: MethodSignature,
    kind: ProxyKind,
    handler: ProxyHandler,
}

impl Proxy {
    /// An adapter passing its first argument as the receiver.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnsupportedMethodShape`] for variable argument lists,
    /// by-reference returns, a missing receiver parameter or a by-reference receiver.
    pub fn this_call(signature: MethodSignature, handler: ProxyHandler) -> Result<Proxy> {
        match signature.params.first() {
            None => {
                return Err(Error::UnsupportedMethodShape(
                    "this-call proxy without receiver parameter".to_string(),
                ))
            }
            Some(receiver) if receiver.by_ref => {
                return Err(Error::UnsupportedMethodShape(format!(
                    "by-reference receiver {receiver} cannot be proxied"
                )))
            }
            Some(_) => {}
        }

        Self::build(signature, ProxyKind::ThisCall, handler)
    }

    /// An adapter that always passes `receiver` to the handler.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnsupportedMethodShape`] for variable argument lists and
    /// by-reference returns.
    pub fn embedded(
        signature: MethodSignature,
        receiver: Value,
        handler: ProxyHandler,
    ) -> Result<Proxy> {
        Self::build(signature, ProxyKind::Embedded(receiver), handler)
    }

    /// An adapter without receiver.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnsupportedMethodShape`] for variable argument lists and
    /// by-reference returns.
    pub fn static_call(signature: MethodSignature, handler: ProxyHandler) -> Result<Proxy> {
        Self::build(signature, ProxyKind::Static, handler)
    }

    fn build(signature: MethodSignature, kind: ProxyKind, handler: ProxyHandler) -> Result<Proxy> {
        if signature.is_vararg() {
            return Err(Error::UnsupportedMethodShape(
                "variable argument lists cannot be proxied".to_string(),
            ));
        }
        if signature.return_type.by_ref {
            return Err(Error::UnsupportedMethodShape(format!(
                "by-reference return type {} cannot be proxied",
                signature.return_type
            )));
        }

        Ok(Proxy {
            signature,
            kind,
            handler,
        })
    }

    /// The signature of the adapter.
    #[must_use]
    pub fn signature(&self) -> &MethodSignature {
        &self.signature
    }

    /// Where the receiver comes from.
    #[must_use]
    pub fn kind(&self) -> &ProxyKind {
        &self.kind
    }

    /// Call the adapter with boxed arguments, one per parameter of the signature.
    ///
    /// Arguments are converted to their declared types, the handler runs, and each
    /// by-reference slot of `args` receives the handler's value for it, in declaration
    /// order. The handler's result is converted to the declared return type; `void`
    /// adapters return [`Value::Null`].
    ///
    /// # Errors
    /// Returns [`crate::Error::ArgumentCount`] or [`crate::Error::TypeMismatch`] for
    /// arguments that do not fit the signature, [`crate::Error::TypeMismatch`] for a
    /// result that does not fit the return type, and whatever the handler returns.
    pub fn invoke(&self, args: &mut [Value]) -> Result<Value> {
        let params = &self.signature.params;
        if args.len() != params.len() {
            return Err(Error::ArgumentCount {
                expected: params.len(),
                found: args.len(),
            });
        }

        let (receiver, args, params) = match &self.kind {
            ProxyKind::ThisCall => match args.split_first_mut() {
                Some((receiver, rest)) => (Some(&*receiver), rest, &params[1..]),
                None => return Err(Error::Impossible("this-call proxy without receiver".into())),
            },
            ProxyKind::Embedded(receiver) => (Some(receiver), args, &params[..]),
            ProxyKind::Static => (None, args, &params[..]),
        };

        let mut boxed = args
            .iter()
            .zip(params)
            .map(|(arg, param)| arg.convert_to(param.element))
            .collect::<Result<Vec<Value>>>()?;

        let result = (self.handler)(receiver, &mut boxed)?;
        if boxed.len() != params.len() {
            return Err(Error::Impossible(format!(
                "handler changed the argument count from {} to {}",
                params.len(),
                boxed.len()
            )));
        }

        write_back(params, &boxed, args)?;
        result.convert_to(self.signature.return_type.element)
    }
}

fn write_back(params: &[ParamType], boxed: &[Value], args: &mut [Value]) -> Result<()> {
    for ((param, value), slot) in params.iter().zip(boxed).zip(args) {
        if param.by_ref {
            *slot = value.convert_to(param.element)?;
        }
    }

    Ok(())
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("signature", &self.signature)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
