use std::{fmt, sync::Arc};

use crate::{
    metadata::{
        method::MethodBody,
        resolver::{MetadataScope, RuntimeHandle, TypeRef},
        signatures::{ElementType, MethodSignature, ParamType},
    },
    runtime::ExecutionEngine,
    Error, Result,
};

/// Everything known about a compiled method that is about to be cloned or detoured.
///
/// The descriptor is supplied by the host environment: metadata comes from `module`,
/// the compiled entry point is the address the redirector patches, and `engine` is what
/// turns a cloned body into something callable.
#[derive(Clone)]
pub struct MethodDescriptor {
    /// Method name, informational only
    pub name: String,
    /// Stable identity of the method; one detour exists per handle
    pub handle: RuntimeHandle,
    /// Static methods have no receiver
    pub is_static: bool,
    /// Declaring type, `None` for global methods
    pub declaring_type: Option<TypeRef>,
    /// The scope the body's tokens belong to
    pub module: Arc<dyn MetadataScope>,
    /// Declared signature, without the implicit `this`
    pub signature: MethodSignature,
    /// Open generic method definition
    pub is_generic_definition: bool,
    /// Generated at runtime, has no backing metadata
    pub is_dynamic: bool,
    /// The CIL body, `None` for abstract, native or runtime-implemented methods
    pub body: Option<MethodBody>,
    /// Address of the compiled code
    pub entry_point: usize,
    /// Compiles cloned bodies into invocable units
    pub engine: Arc<dyn ExecutionEngine>,
}

impl MethodDescriptor {
    /// Returns `true` if the method takes a receiver.
    #[must_use]
    pub fn is_instance(&self) -> bool {
        !self.is_static
    }

    /// The type `this` is passed as, for instance methods.
    ///
    /// Value types receive a reference to their storage, everything else an object
    /// handle.
    ///
    /// # Errors
    /// Returns [`crate::Error::Impossible`] for an instance method without declaring type.
    pub fn receiver_type(&self) -> Result<Option<ParamType>> {
        if self.is_static {
            return Ok(None);
        }

        match &self.declaring_type {
            Some(owner) if owner.is_value_type => Ok(Some(ParamType::by_ref(ElementType::ValueType))),
            Some(_) => Ok(Some(ParamType::new(ElementType::Object))),
            None => Err(Error::Impossible(format!(
                "instance method '{}' has no declaring type",
                self.name
            ))),
        }
    }

    /// Parameters as the cloned method sees them: the receiver first for instance
    /// methods, then the declared parameters.
    ///
    /// # Errors
    /// Returns [`crate::Error::Impossible`] for an instance method without declaring type.
    pub fn flattened_params(&self) -> Result<Vec<ParamType>> {
        let mut params = Vec::with_capacity(self.signature.params.len() + 1);
        params.extend(self.receiver_type()?);
        params.extend_from_slice(&self.signature.params);
        Ok(params)
    }

    /// Check that the method body can be copied into a fresh scope.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnsupportedMethodShape`] for dynamic methods, open generic
    /// definitions, variable argument lists and methods without a CIL body.
    pub fn ensure_cloneable(&self) -> Result<()> {
        let reason = if self.is_dynamic {
            "dynamic methods cannot be cloned"
        } else if self.is_generic_definition || self.signature.is_generic() {
            "generic method definitions cannot be cloned"
        } else if self.signature.is_vararg() {
            "variable argument lists are not supported"
        } else if self.body.is_none() {
            "method has no CIL body"
        } else {
            return Ok(());
        };

        Err(Error::UnsupportedMethodShape(format!("{}: {reason}", self.name)))
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("name", &self.name)
            .field("handle", &self.handle)
            .field("is_static", &self.is_static)
            .field("declaring_type", &self.declaring_type)
            .field("signature", &self.signature)
            .field("is_generic_definition", &self.is_generic_definition)
            .field("is_dynamic", &self.is_dynamic)
            .field("has_body", &self.body.is_some())
            .field("entry_point", &format_args!("0x{:x}", self.entry_point))
            .finish_non_exhaustive()
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.declaring_type {
            Some(owner) => write!(f, "{}::{}", owner.name, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}
