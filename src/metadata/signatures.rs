//! Method signatures as far as calling a method needs them.
//!
//! Only the parts of a `MethodDefSig` (ECMA-335 II.23.2.1) that decide how arguments
//! travel are modelled: the calling convention flags, and per parameter the element
//! type and whether it is passed by reference. Type identity beyond the element type is
//! the business of the metadata scope and the execution engine.

use std::fmt;

use bitflags::bitflags;
use strum::{Display, FromRepr};

bitflags! {
    /// Calling convention flags of a method signature (ECMA-335 II.23.2.1).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CallingConventions: u8 {
        /// Managed default calling convention
        const DEFAULT = 0x00;
        /// Variable argument list
        const VARARG = 0x05;
        /// The method has generic parameters
        const GENERIC = 0x10;
        /// Instance method, `this` is passed as the hidden first argument
        const HAS_THIS = 0x20;
        /// `this` is spelled out as the first parameter of the signature
        const EXPLICIT_THIS = 0x40;
    }
}

/// Element types a parameter or return value can have (ECMA-335 II.23.1.16).
///
/// Everything that is neither a primitive nor a value type travels as
/// [`ElementType::Object`], [`ElementType::Class`] or [`ElementType::String`], which are
/// all handles as far as the native calling convention is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr)]
#[repr(u8)]
pub enum ElementType {
    /// `void`, only valid as a return type
    #[strum(serialize = "void")]
    Void = 0x01,
    /// `bool`
    #[strum(serialize = "bool")]
    Boolean = 0x02,
    /// UTF-16 code unit
    #[strum(serialize = "char")]
    Char = 0x03,
    /// `int8`
    #[strum(serialize = "int8")]
    I1 = 0x04,
    /// `unsigned int8`
    #[strum(serialize = "uint8")]
    U1 = 0x05,
    /// `int16`
    #[strum(serialize = "int16")]
    I2 = 0x06,
    /// `unsigned int16`
    #[strum(serialize = "uint16")]
    U2 = 0x07,
    /// `int32`
    #[strum(serialize = "int32")]
    I4 = 0x08,
    /// `unsigned int32`
    #[strum(serialize = "uint32")]
    U4 = 0x09,
    /// `int64`
    #[strum(serialize = "int64")]
    I8 = 0x0A,
    /// `unsigned int64`
    #[strum(serialize = "uint64")]
    U8 = 0x0B,
    /// `float32`
    #[strum(serialize = "float32")]
    R4 = 0x0C,
    /// `float64`
    #[strum(serialize = "float64")]
    R8 = 0x0D,
    /// `string`
    #[strum(serialize = "string")]
    String = 0x0E,
    /// Unmanaged pointer
    #[strum(serialize = "ptr")]
    Ptr = 0x0F,
    /// A value type that is not a primitive (passed as a handle to its storage)
    #[strum(serialize = "valuetype")]
    ValueType = 0x11,
    /// A reference type
    #[strum(serialize = "class")]
    Class = 0x12,
    /// Native sized signed integer
    #[strum(serialize = "native int")]
    I = 0x18,
    /// Native sized unsigned integer
    #[strum(serialize = "native uint")]
    U = 0x19,
    /// Function pointer
    #[strum(serialize = "method")]
    FnPtr = 0x1B,
    /// `object`
    #[strum(serialize = "object")]
    Object = 0x1C,
    /// Single dimensional, zero based array
    #[strum(serialize = "szarray")]
    SzArray = 0x1D,
}

impl ElementType {
    /// `float32` or `float64`
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, ElementType::R4 | ElementType::R8)
    }

    /// 64-bit wide regardless of the pointer width
    #[must_use]
    pub const fn is_wide(self) -> bool {
        matches!(self, ElementType::I8 | ElementType::U8 | ElementType::R8)
    }

    /// Types that live in an object handle rather than as raw bits
    #[must_use]
    pub const fn is_reference(self) -> bool {
        matches!(
            self,
            ElementType::String | ElementType::Class | ElementType::Object | ElementType::SzArray
        )
    }
}

/// One parameter or the return type of a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamType {
    /// The element type
    pub element: ElementType,
    /// Passed by reference (`&`, `ref`, `out`)
    pub by_ref: bool,
}

impl ParamType {
    /// A by-value parameter
    #[must_use]
    pub const fn new(element: ElementType) -> Self {
        ParamType {
            element,
            by_ref: false,
        }
    }

    /// A by-reference parameter
    #[must_use]
    pub const fn by_ref(element: ElementType) -> Self {
        ParamType {
            element,
            by_ref: true,
        }
    }

    /// The `void` return type
    #[must_use]
    pub const fn void() -> Self {
        ParamType::new(ElementType::Void)
    }

    /// `true` for a by-value `void`
    #[must_use]
    pub fn is_void(&self) -> bool {
        !self.by_ref && self.element == ElementType::Void
    }
}

impl From<ElementType> for ParamType {
    fn from(element: ElementType) -> Self {
        ParamType::new(element)
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.by_ref {
            write!(f, "{}&", self.element)
        } else {
            write!(f, "{}", self.element)
        }
    }
}

/// A method signature: calling convention, parameters and return type.
///
/// The parameter list never contains the implicit `this` of an instance method; that is
/// what [`CallingConventions::HAS_THIS`] signals.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    /// Calling convention flags
    pub calling_convention: CallingConventions,
    /// Declared parameters, in order
    pub params: Vec<ParamType>,
    /// Return type
    pub return_type: ParamType,
}

impl MethodSignature {
    /// A static signature with the default calling convention.
    #[must_use]
    pub fn new(params: Vec<ParamType>, return_type: ParamType) -> Self {
        MethodSignature {
            calling_convention: CallingConventions::DEFAULT,
            params,
            return_type,
        }
    }

    /// The same signature marked as an instance method.
    #[must_use]
    pub fn with_this(mut self) -> Self {
        self.calling_convention |= CallingConventions::HAS_THIS;
        self
    }

    /// Returns `true` if the signature has an implicit `this`.
    #[must_use]
    pub fn has_this(&self) -> bool {
        self.calling_convention.contains(CallingConventions::HAS_THIS)
    }

    /// Returns `true` for variable argument list signatures.
    #[must_use]
    pub fn is_vararg(&self) -> bool {
        self.calling_convention.contains(CallingConventions::VARARG)
    }

    /// Returns `true` if the method has generic parameters.
    #[must_use]
    pub fn is_generic(&self) -> bool {
        self.calling_convention.contains(CallingConventions::GENERIC)
    }

    /// Returns `true` if any parameter is passed by reference.
    #[must_use]
    pub fn has_by_ref_params(&self) -> bool {
        self.params.iter().any(|param| param.by_ref)
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_this() {
            write!(f, "instance ")?;
        }
        write!(f, "{} (", self.return_type)?;
        for (index, param) in self.params.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{param}")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calling_convention_flags() {
        let sig = MethodSignature::new(vec![ElementType::I4.into()], ParamType::void());
        assert!(!sig.has_this());
        assert!(!sig.is_vararg());

        let sig = sig.with_this();
        assert!(sig.has_this());
        assert_eq!(sig.calling_convention.bits(), 0x20);

        let vararg = MethodSignature {
            calling_convention: CallingConventions::from_bits_retain(0x05),
            params: Vec::new(),
            return_type: ParamType::void(),
        };
        assert!(vararg.is_vararg());

        // C (0x01) and fastcall (0x04) alone are not vararg
        let native = CallingConventions::from_bits_retain(0x01);
        assert!(!native.contains(CallingConventions::VARARG));
    }

    #[test]
    fn element_type_classes() {
        assert!(ElementType::R4.is_float());
        assert!(!ElementType::I8.is_float());
        assert!(ElementType::R8.is_wide());
        assert!(!ElementType::I.is_wide());
        assert!(ElementType::String.is_reference());
        assert!(!ElementType::ValueType.is_reference());
        assert_eq!(ElementType::from_repr(0x0E), Some(ElementType::String));
    }

    #[test]
    fn display() {
        let sig = MethodSignature::new(
            vec![ElementType::I4.into(), ParamType::by_ref(ElementType::R8)],
            ElementType::Boolean.into(),
        )
        .with_this();
        assert_eq!(sig.to_string(), "instance bool (int32, float64&)");
        assert!(sig.has_by_ref_params());
    }
}
