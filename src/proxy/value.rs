//! The boxed form of arguments and return values.

use std::fmt;

use crate::{metadata::signatures::ElementType, Error, Result};

/// An argument or return value in boxed form.
///
/// This is the currency between generated adapters, hooks and the execution engine.
/// Primitive values carry their own width; objects and pointers travel as opaque
/// handles ([`Value::Ref`]), with [`Value::Null`] standing for a null handle. Strings the
/// host hands over by content use [`Value::Str`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Null object reference, also the result of `void` methods
    #[default]
    Null,
    /// `bool`
    Bool(bool),
    /// UTF-16 code unit
    Char(u16),
    /// `int8`
    I1(i8),
    /// `uint8`
    U1(u8),
    /// `int16`
    I2(i16),
    /// `uint16`
    U2(u16),
    /// `int32`
    I4(i32),
    /// `uint32`
    U4(u32),
    /// `int64`
    I8(i64),
    /// `uint64`
    U8(u64),
    /// `float32`
    R4(f32),
    /// `float64`
    R8(f64),
    /// `native int`
    I(isize),
    /// `native uint`
    U(usize),
    /// Object, pointer or by-reference handle
    Ref(usize),
    /// String by content
    Str(String),
}

impl Value {
    /// The zero value of `element`.
    #[must_use]
    pub fn default_for(element: ElementType) -> Value {
        match element {
            ElementType::Boolean => Value::Bool(false),
            ElementType::Char => Value::Char(0),
            ElementType::I1 => Value::I1(0),
            ElementType::U1 => Value::U1(0),
            ElementType::I2 => Value::I2(0),
            ElementType::U2 => Value::U2(0),
            ElementType::I4 => Value::I4(0),
            ElementType::U4 => Value::U4(0),
            ElementType::I8 => Value::I8(0),
            ElementType::U8 => Value::U8(0),
            ElementType::R4 => Value::R4(0.0),
            ElementType::R8 => Value::R8(0.0),
            ElementType::I => Value::I(0),
            ElementType::U => Value::U(0),
            ElementType::Void
            | ElementType::String
            | ElementType::Ptr
            | ElementType::ValueType
            | ElementType::Class
            | ElementType::FnPtr
            | ElementType::Object
            | ElementType::SzArray => Value::Null,
        }
    }

    /// Short name of the variant, used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Char(_) => "char",
            Value::I1(_) => "int8",
            Value::U1(_) => "uint8",
            Value::I2(_) => "int16",
            Value::U2(_) => "uint16",
            Value::I4(_) => "int32",
            Value::U4(_) => "uint32",
            Value::I8(_) => "int64",
            Value::U8(_) => "uint64",
            Value::R4(_) => "float32",
            Value::R8(_) => "float64",
            Value::I(_) => "native int",
            Value::U(_) => "native uint",
            Value::Ref(_) => "ref",
            Value::Str(_) => "string",
        }
    }

    /// Returns `true` for [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The value as a sign-extended integer, for any integer-like variant.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Bool(value) => Some(i64::from(value)),
            Value::Char(value) | Value::U2(value) => Some(i64::from(value)),
            Value::I1(value) => Some(i64::from(value)),
            Value::U1(value) => Some(i64::from(value)),
            Value::I2(value) => Some(i64::from(value)),
            Value::I4(value) => Some(i64::from(value)),
            Value::U4(value) => Some(i64::from(value)),
            Value::I8(value) => Some(value),
            Value::U8(value) => Some(value as i64),
            Value::I(value) => Some(value as i64),
            Value::U(value) | Value::Ref(value) => Some(value as i64),
            _ => None,
        }
    }

    /// The value as a double, for the floating point variants.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::R4(value) => Some(f64::from(value)),
            Value::R8(value) => Some(value),
            _ => None,
        }
    }

    /// Raw register bits of this value when passed as `element`.
    ///
    /// Integer values convert between integer types with the truncation or extension
    /// the native call would apply; floats only convert to floats; handles only to
    /// handle-sized types.
    ///
    /// # Errors
    /// Returns [`crate::Error::TypeMismatch`] if the value has no native form as `element`.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn to_bits(&self, element: ElementType) -> Result<u64> {
        let mismatch = || Error::TypeMismatch {
            expected: element,
            found: self.type_name(),
        };

        match element {
            ElementType::Void => Ok(0),
            ElementType::R4 => {
                let value = self.as_f64().ok_or_else(mismatch)?;
                Ok(u64::from((value as f32).to_bits()))
            }
            ElementType::R8 => Ok(self.as_f64().ok_or_else(mismatch)?.to_bits()),
            ElementType::Boolean => match self {
                Value::Bool(value) => Ok(u64::from(*value)),
                _ => Err(mismatch()),
            },
            ElementType::Char
            | ElementType::I1
            | ElementType::U1
            | ElementType::I2
            | ElementType::U2
            | ElementType::I4
            | ElementType::U4
            | ElementType::I8
            | ElementType::U8
            | ElementType::I
            | ElementType::U => {
                if matches!(self, Value::Ref(_) | Value::Bool(_)) {
                    return Err(mismatch());
                }
                let value = self.as_i64().ok_or_else(mismatch)?;
                Ok(match element {
                    ElementType::I1 => u64::from(value as i8 as u8),
                    ElementType::U1 => u64::from(value as u8),
                    ElementType::I2 => u64::from(value as i16 as u16),
                    ElementType::Char | ElementType::U2 => u64::from(value as u16),
                    ElementType::I4 => u64::from(value as i32 as u32),
                    ElementType::U4 => u64::from(value as u32),
                    _ => value as u64,
                })
            }
            ElementType::String
            | ElementType::Ptr
            | ElementType::ValueType
            | ElementType::Class
            | ElementType::FnPtr
            | ElementType::Object
            | ElementType::SzArray => match *self {
                Value::Null => Ok(0),
                Value::Ref(handle) | Value::U(handle) => Ok(handle as u64),
                Value::I(handle) => Ok(handle as u64),
                _ => Err(mismatch()),
            },
        }
    }

    /// This value converted to `element`, the way it would arrive after passing through
    /// a native call.
    ///
    /// Strings by content are kept as they are for string and object types; `void`
    /// swallows any value.
    ///
    /// # Errors
    /// Returns [`crate::Error::TypeMismatch`] if the value has no form as `element`.
    pub fn convert_to(&self, element: ElementType) -> Result<Value> {
        match (element, self) {
            (ElementType::Void, _) => Ok(Value::Null),
            (ElementType::String | ElementType::Object | ElementType::Class, Value::Str(_)) => {
                Ok(self.clone())
            }
            _ => Ok(Value::from_bits(element, self.to_bits(element)?)),
        }
    }

    /// Box raw register bits received as `element`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn from_bits(element: ElementType, bits: u64) -> Value {
        match element {
            ElementType::Void => Value::Null,
            ElementType::Boolean => Value::Bool(bits as u8 != 0),
            ElementType::Char => Value::Char(bits as u16),
            ElementType::I1 => Value::I1(bits as i8),
            ElementType::U1 => Value::U1(bits as u8),
            ElementType::I2 => Value::I2(bits as i16),
            ElementType::U2 => Value::U2(bits as u16),
            ElementType::I4 => Value::I4(bits as i32),
            ElementType::U4 => Value::U4(bits as u32),
            ElementType::I8 => Value::I8(bits as i64),
            ElementType::U8 => Value::U8(bits),
            ElementType::R4 => Value::R4(f32::from_bits(bits as u32)),
            ElementType::R8 => Value::R8(f64::from_bits(bits)),
            ElementType::I => Value::I(bits as isize),
            ElementType::U => Value::U(bits as usize),
            ElementType::String
            | ElementType::Ptr
            | ElementType::ValueType
            | ElementType::Class
            | ElementType::FnPtr
            | ElementType::Object
            | ElementType::SzArray => {
                if bits == 0 {
                    Value::Null
                } else {
                    Value::Ref(bits as usize)
                }
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::Char(value) => match char::from_u32(u32::from(*value)) {
                Some(c) => write!(f, "'{c}'"),
                None => write!(f, "'\\u{value:04x}'"),
            },
            Value::I1(value) => write!(f, "{value}"),
            Value::U1(value) => write!(f, "{value}"),
            Value::I2(value) => write!(f, "{value}"),
            Value::U2(value) => write!(f, "{value}"),
            Value::I4(value) => write!(f, "{value}"),
            Value::U4(value) => write!(f, "{value}"),
            Value::I8(value) => write!(f, "{value}"),
            Value::U8(value) => write!(f, "{value}"),
            Value::R4(value) => write!(f, "{value:?}"),
            Value::R8(value) => write!(f, "{value:?}"),
            Value::I(value) => write!(f, "{value}"),
            Value::U(value) => write!(f, "{value}"),
            Value::Ref(handle) => write!(f, "ref 0x{handle:x}"),
            Value::Str(value) => write!(f, "{value:?}"),
        }
    }
}

macro_rules! impl_from_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::$variant(value)
                }
            }
        )*
    };
}

impl_from_value! {
    bool => Bool,
    i8 => I1,
    u8 => U1,
    i16 => I2,
    u16 => U2,
    i32 => I4,
    u32 => U4,
    i64 => I8,
    u64 => U8,
    f32 => R4,
    f64 => R8,
    isize => I,
    usize => U,
    String => Str,
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}
