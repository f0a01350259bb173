use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::description::{RegisterId, ServiceDescription};

/// Runtime value carried as an operation argument or return value.
///
/// Serialized adjacently tagged (`{"type": "int", "value": 5}`) so every
/// parameter on the wire carries its own type tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum Value {
    /// Explicit null.
    Null,
    Bool(bool),
    /// Signed 64-bit integer.
    Int(i64),
    /// 64-bit IEEE 754 float.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Binary data.
    Bytes(Vec<u8>),
    /// Ordered sequence of values.
    Array(Vec<Value>),
    /// String-keyed map. Uses `BTreeMap` for deterministic serialization order.
    Map(BTreeMap<String, Value>),
    /// A service description, used by the registry operations.
    Description(Box<ServiceDescription>),
}

/// Type tag of a [`Value`], used in operation signatures and response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Float,
    String,
    Bytes,
    Array,
    Map,
    Description,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::String => "string",
            Self::Bytes => "bytes",
            Self::Array => "array",
            Self::Map => "map",
            Self::Description => "description",
        };
        f.write_str(name)
    }
}

impl Value {
    /// Returns the type tag of this value.
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Null,
            Self::Bool(_) => ValueKind::Bool,
            Self::Int(_) => ValueKind::Int,
            Self::Float(_) => ValueKind::Float,
            Self::String(_) => ValueKind::String,
            Self::Bytes(_) => ValueKind::Bytes,
            Self::Array(_) => ValueKind::Array,
            Self::Map(_) => ValueKind::Map,
            Self::Description(_) => ValueKind::Description,
        }
    }

    /// Returns the string slice if this is a `String` value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer if this is an `Int` value.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Decodes this value into a concrete Rust type.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::TypeMismatch`] if the value has the wrong kind.
    pub fn decode<T: FromValue>(self) -> Result<T, ValueError> {
        T::from_value(self)
    }
}

/// Errors raised when decoding a [`Value`] into a typed argument.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    #[error("expected {expected}, found {found}")]
    TypeMismatch { expected: ValueKind, found: ValueKind },
    #[error("integer {value} out of range for {target}")]
    OutOfRange { value: i64, target: &'static str },
}

fn mismatch(expected: ValueKind, found: &Value) -> ValueError {
    ValueError::TypeMismatch {
        expected,
        found: found.kind(),
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Conversion from a wire [`Value`] into a typed handler argument.
pub trait FromValue: Sized {
    /// Converts the value, failing on a kind mismatch.
    ///
    /// # Errors
    ///
    /// Returns a [`ValueError`] if the value cannot represent `Self`.
    fn from_value(value: Value) -> Result<Self, ValueError>;
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        Ok(value)
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(mismatch(ValueKind::Bool, &other)),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Int(i) => Ok(i),
            other => Err(mismatch(ValueKind::Int, &other)),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Float(f) => Ok(f),
            #[allow(clippy::cast_precision_loss)]
            Value::Int(i) => Ok(i as f64),
            other => Err(mismatch(ValueKind::Float, &other)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::String(s) => Ok(s),
            other => Err(mismatch(ValueKind::String, &other)),
        }
    }
}

impl FromValue for RegisterId {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Int(i) => u64::try_from(i)
                .map(RegisterId)
                .map_err(|_| ValueError::OutOfRange {
                    value: i,
                    target: "RegisterId",
                }),
            other => Err(mismatch(ValueKind::Int, &other)),
        }
    }
}

impl FromValue for ServiceDescription {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Description(d) => Ok(*d),
            other => Err(mismatch(ValueKind::Description, &other)),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Array(items) => items.into_iter().map(T::from_value).collect(),
            other => Err(mismatch(ValueKind::Array, &other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<RegisterId> for Value {
    fn from(id: RegisterId) -> Self {
        // Ids come from a counter starting at 1 and never approach i64::MAX.
        #[allow(clippy::cast_possible_wrap)]
        Self::Int(id.0 as i64)
    }
}

impl From<ServiceDescription> for Value {
    fn from(d: ServiceDescription) -> Self {
        Self::Description(Box::new(d))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::Array(items.into_iter().map(Into::into).collect())
    }
}
