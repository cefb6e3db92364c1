use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Typed attribute value as it appears in a field snapshot.
///
/// This is the narrow waist between entity fields and everything that
/// consumes them generically: transaction backups, backend rows, and the
/// attach-time field probe all move attribute data as `Value`s.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absent optional attribute.
    Null,
    Bool(bool),
    I64(i64),
    U64(u64),
    F64(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    /// Short name of the carried kind, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::I64(_) => "i64",
            Value::U64(_) => "u64",
            Value::F64(_) => "f64",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
        }
    }

    pub fn as_bool(&self) -> Result<bool, TypeError> {
        match self {
            Value::Bool(v) => Ok(*v),
            other => Err(TypeError::value_mismatch("bool", other)),
        }
    }

    pub fn as_i64(&self) -> Result<i64, TypeError> {
        match self {
            Value::I64(v) => Ok(*v),
            other => Err(TypeError::value_mismatch("i64", other)),
        }
    }

    pub fn as_u64(&self) -> Result<u64, TypeError> {
        match self {
            Value::U64(v) => Ok(*v),
            other => Err(TypeError::value_mismatch("u64", other)),
        }
    }

    pub fn as_f64(&self) -> Result<f64, TypeError> {
        match self {
            Value::F64(v) => Ok(*v),
            other => Err(TypeError::value_mismatch("f64", other)),
        }
    }

    pub fn as_text(&self) -> Result<&str, TypeError> {
        match self {
            Value::Text(v) => Ok(v),
            other => Err(TypeError::value_mismatch("text", other)),
        }
    }

    pub fn as_bytes(&self) -> Result<&[u8], TypeError> {
        match self {
            Value::Bytes(v) => Ok(v),
            other => Err(TypeError::value_mismatch("bytes", other)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::U64(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v:?}"),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::U64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}
