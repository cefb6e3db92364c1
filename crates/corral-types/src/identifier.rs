use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// The kind of a primary-key value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdentifierKind {
    /// No concrete value assigned yet.
    Unset,
    /// Unsigned integral key.
    U64,
    /// Signed integral key.
    I64,
    /// Text key.
    Text,
}

impl IdentifierKind {
    /// Integral kinds can be auto-assigned from the store's oid sequence.
    pub fn is_integral(&self) -> bool {
        matches!(self, IdentifierKind::U64 | IdentifierKind::I64)
    }
}

/// Primary-key value of a stored object.
///
/// An identifier starts out [`Identifier::Unset`] and becomes valid once a
/// concrete value is assigned. Within one prototype node, set identifiers
/// are unique. Comparison, hashing, and cloning are cheap; text keys own
/// their string.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Identifier {
    /// Not yet assigned. Never valid as a map key.
    Unset,
    /// Unsigned integral key.
    U64(u64),
    /// Signed integral key.
    I64(i64),
    /// Text key.
    Text(String),
}

impl Identifier {
    /// Returns `true` once a concrete value has been assigned.
    pub fn is_set(&self) -> bool {
        !matches!(self, Identifier::Unset)
    }

    /// The kind of this identifier.
    pub fn kind(&self) -> IdentifierKind {
        match self {
            Identifier::Unset => IdentifierKind::Unset,
            Identifier::U64(_) => IdentifierKind::U64,
            Identifier::I64(_) => IdentifierKind::I64,
            Identifier::Text(_) => IdentifierKind::Text,
        }
    }

    /// Returns `true` if `other` carries the same kind (unset matches any,
    /// since an unset slot accepts its first concrete value).
    pub fn same_kind(&self, other: &Identifier) -> bool {
        self.kind() == IdentifierKind::Unset
            || other.kind() == IdentifierKind::Unset
            || self.kind() == other.kind()
    }

    /// Assign a value, enforcing kind compatibility on already-set slots.
    pub fn assign(&mut self, value: Identifier) -> Result<(), TypeError> {
        if !self.same_kind(&value) {
            return Err(TypeError::IdentifierKindMismatch {
                expected: self.kind(),
                actual: value.kind(),
            });
        }
        *self = value;
        Ok(())
    }
}

impl Default for Identifier {
    fn default() -> Self {
        Identifier::Unset
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Unset => write!(f, "Identifier(unset)"),
            Identifier::U64(v) => write!(f, "Identifier({v}u)"),
            Identifier::I64(v) => write!(f, "Identifier({v}i)"),
            Identifier::Text(v) => write!(f, "Identifier({v:?})"),
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Unset => write!(f, "<unset>"),
            Identifier::U64(v) => write!(f, "{v}"),
            Identifier::I64(v) => write!(f, "{v}"),
            Identifier::Text(v) => write!(f, "{v}"),
        }
    }
}

impl From<u64> for Identifier {
    fn from(v: u64) -> Self {
        Identifier::U64(v)
    }
}

impl From<i64> for Identifier {
    fn from(v: i64) -> Self {
        Identifier::I64(v)
    }
}

impl From<&str> for Identifier {
    fn from(v: &str) -> Self {
        Identifier::Text(v.to_string())
    }
}

impl From<String> for Identifier {
    fn from(v: String) -> Self {
        Identifier::Text(v)
    }
}
