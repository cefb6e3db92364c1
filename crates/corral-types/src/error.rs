use thiserror::Error;

use crate::identifier::IdentifierKind;
use crate::value::Value;

/// Errors produced by identifier and value operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TypeError {
    /// A primary-key slot was assigned a value of a different kind.
    #[error("identifier kind mismatch: expected {expected:?}, got {actual:?}")]
    IdentifierKindMismatch {
        expected: IdentifierKind,
        actual: IdentifierKind,
    },

    /// An attribute slot was assigned a value of a different kind.
    #[error("value kind mismatch: expected {expected}, got {actual}")]
    ValueKindMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// A snapshot referenced a field the entity does not declare.
    #[error("unknown field: {0}")]
    UnknownField(String),
}

impl TypeError {
    /// Build a [`TypeError::ValueKindMismatch`] from the offending value.
    pub fn value_mismatch(expected: &'static str, actual: &Value) -> Self {
        TypeError::ValueKindMismatch {
            expected,
            actual: actual.kind_name(),
        }
    }
}
