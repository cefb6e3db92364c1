use corral_types::{Identifier, Oid, ProxyKey, TypeError};
use thiserror::Error;

/// Errors produced by object graph operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    /// A type with this name or `TypeId` is already attached.
    #[error("type already attached: {0}")]
    DuplicateType(String),

    /// The type has not been attached to the prototype tree.
    #[error("unknown type: {0}")]
    UnknownType(String),

    /// The prototype has children; detach requires `recursive`.
    #[error("type is in use, child prototypes exist: {0}")]
    TypeInUse(String),

    /// Delete-safety check failed: a live internal holder still points at
    /// an object in the delete set.
    #[error("object {oid} is in use: {holder_count} holder(s) remain")]
    ObjectInUse { oid: Oid, holder_count: i64 },

    /// The key does not resolve to a live proxy (freed slot or foreign
    /// arena).
    #[error("proxy not found: {0}")]
    ProxyNotFound(ProxyKey),

    /// A set primary key collides with an existing object of the node.
    #[error("duplicate identifier {pk} for type {type_name}")]
    DuplicateIdentifier { type_name: String, pk: Identifier },

    /// Identifier or value kind violation.
    #[error(transparent)]
    Type(#[from] TypeError),
}

/// Convenience alias for graph results.
pub type GraphResult<T> = Result<T, GraphError>;
