use corral_graph::GraphError;
use corral_tx::TxError;
use corral_types::TypeError;
use thiserror::Error;

/// Errors surfaced by store operations.
///
/// Structural errors (duplicate or unknown types, identifier kind
/// mismatches) leave the store unchanged. `ObjectInUse` is recoverable:
/// break the remaining references and retry the delete. Transaction
/// errors indicate misuse of the commit/rollback protocol.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Graph-level failure: duplicate/unknown type, delete-safety
    /// violation, stale key, identifier collision.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Transaction protocol violation.
    #[error(transparent)]
    Tx(#[from] TxError),

    /// Identifier or value kind violation during snapshot restore.
    #[error(transparent)]
    Type(#[from] TypeError),

    /// The backend refused or failed an operation.
    #[error("backend error: {0}")]
    Backend(String),

    /// The stored object behind a handle is not of the requested type.
    #[error("handle type mismatch for object {0}")]
    WrongType(corral_types::Oid),
}

/// Convenience alias for store results.
pub type StoreResult<T> = Result<T, StoreError>;
