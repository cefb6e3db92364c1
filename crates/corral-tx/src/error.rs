use corral_types::Oid;
use thiserror::Error;

/// Errors produced by transaction bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxError {
    /// Commit/rollback was attempted on a transaction that is not the
    /// top of the stack.
    #[error("transaction is not the current transaction")]
    NotCurrentTransaction,

    /// Commit/rollback was attempted with no transaction active.
    #[error("no transaction is active")]
    NoTransaction,

    /// The same oid was deleted twice within one transaction.
    #[error("object {0} was already deleted in this transaction")]
    DoubleDelete(Oid),

    /// An insert was recorded for an oid that already carries an update
    /// or delete action; oids are never reused, so this is a store bug
    /// surfaced loudly.
    #[error("object {0} already carries a conflicting action")]
    AlreadyLogged(Oid),
}
