//! Transaction action log for the corral object graph store.
//!
//! A transaction records *intents* — inserts, updates, deletes — against
//! objects identified by their oid, together with the serialized backups
//! needed to undo them. The log itself is pure data: the store applies
//! mutations live and replays the log in reverse on rollback.
//!
//! Folding rules keep the log minimal (at most one action per oid):
//!
//! - a second insert of the same oid folds into the existing insert
//!   action;
//! - only the first update backs up — the original backup already
//!   restores pre-transaction state;
//! - a delete of an oid inserted in the same transaction cancels the
//!   insert instead of logging anything (the object need not exist on
//!   rollback either way);
//! - a delete after an update inherits the update's backup, which is the
//!   pre-transaction state;
//! - a second delete of the same oid is an error.

pub mod action;
pub mod error;
pub mod transaction;

pub use action::{Action, ActionLog, DeleteDisposition};
pub use error::TxError;
pub use transaction::{Transaction, TxId};
