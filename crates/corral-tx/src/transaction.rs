use std::fmt;

use serde::{Deserialize, Serialize};

use crate::action::ActionLog;

/// Identifier of one transaction, unique per store.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxId(u64);

impl TxId {
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({})", self.0)
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One open transaction: an id and its action log.
///
/// Transactions nest on a stack owned by the store; only the top of the
/// stack accepts actions, commits, or rolls back. The state machine is
/// implicit in the stack: pushed = active, popped on commit (log flushed
/// or merged into the parent) or rollback (log replayed in reverse).
#[derive(Debug)]
pub struct Transaction {
    id: TxId,
    log: ActionLog,
}

impl Transaction {
    pub fn new(id: TxId) -> Self {
        Self {
            id,
            log: ActionLog::new(),
        }
    }

    pub fn id(&self) -> TxId {
        self.id
    }

    pub fn log(&self) -> &ActionLog {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut ActionLog {
        &mut self.log
    }

    /// Consume the transaction, yielding its log.
    pub fn into_log(self) -> ActionLog {
        self.log
    }

    /// A transaction with nothing logged commits and rolls back as a
    /// no-op.
    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_transaction_is_empty() {
        let tx = Transaction::new(TxId::new(1));
        assert!(tx.is_empty());
        assert_eq!(tx.id(), TxId::new(1));
    }

    #[test]
    fn tx_ids_are_ordered() {
        assert!(TxId::new(1) < TxId::new(2));
        assert_eq!(format!("{}", TxId::new(3)), "3");
    }
}
