use std::collections::HashMap;

use corral_entity::Snapshot;
use corral_types::{Identifier, Oid, ProxyKey};

use crate::error::TxError;

/// One undoable intent in a transaction's log.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Objects created in this transaction; rollback removes them. One
    /// cascade insert logs all of its registrations as one action.
    Insert { objects: Vec<(Oid, ProxyKey)> },

    /// First mutation of an existing object; `backup` is its
    /// pre-transaction field state.
    Update {
        oid: Oid,
        key: ProxyKey,
        backup: Snapshot,
    },

    /// Object removed in this transaction; rollback recreates it under
    /// its original identity from `backup`.
    Delete {
        oid: Oid,
        key: ProxyKey,
        node_name: String,
        pk: Identifier,
        backup: Snapshot,
    },
}

/// What [`ActionLog::record_delete`] decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteDisposition {
    /// A delete action was logged (possibly inheriting an update's
    /// backup).
    Logged,
    /// The delete cancelled an insert from the same transaction; no
    /// action remains for the oid.
    CancelledInsert,
}

/// Ordered action log with an oid index enforcing "at most one action
/// per object" via the folding rules described in the crate docs.
#[derive(Debug, Default)]
pub struct ActionLog {
    actions: Vec<Action>,
    index: HashMap<Oid, usize>,
}

impl ActionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Logged actions in record order.
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Consume the log, yielding the actions in record order.
    pub fn into_actions(self) -> Vec<Action> {
        self.actions
    }

    /// The action logged for an oid, if any.
    pub fn action_for(&self, oid: Oid) -> Option<&Action> {
        self.index.get(&oid).map(|&at| &self.actions[at])
    }

    /// Record a batch of freshly registered objects (one cascade
    /// insert). Oids already listed on an insert action fold silently;
    /// an oid carrying any other action is a store bug.
    pub fn record_insert(&mut self, objects: &[(Oid, ProxyKey)]) -> Result<(), TxError> {
        let mut fresh = Vec::new();
        for &(oid, key) in objects {
            match self.index.get(&oid) {
                None => fresh.push((oid, key)),
                Some(&at) => match &self.actions[at] {
                    Action::Insert { .. } => {}
                    _ => return Err(TxError::AlreadyLogged(oid)),
                },
            }
        }
        if fresh.is_empty() {
            return Ok(());
        }
        let at = self.actions.len();
        for &(oid, _) in &fresh {
            self.index.insert(oid, at);
        }
        self.actions.push(Action::Insert { objects: fresh });
        Ok(())
    }

    /// Record the first mutation of an object, capturing its backup
    /// lazily. Any later touch of the same oid is a no-op: an insert
    /// action means rollback removes the object anyway, and an existing
    /// update already holds the pre-transaction state.
    pub fn record_update(
        &mut self,
        oid: Oid,
        key: ProxyKey,
        backup: impl FnOnce() -> Snapshot,
    ) {
        if self.index.contains_key(&oid) {
            return;
        }
        let at = self.actions.len();
        self.actions.push(Action::Update {
            oid,
            key,
            backup: backup(),
        });
        self.index.insert(oid, at);
    }

    /// Record a delete, applying the cancellation rules. The backup is
    /// only captured when a fresh delete action is actually logged.
    pub fn record_delete(
        &mut self,
        oid: Oid,
        key: ProxyKey,
        node_name: &str,
        pk: Identifier,
        backup: impl FnOnce() -> Snapshot,
    ) -> Result<DeleteDisposition, TxError> {
        match self.index.get(&oid).copied() {
            None => {
                let at = self.actions.len();
                self.actions.push(Action::Delete {
                    oid,
                    key,
                    node_name: node_name.to_string(),
                    pk,
                    backup: backup(),
                });
                self.index.insert(oid, at);
                Ok(DeleteDisposition::Logged)
            }
            Some(at) => {
                enum Folded {
                    CancelledInsert { emptied: bool },
                    InheritedBackup(Snapshot),
                    Double,
                }
                let folded = match &mut self.actions[at] {
                    Action::Insert { objects } => {
                        objects.retain(|&(logged, _)| logged != oid);
                        Folded::CancelledInsert {
                            emptied: objects.is_empty(),
                        }
                    }
                    Action::Update { backup, .. } => Folded::InheritedBackup(backup.clone()),
                    Action::Delete { .. } => Folded::Double,
                };
                match folded {
                    Folded::CancelledInsert { emptied } => {
                        self.index.remove(&oid);
                        if emptied {
                            self.remove_action(at);
                        }
                        Ok(DeleteDisposition::CancelledInsert)
                    }
                    Folded::InheritedBackup(backup) => {
                        self.actions[at] = Action::Delete {
                            oid,
                            key,
                            node_name: node_name.to_string(),
                            pk,
                            backup,
                        };
                        Ok(DeleteDisposition::Logged)
                    }
                    Folded::Double => Err(TxError::DoubleDelete(oid)),
                }
            }
        }
    }

    /// Fold a committed inner transaction's log into this one, entry by
    /// entry, reusing the same rules. Backups carried by the child win
    /// only where this log has no earlier state.
    pub fn merge(&mut self, child: ActionLog) -> Result<(), TxError> {
        for action in child.actions {
            match action {
                Action::Insert { objects } => self.record_insert(&objects)?,
                Action::Update { oid, key, backup } => {
                    self.record_update(oid, key, || backup);
                }
                Action::Delete {
                    oid,
                    key,
                    node_name,
                    pk,
                    backup,
                } => {
                    self.record_delete(oid, key, &node_name, pk, || backup)?;
                }
            }
        }
        Ok(())
    }

    /// Drop the action at `at`, shifting the index entries behind it.
    fn remove_action(&mut self, at: usize) {
        self.actions.remove(at);
        for position in self.index.values_mut() {
            if *position > at {
                *position -= 1;
            }
        }
    }
}
