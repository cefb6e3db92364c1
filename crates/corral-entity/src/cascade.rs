use serde::{Deserialize, Serialize};

/// Propagation policy attached to a relation field.
///
/// Controls whether inserting or deleting an owner propagates across the
/// relation to the referenced object(s).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cascade {
    /// Never propagate; the related object is managed independently.
    None,
    /// Inserting the owner inserts not-yet-persisted related objects.
    Insert,
    /// Deleting the owner deletes cascade-owned related objects.
    Delete,
    /// Both insert and delete propagation.
    All,
}

impl Cascade {
    /// Returns `true` if insert operations propagate across this field.
    pub fn inserts(&self) -> bool {
        matches!(self, Cascade::Insert | Cascade::All)
    }

    /// Returns `true` if delete operations propagate across this field.
    pub fn deletes(&self) -> bool {
        matches!(self, Cascade::Delete | Cascade::All)
    }
}

impl Default for Cascade {
    fn default() -> Self {
        Cascade::None
    }
}
