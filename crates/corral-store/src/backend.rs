use std::collections::HashMap;

use corral_entity::Snapshot;
use corral_types::Identifier;

use crate::error::StoreResult;

/// Persistence capability consumed by the store.
///
/// The store calls these hooks with primary-key-based rows (arena keys
/// are stripped, references carry the target's pk): immediately when no
/// transaction is active, or on outermost commit for work done under a
/// transaction. Rolled-back work never reaches the backend.
///
/// Implementations must not call back into the store; they see rows,
/// not objects.
pub trait Backend {
    /// A new object's row.
    fn on_insert(&mut self, type_name: &str, pk: &Identifier, row: &Snapshot) -> StoreResult<()>;

    /// An existing object's row after mutation.
    fn on_update(&mut self, type_name: &str, pk: &Identifier, row: &Snapshot) -> StoreResult<()>;

    /// An object was removed.
    fn on_delete(&mut self, type_name: &str, pk: &Identifier) -> StoreResult<()>;

    /// All rows of a type, for [`Store::load`](crate::Store::load).
    fn select(&mut self, type_name: &str) -> StoreResult<Vec<(Identifier, Snapshot)>>;
}

/// HashMap-backed backend for tests and embedding.
///
/// Rows are kept per type name in insertion order. No durability; the
/// value of this backend is observing exactly what the store would hand
/// a real one.
#[derive(Default)]
pub struct InMemoryBackend {
    rows: HashMap<String, Vec<(Identifier, Snapshot)>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows stored for a type.
    pub fn row_count(&self, type_name: &str) -> usize {
        self.rows.get(type_name).map_or(0, Vec::len)
    }

    /// Total rows across all types.
    pub fn len(&self) -> usize {
        self.rows.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up one row by type and primary key.
    pub fn row(&self, type_name: &str, pk: &Identifier) -> Option<&Snapshot> {
        self.rows
            .get(type_name)?
            .iter()
            .find(|(row_pk, _)| row_pk == pk)
            .map(|(_, row)| row)
    }

    /// Seed a row directly, as if a previous session had written it.
    pub fn seed(&mut self, type_name: &str, pk: Identifier, row: Snapshot) {
        self.rows
            .entry(type_name.to_string())
            .or_default()
            .push((pk, row));
    }
}

impl Backend for InMemoryBackend {
    fn on_insert(&mut self, type_name: &str, pk: &Identifier, row: &Snapshot) -> StoreResult<()> {
        self.rows
            .entry(type_name.to_string())
            .or_default()
            .push((pk.clone(), row.clone()));
        Ok(())
    }

    fn on_update(&mut self, type_name: &str, pk: &Identifier, row: &Snapshot) -> StoreResult<()> {
        if let Some(rows) = self.rows.get_mut(type_name) {
            if let Some(slot) = rows.iter_mut().find(|(row_pk, _)| row_pk == pk) {
                slot.1 = row.clone();
            }
        }
        Ok(())
    }

    fn on_delete(&mut self, type_name: &str, pk: &Identifier) -> StoreResult<()> {
        if let Some(rows) = self.rows.get_mut(type_name) {
            rows.retain(|(row_pk, _)| row_pk != pk);
        }
        Ok(())
    }

    fn select(&mut self, type_name: &str) -> StoreResult<Vec<(Identifier, Snapshot)>> {
        Ok(self.rows.get(type_name).cloned().unwrap_or_default())
    }
}

/// Shared-handle form for embedders that want to keep inspecting the
/// backend while the store owns a `Box<dyn Backend>` to it.
impl Backend for std::rc::Rc<std::cell::RefCell<InMemoryBackend>> {
    fn on_insert(&mut self, type_name: &str, pk: &Identifier, row: &Snapshot) -> StoreResult<()> {
        self.borrow_mut().on_insert(type_name, pk, row)
    }

    fn on_update(&mut self, type_name: &str, pk: &Identifier, row: &Snapshot) -> StoreResult<()> {
        self.borrow_mut().on_update(type_name, pk, row)
    }

    fn on_delete(&mut self, type_name: &str, pk: &Identifier) -> StoreResult<()> {
        self.borrow_mut().on_delete(type_name, pk)
    }

    fn select(&mut self, type_name: &str) -> StoreResult<Vec<(Identifier, Snapshot)>> {
        self.borrow_mut().select(type_name)
    }
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBackend")
            .field("row_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(name: &str) -> Snapshot {
        Snapshot::new(name)
    }

    #[test]
    fn insert_and_select() {
        let mut backend = InMemoryBackend::new();
        backend
            .on_insert("album", &Identifier::U64(1), &snapshot("album"))
            .unwrap();
        backend
            .on_insert("album", &Identifier::U64(2), &snapshot("album"))
            .unwrap();

        let rows = backend.select("album").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, Identifier::U64(1));
    }

    #[test]
    fn update_replaces_row_by_pk() {
        let mut backend = InMemoryBackend::new();
        backend
            .on_insert("album", &Identifier::U64(1), &snapshot("before"))
            .unwrap();
        backend
            .on_update("album", &Identifier::U64(1), &snapshot("after"))
            .unwrap();

        assert_eq!(backend.row_count("album"), 1);
        assert_eq!(
            backend.row("album", &Identifier::U64(1)).unwrap().type_name,
            "after"
        );
    }

    #[test]
    fn delete_removes_row() {
        let mut backend = InMemoryBackend::new();
        backend
            .on_insert("album", &Identifier::U64(1), &snapshot("album"))
            .unwrap();
        backend.on_delete("album", &Identifier::U64(1)).unwrap();
        assert!(backend.is_empty());
    }

    #[test]
    fn select_of_unknown_type_is_empty() {
        let mut backend = InMemoryBackend::new();
        assert!(backend.select("nothing").unwrap().is_empty());
    }
}
