use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use corral_types::{Identifier, ProxyKey, TypeError, Value};

use crate::cascade::Cascade;
use crate::entity::Entity;
use crate::holder::{ManyHolder, RefHolder};
use crate::visitor::{AttributeValue, FieldVisitor};

/// Captured target of a reference or container entry.
///
/// Backups made from live objects carry the arena key; rows arriving
/// from a backend carry only the primary key, and the store resolves
/// them to keys (creating ghost proxies for forward references) before
/// a [`SnapshotReader`] applies them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RefSnapshot {
    pub key: Option<ProxyKey>,
    pub pk: Identifier,
}

impl RefSnapshot {
    /// Reference captured from a live holder.
    pub fn from_key(key: ProxyKey) -> Self {
        Self {
            key: Some(key),
            pk: Identifier::Unset,
        }
    }

    /// Reference arriving from a backend row.
    pub fn from_pk(pk: Identifier) -> Self {
        Self { key: None, pk }
    }
}

/// Captured state of one field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FieldState {
    Attribute(Value),
    Reference(Option<RefSnapshot>),
    Container(Vec<RefSnapshot>),
}

/// Full captured field state of one object.
///
/// This is what the transaction log backs up before the first mutation
/// of an object and what the backend capability exchanges as a row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub type_name: String,
    pub pk: Identifier,
    pub fields: Vec<(String, FieldState)>,
}

impl Snapshot {
    /// Empty snapshot for the given type.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            pk: Identifier::Unset,
            fields: Vec::new(),
        }
    }

    /// Look up a captured field by name.
    pub fn field(&self, name: &str) -> Option<&FieldState> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, state)| state)
    }

    /// Mutable lookup, used by the store to resolve pk-only references.
    pub fn field_mut(&mut self, name: &str) -> Option<&mut FieldState> {
        self.fields
            .iter_mut()
            .find(|(field, _)| field == name)
            .map(|(_, state)| state)
    }
}

/// Visitor that captures an entity's current field values.
pub struct SnapshotWriter {
    snapshot: Snapshot,
}

impl SnapshotWriter {
    pub fn new(type_name: &str) -> Self {
        Self {
            snapshot: Snapshot::new(type_name),
        }
    }

    /// Capture `entity` and return the finished snapshot.
    pub fn capture(entity: &mut dyn Entity) -> Snapshot {
        let mut writer = Self::new(entity.type_name());
        entity.accept(&mut writer);
        writer.snapshot
    }
}

impl FieldVisitor for SnapshotWriter {
    fn on_primary_key(&mut self, _name: &str, id: &mut Identifier) {
        self.snapshot.pk = id.clone();
    }

    fn on_attribute(&mut self, name: &str, value: &mut dyn AttributeValue) {
        self.snapshot
            .fields
            .push((name.to_string(), FieldState::Attribute(value.get())));
    }

    fn on_belongs_to(&mut self, name: &str, holder: &mut dyn RefHolder, _cascade: Cascade) {
        self.snapshot.fields.push((
            name.to_string(),
            FieldState::Reference(holder.key().map(RefSnapshot::from_key)),
        ));
    }

    fn on_has_one(&mut self, name: &str, holder: &mut dyn RefHolder, cascade: Cascade) {
        self.on_belongs_to(name, holder, cascade);
    }

    fn on_has_many(&mut self, name: &str, holder: &mut dyn ManyHolder, _cascade: Cascade) {
        let entries = holder
            .keys()
            .into_iter()
            .map(RefSnapshot::from_key)
            .collect();
        self.snapshot
            .fields
            .push((name.to_string(), FieldState::Container(entries)));
    }
}

/// Visitor that writes a captured snapshot back into an entity.
///
/// Expects key-resolved snapshots: every reference the snapshot wants
/// restored must carry a `key`. Restored container entries are marked
/// inserted, since their targets are counted already.
///
/// Errors do not abort the visitation (the visitor interface is
/// infallible); the first one is kept and surfaced by [`finish`].
///
/// [`finish`]: SnapshotReader::finish
pub struct SnapshotReader {
    snapshot: Snapshot,
    consumed: HashSet<String>,
    error: Option<TypeError>,
    mark_inserted: bool,
}

impl SnapshotReader {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            snapshot,
            consumed: HashSet::new(),
            error: None,
            mark_inserted: true,
        }
    }

    /// Like [`new`](Self::new), but restored container entries are left
    /// unmarked so a subsequent relation walk re-counts and re-mirrors
    /// them (used when a deleted object is brought back).
    pub fn new_uncounted(snapshot: Snapshot) -> Self {
        Self {
            mark_inserted: false,
            ..Self::new(snapshot)
        }
    }

    /// Restore `snapshot` into `entity`.
    pub fn restore(entity: &mut dyn Entity, snapshot: Snapshot) -> Result<(), TypeError> {
        let mut reader = Self::new(snapshot);
        entity.accept(&mut reader);
        reader.finish()
    }

    /// Restore with container entries left unmarked; see
    /// [`new_uncounted`](Self::new_uncounted).
    pub fn restore_uncounted(entity: &mut dyn Entity, snapshot: Snapshot) -> Result<(), TypeError> {
        let mut reader = Self::new_uncounted(snapshot);
        entity.accept(&mut reader);
        reader.finish()
    }

    /// Surface the first error, or an [`TypeError::UnknownField`] if the
    /// snapshot carried a field the entity never visited.
    pub fn finish(self) -> Result<(), TypeError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        for (name, _) in &self.snapshot.fields {
            if !self.consumed.contains(name) {
                return Err(TypeError::UnknownField(name.clone()));
            }
        }
        Ok(())
    }

    fn record(&mut self, result: Result<(), TypeError>) {
        if self.error.is_none() {
            if let Err(error) = result {
                self.error = Some(error);
            }
        }
    }
}

impl FieldVisitor for SnapshotReader {
    fn on_primary_key(&mut self, _name: &str, id: &mut Identifier) {
        if self.snapshot.pk.is_set() {
            let pk = self.snapshot.pk.clone();
            let result = id.assign(pk);
            self.record(result);
        }
    }

    fn on_attribute(&mut self, name: &str, value: &mut dyn AttributeValue) {
        let Some(state) = self.snapshot.field(name) else {
            return;
        };
        match state {
            FieldState::Attribute(captured) => {
                let captured = captured.clone();
                self.consumed.insert(name.to_string());
                let result = value.set(captured);
                self.record(result);
            }
            _ => self.record(Err(TypeError::UnknownField(name.to_string()))),
        }
    }

    fn on_belongs_to(&mut self, name: &str, holder: &mut dyn RefHolder, _cascade: Cascade) {
        let Some(state) = self.snapshot.field(name) else {
            return;
        };
        match state {
            FieldState::Reference(entry) => {
                let entry = entry.clone();
                self.consumed.insert(name.to_string());
                match entry.and_then(|snapshot| snapshot.key) {
                    Some(key) => holder.attach(key),
                    None => holder.clear(),
                }
            }
            _ => self.record(Err(TypeError::UnknownField(name.to_string()))),
        }
    }

    fn on_has_one(&mut self, name: &str, holder: &mut dyn RefHolder, cascade: Cascade) {
        self.on_belongs_to(name, holder, cascade);
    }

    fn on_has_many(&mut self, name: &str, holder: &mut dyn ManyHolder, _cascade: Cascade) {
        let Some(state) = self.snapshot.field(name) else {
            return;
        };
        match state {
            FieldState::Container(entries) => {
                let entries = entries.clone();
                self.consumed.insert(name.to_string());
                holder.clear();
                for entry in entries {
                    if let Some(key) = entry.key {
                        holder.push_attached(key, self.mark_inserted);
                    }
                }
            }
            _ => self.record(Err(TypeError::UnknownField(name.to_string()))),
        }
    }
}
