use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;

use corral_types::ProxyKey;

use crate::entity::Entity;

/// Internal state shared by the singular holder kinds.
enum Slot<T> {
    /// No target.
    Empty,
    /// Target built by the application but not yet inserted; the holder
    /// owns the value until the inserter moves it into the store.
    Detached(Box<T>),
    /// Target lives in the store under this key.
    Attached(ProxyKey),
}

impl<T> Slot<T> {
    fn key(&self) -> Option<ProxyKey> {
        match self {
            Slot::Attached(key) => Some(*key),
            _ => None,
        }
    }
}

/// Back-reference to the owning side of a bidirectional relation.
///
/// A `BelongsTo<T>` is an internal holder: while its target is attached,
/// the store counts it against the target's holder count, which is what
/// makes deleting a still-referenced object fail with `ObjectInUse`.
pub struct BelongsTo<T: Entity> {
    slot: Slot<T>,
}

/// Singular owned reference to another entity.
///
/// Same mechanics as [`BelongsTo`]; the two kinds differ in how relation
/// endpoints pair them (a has-one faces a belongs-to, never another
/// has-one) and in the default cascade conventions of their owners.
pub struct HasOne<T: Entity> {
    slot: Slot<T>,
}

macro_rules! singular_holder {
    ($name:ident) => {
        impl<T: Entity> $name<T> {
            /// An empty holder.
            pub fn new() -> Self {
                Self { slot: Slot::Empty }
            }

            /// Hold a not-yet-inserted value; the store attaches it on insert.
            pub fn with(value: T) -> Self {
                Self {
                    slot: Slot::Detached(Box::new(value)),
                }
            }

            /// Hold an already-stored target by key.
            pub fn with_key(key: ProxyKey) -> Self {
                Self {
                    slot: Slot::Attached(key),
                }
            }

            /// Replace the target with a detached value.
            pub fn set(&mut self, value: T) {
                self.slot = Slot::Detached(Box::new(value));
            }

            /// Replace the target with a stored key.
            pub fn set_key(&mut self, key: ProxyKey) {
                self.slot = Slot::Attached(key);
            }

            /// Key of the attached target, if any.
            pub fn key(&self) -> Option<ProxyKey> {
                self.slot.key()
            }

            /// Returns `true` if no target is held.
            pub fn is_empty(&self) -> bool {
                matches!(self.slot, Slot::Empty)
            }

            /// Borrow the detached value, if the target is not yet stored.
            pub fn detached(&self) -> Option<&T> {
                match &self.slot {
                    Slot::Detached(value) => Some(value),
                    _ => None,
                }
            }
        }

        impl<T: Entity> Default for $name<T> {
            fn default() -> Self {
                Self::new()
            }
        }

        impl<T: Entity> fmt::Debug for $name<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match &self.slot {
                    Slot::Empty => write!(f, "{}(empty)", stringify!($name)),
                    Slot::Detached(_) => write!(f, "{}(detached)", stringify!($name)),
                    Slot::Attached(key) => write!(f, "{}({key})", stringify!($name)),
                }
            }
        }

        impl<T: Entity> RefHolder for $name<T> {
            fn target_type(&self) -> TypeId {
                TypeId::of::<T>()
            }

            fn target_type_name(&self) -> &'static str {
                std::any::type_name::<T>()
            }

            fn key(&self) -> Option<ProxyKey> {
                self.slot.key()
            }

            fn has_detached(&self) -> bool {
                matches!(self.slot, Slot::Detached(_))
            }

            fn take_detached(&mut self) -> Option<Box<dyn Entity>> {
                match std::mem::replace(&mut self.slot, Slot::Empty) {
                    Slot::Detached(value) => Some(value),
                    other => {
                        self.slot = other;
                        None
                    }
                }
            }

            fn attach(&mut self, key: ProxyKey) {
                self.slot = Slot::Attached(key);
            }

            fn clear(&mut self) {
                self.slot = Slot::Empty;
            }
        }
    };
}

singular_holder!(BelongsTo);
singular_holder!(HasOne);

/// Type-erased view of a singular holder, used by field visitors.
pub trait RefHolder {
    /// `TypeId` of the target entity type.
    fn target_type(&self) -> TypeId;

    /// Diagnostic name of the target entity type.
    fn target_type_name(&self) -> &'static str;

    /// Key of the attached target, if any.
    fn key(&self) -> Option<ProxyKey>;

    /// Returns `true` if a detached value is waiting to be inserted.
    fn has_detached(&self) -> bool;

    /// Move the detached value out, leaving the holder empty.
    fn take_detached(&mut self) -> Option<Box<dyn Entity>>;

    /// Point the holder at a stored target.
    fn attach(&mut self, key: ProxyKey);

    /// Drop the target reference.
    fn clear(&mut self);
}

/// One entry of a [`HasMany`] container.
struct ManyItem<T> {
    slot: Slot<T>,
    /// Set once the store has counted this entry against the target's
    /// holder count and mirrored it into the foreign endpoint.
    inserted: bool,
}

/// Owning container relation, list-like: iteration order is insertion
/// order, and duplicates are allowed.
pub struct HasMany<T: Entity> {
    items: Vec<ManyItem<T>>,
}

impl<T: Entity> HasMany<T> {
    /// An empty container.
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Append a not-yet-inserted value.
    pub fn push(&mut self, value: T) {
        self.items.push(ManyItem {
            slot: Slot::Detached(Box::new(value)),
            inserted: false,
        });
    }

    /// Append an already-stored target by key.
    pub fn push_key(&mut self, key: ProxyKey) {
        self.items.push(ManyItem {
            slot: Slot::Attached(key),
            inserted: false,
        });
    }

    /// Number of entries, counting detached ones.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the container has no entries.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Keys of all attached entries, in insertion order.
    pub fn iter_keys(&self) -> impl Iterator<Item = ProxyKey> + '_ {
        self.items.iter().filter_map(|item| item.slot.key())
    }

    /// Returns `true` if the container holds an attached entry for `key`.
    pub fn contains_key(&self, key: ProxyKey) -> bool {
        self.items.iter().any(|item| item.slot.key() == Some(key))
    }

    /// Remove the first attached entry for `key`. Returns `true` if one
    /// was removed.
    pub fn remove_key(&mut self, key: ProxyKey) -> bool {
        match self
            .items
            .iter()
            .position(|item| item.slot.key() == Some(key))
        {
            Some(at) => {
                self.items.remove(at);
                true
            }
            None => false,
        }
    }
}

impl<T: Entity> Default for HasMany<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> fmt::Debug for HasMany<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HasMany(len: {})", self.items.len())
    }
}

impl<T: Entity> ManyHolder for HasMany<T> {
    fn target_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn target_type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn key_at(&self, at: usize) -> Option<ProxyKey> {
        self.items.get(at).and_then(|item| item.slot.key())
    }

    fn has_detached_at(&self, at: usize) -> bool {
        matches!(
            self.items.get(at),
            Some(ManyItem {
                slot: Slot::Detached(_),
                ..
            })
        )
    }

    fn take_detached_at(&mut self, at: usize) -> Option<Box<dyn Entity>> {
        let item = self.items.get_mut(at)?;
        match std::mem::replace(&mut item.slot, Slot::Empty) {
            Slot::Detached(value) => Some(value),
            other => {
                item.slot = other;
                None
            }
        }
    }

    fn attach_at(&mut self, at: usize, key: ProxyKey) {
        if let Some(item) = self.items.get_mut(at) {
            item.slot = Slot::Attached(key);
        }
    }

    fn is_inserted_at(&self, at: usize) -> bool {
        self.items.get(at).is_some_and(|item| item.inserted)
    }

    fn mark_inserted_at(&mut self, at: usize, inserted: bool) {
        if let Some(item) = self.items.get_mut(at) {
            item.inserted = inserted;
        }
    }

    fn push_attached(&mut self, key: ProxyKey, inserted: bool) {
        self.items.push(ManyItem {
            slot: Slot::Attached(key),
            inserted,
        });
    }

    fn remove_key(&mut self, key: ProxyKey) -> bool {
        HasMany::remove_key(self, key)
    }

    fn clear(&mut self) {
        self.items.clear();
    }

    fn keys(&self) -> Vec<ProxyKey> {
        self.iter_keys().collect()
    }
}

/// Type-erased view of a container holder, used by field visitors.
pub trait ManyHolder {
    /// `TypeId` of the contained entity type.
    fn target_type(&self) -> TypeId;

    /// Diagnostic name of the contained entity type.
    fn target_type_name(&self) -> &'static str;

    /// Number of entries, counting detached ones.
    fn len(&self) -> usize;

    /// Returns `true` if the container has no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Key of the entry at `at`, if it is attached.
    fn key_at(&self, at: usize) -> Option<ProxyKey>;

    /// Returns `true` if the entry at `at` holds a detached value.
    fn has_detached_at(&self, at: usize) -> bool;

    /// Move the detached value at `at` out, leaving the entry empty.
    fn take_detached_at(&mut self, at: usize) -> Option<Box<dyn Entity>>;

    /// Point the entry at `at` at a stored target.
    fn attach_at(&mut self, at: usize, key: ProxyKey);

    /// Whether the entry at `at` has been counted and mirrored.
    fn is_inserted_at(&self, at: usize) -> bool;

    /// Mark the entry at `at` as counted and mirrored (or not).
    fn mark_inserted_at(&mut self, at: usize, inserted: bool);

    /// Append an attached entry.
    fn push_attached(&mut self, key: ProxyKey, inserted: bool);

    /// Remove the first attached entry for `key`.
    fn remove_key(&mut self, key: ProxyKey) -> bool;

    /// Drop every entry, detached ones included.
    fn clear(&mut self);

    /// Keys of all attached entries, in insertion order.
    fn keys(&self) -> Vec<ProxyKey>;
}

/// Plain typed owning key returned by store insertion.
///
/// A `Handle` is the caller's own root reference to a stored object. It
/// is *not* an internal holder: it never contributes to the target's
/// holder count, so holding a `Handle` alone does not prevent deletion.
pub struct Handle<T> {
    key: ProxyKey,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// Wrap a proxy key.
    pub fn new(key: ProxyKey) -> Self {
        Self {
            key,
            _marker: PhantomData,
        }
    }

    /// The underlying arena key.
    pub fn key(&self) -> ProxyKey {
        self.key
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<T> Eq for Handle<T> {}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visitor::FieldVisitor;
    use corral_types::Identifier;

    #[derive(Default)]
    struct Dummy {
        id: Identifier,
    }

    impl Entity for Dummy {
        fn type_name(&self) -> &'static str {
            "dummy"
        }

        fn accept(&mut self, visitor: &mut dyn FieldVisitor) {
            visitor.on_primary_key("id", &mut self.id);
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }

    fn key(n: u32) -> ProxyKey {
        ProxyKey::new(n, 0)
    }

    // -----------------------------------------------------------------------
    // Singular holders
    // -----------------------------------------------------------------------

    #[test]
    fn singular_holder_states() {
        let mut holder: BelongsTo<Dummy> = BelongsTo::new();
        assert!(holder.is_empty());
        assert_eq!(holder.key(), None);

        holder.set(Dummy::default());
        assert!(holder.has_detached());
        assert!(holder.detached().is_some());

        let taken = RefHolder::take_detached(&mut holder).unwrap();
        assert!(taken.is::<Dummy>());
        assert!(holder.is_empty());

        holder.attach(key(4));
        assert_eq!(holder.key(), Some(key(4)));

        holder.clear();
        assert!(holder.is_empty());
    }

    #[test]
    fn take_detached_leaves_attached_alone() {
        let mut holder: HasOne<Dummy> = HasOne::with_key(key(9));
        assert!(RefHolder::take_detached(&mut holder).is_none());
        assert_eq!(holder.key(), Some(key(9)));
    }

    #[test]
    fn erased_target_type_matches() {
        let holder: BelongsTo<Dummy> = BelongsTo::new();
        assert_eq!(RefHolder::target_type(&holder), TypeId::of::<Dummy>());
    }

    // -----------------------------------------------------------------------
    // Container holder
    // -----------------------------------------------------------------------

    #[test]
    fn container_preserves_insertion_order() {
        let mut many: HasMany<Dummy> = HasMany::new();
        many.push_key(key(1));
        many.push_key(key(2));
        many.push_key(key(3));
        let keys: Vec<_> = many.iter_keys().collect();
        assert_eq!(keys, vec![key(1), key(2), key(3)]);
    }

    #[test]
    fn container_size_tracks_inserts_and_removes() {
        let mut many: HasMany<Dummy> = HasMany::new();
        for n in 0..5 {
            many.push_key(key(n));
        }
        assert!(many.remove_key(key(2)));
        assert!(many.remove_key(key(0)));
        assert!(!many.remove_key(key(9)));
        assert_eq!(many.len(), 3);
        let keys: Vec<_> = many.iter_keys().collect();
        assert_eq!(keys, vec![key(1), key(3), key(4)]);
    }

    #[test]
    fn container_inserted_flags() {
        let mut many: HasMany<Dummy> = HasMany::new();
        many.push_key(key(1));
        assert!(!many.is_inserted_at(0));
        many.mark_inserted_at(0, true);
        assert!(many.is_inserted_at(0));
    }

    #[test]
    fn container_detached_items() {
        let mut many: HasMany<Dummy> = HasMany::new();
        many.push(Dummy::default());
        assert!(many.has_detached_at(0));
        assert_eq!(many.key_at(0), None);

        let value = many.take_detached_at(0).unwrap();
        assert!(value.is::<Dummy>());
        many.attach_at(0, key(7));
        assert_eq!(many.key_at(0), Some(key(7)));
    }

    // -----------------------------------------------------------------------
    // Handle
    // -----------------------------------------------------------------------

    #[test]
    fn handles_compare_by_key() {
        let a: Handle<Dummy> = Handle::new(key(3));
        let b: Handle<Dummy> = Handle::new(key(3));
        let c: Handle<Dummy> = Handle::new(key(4));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.key(), key(3));
    }
}
