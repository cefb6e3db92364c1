use std::fmt;

use serde::{Deserialize, Serialize};

/// Store-assigned object sequence number.
///
/// Every proxy registered with a store receives the next `Oid` from a
/// monotonically increasing sequence. Oids are never reused within one
/// store, which makes them suitable as transaction-log keys even after
/// the underlying arena slot has been recycled.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Oid(u64);

impl Oid {
    /// Wrap a raw sequence number.
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    /// The raw sequence number.
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Oid({})", self.0)
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Generational key addressing one proxy slot in the arena.
///
/// A `ProxyKey` is an index plus the generation the slot carried when the
/// proxy was allocated. Freeing a slot bumps its generation, so keys held
/// after a delete simply stop resolving instead of aliasing whatever
/// object reuses the slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProxyKey {
    index: u32,
    generation: u32,
}

impl ProxyKey {
    /// Assemble a key from its parts. Only the arena hands out live keys.
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index within the arena.
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Generation the slot had at allocation time.
    pub const fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for ProxyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProxyKey({}v{})", self.index, self.generation)
    }
}

impl fmt::Display for ProxyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}
