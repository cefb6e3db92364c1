use std::fmt;

use corral_entity::Entity;
use corral_types::{Identifier, Oid, ProxyKey};

use crate::node::NodeId;

/// One live object in the store.
///
/// A proxy carries identity (`oid`, `pk`), its prototype node, the
/// type-erased payload, and the holder count used by the delete-safety
/// check. A proxy with `payload: None` is a *ghost*: a forward reference
/// created during load or rollback that only pins an identity until its
/// own data arrives.
pub struct Proxy {
    pub oid: Oid,
    pub node: NodeId,
    pub pk: Identifier,
    /// Number of internal holders (belongs-to, has-one, container
    /// entries) currently pointing here. Only bookkeeping that
    /// incremented it may decrement it; it never drives deletion on its
    /// own.
    pub holder_count: i64,
    payload: Option<Box<dyn Entity>>,
}

impl Proxy {
    pub fn new(oid: Oid, node: NodeId, pk: Identifier, payload: Option<Box<dyn Entity>>) -> Self {
        Self {
            oid,
            node,
            pk,
            holder_count: 0,
            payload,
        }
    }

    /// Returns `true` while the payload has not been filled in.
    pub fn is_ghost(&self) -> bool {
        self.payload.is_none()
    }

    pub fn payload(&self) -> Option<&dyn Entity> {
        self.payload.as_deref()
    }

    pub fn payload_mut(&mut self) -> Option<&mut dyn Entity> {
        self.payload.as_deref_mut()
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("oid", &self.oid)
            .field("node", &self.node)
            .field("pk", &self.pk)
            .field("holder_count", &self.holder_count)
            .field("ghost", &self.is_ghost())
            .finish()
    }
}

/// A doubly linked cell of the partitioned proxy list.
struct Cell {
    prev: Option<ProxyKey>,
    next: Option<ProxyKey>,
    body: CellBody,
}

enum CellBody {
    /// List endpoint owned by a root prototype node; never carries data.
    Sentinel,
    Proxy(Proxy),
}

struct Slot {
    generation: u32,
    cell: Option<Cell>,
}

/// Generational slot arena holding every proxy and list sentinel.
///
/// The arena owns all proxies; everything else addresses them through
/// [`ProxyKey`]s. Freeing a slot bumps its generation, so keys held past
/// a delete stop resolving instead of aliasing the slot's next tenant.
/// The intrusive `prev`/`next` links thread the per-hierarchy proxy
/// lists that the prototype tree partitions with its markers.
pub struct ProxyArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    /// Live proxies, sentinels excluded.
    len: usize,
}

impl ProxyArena {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Number of live proxies.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn alloc_cell(&mut self, body: CellBody) -> ProxyKey {
        let cell = Cell {
            prev: None,
            next: None,
            body,
        };
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.cell = Some(cell);
                ProxyKey::new(index, slot.generation)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    cell: Some(cell),
                });
                ProxyKey::new(index, 0)
            }
        }
    }

    /// Allocate an unlinked sentinel cell.
    pub fn alloc_sentinel(&mut self) -> ProxyKey {
        self.alloc_cell(CellBody::Sentinel)
    }

    /// Allocate an unlinked proxy cell.
    pub fn alloc(&mut self, proxy: Proxy) -> ProxyKey {
        self.len += 1;
        self.alloc_cell(CellBody::Proxy(proxy))
    }

    fn cell(&self, key: ProxyKey) -> Option<&Cell> {
        let slot = self.slots.get(key.index() as usize)?;
        if slot.generation != key.generation() {
            return None;
        }
        slot.cell.as_ref()
    }

    fn cell_mut(&mut self, key: ProxyKey) -> Option<&mut Cell> {
        let slot = self.slots.get_mut(key.index() as usize)?;
        if slot.generation != key.generation() {
            return None;
        }
        slot.cell.as_mut()
    }

    /// Returns `true` if the key resolves to a live cell.
    pub fn contains(&self, key: ProxyKey) -> bool {
        self.cell(key).is_some()
    }

    /// Borrow the proxy behind `key`. Sentinels and stale keys yield
    /// `None`.
    pub fn proxy(&self, key: ProxyKey) -> Option<&Proxy> {
        match self.cell(key) {
            Some(Cell {
                body: CellBody::Proxy(proxy),
                ..
            }) => Some(proxy),
            _ => None,
        }
    }

    /// Mutable borrow of the proxy behind `key`.
    pub fn proxy_mut(&mut self, key: ProxyKey) -> Option<&mut Proxy> {
        match self.cell_mut(key) {
            Some(Cell {
                body: CellBody::Proxy(proxy),
                ..
            }) => Some(proxy),
            _ => None,
        }
    }

    /// Move the payload out of a proxy for a visit; pair with
    /// [`put_payload`](Self::put_payload). Keeping the payload outside
    /// the arena while visiting is what lets field visitors mutate the
    /// object and the graph in the same single-threaded operation.
    pub fn take_payload(&mut self, key: ProxyKey) -> Option<Box<dyn Entity>> {
        self.proxy_mut(key)?.payload.take()
    }

    /// Return a payload taken with [`take_payload`](Self::take_payload).
    pub fn put_payload(&mut self, key: ProxyKey, payload: Box<dyn Entity>) {
        if let Some(proxy) = self.proxy_mut(key) {
            proxy.payload = Some(payload);
        }
    }

    /// Successor in the proxy list.
    pub fn next(&self, key: ProxyKey) -> Option<ProxyKey> {
        self.cell(key)?.next
    }

    /// Predecessor in the proxy list.
    pub fn prev(&self, key: ProxyKey) -> Option<ProxyKey> {
        self.cell(key)?.prev
    }

    /// Link two unlinked endpoint cells into an empty list
    /// (`head <-> tail`).
    pub fn link_pair(&mut self, head: ProxyKey, tail: ProxyKey) {
        if let Some(cell) = self.cell_mut(head) {
            cell.next = Some(tail);
        }
        if let Some(cell) = self.cell_mut(tail) {
            cell.prev = Some(head);
        }
    }

    /// Splice `key` into the list directly before `successor`.
    pub fn link_before(&mut self, key: ProxyKey, successor: ProxyKey) {
        let prev = match self.cell(successor) {
            Some(cell) => cell.prev,
            None => return,
        };
        if let Some(cell) = self.cell_mut(key) {
            cell.prev = prev;
            cell.next = Some(successor);
        }
        if let Some(prev) = prev {
            if let Some(cell) = self.cell_mut(prev) {
                cell.next = Some(key);
            }
        }
        if let Some(cell) = self.cell_mut(successor) {
            cell.prev = Some(key);
        }
    }

    /// Remove `key` from the list, patching its neighbors.
    pub fn unlink(&mut self, key: ProxyKey) {
        let (prev, next) = match self.cell(key) {
            Some(cell) => (cell.prev, cell.next),
            None => return,
        };
        if let Some(prev) = prev {
            if let Some(cell) = self.cell_mut(prev) {
                cell.next = next;
            }
        }
        if let Some(next) = next {
            if let Some(cell) = self.cell_mut(next) {
                cell.prev = prev;
            }
        }
        if let Some(cell) = self.cell_mut(key) {
            cell.prev = None;
            cell.next = None;
        }
    }

    /// Free a cell, bumping the slot generation. The cell must already
    /// be unlinked. Returns the proxy for the caller to dispose of.
    pub fn free(&mut self, key: ProxyKey) -> Option<Proxy> {
        let slot = self.slots.get_mut(key.index() as usize)?;
        if slot.generation != key.generation() {
            return None;
        }
        let cell = slot.cell.take()?;
        debug_assert!(
            cell.prev.is_none() && cell.next.is_none(),
            "freed cell must be unlinked"
        );
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index());
        match cell.body {
            CellBody::Proxy(proxy) => {
                self.len -= 1;
                Some(proxy)
            }
            CellBody::Sentinel => None,
        }
    }
}

impl Default for ProxyArena {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProxyArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyArena")
            .field("proxies", &self.len)
            .field("slots", &self.slots.len())
            .finish()
    }
}
