use std::any::TypeId;
use std::collections::HashMap;

use tracing::debug;

use corral_entity::{probe_shape, Entity, FieldVisitor};
use corral_types::{Identifier, Oid, ProxyKey};

use crate::arena::{Proxy, ProxyArena};
use crate::error::{GraphError, GraphResult};
use crate::node::NodeId;
use crate::tree::PrototypeTree;

/// The live object graph: proxy arena, prototype tree, and identity map.
///
/// Everything mutable in the store funnels through this struct. It is
/// deliberately single-threaded: callers serialize access (one lock
/// around the whole store, or confinement to one thread) and no
/// operation here suspends, so every marker adjustment, cascade, and
/// count update runs to completion before the next one starts.
pub struct ObjectGraph {
    pub arena: ProxyArena,
    pub tree: PrototypeTree,
    next_oid: u64,
    oid_index: HashMap<Oid, ProxyKey>,
}

impl ObjectGraph {
    pub fn new() -> Self {
        Self {
            arena: ProxyArena::new(),
            tree: PrototypeTree::new(),
            next_oid: 0,
            oid_index: HashMap::new(),
        }
    }

    /// Number of live objects, ghosts included.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// O(1) identity lookup.
    pub fn find_by_oid(&self, oid: Oid) -> Option<ProxyKey> {
        self.oid_index.get(&oid).copied()
    }

    /// Probe `T`'s field layout and attach it to the prototype tree,
    /// optionally as a child of an attached parent node.
    pub fn attach_type<T: Entity + Default>(
        &mut self,
        name: &str,
        parent: Option<NodeId>,
    ) -> GraphResult<NodeId> {
        let mut prototype = T::default();
        let shape = probe_shape(&mut prototype);
        self.tree.attach(
            &mut self.arena,
            name,
            TypeId::of::<T>(),
            || Box::new(T::default()),
            shape,
            parent,
        )
    }

    /// Detach a type, dropping its objects from the identity map too.
    pub fn detach(&mut self, node: NodeId, recursive: bool) -> GraphResult<()> {
        let freed = self.tree.detach(&mut self.arena, node, recursive)?;
        for proxy in &freed {
            self.oid_index.remove(&proxy.oid);
        }
        Ok(())
    }

    /// Create a proxy for `entity`, assign the next oid, and link it
    /// into its prototype's partition.
    ///
    /// An unset primary key is auto-filled from the oid sequence; a set
    /// one must be unique within the node.
    pub fn register(&mut self, mut entity: Box<dyn Entity>) -> GraphResult<ProxyKey> {
        let type_id = entity.as_any().type_id();
        let Some(node) = self.tree.find_by_type(type_id) else {
            return Err(GraphError::UnknownType(entity.type_name().to_string()));
        };

        self.next_oid += 1;
        let oid = Oid::new(self.next_oid);

        let mut pk = read_pk(entity.as_mut());
        if !pk.is_set() {
            pk = Identifier::U64(oid.get());
            write_pk(entity.as_mut(), pk.clone())?;
        }
        if self.tree.node(node).pk_map.contains_key(&pk) {
            return Err(GraphError::DuplicateIdentifier {
                type_name: self.tree.node(node).name.clone(),
                pk,
            });
        }

        let key = self
            .arena
            .alloc(Proxy::new(oid, node, pk.clone(), Some(entity)));
        self.tree.insert_proxy(&mut self.arena, node, key);
        self.tree.node_mut(node).pk_map.insert(pk, key);
        self.oid_index.insert(oid, key);
        debug!(%oid, node = %self.tree.node(node).name, "object registered");
        Ok(key)
    }

    /// Re-create a proxy under its original identity (rollback of a
    /// delete, or a backend row arriving with its own key).
    pub fn register_restored(
        &mut self,
        entity: Box<dyn Entity>,
        node: NodeId,
        oid: Oid,
        pk: Identifier,
    ) -> GraphResult<ProxyKey> {
        if pk.is_set() && self.tree.node(node).pk_map.contains_key(&pk) {
            return Err(GraphError::DuplicateIdentifier {
                type_name: self.tree.node(node).name.clone(),
                pk,
            });
        }
        self.next_oid = self.next_oid.max(oid.get());

        let key = self
            .arena
            .alloc(Proxy::new(oid, node, pk.clone(), Some(entity)));
        self.tree.insert_proxy(&mut self.arena, node, key);
        if pk.is_set() {
            self.tree.node_mut(node).pk_map.insert(pk, key);
        }
        self.oid_index.insert(oid, key);
        debug!(%oid, "object restored");
        Ok(key)
    }

    /// Find an object of `node` by primary key, or create a ghost proxy
    /// pinning that identity until its data arrives.
    pub fn ensure_by_pk(&mut self, node: NodeId, pk: Identifier) -> ProxyKey {
        if let Some(key) = self.tree.node(node).find_by_pk(&pk) {
            return key;
        }
        self.next_oid += 1;
        let oid = Oid::new(self.next_oid);
        let key = self.arena.alloc(Proxy::new(oid, node, pk.clone(), None));
        self.tree.insert_proxy(&mut self.arena, node, key);
        self.tree.node_mut(node).pk_map.insert(pk, key);
        self.oid_index.insert(oid, key);
        debug!(%oid, "ghost proxy created");
        key
    }

    /// Fill a ghost proxy's payload in place, keeping its identity and
    /// every key already handed out for it.
    pub fn fill_ghost(&mut self, key: ProxyKey, entity: Box<dyn Entity>) -> GraphResult<()> {
        let Some(proxy) = self.arena.proxy(key) else {
            return Err(GraphError::ProxyNotFound(key));
        };
        debug_assert!(proxy.is_ghost(), "fill_ghost expects an unfilled proxy");
        self.arena.put_payload(key, entity);
        Ok(())
    }

    /// Bring a removed object back under its original identity. If a
    /// forward reference already created a ghost for the primary key,
    /// the ghost is filled in place (its oid rebound to the original)
    /// so holders pointing at it stay valid; otherwise a fresh proxy is
    /// registered.
    pub fn restore_object(
        &mut self,
        node: NodeId,
        oid: Oid,
        pk: Identifier,
        entity: Box<dyn Entity>,
    ) -> GraphResult<ProxyKey> {
        if pk.is_set() {
            if let Some(key) = self.tree.node(node).find_by_pk(&pk) {
                let proxy = self
                    .arena
                    .proxy(key)
                    .expect("pk map entries are live");
                if !proxy.is_ghost() {
                    return Err(GraphError::DuplicateIdentifier {
                        type_name: self.tree.node(node).name.clone(),
                        pk,
                    });
                }
                let ghost_oid = proxy.oid;
                self.arena.put_payload(key, entity);
                self.oid_index.remove(&ghost_oid);
                if let Some(proxy) = self.arena.proxy_mut(key) {
                    proxy.oid = oid;
                }
                self.oid_index.insert(oid, key);
                self.next_oid = self.next_oid.max(oid.get());
                debug!(%oid, "ghost filled by restore");
                return Ok(key);
            }
        }
        self.register_restored(entity, node, oid, pk)
    }

    /// Unlink a proxy from its partition, primary-key map, and identity
    /// map, and free its slot. The caller is responsible for having
    /// detached its relations first.
    pub fn unregister(&mut self, key: ProxyKey) -> GraphResult<Proxy> {
        let Some(proxy) = self.arena.proxy(key) else {
            return Err(GraphError::ProxyNotFound(key));
        };
        let (node, oid, pk) = (proxy.node, proxy.oid, proxy.pk.clone());

        self.tree.remove_proxy(&mut self.arena, node, key);
        if pk.is_set() {
            self.tree.node_mut(node).pk_map.remove(&pk);
        }
        self.oid_index.remove(&oid);
        let proxy = self
            .arena
            .free(key)
            .expect("checked live proxy can be freed");
        debug!(%oid, "object unregistered");
        Ok(proxy)
    }

    /// Count one internal holder pointing at `key`.
    pub fn holder_attached(&mut self, key: ProxyKey) {
        if let Some(proxy) = self.arena.proxy_mut(key) {
            proxy.holder_count += 1;
        }
    }

    /// Release one internal holder pointing at `key`. Only bookkeeping
    /// that attached may release.
    pub fn holder_released(&mut self, key: ProxyKey) {
        if let Some(proxy) = self.arena.proxy_mut(key) {
            debug_assert!(proxy.holder_count > 0, "holder count underflow");
            proxy.holder_count -= 1;
        }
    }

    /// Holder count of a live proxy.
    pub fn holder_count(&self, key: ProxyKey) -> Option<i64> {
        self.arena.proxy(key).map(|proxy| proxy.holder_count)
    }
}

impl Default for ObjectGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Capture the primary key of an entity.
pub(crate) fn read_pk(entity: &mut dyn Entity) -> Identifier {
    struct PkRead {
        pk: Identifier,
    }

    impl FieldVisitor for PkRead {
        fn on_primary_key(&mut self, _name: &str, id: &mut Identifier) {
            self.pk = id.clone();
        }
    }

    let mut visitor = PkRead {
        pk: Identifier::Unset,
    };
    entity.accept(&mut visitor);
    visitor.pk
}

/// Assign the primary key of an entity, enforcing kind compatibility.
pub(crate) fn write_pk(entity: &mut dyn Entity, pk: Identifier) -> GraphResult<()> {
    struct PkWrite {
        pk: Identifier,
        error: Option<GraphError>,
    }

    impl FieldVisitor for PkWrite {
        fn on_primary_key(&mut self, _name: &str, id: &mut Identifier) {
            if let Err(error) = id.assign(self.pk.clone()) {
                self.error = Some(error.into());
            }
        }
    }

    let mut visitor = PkWrite { pk, error: None };
    entity.accept(&mut visitor);
    match visitor.error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}
