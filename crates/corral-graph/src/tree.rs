use std::any::TypeId;
use std::collections::HashMap;

use tracing::debug;

use corral_entity::{Entity, EntityShape, RelationKind};
use corral_types::ProxyKey;

use crate::arena::{Proxy, ProxyArena};
use crate::endpoint::{EndpointState, RelationEndpoint};
use crate::error::{GraphError, GraphResult};
use crate::node::{EndpointId, NodeId, PrototypeNode};

/// Registry of attached types arranged as an inheritance hierarchy.
///
/// Each root node owns one proxy list (a sentinel pair in the arena);
/// descendant nodes partition that list into nested segments via the
/// three markers described on [`PrototypeNode`]. All segment updates go
/// through [`insert_proxy`](Self::insert_proxy) /
/// [`remove_proxy`](Self::remove_proxy), which keep every neighbor's
/// markers consistent — a marker bug here corrupts iteration everywhere,
/// so the invariants are enforced by the property tests below rather
/// than runtime checks on the hot path.
pub struct PrototypeTree {
    nodes: Vec<Option<PrototypeNode>>,
    node_free: Vec<u32>,
    roots: Vec<NodeId>,
    by_name: HashMap<String, NodeId>,
    by_type: HashMap<TypeId, NodeId>,
    endpoints: Vec<Option<RelationEndpoint>>,
    endpoint_free: Vec<u32>,
}

impl PrototypeTree {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            node_free: Vec::new(),
            roots: Vec::new(),
            by_name: HashMap::new(),
            by_type: HashMap::new(),
            endpoints: Vec::new(),
            endpoint_free: Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Node access
    // -----------------------------------------------------------------------

    /// Borrow a node. The id must be live; ids are internal and only
    /// produced by this tree.
    pub fn node(&self, id: NodeId) -> &PrototypeNode {
        self.nodes[id.index()]
            .as_ref()
            .expect("prototype node id must be live")
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut PrototypeNode {
        self.nodes[id.index()]
            .as_mut()
            .expect("prototype node id must be live")
    }

    /// Find a node by its registered name.
    pub fn find_by_name(&self, name: &str) -> Option<NodeId> {
        self.by_name.get(name).copied()
    }

    /// Find a node by the `TypeId` of its Rust type.
    pub fn find_by_type(&self, type_id: TypeId) -> Option<NodeId> {
        self.by_type.get(&type_id).copied()
    }

    /// Root nodes in attach order.
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Borrow an endpoint.
    pub(crate) fn endpoint(&self, id: EndpointId) -> &RelationEndpoint {
        self.endpoints[id.index()]
            .as_ref()
            .expect("endpoint id must be live")
    }

    pub(crate) fn endpoint_mut(&mut self, id: EndpointId) -> &mut RelationEndpoint {
        self.endpoints[id.index()]
            .as_mut()
            .expect("endpoint id must be live")
    }

    // -----------------------------------------------------------------------
    // Attach / detach
    // -----------------------------------------------------------------------

    /// Register a type, optionally as a child of an attached parent.
    ///
    /// Fails with [`GraphError::DuplicateType`] if the name or the
    /// `TypeId` is already registered. Relation endpoints for the probed
    /// shape are created immediately and bound lazily: a pair binds the
    /// first time both related types are attached.
    pub fn attach(
        &mut self,
        arena: &mut ProxyArena,
        name: &str,
        type_id: TypeId,
        producer: fn() -> Box<dyn Entity>,
        shape: EntityShape,
        parent: Option<NodeId>,
    ) -> GraphResult<NodeId> {
        if self.by_name.contains_key(name) || self.by_type.contains_key(&type_id) {
            return Err(GraphError::DuplicateType(name.to_string()));
        }

        let (depth, op_first, op_marker, op_last, sentinels) = match parent {
            None => {
                let head = arena.alloc_sentinel();
                let tail = arena.alloc_sentinel();
                arena.link_pair(head, tail);
                (0, head, tail, tail, Some((head, tail)))
            }
            Some(parent_id) => {
                let parent_node = self.node(parent_id);
                let subtree_empty =
                    arena.next(parent_node.op_first) == Some(parent_node.op_last);
                let op_first = if subtree_empty {
                    parent_node.op_first
                } else {
                    arena
                        .prev(parent_node.op_last)
                        .expect("non-empty subtree has a last element")
                };
                (
                    parent_node.depth + 1,
                    op_first,
                    parent_node.op_last,
                    parent_node.op_last,
                    None,
                )
            }
        };

        let node = PrototypeNode {
            name: name.to_string(),
            type_id,
            parent,
            children: Vec::new(),
            depth,
            count: 0,
            op_first,
            op_marker,
            op_last,
            sentinels,
            producer,
            shape,
            pk_map: HashMap::new(),
            endpoints: HashMap::new(),
        };

        let id = match self.node_free.pop() {
            Some(index) => {
                self.nodes[index as usize] = Some(node);
                NodeId::new(index)
            }
            None => {
                let index = self.nodes.len() as u32;
                self.nodes.push(Some(node));
                NodeId::new(index)
            }
        };

        match parent {
            Some(parent_id) => self.node_mut(parent_id).children.push(id),
            None => self.roots.push(id),
        }
        self.by_name.insert(name.to_string(), id);
        self.by_type.insert(type_id, id);

        self.register_endpoints(id);
        debug!(name, depth, "prototype attached");
        Ok(id)
    }

    /// Remove a type (and, with `recursive`, its descendants) together
    /// with all of their objects. Returns the freed proxies so the
    /// caller can clean its identity map.
    pub fn detach(
        &mut self,
        arena: &mut ProxyArena,
        id: NodeId,
        recursive: bool,
    ) -> GraphResult<Vec<Proxy>> {
        if self.node(id).has_children() && !recursive {
            return Err(GraphError::TypeInUse(self.node(id).name.clone()));
        }
        let mut freed = Vec::new();
        self.detach_inner(arena, id, &mut freed);
        Ok(freed)
    }

    fn detach_inner(&mut self, arena: &mut ProxyArena, id: NodeId, freed: &mut Vec<Proxy>) {
        let children = self.node(id).children.clone();
        for child in children {
            self.detach_inner(arena, child, freed);
        }

        freed.extend(self.clear_objects(arena, id));

        let endpoint_ids: Vec<EndpointId> = self.node(id).endpoints.values().copied().collect();
        for endpoint_id in endpoint_ids {
            self.unregister_endpoint(endpoint_id);
        }

        let node = self.nodes[id.index()]
            .take()
            .expect("prototype node id must be live");
        match node.parent {
            Some(parent_id) => {
                let parent = self.node_mut(parent_id);
                parent.children.retain(|&child| child != id);
            }
            None => self.roots.retain(|&root| root != id),
        }
        if let Some((head, tail)) = node.sentinels {
            arena.unlink(head);
            arena.unlink(tail);
            arena.free(head);
            arena.free(tail);
        }
        self.by_name.remove(&node.name);
        self.by_type.remove(&node.type_id);
        self.node_free.push(id.index() as u32);
        debug!(name = %node.name, "prototype detached");
    }

    /// Unlink and free every object of exactly this type, adjusting the
    /// neighboring markers once for the whole segment.
    pub(crate) fn clear_objects(&mut self, arena: &mut ProxyArena, id: NodeId) -> Vec<Proxy> {
        let mut freed = Vec::new();
        let node = self.node(id);
        let (op_first, op_marker) = (node.op_first, node.op_marker);
        let first_own = arena.next(op_first).expect("segment is linked");
        if first_own != op_marker {
            let last_own = arena.prev(op_marker).expect("segment is linked");
            self.adjust_left_marker(id, first_own, op_marker);
            self.adjust_right_marker(id, last_own, op_first);

            let mut cursor = first_own;
            while cursor != op_marker {
                let next = arena.next(cursor).expect("segment is linked");
                arena.unlink(cursor);
                if let Some(proxy) = arena.free(cursor) {
                    freed.push(proxy);
                }
                cursor = next;
            }
            let node = self.node_mut(id);
            node.count = 0;
            node.pk_map.clear();
        }
        freed
    }

    // -----------------------------------------------------------------------
    // Proxy partition maintenance
    // -----------------------------------------------------------------------

    /// Link a freshly allocated proxy into the node's own segment.
    ///
    /// Three cases keep every neighbor's markers valid:
    ///
    /// - two or more own objects: the new proxy goes strictly inside the
    ///   segment (before its last element), where no other node's marker
    ///   can point;
    /// - exactly one: it becomes the new first element, and every
    ///   predecessor whose `op_marker`/`op_last` pointed at the old
    ///   first element is retargeted;
    /// - empty segment: it is linked at the bare `op_first`/`op_marker`
    ///   boundary, which can coincide with empty neighbor segments on
    ///   both sides, so both the left and the right marker chains are
    ///   adjusted.
    pub fn insert_proxy(&mut self, arena: &mut ProxyArena, id: NodeId, key: ProxyKey) {
        let node = self.node(id);
        let (count, op_first, op_marker) = (node.count, node.op_first, node.op_marker);

        if count >= 2 {
            let last_own = arena.prev(op_marker).expect("segment is linked");
            arena.link_before(key, last_own);
        } else if count == 1 {
            let first_own = arena.next(op_first).expect("segment is linked");
            arena.link_before(key, first_own);
            self.adjust_left_marker(id, first_own, key);
        } else {
            arena.link_before(key, op_marker);
            let old_prev = arena.prev(key).expect("linked proxy has a predecessor");
            self.adjust_left_marker(id, op_marker, key);
            self.adjust_right_marker(id, old_prev, key);
        }

        self.node_mut(id).count += 1;
    }

    /// Unlink a proxy from the node's own segment, symmetric to
    /// [`insert_proxy`](Self::insert_proxy): boundary elements drag the
    /// marker chains along before the intrusive unlink.
    pub fn remove_proxy(&mut self, arena: &mut ProxyArena, id: NodeId, key: ProxyKey) {
        let node = self.node(id);
        let (op_first, op_marker) = (node.op_first, node.op_marker);

        if arena.next(op_first) == Some(key) {
            let successor = arena.next(key).expect("segment is linked");
            self.adjust_left_marker(id, key, successor);
        }
        if arena.prev(op_marker) == Some(key) {
            let predecessor = arena.prev(key).expect("segment is linked");
            self.adjust_right_marker(id, key, predecessor);
        }

        arena.unlink(key);
        self.node_mut(id).count -= 1;
    }

    /// Retarget `op_marker` (and `op_last` for nodes at the same or a
    /// greater depth) on every predecessor node that pointed at `old`.
    /// Ancestor `op_last` markers stay put: the mutation happened inside
    /// their subtree segment.
    fn adjust_left_marker(&mut self, start: NodeId, old: ProxyKey, new: ProxyKey) {
        let start_depth = self.node(start).depth;
        let mut cursor = self.previous_node(start);
        while let Some(id) = cursor {
            let node = self.node_mut(id);
            if node.op_marker == old {
                node.op_marker = new;
            }
            let depth = node.depth;
            if depth >= start_depth && node.op_last == old {
                node.op_last = new;
            }
            cursor = self.previous_node(id);
        }
    }

    /// Retarget `op_first` on every successor node anchored at `old`.
    fn adjust_right_marker(&mut self, start: NodeId, old: ProxyKey, new: ProxyKey) {
        let mut cursor = self.next_node(start);
        while let Some(id) = cursor {
            let node = self.node_mut(id);
            if node.op_first == old {
                node.op_first = new;
            }
            cursor = self.next_node(id);
        }
    }

    // -----------------------------------------------------------------------
    // Prototype-order traversal
    // -----------------------------------------------------------------------

    /// Next node in prototype order: first child, else next sibling,
    /// else the next sibling of the closest ancestor that has one.
    pub fn next_node(&self, id: NodeId) -> Option<NodeId> {
        let node = self.node(id);
        if let Some(&child) = node.children.first() {
            return Some(child);
        }
        let mut cursor = id;
        loop {
            let parent_id = self.node(cursor).parent?;
            let siblings = &self.node(parent_id).children;
            let at = siblings
                .iter()
                .position(|&sibling| sibling == cursor)
                .expect("node is listed among its parent's children");
            if at + 1 < siblings.len() {
                return Some(siblings[at + 1]);
            }
            cursor = parent_id;
        }
    }

    /// Previous node in prototype order: the deepest last descendant of
    /// the previous sibling, else the parent.
    pub fn previous_node(&self, id: NodeId) -> Option<NodeId> {
        let parent_id = self.node(id).parent?;
        let siblings = &self.node(parent_id).children;
        let at = siblings
            .iter()
            .position(|&sibling| sibling == id)
            .expect("node is listed among its parent's children");
        if at == 0 {
            return Some(parent_id);
        }
        let mut cursor = siblings[at - 1];
        while let Some(&last) = self.node(cursor).children.last() {
            cursor = last;
        }
        Some(cursor)
    }

    // -----------------------------------------------------------------------
    // Segment iteration
    // -----------------------------------------------------------------------

    /// Keys of objects of exactly this type, in segment order.
    pub fn own_keys(&self, arena: &ProxyArena, id: NodeId) -> Vec<ProxyKey> {
        let node = self.node(id);
        self.segment_keys(arena, node.op_first, node.op_marker)
    }

    /// Keys of objects of this type and all descendant types, in
    /// segment order.
    pub fn subtree_keys(&self, arena: &ProxyArena, id: NodeId) -> Vec<ProxyKey> {
        let node = self.node(id);
        self.segment_keys(arena, node.op_first, node.op_last)
    }

    fn segment_keys(&self, arena: &ProxyArena, from: ProxyKey, until: ProxyKey) -> Vec<ProxyKey> {
        let mut keys = Vec::new();
        let mut cursor = arena.next(from);
        while let Some(key) = cursor {
            if key == until {
                break;
            }
            keys.push(key);
            cursor = arena.next(key);
        }
        keys
    }

    /// Objects of this type and all descendant types, counted via the
    /// per-node counters rather than a list walk.
    pub fn subtree_count(&self, id: NodeId) -> usize {
        let node = self.node(id);
        node.count
            + node
                .children
                .iter()
                .map(|&child| self.subtree_count(child))
                .sum::<usize>()
    }

    // -----------------------------------------------------------------------
    // Relation endpoints
    // -----------------------------------------------------------------------

    /// Create endpoints for every relation field of a freshly attached
    /// node and bind any pair whose other side is already attached.
    fn register_endpoints(&mut self, id: NodeId) {
        let relations = self.node(id).shape.relations.clone();
        let this_type = self.node(id).type_id;
        for relation in relations {
            let endpoint = RelationEndpoint {
                field: relation.name.clone(),
                node: id,
                kind: relation.kind,
                related: relation.target,
                related_name: relation.target_name,
                foreign: None,
                state: EndpointState::Idle,
            };
            let endpoint_id = match self.endpoint_free.pop() {
                Some(index) => {
                    self.endpoints[index as usize] = Some(endpoint);
                    EndpointId::new(index)
                }
                None => {
                    let index = self.endpoints.len() as u32;
                    self.endpoints.push(Some(endpoint));
                    EndpointId::new(index)
                }
            };
            self.node_mut(id)
                .endpoints
                .insert(relation.name.clone(), endpoint_id);

            if let Some(target_node) = self.by_type.get(&relation.target).copied() {
                self.try_bind(endpoint_id, this_type, relation.kind, target_node);
            }
        }
    }

    /// Bind `endpoint_id` to the first unbound counterpart on
    /// `target_node` pointing back at `this_type` with a complementary
    /// kind. No counterpart is fine: the relation stays one-directional
    /// until (and unless) the other side attaches one.
    fn try_bind(
        &mut self,
        endpoint_id: EndpointId,
        this_type: TypeId,
        kind: RelationKind,
        target_node: NodeId,
    ) {
        let candidates: Vec<EndpointId> =
            self.node(target_node).endpoints.values().copied().collect();
        for candidate_id in candidates {
            let candidate = self.endpoint(candidate_id);
            if candidate.foreign.is_none()
                && candidate.related == this_type
                && kinds_complement(kind, candidate.kind)
            {
                self.endpoint_mut(endpoint_id).foreign = Some(candidate_id);
                self.endpoint_mut(candidate_id).foreign = Some(endpoint_id);
                debug!(
                    field = %self.endpoint(endpoint_id).field,
                    foreign = %self.endpoint(candidate_id).field,
                    "relation endpoints bound"
                );
                return;
            }
        }
    }

    fn unregister_endpoint(&mut self, id: EndpointId) {
        let endpoint = self.endpoints[id.index()]
            .take()
            .expect("endpoint id must be live");
        if let Some(foreign) = endpoint.foreign {
            if let Some(other) = self.endpoints[foreign.index()].as_mut() {
                other.foreign = None;
            }
        }
        self.endpoint_free.push(id.index() as u32);
    }
}

/// A belongs-to faces a has-many or has-one; never its own kind.
fn kinds_complement(a: RelationKind, b: RelationKind) -> bool {
    matches!(
        (a, b),
        (RelationKind::BelongsTo, RelationKind::HasMany)
            | (RelationKind::BelongsTo, RelationKind::HasOne)
            | (RelationKind::HasMany, RelationKind::BelongsTo)
            | (RelationKind::HasOne, RelationKind::BelongsTo)
    )
}

impl Default for PrototypeTree {
    fn default() -> Self {
        Self::new()
    }
}
