use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;

use corral_entity::{Entity, EntityShape};
use corral_types::{Identifier, ProxyKey};

/// Index of a prototype node within its tree.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub(crate) const fn new(index: u32) -> Self {
        Self(index)
    }

    pub(crate) const fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// Index of a relation endpoint within the tree's registry.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointId(u32);

impl EndpointId {
    pub(crate) const fn new(index: u32) -> Self {
        Self(index)
    }

    pub(crate) const fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EndpointId({})", self.0)
    }
}

/// One registered type in the prototype hierarchy.
///
/// A node owns a contiguous segment of its hierarchy's proxy list,
/// bounded by three markers:
///
/// - objects of exactly this type live strictly between `op_first` and
///   `op_marker`;
/// - objects of this type *and* every descendant type live strictly
///   between `op_first` and `op_last`.
///
/// `op_first` points at the element *before* the segment, `op_marker` /
/// `op_last` at the first element *after* the respective segment, so an
/// empty node has `next(op_first) == op_marker`. Root nodes own a
/// sentinel pair; child nodes borrow boundary elements of their parent's
/// segment, which is why inserting and removing proxies must re-adjust
/// neighboring markers (see the tree's three-case insert).
pub struct PrototypeNode {
    pub name: String,
    pub type_id: TypeId,
    pub parent: Option<NodeId>,
    /// Children in attach order; their subtree segments follow this
    /// node's own segment in the same order.
    pub children: Vec<NodeId>,
    pub depth: usize,
    /// Number of objects of exactly this type.
    pub(crate) count: usize,
    pub(crate) op_first: ProxyKey,
    pub(crate) op_marker: ProxyKey,
    pub(crate) op_last: ProxyKey,
    /// Sentinel pair owned by root nodes, freed on detach.
    pub(crate) sentinels: Option<(ProxyKey, ProxyKey)>,
    /// Constructor used for rollback restoration and backend loading.
    pub(crate) producer: fn() -> Box<dyn Entity>,
    /// Field layout probed at attach time.
    pub shape: EntityShape,
    /// Primary-key index for objects of exactly this type.
    pub(crate) pk_map: HashMap<Identifier, ProxyKey>,
    /// Relation endpoints owned by this node, keyed by field name.
    pub(crate) endpoints: HashMap<String, EndpointId>,
}

impl PrototypeNode {
    /// Number of objects of exactly this type.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Returns `true` if no object of exactly this type exists.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Returns `true` if child prototypes exist.
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Look up an object of exactly this type by primary key.
    pub fn find_by_pk(&self, pk: &Identifier) -> Option<ProxyKey> {
        self.pk_map.get(pk).copied()
    }

    /// Endpoint registered for a relation field of this node.
    pub fn endpoint(&self, field: &str) -> Option<EndpointId> {
        self.endpoints.get(field).copied()
    }

    /// Fresh instance of this node's type.
    pub fn produce(&self) -> Box<dyn Entity> {
        (self.producer)()
    }
}

impl fmt::Debug for PrototypeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrototypeNode")
            .field("name", &self.name)
            .field("depth", &self.depth)
            .field("count", &self.count)
            .field("children", &self.children.len())
            .field("endpoints", &self.endpoints.len())
            .finish()
    }
}
