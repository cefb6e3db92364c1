use std::collections::{HashMap, HashSet};

use tracing::debug;

use corral_entity::{Cascade, FieldVisitor, ManyHolder, RefHolder};
use corral_types::{Oid, ProxyKey};

use crate::arena::Proxy;
use crate::endpoint;
use crate::error::{GraphError, GraphResult};
use crate::graph::ObjectGraph;
use crate::node::{EndpointId, NodeId};

/// Checked plan for removing one object and its cascade-owned subgraph.
///
/// Built by [`plan`] (collect + check), consumed by [`execute`]
/// (commit). Between the two the store snapshots every victim for the
/// transaction log; nothing has been mutated yet at that point.
#[derive(Debug)]
pub struct DeletePlan {
    /// Victims in collect order, the delete root first.
    victims: Vec<(Oid, ProxyKey)>,
    /// Relation halves to detach before the victims are unlinked, as
    /// `(endpoint, value, owner)` remove commands.
    removals: Vec<(EndpointId, ProxyKey, ProxyKey)>,
}

impl DeletePlan {
    pub fn victims(&self) -> &[(Oid, ProxyKey)] {
        &self.victims
    }
}

/// Collect the delete set reachable from `root` over delete-cascading
/// fields and check that the whole set is safe to remove.
///
/// Every relation edge adjacent to the set disappears exactly once,
/// releasing both of its halves; the check succeeds iff every member's
/// holder count, adjusted by those releases, reaches zero. Objects that
/// are reachable but not cascade-owned only contribute adjustments —
/// they are never deleted. On failure nothing has been touched.
pub fn plan(graph: &mut ObjectGraph, root: ProxyKey) -> GraphResult<DeletePlan> {
    let Some(proxy) = graph.arena.proxy(root) else {
        return Err(GraphError::ProxyNotFound(root));
    };

    let mut collector = Collector {
        visited: HashMap::new(),
        edges: HashSet::new(),
        members: HashSet::new(),
        victims: vec![(proxy.oid, root)],
        removals: Vec::new(),
    };
    collector.members.insert(root);
    collector
        .visited
        .insert(root, proxy.holder_count);

    let mut queue = vec![root];
    while let Some(key) = queue.pop() {
        let Some(mut payload) = graph.arena.take_payload(key) else {
            continue;
        };
        let node = graph
            .arena
            .proxy(key)
            .expect("delete set member is live")
            .node;

        let mut visitor = DeleteWalker {
            graph: &*graph,
            collector: &mut collector,
            node,
            owner: key,
            pending: Vec::new(),
        };
        payload.accept(&mut visitor);
        let pending = std::mem::take(&mut visitor.pending);
        graph.arena.put_payload(key, payload);

        for target in pending {
            if collector.members.insert(target) {
                let proxy = graph
                    .arena
                    .proxy(target)
                    .expect("cascade target is live");
                collector.victims.push((proxy.oid, target));
                collector
                    .visited
                    .entry(target)
                    .or_insert(proxy.holder_count);
                queue.push(target);
            }
        }
    }

    for &(oid, key) in &collector.victims {
        let remaining = collector.visited[&key];
        if remaining > 0 {
            debug!(%oid, remaining, "delete rejected, object in use");
            return Err(GraphError::ObjectInUse {
                oid,
                holder_count: remaining,
            });
        }
    }

    Ok(DeletePlan {
        victims: collector.victims,
        removals: collector.removals,
    })
}

/// Commit a checked plan: detach every scheduled relation half (the
/// endpoint guards mirror each removal to the surviving side), then
/// unlink and free every victim. Freed proxies are returned so the
/// caller can drop or inspect them.
pub fn execute(graph: &mut ObjectGraph, plan: DeletePlan) -> GraphResult<Vec<Proxy>> {
    for (endpoint_id, value, owner) in plan.removals {
        endpoint::remove_value(graph, endpoint_id, value, owner)?;
    }
    let mut freed = Vec::with_capacity(plan.victims.len());
    for (_, key) in plan.victims {
        freed.push(graph.unregister(key)?);
    }
    Ok(freed)
}

/// Detach and remove a single object without the safety check, used to
/// undo an insert on rollback. The object's own edges are removed
/// through the endpoints (so surviving counterparts are cleaned up),
/// then the proxy is unregistered.
pub fn force_remove(graph: &mut ObjectGraph, key: ProxyKey) -> GraphResult<Proxy> {
    if let Some(mut payload) = graph.arena.take_payload(key) {
        let node = graph
            .arena
            .proxy(key)
            .expect("live proxy while payload is out")
            .node;
        let mut visitor = EdgeLister {
            graph: &*graph,
            node,
            owner: key,
            removals: Vec::new(),
        };
        payload.accept(&mut visitor);
        let removals = std::mem::take(&mut visitor.removals);
        graph.arena.put_payload(key, payload);

        for (endpoint_id, value, owner) in removals {
            endpoint::remove_value(graph, endpoint_id, value, owner)?;
        }
    }
    graph.unregister(key)
}

struct Collector {
    /// Holder-count snapshots adjusted by disappearing edges.
    visited: HashMap<ProxyKey, i64>,
    /// Logical edges already accounted, normalized to the belongs-to
    /// side so the same edge seen from both ends is counted once.
    edges: HashSet<(EndpointId, ProxyKey, ProxyKey)>,
    members: HashSet<ProxyKey>,
    victims: Vec<(Oid, ProxyKey)>,
    removals: Vec<(EndpointId, ProxyKey, ProxyKey)>,
}

struct DeleteWalker<'a> {
    graph: &'a ObjectGraph,
    collector: &'a mut Collector,
    node: NodeId,
    owner: ProxyKey,
    /// Cascade-owned targets found in this frame.
    pending: Vec<ProxyKey>,
}

impl DeleteWalker<'_> {
    fn account_edge(&mut self, field: &str, target: ProxyKey) {
        let Some(endpoint_id) = self.graph.tree.node(self.node).endpoint(field) else {
            return;
        };
        let Some(target_proxy) = self.graph.arena.proxy(target) else {
            return;
        };
        let endpoint = self.graph.tree.endpoint(endpoint_id);
        let foreign = endpoint.foreign;

        let normalized = match endpoint.kind {
            corral_entity::RelationKind::BelongsTo => (endpoint_id, self.owner, target),
            _ => match foreign {
                Some(foreign_id) => (foreign_id, target, self.owner),
                None => (endpoint_id, self.owner, target),
            },
        };
        if !self.collector.edges.insert(normalized) {
            return;
        }

        let target_count = target_proxy.holder_count;
        *self
            .collector
            .visited
            .entry(target)
            .or_insert(target_count) -= 1;
        if foreign.is_some() {
            let owner_count = self
                .graph
                .arena
                .proxy(self.owner)
                .expect("walked owner is live")
                .holder_count;
            *self
                .collector
                .visited
                .entry(self.owner)
                .or_insert(owner_count) -= 1;
        }
        self.collector
            .removals
            .push((endpoint_id, target, self.owner));
    }

    fn handle_singular(&mut self, name: &str, holder: &mut dyn RefHolder, cascade: Cascade) {
        let Some(target) = holder.key() else {
            return;
        };
        self.account_edge(name, target);
        if cascade.deletes() {
            self.pending.push(target);
        }
    }
}

impl FieldVisitor for DeleteWalker<'_> {
    fn on_belongs_to(&mut self, name: &str, holder: &mut dyn RefHolder, cascade: Cascade) {
        self.handle_singular(name, holder, cascade);
    }

    fn on_has_one(&mut self, name: &str, holder: &mut dyn RefHolder, cascade: Cascade) {
        self.handle_singular(name, holder, cascade);
    }

    fn on_has_many(&mut self, name: &str, holder: &mut dyn ManyHolder, cascade: Cascade) {
        for target in holder.keys() {
            self.account_edge(name, target);
            if cascade.deletes() {
                self.pending.push(target);
            }
        }
    }
}

/// Lists the remove commands for every attached edge of one object.
struct EdgeLister<'a> {
    graph: &'a ObjectGraph,
    node: NodeId,
    owner: ProxyKey,
    removals: Vec<(EndpointId, ProxyKey, ProxyKey)>,
}

impl EdgeLister<'_> {
    fn push(&mut self, field: &str, target: ProxyKey) {
        if let Some(endpoint_id) = self.graph.tree.node(self.node).endpoint(field) {
            self.removals.push((endpoint_id, target, self.owner));
        }
    }
}

impl FieldVisitor for EdgeLister<'_> {
    fn on_belongs_to(&mut self, name: &str, holder: &mut dyn RefHolder, _cascade: Cascade) {
        if let Some(target) = holder.key() {
            self.push(name, target);
        }
    }

    fn on_has_one(&mut self, name: &str, holder: &mut dyn RefHolder, _cascade: Cascade) {
        if let Some(target) = holder.key() {
            self.push(name, target);
        }
    }

    fn on_has_many(&mut self, name: &str, holder: &mut dyn ManyHolder, _cascade: Cascade) {
        for target in holder.keys() {
            self.push(name, target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inserter;
    use crate::test_entities::{
        album_track_graph, employee_badge_graph, Album, Badge, Employee, Track,
    };
    use corral_entity::HasOne;

    fn album_with_tracks(graph: &mut ObjectGraph, count: usize) -> inserter::InsertReport {
        let mut album = Album::default();
        for n in 0..count {
            album.tracks.push(Track {
                title: format!("track-{n}"),
                ..Track::default()
            });
        }
        inserter::insert(graph, Box::new(album)).unwrap()
    }

    #[test]
    fn cascade_delete_removes_subgraph() {
        let mut graph = album_track_graph();
        let report = album_with_tracks(&mut graph, 2);

        let plan = plan(&mut graph, report.root).unwrap();
        assert_eq!(plan.victims().len(), 3);

        let freed = execute(&mut graph, plan).unwrap();
        assert_eq!(freed.len(), 3);
        assert!(graph.is_empty());
    }

    #[test]
    fn delete_member_cleans_container() {
        let mut graph = album_track_graph();
        let report = album_with_tracks(&mut graph, 2);
        let (_, victim) = report.created[1];

        let delete = plan(&mut graph, victim).unwrap();
        assert_eq!(delete.victims().len(), 1);
        execute(&mut graph, delete).unwrap();

        assert_eq!(graph.len(), 2);
        let album = graph
            .arena
            .proxy(report.root)
            .unwrap()
            .payload()
            .unwrap()
            .downcast_ref::<Album>()
            .unwrap();
        assert_eq!(album.tracks.len(), 1);
        assert_eq!(graph.holder_count(report.root), Some(1));
    }

    #[test]
    fn referenced_object_is_in_use() {
        let mut graph = employee_badge_graph();
        let employee = Employee {
            badge: HasOne::with(Badge::default()),
            ..Employee::default()
        };
        let report = inserter::insert(&mut graph, Box::new(employee)).unwrap();
        let badge_key = report.created[1].1;

        // the badge has no back-reference, so its holder is invisible
        // from its own fields and the delete must be refused
        let err = plan(&mut graph, badge_key).unwrap_err();
        assert!(matches!(err, GraphError::ObjectInUse { .. }));

        // nothing was mutated
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.holder_count(badge_key), Some(1));
    }

    #[test]
    fn cascade_reaches_one_directional_references() {
        let mut graph = employee_badge_graph();
        let employee = Employee {
            badge: HasOne::with(Badge::default()),
            ..Employee::default()
        };
        let report = inserter::insert(&mut graph, Box::new(employee)).unwrap();

        let delete = plan(&mut graph, report.root).unwrap();
        assert_eq!(delete.victims().len(), 2);
        execute(&mut graph, delete).unwrap();
        assert!(graph.is_empty());
    }

    #[test]
    fn delete_missing_proxy_fails() {
        let mut graph = album_track_graph();
        let report = album_with_tracks(&mut graph, 0);
        let key = report.root;
        let delete = plan(&mut graph, key).unwrap();
        execute(&mut graph, delete).unwrap();

        let err = plan(&mut graph, key).unwrap_err();
        assert!(matches!(err, GraphError::ProxyNotFound(_)));
    }

    #[test]
    fn force_remove_cleans_surviving_side() {
        let mut graph = album_track_graph();
        let report = album_with_tracks(&mut graph, 1);
        let (_, track_key) = report.created[1];

        force_remove(&mut graph, track_key).unwrap();

        assert_eq!(graph.len(), 1);
        let album = graph
            .arena
            .proxy(report.root)
            .unwrap()
            .payload()
            .unwrap()
            .downcast_ref::<Album>()
            .unwrap();
        assert!(album.tracks.is_empty());
        assert_eq!(graph.holder_count(report.root), Some(0));
    }
}
