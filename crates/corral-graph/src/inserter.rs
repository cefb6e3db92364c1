use std::collections::HashSet;

use corral_entity::{Cascade, Entity, FieldVisitor, ManyHolder, RefHolder};
use corral_types::{Oid, ProxyKey};

use crate::endpoint;
use crate::error::{GraphError, GraphResult};
use crate::graph::ObjectGraph;
use crate::node::NodeId;

/// Everything one top-level insert created, in registration order (the
/// root object first). The transaction log and the backend consume this.
#[derive(Debug)]
pub struct InsertReport {
    pub root: ProxyKey,
    pub created: Vec<(Oid, ProxyKey)>,
}

/// Insert an object graph rooted at `entity`.
///
/// Depth-first: every detached related object reachable over an
/// insert-cascading field is registered before its holder is attached,
/// and every attached edge is counted once and mirrored into the bound
/// foreign endpoint — which is how `track.album` comes to point back at
/// the album whose container listed the track.
///
/// Atomic at the graph level: if any part of the cascade fails, every
/// registration this call made is removed again before the error
/// surfaces.
pub fn insert(graph: &mut ObjectGraph, entity: Box<dyn Entity>) -> GraphResult<InsertReport> {
    let mut report = InsertReport {
        // placeholder until the root is registered
        root: ProxyKey::new(u32::MAX, u32::MAX),
        created: Vec::new(),
    };
    let mut seen = HashSet::new();
    match insert_inner(graph, entity, &mut report, &mut seen) {
        Ok(root) => {
            report.root = root;
            Ok(report)
        }
        Err(error) => {
            for &(_, key) in report.created.iter().rev() {
                let _ = crate::deleter::force_remove(graph, key);
            }
            Err(error)
        }
    }
}

/// Walk an already-registered proxy the same way [`insert`] walks a new
/// one: count and mirror every attached edge. Used when a deleted object
/// is restored with its backed-up relations.
pub fn rewire(graph: &mut ObjectGraph, key: ProxyKey) -> GraphResult<()> {
    let mut report = InsertReport {
        root: key,
        created: Vec::new(),
    };
    let mut seen = HashSet::new();
    walk(graph, key, &mut report, &mut seen)
}

fn insert_inner(
    graph: &mut ObjectGraph,
    entity: Box<dyn Entity>,
    report: &mut InsertReport,
    seen: &mut HashSet<ProxyKey>,
) -> GraphResult<ProxyKey> {
    let key = graph.register(entity)?;
    let oid = graph
        .arena
        .proxy(key)
        .expect("freshly registered proxy is live")
        .oid;
    report.created.push((oid, key));
    walk(graph, key, report, seen)?;
    Ok(key)
}

fn walk(
    graph: &mut ObjectGraph,
    key: ProxyKey,
    report: &mut InsertReport,
    seen: &mut HashSet<ProxyKey>,
) -> GraphResult<()> {
    if !seen.insert(key) {
        return Ok(());
    }
    let Some(proxy) = graph.arena.proxy(key) else {
        return Err(GraphError::ProxyNotFound(key));
    };
    let node = proxy.node;
    let Some(mut payload) = graph.arena.take_payload(key) else {
        // ghosts carry no fields to walk
        return Ok(());
    };

    let mut visitor = InserterVisitor {
        graph: &mut *graph,
        report: &mut *report,
        seen: &mut *seen,
        owner: key,
        node,
        error: None,
    };
    payload.accept(&mut visitor);
    let error = visitor.error.take();

    graph.arena.put_payload(key, payload);
    match error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

/// The visitor frame of one owner; recursion through
/// [`insert_inner`] is the owner stack, so nested inserts always know
/// their immediate owner.
struct InserterVisitor<'a> {
    graph: &'a mut ObjectGraph,
    report: &'a mut InsertReport,
    seen: &'a mut HashSet<ProxyKey>,
    owner: ProxyKey,
    node: NodeId,
    error: Option<GraphError>,
}

impl InserterVisitor<'_> {
    /// Foreign endpoint bound for the named relation field, if any.
    fn foreign_endpoint(&self, field: &str) -> Option<crate::node::EndpointId> {
        let endpoint = self.graph.tree.node(self.node).endpoint(field)?;
        self.graph.tree.endpoint(endpoint).foreign
    }

    fn handle_singular(&mut self, name: &str, holder: &mut dyn RefHolder, cascade: Cascade) {
        if self.error.is_some() {
            return;
        }
        if holder.has_detached() {
            if !cascade.inserts() {
                return;
            }
            let value = holder
                .take_detached()
                .expect("checked detached holder yields a value");
            match insert_inner(self.graph, value, self.report, self.seen) {
                Ok(key) => holder.attach(key),
                Err(error) => {
                    self.error = Some(error);
                    return;
                }
            }
        }
        let Some(target) = holder.key() else {
            return;
        };
        self.graph.holder_attached(target);
        if let Some(foreign) = self.foreign_endpoint(name) {
            if let Err(error) = endpoint::insert_value(self.graph, foreign, self.owner, target) {
                self.error = Some(error);
            }
        }
    }
}

impl FieldVisitor for InserterVisitor<'_> {
    fn on_belongs_to(&mut self, name: &str, holder: &mut dyn RefHolder, cascade: Cascade) {
        self.handle_singular(name, holder, cascade);
    }

    fn on_has_one(&mut self, name: &str, holder: &mut dyn RefHolder, cascade: Cascade) {
        self.handle_singular(name, holder, cascade);
    }

    fn on_has_many(&mut self, name: &str, holder: &mut dyn ManyHolder, cascade: Cascade) {
        if self.error.is_some() {
            return;
        }
        let foreign = self.foreign_endpoint(name);
        for at in 0..holder.len() {
            if holder.has_detached_at(at) {
                if !cascade.inserts() {
                    continue;
                }
                let value = holder
                    .take_detached_at(at)
                    .expect("checked detached entry yields a value");
                match insert_inner(self.graph, value, self.report, self.seen) {
                    Ok(key) => holder.attach_at(at, key),
                    Err(error) => {
                        self.error = Some(error);
                        return;
                    }
                }
            }
            let Some(target) = holder.key_at(at) else {
                continue;
            };
            if holder.is_inserted_at(at) {
                continue;
            }
            holder.mark_inserted_at(at, true);
            self.graph.holder_attached(target);
            if let Some(foreign) = foreign {
                if let Err(error) = endpoint::insert_value(self.graph, foreign, self.owner, target)
                {
                    self.error = Some(error);
                    return;
                }
            }
        }
    }
}
