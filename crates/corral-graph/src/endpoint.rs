use std::any::TypeId;

use tracing::trace;

use corral_entity::{Cascade, FieldVisitor, ManyHolder, RefHolder, RelationKind};
use corral_types::ProxyKey;

use crate::error::GraphResult;
use crate::graph::ObjectGraph;
use crate::node::{EndpointId, NodeId};

/// Per-endpoint guard state.
///
/// A bound endpoint mirrors every mutation into its foreign counterpart;
/// the counterpart mirrors back. The non-idle states make that second
/// mirror a no-op, which is what terminates the ping-pong.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EndpointState {
    Idle,
    InsertInProgress,
    RemoveInProgress,
}

/// One side of a named relation between two prototypes.
///
/// Unbound (`foreign: None`) endpoints degrade to plain local field
/// mutation — the related type may not be attached yet, or the relation
/// is genuinely one-directional.
pub(crate) struct RelationEndpoint {
    pub field: String,
    pub node: NodeId,
    pub kind: RelationKind,
    pub related: TypeId,
    #[allow(dead_code)]
    pub related_name: &'static str,
    pub foreign: Option<EndpointId>,
    pub state: EndpointState,
}

/// Record `owner.field ∋ value` on this endpoint and mirror it into the
/// bound foreign endpoint with the roles swapped.
///
/// Local application is idempotent — an edge that is already present and
/// counted is left alone — so the operation is safe to enter from any
/// direction: holder assignment, the inserter, or a foreign mirror.
pub(crate) fn insert_value(
    graph: &mut ObjectGraph,
    endpoint_id: EndpointId,
    value: ProxyKey,
    owner: ProxyKey,
) -> GraphResult<()> {
    let endpoint = graph.tree.endpoint(endpoint_id);
    if endpoint.state != EndpointState::Idle {
        return Ok(());
    }
    let (kind, field, foreign) = (endpoint.kind, endpoint.field.clone(), endpoint.foreign);
    graph.tree.endpoint_mut(endpoint_id).state = EndpointState::InsertInProgress;

    let changed = apply_insert(graph, kind, &field, foreign, value, owner);
    let mirror = match changed {
        Ok(true) => match foreign {
            Some(foreign_id) => insert_value(graph, foreign_id, owner, value),
            None => Ok(()),
        },
        _ => Ok(()),
    };

    graph.tree.endpoint_mut(endpoint_id).state = EndpointState::Idle;
    changed.map(|_| ()).and(mirror)
}

/// Remove `value` from `owner.field` on this endpoint and mirror the
/// removal into the bound foreign endpoint. Symmetric to
/// [`insert_value`], guarded by [`EndpointState::RemoveInProgress`].
pub(crate) fn remove_value(
    graph: &mut ObjectGraph,
    endpoint_id: EndpointId,
    value: ProxyKey,
    owner: ProxyKey,
) -> GraphResult<()> {
    let endpoint = graph.tree.endpoint(endpoint_id);
    if endpoint.state != EndpointState::Idle {
        return Ok(());
    }
    let (kind, field, foreign) = (endpoint.kind, endpoint.field.clone(), endpoint.foreign);
    graph.tree.endpoint_mut(endpoint_id).state = EndpointState::RemoveInProgress;

    let changed = apply_remove(graph, kind, &field, value, owner);
    let mirror = match changed {
        Ok(true) => match foreign {
            Some(foreign_id) => remove_value(graph, foreign_id, owner, value),
            None => Ok(()),
        },
        _ => Ok(()),
    };

    graph.tree.endpoint_mut(endpoint_id).state = EndpointState::Idle;
    changed.map(|_| ()).and(mirror)
}

/// Apply the local half of an insert. Returns `true` if the edge was
/// newly recorded (and therefore counted).
fn apply_insert(
    graph: &mut ObjectGraph,
    kind: RelationKind,
    field: &str,
    foreign: Option<EndpointId>,
    value: ProxyKey,
    owner: ProxyKey,
) -> GraphResult<bool> {
    // A ghost owner has no fields to mutate; its state arrives with its
    // own row.
    let Some(mut payload) = graph.arena.take_payload(owner) else {
        return Ok(false);
    };

    let changed = match kind {
        RelationKind::BelongsTo | RelationKind::HasOne => {
            let mut visitor = SetField {
                field,
                key: value,
                outcome: SetOutcome::NotFound,
            };
            payload.accept(&mut visitor);
            graph.arena.put_payload(owner, payload);

            match visitor.outcome {
                SetOutcome::NotFound | SetOutcome::Unchanged => false,
                SetOutcome::Set { prior } => {
                    if let Some(prior) = prior {
                        graph.holder_released(prior);
                        // drop the stale mirror half on the old target
                        if let Some(foreign_id) = foreign {
                            remove_value(graph, foreign_id, owner, prior)?;
                        }
                    }
                    graph.holder_attached(value);
                    true
                }
            }
        }
        RelationKind::HasMany => {
            let mut visitor = AppendEntry {
                field,
                key: value,
                outcome: AppendOutcome::NotFound,
            };
            payload.accept(&mut visitor);
            graph.arena.put_payload(owner, payload);

            match visitor.outcome {
                AppendOutcome::NotFound | AppendOutcome::Already => false,
                AppendOutcome::Marked | AppendOutcome::Appended => {
                    graph.holder_attached(value);
                    true
                }
            }
        }
    };

    if changed {
        trace!(field, %value, %owner, "relation value inserted");
    }
    Ok(changed)
}

/// Apply the local half of a removal. Returns `true` if an edge was
/// removed (and therefore released).
fn apply_remove(
    graph: &mut ObjectGraph,
    kind: RelationKind,
    field: &str,
    value: ProxyKey,
    owner: ProxyKey,
) -> GraphResult<bool> {
    let Some(mut payload) = graph.arena.take_payload(owner) else {
        return Ok(false);
    };

    let changed = match kind {
        RelationKind::BelongsTo | RelationKind::HasOne => {
            let mut visitor = ClearField {
                field,
                key: value,
                cleared: false,
            };
            payload.accept(&mut visitor);
            graph.arena.put_payload(owner, payload);
            visitor.cleared
        }
        RelationKind::HasMany => {
            let mut visitor = RemoveEntry {
                field,
                key: value,
                removed: false,
            };
            payload.accept(&mut visitor);
            graph.arena.put_payload(owner, payload);
            visitor.removed
        }
    };

    if changed {
        graph.holder_released(value);
        trace!(field, %value, %owner, "relation value removed");
    }
    Ok(changed)
}

// ---------------------------------------------------------------------------
// Field-targeted visitors
// ---------------------------------------------------------------------------

enum SetOutcome {
    NotFound,
    Unchanged,
    Set { prior: Option<ProxyKey> },
}

/// Attach `key` to the named singular holder.
struct SetField<'a> {
    field: &'a str,
    key: ProxyKey,
    outcome: SetOutcome,
}

impl FieldVisitor for SetField<'_> {
    fn on_belongs_to(&mut self, name: &str, holder: &mut dyn RefHolder, _cascade: Cascade) {
        if name != self.field {
            return;
        }
        if holder.key() == Some(self.key) {
            self.outcome = SetOutcome::Unchanged;
            return;
        }
        let prior = holder.key();
        holder.attach(self.key);
        self.outcome = SetOutcome::Set { prior };
    }

    fn on_has_one(&mut self, name: &str, holder: &mut dyn RefHolder, cascade: Cascade) {
        self.on_belongs_to(name, holder, cascade);
    }
}

/// Clear the named singular holder if it points at `key`.
struct ClearField<'a> {
    field: &'a str,
    key: ProxyKey,
    cleared: bool,
}

impl FieldVisitor for ClearField<'_> {
    fn on_belongs_to(&mut self, name: &str, holder: &mut dyn RefHolder, _cascade: Cascade) {
        if name == self.field && holder.key() == Some(self.key) {
            holder.clear();
            self.cleared = true;
        }
    }

    fn on_has_one(&mut self, name: &str, holder: &mut dyn RefHolder, cascade: Cascade) {
        self.on_belongs_to(name, holder, cascade);
    }
}

enum AppendOutcome {
    NotFound,
    /// An inserted entry for the key already exists.
    Already,
    /// An uncounted entry existed and was marked.
    Marked,
    Appended,
}

/// Ensure the named container carries a counted entry for `key`.
struct AppendEntry<'a> {
    field: &'a str,
    key: ProxyKey,
    outcome: AppendOutcome,
}

impl FieldVisitor for AppendEntry<'_> {
    fn on_has_many(&mut self, name: &str, holder: &mut dyn ManyHolder, _cascade: Cascade) {
        if name != self.field {
            return;
        }
        let mut uncounted = None;
        for at in 0..holder.len() {
            if holder.key_at(at) == Some(self.key) {
                if holder.is_inserted_at(at) {
                    self.outcome = AppendOutcome::Already;
                    return;
                }
                uncounted = Some(at);
            }
        }
        match uncounted {
            Some(at) => {
                holder.mark_inserted_at(at, true);
                self.outcome = AppendOutcome::Marked;
            }
            None => {
                holder.push_attached(self.key, true);
                self.outcome = AppendOutcome::Appended;
            }
        }
    }
}

/// Remove the first entry for `key` from the named container.
struct RemoveEntry<'a> {
    field: &'a str,
    key: ProxyKey,
    removed: bool,
}

impl FieldVisitor for RemoveEntry<'_> {
    fn on_has_many(&mut self, name: &str, holder: &mut dyn ManyHolder, _cascade: Cascade) {
        if name == self.field {
            self.removed = holder.remove_key(self.key);
        }
    }
}
