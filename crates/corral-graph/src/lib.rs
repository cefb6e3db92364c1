//! Object graph core for corral.
//!
//! This crate owns the live state of a store: the proxy arena, the
//! prototype tree with its partitioned proxy list, the bidirectional
//! relation endpoints, and the cascade algorithms that walk relation
//! fields on insert and delete.
//!
//! # Key Types
//!
//! - [`ObjectGraph`] — arena + tree + identity map, the single mutation
//!   funnel
//! - [`ProxyArena`] / [`Proxy`] — generational slots, intrusive list
//! - [`PrototypeTree`] / [`PrototypeNode`] — type hierarchy partitioning
//!   the proxy list into nested own/subtree segments
//! - [`inserter`] / [`deleter`] — relation-graph traversal for cascade
//!   insert and checked cascade delete
//!
//! Mutation is single-threaded by design: callers serialize access, and
//! no operation here blocks, so every multi-step update (marker
//! adjustment, endpoint mirroring, count bookkeeping) completes before
//! another can observe it.

pub mod arena;
pub mod deleter;
pub(crate) mod endpoint;
pub mod error;
pub mod graph;
pub mod inserter;
pub mod node;
#[cfg(test)]
mod test_entities;
pub mod tree;

pub use arena::{Proxy, ProxyArena};
pub use deleter::DeletePlan;
pub use error::{GraphError, GraphResult};
pub use graph::ObjectGraph;
pub use inserter::InsertReport;
pub use node::{EndpointId, NodeId, PrototypeNode};
pub use tree::PrototypeTree;
