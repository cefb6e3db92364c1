//! Store façade for the corral object graph store.
//!
//! This crate is the one applications depend on. It composes the lower
//! layers — entity model, object graph, transaction log — into a single
//! [`Store`] type and defines the [`Backend`] capability that delegates
//! persistence.
//!
//! # Key Types
//!
//! - [`Store`] — attach types, insert/modify/remove objects, run
//!   transactions, load from a backend
//! - [`Backend`] / [`InMemoryBackend`] — the persistence capability and
//!   its embeddable reference implementation
//! - [`StoreError`] — the full error taxonomy of the store surface
//!
//! The commonly used types of the lower crates are re-exported so most
//! applications only import from here.

pub mod backend;
pub mod error;
pub mod store;

pub use backend::{Backend, InMemoryBackend};
pub use error::{StoreError, StoreResult};
pub use store::Store;

// Re-exports from the lower layers for one-stop imports.
pub use corral_entity::{
    AttributeValue, BelongsTo, Cascade, Entity, FieldState, FieldVisitor, Handle, HasMany, HasOne,
    JoinEntity, ManyHolder, RefHolder, RefSnapshot, Snapshot,
};
pub use corral_graph::{GraphError, PrototypeNode};
pub use corral_tx::{TxError, TxId};
pub use corral_types::{Identifier, Oid, ProxyKey, TypeError, Value};
