//! Entity model for the corral object graph store.
//!
//! This crate defines the contract between application types and the
//! store: an entity exposes its fields to a [`FieldVisitor`] exactly once
//! per visitation, and everything else — relation discovery at attach
//! time, cascade traversal, transaction backups, restore after rollback —
//! is built from that single capability.
//!
//! # Key Types
//!
//! - [`Entity`] — object-safe trait implemented by every stored type
//! - [`FieldVisitor`] — the serializer capability consumed by the store
//! - [`BelongsTo`] / [`HasOne`] / [`HasMany`] — relation holder fields
//! - [`Handle`] — plain typed owning key handed to the caller
//! - [`Cascade`] — per-field insert/delete propagation policy
//! - [`EntityShape`] / [`probe_shape`] — attach-time field discovery
//! - [`Snapshot`] — captured field state for backup/restore

pub mod cascade;
pub mod entity;
pub mod holder;
pub mod join;
pub mod probe;
pub mod snapshot;
pub mod visitor;

pub use cascade::Cascade;
pub use entity::Entity;
pub use holder::{BelongsTo, Handle, HasMany, HasOne, ManyHolder, RefHolder};
pub use join::JoinEntity;
pub use probe::{probe_shape, EntityShape, RelationField, RelationKind};
pub use snapshot::{FieldState, RefSnapshot, Snapshot, SnapshotReader, SnapshotWriter};
pub use visitor::{AttributeValue, FieldVisitor};
