//! Foundation types for the corral object graph store.
//!
//! This crate provides the small copyable value types shared by every
//! other corral crate. Every other corral crate depends on `corral-types`.
//!
//! # Key Types
//!
//! - [`Oid`] — store-assigned object sequence number
//! - [`ProxyKey`] — generational arena key addressing one object proxy
//! - [`Identifier`] — primary-key value (integral or text)
//! - [`Value`] — typed attribute value used by field snapshots
//! - [`TypeError`] — identifier/value kind mismatches

pub mod error;
pub mod identifier;
pub mod key;
pub mod value;

pub use error::TypeError;
pub use identifier::{Identifier, IdentifierKind};
pub use key::{Oid, ProxyKey};
pub use value::Value;
