//! Identity object model and delta algebra.
//!
//! This crate provides the tree-shaped object model used across the identity
//! platform and the change objects ("deltas") computed against it.
//!
//! # Model
//!
//! - [`path::ItemPath`] - segment paths (`name`, `[id]`, `[*]`) with
//!   equivalence/superpath/subpath comparison
//! - [`value`] - property, reference and container values with real-value
//!   equality
//! - [`item::Item`] - named value sets, and tree navigation by path
//! - [`object::IdentityObject`] - an owned object snapshot
//!
//! # Deltas
//!
//! - [`item_delta::ItemDelta`] - REPLACE xor ADD/DELETE change to one item
//! - [`object_delta::ObjectDelta`] - ADD, MODIFY or DELETE of a whole object,
//!   with `merge`, `summarize`, `union`, `swallow` and `apply_to`
//! - [`diff::diff`] - MODIFY delta between two snapshots
//! - [`triple::DeltaSetTriple`] - plus/zero/minus output of mappings
//!
//! Everything here is synchronous and free of I/O.

pub mod diff;
pub mod error;
pub mod item;
pub mod item_delta;
pub mod object;
pub mod object_delta;
pub mod path;
pub mod triple;
pub mod types;
pub mod value;

// Re-export commonly used types
pub use diff::diff;
pub use error::{DeltaError, Result};
pub use item::{AnyItem, Container, Item, ItemKind, Property, Reference};
pub use item_delta::{
    ContainerDelta, DeltaSet, ItemDelta, PropertyDelta, ReferenceDelta, TypedDelta,
};
pub use object::{names, IdentityObject};
pub use object_delta::{ChangeType, ObjectChange, ObjectDelta};
pub use path::{ItemPath, PathRelation, PathSegment};
pub use triple::DeltaSetTriple;
pub use types::{ObjectType, Oid};
pub use value::{
    ContainerValue, ItemValue, PropertyValue, ProtectedString, RealValue, ReferenceValue,
    ValueMetadata, ValueOrigin,
};
