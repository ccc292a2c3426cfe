//! Domain models for Arbor.
//!
//! # Core Concepts
//!
//! - [`Node`]: a named unit of the content tree with an ordered child list and
//!   ordered, opaque [`ContentItem`]s. Nodes are stored keyed by [`NodeId`];
//!   [`NodeView`] pairs a node with its id for API responses.
//! - [`BackupBundle`]: a full exported copy of the store, importable as a
//!   wholesale replacement.
//!
//! The tree itself lives in [`crate::store::Tree`].

mod backup;
mod node;

pub use backup::*;
pub use node::*;
