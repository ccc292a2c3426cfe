//! Arbor keeps an editable tree of named, content-bearing nodes on local
//! storage and mirrors it to a durable remote record.
//!
//! The local disk is assumed to be volatile: the hosting environment may wipe
//! it at any time. A background [`sync::Reconciler`] pushes every new version
//! of the local artifact to the remote store and restores it when the local
//! copy disappears.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod history;
pub mod models;
pub mod persist;
pub mod render;
pub mod service;
pub mod store;
pub mod sync;

pub use error::{Error, Result};
