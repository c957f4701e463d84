//! FileDb: Hierarchical Path-Addressed Object Store
//!
//! A filesystem-like store layered on an atomic key-value transaction
//! backend: node records keyed by absolute path, content blobs keyed by
//! generated identifier, with parent/child referential integrity maintained
//! transactionally.

pub mod config;
pub mod error;
pub mod guid;
pub mod logging;
pub mod node;
pub mod path;
pub mod store;
pub mod task;
