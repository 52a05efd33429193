//! Snapshot source module for store sync
//!
//! Provides the `SnapshotSource` abstraction and an HTTP client for snapshot indexers that
//! serve already-processed table records, used to skip replaying the full log history.

/// HTTP client for snapshot indexers
pub mod client;
/// Request, response and error types
pub mod types;

pub use client::{HttpSnapshotSource, SnapshotSource};
pub use types::*;
