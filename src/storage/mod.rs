//! Storage adapters.
//!
//! A storage adapter is a sink for block batches. Every adapter applies a batch
//! as one visible unit, remembers the last block it applied and ignores batches
//! at or below it, which makes replays after a restart harmless.

pub mod reactive;
pub mod relational;

use crate::codec::CodecError;
use crate::schema::TableId;
use crate::sync::operations::{BlockBatch, StoreOperation};
use async_trait::async_trait;
use std::sync::Arc;

pub use reactive::{BlockUpdate, ReactiveTableStore, RecordUpdate, TableSubscription, TableUpdate};
pub use relational::{ColumnKind, SqliteIndexer, ViewDefinition};

/// Called before each operation of a batch is applied; an error aborts the batch.
pub type OperationHook = Arc<dyn Fn(&StoreOperation) -> Result<(), StorageError> + Send + Sync>;

#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Apply every operation of `batch` in order, all or nothing.
    async fn apply_block(&self, batch: &BlockBatch) -> Result<(), StorageError>;

    /// Last block this adapter has applied, if any.
    async fn last_applied_block(&self) -> Result<Option<u64>, StorageError>;

    /// Get the name of this adapter for logging and diagnostics.
    fn name(&self) -> &'static str;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Stored schema for table {table} is stale: {reason}")]
    StaleSchema { table: TableId, reason: String },

    #[error("Apply aborted: {0}")]
    Aborted(String),

    #[error("Unknown view: {0}")]
    UnknownView(String),

    #[error("Invalid view: {0}")]
    InvalidView(String),

    #[error("Unknown table: {0}")]
    UnknownTable(TableId),

    #[error("Storage lock poisoned")]
    Poisoned,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
