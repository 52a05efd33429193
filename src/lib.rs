//! Synchronizes the tables of an on-chain key-value store into local storage.
//!
//! A [`SyncSession`] reads the store's event log from a ledger (optionally seeded by a snapshot
//! indexer), decodes each event into a typed operation against its table schema, and applies the
//! operations block by block to one or more [`StorageAdapter`]s: an in-memory
//! [`ReactiveTableStore`] with change subscriptions and a SQLite-backed [`SqliteIndexer`].

pub mod codec;
pub mod config;
pub mod error;
pub mod ledger;
pub mod schema;
pub mod snapshot;
pub mod storage;
pub mod sync;
pub mod utils;

#[cfg(test)]
mod mock;

pub use config::{AppConfig, LiveConfig, RetryConfig, SessionConfig};
pub use error::SyncError;
pub use storage::{ReactiveTableStore, SqliteIndexer, StorageAdapter, StorageError, ViewDefinition};
pub use sync::{SyncEvent, SyncEventHandler, SyncProgress, SyncSession, SyncStep, SyncSummary};
