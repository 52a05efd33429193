//! Store synchronization.
//!
//! Producers fetch block ranges (snapshot, chunked history, live heads), the batcher turns their
//! logs into per-block batches of typed operations, the merge stage orders and deduplicates them,
//! and the session applies each batch to every storage adapter while tracking progress.

pub mod batcher;
pub mod decoder;
pub mod events;
pub mod merge;
pub mod operations;
pub mod orchestrator;
pub mod progress_tracker;
pub mod retry;
pub mod strategies;

pub use batcher::{DecodedBlock, DropReason, DroppedOperation, OperationBatcher};
pub use decoder::{DecodeCause, DecodeError, StoreLog, decode_log, decode_store_log};
pub use events::{EventDispatcher, ProgressCallback, SyncEvent, SyncEventHandler};
pub use merge::MergeStage;
pub use operations::{BlockBatch, KeyTuple, OperationKind, Record, RecordValues, StoreOperation};
pub use orchestrator::{SyncSession, SyncSummary};
pub use progress_tracker::{SyncProgress, SyncProgressTracker, SyncStats, SyncStep};
pub use retry::{FetchError, RetryPolicy};
pub use strategies::{
    ChunkedRangeFetch, FetchSource, FetchStrategy, FetchedRange, LiveTail, ProducerContext,
    ProducerMessage, SnapshotFetch,
};
