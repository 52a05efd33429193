use crate::ledger::LedgerError;
use crate::schema::{SchemaError, SchemaNotFound};
use crate::snapshot::SnapshotError;
use crate::storage::StorageError;
use crate::sync::decoder::DecodeError;
use crate::sync::retry::FetchError;

/// Session-level error taxonomy
///
/// `SchemaNotFound` and `Decode` are contained per operation and surface as
/// dropped-operation events; `Fetch` and `Apply` halt the session.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
	#[error(transparent)]
	SchemaNotFound(#[from] SchemaNotFound),

	#[error(transparent)]
	Decode(#[from] DecodeError),

	#[error("Fetch failed: {0}")]
	Fetch(#[from] FetchError),

	#[error(
		"Storage adapter {adapter} failed to apply block {block_number} (last applied block: {last_applied_block:?}): {source}"
	)]
	Apply {
		adapter: &'static str,
		block_number: u64,
		last_applied_block: Option<u64>,
		#[source]
		source: StorageError,
	},

	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),

	#[error("Ledger error: {0}")]
	Ledger(#[from] LedgerError),

	#[error("Snapshot error: {0}")]
	Snapshot(#[from] SnapshotError),

	#[error("Schema error: {0}")]
	Schema(#[from] SchemaError),

	#[error("Configuration error: {0}")]
	Config(String),

	#[error("Event handler error: {0}")]
	Handler(String),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl SyncError {
	/// Last block every sink is known to hold, for resuming after an apply failure.
	pub fn last_applied_block(&self) -> Option<u64> {
		match self {
			SyncError::Apply {
				last_applied_block, ..
			} => *last_applied_block,
			_ => None,
		}
	}
}
