//! Types for snapshot indexer integration

use crate::ledger::RawLog;
use crate::schema::{TableId, TableSchema};
use alloy_primitives::{Address, B256, Bytes};
use serde::{Deserialize, Serialize};

/// Request for the state of a set of tables over a block range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRequest {
    pub address: Address,
    pub from_block: u64,
    pub to_block: u64,
    /// Tables of interest; empty means every table of the store.
    pub tables: Vec<TableId>,
}

/// One record as held by a snapshot indexer, still in ledger encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRecord {
    pub table_id: TableId,
    pub key_tuple: Vec<B256>,
    /// Encoded value blob, identical to a SetRecord payload
    pub data: Bytes,
}

/// What a snapshot source returns.
#[derive(Debug, Clone)]
pub enum Snapshot {
    /// Materialized records as of `block_number`, with the schemas needed to decode them
    Records {
        block_number: u64,
        tables: Vec<TableSchema>,
        records: Vec<SnapshotRecord>,
    },
    /// Raw store logs up to and including `to_block`
    Logs { to_block: u64, logs: Vec<RawLog> },
}

impl Snapshot {
    /// Last block covered by the snapshot.
    pub fn block_number(&self) -> u64 {
        match self {
            Snapshot::Records { block_number, .. } => *block_number,
            Snapshot::Logs { to_block, .. } => *to_block,
        }
    }
}

/// Wire form of a records snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotResponse {
    pub block_number: u64,
    #[serde(default)]
    pub tables: Vec<TableSchema>,
    #[serde(default)]
    pub records: Vec<SnapshotRecord>,
}

/// Error types for snapshot retrieval
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Snapshot unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid snapshot: {0}")]
    Invalid(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}
