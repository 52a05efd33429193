//! Types for JSON-RPC ledger integration and store event classification

use crate::utils::{parse_optional_quantity, parse_quantity};
use alloy_primitives::{Address, B256, Bytes, keccak256};
use serde::{Deserialize, Serialize};

/// The four store events a sync session consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreEventKind {
    SetRecord,
    SetField,
    DeleteRecord,
    EphemeralRecord,
}

impl StoreEventKind {
    pub const ALL: [StoreEventKind; 4] = [
        StoreEventKind::SetRecord,
        StoreEventKind::SetField,
        StoreEventKind::DeleteRecord,
        StoreEventKind::EphemeralRecord,
    ];

    /// Canonical event signature; its keccak-256 is the log's topic0.
    pub fn signature(&self) -> &'static str {
        match self {
            StoreEventKind::SetRecord => "StoreSetRecord(bytes32,bytes32[],bytes)",
            StoreEventKind::SetField => "StoreSetField(bytes32,bytes32[],uint8,bytes)",
            StoreEventKind::DeleteRecord => "StoreDeleteRecord(bytes32,bytes32[])",
            StoreEventKind::EphemeralRecord => "StoreEphemeralRecord(bytes32,bytes32[],bytes)",
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            StoreEventKind::SetRecord => "StoreSetRecord",
            StoreEventKind::SetField => "StoreSetField",
            StoreEventKind::DeleteRecord => "StoreDeleteRecord",
            StoreEventKind::EphemeralRecord => "StoreEphemeralRecord",
        }
    }

    pub fn topic(&self) -> B256 {
        keccak256(self.signature())
    }

    pub fn from_event_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.event_name() == name)
    }

    pub fn from_topic(topic: &B256) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.topic() == *topic)
    }

    /// Classify a log: the ledger-supplied event name wins, topic0 otherwise.
    ///
    /// A log carrying an event name this crate does not know is not a store
    /// event even if its topic0 happens to match.
    pub fn classify(log: &RawLog) -> Option<Self> {
        match &log.event_name {
            Some(name) => Self::from_event_name(name),
            None => log.topics.first().and_then(Self::from_topic),
        }
    }
}

/// Arguments shared by the store events.
///
/// `schema_index` is only present for SetField; `data` is empty for DeleteRecord.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEventArgs {
    pub table: B256,
    pub key: Vec<B256>,
    pub schema_index: Option<u8>,
    pub data: Vec<u8>,
}

/// A log record as delivered by a ledger client or snapshot source.
///
/// `event_name` and `args` are filled in by clients that decode logs
/// themselves; otherwise the decoder works from `topics` and `data`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Vec<u8>,
    pub block_number: u64,
    pub block_hash: Option<B256>,
    pub log_index: u64,
    pub transaction_hash: Option<B256>,
    pub transaction_index: Option<u64>,
    pub removed: bool,
    pub event_name: Option<String>,
    pub args: Option<StoreEventArgs>,
}

/// `eth_getLogs` result entry as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    /// Pending logs have no block number
    pub block_number: Option<String>,
    pub block_hash: Option<B256>,
    pub log_index: Option<String>,
    pub transaction_hash: Option<B256>,
    pub transaction_index: Option<String>,
    #[serde(default)]
    pub removed: bool,
}

impl TryFrom<RpcLog> for RawLog {
    type Error = LedgerError;

    fn try_from(log: RpcLog) -> Result<Self, Self::Error> {
        let block_number = log
            .block_number
            .as_deref()
            .ok_or_else(|| LedgerError::InvalidResponse("log without block number".to_string()))
            .and_then(|q| parse_quantity(q).map_err(LedgerError::InvalidResponse))?;
        let log_index = log
            .log_index
            .as_deref()
            .ok_or_else(|| LedgerError::InvalidResponse("log without log index".to_string()))
            .and_then(|q| parse_quantity(q).map_err(LedgerError::InvalidResponse))?;
        let transaction_index = parse_optional_quantity(log.transaction_index.as_deref())
            .map_err(LedgerError::InvalidResponse)?;

        Ok(RawLog {
            address: log.address,
            topics: log.topics,
            data: log.data.to_vec(),
            block_number,
            block_hash: log.block_hash,
            log_index,
            transaction_hash: log.transaction_hash,
            transaction_index,
            removed: log.removed,
            event_name: None,
            args: None,
        })
    }
}

/// Error types for ledger RPC operations
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("No data returned")]
    NoData,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}
