//! Ledger client module for store sync.
//!
//! Provides the JSON-RPC/WebSocket client that reads store event logs and new heads, plus the
//! types used to classify and ABI-decode store events.

pub mod abi;
pub mod client;
pub mod types;

pub use abi::{AbiError, decode_store_event_args, encode_store_event_args};
pub use client::{HeadStream, JsonRpcLedgerClient, LedgerClient};
pub use types::{LedgerError, RawLog, RpcLog, StoreEventArgs, StoreEventKind};
