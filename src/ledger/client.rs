//!
//! JSON-RPC client for the ledger hosting the store contract.
//!
//! This module provides the `LedgerClient` abstraction used by sync sessions and an async
//! implementation over HTTP JSON-RPC (block number, log ranges, contract reads) with a
//! WebSocket subscription to new block heads. All methods are async and designed for use
//! with Tokio.

use super::types::*;
use crate::utils::{format_quantity, parse_quantity};
use alloy_primitives::{Address, Bytes};
use async_trait::async_trait;
use futures_util::{SinkExt, Stream, StreamExt};
use reqwest::Client;
use serde_json::json;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info};

/// Stream of new head block numbers
pub type HeadStream = Pin<Box<dyn Stream<Item = Result<u64, LedgerError>> + Send>>;

/// Read access to the ledger a session syncs from
#[async_trait]
pub trait LedgerClient: Send + Sync {
	/// Current head block number.
	async fn block_number(&self) -> Result<u64, LedgerError>;

	/// Store event logs emitted by `address` in the inclusive block range.
	async fn get_logs(
		&self,
		address: Address,
		from_block: u64,
		to_block: u64,
	) -> Result<Vec<RawLog>, LedgerError>;

	/// Subscribe to new head block numbers.
	async fn subscribe_heads(&self) -> Result<HeadStream, LedgerError>;

	/// Read-only contract call at the latest block.
	async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, LedgerError>;
}

/// JSON-RPC ledger client
#[derive(Debug)]
pub struct JsonRpcLedgerClient {
	/// The underlying HTTP client for JSON-RPC requests.
	http_client: Client,
	/// The HTTP JSON-RPC endpoint.
	rpc_url: String,
	/// The WebSocket endpoint for head subscriptions.
	ws_url: Option<String>,
	/// Monotonic JSON-RPC request id.
	request_id: AtomicU64,
}

impl JsonRpcLedgerClient {
	/// Create a new ledger client.
	///
	/// # Arguments
	/// * `rpc_url` - The HTTP JSON-RPC endpoint.
	/// * `ws_url` - The WebSocket endpoint for `eth_subscribe`; live heads are unavailable without it.
	pub fn new(rpc_url: String, ws_url: Option<String>) -> Result<Self, LedgerError> {
		let http_client = Client::builder().timeout(Duration::from_secs(30)).build()?;

		Ok(Self {
			http_client,
			rpc_url,
			ws_url,
			request_id: AtomicU64::new(1),
		})
	}

	/// Execute a JSON-RPC request.
	///
	/// # Returns
	/// The `result` member of the response, or a `LedgerError` if the request fails or the
	/// node answers with an error object.
	pub async fn execute_request(
		&self,
		method: &str,
		params: serde_json::Value,
	) -> Result<serde_json::Value, LedgerError> {
		let request_body = json!({
			"jsonrpc": "2.0",
			"id": self.request_id.fetch_add(1, Ordering::Relaxed),
			"method": method,
			"params": params,
		});

		let response = self
			.http_client
			.post(&self.rpc_url)
			.header("Content-Type", "application/json")
			.json(&request_body)
			.send()
			.await?;

		if !response.status().is_success() {
			return Err(LedgerError::Rpc {
				code: i64::from(response.status().as_u16()),
				message: format!("HTTP error: {}", response.status()),
			});
		}

		let mut response_json: serde_json::Value = response.json().await?;

		if let Some(error) = response_json.get("error") {
			return Err(LedgerError::Rpc {
				code: error.get("code").and_then(|c| c.as_i64()).unwrap_or_default(),
				message: error
					.get("message")
					.and_then(|m| m.as_str())
					.unwrap_or("unknown error")
					.to_string(),
			});
		}

		match response_json.get_mut("result").map(serde_json::Value::take) {
			Some(serde_json::Value::Null) | None => Err(LedgerError::NoData),
			Some(result) => Ok(result),
		}
	}
}

#[async_trait]
impl LedgerClient for JsonRpcLedgerClient {
	async fn block_number(&self) -> Result<u64, LedgerError> {
		let result = self.execute_request("eth_blockNumber", json!([])).await?;
		let quantity = result
			.as_str()
			.ok_or_else(|| LedgerError::InvalidResponse(format!("block number {}", result)))?;
		parse_quantity(quantity).map_err(LedgerError::InvalidResponse)
	}

	async fn get_logs(
		&self,
		address: Address,
		from_block: u64,
		to_block: u64,
	) -> Result<Vec<RawLog>, LedgerError> {
		let topics = StoreEventKind::ALL
			.iter()
			.map(|kind| kind.topic())
			.collect::<Vec<_>>();
		let filter = json!({
			"address": address,
			"fromBlock": format_quantity(from_block),
			"toBlock": format_quantity(to_block),
			"topics": [topics],
		});

		let result = self.execute_request("eth_getLogs", json!([filter])).await?;
		let logs: Vec<RpcLog> = serde_json::from_value(result)?;
		debug!(
			"Fetched {} logs for blocks {}..={}",
			logs.len(),
			from_block,
			to_block
		);

		logs.into_iter().map(RawLog::try_from).collect()
	}

	async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, LedgerError> {
		let result = self
			.execute_request(
				"eth_call",
				json!([{ "to": to, "data": Bytes::from(data) }, "latest"]),
			)
			.await?;
		let bytes: Bytes = serde_json::from_value(result)?;
		Ok(bytes.to_vec())
	}

	/// Subscribe to new heads over WebSocket.
	///
	/// # Returns
	/// A pinned async stream of head block numbers. Each item is either a head or an error;
	/// a closed socket yields an error so the caller can resubscribe.
	async fn subscribe_heads(&self) -> Result<HeadStream, LedgerError> {
		let ws_url = self.ws_url.as_ref().ok_or_else(|| {
			LedgerError::Subscription("no WebSocket endpoint configured".to_string())
		})?;
		debug!("Attempting WebSocket connection to: {}", ws_url);

		let (ws_stream, response) = connect_async(ws_url.as_str()).await?;
		debug!(
			"WebSocket connection established, response status: {}",
			response.status()
		);
		let (mut ws_sender, mut ws_receiver) = ws_stream.split();

		let subscribe_message = json!({
			"jsonrpc": "2.0",
			"id": self.request_id.fetch_add(1, Ordering::Relaxed),
			"method": "eth_subscribe",
			"params": ["newHeads"],
		});
		ws_sender
			.send(Message::Text(subscribe_message.to_string()))
			.await?;

		// Wait for the subscription id
		let subscription_id = loop {
			match ws_receiver.next().await {
				Some(Ok(Message::Text(text))) => {
					let parsed: serde_json::Value = serde_json::from_str(&text)?;
					if let Some(error) = parsed.get("error") {
						return Err(LedgerError::Subscription(error.to_string()));
					}
					if let Some(id) = parsed.get("result").and_then(|r| r.as_str()) {
						break id.to_string();
					}
				}
				Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
				Some(Ok(_)) => {
					return Err(LedgerError::Subscription(
						"Unexpected message type during handshake".to_string(),
					));
				}
				Some(Err(e)) => return Err(e.into()),
				None => {
					return Err(LedgerError::Subscription(
						"Connection closed during handshake".to_string(),
					));
				}
			}
		};
		info!("Subscribed to new heads with subscription {}", subscription_id);

		let stream = ws_receiver.filter_map(move |msg| {
			let subscription_id = subscription_id.clone();
			async move {
				match msg {
					Ok(Message::Text(text)) => {
						match serde_json::from_str::<serde_json::Value>(&text) {
							Ok(parsed) => {
								if parsed.get("method").and_then(|m| m.as_str())
									!= Some("eth_subscription")
								{
									debug!("Ignoring non-subscription message");
									return None;
								}
								let params = parsed.get("params")?;
								if params.get("subscription").and_then(|s| s.as_str())
									!= Some(subscription_id.as_str())
								{
									return None;
								}
								let number = params
									.get("result")
									.and_then(|r| r.get("number"))
									.and_then(|n| n.as_str());
								match number {
									Some(number) => Some(
										parse_quantity(number).map_err(LedgerError::InvalidResponse),
									),
									None => Some(Err(LedgerError::NoData)),
								}
							}
							Err(e) => {
								error!("Failed to parse head notification: {}", e);
								Some(Err(LedgerError::Json(e)))
							}
						}
					}
					Ok(Message::Close(frame)) => Some(Err(LedgerError::Subscription(format!(
						"connection closed: {:?}",
						frame
					)))),
					Ok(_) => None,
					Err(e) => Some(Err(LedgerError::WebSocket(e))),
				}
			}
		});

		Ok(Box::pin(stream))
	}
}
