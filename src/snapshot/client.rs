//!
//! HTTP client for a snapshot indexer.
//!
//! A snapshot indexer has already processed the store's history and can hand back the current
//! records of a set of tables in one response, which is much faster than replaying every log.

use super::types::*;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};

/// Source of already-processed history
#[async_trait]
pub trait SnapshotSource: Send + Sync {
	async fn fetch_snapshot(&self, request: &SnapshotRequest) -> Result<Snapshot, SnapshotError>;

	/// Get the name of this source for logging and diagnostics.
	fn name(&self) -> &'static str;
}

/// Snapshot indexer reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpSnapshotSource {
	/// The underlying HTTP client.
	http_client: Client,
	/// The base URL of the indexer; requests go to `<indexer_url>/snapshot`.
	indexer_url: String,
}

impl HttpSnapshotSource {
	/// Create a new snapshot client.
	///
	/// # Arguments
	/// * `indexer_url` - The base HTTP endpoint of the snapshot indexer.
	pub fn new(indexer_url: String) -> Result<Self, SnapshotError> {
		let http_client = Client::builder().timeout(Duration::from_secs(60)).build()?;

		Ok(Self {
			http_client,
			indexer_url: indexer_url.trim_end_matches('/').to_string(),
		})
	}
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
	async fn fetch_snapshot(&self, request: &SnapshotRequest) -> Result<Snapshot, SnapshotError> {
		let url = format!("{}/snapshot", self.indexer_url);
		debug!(
			"Requesting snapshot of blocks {}..={} from {}",
			request.from_block, request.to_block, url
		);

		let response = self
			.http_client
			.post(&url)
			.header("Content-Type", "application/json")
			.json(request)
			.send()
			.await?;

		if !response.status().is_success() {
			return Err(SnapshotError::Unavailable(format!(
				"HTTP error: {}",
				response.status()
			)));
		}

		let body: SnapshotResponse = response.json().await?;
		if body.block_number < request.from_block {
			return Err(SnapshotError::Invalid(format!(
				"snapshot block {} is before the requested start {}",
				body.block_number, request.from_block
			)));
		}
		if body.block_number > request.to_block {
			return Err(SnapshotError::Invalid(format!(
				"snapshot block {} is past the requested end {}",
				body.block_number, request.to_block
			)));
		}

		info!(
			"Received snapshot at block {} with {} records across {} tables",
			body.block_number,
			body.records.len(),
			body.tables.len()
		);

		Ok(Snapshot::Records {
			block_number: body.block_number,
			tables: body.tables,
			records: body.records,
		})
	}

	fn name(&self) -> &'static str {
		"HttpSnapshotSource"
	}
}
