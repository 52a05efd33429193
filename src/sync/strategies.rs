use crate::config::SessionConfig;
use crate::ledger::LedgerClient;
use crate::schema::TableId;
use crate::snapshot::{Snapshot, SnapshotRequest, SnapshotSource};
use crate::sync::batcher::{DecodedBlock, OperationBatcher};
use crate::sync::retry::{FetchError, RetryPolicy};
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where a fetched range came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
	Snapshot,
	Range,
	Live,
}

/// Decoded blocks covering the inclusive range `from_block..=to_block`.
///
/// Blocks without store logs have no entry in `blocks` but are still covered.
#[derive(Debug, Clone)]
pub struct FetchedRange {
	pub source: FetchSource,
	pub from_block: u64,
	pub to_block: u64,
	pub blocks: Vec<DecodedBlock>,
}

/// Messages producers send to the merge stage
#[derive(Debug)]
pub enum ProducerMessage {
	Range(FetchedRange),
	/// Every block through `to_block` of the historical range has been sent
	HistoricalComplete { to_block: u64 },
	SnapshotFallback { reason: String },
	Failed { error: FetchError },
}

/// Everything a producer needs to fetch and hand over ranges
#[derive(Clone)]
pub struct ProducerContext {
	pub ledger: Arc<dyn LedgerClient>,
	pub batcher: Arc<OperationBatcher>,
	pub config: SessionConfig,
	pub retry: RetryPolicy,
	pub sender: mpsc::Sender<ProducerMessage>,
	pub cancel: CancellationToken,
}

impl ProducerContext {
	/// Hand a message to the merge stage; `false` once the session is gone.
	pub async fn send(&self, message: ProducerMessage) -> bool {
		if self.cancel.is_cancelled() {
			return false;
		}
		self.sender.send(message).await.is_ok()
	}

	/// Fetch and decode one inclusive block range, retrying the log request.
	pub async fn fetch_range(
		&self,
		source: FetchSource,
		from_block: u64,
		to_block: u64,
	) -> Result<FetchedRange, FetchError> {
		let ledger = self.ledger.clone();
		let address = self.config.store_address;
		let logs = self
			.retry
			.run("getLogs", move || {
				let ledger = ledger.clone();
				async move { ledger.get_logs(address, from_block, to_block).await }
			})
			.await?;

		debug!(
			"Fetched {} log(s) for blocks {}..={}",
			logs.len(),
			from_block,
			to_block
		);
		let blocks = self.batcher.batch_logs(logs).await;
		Ok(FetchedRange {
			source,
			from_block,
			to_block,
			blocks,
		})
	}
}

/// Split `from..=to` into consecutive spans of at most `max_span` blocks.
pub fn chunk_ranges(from_block: u64, to_block: u64, max_span: u64) -> Vec<(u64, u64)> {
	let max_span = max_span.max(1);
	let mut chunks = Vec::new();
	let mut start = from_block;
	while start <= to_block {
		let end = start.saturating_add(max_span - 1).min(to_block);
		chunks.push((start, end));
		if end == u64::MAX {
			break;
		}
		start = end + 1;
	}
	chunks
}

/// Trait for the ways a producer can obtain blocks
#[async_trait::async_trait]
pub trait FetchStrategy: Send + Sync {
	/// Fetch everything this strategy covers and send it to the merge stage.
	///
	/// Returns once done, once the session is cancelled, or with the fetch
	/// error that exhausted its retries.
	async fn run(&mut self, ctx: &ProducerContext) -> Result<(), FetchError>;

	/// Get the name of this strategy
	fn name(&self) -> &'static str;
}

/// Fetch a historical range by direct log requests with bounded parallelism
pub struct ChunkedRangeFetch {
	from_block: u64,
	to_block: u64,
}

impl ChunkedRangeFetch {
	pub fn new(from_block: u64, to_block: u64) -> Self {
		Self {
			from_block,
			to_block,
		}
	}
}

#[async_trait::async_trait]
impl FetchStrategy for ChunkedRangeFetch {
	async fn run(&mut self, ctx: &ProducerContext) -> Result<(), FetchError> {
		let chunks = chunk_ranges(self.from_block, self.to_block, ctx.config.max_block_range);
		if chunks.is_empty() {
			return Ok(());
		}

		info!(
			"Fetching blocks {}..={} in {} range request(s)",
			self.from_block,
			self.to_block,
			chunks.len()
		);

		let mut ranges = futures::stream::iter(chunks)
			.map(|(from, to)| ctx.fetch_range(FetchSource::Range, from, to))
			.buffered(ctx.config.fetch_concurrency.max(1));

		loop {
			tokio::select! {
				_ = ctx.cancel.cancelled() => return Ok(()),
				next = ranges.next() => match next {
					Some(Ok(range)) => {
						if !ctx.send(ProducerMessage::Range(range)).await {
							return Ok(());
						}
					}
					Some(Err(e)) => return Err(e),
					None => return Ok(()),
				}
			}
		}
	}

	fn name(&self) -> &'static str {
		"ChunkedRangeFetch"
	}
}

/// Fetch history from a snapshot source, then the remainder by range.
///
/// When the snapshot source fails the whole range is fetched by range
/// requests instead.
pub struct SnapshotFetch {
	source: Arc<dyn SnapshotSource>,
	from_block: u64,
	to_block: u64,
	tables: Vec<TableId>,
}

impl SnapshotFetch {
	pub fn new(
		source: Arc<dyn SnapshotSource>,
		from_block: u64,
		to_block: u64,
		tables: Vec<TableId>,
	) -> Self {
		Self {
			source,
			from_block,
			to_block,
			tables,
		}
	}

	async fn fetch_snapshot(&self, ctx: &ProducerContext) -> Result<Snapshot, FetchError> {
		let request = SnapshotRequest {
			address: ctx.config.store_address,
			from_block: self.from_block,
			to_block: self.to_block,
			tables: self.tables.clone(),
		};
		let source = self.source.clone();
		let snapshot = ctx
			.retry
			.run("fetchSnapshot", move || {
				let source = source.clone();
				let request = request.clone();
				async move { source.fetch_snapshot(&request).await }
			})
			.await?;

		if snapshot.block_number() < self.from_block {
			return Err(FetchError {
				operation: "fetchSnapshot".to_string(),
				attempts: 1,
				message: format!(
					"snapshot ends at block {}, before the start block {}",
					snapshot.block_number(),
					self.from_block
				),
			});
		}
		if snapshot.block_number() > self.to_block {
			return Err(FetchError {
				operation: "fetchSnapshot".to_string(),
				attempts: 1,
				message: format!(
					"snapshot is at block {}, past the end block {}",
					snapshot.block_number(),
					self.to_block
				),
			});
		}
		Ok(snapshot)
	}

	async fn fall_back(&self, ctx: &ProducerContext, reason: String) -> Result<(), FetchError> {
		warn!(
			"Snapshot source {} failed, falling back to range requests: {}",
			self.source.name(),
			reason
		);
		if !ctx.send(ProducerMessage::SnapshotFallback { reason }).await {
			return Ok(());
		}
		ChunkedRangeFetch::new(self.from_block, self.to_block)
			.run(ctx)
			.await
	}
}

#[async_trait::async_trait]
impl FetchStrategy for SnapshotFetch {
	async fn run(&mut self, ctx: &ProducerContext) -> Result<(), FetchError> {
		info!(
			"Requesting snapshot of blocks {}..={} from {}",
			self.from_block,
			self.to_block,
			self.source.name()
		);

		let snapshot = match self.fetch_snapshot(ctx).await {
			Ok(snapshot) => snapshot,
			Err(e) => return self.fall_back(ctx, e.to_string()).await,
		};

		let snapshot_block = snapshot.block_number();
		let blocks = match snapshot {
			Snapshot::Records {
				block_number,
				tables,
				records,
			} => {
				for schema in tables {
					let table_id = schema.table_id;
					if let Err(e) = ctx.batcher.registry().register(schema).await {
						warn!("Ignoring snapshot schema for table {}: {}", table_id, e);
					}
				}
				vec![ctx.batcher.batch_snapshot(block_number, &records).await]
			}
			Snapshot::Logs { to_block, logs } => {
				let from_block = self.from_block;
				let logs = logs
					.into_iter()
					.filter(|log| log.block_number >= from_block && log.block_number <= to_block)
					.collect();
				ctx.batcher.batch_logs(logs).await
			}
		};

		info!(
			"Snapshot covers blocks {}..={} with {} block batch(es)",
			self.from_block,
			snapshot_block,
			blocks.len()
		);
		let range = FetchedRange {
			source: FetchSource::Snapshot,
			from_block: self.from_block,
			to_block: snapshot_block,
			blocks,
		};
		if !ctx.send(ProducerMessage::Range(range)).await {
			return Ok(());
		}

		match snapshot_block.checked_add(1) {
			Some(next) => ChunkedRangeFetch::new(next, self.to_block).run(ctx).await,
			None => Ok(()),
		}
	}

	fn name(&self) -> &'static str {
		"SnapshotFetch"
	}
}

/// Follow new heads and fetch each new block range as it appears.
///
/// A silent subscription is checked against `eth_blockNumber` after every
/// heartbeat timeout and then replaced; consecutive subscription failures up
/// to the retry ceiling end the strategy with an error.
pub struct LiveTail {
	next_block: u64,
}

impl LiveTail {
	pub fn new(from_block: u64) -> Self {
		Self {
			next_block: from_block,
		}
	}

	/// Fetch everything from `next_block` through `head`.
	async fn catch_up(&mut self, ctx: &ProducerContext, head: u64) -> Result<bool, FetchError> {
		if head < self.next_block {
			return Ok(true);
		}
		for (from, to) in chunk_ranges(self.next_block, head, ctx.config.max_block_range) {
			let range = ctx.fetch_range(FetchSource::Live, from, to).await?;
			if !ctx.send(ProducerMessage::Range(range)).await {
				return Ok(false);
			}
			self.next_block = to + 1;
		}
		Ok(true)
	}
}

#[async_trait::async_trait]
impl FetchStrategy for LiveTail {
	async fn run(&mut self, ctx: &ProducerContext) -> Result<(), FetchError> {
		let heartbeat = ctx.config.live.heartbeat_timeout();
		let max_failures = ctx.retry.config().max_attempts.max(1);
		let mut failures = 0u32;

		loop {
			let ledger = ctx.ledger.clone();
			let subscribe = ctx.retry.run("subscribeHeads", move || {
				let ledger = ledger.clone();
				async move { ledger.subscribe_heads().await }
			});
			let mut heads = tokio::select! {
				_ = ctx.cancel.cancelled() => return Ok(()),
				heads = subscribe => heads?,
			};
			info!("Following new heads from block {}", self.next_block);

			let failure = loop {
				let next = tokio::select! {
					_ = ctx.cancel.cancelled() => return Ok(()),
					next = tokio::time::timeout(heartbeat, heads.next()) => next,
				};

				match next {
					Ok(Some(Ok(head))) => {
						failures = 0;
						if !self.catch_up(ctx, head).await? {
							return Ok(());
						}
					}
					Ok(Some(Err(e))) => break Some(format!("head subscription error: {}", e)),
					Ok(None) => break Some("head subscription closed".to_string()),
					Err(_) => {
						let ledger = ctx.ledger.clone();
						let head = ctx
							.retry
							.run("blockNumber", move || {
								let ledger = ledger.clone();
								async move { ledger.block_number().await }
							})
							.await?;
						failures = 0;
						if !self.catch_up(ctx, head).await? {
							return Ok(());
						}
						break None;
					}
				}
			};

			let Some(reason) = failure else {
				debug!("No new head within {:?}, resubscribing", heartbeat);
				continue;
			};
			failures += 1;
			if failures >= max_failures {
				return Err(FetchError {
					operation: "subscribeHeads".to_string(),
					attempts: failures,
					message: reason,
				});
			}
			warn!("Resubscribing to new heads: {}", reason);
			tokio::time::sleep(ctx.retry.config().initial_interval()).await;
		}
	}

	fn name(&self) -> &'static str {
		"LiveTail"
	}
}

/// Run a producer to completion and report its outcome to the merge stage.
///
/// `historical_end` marks a historical producer: on success it announces
/// that the range through that block has been sent.
pub async fn run_producer(
	strategy: Option<Box<dyn FetchStrategy>>,
	ctx: ProducerContext,
	historical_end: Option<u64>,
) {
	let result = match strategy {
		Some(mut strategy) => {
			debug!("Starting {} producer", strategy.name());
			strategy.run(&ctx).await
		}
		None => Ok(()),
	};

	match result {
		Ok(()) => {
			if let Some(to_block) = historical_end {
				ctx.send(ProducerMessage::HistoricalComplete { to_block })
					.await;
			}
		}
		Err(error) => {
			ctx.send(ProducerMessage::Failed { error }).await;
		}
	}
}
