//! Store sync session and integration point for all sync components.
//!
//! This module defines the `SyncSession`, which coordinates everything involved in keeping the
//! registered storage adapters in step with the store's event log. It selects and runs the
//! producers, merges what they deliver, applies batches and drives the progress state machine.
//!
//! The session is responsible for:
//! - Resuming from what the storage adapters already hold
//! - Fetching history from a snapshot source or by chunked range requests, and tailing new heads
//! - Releasing block batches strictly in order, exactly once per block
//! - Applying each batch to every adapter in registration order
//! - Reporting progress, dropped operations and failures through the event dispatcher

use crate::config::SessionConfig;
use crate::error::SyncError;
use crate::ledger::LedgerClient;
use crate::schema::SchemaRegistry;
use crate::snapshot::SnapshotSource;
use crate::storage::StorageAdapter;
use crate::sync::{
    batcher::{DecodedBlock, OperationBatcher},
    events::{EventDispatcher, SyncEvent, SyncEventHandler, convert_decoded_block},
    merge::MergeStage,
    operations::BlockBatch,
    progress_tracker::{SyncProgress, SyncProgressTracker, SyncStep},
    retry::RetryPolicy,
    strategies::{
        ChunkedRangeFetch, FetchStrategy, LiveTail, ProducerContext, ProducerMessage,
        SnapshotFetch, run_producer,
    },
};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome of a session that ended without error
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSummary {
    pub final_step: SyncStep,
    pub last_applied_block: Option<u64>,
    pub batches_applied: usize,
    pub operations_applied: usize,
    pub operations_dropped: usize,
}

/// One synchronization session over one store.
///
/// Built once from its collaborators, then consumed by [`SyncSession::run`].
pub struct SyncSession {
    config: SessionConfig,
    ledger: Arc<dyn LedgerClient>,
    registry: Arc<SchemaRegistry>,
    snapshot_source: Option<Arc<dyn SnapshotSource>>,
    adapters: Vec<Arc<dyn StorageAdapter>>,
    dispatcher: EventDispatcher,
    cancel: CancellationToken,
    progress: watch::Sender<SyncProgress>,
}

impl SyncSession {
    pub fn new(
        config: SessionConfig,
        ledger: Arc<dyn LedgerClient>,
        registry: Arc<SchemaRegistry>,
    ) -> Self {
        let (progress, _) = watch::channel(SyncProgress::initial(
            config.start_block,
            config.start_block,
        ));
        Self {
            config,
            ledger,
            registry,
            snapshot_source: None,
            adapters: Vec::new(),
            dispatcher: EventDispatcher::new(),
            cancel: CancellationToken::new(),
            progress,
        }
    }

    /// Fetch history from `source` before falling back to range requests.
    pub fn with_snapshot_source(mut self, source: Arc<dyn SnapshotSource>) -> Self {
        self.snapshot_source = Some(source);
        self
    }

    /// Add a sink; batches are applied to sinks in the order they were added.
    pub fn with_storage_adapter(mut self, adapter: Arc<dyn StorageAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn register_handler(&mut self, handler: Box<dyn SyncEventHandler>) {
        self.dispatcher.register_handler(handler);
    }

    /// Token that stops the session; no batch is applied once it fires.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Latest progress snapshot, updated for the whole life of the session.
    pub fn progress(&self) -> watch::Receiver<SyncProgress> {
        self.progress.subscribe()
    }

    /// Run the session until it reaches `exit_at`, is cancelled or fails.
    pub async fn run(self) -> Result<SyncSummary, SyncError> {
        self.config.validate()?;
        if self.adapters.is_empty() {
            return Err(SyncError::Config(
                "at least one storage adapter is required".to_string(),
            ));
        }

        let SyncSession {
            config,
            ledger,
            registry,
            snapshot_source,
            adapters,
            dispatcher,
            cancel,
            progress,
        } = self;
        let retry = RetryPolicy::new(config.retry.clone());

        let resume = resume_point(&adapters).await?;
        let start_block = match resume {
            Some(last) => last.saturating_add(1).max(config.start_block),
            None => config.start_block,
        };

        let head_ledger = ledger.clone();
        let head = retry
            .run("blockNumber", move || {
                let ledger = head_ledger.clone();
                async move { ledger.block_number().await }
            })
            .await?;
        let target = config.exit_at.map_or(head, |exit| exit.min(head));
        info!(
            "Starting sync of {} from block {} (head {}, target {})",
            config.store_address, start_block, head, target
        );

        let producers = cancel.child_token();
        let (sender, mut receiver) = mpsc::channel(config.channel_capacity.max(1));
        let ctx = ProducerContext {
            ledger,
            batcher: Arc::new(OperationBatcher::new(registry.clone())),
            config: config.clone(),
            retry,
            sender,
            cancel: producers.clone(),
        };

        let historical: Option<Box<dyn FetchStrategy>> = match (&snapshot_source, resume) {
            _ if start_block > target => None,
            (Some(source), None) => {
                let tables = registry
                    .known_tables()
                    .iter()
                    .map(|schema| schema.table_id)
                    .collect();
                Some(Box::new(SnapshotFetch::new(
                    source.clone(),
                    start_block,
                    target,
                    tables,
                )))
            }
            _ => Some(Box::new(ChunkedRangeFetch::new(start_block, target))),
        };
        tokio::spawn(run_producer(historical, ctx.clone(), Some(target)));

        if config.exit_at.is_none_or(|exit| exit > target) {
            let live: Box<dyn FetchStrategy> = Box::new(LiveTail::new(target.saturating_add(1)));
            tokio::spawn(run_producer(Some(live), ctx.clone(), None));
        }
        drop(ctx);

        let mut apply = ApplyLoop {
            adapters,
            dispatcher,
            tracker: SyncProgressTracker::with_sender(start_block, target, progress),
            merge: MergeStage::new(start_block),
            cancel: cancel.clone(),
            exit_at: config.exit_at,
            last_applied_block: start_block.checked_sub(1),
        };
        let result = apply.run(&mut receiver).await;
        producers.cancel();
        result
    }
}

/// Lowest block every adapter has applied, when all of them have applied one.
async fn resume_point(adapters: &[Arc<dyn StorageAdapter>]) -> Result<Option<u64>, SyncError> {
    let mut lowest: Option<u64> = None;
    for adapter in adapters {
        match adapter.last_applied_block().await? {
            Some(block) => {
                debug!("{} holds blocks through {}", adapter.name(), block);
                lowest = Some(lowest.map_or(block, |l| l.min(block)));
            }
            None => return Ok(None),
        }
    }
    Ok(lowest)
}

/// The merge and apply side of a running session
struct ApplyLoop {
    adapters: Vec<Arc<dyn StorageAdapter>>,
    dispatcher: EventDispatcher,
    tracker: SyncProgressTracker,
    merge: MergeStage,
    cancel: CancellationToken,
    exit_at: Option<u64>,
    last_applied_block: Option<u64>,
}

impl ApplyLoop {
    async fn run(
        &mut self,
        receiver: &mut mpsc::Receiver<ProducerMessage>,
    ) -> Result<SyncSummary, SyncError> {
        self.dispatcher
            .dispatch(&SyncEvent::ProgressChanged(self.tracker.snapshot()))
            .await;
        self.record_processed().await;

        loop {
            if self.exit_reached() {
                return Ok(self.complete().await);
            }

            let message = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("Sync cancelled");
                    break;
                }
                message = receiver.recv() => message,
            };
            let Some(message) = message else {
                debug!("All producers finished");
                break;
            };

            match message {
                ProducerMessage::Range(range) => {
                    self.merge.accept(range);
                    self.apply_ready().await?;
                }
                ProducerMessage::HistoricalComplete { to_block } => {
                    debug!("Historical range through block {} retrieved", to_block);
                    for progress in self.tracker.historical_complete() {
                        self.dispatcher
                            .dispatch(&SyncEvent::ProgressChanged(progress))
                            .await;
                    }
                    self.record_processed().await;
                }
                ProducerMessage::SnapshotFallback { reason } => {
                    self.dispatcher
                        .dispatch(&SyncEvent::SnapshotFallback { reason })
                        .await;
                }
                ProducerMessage::Failed { error } => {
                    return Err(self.fail(SyncError::Fetch(error)).await);
                }
            }
        }

        self.tracker.log_progress(true);
        Ok(self.summary())
    }

    /// Apply every block the merge stage can release.
    async fn apply_ready(&mut self) -> Result<(), SyncError> {
        for block in self.merge.drain_ready() {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            self.report_dropped(&block).await;
            if !block.batch.is_empty() {
                self.apply(&block.batch).await?;
            }
            self.last_applied_block = Some(block.block_number());
        }

        self.last_applied_block = self.merge.processed_through().max(self.last_applied_block);
        self.record_processed().await;
        self.tracker.log_progress(false);
        Ok(())
    }

    async fn apply(&mut self, batch: &BlockBatch) -> Result<(), SyncError> {
        for adapter in &self.adapters {
            if let Err(source) = adapter.apply_block(batch).await {
                let error = SyncError::Apply {
                    adapter: adapter.name(),
                    block_number: batch.block_number,
                    last_applied_block: batch.block_number.checked_sub(1),
                    source,
                };
                return Err(self.fail(error).await);
            }
        }

        self.tracker.record_batch(batch.len());
        self.dispatcher
            .dispatch(&SyncEvent::BlockApplied {
                block_number: batch.block_number,
                operations: batch.len(),
            })
            .await;
        Ok(())
    }

    async fn report_dropped(&mut self, block: &DecodedBlock) {
        if block.dropped.is_empty() {
            return;
        }
        for dropped in &block.dropped {
            warn!(
                "Dropped operation at block {} log {}: {}",
                dropped.block_number, dropped.log_index, dropped.reason
            );
        }
        self.tracker.record_dropped(block.dropped.len());
        for event in convert_decoded_block(block) {
            self.dispatcher.dispatch(&event).await;
        }
    }

    async fn record_processed(&mut self) {
        for progress in self.tracker.record_processed(self.merge.processed_through()) {
            self.dispatcher
                .dispatch(&SyncEvent::ProgressChanged(progress))
                .await;
        }
    }

    fn exit_reached(&self) -> bool {
        self.exit_at.is_some_and(|exit| {
            self.merge
                .processed_through()
                .is_some_and(|processed| processed >= exit)
        })
    }

    async fn complete(&mut self) -> SyncSummary {
        info!("Reached exit block {:?}", self.exit_at);
        self.tracker.log_progress(true);
        self.dispatcher
            .dispatch(&SyncEvent::SessionCompleted {
                last_applied_block: self.last_applied_block,
            })
            .await;
        self.summary()
    }

    async fn fail(&mut self, error: SyncError) -> SyncError {
        let reason = error.to_string();
        let last_applied_block = match &error {
            SyncError::Apply { .. } => error.last_applied_block(),
            _ => self.last_applied_block,
        };
        error!("Sync failed: {}", reason);

        let progress = self.tracker.fail(&reason);
        self.dispatcher
            .dispatch(&SyncEvent::ProgressChanged(progress))
            .await;
        self.dispatcher
            .dispatch(&SyncEvent::SessionFailed {
                reason,
                last_applied_block,
            })
            .await;
        error
    }

    fn summary(&self) -> SyncSummary {
        let stats = self.tracker.get_stats();
        info!("{}", stats.summary());
        SyncSummary {
            final_step: stats.step,
            last_applied_block: self.last_applied_block,
            batches_applied: stats.batches_applied,
            operations_applied: stats.operations_applied,
            operations_dropped: stats.operations_dropped,
        }
    }
}
