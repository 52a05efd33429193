//! Progress tracking for store synchronization.
//!
//! The `SyncProgressTracker` owns the session's [`SyncProgress`] and drives its state machine:
//! `SnapshotFetching -> SnapshotApplying -> Live`, with `Failed` as the terminal error state.
//! Every transition and every strict percentage increase is returned to the caller as an
//! emission for the event dispatcher, and the latest snapshot is published on a `watch`
//! channel for read-only consumers.

use serde::Serialize;
use std::fmt;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStep {
    SnapshotFetching,
    SnapshotApplying,
    Live,
    Failed,
}

impl fmt::Display for SyncStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncStep::SnapshotFetching => "SNAPSHOT_FETCHING",
            SyncStep::SnapshotApplying => "SNAPSHOT_APPLYING",
            SyncStep::Live => "LIVE",
            SyncStep::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Read-only snapshot of a session's progress
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    pub step: SyncStep,
    /// Highest block through which every block has been applied
    pub last_block_processed: Option<u64>,
    pub target_block: u64,
    /// In `[0, 100]`; reaches 100 only on entering `Live`
    pub percentage: f64,
    pub message: String,
}

impl SyncProgress {
    pub fn initial(start_block: u64, target_block: u64) -> Self {
        Self {
            step: SyncStep::SnapshotFetching,
            last_block_processed: None,
            target_block,
            percentage: 0.0,
            message: format!(
                "Fetching history from block {} to {}",
                start_block, target_block
            ),
        }
    }
}

/// Service for tracking synchronization progress
#[derive(Debug)]
pub struct SyncProgressTracker {
    start_block: u64,
    progress: SyncProgress,
    sender: watch::Sender<SyncProgress>,
    batches_applied: usize,
    operations_applied: usize,
    operations_dropped: usize,
    /// Last block at which we logged progress
    last_logged_block: u64,
}

impl SyncProgressTracker {
    /// Create a tracker with its own watch channel.
    pub fn new(start_block: u64, target_block: u64) -> Self {
        let (sender, _) = watch::channel(SyncProgress::initial(start_block, target_block));
        Self::with_sender(start_block, target_block, sender)
    }

    /// Create a tracker that publishes into an existing watch channel.
    pub fn with_sender(
        start_block: u64,
        target_block: u64,
        sender: watch::Sender<SyncProgress>,
    ) -> Self {
        let progress = SyncProgress::initial(start_block, target_block);
        sender.send_replace(progress.clone());
        Self {
            start_block,
            progress,
            sender,
            batches_applied: 0,
            operations_applied: 0,
            operations_dropped: 0,
            last_logged_block: start_block,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncProgress> {
        self.sender.subscribe()
    }

    pub fn snapshot(&self) -> SyncProgress {
        self.progress.clone()
    }

    pub fn step(&self) -> SyncStep {
        self.progress.step
    }

    /// The whole historical range has been retrieved.
    pub fn historical_complete(&mut self) -> Vec<SyncProgress> {
        let mut emissions = Vec::new();
        if self.progress.step == SyncStep::SnapshotFetching {
            self.transition(SyncStep::SnapshotApplying, &mut emissions);
            if self.reached_target() {
                self.enter_live(&mut emissions);
            }
        }
        emissions
    }

    /// Every block through `coverage_end` has been applied.
    pub fn record_processed(&mut self, coverage_end: Option<u64>) -> Vec<SyncProgress> {
        let mut emissions = Vec::new();
        let Some(coverage_end) = coverage_end else {
            return emissions;
        };
        if self
            .progress
            .last_block_processed
            .is_some_and(|last| last >= coverage_end)
        {
            return emissions;
        }
        self.progress.last_block_processed = Some(coverage_end);

        match self.progress.step {
            SyncStep::SnapshotFetching | SyncStep::SnapshotApplying => {
                if self.reached_target() {
                    if self.progress.step == SyncStep::SnapshotFetching {
                        self.transition(SyncStep::SnapshotApplying, &mut emissions);
                    }
                    self.enter_live(&mut emissions);
                } else {
                    let percentage = self.percentage();
                    if percentage > self.progress.percentage {
                        self.progress.percentage = percentage;
                        self.progress.message = format!(
                            "Processed through block {} of {}",
                            coverage_end, self.progress.target_block
                        );
                        emissions.push(self.publish());
                    } else {
                        self.publish();
                    }
                }
            }
            SyncStep::Live => {
                self.progress.message = format!("Live at block {}", coverage_end);
                self.publish();
            }
            SyncStep::Failed => {}
        }
        emissions
    }

    pub fn fail(&mut self, reason: &str) -> SyncProgress {
        self.progress.step = SyncStep::Failed;
        self.progress.message = reason.to_string();
        self.publish()
    }

    pub fn record_batch(&mut self, operations: usize) {
        self.batches_applied += 1;
        self.operations_applied += operations;
    }

    pub fn record_dropped(&mut self, count: usize) {
        self.operations_dropped += count;
    }

    /// Log progress every 1000 blocks or when forced
    pub fn log_progress(&mut self, force: bool) {
        let last = self.progress.last_block_processed.unwrap_or(self.start_block);
        let blocks_since_last_log = last.saturating_sub(self.last_logged_block);

        if force || blocks_since_last_log >= 1000 {
            info!(
                "Sync progress: {} at block {} ({:.1}%), {} batches / {} operations applied, {} dropped",
                self.progress.step,
                last,
                self.progress.percentage,
                self.batches_applied,
                self.operations_applied,
                self.operations_dropped
            );
            self.last_logged_block = last;
        }
    }

    pub fn get_stats(&self) -> SyncStats {
        SyncStats {
            start_block: self.start_block,
            last_block_processed: self.progress.last_block_processed,
            step: self.progress.step,
            batches_applied: self.batches_applied,
            operations_applied: self.operations_applied,
            operations_dropped: self.operations_dropped,
        }
    }

    fn reached_target(&self) -> bool {
        self.progress
            .last_block_processed
            .is_some_and(|last| last >= self.progress.target_block)
    }

    fn percentage(&self) -> f64 {
        let target = self.progress.target_block;
        match self.progress.last_block_processed {
            Some(last) if target > self.start_block => {
                let done = last.saturating_sub(self.start_block) as f64;
                let total = (target - self.start_block) as f64;
                (done / total * 100.0).clamp(0.0, 100.0)
            }
            _ => 0.0,
        }
    }

    fn transition(&mut self, step: SyncStep, emissions: &mut Vec<SyncProgress>) {
        self.progress.step = step;
        self.progress.message = match step {
            SyncStep::SnapshotApplying => "History retrieved, applying".to_string(),
            SyncStep::Live => format!("Live from block {}", self.progress.target_block),
            _ => self.progress.message.clone(),
        };
        emissions.push(self.publish());
    }

    fn enter_live(&mut self, emissions: &mut Vec<SyncProgress>) {
        self.progress.percentage = 100.0;
        self.transition(SyncStep::Live, emissions);
    }

    fn publish(&self) -> SyncProgress {
        self.sender.send_replace(self.progress.clone());
        self.progress.clone()
    }
}

/// Statistics about the sync session
#[derive(Debug, Clone)]
pub struct SyncStats {
    pub start_block: u64,
    pub last_block_processed: Option<u64>,
    pub step: SyncStep,
    pub batches_applied: usize,
    pub operations_applied: usize,
    pub operations_dropped: usize,
}

impl SyncStats {
    /// Get a human-readable summary of the sync statistics
    pub fn summary(&self) -> String {
        format!(
            "Sync from block {} to {}: {} batches, {} operations applied, {} dropped ({})",
            self.start_block,
            self.last_block_processed
                .map_or_else(|| "-".to_string(), |b| b.to_string()),
            self.batches_applied,
            self.operations_applied,
            self.operations_dropped,
            self.step
        )
    }
}
