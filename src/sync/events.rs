//! Event system for store synchronization.
//!
//! This module defines the events a sync session emits, the handler trait consumers implement,
//! and the dispatcher that fans events out to every registered handler. Events decouple the
//! session from whatever observes it: progress reporting, dropped-operation telemetry and
//! failure notification are all handled by registered handlers.

use super::batcher::{DecodedBlock, DroppedOperation};
use super::progress_tracker::SyncProgress;
use crate::error::SyncError;

/// Events that occur during store synchronization
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// The session's progress snapshot changed
    ProgressChanged(SyncProgress),
    /// A block batch was applied to every storage adapter
    BlockApplied { block_number: u64, operations: usize },
    /// A log could not be decoded into an operation
    OperationDropped(DroppedOperation),
    /// The snapshot source failed and history is fetched by range instead
    SnapshotFallback { reason: String },
    /// The session reached its exit block
    SessionCompleted { last_applied_block: Option<u64> },
    /// The session halted
    SessionFailed {
        reason: String,
        last_applied_block: Option<u64>,
    },
}

/// Trait for handling sync events.
///
/// Implementors receive all sync events and can perform side effects or state updates.
#[async_trait::async_trait]
pub trait SyncEventHandler: Send + Sync {
    /// Handle a sync event.
    async fn handle(&mut self, event: &SyncEvent) -> Result<(), SyncError>;

    /// Get the name of this handler for logging and diagnostics.
    fn name(&self) -> &'static str;
}

/// Event dispatcher that manages multiple event handlers.
///
/// Handlers are called in registration order for every event.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Box<dyn SyncEventHandler>>,
}

impl EventDispatcher {
    /// Create a new, empty event dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new event handler.
    pub fn register_handler(&mut self, handler: Box<dyn SyncEventHandler>) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Dispatch an event to all registered handlers.
    ///
    /// Errors from handlers are logged, but do not stop other handlers from running.
    pub async fn dispatch(&mut self, event: &SyncEvent) {
        for handler in &mut self.handlers {
            if let Err(e) = handler.handle(event).await {
                tracing::error!("Handler {} failed to process event: {}", handler.name(), e);
            }
        }
    }
}

/// Handler that forwards every progress snapshot to a callback.
pub struct ProgressCallback<F> {
    callback: F,
}

impl<F> ProgressCallback<F>
where
    F: FnMut(&SyncProgress) + Send + Sync + 'static,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

#[async_trait::async_trait]
impl<F> SyncEventHandler for ProgressCallback<F>
where
    F: FnMut(&SyncProgress) + Send + Sync + 'static,
{
    async fn handle(&mut self, event: &SyncEvent) -> Result<(), SyncError> {
        if let SyncEvent::ProgressChanged(progress) = event {
            (self.callback)(progress);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ProgressCallback"
    }
}

/// Convert the drops recorded on a decoded block into sync events.
pub fn convert_decoded_block(block: &DecodedBlock) -> Vec<SyncEvent> {
    block
        .dropped
        .iter()
        .cloned()
        .map(SyncEvent::OperationDropped)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::CollectingHandler;
    use crate::sync::progress_tracker::SyncStep;
    use std::sync::{Arc, Mutex};

    struct FailingHandler;

    #[async_trait::async_trait]
    impl SyncEventHandler for FailingHandler {
        async fn handle(&mut self, _event: &SyncEvent) -> Result<(), SyncError> {
            Err(SyncError::Handler("always fails".to_string()))
        }

        fn name(&self) -> &'static str {
            "FailingHandler"
        }
    }

    #[tokio::test]
    async fn handler_errors_do_not_stop_dispatch() {
        let collector = CollectingHandler::default();
        let events = collector.events();

        let mut dispatcher = EventDispatcher::new();
        dispatcher.register_handler(Box::new(FailingHandler));
        dispatcher.register_handler(Box::new(collector));
        dispatcher
            .dispatch(&SyncEvent::SnapshotFallback {
                reason: "offline".to_string(),
            })
            .await;

        assert_eq!(dispatcher.len(), 2);
        assert!(matches!(
            events.lock().unwrap().as_slice(),
            [SyncEvent::SnapshotFallback { .. }]
        ));
    }

    #[tokio::test]
    async fn progress_callback_sees_only_progress() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register_handler(Box::new(ProgressCallback::new(move |p: &SyncProgress| {
            sink.lock().unwrap().push(p.step);
        })));

        dispatcher
            .dispatch(&SyncEvent::BlockApplied {
                block_number: 1,
                operations: 2,
            })
            .await;
        dispatcher
            .dispatch(&SyncEvent::ProgressChanged(SyncProgress::initial(0, 10)))
            .await;

        assert_eq!(*seen.lock().unwrap(), vec![SyncStep::SnapshotFetching]);
    }
}
