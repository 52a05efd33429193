//! In-memory reactive table store.
//!
//! Records live in one map keyed by table and entity key. A batch is first
//! staged against the current state, then committed under the write lock; the
//! change notification for the batch is sent while that lock is still held, so
//! a reader that takes a snapshot and a subscription under the read lock sees
//! every batch exactly once.

use super::{OperationHook, StorageAdapter, StorageError};
use crate::codec::{EntityKey, Value, entity_key};
use crate::schema::{TableId, TableSchema};
use crate::sync::operations::{BlockBatch, OperationKind, Record};
use async_trait::async_trait;
use futures::Stream;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

const UPDATE_CHANNEL_CAPACITY: usize = 1024;

type Slot = (TableId, EntityKey);

/// Change to one record within a committed block
#[derive(Debug, Clone, PartialEq)]
pub struct RecordUpdate {
    pub table: TableId,
    pub entity: EntityKey,
    pub previous: Option<Record>,
    pub current: Option<Record>,
    /// Ephemeral updates were never stored; `current` is the emitted record
    pub ephemeral: bool,
}

/// Every record change of one committed block
#[derive(Debug, Clone, PartialEq)]
pub struct BlockUpdate {
    pub block_number: u64,
    pub updates: Vec<RecordUpdate>,
}

/// Changes to one table within one block
#[derive(Debug, Clone, PartialEq)]
pub struct TableUpdate {
    pub block_number: u64,
    pub updates: Vec<RecordUpdate>,
}

#[derive(Default)]
struct StoreState {
    records: HashMap<Slot, Record>,
    last_applied_block: Option<u64>,
}

pub struct ReactiveTableStore {
    state: RwLock<StoreState>,
    updates: broadcast::Sender<Arc<BlockUpdate>>,
    hook: Option<OperationHook>,
}

impl Default for ReactiveTableStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ReactiveTableStore {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(StoreState::default()),
            updates,
            hook: None,
        }
    }

    pub fn with_operation_hook(mut self, hook: OperationHook) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn get(&self, table: &TableId, entity: &EntityKey) -> Result<Option<Record>, StorageError> {
        let state = self.state.read().map_err(|_| StorageError::Poisoned)?;
        Ok(state.records.get(&(*table, entity.clone())).cloned())
    }

    pub fn get_by_key(&self, schema: &TableSchema, key: &[Value]) -> Result<Option<Record>, StorageError> {
        let entity = entity_key(schema, key)?;
        self.get(&schema.table_id, &entity)
    }

    /// Current records of `table`, ordered by entity key.
    pub fn records(&self, table: &TableId) -> Result<Vec<Record>, StorageError> {
        let state = self.state.read().map_err(|_| StorageError::Poisoned)?;
        Ok(Self::table_records(&state, table))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<BlockUpdate>> {
        self.updates.subscribe()
    }

    pub fn subscribe_table(&self, table: TableId) -> TableSubscription {
        TableSubscription {
            table,
            receiver: self.updates.subscribe(),
        }
    }

    /// Current records of `table` plus a subscription starting right after them.
    pub fn subscribe_with_snapshot(
        &self,
        table: TableId,
    ) -> Result<(Vec<Record>, TableSubscription), StorageError> {
        let state = self.state.read().map_err(|_| StorageError::Poisoned)?;
        let records = Self::table_records(&state, &table);
        let subscription = self.subscribe_table(table);
        drop(state);
        Ok((records, subscription))
    }

    /// Block updates as a stream; lagging consumers skip what they missed.
    pub fn updates_stream(&self) -> impl Stream<Item = Arc<BlockUpdate>> + Send + 'static {
        BroadcastStream::new(self.updates.subscribe()).filter_map(|update| async move {
            match update {
                Ok(update) => Some(update),
                Err(e) => {
                    warn!("Block update stream lagged: {}", e);
                    None
                }
            }
        })
    }

    fn table_records(state: &StoreState, table: &TableId) -> Vec<Record> {
        let mut records = state
            .records
            .iter()
            .filter(|((t, _), _)| t == table)
            .map(|(_, record)| record.clone())
            .collect::<Vec<_>>();
        records.sort_by(|a, b| a.entity.cmp(&b.entity));
        records
    }

    /// Run `batch` against the current state without touching it.
    fn stage(
        &self,
        state: &StoreState,
        batch: &BlockBatch,
    ) -> Result<(HashMap<Slot, Option<Record>>, Vec<RecordUpdate>), StorageError> {
        let mut overlay: HashMap<Slot, Option<Record>> = HashMap::new();
        let mut updates = Vec::new();

        for op in &batch.operations {
            if let Some(hook) = &self.hook {
                hook(op)?;
            }

            let slot = (op.table_id(), op.entity.clone());
            let previous = match overlay.get(&slot) {
                Some(staged) => staged.clone(),
                None => state.records.get(&slot).cloned(),
            };

            let current = match &op.kind {
                OperationKind::SetRecord { values } => Some(Record::from_values(
                    &op.table,
                    op.key.clone(),
                    op.entity.clone(),
                    values,
                )),
                OperationKind::SetField { field_name, value } => {
                    let mut record = previous.clone().unwrap_or_else(|| {
                        Record::with_defaults(&op.table, op.key.clone(), op.entity.clone())
                    });
                    record.values.insert(field_name.clone(), value.clone());
                    Some(record)
                }
                OperationKind::DeleteRecord => None,
                OperationKind::EphemeralRecord { values } => {
                    updates.push(RecordUpdate {
                        table: slot.0,
                        entity: slot.1,
                        previous: previous.clone(),
                        current: Some(Record::from_values(
                            &op.table,
                            op.key.clone(),
                            op.entity.clone(),
                            values,
                        )),
                        ephemeral: true,
                    });
                    continue;
                }
            };

            if previous != current {
                updates.push(RecordUpdate {
                    table: slot.0,
                    entity: slot.1.clone(),
                    previous,
                    current: current.clone(),
                    ephemeral: false,
                });
            }
            overlay.insert(slot, current);
        }

        Ok((overlay, updates))
    }
}

#[async_trait]
impl StorageAdapter for ReactiveTableStore {
    async fn apply_block(&self, batch: &BlockBatch) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| StorageError::Poisoned)?;
        if state
            .last_applied_block
            .is_some_and(|last| batch.block_number <= last)
        {
            debug!("Skipping already applied block {}", batch.block_number);
            return Ok(());
        }
        let (overlay, updates) = self.stage(&state, batch)?;

        for (slot, record) in overlay {
            match record {
                Some(record) => {
                    state.records.insert(slot, record);
                }
                None => {
                    state.records.remove(&slot);
                }
            }
        }
        state.last_applied_block = Some(batch.block_number);

        debug!(
            "Committed block {} with {} record update(s)",
            batch.block_number,
            updates.len()
        );
        if !updates.is_empty() {
            // no receivers is not an error
            let _ = self.updates.send(Arc::new(BlockUpdate {
                block_number: batch.block_number,
                updates,
            }));
        }
        Ok(())
    }

    async fn last_applied_block(&self) -> Result<Option<u64>, StorageError> {
        let state = self.state.read().map_err(|_| StorageError::Poisoned)?;
        Ok(state.last_applied_block)
    }

    fn name(&self) -> &'static str {
        "ReactiveTableStore"
    }
}

/// Updates of a single table
pub struct TableSubscription {
    table: TableId,
    receiver: broadcast::Receiver<Arc<BlockUpdate>>,
}

impl TableSubscription {
    pub fn table(&self) -> TableId {
        self.table
    }

    /// Next block that changed this table; `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<TableUpdate> {
        loop {
            match self.receiver.recv().await {
                Ok(update) => {
                    let updates = update
                        .updates
                        .iter()
                        .filter(|u| u.table == self.table)
                        .cloned()
                        .collect::<Vec<_>>();
                    if !updates.is_empty() {
                        return Some(TableUpdate {
                            block_number: update.block_number,
                            updates,
                        });
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        "Subscription to table {} lagged, skipped {} block update(s)",
                        self.table, skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
