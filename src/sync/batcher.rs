//! Operation batching.
//!
//! Groups raw logs by block, resolves the schemas they reference and decodes
//! them into one [`BlockBatch`] per block. Operations that cannot be decoded
//! are reported next to the batch instead of failing the block.

use super::decoder::{DecodeError, StoreLog, decode_store_log};
use super::operations::{BlockBatch, StoreOperation};
use crate::ledger::{RawLog, StoreEventArgs, StoreEventKind};
use crate::schema::{SchemaNotFound, SchemaRegistry, TableId};
use crate::snapshot::SnapshotRecord;
use futures::future::join_all;
use itertools::Itertools;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    SchemaNotFound(SchemaNotFound),
    Decode(DecodeError),
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::SchemaNotFound(e) => write!(f, "{}", e),
            DropReason::Decode(e) => write!(f, "{}", e),
        }
    }
}

/// A store log that was not turned into an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedOperation {
    pub table_id: Option<TableId>,
    pub block_number: u64,
    pub log_index: u64,
    pub reason: DropReason,
}

impl From<DecodeError> for DroppedOperation {
    fn from(error: DecodeError) -> Self {
        Self {
            table_id: error.table_id,
            block_number: error.block_number,
            log_index: error.log_index,
            reason: DropReason::Decode(error),
        }
    }
}

/// The decoded operations of one block plus whatever had to be dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBlock {
    pub batch: BlockBatch,
    pub dropped: Vec<DroppedOperation>,
}

impl DecodedBlock {
    pub fn empty(block_number: u64) -> Self {
        Self {
            batch: BlockBatch::new(block_number),
            dropped: Vec::new(),
        }
    }

    pub fn block_number(&self) -> u64 {
        self.batch.block_number
    }
}

pub struct OperationBatcher {
    registry: Arc<SchemaRegistry>,
}

impl OperationBatcher {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Decode `logs` into one entry per block that carried at least one store
    /// log, ascending by block number.
    pub async fn batch_logs(&self, mut logs: Vec<RawLog>) -> Vec<DecodedBlock> {
        logs.sort_by_key(|log| (log.block_number, log.log_index));

        let mut grouped = Vec::new();
        for (block_number, group) in &logs.into_iter().group_by(|log| log.block_number) {
            grouped.push((block_number, group.collect::<Vec<_>>()));
        }

        let mut blocks = Vec::with_capacity(grouped.len());
        for (block_number, logs) in grouped {
            let store_logs = logs.iter().filter_map(StoreLog::from_raw).collect::<Vec<_>>();
            if store_logs.is_empty() {
                continue;
            }
            blocks.push(self.decode_block(block_number, store_logs).await);
        }
        blocks
    }

    /// Turn snapshot records into a single block of SetRecord operations at
    /// the snapshot's block number; record position stands in for log index.
    pub async fn batch_snapshot(&self, block_number: u64, records: &[SnapshotRecord]) -> DecodedBlock {
        let store_logs = records
            .iter()
            .enumerate()
            .map(|(position, record)| {
                Ok(StoreLog {
                    kind: StoreEventKind::SetRecord,
                    table_id: record.table_id,
                    args: StoreEventArgs {
                        table: *record.table_id.as_bytes(),
                        key: record.key_tuple.clone(),
                        schema_index: None,
                        data: record.data.to_vec(),
                    },
                    block_number,
                    log_index: position as u64,
                })
            })
            .collect();

        self.decode_block(block_number, store_logs).await
    }

    async fn decode_block(
        &self,
        block_number: u64,
        logs: Vec<Result<StoreLog, DecodeError>>,
    ) -> DecodedBlock {
        // Every lookup runs concurrently; join_all keeps log order.
        let decoded = join_all(logs.into_iter().map(|log| self.decode_one(log))).await;

        let mut block = DecodedBlock::empty(block_number);
        for result in decoded {
            match result {
                Ok(operation) => block.batch.operations.push(operation),
                Err(dropped) => {
                    warn!(
                        "Dropping log {} of block {}: {}",
                        dropped.log_index, dropped.block_number, dropped.reason
                    );
                    block.dropped.push(dropped);
                }
            }
        }

        debug!(
            "Decoded block {}: {} operation(s), {} dropped",
            block_number,
            block.batch.len(),
            block.dropped.len()
        );
        block
    }

    async fn decode_one(
        &self,
        log: Result<StoreLog, DecodeError>,
    ) -> Result<StoreOperation, DroppedOperation> {
        let log = log?;
        let schema = self
            .registry
            .resolve(log.table_id)
            .await
            .map_err(|e| DroppedOperation {
                table_id: Some(log.table_id),
                block_number: log.block_number,
                log_index: log.log_index,
                reason: DropReason::SchemaNotFound(e),
            })?;

        Ok(decode_store_log(&log, &schema)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Value;
    use crate::config::RetryConfig;
    use crate::mock::{self, CountingResolver, inventory_schema, profile_schema};
    use crate::sync::decoder::DecodeCause;
    use crate::sync::retry::RetryPolicy;
    use alloy_primitives::Address;

    fn batcher(resolver: CountingResolver) -> OperationBatcher {
        let policy = RetryPolicy::new(RetryConfig {
            max_attempts: 2,
            initial_interval_ms: 1,
            max_interval_ms: 1,
            multiplier: 1.0,
            request_timeout_ms: 1_000,
        });
        OperationBatcher::new(Arc::new(SchemaRegistry::new(Arc::new(resolver), policy)))
    }

    fn inventory_key(item: u64) -> Vec<Value> {
        vec![Value::Address(Address::repeat_byte(1)), Value::uint(item), Value::uint(0)]
    }

    #[tokio::test]
    async fn groups_by_block_in_log_order() {
        let schema = inventory_schema();
        let logs = vec![
            mock::set_field_log(&schema, &inventory_key(1), 0, &Value::uint(5), 7, 3),
            mock::set_field_log(&schema, &inventory_key(2), 0, &Value::uint(6), 4, 0),
            mock::set_field_log(&schema, &inventory_key(3), 0, &Value::uint(7), 7, 1),
            mock::delete_record_log(&schema, &inventory_key(3), 7, 2),
        ];

        let blocks = batcher(CountingResolver::new([schema])).batch_logs(logs).await;

        assert_eq!(blocks.iter().map(|b| b.block_number()).collect::<Vec<_>>(), vec![4, 7]);
        assert_eq!(
            blocks[1].batch.operations.iter().map(|op| op.log_index).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(blocks.iter().all(|b| b.dropped.is_empty()));
    }

    #[tokio::test]
    async fn drops_only_the_failing_operations() {
        let inventory = inventory_schema();
        let profile = profile_schema();
        let mut bad = mock::set_field_log(&inventory, &inventory_key(1), 0, &Value::uint(1), 9, 1);
        bad.data.truncate(100);

        let logs = vec![
            mock::set_field_log(&inventory, &inventory_key(1), 0, &Value::uint(1), 9, 0),
            bad,
            mock::set_record_log(
                &profile,
                &[Value::FixedBytes(vec![1; 32])],
                &mock::profile_values(1, "dave"),
                9,
                2,
            ),
            mock::set_field_log(&inventory, &inventory_key(2), 0, &Value::uint(2), 9, 3),
        ];

        // profile is unknown to the resolver
        let blocks = batcher(CountingResolver::new([inventory.clone()])).batch_logs(logs).await;
        let block = &blocks[0];

        assert_eq!(
            block.batch.operations.iter().map(|op| op.log_index).collect::<Vec<_>>(),
            vec![0, 3]
        );
        assert_eq!(block.dropped.len(), 2);
        assert!(matches!(
            &block.dropped[0].reason,
            DropReason::Decode(DecodeError { cause: DecodeCause::Abi(_), .. })
        ));
        assert_eq!(block.dropped[1].table_id, Some(profile.table_id));
        assert!(matches!(block.dropped[1].reason, DropReason::SchemaNotFound(_)));
    }

    #[tokio::test]
    async fn ignores_foreign_logs() {
        let schema = inventory_schema();
        let mut foreign = mock::set_field_log(&schema, &inventory_key(1), 0, &Value::uint(1), 3, 0);
        foreign.topics = vec![alloy_primitives::B256::repeat_byte(0xaa)];

        let blocks = batcher(CountingResolver::new([schema])).batch_logs(vec![foreign]).await;
        assert!(blocks.is_empty());
    }

    #[tokio::test]
    async fn snapshot_records_become_one_block() {
        let schema = inventory_schema();
        let records = vec![
            mock::snapshot_record(&schema, &inventory_key(1), &[Value::uint(10)]),
            mock::snapshot_record(&schema, &inventory_key(2), &[Value::uint(20)]),
        ];

        let block = batcher(CountingResolver::new([schema]))
            .batch_snapshot(50, &records)
            .await;

        assert_eq!(block.block_number(), 50);
        assert_eq!(block.batch.len(), 2);
        assert!(block.batch.operations.iter().all(|op| op.block_number == 50));
        assert_eq!(block.batch.operations[1].log_index, 1);
    }
}
