//! In-crate test collaborators: fixture tables, log builders, and mock ledger, snapshot and
//! schema sources.

use crate::codec::{Value, encode_field, encode_key_tuple, encode_record_values, entity_key};
use crate::error::SyncError;
use crate::ledger::{
    HeadStream, LedgerClient, LedgerError, RawLog, StoreEventArgs, StoreEventKind,
    encode_store_event_args,
};
use crate::schema::{
    FieldDef, ResolverError, SchemaResolver, TableId, TableSchema, encode_schema,
};
use crate::snapshot::{Snapshot, SnapshotError, SnapshotRecord, SnapshotRequest, SnapshotSource};
use crate::sync::events::{SyncEvent, SyncEventHandler};
use crate::sync::operations::{OperationKind, StoreOperation};
use alloy_primitives::{Address, Bytes, keccak256};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// ABI data of a deployed `StoreSetField` log: `Inventory` key
/// `(0x796e…87F60, 1, 1)`, field 0 set to `0x00000008`
pub const INVENTORY_SET_FIELD_DATA: &str = concat!(
    "0x",
    "00000000000000000000000000000000496e76656e746f727900000000000000",
    "0000000000000000000000000000000000000000000000000000000000000080",
    "0000000000000000000000000000000000000000000000000000000000000000",
    "0000000000000000000000000000000000000000000000000000000000000100",
    "0000000000000000000000000000000000000000000000000000000000000003",
    "000000000000000000000000796eb990a3f9c431c69149c7a168b91596d87f60",
    "0000000000000000000000000000000000000000000000000000000000000001",
    "0000000000000000000000000000000000000000000000000000000000000001",
    "0000000000000000000000000000000000000000000000000000000000000004",
    "0000000800000000000000000000000000000000000000000000000000000000",
);

fn ty(name: &str) -> crate::schema::SchemaType {
    name.parse().unwrap()
}

/// `Inventory(owner address, item uint32, itemVariant uint32) -> (amount uint32)`
pub fn inventory_schema() -> TableSchema {
    TableSchema::new(
        TableId::new("", "Inventory").unwrap(),
        vec![
            FieldDef::new("owner", ty("address")),
            FieldDef::new("item", ty("uint32")),
            FieldDef::new("itemVariant", ty("uint32")),
        ],
        vec![FieldDef::new("amount", ty("uint32"))],
    )
    .unwrap()
}

/// `Profile(id bytes32) -> (level uint32, name string)`
pub fn profile_schema() -> TableSchema {
    TableSchema::new(
        TableId::new("", "Profile").unwrap(),
        vec![FieldDef::new("id", ty("bytes32"))],
        vec![
            FieldDef::new("level", ty("uint32")),
            FieldDef::new("name", ty("string")),
        ],
    )
    .unwrap()
}

pub fn profile_values(level: u64, name: &str) -> Vec<Value> {
    vec![Value::uint(level), Value::from(name)]
}

fn store_log(
    kind: StoreEventKind,
    schema: &TableSchema,
    key: &[Value],
    schema_index: Option<u8>,
    data: Vec<u8>,
    block_number: u64,
    log_index: u64,
) -> RawLog {
    let args = StoreEventArgs {
        table: *schema.table_id.as_bytes(),
        key: encode_key_tuple(schema, key).unwrap(),
        schema_index,
        data,
    };
    RawLog {
        address: Address::ZERO,
        topics: vec![kind.topic()],
        data: encode_store_event_args(kind, &args),
        block_number,
        block_hash: None,
        log_index,
        transaction_hash: None,
        transaction_index: None,
        removed: false,
        event_name: None,
        args: None,
    }
}

pub fn set_record_log(
    schema: &TableSchema,
    key: &[Value],
    values: &[Value],
    block_number: u64,
    log_index: u64,
) -> RawLog {
    let data = encode_record_values(schema, values).unwrap();
    store_log(StoreEventKind::SetRecord, schema, key, None, data, block_number, log_index)
}

pub fn ephemeral_record_log(
    schema: &TableSchema,
    key: &[Value],
    values: &[Value],
    block_number: u64,
    log_index: u64,
) -> RawLog {
    let data = encode_record_values(schema, values).unwrap();
    store_log(StoreEventKind::EphemeralRecord, schema, key, None, data, block_number, log_index)
}

pub fn delete_record_log(schema: &TableSchema, key: &[Value], block_number: u64, log_index: u64) -> RawLog {
    store_log(StoreEventKind::DeleteRecord, schema, key, None, Vec::new(), block_number, log_index)
}

pub fn set_field_log(
    schema: &TableSchema,
    key: &[Value],
    field_index: u8,
    value: &Value,
    block_number: u64,
    log_index: u64,
) -> RawLog {
    let field = schema.value_field(field_index as usize).unwrap();
    let data = encode_field(value, &field.ty).unwrap();
    store_log(
        StoreEventKind::SetField,
        schema,
        key,
        Some(field_index),
        data,
        block_number,
        log_index,
    )
}

pub fn snapshot_record(schema: &TableSchema, key: &[Value], values: &[Value]) -> SnapshotRecord {
    SnapshotRecord {
        table_id: schema.table_id,
        key_tuple: encode_key_tuple(schema, key).unwrap(),
        data: Bytes::from(encode_record_values(schema, values).unwrap()),
    }
}

fn operation(schema: TableSchema, block_number: u64, log_index: u64, key: &[Value], kind: OperationKind) -> StoreOperation {
    StoreOperation {
        block_number,
        log_index,
        entity: entity_key(&schema, key).unwrap(),
        key: key.to_vec(),
        table: Arc::new(schema),
        kind,
    }
}

/// SetField of `amount`, or DeleteRecord when `amount` is `None`
pub fn inventory_operation(block_number: u64, log_index: u64, key: &[Value], amount: Option<u64>) -> StoreOperation {
    let kind = match amount {
        Some(amount) => OperationKind::SetField {
            field_name: "amount".to_string(),
            value: Value::uint(amount),
        },
        None => OperationKind::DeleteRecord,
    };
    operation(inventory_schema(), block_number, log_index, key, kind)
}

/// SetRecord of `(level, name)`, or DeleteRecord when `record` is `None`
pub fn profile_operation(
    block_number: u64,
    log_index: u64,
    key: &[Value],
    record: Option<(u64, &str)>,
) -> StoreOperation {
    let kind = match record {
        Some((level, name)) => OperationKind::SetRecord {
            values: [
                ("level".to_string(), Value::uint(level)),
                ("name".to_string(), Value::from(name)),
            ]
            .into_iter()
            .collect(),
        },
        None => OperationKind::DeleteRecord,
    };
    operation(profile_schema(), block_number, log_index, key, kind)
}

/// Resolver over fixed schemas that counts its lookups
pub struct CountingResolver {
    schemas: HashMap<TableId, TableSchema>,
    delay: Duration,
    calls: AtomicUsize,
    registered: Mutex<Vec<TableId>>,
}

impl CountingResolver {
    pub fn new(schemas: impl IntoIterator<Item = TableSchema>) -> Self {
        Self {
            schemas: schemas.into_iter().map(|s| (s.table_id, s)).collect(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            registered: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay = Duration::from_millis(delay_ms);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn registered(&self) -> Vec<TableId> {
        self.registered.lock().unwrap().clone()
    }
}

#[async_trait]
impl SchemaResolver for CountingResolver {
    async fn get_tables(&self, table_ids: &[TableId]) -> Result<Vec<TableSchema>, ResolverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(table_ids
            .iter()
            .filter_map(|id| self.schemas.get(id).cloned())
            .collect())
    }

    async fn register_tables(&self, table_ids: &[TableId]) -> Result<(), ResolverError> {
        self.registered.lock().unwrap().extend_from_slice(table_ids);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "CountingResolver"
    }
}

/// Ledger holding a fixed log set, with heads announced by the test
pub struct MockLedger {
    head: AtomicU64,
    logs: Mutex<Vec<RawLog>>,
    failing_get_logs: AtomicUsize,
    heads: mpsc::UnboundedSender<u64>,
    head_receiver: Mutex<Option<mpsc::UnboundedReceiver<u64>>>,
    call_responses: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MockLedger {
    pub fn new(head: u64) -> Self {
        let (heads, head_receiver) = mpsc::unbounded_channel();
        Self {
            head: AtomicU64::new(head),
            logs: Mutex::new(Vec::new()),
            failing_get_logs: AtomicUsize::new(0),
            heads,
            head_receiver: Mutex::new(Some(head_receiver)),
            call_responses: Mutex::new(HashMap::new()),
        }
    }

    /// Answer `getKeySchema`/`getValueSchema` calls for `schema`; other calls return a zero word.
    pub fn respond_to_schema_calls(&self, schema: &TableSchema) {
        let types = |fields: &[FieldDef]| fields.iter().map(|f| f.ty.clone()).collect::<Vec<_>>();
        let words = [
            ("getKeySchema(bytes32)", encode_schema(&types(&schema.key_schema)).unwrap()),
            ("getValueSchema(bytes32)", encode_schema(&types(&schema.value_schema)).unwrap()),
        ];
        let mut responses = self.call_responses.lock().unwrap();
        for (signature, word) in words {
            let mut data = keccak256(signature)[..4].to_vec();
            data.extend_from_slice(schema.table_id.as_bytes().as_slice());
            responses.insert(data, word.to_vec());
        }
    }

    pub fn push_log(&self, log: RawLog) {
        self.logs.lock().unwrap().push(log);
    }

    /// Fail the next `count` log requests; `usize::MAX` fails them all.
    pub fn fail_get_logs(&self, count: usize) {
        self.failing_get_logs.store(count, Ordering::SeqCst);
    }

    /// Move the head to `head` and announce it to the head subscription.
    pub async fn announce_head(&self, head: u64) {
        self.head.fetch_max(head, Ordering::SeqCst);
        let _ = self.heads.send(head);
        tokio::task::yield_now().await;
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn block_number(&self) -> Result<u64, LedgerError> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn get_logs(
        &self,
        _address: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, LedgerError> {
        let failing = self.failing_get_logs.load(Ordering::SeqCst);
        if failing > 0 {
            if failing != usize::MAX {
                self.failing_get_logs.fetch_sub(1, Ordering::SeqCst);
            }
            return Err(LedgerError::Rpc {
                code: -32005,
                message: "query returned more than 10000 results".to_string(),
            });
        }

        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| log.block_number >= from_block && log.block_number <= to_block)
            .cloned()
            .collect())
    }

    async fn subscribe_heads(&self) -> Result<HeadStream, LedgerError> {
        match self.head_receiver.lock().unwrap().take() {
            Some(receiver) => Ok(UnboundedReceiverStream::new(receiver)
                .map(Ok::<u64, LedgerError>)
                .boxed()),
            None => Ok(futures::stream::pending::<Result<u64, LedgerError>>().boxed()),
        }
    }

    async fn call(&self, _to: Address, data: Vec<u8>) -> Result<Vec<u8>, LedgerError> {
        Ok(self
            .call_responses
            .lock()
            .unwrap()
            .get(&data)
            .cloned()
            .unwrap_or_else(|| vec![0; 32]))
    }
}

/// Snapshot source that either always fails or serves fixed records
pub struct MockSnapshotSource {
    snapshot: Option<Snapshot>,
    calls: AtomicUsize,
}

impl MockSnapshotSource {
    pub fn failing() -> Self {
        Self {
            snapshot: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn records(block_number: u64, tables: Vec<TableSchema>, records: Vec<SnapshotRecord>) -> Self {
        Self {
            snapshot: Some(Snapshot::Records {
                block_number,
                tables,
                records,
            }),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotSource for MockSnapshotSource {
    async fn fetch_snapshot(&self, _request: &SnapshotRequest) -> Result<Snapshot, SnapshotError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.snapshot
            .clone()
            .ok_or_else(|| SnapshotError::Unavailable("indexer offline".to_string()))
    }

    fn name(&self) -> &'static str {
        "MockSnapshotSource"
    }
}

/// Handler that records every event it sees
#[derive(Default, Clone)]
pub struct CollectingHandler {
    events: Arc<Mutex<Vec<SyncEvent>>>,
}

impl CollectingHandler {
    pub fn events(&self) -> Arc<Mutex<Vec<SyncEvent>>> {
        self.events.clone()
    }
}

#[async_trait]
impl SyncEventHandler for CollectingHandler {
    async fn handle(&mut self, event: &SyncEvent) -> Result<(), SyncError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "CollectingHandler"
    }
}
