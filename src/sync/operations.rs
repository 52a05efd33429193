//! Store operations and the block batches that carry them to storage adapters.

use crate::codec::{EntityKey, Value};
use crate::schema::{TableId, TableSchema};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Decoded key tuple in key-schema order
pub type KeyTuple = Vec<Value>;

/// Value fields of a record by name
pub type RecordValues = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum OperationKind {
    SetRecord { values: RecordValues },
    SetField { field_name: String, value: Value },
    DeleteRecord,
    /// Forwarded to live subscribers only, never stored
    EphemeralRecord { values: RecordValues },
}

impl OperationKind {
    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::SetRecord { .. } => "SetRecord",
            OperationKind::SetField { .. } => "SetField",
            OperationKind::DeleteRecord => "DeleteRecord",
            OperationKind::EphemeralRecord { .. } => "EphemeralRecord",
        }
    }
}

/// One typed mutation of one record.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreOperation {
    pub block_number: u64,
    pub log_index: u64,
    pub table: Arc<TableSchema>,
    pub key: KeyTuple,
    pub entity: EntityKey,
    pub kind: OperationKind,
}

impl StoreOperation {
    pub fn table_id(&self) -> TableId {
        self.table.table_id
    }

    pub fn is_ephemeral(&self) -> bool {
        matches!(self.kind, OperationKind::EphemeralRecord { .. })
    }
}

/// All operations of one block in ascending log order.
///
/// Storage adapters apply a batch as a single visible unit.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockBatch {
    pub block_number: u64,
    pub operations: Vec<StoreOperation>,
}

impl BlockBatch {
    pub fn new(block_number: u64) -> Self {
        Self {
            block_number,
            operations: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }
}

/// Current state of one record.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub table: TableId,
    pub key: KeyTuple,
    pub entity: EntityKey,
    pub values: RecordValues,
}

impl Record {
    /// A record whose value fields all hold their type's default.
    pub fn with_defaults(schema: &TableSchema, key: KeyTuple, entity: EntityKey) -> Self {
        let values = schema
            .value_schema
            .iter()
            .map(|field| (field.name.clone(), Value::default_for(&field.ty)))
            .collect();
        Self {
            table: schema.table_id,
            key,
            entity,
            values,
        }
    }

    /// A record holding `values`, with any field they omit defaulted.
    pub fn from_values(
        schema: &TableSchema,
        key: KeyTuple,
        entity: EntityKey,
        values: &RecordValues,
    ) -> Self {
        let mut record = Self::with_defaults(schema, key, entity);
        for (name, value) in values {
            record.values.insert(name.clone(), value.clone());
        }
        record
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::inventory_schema;

    #[test]
    fn defaults_cover_every_value_field() {
        let schema = inventory_schema();
        let record = Record::with_defaults(&schema, vec![], EntityKey::default());
        assert_eq!(record.values.len(), schema.value_schema.len());
        assert_eq!(record.get("amount"), Some(&Value::uint(0)));
    }
}
