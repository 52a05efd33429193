//! Collaborators that supply table schemas to the registry.

use super::encoding::decode_schema;
use super::types::{FieldDef, SchemaError, SchemaType, TableId, TableSchema};
use crate::ledger::{LedgerClient, LedgerError};
use alloy_primitives::{Address, B256, keccak256};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    #[error("Table {0} is not registered")]
    NotFound(TableId),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Resolver state is poisoned")]
    Poisoned,
}

/// Source of table schemas
#[async_trait]
pub trait SchemaResolver: Send + Sync {
    /// Schemas for the given tables; tables the resolver does not know are omitted.
    async fn get_tables(&self, table_ids: &[TableId]) -> Result<Vec<TableSchema>, ResolverError>;

    /// Tell the resolver about tables seen by the session.
    async fn register_tables(&self, table_ids: &[TableId]) -> Result<(), ResolverError>;

    fn name(&self) -> &'static str;
}

/// In-memory resolver over a fixed set of schemas
#[derive(Debug, Default)]
pub struct StaticSchemaResolver {
    schemas: RwLock<HashMap<TableId, TableSchema>>,
}

impl StaticSchemaResolver {
    pub fn new(schemas: impl IntoIterator<Item = TableSchema>) -> Self {
        Self {
            schemas: RwLock::new(schemas.into_iter().map(|s| (s.table_id, s)).collect()),
        }
    }

    pub fn insert(&self, schema: TableSchema) -> Result<(), ResolverError> {
        self.schemas
            .write()
            .map_err(|_| ResolverError::Poisoned)?
            .insert(schema.table_id, schema);
        Ok(())
    }
}

#[async_trait]
impl SchemaResolver for StaticSchemaResolver {
    async fn get_tables(&self, table_ids: &[TableId]) -> Result<Vec<TableSchema>, ResolverError> {
        let schemas = self.schemas.read().map_err(|_| ResolverError::Poisoned)?;
        Ok(table_ids
            .iter()
            .filter_map(|id| schemas.get(id).cloned())
            .collect())
    }

    async fn register_tables(&self, table_ids: &[TableId]) -> Result<(), ResolverError> {
        debug!("Static resolver notified of {} table(s)", table_ids.len());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "StaticSchemaResolver"
    }
}

/// Resolver that reads schemas from the store contract.
///
/// Calls `getKeySchema(bytes32)` and `getValueSchema(bytes32)` and decodes the
/// returned bytes32 schema words. The contract only knows field types, so
/// field names come from [`RpcSchemaResolver::with_field_names`] when known
/// and are positional (`key0`, `field0`, ...) otherwise.
pub struct RpcSchemaResolver {
    client: Arc<dyn LedgerClient>,
    store_address: Address,
    field_names: HashMap<TableId, (Vec<String>, Vec<String>)>,
}

impl RpcSchemaResolver {
    pub fn new(client: Arc<dyn LedgerClient>, store_address: Address) -> Self {
        Self {
            client,
            store_address,
            field_names: HashMap::new(),
        }
    }

    pub fn with_field_names(
        mut self,
        table_id: TableId,
        key_names: Vec<String>,
        value_names: Vec<String>,
    ) -> Self {
        self.field_names.insert(table_id, (key_names, value_names));
        self
    }

    async fn read_schema_word(&self, signature: &str, table_id: TableId) -> Result<B256, ResolverError> {
        let mut data = keccak256(signature)[..4].to_vec();
        data.extend_from_slice(table_id.as_bytes().as_slice());
        let output = self.client.call(self.store_address, data).await?;
        if output.len() < 32 {
            return Err(LedgerError::InvalidResponse(format!(
                "{} returned {} bytes",
                signature,
                output.len()
            ))
            .into());
        }
        Ok(B256::from_slice(&output[..32]))
    }

    fn fields(types: Vec<SchemaType>, names: Option<&Vec<String>>, prefix: &str) -> Vec<FieldDef> {
        types
            .into_iter()
            .enumerate()
            .map(|(i, ty)| {
                let name = names
                    .and_then(|names| names.get(i).cloned())
                    .unwrap_or_else(|| format!("{}{}", prefix, i));
                FieldDef::new(name, ty)
            })
            .collect()
    }
}

#[async_trait]
impl SchemaResolver for RpcSchemaResolver {
    async fn get_tables(&self, table_ids: &[TableId]) -> Result<Vec<TableSchema>, ResolverError> {
        let mut schemas = Vec::with_capacity(table_ids.len());
        for table_id in table_ids {
            let value_word = self.read_schema_word("getValueSchema(bytes32)", *table_id).await?;
            if value_word == B256::ZERO {
                debug!("Table {} has no value schema on chain", table_id);
                continue;
            }
            let key_word = self.read_schema_word("getKeySchema(bytes32)", *table_id).await?;

            let names = self.field_names.get(table_id);
            let schema = TableSchema::new(
                *table_id,
                Self::fields(decode_schema(&key_word)?, names.map(|n| &n.0), "key"),
                Self::fields(decode_schema(&value_word)?, names.map(|n| &n.1), "field"),
            )?;
            schemas.push(schema);
        }
        Ok(schemas)
    }

    async fn register_tables(&self, table_ids: &[TableId]) -> Result<(), ResolverError> {
        debug!("RPC resolver notified of {} table(s)", table_ids.len());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "RpcSchemaResolver"
    }
}
