//! SQLite relational indexer.
//!
//! Each source table becomes one SQL table named `<namespace>__<name>` with an
//! `__key` primary key (the entity key), an `__last_block` column and one
//! column per key and value field. Every block is applied inside a single
//! transaction together with the view refresh and the sync state update.

pub mod columns;
pub mod metadata;
pub mod views;

use super::{OperationHook, StorageAdapter, StorageError};
use crate::codec::EntityKey;
use crate::schema::{FieldDef, TableId, TableSchema};
use crate::sync::operations::{BlockBatch, OperationKind, Record, StoreOperation};
use async_trait::async_trait;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, params, params_from_iter};
use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

pub use columns::{ColumnKind, column_kind, from_sql, to_sql};
pub use metadata::INDEXER_SCHEMA_VERSION;
pub use views::ViewDefinition;

/// SQL table holding the records of `table_id`.
pub fn sql_table_name(table_id: &TableId) -> String {
    format!("{}__{}", table_id.namespace(), table_id.name())
}

pub(crate) fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

struct ViewState {
    definition: ViewDefinition,
    materialized: bool,
}

struct IndexerState {
    conn: Connection,
    /// Tables verified or created by this process
    tables: HashMap<TableId, Arc<TableSchema>>,
    views: Vec<ViewState>,
}

pub struct SqliteIndexer {
    state: Mutex<IndexerState>,
    hook: Option<OperationHook>,
}

impl SqliteIndexer {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        info!("Opening relational indexer at {}", path.display());
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        metadata::create_metadata_tables(&conn)?;
        Ok(Self {
            state: Mutex::new(IndexerState {
                conn,
                tables: HashMap::new(),
                views: Vec::new(),
            }),
            hook: None,
        })
    }

    pub fn with_operation_hook(mut self, hook: OperationHook) -> Self {
        self.hook = Some(hook);
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, IndexerState>, StorageError> {
        self.state.lock().map_err(|_| StorageError::Poisoned)
    }

    /// Register a derived view, materializing it right away when its
    /// dependency tables exist.
    pub fn define_view(&self, view: ViewDefinition) -> Result<(), StorageError> {
        view.validate()?;
        let mut state = self.lock()?;
        if state.views.iter().any(|v| v.definition.name == view.name) {
            return Err(StorageError::InvalidView(format!("view {} already exists", view.name)));
        }

        let mut materialized = false;
        if dependencies_exist(&state.conn, &state.tables, &view)? {
            views::materialize(&state.conn, &view)?;
            materialized = true;
        }
        state.views.push(ViewState {
            definition: view,
            materialized,
        });
        Ok(())
    }

    /// Every source table this database holds.
    pub fn tables(&self) -> Result<Vec<TableId>, StorageError> {
        let state = self.lock()?;
        metadata::table_ids(&state.conn)
    }

    /// Current records of a table, ordered by entity key.
    pub fn records(&self, table_id: &TableId) -> Result<Vec<Record>, StorageError> {
        let state = self.lock()?;
        let schema = match state.tables.get(table_id) {
            Some(schema) => schema.clone(),
            None => match metadata::load_table(&state.conn, table_id)? {
                Some(stored) => Arc::new(stored.schema),
                None => return Err(StorageError::UnknownTable(*table_id)),
            },
        };

        let columns = schema
            .key_schema
            .iter()
            .chain(schema.value_schema.iter())
            .map(|field| quote_ident(&field.name))
            .collect::<Vec<_>>();
        let mut stmt = state.conn.prepare(&format!(
            "SELECT __key, {} FROM {} ORDER BY __key",
            columns.join(", "),
            quote_ident(&sql_table_name(table_id))
        ))?;

        let mut rows = stmt.query([])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let entity = EntityKey::from_bytes(row.get::<_, Vec<u8>>(0)?);
            let mut column = 1;
            let mut key = Vec::with_capacity(schema.key_schema.len());
            for field in &schema.key_schema {
                key.push(from_sql(row.get_ref(column)?, &field.ty)?);
                column += 1;
            }
            let mut values = BTreeMap::new();
            for field in &schema.value_schema {
                values.insert(field.name.clone(), from_sql(row.get_ref(column)?, &field.ty)?);
                column += 1;
            }
            records.push(Record {
                table: *table_id,
                key,
                entity,
                values,
            });
        }
        Ok(records)
    }

    /// Rows of a materialized view as JSON objects; blobs render as `0x` hex.
    pub fn view_rows(&self, name: &str) -> Result<Vec<Map<String, JsonValue>>, StorageError> {
        let state = self.lock()?;
        let view = state
            .views
            .iter()
            .find(|v| v.definition.name == name)
            .ok_or_else(|| StorageError::UnknownView(name.to_string()))?;
        if !view.materialized {
            return Ok(Vec::new());
        }

        let mut stmt = state
            .conn
            .prepare(&format!("SELECT * FROM {}", quote_ident(name)))?;
        let names = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();

        let mut rows = stmt.query([])?;
        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let mut object = Map::new();
            for (i, name) in names.iter().enumerate() {
                object.insert(name.clone(), json_cell(row.get_ref(i)?));
            }
            result.push(object);
        }
        Ok(result)
    }
}

fn json_cell(value: ValueRef<'_>) -> JsonValue {
    match value {
        ValueRef::Null => JsonValue::Null,
        ValueRef::Integer(i) => JsonValue::from(i),
        ValueRef::Real(f) => JsonValue::from(f),
        ValueRef::Text(t) => JsonValue::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => JsonValue::String(format!("0x{}", hex::encode(b))),
    }
}

fn table_exists(
    conn: &Connection,
    tables: &HashMap<TableId, Arc<TableSchema>>,
    table_id: &TableId,
) -> Result<bool, StorageError> {
    Ok(tables.contains_key(table_id) || metadata::load_table(conn, table_id)?.is_some())
}

fn dependencies_exist(
    conn: &Connection,
    tables: &HashMap<TableId, Arc<TableSchema>>,
    view: &ViewDefinition,
) -> Result<bool, StorageError> {
    for table_id in &view.depends_on {
        if !table_exists(conn, tables, table_id)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Verify a previously created table against `schema`, or create it.
fn ensure_table(conn: &Connection, schema: &TableSchema) -> Result<(), StorageError> {
    let stale = |reason: String| StorageError::StaleSchema {
        table: schema.table_id,
        reason,
    };

    if let Some(stored) = metadata::load_table(conn, &schema.table_id)? {
        if stored.indexer_version != INDEXER_SCHEMA_VERSION {
            return Err(stale(format!(
                "created by indexer layout v{}, this is v{}",
                stored.indexer_version, INDEXER_SCHEMA_VERSION
            )));
        }
        let hash = schema.schema_hash().to_string();
        if stored.schema_hash != hash {
            return Err(stale(format!(
                "stored schema hash {} does not match {}",
                stored.schema_hash, hash
            )));
        }
        return Ok(());
    }

    let sql_name = sql_table_name(&schema.table_id);
    if sql_name == metadata::STORE_TABLES || sql_name == metadata::SYNC_STATE {
        return Err(stale(format!("{} collides with indexer metadata", sql_name)));
    }

    let columns = schema
        .key_schema
        .iter()
        .chain(schema.value_schema.iter())
        .map(|field| format!("{} {} NOT NULL", quote_ident(&field.name), column_kind(&field.ty).sql_type()))
        .collect::<Vec<_>>();
    conn.execute_batch(&format!(
        "CREATE TABLE {} (__key BLOB PRIMARY KEY, __last_block INTEGER NOT NULL, {});",
        quote_ident(&sql_name),
        columns.join(", ")
    ))?;
    metadata::insert_table(conn, schema, &sql_name)?;
    info!("Created table {} for {}", sql_name, schema.table_id);
    Ok(())
}

fn row_values(
    schema: &TableSchema,
    record: &Record,
    block_number: u64,
) -> Result<Vec<SqlValue>, StorageError> {
    let mut values = vec![
        SqlValue::Blob(record.entity.as_bytes().to_vec()),
        SqlValue::Integer(block_number as i64),
    ];
    for (field, value) in schema.key_schema.iter().zip(&record.key) {
        values.push(to_sql(value, &field.ty)?);
    }
    for field in &schema.value_schema {
        let value = record
            .get(&field.name)
            .cloned()
            .unwrap_or_else(|| crate::codec::Value::default_for(&field.ty));
        values.push(to_sql(&value, &field.ty)?);
    }
    Ok(values)
}

fn insert_statement(schema: &TableSchema, verb: &str) -> String {
    let fields = schema
        .key_schema
        .iter()
        .chain(schema.value_schema.iter())
        .collect::<Vec<&FieldDef>>();
    let columns = fields
        .iter()
        .map(|field| quote_ident(&field.name))
        .collect::<Vec<_>>();
    let placeholders = (1..=fields.len() + 2)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>();
    format!(
        "{} INTO {} (__key, __last_block, {}) VALUES ({})",
        verb,
        quote_ident(&sql_table_name(&schema.table_id)),
        columns.join(", "),
        placeholders.join(", ")
    )
}

fn write_operation(conn: &Connection, op: &StoreOperation, block_number: u64) -> Result<(), StorageError> {
    let schema = &op.table;
    let table = quote_ident(&sql_table_name(&schema.table_id));

    match &op.kind {
        OperationKind::SetRecord { values } => {
            let record = Record::from_values(schema, op.key.clone(), op.entity.clone(), values);
            conn.execute(
                &insert_statement(schema, "INSERT OR REPLACE"),
                params_from_iter(row_values(schema, &record, block_number)?),
            )?;
        }
        OperationKind::SetField { field_name, value } => {
            let (_, field) = schema.value_field_by_name(field_name).ok_or_else(|| {
                StorageError::StaleSchema {
                    table: schema.table_id,
                    reason: format!("no value field named {}", field_name),
                }
            })?;
            let defaults = Record::with_defaults(schema, op.key.clone(), op.entity.clone());
            conn.execute(
                &insert_statement(schema, "INSERT OR IGNORE"),
                params_from_iter(row_values(schema, &defaults, block_number)?),
            )?;
            conn.execute(
                &format!(
                    "UPDATE {} SET {} = ?1, __last_block = ?2 WHERE __key = ?3",
                    table,
                    quote_ident(&field.name)
                ),
                params![
                    to_sql(value, &field.ty)?,
                    block_number as i64,
                    op.entity.as_bytes()
                ],
            )?;
        }
        OperationKind::DeleteRecord => {
            conn.execute(
                &format!("DELETE FROM {} WHERE __key = ?1", table),
                params![op.entity.as_bytes()],
            )?;
        }
        OperationKind::EphemeralRecord { .. } => {}
    }
    Ok(())
}

#[async_trait]
impl StorageAdapter for SqliteIndexer {
    async fn apply_block(&self, batch: &BlockBatch) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        let IndexerState {
            conn,
            tables,
            views: view_states,
        } = &mut *guard;

        if metadata::read_last_applied(conn)?.is_some_and(|last| batch.block_number <= last) {
            debug!("Skipping already applied block {}", batch.block_number);
            return Ok(());
        }

        let tx = conn.transaction()?;
        let mut created: Vec<Arc<TableSchema>> = Vec::new();
        let mut affected = views::AffectedKeys::new();

        for op in &batch.operations {
            if let Some(hook) = &self.hook {
                hook(op)?;
            }
            if op.is_ephemeral() {
                continue;
            }

            let table_id = op.table_id();
            let verified = tables.get(&table_id).is_some_and(|known| **known == *op.table)
                || created.iter().any(|s| s.table_id == table_id);
            if !verified {
                ensure_table(&tx, &op.table)?;
                created.push(op.table.clone());
            }
            write_operation(&tx, op, batch.block_number)?;
            affected
                .entry(table_id)
                .or_default()
                .insert(op.entity.as_bytes().to_vec());
        }

        let mut newly_materialized = Vec::new();
        for (index, view) in view_states.iter().enumerate() {
            if view.materialized {
                views::refresh(&tx, &view.definition, &affected)?;
            } else if view.definition.depends_on.iter().any(|t| affected.contains_key(t)) {
                let known = view.definition.depends_on.iter().all(|t| {
                    tables.contains_key(t) || created.iter().any(|s| s.table_id == *t)
                });
                if known || dependencies_exist(&tx, tables, &view.definition)? {
                    views::materialize(&tx, &view.definition)?;
                    newly_materialized.push(index);
                }
            }
        }

        metadata::write_last_applied(&tx, batch.block_number)?;
        tx.commit()?;

        for schema in created {
            tables.insert(schema.table_id, schema);
        }
        for index in newly_materialized {
            view_states[index].materialized = true;
        }
        debug!(
            "Indexed block {} ({} operation(s))",
            batch.block_number,
            batch.len()
        );
        Ok(())
    }

    async fn last_applied_block(&self) -> Result<Option<u64>, StorageError> {
        let state = self.lock()?;
        metadata::read_last_applied(&state.conn)
    }

    fn name(&self) -> &'static str {
        "SqliteIndexer"
    }
}
