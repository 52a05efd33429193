//! Bookkeeping tables of the relational indexer.
//!
//! `__store_tables` remembers which source table maps to which SQL table and
//! under which schema it was created; `__sync_state` holds the last applied
//! block.

use crate::schema::{FieldDef, TableId, TableSchema};
use crate::storage::StorageError;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

/// Version of the SQL layout this indexer writes
pub const INDEXER_SCHEMA_VERSION: i64 = 1;

pub const STORE_TABLES: &str = "__store_tables";
pub const SYNC_STATE: &str = "__sync_state";

/// A source table as recorded in `__store_tables`
#[derive(Debug, Clone)]
pub struct StoredTable {
    pub sql_name: String,
    pub schema: TableSchema,
    pub schema_hash: String,
    pub indexer_version: i64,
}

pub fn create_metadata_tables(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {STORE_TABLES} (
            table_id BLOB PRIMARY KEY,
            namespace TEXT NOT NULL,
            name TEXT NOT NULL,
            sql_table TEXT NOT NULL UNIQUE,
            key_schema TEXT NOT NULL,
            value_schema TEXT NOT NULL,
            field_layout BLOB NOT NULL,
            schema_hash TEXT NOT NULL,
            indexer_version INTEGER NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS {SYNC_STATE} (
            id INTEGER PRIMARY KEY CHECK (id = 0),
            last_applied_block INTEGER NOT NULL,
            updated_at TEXT NOT NULL
        );"
    ))?;
    Ok(())
}

pub fn load_table(conn: &Connection, table_id: &TableId) -> Result<Option<StoredTable>, StorageError> {
    let row = conn
        .query_row(
            &format!(
                "SELECT sql_table, key_schema, value_schema, schema_hash, indexer_version
                 FROM {STORE_TABLES} WHERE table_id = ?1"
            ),
            params![table_id.as_bytes().as_slice()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            },
        )
        .optional()?;

    let Some((sql_name, key_schema, value_schema, schema_hash, indexer_version)) = row else {
        return Ok(None);
    };
    let key_schema: Vec<FieldDef> = serde_json::from_str(&key_schema)?;
    let value_schema: Vec<FieldDef> = serde_json::from_str(&value_schema)?;

    Ok(Some(StoredTable {
        sql_name,
        schema: TableSchema {
            table_id: *table_id,
            key_schema,
            value_schema,
        },
        schema_hash,
        indexer_version,
    }))
}

pub fn insert_table(conn: &Connection, schema: &TableSchema, sql_name: &str) -> Result<(), StorageError> {
    let layout = schema
        .field_layout()
        .encode()
        .map_err(|e| StorageError::StaleSchema {
            table: schema.table_id,
            reason: e.to_string(),
        })?;

    conn.execute(
        &format!(
            "INSERT INTO {STORE_TABLES}
                (table_id, namespace, name, sql_table, key_schema, value_schema,
                 field_layout, schema_hash, indexer_version, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
        ),
        params![
            schema.table_id.as_bytes().as_slice(),
            schema.table_id.namespace(),
            schema.table_id.name(),
            sql_name,
            serde_json::to_string(&schema.key_schema)?,
            serde_json::to_string(&schema.value_schema)?,
            layout.as_slice(),
            schema.schema_hash().to_string(),
            INDEXER_SCHEMA_VERSION,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Every source table recorded so far.
pub fn table_ids(conn: &Connection) -> Result<Vec<TableId>, StorageError> {
    let mut stmt = conn.prepare(&format!("SELECT table_id FROM {STORE_TABLES} ORDER BY table_id"))?;
    let ids = stmt
        .query_map([], |row| row.get::<_, Vec<u8>>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids
        .into_iter()
        .filter(|bytes| bytes.len() == 32)
        .map(|bytes| TableId::from_bytes(alloy_primitives::B256::from_slice(&bytes)))
        .collect())
}

pub fn read_last_applied(conn: &Connection) -> Result<Option<u64>, StorageError> {
    let block = conn
        .query_row(
            &format!("SELECT last_applied_block FROM {SYNC_STATE} WHERE id = 0"),
            [],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(block.map(|b| b as u64))
}

pub fn write_last_applied(conn: &Connection, block_number: u64) -> Result<(), StorageError> {
    conn.execute(
        &format!(
            "INSERT INTO {SYNC_STATE} (id, last_applied_block, updated_at) VALUES (0, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET
                last_applied_block = excluded.last_applied_block,
                updated_at = excluded.updated_at"
        ),
        params![block_number as i64, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}
