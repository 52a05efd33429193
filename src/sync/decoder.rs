//! Log decoding.
//!
//! Turns a raw store log plus its table schema into a typed [`StoreOperation`].
//! Decoding is pure: no I/O, no shared state.

use super::operations::{OperationKind, RecordValues, StoreOperation};
use crate::codec::{CodecError, EntityKey, decode_field, decode_key_tuple, decode_record_values};
use crate::ledger::{AbiError, RawLog, StoreEventArgs, StoreEventKind, decode_store_event_args};
use crate::schema::{TableId, TableSchema};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeCause {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Abi(#[from] AbiError),

    #[error("field index {index} is out of range for {fields} value field(s)")]
    FieldIndexOutOfRange { index: u8, fields: usize },

    #[error("SetField event without a field index")]
    MissingFieldIndex,

    #[error("log belongs to table {actual}, schema is for {expected}")]
    TableMismatch { expected: TableId, actual: TableId },
}

/// A store log that could not be decoded.
///
/// `table_id` is `None` only when the payload was too malformed to name its table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    pub table_id: Option<TableId>,
    pub block_number: u64,
    pub log_index: u64,
    pub cause: DecodeCause,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Failed to decode log {} of block {}",
            self.log_index, self.block_number
        )?;
        if let Some(table_id) = &self.table_id {
            write!(f, " for table {}", table_id)?;
        }
        write!(f, ": {}", self.cause)
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

/// A classified store log whose arguments have been ABI-decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLog {
    pub kind: StoreEventKind,
    pub table_id: TableId,
    pub args: StoreEventArgs,
    pub block_number: u64,
    pub log_index: u64,
}

impl StoreLog {
    /// Classify and ABI-decode a raw log.
    ///
    /// Returns `None` for logs that are not store events and for logs that
    /// were removed by a reorg.
    pub fn from_raw(log: &RawLog) -> Option<Result<Self, DecodeError>> {
        let kind = StoreEventKind::classify(log)?;
        if log.removed {
            warn!(
                "Skipping removed {} log {} of block {}",
                kind.event_name(),
                log.log_index,
                log.block_number
            );
            return None;
        }
        let args = match &log.args {
            Some(args) => Ok(args.clone()),
            None => decode_store_event_args(kind, &log.data),
        };

        Some(
            args.map(|args| StoreLog {
                kind,
                table_id: TableId::from_bytes(args.table),
                args,
                block_number: log.block_number,
                log_index: log.log_index,
            })
            .map_err(|e| DecodeError {
                table_id: None,
                block_number: log.block_number,
                log_index: log.log_index,
                cause: e.into(),
            }),
        )
    }
}

/// Decode a classified store log against its table schema.
pub fn decode_store_log(
    log: &StoreLog,
    schema: &Arc<TableSchema>,
) -> Result<StoreOperation, DecodeError> {
    let fail = |cause: DecodeCause| DecodeError {
        table_id: Some(log.table_id),
        block_number: log.block_number,
        log_index: log.log_index,
        cause,
    };

    if schema.table_id != log.table_id {
        return Err(fail(DecodeCause::TableMismatch {
            expected: schema.table_id,
            actual: log.table_id,
        }));
    }

    let key = decode_key_tuple(schema, &log.args.key).map_err(|e| fail(e.into()))?;
    let entity = EntityKey::from_words(&log.args.key);

    let kind = match log.kind {
        StoreEventKind::SetRecord => OperationKind::SetRecord {
            values: decode_values(schema, &log.args.data).map_err(|e| fail(e.into()))?,
        },
        StoreEventKind::EphemeralRecord => OperationKind::EphemeralRecord {
            values: decode_values(schema, &log.args.data).map_err(|e| fail(e.into()))?,
        },
        StoreEventKind::DeleteRecord => OperationKind::DeleteRecord,
        StoreEventKind::SetField => {
            let index = log
                .args
                .schema_index
                .ok_or_else(|| fail(DecodeCause::MissingFieldIndex))?;
            let field = schema.value_field(index as usize).ok_or_else(|| {
                fail(DecodeCause::FieldIndexOutOfRange {
                    index,
                    fields: schema.value_schema.len(),
                })
            })?;
            OperationKind::SetField {
                field_name: field.name.clone(),
                value: decode_field(&field.ty, &log.args.data).map_err(|e| fail(e.into()))?,
            }
        }
    };

    Ok(StoreOperation {
        block_number: log.block_number,
        log_index: log.log_index,
        table: schema.clone(),
        key,
        entity,
        kind,
    })
}

/// Decode a raw log in one step; `Ok(None)` for logs that are not store events.
pub fn decode_log(
    log: &RawLog,
    schema: &Arc<TableSchema>,
) -> Result<Option<StoreOperation>, DecodeError> {
    match StoreLog::from_raw(log) {
        None => Ok(None),
        Some(store_log) => decode_store_log(&store_log?, schema).map(Some),
    }
}

fn decode_values(schema: &TableSchema, data: &[u8]) -> Result<RecordValues, CodecError> {
    let values = decode_record_values(schema, data)?;
    Ok(schema
        .value_schema
        .iter()
        .map(|field| field.name.clone())
        .zip(values)
        .collect())
}
