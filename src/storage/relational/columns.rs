//! Mapping from schema types to SQLite columns.

use crate::codec::{CodecError, Value, value_from_json, value_to_json};
use crate::schema::{SchemaType, StaticType};
use alloy_primitives::{Address, I256, U256};
use rusqlite::types::{Value as SqlValue, ValueRef};

/// Storage class of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Boolean,
    /// Integers up to 48 bits
    Integer,
    /// Wider integers as 32-byte big-endian two's complement
    BigInteger,
    Binary,
    Text,
    /// Arrays in canonical JSON
    Json,
}

impl ColumnKind {
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnKind::Boolean => "BOOLEAN",
            ColumnKind::Integer => "INTEGER",
            ColumnKind::BigInteger | ColumnKind::Binary => "BLOB",
            ColumnKind::Text | ColumnKind::Json => "TEXT",
        }
    }
}

pub fn column_kind(ty: &SchemaType) -> ColumnKind {
    match ty {
        SchemaType::Static(StaticType::Bool) => ColumnKind::Boolean,
        SchemaType::Static(StaticType::Uint(bytes) | StaticType::Int(bytes)) => {
            if *bytes <= 6 {
                ColumnKind::Integer
            } else {
                ColumnKind::BigInteger
            }
        }
        SchemaType::Static(StaticType::FixedBytes(_) | StaticType::Address) | SchemaType::Bytes => {
            ColumnKind::Binary
        }
        SchemaType::String => ColumnKind::Text,
        SchemaType::Array(_) => ColumnKind::Json,
    }
}

fn mismatch(ty: &SchemaType, value: impl std::fmt::Debug) -> CodecError {
    CodecError::TypeMismatch {
        ty: ty.to_string(),
        value: format!("{:?}", value),
    }
}

pub fn to_sql(value: &Value, ty: &SchemaType) -> Result<SqlValue, CodecError> {
    let sql = match (column_kind(ty), value) {
        (ColumnKind::Boolean, Value::Bool(b)) => SqlValue::Integer(i64::from(*b)),
        (ColumnKind::Integer, Value::Uint(v)) => {
            SqlValue::Integer(i64::try_from(*v).map_err(|_| mismatch(ty, v))?)
        }
        (ColumnKind::Integer, Value::Int(v)) => {
            SqlValue::Integer(i64::try_from(*v).map_err(|_| mismatch(ty, v))?)
        }
        (ColumnKind::BigInteger, Value::Uint(v)) => SqlValue::Blob(v.to_be_bytes::<32>().to_vec()),
        (ColumnKind::BigInteger, Value::Int(v)) => {
            SqlValue::Blob(v.into_raw().to_be_bytes::<32>().to_vec())
        }
        (ColumnKind::Binary, Value::FixedBytes(bytes) | Value::Bytes(bytes)) => {
            SqlValue::Blob(bytes.clone())
        }
        (ColumnKind::Binary, Value::Address(address)) => SqlValue::Blob(address.to_vec()),
        (ColumnKind::Text, Value::String(s)) => SqlValue::Text(s.clone()),
        (ColumnKind::Json, Value::Array(_)) => SqlValue::Text(value_to_json(value).to_string()),
        _ => return Err(mismatch(ty, value)),
    };
    Ok(sql)
}

pub fn from_sql(sql: ValueRef<'_>, ty: &SchemaType) -> Result<Value, CodecError> {
    let invalid_length = |expected: usize, actual: usize| CodecError::InvalidLength {
        ty: ty.to_string(),
        expected,
        actual,
    };

    let value = match (ty, column_kind(ty), sql) {
        (_, ColumnKind::Boolean, ValueRef::Integer(i)) => Value::Bool(i != 0),
        (SchemaType::Static(StaticType::Uint(_)), ColumnKind::Integer, ValueRef::Integer(i)) => {
            Value::Uint(U256::from(u64::try_from(i).map_err(|_| mismatch(ty, i))?))
        }
        (SchemaType::Static(StaticType::Int(_)), ColumnKind::Integer, ValueRef::Integer(i)) => {
            Value::Int(I256::try_from(i).map_err(|_| mismatch(ty, i))?)
        }
        (SchemaType::Static(StaticType::Uint(_)), ColumnKind::BigInteger, ValueRef::Blob(b)) => {
            if b.len() != 32 {
                return Err(invalid_length(32, b.len()));
            }
            Value::Uint(U256::from_be_slice(b))
        }
        (SchemaType::Static(StaticType::Int(_)), ColumnKind::BigInteger, ValueRef::Blob(b)) => {
            if b.len() != 32 {
                return Err(invalid_length(32, b.len()));
            }
            Value::Int(I256::from_raw(U256::from_be_slice(b)))
        }
        (SchemaType::Static(StaticType::Address), _, ValueRef::Blob(b)) => {
            if b.len() != 20 {
                return Err(invalid_length(20, b.len()));
            }
            Value::Address(Address::from_slice(b))
        }
        (SchemaType::Static(StaticType::FixedBytes(n)), _, ValueRef::Blob(b)) => {
            if b.len() != *n as usize {
                return Err(invalid_length(*n as usize, b.len()));
            }
            Value::FixedBytes(b.to_vec())
        }
        (SchemaType::Bytes, _, ValueRef::Blob(b)) => Value::Bytes(b.to_vec()),
        (SchemaType::String, _, ValueRef::Text(t)) => Value::String(
            std::str::from_utf8(t)
                .map_err(|e| CodecError::InvalidUtf8(e.to_string()))?
                .to_string(),
        ),
        (SchemaType::Array(_), _, ValueRef::Text(t)) => {
            let json = serde_json::from_slice(t).map_err(|e| CodecError::Json {
                ty: ty.to_string(),
                reason: e.to_string(),
            })?;
            value_from_json(&json, ty)?
        }
        (_, _, other) => return Err(mismatch(ty, other.data_type())),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ty(name: &str) -> SchemaType {
        name.parse().unwrap()
    }

    fn round_trip(value: Value, name: &str) -> Value {
        let ty = ty(name);
        let sql = to_sql(&value, &ty).unwrap();
        from_sql(ValueRef::from(&sql), &ty).unwrap()
    }

    #[test]
    fn maps_types_to_column_kinds() {
        assert_eq!(column_kind(&ty("bool")), ColumnKind::Boolean);
        assert_eq!(column_kind(&ty("uint48")), ColumnKind::Integer);
        assert_eq!(column_kind(&ty("int48")), ColumnKind::Integer);
        assert_eq!(column_kind(&ty("uint56")), ColumnKind::BigInteger);
        assert_eq!(column_kind(&ty("int256")), ColumnKind::BigInteger);
        assert_eq!(column_kind(&ty("address")), ColumnKind::Binary);
        assert_eq!(column_kind(&ty("bytes4")), ColumnKind::Binary);
        assert_eq!(column_kind(&ty("bytes")), ColumnKind::Binary);
        assert_eq!(column_kind(&ty("string")), ColumnKind::Text);
        assert_eq!(column_kind(&ty("uint8[]")), ColumnKind::Json);
    }

    #[test]
    fn values_survive_their_columns() {
        assert_eq!(round_trip(Value::Bool(true), "bool"), Value::Bool(true));
        assert_eq!(round_trip(Value::uint((1 << 48) - 1), "uint48"), Value::uint((1 << 48) - 1));
        assert_eq!(round_trip(Value::int(-5), "int16"), Value::int(-5));
        assert_eq!(round_trip(Value::Uint(U256::MAX), "uint256"), Value::Uint(U256::MAX));
        assert_eq!(round_trip(Value::Int(I256::MIN), "int256"), Value::Int(I256::MIN));
        assert_eq!(round_trip(Value::int(-1), "int64"), Value::int(-1));
        assert_eq!(
            round_trip(Value::Address(Address::repeat_byte(0xab)), "address"),
            Value::Address(Address::repeat_byte(0xab))
        );
        assert_eq!(round_trip(Value::from(""), "string"), Value::from(""));
        assert_eq!(
            round_trip(Value::Array(vec![Value::uint(1), Value::uint(2)]), "uint64[]"),
            Value::Array(vec![Value::uint(1), Value::uint(2)])
        );
    }

    #[test]
    fn big_integers_are_stored_big_endian() {
        let sql = to_sql(&Value::int(-1), &ty("int128")).unwrap();
        assert_eq!(sql, SqlValue::Blob(vec![0xff; 32]));
    }

    #[test]
    fn rejects_mismatched_values() {
        assert!(to_sql(&Value::from("x"), &ty("uint8")).is_err());
        assert!(from_sql(ValueRef::Integer(1), &ty("string")).is_err());
    }
}
