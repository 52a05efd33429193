//! Canonical JSON form of values.
//!
//! Integers become decimal strings, byte values and addresses become `0x` hex
//! strings, booleans stay JSON booleans and arrays become JSON arrays. The
//! relational sink stores array columns in this form.

use super::CodecError;
use super::value::Value;
use crate::schema::{SchemaType, StaticType};
use alloy_primitives::{Address, I256, U256};
use serde_json::Value as JsonValue;
use std::str::FromStr;

pub fn value_to_json(value: &Value) -> JsonValue {
    match value {
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::Uint(v) => JsonValue::String(v.to_string()),
        Value::Int(v) => JsonValue::String(v.to_string()),
        Value::FixedBytes(bytes) | Value::Bytes(bytes) => {
            JsonValue::String(format!("0x{}", hex::encode(bytes)))
        }
        Value::Address(address) => JsonValue::String(address.to_checksum(None)),
        Value::String(s) => JsonValue::String(s.clone()),
        Value::Array(items) => JsonValue::Array(items.iter().map(value_to_json).collect()),
    }
}

pub fn value_from_json(json: &JsonValue, ty: &SchemaType) -> Result<Value, CodecError> {
    let invalid = |reason: &str| CodecError::Json {
        ty: ty.to_string(),
        reason: reason.to_string(),
    };

    match ty {
        SchemaType::Static(ty) => static_from_json(json, *ty),
        SchemaType::Array(elem) => json
            .as_array()
            .ok_or_else(|| invalid("expected an array"))?
            .iter()
            .map(|item| static_from_json(item, *elem))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        SchemaType::Bytes => json
            .as_str()
            .ok_or_else(|| invalid("expected a hex string"))
            .and_then(|s| decode_hex(s).map_err(|e| invalid(&e)))
            .map(Value::Bytes),
        SchemaType::String => json
            .as_str()
            .map(Value::from)
            .ok_or_else(|| invalid("expected a string")),
    }
}

fn static_from_json(json: &JsonValue, ty: StaticType) -> Result<Value, CodecError> {
    let invalid = |reason: String| CodecError::Json {
        ty: ty.to_string(),
        reason,
    };
    let as_str = || {
        json.as_str()
            .ok_or_else(|| invalid(format!("expected a string, got {}", json)))
    };

    let value = match ty {
        StaticType::Bool => Value::Bool(
            json.as_bool()
                .ok_or_else(|| invalid(format!("expected a boolean, got {}", json)))?,
        ),
        StaticType::Uint(_) => {
            Value::Uint(U256::from_str_radix(as_str()?, 10).map_err(|e| invalid(e.to_string()))?)
        }
        StaticType::Int(_) => {
            Value::Int(I256::from_dec_str(as_str()?).map_err(|e| invalid(e.to_string()))?)
        }
        StaticType::FixedBytes(_) => Value::FixedBytes(decode_hex(as_str()?).map_err(invalid)?),
        StaticType::Address => {
            Value::Address(Address::from_str(as_str()?).map_err(|e| invalid(e.to_string()))?)
        }
    };

    // the width check lives in the binary codec
    super::field::encode_static_field(&value, ty)?;
    Ok(value)
}

fn decode_hex(s: &str) -> Result<Vec<u8>, String> {
    let digits = s
        .strip_prefix("0x")
        .ok_or_else(|| format!("{:?} is missing the 0x prefix", s))?;
    hex::decode(digits).map_err(|e| e.to_string())
}
