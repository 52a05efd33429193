//! Bytes32 schema encoding used by the on-chain store.
//!
//! Layout: bytes 0-1 hold the static data length, byte 2 the number of static
//! fields, byte 3 the number of dynamic fields, and bytes 4.. one type tag per
//! field (static fields first).

use super::types::{MAX_DYNAMIC_FIELDS, MAX_STATIC_FIELDS, MAX_TOTAL_FIELDS, SchemaError, SchemaType};
use alloy_primitives::B256;

pub fn encode_schema(types: &[SchemaType]) -> Result<B256, SchemaError> {
    if types.len() > MAX_TOTAL_FIELDS {
        return Err(SchemaError::InvalidEncoding(format!(
            "{} fields exceed the limit of {}",
            types.len(),
            MAX_TOTAL_FIELDS
        )));
    }

    let num_static = types.iter().take_while(|t| t.is_static()).count();
    let num_dynamic = types.len() - num_static;
    if types[num_static..].iter().any(|t| t.is_static()) {
        return Err(SchemaError::InvalidEncoding(
            "static fields must precede dynamic fields".to_string(),
        ));
    }
    if num_static > MAX_STATIC_FIELDS || num_dynamic > MAX_DYNAMIC_FIELDS {
        return Err(SchemaError::InvalidEncoding(format!(
            "{} static / {} dynamic fields exceed the limits",
            num_static, num_dynamic
        )));
    }

    let static_length: usize = types.iter().filter_map(|t| t.static_byte_length()).sum();
    let static_length = u16::try_from(static_length).map_err(|_| {
        SchemaError::InvalidEncoding(format!("static length {} exceeds u16", static_length))
    })?;

    let mut word = [0u8; 32];
    word[..2].copy_from_slice(&static_length.to_be_bytes());
    word[2] = num_static as u8;
    word[3] = num_dynamic as u8;
    for (i, ty) in types.iter().enumerate() {
        word[4 + i] = ty.tag();
    }
    Ok(B256::from(word))
}

pub fn decode_schema(word: &B256) -> Result<Vec<SchemaType>, SchemaError> {
    let static_length = u16::from_be_bytes([word[0], word[1]]) as usize;
    let num_static = word[2] as usize;
    let num_dynamic = word[3] as usize;

    if num_static + num_dynamic > MAX_TOTAL_FIELDS {
        return Err(SchemaError::InvalidEncoding(format!(
            "schema declares {} fields, limit is {}",
            num_static + num_dynamic,
            MAX_TOTAL_FIELDS
        )));
    }

    let types = word[4..4 + num_static + num_dynamic]
        .iter()
        .map(|tag| SchemaType::from_tag(*tag))
        .collect::<Result<Vec<_>, _>>()?;

    if let Some(ty) = types[..num_static].iter().find(|t| !t.is_static()) {
        return Err(SchemaError::InvalidEncoding(format!(
            "dynamic type {} in static section",
            ty
        )));
    }
    if let Some(ty) = types[num_static..].iter().find(|t| t.is_static()) {
        return Err(SchemaError::InvalidEncoding(format!(
            "static type {} in dynamic section",
            ty
        )));
    }

    let actual: usize = types.iter().filter_map(|t| t.static_byte_length()).sum();
    if actual != static_length {
        return Err(SchemaError::InvalidEncoding(format!(
            "declared static length {} does not match field widths ({})",
            static_length, actual
        )));
    }

    Ok(types)
}
