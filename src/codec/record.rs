//! Value blob codec: static prefix, then (when the schema has dynamic fields)
//! a packed counter and the concatenated dynamic field bytes.

use super::CodecError;
use super::field::{decode_dynamic_field, decode_static_field, encode_field};
use super::packed_counter::{PACKED_COUNTER_LENGTH, PackedCounter};
use super::value::Value;
use crate::schema::{SchemaType, TableSchema};

pub fn decode_record_values(schema: &TableSchema, data: &[u8]) -> Result<Vec<Value>, CodecError> {
    let layout = schema.field_layout();
    let static_length = layout.static_data_length();
    let invalid_length = |expected: usize| CodecError::InvalidLength {
        ty: format!("{} record", schema.table_id),
        expected,
        actual: data.len(),
    };

    if data.len() < static_length {
        return Err(invalid_length(static_length));
    }

    let mut values = Vec::with_capacity(schema.value_schema.len());
    let mut offset = 0;
    for field in schema.static_fields() {
        let SchemaType::Static(ty) = field.ty else {
            continue;
        };
        let width = ty.byte_length();
        values.push(decode_static_field(ty, &data[offset..offset + width])?);
        offset += width;
    }

    if layout.num_dynamic_fields() == 0 {
        if data.len() != static_length {
            return Err(invalid_length(static_length));
        }
        return Ok(values);
    }

    let header_end = static_length + PACKED_COUNTER_LENGTH;
    if data.len() < header_end {
        return Err(invalid_length(header_end));
    }
    let counter = PackedCounter::decode(&data[static_length..header_end], layout.num_dynamic_fields())?;
    let expected = header_end as u64 + counter.total();
    if data.len() as u64 != expected {
        return Err(invalid_length(expected as usize));
    }

    let mut offset = header_end;
    for (field, length) in schema.dynamic_fields().zip(counter.lengths()) {
        let length = *length as usize;
        values.push(decode_dynamic_field(&field.ty, &data[offset..offset + length])?);
        offset += length;
    }

    Ok(values)
}

pub fn encode_record_values(schema: &TableSchema, values: &[Value]) -> Result<Vec<u8>, CodecError> {
    if values.len() != schema.value_schema.len() {
        return Err(CodecError::ValueCountMismatch {
            expected: schema.value_schema.len(),
            actual: values.len(),
        });
    }

    let mut static_data = Vec::new();
    let mut dynamic_data = Vec::new();
    let mut dynamic_lengths = Vec::new();
    for (field, value) in schema.value_schema.iter().zip(values) {
        let encoded = encode_field(value, &field.ty)?;
        if field.ty.is_static() {
            static_data.extend(encoded);
        } else {
            dynamic_lengths.push(encoded.len());
            dynamic_data.extend(encoded);
        }
    }

    if schema.field_layout().num_dynamic_fields() > 0 {
        let counter = PackedCounter::from_lengths(&dynamic_lengths)?;
        static_data.extend_from_slice(&counter.encode());
        static_data.extend(dynamic_data);
    }
    Ok(static_data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, TableId};
    use alloy_primitives::Address;

    fn mixed_schema() -> TableSchema {
        let field = |name: &str, ty: &str| FieldDef::new(name, ty.parse().unwrap());
        TableSchema::new(
            TableId::new("game", "Profile").unwrap(),
            vec![field("id", "bytes32")],
            vec![
                field("level", "uint8"),
                field("owner", "address"),
                field("score", "int64"),
                field("name", "string"),
                field("badges", "uint16[]"),
                field("blob", "bytes"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn decodes_static_then_dynamic_sections() {
        let schema = mixed_schema();
        let values = vec![
            Value::uint(7),
            Value::Address(Address::repeat_byte(0x11)),
            Value::int(-5),
            Value::from("alice"),
            Value::Array(vec![Value::uint(1), Value::uint(0xffff)]),
            Value::Bytes(vec![]),
        ];
        let encoded = encode_record_values(&schema, &values).unwrap();

        // 1 + 20 + 8 static bytes, 32-byte counter, 5 + 4 + 0 dynamic bytes
        assert_eq!(encoded.len(), 29 + 32 + 9);
        assert_eq!(encoded[0], 7);
        assert_eq!(&encoded[29 + 25..29 + 32], &[0, 0, 0, 0, 0, 0, 9]);
        assert_eq!(decode_record_values(&schema, &encoded).unwrap(), values);
    }

    #[test]
    fn static_only_records_have_no_counter() {
        let schema = TableSchema::new(
            TableId::new("", "Counter").unwrap(),
            vec![],
            vec![FieldDef::new("value", "uint32".parse().unwrap())],
        )
        .unwrap();
        let encoded = encode_record_values(&schema, &[Value::uint(8)]).unwrap();
        assert_eq!(encoded, vec![0, 0, 0, 8]);
        assert_eq!(decode_record_values(&schema, &encoded).unwrap(), vec![Value::uint(8)]);
        assert!(matches!(
            decode_record_values(&schema, &[0, 0, 0, 8, 0]),
            Err(CodecError::InvalidLength { expected: 4, actual: 5, .. })
        ));
    }

    #[test]
    fn rejects_truncated_dynamic_sections() {
        let schema = mixed_schema();
        let values = vec![
            Value::uint(1),
            Value::Address(Address::ZERO),
            Value::int(0),
            Value::from("bob"),
            Value::Array(vec![]),
            Value::Bytes(vec![1, 2]),
        ];
        let encoded = encode_record_values(&schema, &values).unwrap();
        assert!(decode_record_values(&schema, &encoded[..encoded.len() - 1]).is_err());
        assert!(decode_record_values(&schema, &encoded[..10]).is_err());
    }
}
