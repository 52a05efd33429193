//! Byte codec for individual fields.
//!
//! Static fields are packed big-endian at their exact width. Dynamic fields
//! are the raw bytes of the value: UTF-8 for strings, the bytes themselves for
//! `bytes`, and concatenated packed elements for arrays.

use super::CodecError;
use super::value::Value;
use crate::schema::{SchemaType, StaticType};
use alloy_primitives::{Address, I256, U256};

pub fn decode_static_field(ty: StaticType, bytes: &[u8]) -> Result<Value, CodecError> {
    let width = ty.byte_length();
    if bytes.len() != width {
        return Err(CodecError::InvalidLength {
            ty: ty.to_string(),
            expected: width,
            actual: bytes.len(),
        });
    }

    let value = match ty {
        StaticType::Uint(_) => Value::Uint(U256::from_be_slice(bytes)),
        StaticType::Int(_) => Value::Int(sign_extend(bytes)),
        StaticType::FixedBytes(_) => Value::FixedBytes(bytes.to_vec()),
        StaticType::Bool => Value::Bool(bytes[0] != 0),
        StaticType::Address => Value::Address(Address::from_slice(bytes)),
    };
    Ok(value)
}

pub fn encode_static_field(value: &Value, ty: StaticType) -> Result<Vec<u8>, CodecError> {
    let width = ty.byte_length();
    let mismatch = || CodecError::TypeMismatch {
        ty: ty.to_string(),
        value: value.to_string(),
    };
    let out_of_range = || CodecError::ValueOutOfRange {
        ty: ty.to_string(),
        value: value.to_string(),
    };

    match (ty, value) {
        (StaticType::Uint(_), Value::Uint(v)) => {
            if v.bit_len() > width * 8 {
                return Err(out_of_range());
            }
            Ok(v.to_be_bytes::<32>()[32 - width..].to_vec())
        }
        (StaticType::Int(_), Value::Int(v)) => {
            let full = v.into_raw().to_be_bytes::<32>();
            let truncated = &full[32 - width..];
            if sign_extend(truncated) != *v {
                return Err(out_of_range());
            }
            Ok(truncated.to_vec())
        }
        (StaticType::FixedBytes(_), Value::FixedBytes(bytes)) => {
            if bytes.len() != width {
                return Err(CodecError::InvalidLength {
                    ty: ty.to_string(),
                    expected: width,
                    actual: bytes.len(),
                });
            }
            Ok(bytes.clone())
        }
        (StaticType::Bool, Value::Bool(b)) => Ok(vec![u8::from(*b)]),
        (StaticType::Address, Value::Address(address)) => Ok(address.to_vec()),
        _ => Err(mismatch()),
    }
}

pub fn decode_dynamic_field(ty: &SchemaType, bytes: &[u8]) -> Result<Value, CodecError> {
    match ty {
        SchemaType::Bytes => Ok(Value::Bytes(bytes.to_vec())),
        SchemaType::String => String::from_utf8(bytes.to_vec())
            .map(Value::String)
            .map_err(|e| CodecError::InvalidUtf8(e.to_string())),
        SchemaType::Array(elem) => {
            let width = elem.byte_length();
            if bytes.len() % width != 0 {
                return Err(CodecError::MisalignedArray {
                    ty: ty.to_string(),
                    width,
                    actual: bytes.len(),
                });
            }
            bytes
                .chunks_exact(width)
                .map(|chunk| decode_static_field(*elem, chunk))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        }
        SchemaType::Static(_) => Err(CodecError::TypeMismatch {
            ty: ty.to_string(),
            value: "dynamic field bytes".to_string(),
        }),
    }
}

pub fn encode_dynamic_field(value: &Value, ty: &SchemaType) -> Result<Vec<u8>, CodecError> {
    match (ty, value) {
        (SchemaType::Bytes, Value::Bytes(bytes)) => Ok(bytes.clone()),
        (SchemaType::String, Value::String(s)) => Ok(s.as_bytes().to_vec()),
        (SchemaType::Array(elem), Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len() * elem.byte_length());
            for item in items {
                out.extend(encode_static_field(item, *elem)?);
            }
            Ok(out)
        }
        _ => Err(CodecError::TypeMismatch {
            ty: ty.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Decode a field of any type from its exact encoded bytes.
pub fn decode_field(ty: &SchemaType, bytes: &[u8]) -> Result<Value, CodecError> {
    match ty {
        SchemaType::Static(ty) => decode_static_field(*ty, bytes),
        _ => decode_dynamic_field(ty, bytes),
    }
}

pub fn encode_field(value: &Value, ty: &SchemaType) -> Result<Vec<u8>, CodecError> {
    match ty {
        SchemaType::Static(ty) => encode_static_field(value, *ty),
        _ => encode_dynamic_field(value, ty),
    }
}

/// Interpret a big-endian two's complement slice of up to 32 bytes.
pub(crate) fn sign_extend(bytes: &[u8]) -> I256 {
    let negative = bytes.first().is_some_and(|b| b & 0x80 != 0);
    let mut word = if negative { [0xffu8; 32] } else { [0u8; 32] };
    word[32 - bytes.len()..].copy_from_slice(bytes);
    I256::from_raw(U256::from_be_bytes(word))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ty(s: &str) -> SchemaType {
        s.parse().unwrap()
    }

    fn round_trip(value: Value, type_name: &str) {
        let schema_type = ty(type_name);
        let encoded = encode_field(&value, &schema_type).unwrap();
        if let Some(width) = schema_type.static_byte_length() {
            assert_eq!(encoded.len(), width, "{} width", type_name);
        }
        assert_eq!(decode_field(&schema_type, &encoded).unwrap(), value, "{}", type_name);
    }

    #[test]
    fn integers_round_trip_at_their_boundaries() {
        for bits in (8..=256u16).step_by(8) {
            let unsigned = format!("uint{}", bits);
            let signed = format!("int{}", bits);
            let max = if bits == 256 {
                U256::MAX
            } else {
                (U256::from(1) << bits as usize) - U256::from(1)
            };
            round_trip(Value::Uint(U256::ZERO), &unsigned);
            round_trip(Value::Uint(max), &unsigned);

            let half = U256::from(1) << (bits as usize - 1);
            let signed_max = I256::from_raw(half - U256::from(1));
            let signed_min = I256::from_raw(U256::ZERO.wrapping_sub(half));
            round_trip(Value::Int(I256::ZERO), &signed);
            round_trip(Value::Int(signed_max), &signed);
            round_trip(Value::Int(signed_min), &signed);
            round_trip(Value::int(-1), &signed);
        }
    }

    #[test]
    fn signed_values_keep_their_sign() {
        let encoded = encode_field(&Value::int(-2), &ty("int16")).unwrap();
        assert_eq!(encoded, vec![0xff, 0xfe]);
        assert_eq!(decode_field(&ty("int16"), &[0x80, 0x00]).unwrap(), Value::int(-32768));
        assert_eq!(decode_field(&ty("int16"), &[0x7f, 0xff]).unwrap(), Value::int(32767));
    }

    #[test]
    fn rejects_values_wider_than_the_field() {
        assert!(matches!(
            encode_field(&Value::uint(256), &ty("uint8")),
            Err(CodecError::ValueOutOfRange { .. })
        ));
        assert!(matches!(
            encode_field(&Value::int(128), &ty("int8")),
            Err(CodecError::ValueOutOfRange { .. })
        ));
        assert!(matches!(
            encode_field(&Value::int(-129), &ty("int8")),
            Err(CodecError::ValueOutOfRange { .. })
        ));
        assert!(matches!(
            encode_field(&Value::Bool(true), &ty("uint8")),
            Err(CodecError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn other_static_types_round_trip() {
        round_trip(Value::Bool(true), "bool");
        round_trip(Value::Bool(false), "bool");
        round_trip(Value::Address(Address::ZERO), "address");
        round_trip(Value::Address(Address::repeat_byte(0xab)), "address");
        round_trip(Value::FixedBytes(vec![0; 32]), "bytes32");
        round_trip(Value::FixedBytes(vec![0xde, 0xad, 0xbe, 0xef]), "bytes4");
        round_trip(Value::FixedBytes(vec![0xff]), "bytes1");

        assert_eq!(decode_field(&ty("bool"), &[0x02]).unwrap(), Value::Bool(true));
    }

    #[test]
    fn dynamic_types_round_trip() {
        round_trip(Value::String(String::new()), "string");
        round_trip(Value::String("héllo wörld".to_string()), "string");
        round_trip(Value::Bytes(vec![]), "bytes");
        round_trip(Value::Bytes(vec![1, 2, 3]), "bytes");
        round_trip(Value::Array(vec![]), "uint32[]");
        round_trip(Value::Array(vec![Value::uint(1), Value::uint(u32::MAX as u64)]), "uint32[]");
        round_trip(Value::Array(vec![Value::int(-1), Value::int(7)]), "int8[]");
        round_trip(Value::Array(vec![Value::Bool(true), Value::Bool(false)]), "bool[]");
        round_trip(
            Value::Array(vec![Value::Address(Address::repeat_byte(1))]),
            "address[]",
        );
    }

    #[test]
    fn dynamic_decoding_validates_input() {
        assert!(matches!(
            decode_field(&ty("string"), &[0xff, 0xfe]),
            Err(CodecError::InvalidUtf8(_))
        ));
        assert!(matches!(
            decode_field(&ty("uint32[]"), &[0, 0, 0, 1, 0]),
            Err(CodecError::MisalignedArray { width: 4, actual: 5, .. })
        ));
        assert!(matches!(
            decode_field(&ty("uint32"), &[0, 0, 1]),
            Err(CodecError::InvalidLength { expected: 4, actual: 3, .. })
        ));
    }
}
