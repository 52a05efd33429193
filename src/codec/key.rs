//! Key tuple codec.
//!
//! Each key element occupies one 32-byte word. Numeric, bool and address keys
//! are right-aligned (signed integers sign-extended); `bytesN` keys are
//! left-aligned and zero-padded on the right.

use super::CodecError;
use super::field::{decode_static_field, encode_static_field};
use super::value::Value;
use crate::schema::{SchemaType, StaticType, TableSchema};
use alloy_primitives::B256;
use std::fmt;

/// Canonical identity of a record within its table: the key words concatenated
/// exactly as emitted on the ledger.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct EntityKey(Vec<u8>);

impl EntityKey {
    pub fn from_words(words: &[B256]) -> Self {
        Self(words.iter().flat_map(|w| w.0).collect())
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0))
    }
}

impl fmt::Debug for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityKey({})", self)
    }
}

pub fn decode_key_element(ty: StaticType, word: &B256) -> Result<Value, CodecError> {
    let width = ty.byte_length();
    match ty {
        StaticType::FixedBytes(_) => decode_static_field(ty, &word[..width]),
        StaticType::Int(_) => {
            let value = decode_static_field(ty, &word[32 - width..])?;
            // the padding must be the sign extension of the value
            let fill = if word[32 - width] & 0x80 != 0 { 0xff } else { 0x00 };
            if word[..32 - width].iter().any(|b| *b != fill) {
                return Err(CodecError::ValueOutOfRange {
                    ty: ty.to_string(),
                    value: word.to_string(),
                });
            }
            Ok(value)
        }
        StaticType::Uint(_) | StaticType::Bool | StaticType::Address => {
            if word[..32 - width].iter().any(|b| *b != 0) {
                return Err(CodecError::ValueOutOfRange {
                    ty: ty.to_string(),
                    value: word.to_string(),
                });
            }
            decode_static_field(ty, &word[32 - width..])
        }
    }
}

pub fn encode_key_element(value: &Value, ty: StaticType) -> Result<B256, CodecError> {
    let packed = encode_static_field(value, ty)?;
    let mut word = [0u8; 32];
    match ty {
        StaticType::FixedBytes(_) => word[..packed.len()].copy_from_slice(&packed),
        StaticType::Int(_) => {
            if packed.first().is_some_and(|b| b & 0x80 != 0) {
                word = [0xff; 32];
            }
            word[32 - packed.len()..].copy_from_slice(&packed);
        }
        StaticType::Uint(_) | StaticType::Bool | StaticType::Address => {
            word[32 - packed.len()..].copy_from_slice(&packed)
        }
    }
    Ok(B256::from(word))
}

fn static_key_type(ty: &SchemaType) -> Result<StaticType, CodecError> {
    match ty {
        SchemaType::Static(ty) => Ok(*ty),
        other => Err(CodecError::TypeMismatch {
            ty: other.to_string(),
            value: "key word".to_string(),
        }),
    }
}

pub fn decode_key_tuple(schema: &TableSchema, words: &[B256]) -> Result<Vec<Value>, CodecError> {
    if words.len() != schema.key_schema.len() {
        return Err(CodecError::KeyCountMismatch {
            expected: schema.key_schema.len(),
            actual: words.len(),
        });
    }
    schema
        .key_schema
        .iter()
        .zip(words)
        .map(|(field, word)| decode_key_element(static_key_type(&field.ty)?, word))
        .collect()
}

pub fn encode_key_tuple(schema: &TableSchema, key: &[Value]) -> Result<Vec<B256>, CodecError> {
    if key.len() != schema.key_schema.len() {
        return Err(CodecError::KeyCountMismatch {
            expected: schema.key_schema.len(),
            actual: key.len(),
        });
    }
    schema
        .key_schema
        .iter()
        .zip(key)
        .map(|(field, value)| encode_key_element(value, static_key_type(&field.ty)?))
        .collect()
}

/// Entity key for a typed key tuple.
pub fn entity_key(schema: &TableSchema, key: &[Value]) -> Result<EntityKey, CodecError> {
    encode_key_tuple(schema, key).map(|words| EntityKey::from_words(&words))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, TableId};
    use alloy_primitives::Address;
    use std::str::FromStr;

    fn inventory() -> TableSchema {
        TableSchema::new(
            TableId::new("", "Inventory").unwrap(),
            vec![
                FieldDef::new("owner", "address".parse().unwrap()),
                FieldDef::new("item", "uint32".parse().unwrap()),
                FieldDef::new("itemVariant", "uint32".parse().unwrap()),
            ],
            vec![FieldDef::new("amount", "uint32".parse().unwrap())],
        )
        .unwrap()
    }

    #[test]
    fn decodes_ledger_key_words() {
        let words = [
            B256::from_str("0x000000000000000000000000796eb990a3f9c431c69149c7a168b91596d87f60")
                .unwrap(),
            B256::with_last_byte(1),
            B256::with_last_byte(1),
        ];
        let key = decode_key_tuple(&inventory(), &words).unwrap();
        let owner = Address::from_str("0x796eb990A3F9C431C69149c7a168b91596D87F60").unwrap();
        assert_eq!(key, vec![Value::Address(owner), Value::uint(1), Value::uint(1)]);
        assert_eq!(
            key[0].to_string(),
            "0x796eb990A3F9C431C69149c7a168b91596D87F60"
        );

        assert_eq!(encode_key_tuple(&inventory(), &key).unwrap(), words.to_vec());
        assert_eq!(entity_key(&inventory(), &key).unwrap().as_bytes().len(), 96);
    }

    #[test]
    fn aligns_by_type() {
        let word = encode_key_element(&Value::int(-1), StaticType::Int(2)).unwrap();
        assert_eq!(word, B256::repeat_byte(0xff));
        assert_eq!(decode_key_element(StaticType::Int(2), &word).unwrap(), Value::int(-1));

        let word = encode_key_element(&Value::FixedBytes(vec![0xaa, 0xbb]), StaticType::FixedBytes(2))
            .unwrap();
        assert_eq!(&word[..3], &[0xaa, 0xbb, 0x00]);
        assert!(word[2..].iter().all(|b| *b == 0));

        let word = encode_key_element(&Value::Bool(true), StaticType::Bool).unwrap();
        assert_eq!(word, B256::with_last_byte(1));
    }

    #[test]
    fn rejects_wrong_key_counts_and_dirty_padding() {
        assert!(matches!(
            decode_key_tuple(&inventory(), &[B256::ZERO]),
            Err(CodecError::KeyCountMismatch { expected: 3, actual: 1 })
        ));
        let mut dirty = B256::with_last_byte(1);
        dirty.0[0] = 1;
        assert!(decode_key_element(StaticType::Uint(4), &dirty).is_err());
    }
}
