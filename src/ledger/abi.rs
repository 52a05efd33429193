//! ABI decoding of store event payloads.
//!
//! Store events carry all of their arguments in the log data using the
//! standard head/tail layout: static arguments and offsets in the head,
//! `bytes32[]` and `bytes` in the tail.

use super::types::{StoreEventArgs, StoreEventKind};
use alloy_primitives::B256;

const WORD: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Malformed ABI payload: {0}")]
pub struct AbiError(pub String);

pub fn decode_store_event_args(kind: StoreEventKind, data: &[u8]) -> Result<StoreEventArgs, AbiError> {
    let table = B256::from_slice(word(data, 0)?);
    let key = read_bytes32_array(data, read_usize(word(data, WORD)?)?)?;

    let (schema_index, data) = match kind {
        StoreEventKind::DeleteRecord => (None, Vec::new()),
        StoreEventKind::SetRecord | StoreEventKind::EphemeralRecord => {
            let offset = read_usize(word(data, 2 * WORD)?)?;
            (None, read_bytes(data, offset)?)
        }
        StoreEventKind::SetField => {
            let index_word = word(data, 2 * WORD)?;
            if index_word[..WORD - 1].iter().any(|b| *b != 0) {
                return Err(AbiError("schema index does not fit in uint8".to_string()));
            }
            let offset = read_usize(word(data, 3 * WORD)?)?;
            (Some(index_word[WORD - 1]), read_bytes(data, offset)?)
        }
    };

    Ok(StoreEventArgs {
        table,
        key,
        schema_index,
        data,
    })
}

/// Inverse of [`decode_store_event_args`].
pub fn encode_store_event_args(kind: StoreEventKind, args: &StoreEventArgs) -> Vec<u8> {
    let head_words = match kind {
        StoreEventKind::DeleteRecord => 2,
        StoreEventKind::SetRecord | StoreEventKind::EphemeralRecord => 3,
        StoreEventKind::SetField => 4,
    };

    let mut key_tail = usize_word(args.key.len()).to_vec();
    for key in &args.key {
        key_tail.extend_from_slice(key.as_slice());
    }

    let mut head = Vec::with_capacity(head_words * WORD);
    head.extend_from_slice(args.table.as_slice());
    head.extend_from_slice(&usize_word(head_words * WORD));

    let mut tail = key_tail;
    if kind != StoreEventKind::DeleteRecord {
        if kind == StoreEventKind::SetField {
            head.extend_from_slice(&usize_word(args.schema_index.unwrap_or_default() as usize));
        }
        head.extend_from_slice(&usize_word(head_words * WORD + tail.len()));
        tail.extend_from_slice(&usize_word(args.data.len()));
        tail.extend_from_slice(&args.data);
        let padding = (WORD - args.data.len() % WORD) % WORD;
        tail.extend(std::iter::repeat_n(0u8, padding));
    }

    head.extend(tail);
    head
}

fn word(data: &[u8], offset: usize) -> Result<&[u8], AbiError> {
    offset.checked_add(WORD).and_then(|end| data.get(offset..end)).ok_or_else(|| {
        AbiError(format!(
            "word at offset {} is out of bounds ({} bytes)",
            offset,
            data.len()
        ))
    })
}

fn read_usize(word: &[u8]) -> Result<usize, AbiError> {
    if word[..WORD - 8].iter().any(|b| *b != 0) {
        return Err(AbiError(format!("offset or length 0x{} is too large", hex::encode(word))));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&word[WORD - 8..]);
    usize::try_from(u64::from_be_bytes(buf)).map_err(|e| AbiError(e.to_string()))
}

fn read_bytes32_array(data: &[u8], offset: usize) -> Result<Vec<B256>, AbiError> {
    let len = read_usize(word(data, offset)?)?;
    (0..len)
        .map(|i| {
            let position = (i + 1)
                .checked_mul(WORD)
                .and_then(|delta| offset.checked_add(delta))
                .ok_or_else(|| AbiError(format!("array element {} overflows the payload", i)))?;
            word(data, position).map(B256::from_slice)
        })
        .collect()
}

fn read_bytes(data: &[u8], offset: usize) -> Result<Vec<u8>, AbiError> {
    let len = read_usize(word(data, offset)?)?;
    let start = offset + WORD;
    start
        .checked_add(len)
        .and_then(|end| data.get(start..end))
        .map(<[u8]>::to_vec)
        .ok_or_else(|| {
        AbiError(format!(
            "{} bytes at offset {} are out of bounds ({} bytes)",
            len,
            start,
            data.len()
        ))
    })
}

fn usize_word(value: usize) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - 8..].copy_from_slice(&(value as u64).to_be_bytes());
    word
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::INVENTORY_SET_FIELD_DATA;
    use std::str::FromStr;

    #[test]
    fn decodes_set_field_payload() {
        let data = hex::decode(INVENTORY_SET_FIELD_DATA.trim_start_matches("0x")).unwrap();
        let args = decode_store_event_args(StoreEventKind::SetField, &data).unwrap();

        assert_eq!(
            args.table,
            B256::from_str("0x00000000000000000000000000000000496e76656e746f727900000000000000")
                .unwrap()
        );
        assert_eq!(args.key.len(), 3);
        assert_eq!(
            args.key[0],
            B256::from_str("0x000000000000000000000000796eb990a3f9c431c69149c7a168b91596d87f60")
                .unwrap()
        );
        assert_eq!(args.key[1], B256::with_last_byte(1));
        assert_eq!(args.schema_index, Some(0));
        assert_eq!(args.data, vec![0, 0, 0, 8]);

        assert_eq!(encode_store_event_args(StoreEventKind::SetField, &args), data);
    }

    #[test]
    fn encodes_records_and_deletes() {
        let args = StoreEventArgs {
            table: B256::repeat_byte(7),
            key: vec![B256::with_last_byte(1), B256::with_last_byte(2)],
            schema_index: None,
            data: vec![1; 33],
        };
        let encoded = encode_store_event_args(StoreEventKind::SetRecord, &args);
        assert_eq!(encoded.len() % 32, 0);
        assert_eq!(decode_store_event_args(StoreEventKind::SetRecord, &encoded).unwrap(), args);

        let delete = StoreEventArgs {
            data: vec![],
            ..args
        };
        let encoded = encode_store_event_args(StoreEventKind::DeleteRecord, &delete);
        assert_eq!(encoded.len(), 2 * 32 + 32 + 2 * 32);
        assert_eq!(decode_store_event_args(StoreEventKind::DeleteRecord, &encoded).unwrap(), delete);
    }

    #[test]
    fn rejects_truncated_payloads() {
        let data = hex::decode(INVENTORY_SET_FIELD_DATA.trim_start_matches("0x")).unwrap();
        assert!(decode_store_event_args(StoreEventKind::SetField, &data[..290]).is_err());
        assert!(decode_store_event_args(StoreEventKind::SetField, &data[..40]).is_err());
    }

    #[test]
    fn rejects_overflowing_offsets_and_lengths() {
        let payload = |words: &[u64]| {
            let mut data = B256::repeat_byte(7).to_vec();
            for value in words {
                data.extend_from_slice(&usize_word(*value as usize));
            }
            data
        };

        let huge_key_offset = payload(&[u64::MAX, 96, 0]);
        assert!(decode_store_event_args(StoreEventKind::SetRecord, &huge_key_offset).is_err());

        let huge_data_length = payload(&[96, 128, 0, u64::MAX]);
        assert!(decode_store_event_args(StoreEventKind::SetRecord, &huge_data_length).is_err());

        let huge_key_count = payload(&[64, u64::MAX]);
        assert!(decode_store_event_args(StoreEventKind::DeleteRecord, &huge_key_count).is_err());
    }
}
