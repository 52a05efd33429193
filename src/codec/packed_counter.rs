use super::CodecError;
use crate::schema::MAX_DYNAMIC_FIELDS;

/// Encoded size of the dynamic-field header.
pub const PACKED_COUNTER_LENGTH: usize = 32;

const TOTAL_LENGTH_BYTES: usize = 7;
const FIELD_LENGTH_BYTES: usize = 5;
const MAX_FIELD_LENGTH: u64 = (1 << 40) - 1;
const MAX_TOTAL_LENGTH: u64 = (1 << 56) - 1;

/// Header that precedes the dynamic section of a value blob.
///
/// The low 7 bytes (bytes 25..32) hold the total dynamic length. Dynamic field
/// `i` stores its byte length in the 5 bytes `[25 - 5(i + 1), 25 - 5i)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedCounter {
    total: u64,
    lengths: Vec<u64>,
}

impl PackedCounter {
    pub fn from_lengths(lengths: &[usize]) -> Result<Self, CodecError> {
        if lengths.len() > MAX_DYNAMIC_FIELDS {
            return Err(CodecError::InvalidPackedCounter(format!(
                "{} dynamic fields exceed the limit of {}",
                lengths.len(),
                MAX_DYNAMIC_FIELDS
            )));
        }
        let lengths = lengths.iter().map(|l| *l as u64).collect::<Vec<_>>();
        if let Some(len) = lengths.iter().find(|l| **l > MAX_FIELD_LENGTH) {
            return Err(CodecError::InvalidPackedCounter(format!(
                "dynamic field length {} does not fit in 40 bits",
                len
            )));
        }
        let total = lengths.iter().sum::<u64>();
        if total > MAX_TOTAL_LENGTH {
            return Err(CodecError::InvalidPackedCounter(format!(
                "total dynamic length {} does not fit in 56 bits",
                total
            )));
        }
        Ok(Self { total, lengths })
    }

    pub fn decode(bytes: &[u8], num_dynamic_fields: usize) -> Result<Self, CodecError> {
        if bytes.len() != PACKED_COUNTER_LENGTH {
            return Err(CodecError::InvalidLength {
                ty: "packed counter".to_string(),
                expected: PACKED_COUNTER_LENGTH,
                actual: bytes.len(),
            });
        }
        if num_dynamic_fields > MAX_DYNAMIC_FIELDS {
            return Err(CodecError::InvalidPackedCounter(format!(
                "{} dynamic fields exceed the limit of {}",
                num_dynamic_fields, MAX_DYNAMIC_FIELDS
            )));
        }

        let total = read_be(&bytes[PACKED_COUNTER_LENGTH - TOTAL_LENGTH_BYTES..]);
        let lengths = (0..num_dynamic_fields)
            .map(|i| {
                let end = PACKED_COUNTER_LENGTH - TOTAL_LENGTH_BYTES - FIELD_LENGTH_BYTES * i;
                read_be(&bytes[end - FIELD_LENGTH_BYTES..end])
            })
            .collect::<Vec<_>>();

        let sum = lengths.iter().sum::<u64>();
        if sum != total {
            return Err(CodecError::InvalidPackedCounter(format!(
                "field lengths sum to {} but the total is {}",
                sum, total
            )));
        }
        Ok(Self { total, lengths })
    }

    pub fn encode(&self) -> [u8; PACKED_COUNTER_LENGTH] {
        let mut out = [0u8; PACKED_COUNTER_LENGTH];
        let total = self.total.to_be_bytes();
        out[PACKED_COUNTER_LENGTH - TOTAL_LENGTH_BYTES..]
            .copy_from_slice(&total[8 - TOTAL_LENGTH_BYTES..]);
        for (i, len) in self.lengths.iter().enumerate() {
            let end = PACKED_COUNTER_LENGTH - TOTAL_LENGTH_BYTES - FIELD_LENGTH_BYTES * i;
            out[end - FIELD_LENGTH_BYTES..end]
                .copy_from_slice(&len.to_be_bytes()[8 - FIELD_LENGTH_BYTES..]);
        }
        out
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn lengths(&self) -> &[u64] {
        &self.lengths
    }
}

fn read_be(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn places_lengths_from_the_low_end() {
        let counter = PackedCounter::from_lengths(&[5, 0x0102]).unwrap();
        let encoded = counter.encode();

        assert_eq!(&encoded[25..], &[0, 0, 0, 0, 0, 0x01, 0x07]);
        assert_eq!(&encoded[20..25], &[0, 0, 0, 0, 5]);
        assert_eq!(&encoded[15..20], &[0, 0, 0, 0x01, 0x02]);
        assert!(encoded[..15].iter().all(|b| *b == 0));

        assert_eq!(PackedCounter::decode(&encoded, 2).unwrap(), counter);
    }

    #[test]
    fn rejects_inconsistent_totals() {
        let mut encoded = PackedCounter::from_lengths(&[3, 4]).unwrap().encode();
        encoded[31] = 8;
        assert!(matches!(
            PackedCounter::decode(&encoded, 2),
            Err(CodecError::InvalidPackedCounter(_))
        ));
        assert!(PackedCounter::decode(&encoded[..31], 2).is_err());
        assert!(PackedCounter::from_lengths(&[1, 1, 1, 1, 1, 1]).is_err());
    }
}
