//! Binary and JSON codecs for store values.

pub mod field;
pub mod json;
pub mod key;
pub mod packed_counter;
pub mod record;
pub mod value;

use crate::schema::SchemaError;

pub use field::{decode_field, encode_field};
pub use json::{value_from_json, value_to_json};
pub use key::{EntityKey, decode_key_tuple, encode_key_tuple, entity_key};
pub use packed_counter::PackedCounter;
pub use record::{decode_record_values, encode_record_values};
pub use value::Value;

/// Errors raised while encoding or decoding field bytes
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("Invalid length for {ty}: expected {expected} bytes, got {actual}")]
    InvalidLength {
        ty: String,
        expected: usize,
        actual: usize,
    },

    #[error("{actual} bytes is not a multiple of the {width}-byte element width of {ty}")]
    MisalignedArray {
        ty: String,
        width: usize,
        actual: usize,
    },

    #[error("Invalid UTF-8 in string field: {0}")]
    InvalidUtf8(String),

    #[error("Key tuple has {actual} elements, schema expects {expected}")]
    KeyCountMismatch { expected: usize, actual: usize },

    #[error("Record has {actual} values, schema expects {expected}")]
    ValueCountMismatch { expected: usize, actual: usize },

    #[error("Value {value} does not fit {ty}")]
    ValueOutOfRange { ty: String, value: String },

    #[error("Value {value} does not match type {ty}")]
    TypeMismatch { ty: String, value: String },

    #[error("Invalid packed counter: {0}")]
    InvalidPackedCounter(String),

    #[error("Invalid JSON for {ty}: {reason}")]
    Json { ty: String, reason: String },

    #[error(transparent)]
    Schema(#[from] SchemaError),
}
