use crate::schema::{SchemaType, StaticType};
use alloy_primitives::{Address, I256, U256};
use std::fmt;

/// A decoded field value.
///
/// Integers of every width are held in 256-bit representations so that no
/// width ever truncates; the schema type carries the declared width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    Uint(U256),
    Int(I256),
    FixedBytes(Vec<u8>),
    Address(Address),
    Bytes(Vec<u8>),
    String(String),
    Array(Vec<Value>),
}

impl Value {
    pub fn uint(value: u64) -> Self {
        Value::Uint(U256::from(value))
    }

    pub fn int(value: i64) -> Self {
        Value::Int(i256_from_i64(value))
    }

    /// Canonical default for a schema type: zero, false, the zero address,
    /// zero-filled fixed bytes, or an empty dynamic value.
    pub fn default_for(ty: &SchemaType) -> Self {
        match ty {
            SchemaType::Static(ty) => Self::default_for_static(*ty),
            SchemaType::Array(_) => Value::Array(Vec::new()),
            SchemaType::Bytes => Value::Bytes(Vec::new()),
            SchemaType::String => Value::String(String::new()),
        }
    }

    pub fn default_for_static(ty: StaticType) -> Self {
        match ty {
            StaticType::Uint(_) => Value::Uint(U256::ZERO),
            StaticType::Int(_) => Value::Int(I256::ZERO),
            StaticType::FixedBytes(n) => Value::FixedBytes(vec![0u8; n as usize]),
            StaticType::Bool => Value::Bool(false),
            StaticType::Address => Value::Address(Address::ZERO),
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Uint(v) => u64::try_from(*v).ok(),
            Value::Int(v) if !v.is_negative() => u64::try_from(v.into_raw()).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<Address> for Value {
    fn from(value: Address) -> Self {
        Value::Address(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Uint(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::FixedBytes(bytes) | Value::Bytes(bytes) => {
                write!(f, "0x{}", hex::encode(bytes))
            }
            Value::Address(address) => write!(f, "{}", address.to_checksum(None)),
            Value::String(s) => write!(f, "{}", s),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

pub(crate) fn i256_from_i64(value: i64) -> I256 {
    let magnitude = U256::from(value.unsigned_abs());
    if value < 0 {
        I256::from_raw(U256::ZERO.wrapping_sub(magnitude))
    } else {
        I256::from_raw(magnitude)
    }
}

pub(crate) fn i256_to_i64(value: I256) -> Option<i64> {
    let raw = value.into_raw();
    if value.is_negative() {
        let magnitude = u64::try_from(U256::ZERO.wrapping_sub(raw)).ok()?;
        if magnitude > i64::MAX as u64 + 1 {
            return None;
        }
        Some((magnitude as i128).wrapping_neg() as i64)
    } else {
        i64::try_from(u64::try_from(raw).ok()?).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_signed_conversions_round_trip() {
        for v in [0i64, 1, -1, 42, -42, i64::MAX, i64::MIN] {
            assert_eq!(i256_to_i64(i256_from_i64(v)), Some(v));
        }
        assert_eq!(i256_to_i64(I256::MAX), None);
        assert_eq!(i256_to_i64(I256::MIN), None);
    }

    #[test]
    fn defaults_follow_type() {
        let ty = |s: &str| s.parse::<SchemaType>().unwrap();
        assert_eq!(Value::default_for(&ty("uint32")), Value::uint(0));
        assert_eq!(Value::default_for(&ty("int8")), Value::int(0));
        assert_eq!(Value::default_for(&ty("bytes4")), Value::FixedBytes(vec![0; 4]));
        assert_eq!(Value::default_for(&ty("address")), Value::Address(Address::ZERO));
        assert_eq!(Value::default_for(&ty("string")), Value::String(String::new()));
        assert_eq!(Value::default_for(&ty("bool[]")), Value::Array(vec![]));
    }
}
