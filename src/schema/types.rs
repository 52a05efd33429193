//! Table identities, primitive schema types and the field layout derived from a value schema.

use alloy_primitives::{B256, keccak256};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Maximum number of statically sized fields in a value schema.
pub const MAX_STATIC_FIELDS: usize = 28;
/// Maximum number of dynamically sized fields in a value schema.
pub const MAX_DYNAMIC_FIELDS: usize = 5;
/// Maximum number of fields in any schema (one type tag per byte after the 4-byte header).
pub const MAX_TOTAL_FIELDS: usize = 28;

/// Errors raised while building or parsing schemas
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("Invalid table identifier: {0}")]
    InvalidTableId(String),

    #[error("Unknown schema type: {0}")]
    UnknownType(String),

    #[error("Unknown schema type tag: {0}")]
    UnknownTypeTag(u8),

    #[error("Invalid schema for table {table}: {reason}")]
    InvalidSchema { table: TableId, reason: String },

    #[error("Invalid schema encoding: {0}")]
    InvalidEncoding(String),
}

/// Fixed-width table identity: 16 bytes of namespace followed by 16 bytes of name,
/// each right-padded with zero bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableId(B256);

impl TableId {
    pub fn new(namespace: &str, name: &str) -> Result<Self, SchemaError> {
        if namespace.len() > 16 || name.len() > 16 {
            return Err(SchemaError::InvalidTableId(format!(
                "namespace and name are limited to 16 bytes each (got {:?}, {:?})",
                namespace, name
            )));
        }
        if name.is_empty() {
            return Err(SchemaError::InvalidTableId("table name is empty".to_string()));
        }

        let mut bytes = [0u8; 32];
        bytes[..namespace.len()].copy_from_slice(namespace.as_bytes());
        bytes[16..16 + name.len()].copy_from_slice(name.as_bytes());
        Ok(Self(B256::from(bytes)))
    }

    pub const fn from_bytes(bytes: B256) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &B256 {
        &self.0
    }

    pub fn namespace(&self) -> String {
        trimmed_utf8(&self.0[..16])
    }

    pub fn name(&self) -> String {
        trimmed_utf8(&self.0[16..])
    }
}

fn trimmed_utf8(bytes: &[u8]) -> String {
    let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |p| p + 1);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let namespace = self.namespace();
        if namespace.is_empty() {
            write!(f, "{}", self.name())
        } else {
            write!(f, "{}:{}", namespace, self.name())
        }
    }
}

impl fmt::Debug for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TableId({})", self)
    }
}

/// A primitive type with a fixed encoded width.
///
/// Integer and byte-array widths are stored in bytes (1..=32).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StaticType {
    Uint(u8),
    Int(u8),
    FixedBytes(u8),
    Bool,
    Address,
}

impl StaticType {
    /// Unsigned integer of the given bit width (8..=256, multiple of 8).
    pub fn uint(bits: u16) -> Result<Self, SchemaError> {
        integer_width(bits).map(Self::Uint)
    }

    /// Signed integer of the given bit width (8..=256, multiple of 8).
    pub fn int(bits: u16) -> Result<Self, SchemaError> {
        integer_width(bits).map(Self::Int)
    }

    /// Fixed-length byte array of 1..=32 bytes.
    pub fn fixed_bytes(len: u8) -> Result<Self, SchemaError> {
        if (1..=32).contains(&len) {
            Ok(Self::FixedBytes(len))
        } else {
            Err(SchemaError::UnknownType(format!("bytes{}", len)))
        }
    }

    /// Number of bytes this type occupies in packed encoding.
    pub fn byte_length(&self) -> usize {
        match self {
            StaticType::Uint(n) | StaticType::Int(n) | StaticType::FixedBytes(n) => *n as usize,
            StaticType::Bool => 1,
            StaticType::Address => 20,
        }
    }

    fn tag(&self) -> u8 {
        match self {
            StaticType::Uint(n) => n - 1,
            StaticType::Int(n) => 31 + n,
            StaticType::FixedBytes(n) => 63 + n,
            StaticType::Bool => 96,
            StaticType::Address => 97,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0..=31 => Some(StaticType::Uint(tag + 1)),
            32..=63 => Some(StaticType::Int(tag - 31)),
            64..=95 => Some(StaticType::FixedBytes(tag - 63)),
            96 => Some(StaticType::Bool),
            97 => Some(StaticType::Address),
            _ => None,
        }
    }

    fn is_valid(&self) -> bool {
        match self {
            StaticType::Uint(n) | StaticType::Int(n) | StaticType::FixedBytes(n) => {
                (1..=32).contains(n)
            }
            StaticType::Bool | StaticType::Address => true,
        }
    }
}

fn integer_width(bits: u16) -> Result<u8, SchemaError> {
    if bits == 0 || bits > 256 || bits % 8 != 0 {
        return Err(SchemaError::UnknownType(format!("int{}", bits)));
    }
    Ok((bits / 8) as u8)
}

impl fmt::Display for StaticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaticType::Uint(n) => write!(f, "uint{}", *n as u16 * 8),
            StaticType::Int(n) => write!(f, "int{}", *n as u16 * 8),
            StaticType::FixedBytes(n) => write!(f, "bytes{}", n),
            StaticType::Bool => write!(f, "bool"),
            StaticType::Address => write!(f, "address"),
        }
    }
}

impl FromStr for StaticType {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || SchemaError::UnknownType(s.to_string());
        match s {
            "bool" => Ok(StaticType::Bool),
            "address" => Ok(StaticType::Address),
            _ => {
                if let Some(bits) = s.strip_prefix("uint") {
                    let bits: u16 = bits.parse().map_err(|_| unknown())?;
                    StaticType::uint(bits).map_err(|_| unknown())
                } else if let Some(bits) = s.strip_prefix("int") {
                    let bits: u16 = bits.parse().map_err(|_| unknown())?;
                    StaticType::int(bits).map_err(|_| unknown())
                } else if let Some(len) = s.strip_prefix("bytes") {
                    let len: u8 = len.parse().map_err(|_| unknown())?;
                    StaticType::fixed_bytes(len).map_err(|_| unknown())
                } else {
                    Err(unknown())
                }
            }
        }
    }
}

/// Every type a table field can have.
///
/// The set is closed: each variant has exactly one default value, one byte
/// encoding and one storage column kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SchemaType {
    Static(StaticType),
    /// Homogeneous array of a fixed-width element type.
    Array(StaticType),
    Bytes,
    String,
}

impl SchemaType {
    pub fn is_static(&self) -> bool {
        matches!(self, SchemaType::Static(_))
    }

    /// Encoded width for static types, `None` for dynamic ones.
    pub fn static_byte_length(&self) -> Option<usize> {
        match self {
            SchemaType::Static(ty) => Some(ty.byte_length()),
            SchemaType::Array(_) | SchemaType::Bytes | SchemaType::String => None,
        }
    }

    /// One-byte type tag used by the bytes32 schema encoding.
    pub fn tag(&self) -> u8 {
        match self {
            SchemaType::Static(ty) => ty.tag(),
            SchemaType::Array(elem) => elem.tag() + 98,
            SchemaType::Bytes => 196,
            SchemaType::String => 197,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, SchemaError> {
        match tag {
            0..=97 => StaticType::from_tag(tag).map(SchemaType::Static),
            98..=195 => StaticType::from_tag(tag - 98).map(SchemaType::Array),
            196 => Some(SchemaType::Bytes),
            197 => Some(SchemaType::String),
            _ => None,
        }
        .ok_or(SchemaError::UnknownTypeTag(tag))
    }

    fn is_valid(&self) -> bool {
        match self {
            SchemaType::Static(ty) | SchemaType::Array(ty) => ty.is_valid(),
            SchemaType::Bytes | SchemaType::String => true,
        }
    }
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaType::Static(ty) => write!(f, "{}", ty),
            SchemaType::Array(elem) => write!(f, "{}[]", elem),
            SchemaType::Bytes => write!(f, "bytes"),
            SchemaType::String => write!(f, "string"),
        }
    }
}

impl FromStr for SchemaType {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(elem) = s.strip_suffix("[]") {
            return Ok(SchemaType::Array(elem.parse()?));
        }
        match s {
            "bytes" => Ok(SchemaType::Bytes),
            "string" => Ok(SchemaType::String),
            _ => Ok(SchemaType::Static(s.parse()?)),
        }
    }
}

impl TryFrom<String> for SchemaType {
    type Error = SchemaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SchemaType> for String {
    fn from(value: SchemaType) -> Self {
        value.to_string()
    }
}

/// A named field of a key or value schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: SchemaType,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, ty: SchemaType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Key and value schema of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    pub table_id: TableId,
    pub key_schema: Vec<FieldDef>,
    pub value_schema: Vec<FieldDef>,
}

impl TableSchema {
    /// Build and validate a schema.
    pub fn new(
        table_id: TableId,
        key_schema: Vec<FieldDef>,
        value_schema: Vec<FieldDef>,
    ) -> Result<Self, SchemaError> {
        let schema = Self {
            table_id,
            key_schema,
            value_schema,
        };
        schema.validate()?;
        Ok(schema)
    }

    /// Check the structural rules every resolved schema must satisfy.
    ///
    /// Keys are static; value schemas list static fields before dynamic ones and
    /// stay within the packed-counter and field-layout limits.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let invalid = |reason: String| SchemaError::InvalidSchema {
            table: self.table_id,
            reason,
        };

        let mut names = HashSet::new();
        for field in self.key_schema.iter().chain(self.value_schema.iter()) {
            if field.name.is_empty() {
                return Err(invalid("field names must not be empty".to_string()));
            }
            if field.name.starts_with("__") {
                return Err(invalid(format!("field name {:?} is reserved", field.name)));
            }
            if !names.insert(field.name.as_str()) {
                return Err(invalid(format!("duplicate field name {:?}", field.name)));
            }
            if !field.ty.is_valid() {
                return Err(invalid(format!("field {:?} has an invalid type", field.name)));
            }
        }

        if self.key_schema.len() > MAX_TOTAL_FIELDS {
            return Err(invalid(format!(
                "{} key fields exceed the limit of {}",
                self.key_schema.len(),
                MAX_TOTAL_FIELDS
            )));
        }
        if let Some(field) = self.key_schema.iter().find(|f| !f.ty.is_static()) {
            return Err(invalid(format!(
                "key field {:?} has dynamic type {}",
                field.name, field.ty
            )));
        }

        let first_dynamic = self
            .value_schema
            .iter()
            .position(|f| !f.ty.is_static())
            .unwrap_or(self.value_schema.len());
        if let Some(field) = self.value_schema[first_dynamic..]
            .iter()
            .find(|f| f.ty.is_static())
        {
            return Err(invalid(format!(
                "static value field {:?} is declared after a dynamic field",
                field.name
            )));
        }

        let num_static = first_dynamic;
        let num_dynamic = self.value_schema.len() - first_dynamic;
        if num_static > MAX_STATIC_FIELDS || num_dynamic > MAX_DYNAMIC_FIELDS {
            return Err(invalid(format!(
                "{} static / {} dynamic value fields exceed the limits of {} / {}",
                num_static, num_dynamic, MAX_STATIC_FIELDS, MAX_DYNAMIC_FIELDS
            )));
        }
        if self.value_schema.len() > MAX_TOTAL_FIELDS {
            return Err(invalid(format!(
                "{} value fields exceed the limit of {}",
                self.value_schema.len(),
                MAX_TOTAL_FIELDS
            )));
        }
        if self.field_layout().static_data_length() > u16::MAX as usize {
            return Err(invalid("static data length exceeds 65535 bytes".to_string()));
        }

        Ok(())
    }

    pub fn field_layout(&self) -> FieldLayout {
        FieldLayout::from_value_schema(&self.value_schema)
    }

    /// Value field at a positional index (as referenced by SetField events).
    pub fn value_field(&self, index: usize) -> Option<&FieldDef> {
        self.value_schema.get(index)
    }

    pub fn value_field_by_name(&self, name: &str) -> Option<(usize, &FieldDef)> {
        self.value_schema
            .iter()
            .enumerate()
            .find(|(_, field)| field.name == name)
    }

    pub fn static_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.value_schema.iter().filter(|f| f.ty.is_static())
    }

    pub fn dynamic_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.value_schema.iter().filter(|f| !f.ty.is_static())
    }

    /// Digest over identity, field names and field types.
    ///
    /// Two schemas with the same hash decode and store records identically.
    pub fn schema_hash(&self) -> B256 {
        let mut preimage = Vec::with_capacity(64 + 32 * self.value_schema.len());
        preimage.extend_from_slice(self.table_id.as_bytes().as_slice());
        for (section, fields) in [(b'k', &self.key_schema), (b'v', &self.value_schema)] {
            preimage.push(section);
            for field in fields {
                preimage.push(field.ty.tag());
                preimage.extend_from_slice(&(field.name.len() as u32).to_be_bytes());
                preimage.extend_from_slice(field.name.as_bytes());
            }
        }
        keccak256(preimage)
    }
}

/// Byte-slicing plan for a value blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldLayout {
    static_field_lengths: Vec<usize>,
    num_dynamic_fields: usize,
}

impl FieldLayout {
    pub fn new(static_field_lengths: Vec<usize>, num_dynamic_fields: usize) -> Self {
        Self {
            static_field_lengths,
            num_dynamic_fields,
        }
    }

    pub fn from_value_schema(value_schema: &[FieldDef]) -> Self {
        let static_field_lengths = value_schema
            .iter()
            .filter_map(|f| f.ty.static_byte_length())
            .collect::<Vec<_>>();
        let num_dynamic_fields = value_schema.len() - static_field_lengths.len();
        Self::new(static_field_lengths, num_dynamic_fields)
    }

    pub fn static_field_lengths(&self) -> &[usize] {
        &self.static_field_lengths
    }

    pub fn num_static_fields(&self) -> usize {
        self.static_field_lengths.len()
    }

    pub fn num_dynamic_fields(&self) -> usize {
        self.num_dynamic_fields
    }

    /// Total length of the static prefix of an encoded value.
    pub fn static_data_length(&self) -> usize {
        self.static_field_lengths.iter().sum()
    }

    /// Canonical 32-byte encoding: total static length (u16), static count,
    /// dynamic count, then one byte per static field length.
    pub fn encode(&self) -> Result<B256, SchemaError> {
        if self.static_field_lengths.len() > MAX_STATIC_FIELDS
            || self.num_dynamic_fields > MAX_DYNAMIC_FIELDS
        {
            return Err(SchemaError::InvalidEncoding(format!(
                "field layout with {} static / {} dynamic fields cannot be encoded",
                self.static_field_lengths.len(),
                self.num_dynamic_fields
            )));
        }
        let total = self.static_data_length();
        let total = u16::try_from(total).map_err(|_| {
            SchemaError::InvalidEncoding(format!("static data length {} exceeds u16", total))
        })?;

        let mut word = [0u8; 32];
        word[..2].copy_from_slice(&total.to_be_bytes());
        word[2] = self.static_field_lengths.len() as u8;
        word[3] = self.num_dynamic_fields as u8;
        for (i, len) in self.static_field_lengths.iter().enumerate() {
            if *len == 0 || *len > 32 {
                return Err(SchemaError::InvalidEncoding(format!(
                    "static field length {} is out of range",
                    len
                )));
            }
            word[4 + i] = *len as u8;
        }
        Ok(B256::from(word))
    }

    pub fn decode(word: &B256) -> Result<Self, SchemaError> {
        let total = u16::from_be_bytes([word[0], word[1]]) as usize;
        let num_static = word[2] as usize;
        let num_dynamic = word[3] as usize;
        if num_static > MAX_STATIC_FIELDS || num_dynamic > MAX_DYNAMIC_FIELDS {
            return Err(SchemaError::InvalidEncoding(format!(
                "field layout declares {} static / {} dynamic fields",
                num_static, num_dynamic
            )));
        }
        let lengths = word[4..4 + num_static]
            .iter()
            .map(|b| *b as usize)
            .collect::<Vec<_>>();
        let layout = Self::new(lengths, num_dynamic);
        if layout.static_data_length() != total {
            return Err(SchemaError::InvalidEncoding(format!(
                "field layout total {} does not match field lengths (sum {})",
                total,
                layout.static_data_length()
            )));
        }
        Ok(layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ty(s: &str) -> SchemaType {
        s.parse().unwrap()
    }

    #[test]
    fn every_tag_maps_back_to_itself() {
        for tag in 0..=197u8 {
            let schema_type = SchemaType::from_tag(tag).unwrap();
            assert_eq!(schema_type.tag(), tag, "tag {} ({})", tag, schema_type);
            assert_eq!(schema_type.to_string().parse::<SchemaType>().unwrap(), schema_type);
        }
        assert_eq!(SchemaType::from_tag(198), Err(SchemaError::UnknownTypeTag(198)));
        assert_eq!(SchemaType::from_tag(255), Err(SchemaError::UnknownTypeTag(255)));
    }

    #[test]
    fn parses_abi_type_names() {
        assert_eq!(ty("uint32"), SchemaType::Static(StaticType::Uint(4)));
        assert_eq!(ty("int256"), SchemaType::Static(StaticType::Int(32)));
        assert_eq!(ty("bytes4"), SchemaType::Static(StaticType::FixedBytes(4)));
        assert_eq!(ty("bytes"), SchemaType::Bytes);
        assert_eq!(ty("string"), SchemaType::String);
        assert_eq!(ty("address[]"), SchemaType::Array(StaticType::Address));
        assert_eq!(ty("uint8"), SchemaType::from_tag(0).unwrap());
        assert_eq!(ty("uint256[]"), SchemaType::from_tag(129).unwrap());

        for bad in ["uint7", "uint264", "int0", "bytes0", "bytes33", "string[]", "float", ""] {
            assert!(bad.parse::<SchemaType>().is_err(), "{:?} should not parse", bad);
        }
    }

    #[test]
    fn table_id_packs_namespace_and_name() {
        let id = TableId::new("", "Inventory").unwrap();
        assert_eq!(
            hex::encode(id.as_bytes()),
            "00000000000000000000000000000000496e76656e746f727900000000000000"
        );
        assert_eq!(id.name(), "Inventory");
        assert_eq!(id.namespace(), "");
        assert_eq!(id.to_string(), "Inventory");

        let id = TableId::new("mudstore", "schema").unwrap();
        assert_eq!(id.to_string(), "mudstore:schema");
        assert!(TableId::new("a-namespace-too-long", "x").is_err());
    }

    #[test]
    fn rejects_static_value_fields_after_dynamic_ones() {
        let id = TableId::new("", "Bad").unwrap();
        let err = TableSchema::new(
            id,
            vec![FieldDef::new("id", ty("uint32"))],
            vec![
                FieldDef::new("name", ty("string")),
                FieldDef::new("amount", ty("uint32")),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidSchema { .. }));

        let err = TableSchema::new(id, vec![FieldDef::new("id", ty("string"))], vec![]).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidSchema { .. }));

        let dynamic = (0..6)
            .map(|i| FieldDef::new(format!("d{}", i), ty("bytes")))
            .collect();
        assert!(TableSchema::new(id, vec![], dynamic).is_err());
    }

    #[test]
    fn field_layout_encodes_lengths() {
        let id = TableId::new("", "Thing").unwrap();
        let schema = TableSchema::new(
            id,
            vec![FieldDef::new("id", ty("bytes32"))],
            vec![
                FieldDef::new("amount", ty("uint32")),
                FieldDef::new("owner", ty("address")),
                FieldDef::new("flag", ty("bool")),
                FieldDef::new("name", ty("string")),
                FieldDef::new("ids", ty("uint8[]")),
            ],
        )
        .unwrap();

        let layout = schema.field_layout();
        assert_eq!(layout.static_field_lengths(), &[4, 20, 1]);
        assert_eq!(layout.static_data_length(), 25);
        assert_eq!(layout.num_dynamic_fields(), 2);

        let word = layout.encode().unwrap();
        assert_eq!(&word[..7], &[0x00, 0x19, 0x03, 0x02, 0x04, 0x14, 0x01]);
        assert_eq!(FieldLayout::decode(&word).unwrap(), layout);
    }

    #[test]
    fn schema_hash_tracks_names_and_types() {
        let id = TableId::new("", "Thing").unwrap();
        let a = TableSchema::new(id, vec![], vec![FieldDef::new("amount", ty("uint32"))]).unwrap();
        let b = TableSchema::new(id, vec![], vec![FieldDef::new("amount", ty("uint64"))]).unwrap();
        let c = TableSchema::new(id, vec![], vec![FieldDef::new("count", ty("uint32"))]).unwrap();
        assert_eq!(a.schema_hash(), a.clone().schema_hash());
        assert_ne!(a.schema_hash(), b.schema_hash());
        assert_ne!(a.schema_hash(), c.schema_hash());
    }
}
