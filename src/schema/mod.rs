pub mod encoding;
pub mod registry;
pub mod resolver;
pub mod types;

pub use encoding::{decode_schema, encode_schema};
pub use registry::{SchemaNotFound, SchemaRegistry};
pub use resolver::{ResolverError, RpcSchemaResolver, SchemaResolver, StaticSchemaResolver};
pub use types::{
    FieldDef, FieldLayout, MAX_DYNAMIC_FIELDS, MAX_STATIC_FIELDS, MAX_TOTAL_FIELDS, SchemaError,
    SchemaType, StaticType, TableId, TableSchema,
};
