//! Schema contexts - lazily loaded, connection-shape scoped model metadata
//!
//! Each model keeps one [`SchemaContext`] per [`ContextKey`]. Connections that
//! share a schema shape (adapter, column types, SQL dialect) share a key, so
//! read replicas and shards of the same shape share cached metadata while a
//! differently shaped shard gets its own.

pub mod attributes;
pub mod column;
pub mod context;
pub mod definition;
pub mod postgres;
pub mod provider;
pub mod registry;
pub mod table;
pub mod types;

pub use attributes::{
    AttributeDescriptor, AttributeModification, AttributeModifications, AttributeSet,
    AttributeSource, AttributeTable, AttributesBuilder,
};
pub use column::{Column, PrimaryKey};
pub use context::{LoadedSchema, SchemaContext};
pub use definition::{ModelDefinition, SchemaOwner};
pub use postgres::{PgColumnProvider, PgConnectionAccessor};
pub use provider::{ColumnProvider, ConnectionAccessor, ContextKey, ContextSources, ConventionalSequences};
pub use registry::SchemaRegistry;
pub use table::{quote_identifier, TableMetadata};
pub use types::AttributeType;
