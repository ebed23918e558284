//! # strata-orm: schema contexts and batched association preloading
//!
//! Two pieces of an ORM's read path:
//!
//! - [`schema`]: per model, per connection shape metadata (columns, types,
//!   defaults, primary key and everything derived from them), loaded once
//!   with single-flight semantics and invalidated as a whole.
//! - [`preloader`]: loads nested associations for a set of records in the
//!   minimum number of batched queries, level by level.

pub mod config;
pub mod error;
pub mod preloader;
pub mod record;
pub mod schema;
pub mod scope;

pub use config::{ConfigError, PreloadConfig};
pub use error::*;
pub use preloader::{
    AssociationKind, AssociationMetadata, AssociationRegistry, Batch, BatchQuery,
    BatchQueryExecutor, PgBatchExecutor, PreloadContext, PreloadSpec, PreloadStats, Preloader,
};
pub use record::{Association, Record, RecordRef};
pub use schema::{
    AttributeModifications, AttributeType, Column, ColumnProvider, ConnectionAccessor, ContextKey,
    ContextSources, LoadedSchema, ModelDefinition, PrimaryKey, SchemaContext, SchemaOwner,
    SchemaRegistry,
};
pub use scope::{Operator, OrderDirection, Scope};
