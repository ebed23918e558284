//! Schema sources - where a schema context gets its metadata from

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use super::column::{Column, PrimaryKey};
use crate::error::ModelResult;

/// Identifies a connection shape: connections sharing an adapter, column
/// types and SQL dialect share one key and therefore one schema cache, even
/// across shards or replicas.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextKey(String);

impl ContextKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ContextKey {
    fn default() -> Self {
        Self::new("default")
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContextKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for ContextKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Column metadata provider (table name → columns, in table order)
#[async_trait]
pub trait ColumnProvider: Send + Sync {
    async fn columns(&self, table_name: &str) -> ModelResult<Vec<Column>>;
}

/// Access to live connections of a context for connection-dependent metadata
#[async_trait]
pub trait ConnectionAccessor: Send + Sync {
    async fn default_sequence_name(
        &self,
        table_name: &str,
        primary_key: &PrimaryKey,
    ) -> ModelResult<Option<String>>;

    /// Whether the connection reads `column` back after an insert
    fn return_value_after_insert(&self, column: &Column) -> bool {
        column.auto_populated
    }
}

/// Connection accessor using the `<table>_<pk>_seq` naming convention
#[derive(Debug, Clone, Copy, Default)]
pub struct ConventionalSequences;

#[async_trait]
impl ConnectionAccessor for ConventionalSequences {
    async fn default_sequence_name(
        &self,
        table_name: &str,
        primary_key: &PrimaryKey,
    ) -> ModelResult<Option<String>> {
        Ok(primary_key
            .single()
            .map(|pk| format!("{}_{}_seq", table_name, pk)))
    }
}

/// Metadata sources registered for one context key
#[derive(Clone)]
pub struct ContextSources {
    pub columns: Arc<dyn ColumnProvider>,
    pub connections: Arc<dyn ConnectionAccessor>,
}

impl ContextSources {
    pub fn new(columns: Arc<dyn ColumnProvider>, connections: Arc<dyn ConnectionAccessor>) -> Self {
        Self {
            columns,
            connections,
        }
    }

    /// Sources with conventional sequence naming
    pub fn with_columns(columns: Arc<dyn ColumnProvider>) -> Self {
        Self::new(columns, Arc::new(ConventionalSequences))
    }
}

impl fmt::Debug for ContextSources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextSources").finish_non_exhaustive()
    }
}
