//! Model definitions - the capabilities a schema context needs from its model

use super::attributes::AttributeModifications;
use super::column::PrimaryKey;

/// The narrow view of a model that a [`SchemaContext`](super::SchemaContext)
/// depends on. The context never calls back into anything else on the model.
pub trait SchemaOwner: Send + Sync {
    fn model_name(&self) -> &str;

    /// Table backing the model; `None` fails the schema load
    fn table_name(&self) -> Option<&str>;

    /// Explicit primary key; `None` derives it from the column metadata
    fn primary_key(&self) -> Option<PrimaryKey> {
        None
    }

    fn inheritance_column(&self) -> &str {
        "type"
    }

    /// When non-empty, only these columns are loaded
    fn only_columns(&self) -> &[String] {
        &[]
    }

    /// Columns dropped from the schema (ignored when `only_columns` is set)
    fn ignored_columns(&self) -> &[String] {
        &[]
    }

    /// Custom types and defaults layered over the raw column types.
    /// Consulted on every load so changes take effect after invalidation.
    fn pending_modifications(&self) -> AttributeModifications {
        AttributeModifications::default()
    }
}

/// Statically declared model definition
#[derive(Debug, Clone)]
pub struct ModelDefinition {
    name: String,
    table_name: Option<String>,
    primary_key: Option<PrimaryKey>,
    inheritance_column: String,
    only_columns: Vec<String>,
    ignored_columns: Vec<String>,
    modifications: AttributeModifications,
}

impl ModelDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table_name: None,
            primary_key: None,
            inheritance_column: "type".to_string(),
            only_columns: Vec::new(),
            ignored_columns: Vec::new(),
            modifications: AttributeModifications::default(),
        }
    }

    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    pub fn with_primary_key(mut self, primary_key: PrimaryKey) -> Self {
        self.primary_key = Some(primary_key);
        self
    }

    pub fn with_inheritance_column(mut self, column: impl Into<String>) -> Self {
        self.inheritance_column = column.into();
        self
    }

    pub fn with_only_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.only_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_ignored_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_attributes(mut self, modifications: AttributeModifications) -> Self {
        self.modifications = modifications;
        self
    }
}

impl SchemaOwner for ModelDefinition {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn table_name(&self) -> Option<&str> {
        self.table_name.as_deref()
    }

    fn primary_key(&self) -> Option<PrimaryKey> {
        self.primary_key.clone()
    }

    fn inheritance_column(&self) -> &str {
        &self.inheritance_column
    }

    fn only_columns(&self) -> &[String] {
        &self.only_columns
    }

    fn ignored_columns(&self) -> &[String] {
        &self.ignored_columns
    }

    fn pending_modifications(&self) -> AttributeModifications {
        self.modifications.clone()
    }
}
