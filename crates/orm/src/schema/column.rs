//! Column descriptors and primary key shapes

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::AttributeType;

/// Column metadata as reported by a [`ColumnProvider`](super::ColumnProvider)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    /// Database type name, empty for a null column
    pub sql_type: String,
    pub cast_type: AttributeType,
    pub default: Option<Value>,
    pub null: bool,
    pub primary_key: bool,
    /// Value is generated by the database on insert (serial, default function)
    pub auto_populated: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        let sql_type = sql_type.into();
        Self {
            name: name.into(),
            cast_type: AttributeType::from_sql_type(&sql_type),
            sql_type,
            default: None,
            null: true,
            primary_key: false,
            auto_populated: false,
        }
    }

    /// Placeholder returned for attributes without a backing column
    pub fn null_column(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: String::new(),
            cast_type: AttributeType::Value,
            default: None,
            null: true,
            primary_key: false,
            auto_populated: false,
        }
    }

    pub fn is_null_column(&self) -> bool {
        self.sql_type.is_empty()
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn not_null(mut self) -> Self {
        self.null = false;
        self
    }

    /// Mark as (part of) the primary key; primary keys are auto-populated
    /// unless the column carries an explicit default.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.null = false;
        self.auto_populated = self.default.is_none();
        self
    }

    pub fn auto_populated(mut self) -> Self {
        self.auto_populated = true;
        self
    }

    pub fn with_cast_type(mut self, cast_type: AttributeType) -> Self {
        self.cast_type = cast_type;
        self
    }
}

/// Primary key of a model, possibly composite
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PrimaryKey {
    #[default]
    None,
    Single(String),
    Composite(Vec<String>),
}

impl PrimaryKey {
    pub fn from_columns(mut columns: Vec<String>) -> Self {
        match columns.len() {
            0 => Self::None,
            1 => Self::Single(columns.remove(0)),
            _ => Self::Composite(columns),
        }
    }

    pub fn columns(&self) -> Vec<&str> {
        match self {
            Self::None => Vec::new(),
            Self::Single(column) => vec![column.as_str()],
            Self::Composite(columns) => columns.iter().map(String::as_str).collect(),
        }
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns().contains(&column)
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, Self::Composite(_))
    }

    pub fn single(&self) -> Option<&str> {
        match self {
            Self::Single(column) => Some(column.as_str()),
            _ => None,
        }
    }
}
