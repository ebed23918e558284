//! Attribute descriptors - statically declared attribute tables
//!
//! A model's attributes are described by an [`AttributeTable`] built from its
//! columns with the model's pending [`AttributeModifications`] layered on top.
//! Values are read and written through [`AttributeSet`], which casts every
//! write through the declared type.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::column::Column;
use super::types::AttributeType;
use crate::error::{ModelError, ModelResult};

/// Where an attribute's value lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeSource {
    Column,
    /// Declared on the model only, never read from or written to the table
    Virtual,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDescriptor {
    pub name: String,
    pub attribute_type: AttributeType,
    pub default: Option<Value>,
    pub source: AttributeSource,
}

/// A single declared change to the column-derived attributes
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeModification {
    /// Declare an attribute or override a column's type (and optionally its default)
    Declare {
        name: String,
        attribute_type: AttributeType,
        default: Option<Value>,
    },
    /// Override only the default of an attribute
    Default { name: String, value: Value },
}

/// Pending attribute modifications declared on a model, applied in order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeModifications {
    entries: Vec<AttributeModification>,
}

impl AttributeModifications {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attribute(mut self, name: impl Into<String>, attribute_type: AttributeType) -> Self {
        self.entries.push(AttributeModification::Declare {
            name: name.into(),
            attribute_type,
            default: None,
        });
        self
    }

    pub fn attribute_with_default(
        mut self,
        name: impl Into<String>,
        attribute_type: AttributeType,
        default: Value,
    ) -> Self {
        self.entries.push(AttributeModification::Declare {
            name: name.into(),
            attribute_type,
            default: Some(default),
        });
        self
    }

    pub fn default_value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.entries.push(AttributeModification::Default {
            name: name.into(),
            value,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[AttributeModification] {
        &self.entries
    }
}

/// Ordered name → descriptor table for one model in one schema context
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeTable {
    descriptors: Vec<AttributeDescriptor>,
    index: HashMap<String, usize>,
}

impl AttributeTable {
    /// Build the table from raw columns, then apply the modifications
    pub fn from_columns(
        columns: &[Column],
        modifications: &AttributeModifications,
    ) -> ModelResult<Self> {
        let mut table = Self::default();
        for column in columns {
            let default = column
                .default
                .as_ref()
                .map(|value| column.cast_type.deserialize(value))
                .transpose()?;
            table.upsert(AttributeDescriptor {
                name: column.name.clone(),
                attribute_type: column.cast_type,
                default,
                source: AttributeSource::Column,
            });
        }

        for modification in modifications.entries() {
            match modification {
                AttributeModification::Declare {
                    name,
                    attribute_type,
                    default,
                } => {
                    let source = table
                        .get(name)
                        .map(|existing| existing.source)
                        .unwrap_or(AttributeSource::Virtual);
                    // A type override without a default keeps the column default, recast
                    let default = match default {
                        Some(value) => Some(attribute_type.cast(value)?),
                        None => table
                            .get(name)
                            .and_then(|existing| existing.default.clone())
                            .map(|value| attribute_type.cast(&value))
                            .transpose()?,
                    };
                    table.upsert(AttributeDescriptor {
                        name: name.clone(),
                        attribute_type: *attribute_type,
                        default,
                        source,
                    });
                }
                AttributeModification::Default { name, value } => {
                    let position = *table.index.get(name).ok_or_else(|| {
                        ModelError::Schema(format!(
                            "Cannot set a default for undeclared attribute '{}'",
                            name
                        ))
                    })?;
                    let descriptor = &mut table.descriptors[position];
                    descriptor.default = Some(descriptor.attribute_type.cast(value)?);
                }
            }
        }

        Ok(table)
    }

    fn upsert(&mut self, descriptor: AttributeDescriptor) {
        match self.index.get(&descriptor.name) {
            Some(&position) => self.descriptors[position] = descriptor,
            None => {
                self.index.insert(descriptor.name.clone(), self.descriptors.len());
                self.descriptors.push(descriptor);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.index.get(name).map(|&position| &self.descriptors[position])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttributeDescriptor> {
        self.descriptors.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.descriptors.iter().map(|d| d.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn types(&self) -> HashMap<String, AttributeType> {
        self.descriptors
            .iter()
            .map(|d| (d.name.clone(), d.attribute_type))
            .collect()
    }

    pub fn defaults(&self) -> HashMap<String, Option<Value>> {
        self.descriptors
            .iter()
            .map(|d| (d.name.clone(), d.default.clone()))
            .collect()
    }
}

/// Attribute values of one record, typed by an [`AttributeTable`]
#[derive(Debug, Clone)]
pub struct AttributeSet {
    model: String,
    table: Arc<AttributeTable>,
    values: Map<String, Value>,
}

impl AttributeSet {
    pub fn read(&self, name: &str) -> ModelResult<&Value> {
        if !self.table.contains(name) {
            return Err(self.unknown(name));
        }
        Ok(self.values.get(name).unwrap_or(&Value::Null))
    }

    /// Cast `value` through the attribute's declared type and store it
    pub fn write(&mut self, name: &str, value: Value) -> ModelResult<()> {
        let descriptor = self.table.get(name).ok_or_else(|| self.unknown(name))?;
        let cast = descriptor.attribute_type.cast(&value)?;
        self.values.insert(name.to_string(), cast);
        Ok(())
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.values
    }

    fn unknown(&self, name: &str) -> ModelError {
        ModelError::UnknownAttribute {
            model: self.model.clone(),
            attribute: name.to_string(),
        }
    }
}

/// Builds attribute sets for new records and records read from the database
#[derive(Debug, Clone)]
pub struct AttributesBuilder {
    model: String,
    table: Arc<AttributeTable>,
    /// Defaults applied to rows read from the database: virtual attributes
    /// and primary key columns only
    row_defaults: HashMap<String, Value>,
}

impl AttributesBuilder {
    pub fn new(model: impl Into<String>, table: Arc<AttributeTable>, primary_key: &[&str]) -> Self {
        let row_defaults = table
            .iter()
            .filter(|d| d.source == AttributeSource::Virtual || primary_key.contains(&d.name.as_str()))
            .filter_map(|d| d.default.clone().map(|value| (d.name.clone(), value)))
            .collect();

        Self {
            model: model.into(),
            table,
            row_defaults,
        }
    }

    /// Attribute set for a new record, filled with every declared default
    pub fn build_new(&self) -> AttributeSet {
        let values = self
            .table
            .iter()
            .map(|d| (d.name.clone(), d.default.clone().unwrap_or(Value::Null)))
            .collect();

        AttributeSet {
            model: self.model.clone(),
            table: Arc::clone(&self.table),
            values,
        }
    }

    /// Attribute set for a database row; values are deserialized through
    /// their declared types, columns missing from the row stay absent
    pub fn build_from_database(&self, row: &Map<String, Value>) -> ModelResult<AttributeSet> {
        let mut values = Map::new();
        for descriptor in self.table.iter() {
            if let Some(raw) = row.get(&descriptor.name) {
                values.insert(
                    descriptor.name.clone(),
                    descriptor.attribute_type.deserialize(raw)?,
                );
            } else if let Some(default) = self.row_defaults.get(&descriptor.name) {
                values.insert(descriptor.name.clone(), default.clone());
            }
        }

        Ok(AttributeSet {
            model: self.model.clone(),
            table: Arc::clone(&self.table),
            values,
        })
    }
}
