//! Table metadata used when building queries against a model's table

use std::collections::HashMap;

use serde_json::Value;

use super::types::AttributeType;
use crate::error::{ModelError, ModelResult};
use crate::scope::{Condition, Operator};

/// Table name plus the attribute types needed to cast query values
#[derive(Debug, Clone, PartialEq)]
pub struct TableMetadata {
    table_name: String,
    types: HashMap<String, AttributeType>,
}

impl TableMetadata {
    pub fn new(table_name: impl Into<String>, types: HashMap<String, AttributeType>) -> Self {
        Self {
            table_name: table_name.into(),
            types,
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn quoted_table_name(&self) -> String {
        quote_identifier(&self.table_name)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.types.contains_key(column)
    }

    /// Type of `column`; unknown columns are untyped
    pub fn type_for(&self, column: &str) -> AttributeType {
        self.types.get(column).copied().unwrap_or(AttributeType::Value)
    }

    pub fn cast_value(&self, column: &str, value: &Value) -> ModelResult<Value> {
        self.type_for(column).cast(value)
    }

    /// Build a condition with its value cast to the column type
    pub fn build_predicate(
        &self,
        column: &str,
        operator: Operator,
        value: &Value,
    ) -> ModelResult<Condition> {
        let value = match (operator, value) {
            (Operator::In | Operator::NotIn, Value::Array(items)) => Value::Array(
                items
                    .iter()
                    .map(|item| self.cast_value(column, item))
                    .collect::<ModelResult<Vec<_>>>()?,
            ),
            (Operator::In | Operator::NotIn, other) => {
                return Err(ModelError::Query(format!(
                    "{} on '{}' requires an array, got {}",
                    operator.as_sql(),
                    column,
                    other
                )))
            }
            (op, _) if op.is_unary() => Value::Null,
            (_, other) => self.cast_value(column, other)?,
        };
        Ok(Condition::new(column, operator, value))
    }
}

/// Quote an identifier for PostgreSQL, doubling embedded quotes
pub fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata() -> TableMetadata {
        let mut types = HashMap::new();
        types.insert("id".to_string(), AttributeType::Integer);
        types.insert("published".to_string(), AttributeType::Boolean);
        TableMetadata::new("posts", types)
    }

    #[test]
    fn test_build_predicate_casts_values() {
        let table = metadata();
        let condition = table
            .build_predicate("id", Operator::In, &json!(["1", 2]))
            .unwrap();
        assert_eq!(condition.value, json!([1, 2]));

        let condition = table
            .build_predicate("published", Operator::Equal, &json!("t"))
            .unwrap();
        assert_eq!(condition.value, json!(true));

        assert!(table.build_predicate("id", Operator::In, &json!(1)).is_err());
        assert_eq!(table.type_for("unknown"), AttributeType::Value);
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("posts"), "\"posts\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(metadata().quoted_table_name(), "\"posts\"");
    }
}
