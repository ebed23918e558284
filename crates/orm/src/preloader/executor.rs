//! Batched query execution for the preloader

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres};
use tracing::debug;

use crate::error::{ModelError, ModelResult};
use crate::schema::{quote_identifier, AttributeType};
use crate::scope::{Operator, Scope};

/// One batched fetch: every row of `table_name` whose `key_column` is one of
/// `keys`, restricted by `scope`
#[derive(Debug, Clone, PartialEq)]
pub struct BatchQuery {
    pub model: String,
    pub table_name: String,
    pub key_column: String,
    /// Type the keys were cast to
    pub key_type: AttributeType,
    pub keys: Vec<Value>,
    pub scope: Scope,
    /// Statement cached for this query's shape, if any
    pub statement: Option<Arc<str>>,
}

impl BatchQuery {
    /// Statement and parameters, reusing the cached statement when present
    pub fn to_sql(&self) -> ModelResult<(Arc<str>, Vec<Value>)> {
        let sql = match &self.statement {
            Some(statement) => Arc::clone(statement),
            None => Arc::from(self.render_sql()?),
        };
        Ok((sql, self.params()))
    }

    /// Render the statement as PostgreSQL with positional parameters
    pub fn render_sql(&self) -> ModelResult<String> {
        if self.keys.is_empty() {
            return Err(ModelError::Query(format!(
                "Batch query on {} has no keys",
                self.table_name
            )));
        }

        let mut next = 0;
        let mut placeholder = || {
            next += 1;
            format!("${}", next)
        };

        let key_cast = self
            .key_type
            .sql_cast()
            .map(|ty| format!("::{}", ty))
            .unwrap_or_default();
        let keys = (0..self.keys.len())
            .map(|_| format!("{}{}", placeholder(), key_cast))
            .collect::<Vec<_>>()
            .join(", ");

        let mut sql = format!(
            "SELECT * FROM {} WHERE {} = ANY(ARRAY[{}])",
            quote_identifier(&self.table_name),
            quote_identifier(&self.key_column),
            keys
        );

        for condition in self.scope.conditions() {
            let column = quote_identifier(&condition.column);
            match (condition.operator, &condition.value) {
                (op, _) if op.is_unary() => {
                    sql.push_str(&format!(" AND {} {}", column, op.as_sql()));
                }
                (Operator::In | Operator::NotIn, Value::Array(items)) => {
                    if items.is_empty() {
                        // IN () matches nothing, NOT IN () matches everything
                        if condition.operator == Operator::In {
                            sql.push_str(" AND FALSE");
                        }
                        continue;
                    }
                    let list = items
                        .iter()
                        .map(|_| placeholder())
                        .collect::<Vec<_>>()
                        .join(", ");
                    sql.push_str(&format!(" AND {} {} ({})", column, condition.operator.as_sql(), list));
                }
                (op, _) => {
                    sql.push_str(&format!(" AND {} {} {}", column, op.as_sql(), placeholder()));
                }
            }
        }

        if !self.scope.orders().is_empty() {
            let orders = self
                .scope
                .orders()
                .iter()
                .map(|(column, direction)| format!("{} {}", quote_identifier(column), direction.as_sql()))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" ORDER BY {}", orders));
        }

        if let Some(limit) = self.scope.limit_value() {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        Ok(sql)
    }

    /// Parameters in placeholder order: keys, then scope values
    pub fn params(&self) -> Vec<Value> {
        let mut params = self.keys.clone();
        for condition in self.scope.conditions() {
            match (condition.operator, &condition.value) {
                (op, _) if op.is_unary() => {}
                (Operator::In | Operator::NotIn, Value::Array(items)) => {
                    params.extend(items.iter().cloned());
                }
                (_, value) => params.push(value.clone()),
            }
        }
        params
    }
}

/// Entry point the persistence layer supplies for batched fetches
#[async_trait]
pub trait BatchQueryExecutor: Send + Sync {
    /// Fetch the raw rows matching `query`
    async fn load_records(&self, query: &BatchQuery) -> ModelResult<Vec<Map<String, Value>>>;
}

/// Executor running batch queries on a PostgreSQL pool
#[derive(Debug, Clone)]
pub struct PgBatchExecutor {
    pool: PgPool,
}

impl PgBatchExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BatchQueryExecutor for PgBatchExecutor {
    async fn load_records(&self, query: &BatchQuery) -> ModelResult<Vec<Map<String, Value>>> {
        let (sql, params) = query.to_sql()?;
        debug!(model = %query.model, sql = %sql, params = params.len(), "executing batch query");

        let mut db_query = sqlx::query(&sql);
        for param in &params {
            db_query = bind_value(db_query, param)?;
        }

        let rows = db_query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ModelError::Database(format!("Batch query on {} failed: {}", query.table_name, e)))?;

        Ok(rows.iter().map(row_to_map).collect())
    }
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &Value,
) -> ModelResult<Query<'q, Postgres, PgArguments>> {
    Ok(match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else if let Some(f) = n.as_f64() {
                query.bind(f)
            } else {
                return Err(ModelError::Query(format!("Unsupported number {}", n)));
            }
        }
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(sqlx::types::Json(other.clone())),
    })
}

/// Convert a PostgreSQL row into an attribute map, trying the common types in turn
fn row_to_map(row: &PgRow) -> Map<String, Value> {
    use sqlx::{Column, Row};

    let mut map = Map::new();
    for (i, column) in row.columns().iter().enumerate() {
        let value = if let Ok(value) = row.try_get::<Option<String>, _>(i) {
            value.map_or(Value::Null, Value::String)
        } else if let Ok(value) = row.try_get::<Option<i64>, _>(i) {
            value.map_or(Value::Null, Value::from)
        } else if let Ok(value) = row.try_get::<Option<i32>, _>(i) {
            value.map_or(Value::Null, Value::from)
        } else if let Ok(value) = row.try_get::<Option<i16>, _>(i) {
            value.map_or(Value::Null, Value::from)
        } else if let Ok(value) = row.try_get::<Option<f64>, _>(i) {
            value
                .and_then(serde_json::Number::from_f64)
                .map_or(Value::Null, Value::Number)
        } else if let Ok(value) = row.try_get::<Option<bool>, _>(i) {
            value.map_or(Value::Null, Value::Bool)
        } else if let Ok(value) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(i) {
            value.map_or(Value::Null, |v| Value::String(v.to_rfc3339()))
        } else if let Ok(value) = row.try_get::<Option<chrono::NaiveDateTime>, _>(i) {
            value.map_or(Value::Null, |v| Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string()))
        } else if let Ok(value) = row.try_get::<Option<chrono::NaiveDate>, _>(i) {
            value.map_or(Value::Null, |v| Value::String(v.to_string()))
        } else if let Ok(value) = row.try_get::<Option<uuid::Uuid>, _>(i) {
            value.map_or(Value::Null, |v| Value::String(v.to_string()))
        } else if let Ok(value) = row.try_get::<Option<Value>, _>(i) {
            value.unwrap_or(Value::Null)
        } else {
            Value::Null
        };
        map.insert(column.name().to_string(), value);
    }
    map
}
