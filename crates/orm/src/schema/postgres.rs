//! PostgreSQL schema sources backed by `information_schema`

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Row};

use super::column::{Column, PrimaryKey};
use super::provider::{ColumnProvider, ConnectionAccessor};
use crate::error::{ModelError, ModelResult};

const COLUMNS_SQL: &str = r#"
SELECT c.column_name,
       c.data_type,
       c.column_default,
       c.is_nullable = 'YES' AS nullable,
       EXISTS (
           SELECT 1
           FROM information_schema.table_constraints tc
           JOIN information_schema.key_column_usage kcu
             ON tc.constraint_name = kcu.constraint_name
            AND tc.table_schema = kcu.table_schema
           WHERE tc.constraint_type = 'PRIMARY KEY'
             AND tc.table_schema = c.table_schema
             AND tc.table_name = c.table_name
             AND kcu.column_name = c.column_name
       ) AS is_primary
FROM information_schema.columns c
WHERE c.table_schema = current_schema()
  AND c.table_name = $1
ORDER BY c.ordinal_position
"#;

/// Reads column metadata from `information_schema.columns`
#[derive(Debug, Clone)]
pub struct PgColumnProvider {
    pool: PgPool,
}

impl PgColumnProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ColumnProvider for PgColumnProvider {
    async fn columns(&self, table_name: &str) -> ModelResult<Vec<Column>> {
        let rows = sqlx::query(COLUMNS_SQL)
            .bind(table_name)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ModelError::Schema(format!("Failed to read columns of '{}': {}", table_name, e)))?;

        if rows.is_empty() {
            return Err(ModelError::Schema(format!("Table '{}' does not exist", table_name)));
        }

        rows.iter()
            .map(|row| -> ModelResult<Column> {
                let name: String = row.try_get("column_name")?;
                let data_type: String = row.try_get("data_type")?;
                let raw_default: Option<String> = row.try_get("column_default")?;
                let nullable: bool = row.try_get("nullable")?;
                let is_primary: bool = row.try_get("is_primary")?;

                let mut column = Column::new(name, data_type);
                column.null = nullable;
                column.primary_key = is_primary;
                match raw_default.as_deref().map(parse_column_default) {
                    Some(ColumnDefault::Literal(value)) => column.default = Some(value),
                    Some(ColumnDefault::Generated) => column.auto_populated = true,
                    None => {}
                }
                Ok(column)
            })
            .collect()
    }
}

/// Resolves sequence names through `pg_get_serial_sequence`
#[derive(Debug, Clone)]
pub struct PgConnectionAccessor {
    pool: PgPool,
}

impl PgConnectionAccessor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConnectionAccessor for PgConnectionAccessor {
    async fn default_sequence_name(
        &self,
        table_name: &str,
        primary_key: &PrimaryKey,
    ) -> ModelResult<Option<String>> {
        let Some(pk) = primary_key.single() else {
            return Ok(None);
        };

        let row = sqlx::query("SELECT pg_get_serial_sequence($1, $2) AS sequence_name")
            .bind(table_name)
            .bind(pk)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("sequence_name")?)
    }
}

/// Interpretation of a raw `column_default` expression
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnDefault {
    Literal(Value),
    /// Computed by the database (sequence, function call)
    Generated,
}

pub fn parse_column_default(raw: &str) -> ColumnDefault {
    let raw = raw.trim();

    if raw.eq_ignore_ascii_case("null") || raw.to_ascii_lowercase().starts_with("null::") {
        return ColumnDefault::Literal(Value::Null);
    }
    if raw.eq_ignore_ascii_case("true") {
        return ColumnDefault::Literal(Value::Bool(true));
    }
    if raw.eq_ignore_ascii_case("false") {
        return ColumnDefault::Literal(Value::Bool(false));
    }

    // 'text'::character varying, 'it''s'::text
    if let Some(rest) = raw.strip_prefix('\'') {
        if let Some(end) = literal_end(rest) {
            return ColumnDefault::Literal(Value::String(rest[..end].replace("''", "'")));
        }
    }

    let numeric = raw
        .trim_start_matches('(')
        .split("::")
        .next()
        .unwrap_or("")
        .trim_end_matches(')');
    if let Ok(i) = numeric.parse::<i64>() {
        return ColumnDefault::Literal(Value::from(i));
    }
    if let Some(n) = numeric.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
        return ColumnDefault::Literal(Value::Number(n));
    }

    ColumnDefault::Generated
}

/// Index of the closing quote of a literal body, skipping doubled quotes
fn literal_end(body: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\'' {
            if bytes.get(i + 1) == Some(&b'\'') {
                i += 2;
                continue;
            }
            return Some(i);
        }
        i += 1;
    }
    None
}
