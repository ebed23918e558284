//! Attribute types - the static type table used to cast attribute values

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::error::{ModelError, ModelResult};

/// Cast type of a model attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeType {
    Integer,
    BigInteger,
    Float,
    /// Arbitrary precision number, kept in its string form
    Decimal,
    String,
    Text,
    Boolean,
    Date,
    DateTime,
    Uuid,
    Json,
    Binary,
    /// Untyped value passed through unchanged
    Value,
}

impl AttributeType {
    /// Map a database type name to its cast type
    pub fn from_sql_type(sql_type: &str) -> Self {
        let sql_type = sql_type.trim().to_ascii_lowercase();
        let base = sql_type.split('(').next().unwrap_or("").trim();

        match base {
            "integer" | "int" | "int4" | "smallint" | "int2" | "serial" | "smallserial" => {
                Self::Integer
            }
            "bigint" | "int8" | "bigserial" => Self::BigInteger,
            "real" | "float4" | "float8" | "float" | "double" | "double precision" => Self::Float,
            "numeric" | "decimal" | "money" => Self::Decimal,
            "character varying" | "varchar" | "character" | "char" | "bpchar" | "string" => {
                Self::String
            }
            "text" | "citext" => Self::Text,
            "boolean" | "bool" => Self::Boolean,
            "date" => Self::Date,
            "uuid" => Self::Uuid,
            "json" | "jsonb" => Self::Json,
            "bytea" | "blob" | "binary" => Self::Binary,
            other if other.starts_with("timestamp") || other == "datetime" => Self::DateTime,
            _ => Self::Value,
        }
    }

    /// Type name used in error messages
    pub fn name(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::BigInteger => "big_integer",
            Self::Float => "float",
            Self::Decimal => "decimal",
            Self::String => "string",
            Self::Text => "text",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Uuid => "uuid",
            Self::Json => "json",
            Self::Binary => "binary",
            Self::Value => "value",
        }
    }

    /// PostgreSQL type a parameter holding this type's canonical (textual)
    /// form has to be cast to before comparison
    pub fn sql_cast(self) -> Option<&'static str> {
        match self {
            Self::Decimal => Some("numeric"),
            Self::Date => Some("date"),
            Self::DateTime => Some("timestamptz"),
            Self::Uuid => Some("uuid"),
            _ => None,
        }
    }

    /// Cast a user-supplied value to this type's canonical form
    pub fn cast(self, value: &Value) -> ModelResult<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }

        match self {
            Self::Integer => {
                let n = cast_integer(value).ok_or_else(|| ModelError::type_cast(value, self.name()))?;
                if i32::try_from(n).is_err() {
                    return Err(ModelError::type_cast(value, self.name()));
                }
                Ok(Value::from(n))
            }
            Self::BigInteger => cast_integer(value)
                .map(Value::from)
                .ok_or_else(|| ModelError::type_cast(value, self.name())),
            Self::Float => cast_float(value)
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| ModelError::type_cast(value, self.name())),
            Self::Decimal => match value {
                Value::Number(n) => Ok(Value::String(n.to_string())),
                Value::String(s) if s.trim().parse::<f64>().is_ok() => {
                    Ok(Value::String(s.trim().to_string()))
                }
                _ => Err(ModelError::type_cast(value, self.name())),
            },
            Self::String | Self::Text => match value {
                Value::String(_) => Ok(value.clone()),
                Value::Number(n) => Ok(Value::String(n.to_string())),
                Value::Bool(b) => Ok(Value::String(b.to_string())),
                other => Ok(Value::String(serde_json::to_string(other)?)),
            },
            Self::Boolean => cast_boolean(value),
            Self::Date => {
                let raw = value.as_str().ok_or_else(|| ModelError::type_cast(value, self.name()))?;
                let raw = raw.trim();
                let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                    .ok()
                    .or_else(|| parse_datetime(raw).map(|dt| dt.date_naive()))
                    .ok_or_else(|| ModelError::type_cast(value, self.name()))?;
                Ok(Value::String(date.format("%Y-%m-%d").to_string()))
            }
            Self::DateTime => {
                let raw = value.as_str().ok_or_else(|| ModelError::type_cast(value, self.name()))?;
                parse_datetime(raw.trim())
                    .map(|dt| Value::String(dt.to_rfc3339()))
                    .ok_or_else(|| ModelError::type_cast(value, self.name()))
            }
            Self::Uuid => {
                let raw = value.as_str().ok_or_else(|| ModelError::type_cast(value, self.name()))?;
                uuid::Uuid::parse_str(raw.trim())
                    .map(|u| Value::String(u.hyphenated().to_string()))
                    .map_err(|_| ModelError::type_cast(value, self.name()))
            }
            Self::Json | Self::Value => Ok(value.clone()),
            Self::Binary => match value {
                Value::String(_) | Value::Array(_) => Ok(value.clone()),
                _ => Err(ModelError::type_cast(value, self.name())),
            },
        }
    }

    /// Convert a value read from the database to this type's canonical form
    pub fn deserialize(self, value: &Value) -> ModelResult<Value> {
        match (self, value) {
            (Self::Json, Value::String(raw)) => Ok(serde_json::from_str(raw)?),
            _ => self.cast(value),
        }
    }
}

fn cast_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
        }
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn cast_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn cast_boolean(value: &Value) -> ModelResult<Value> {
    match value {
        Value::Bool(_) => Ok(value.clone()),
        Value::Number(n) => Ok(Value::Bool(n.as_f64().map(|f| f != 0.0).unwrap_or(false))),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "" => Ok(Value::Null),
            "t" | "true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
            "f" | "false" | "0" | "no" | "off" => Ok(Value::Bool(false)),
            _ => Err(ModelError::type_cast(value, "boolean")),
        },
        _ => Err(ModelError::type_cast(value, "boolean")),
    }
}

fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f%#z"]
        .iter()
        .find_map(|format| {
            DateTime::parse_from_str(raw, format)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| NaiveDateTime::parse_from_str(raw, format).ok().map(|ndt| ndt.and_utc()))
        })
}
