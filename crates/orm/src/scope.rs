//! Query scopes with a total, deterministic equality
//!
//! Two scopes are equal when their normalized conditions, ordering and limit
//! are equal. Conditions are kept sorted by column, operator and canonical
//! JSON value, so the order in which they were added never matters; order
//! clauses keep their order because it changes results.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison operators usable in scope conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Operator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Like,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

impl Operator {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
            Self::Like => "LIKE",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
            Self::IsNull => "IS NULL",
            Self::IsNotNull => "IS NOT NULL",
        }
    }

    /// Operators that take no value
    pub fn is_unary(self) -> bool {
        matches!(self, Self::IsNull | Self::IsNotNull)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub column: String,
    pub operator: Operator,
    pub value: Value,
}

impl Condition {
    pub fn new(column: impl Into<String>, operator: Operator, value: Value) -> Self {
        Self {
            column: column.into(),
            operator,
            value,
        }
    }

    fn sort_key(&self) -> (&str, Operator, String) {
        (self.column.as_str(), self.operator, canonical(&self.value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderDirection {
    Asc,
    Desc,
}

impl OrderDirection {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Restrictions applied to an association query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "ScopeParts")]
pub struct Scope {
    conditions: Vec<Condition>,
    orders: Vec<(String, OrderDirection)>,
    limit: Option<u64>,
}

/// Serialized scope before normalization
#[derive(Deserialize)]
struct ScopeParts {
    #[serde(default)]
    conditions: Vec<Condition>,
    #[serde(default)]
    orders: Vec<(String, OrderDirection)>,
    #[serde(default)]
    limit: Option<u64>,
}

impl From<ScopeParts> for Scope {
    fn from(parts: ScopeParts) -> Self {
        let mut scope = parts
            .conditions
            .into_iter()
            .fold(Scope::new(), |scope, c| scope.where_op(c.column, c.operator, c.value));
        scope.orders = parts.orders;
        scope.limit = parts.limit;
        scope
    }
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn where_eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.where_op(column, Operator::Equal, value.into())
    }

    pub fn where_in<I, V>(self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect::<Vec<_>>();
        self.where_op(column, Operator::In, Value::Array(values))
    }

    pub fn where_null(self, column: impl Into<String>) -> Self {
        self.where_op(column, Operator::IsNull, Value::Null)
    }

    pub fn where_not_null(self, column: impl Into<String>) -> Self {
        self.where_op(column, Operator::IsNotNull, Value::Null)
    }

    pub fn where_op(mut self, column: impl Into<String>, operator: Operator, value: Value) -> Self {
        let value = if operator.is_unary() { Value::Null } else { value };
        self.push_condition(Condition::new(column, operator, value));
        self
    }

    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.orders.push((column.into(), OrderDirection::Asc));
        self
    }

    pub fn order_by_desc(mut self, column: impl Into<String>) -> Self {
        self.orders.push((column.into(), OrderDirection::Desc));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    fn push_condition(&mut self, condition: Condition) {
        let key = condition.sort_key();
        let position = self
            .conditions
            .iter()
            .position(|existing| existing.sort_key() > key)
            .unwrap_or(self.conditions.len());
        if self.conditions.iter().any(|existing| existing.sort_key() == key) {
            return;
        }
        self.conditions.insert(position, condition);
    }

    /// Combine two scopes; `other`'s order clauses follow ours and its limit wins
    pub fn merge(&self, other: &Scope) -> Scope {
        let mut merged = self.clone();
        for condition in &other.conditions {
            merged.push_condition(condition.clone());
        }
        merged.orders.extend(other.orders.iter().cloned());
        if other.limit.is_some() {
            merged.limit = other.limit;
        }
        merged
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn orders(&self) -> &[(String, OrderDirection)] {
        &self.orders
    }

    pub fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty() && self.orders.is_empty() && self.limit.is_none()
    }

    /// Canonical textual form; equal scopes have equal signatures
    pub fn signature(&self) -> String {
        let conditions = self
            .conditions
            .iter()
            .map(|c| format!("{} {:?} {}", c.column, c.operator, canonical(&c.value)))
            .collect::<Vec<_>>()
            .join(" AND ");
        let orders = self
            .orders
            .iter()
            .map(|(column, direction)| format!("{} {}", column, direction.as_sql()))
            .collect::<Vec<_>>()
            .join(", ");
        let limit = self.limit.map(|l| l.to_string()).unwrap_or_default();
        format!("where[{}] order[{}] limit[{}]", conditions, orders, limit)
    }
}

impl PartialEq for Scope {
    fn eq(&self, other: &Self) -> bool {
        self.limit == other.limit
            && self.orders == other.orders
            && self.conditions.len() == other.conditions.len()
            && self
                .conditions
                .iter()
                .zip(&other.conditions)
                .all(|(a, b)| a.sort_key() == b.sort_key())
    }
}

impl Eq for Scope {}

impl Hash for Scope {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.signature().hash(state);
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature())
    }
}

/// Canonical JSON text of a value; object keys are emitted in sorted order
pub(crate) fn canonical(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut entries = map.iter().collect::<Vec<_>>();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let body = entries
                .into_iter()
                .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), canonical(v)))
                .collect::<Vec<_>>()
                .join(",");
            format!("{{{}}}", body)
        }
        Value::Array(items) => {
            let body = items.iter().map(canonical).collect::<Vec<_>>().join(",");
            format!("[{}]", body)
        }
        other => other.to_string(),
    }
}
