//! In-memory schema sources and batch executor shared by the integration tests

#![allow(dead_code)]

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use strata_orm::{
    AssociationMetadata, AssociationRegistry, BatchQuery, BatchQueryExecutor, Column,
    ColumnProvider, ContextSources, ModelDefinition, ModelError, ModelResult, Operator,
    OrderDirection, PreloadContext, Record, RecordRef, SchemaRegistry,
};

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Column provider backed by a fixed set of tables, counting fetches
#[derive(Default)]
pub struct MemoryColumns {
    tables: HashMap<String, Vec<Column>>,
    pub calls: AtomicUsize,
    delay: Option<Duration>,
    failures_left: AtomicUsize,
}

impl MemoryColumns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, name: &str, columns: Vec<Column>) -> Self {
        self.tables.insert(name.to_string(), columns);
        self
    }

    /// Make every fetch take `delay`, so concurrent loads overlap
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the next `count` fetches
    pub fn failing(self, count: usize) -> Self {
        self.failures_left.store(count, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ColumnProvider for MemoryColumns {
    async fn columns(&self, table_name: &str) -> ModelResult<Vec<Column>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ModelError::Database("connection reset".to_string()));
        }

        self.tables
            .get(table_name)
            .cloned()
            .ok_or_else(|| ModelError::Schema(format!("Table '{}' does not exist", table_name)))
    }
}

/// Batch executor over in-memory rows, recording every query it receives
#[derive(Default)]
pub struct MemoryExecutor {
    tables: HashMap<String, Vec<Map<String, Value>>>,
    queries: Mutex<Vec<BatchQuery>>,
    fail: AtomicBool,
}

impl MemoryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(mut self, table: &str, rows: Vec<Value>) -> Self {
        let rows = rows
            .into_iter()
            .filter_map(|row| match row {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        self.tables.insert(table.to_string(), rows);
        self
    }

    pub fn fail_queries(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn queries(&self) -> Vec<BatchQuery> {
        self.queries.lock().clone()
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().len()
    }

    pub fn queries_on(&self, table: &str) -> Vec<BatchQuery> {
        self.queries
            .lock()
            .iter()
            .filter(|q| q.table_name == table)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl BatchQueryExecutor for MemoryExecutor {
    async fn load_records(&self, query: &BatchQuery) -> ModelResult<Vec<Map<String, Value>>> {
        self.queries.lock().push(query.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(ModelError::Database(format!("query on {} failed", query.table_name)));
        }

        let rows = self.tables.get(&query.table_name).cloned().unwrap_or_default();
        let mut matched: Vec<Map<String, Value>> = rows
            .into_iter()
            .filter(|row| {
                let key = row.get(&query.key_column).unwrap_or(&Value::Null);
                query.keys.iter().any(|k| same(k, key))
                    && query.scope.conditions().iter().all(|c| {
                        let value = row.get(&c.column).unwrap_or(&Value::Null);
                        matches_condition(value, c.operator, &c.value)
                    })
            })
            .collect();

        for (column, direction) in query.scope.orders().iter().rev() {
            matched.sort_by(|a, b| {
                let ordering = compare(
                    a.get(column).unwrap_or(&Value::Null),
                    b.get(column).unwrap_or(&Value::Null),
                );
                match direction {
                    OrderDirection::Asc => ordering,
                    OrderDirection::Desc => ordering.reverse(),
                }
            });
        }
        if let Some(limit) = query.scope.limit_value() {
            matched.truncate(limit as usize);
        }
        Ok(matched)
    }
}

fn same(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> CmpOrdering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(CmpOrdering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => CmpOrdering::Equal,
    }
}

fn matches_condition(value: &Value, operator: Operator, expected: &Value) -> bool {
    match operator {
        Operator::Equal => same(value, expected),
        Operator::NotEqual => !same(value, expected),
        Operator::GreaterThan => compare(value, expected) == CmpOrdering::Greater,
        Operator::GreaterThanOrEqual => compare(value, expected) != CmpOrdering::Less,
        Operator::LessThan => compare(value, expected) == CmpOrdering::Less,
        Operator::LessThanOrEqual => compare(value, expected) != CmpOrdering::Greater,
        Operator::Like => value == expected,
        Operator::In => expected
            .as_array()
            .map(|items| items.iter().any(|item| same(value, item)))
            .unwrap_or(false),
        Operator::NotIn => expected
            .as_array()
            .map(|items| !items.iter().any(|item| same(value, item)))
            .unwrap_or(true),
        Operator::IsNull => value.is_null(),
        Operator::IsNotNull => !value.is_null(),
    }
}

pub fn record(model: &str, attributes: Value) -> RecordRef {
    let attributes = match attributes {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    Record::from_attributes(model, attributes).into_ref()
}

pub fn ids(records: &[RecordRef]) -> Vec<i64> {
    records
        .iter()
        .filter_map(|r| r.read().attribute("id").as_i64())
        .collect()
}

pub fn blog_columns() -> MemoryColumns {
    MemoryColumns::new()
        .with_table(
            "authors",
            vec![Column::new("id", "integer").primary_key(), Column::new("name", "varchar")],
        )
        .with_table(
            "posts",
            vec![
                Column::new("id", "integer").primary_key(),
                Column::new("author_id", "integer"),
                Column::new("title", "varchar"),
            ],
        )
        .with_table(
            "comments",
            vec![
                Column::new("id", "integer").primary_key(),
                Column::new("post_id", "integer"),
                Column::new("user_id", "integer"),
                Column::new("body", "text"),
                Column::new("approved", "boolean"),
            ],
        )
        .with_table(
            "users",
            vec![Column::new("id", "integer").primary_key(), Column::new("name", "varchar")],
        )
        .with_table(
            "taggings",
            vec![
                Column::new("id", "integer").primary_key(),
                Column::new("post_id", "integer"),
                Column::new("tag_id", "integer"),
            ],
        )
        .with_table(
            "tags",
            vec![Column::new("id", "integer").primary_key(), Column::new("name", "varchar")],
        )
        .with_table(
            "pictures",
            vec![
                Column::new("id", "integer").primary_key(),
                Column::new("imageable_id", "integer"),
                Column::new("imageable_type", "varchar"),
            ],
        )
}

pub fn blog_executor() -> MemoryExecutor {
    MemoryExecutor::new()
        .with_rows(
            "authors",
            vec![
                json!({"id": 1, "name": "Ada"}),
                json!({"id": 2, "name": "Grace"}),
            ],
        )
        .with_rows(
            "comments",
            vec![
                json!({"id": 100, "post_id": 10, "user_id": 1000, "body": "first", "approved": true}),
                json!({"id": 101, "post_id": 10, "user_id": 1001, "body": "second", "approved": false}),
                json!({"id": 102, "post_id": 11, "user_id": 1000, "body": "third", "approved": true}),
            ],
        )
        .with_rows(
            "users",
            vec![
                json!({"id": 1000, "name": "reader"}),
                json!({"id": 1001, "name": "critic"}),
            ],
        )
        .with_rows(
            "taggings",
            vec![
                json!({"id": 1, "post_id": 10, "tag_id": 7}),
                json!({"id": 2, "post_id": 10, "tag_id": 8}),
                json!({"id": 3, "post_id": 11, "tag_id": 7}),
            ],
        )
        .with_rows(
            "tags",
            vec![json!({"id": 7, "name": "rust"}), json!({"id": 8, "name": "sql"})],
        )
        .with_rows(
            "posts",
            vec![
                json!({"id": 10, "author_id": 1, "title": "Hello"}),
                json!({"id": 11, "author_id": 2, "title": "World"}),
            ],
        )
}

pub fn blog_schemas(columns: Arc<MemoryColumns>) -> SchemaRegistry {
    let registry = SchemaRegistry::new();
    for (model, table) in [
        ("Author", "authors"),
        ("Post", "posts"),
        ("Comment", "comments"),
        ("User", "users"),
        ("Tagging", "taggings"),
        ("Tag", "tags"),
        ("Picture", "pictures"),
    ] {
        registry.register_model(ModelDefinition::new(model).with_table_name(table));
    }
    registry.register_context("default", ContextSources::with_columns(columns));
    registry
}

pub fn blog_associations() -> AssociationRegistry {
    let registry = AssociationRegistry::new();
    let associations = vec![
        AssociationMetadata::belongs_to("Post", "author", "Author"),
        AssociationMetadata::has_many("Post", "comments", "Comment"),
        AssociationMetadata::has_many("Post", "approved_comments", "Comment")
            .with_foreign_key("post_id")
            .with_scope(strata_orm::Scope::new().where_eq("approved", true)),
        AssociationMetadata::has_many("Post", "taggings", "Tagging"),
        AssociationMetadata::through("Post", "tags", "taggings", "tag"),
        AssociationMetadata::through("Post", "labels", "labelings", "tag"),
        AssociationMetadata::has_many("Author", "posts", "Post"),
        AssociationMetadata::belongs_to("Comment", "user", "User"),
        AssociationMetadata::belongs_to("Comment", "post", "Post"),
        AssociationMetadata::belongs_to("Tagging", "tag", "Tag"),
        AssociationMetadata::polymorphic_belongs_to("Picture", "imageable"),
    ];
    for association in associations {
        registry
            .register(association)
            .expect("valid association metadata");
    }
    registry
}

/// Blog fixture: preload context plus the executor and column provider behind it
pub struct Blog {
    pub ctx: PreloadContext,
    pub executor: Arc<MemoryExecutor>,
    pub columns: Arc<MemoryColumns>,
}

pub fn blog() -> Blog {
    blog_with(blog_executor())
}

pub fn blog_with(executor: MemoryExecutor) -> Blog {
    init_tracing();
    let columns = Arc::new(blog_columns());
    let executor = Arc::new(executor);
    let ctx = PreloadContext::new(
        Arc::new(blog_associations()),
        Arc::new(blog_schemas(columns.clone())),
        executor.clone(),
    );
    Blog {
        ctx,
        executor,
        columns,
    }
}

pub fn posts() -> Vec<RecordRef> {
    vec![
        record("Post", json!({"id": 10, "author_id": 1, "title": "Hello"})),
        record("Post", json!({"id": 11, "author_id": 2, "title": "World"})),
        record("Post", json!({"id": 12, "author_id": 1, "title": "Again"})),
    ]
}
