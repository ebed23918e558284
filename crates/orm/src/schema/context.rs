//! Schema contexts - per (model, connection shape) cached metadata
//!
//! A [`SchemaContext`] loads a model's column metadata once per context key
//! and publishes it as an immutable [`LoadedSchema`] generation. Every derived
//! value (column names, attribute types, defaults, content columns, table
//! metadata, ...) is memoized inside the generation, so invalidation drops all
//! of them at once by dropping the generation.
//!
//! Loading is single-flight: the first caller performs the fetch, concurrent
//! callers wait on the outcome of that attempt. A failed attempt is reported
//! to its waiters and leaves the context unloaded so that the next caller
//! starts a new attempt. Reads after a successful load take no lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::attributes::{AttributeTable, AttributesBuilder};
use super::column::{Column, PrimaryKey};
use super::definition::SchemaOwner;
use super::provider::{ContextKey, ContextSources};
use super::table::TableMetadata;
use super::types::AttributeType;
use crate::error::{ModelError, ModelResult};
use crate::preloader::BatchQuery;
use crate::scope::Scope;

/// One immutable generation of schema metadata
#[derive(Debug)]
pub struct LoadedSchema {
    model_name: String,
    table_name: String,
    columns: Arc<Vec<Column>>,
    columns_hash: Arc<HashMap<String, Column>>,
    primary_key: PrimaryKey,
    inheritance_column: String,
    default_attributes: Arc<AttributeTable>,

    column_names: OnceCell<Arc<Vec<String>>>,
    attribute_types: OnceCell<Arc<HashMap<String, AttributeType>>>,
    column_defaults: OnceCell<Arc<HashMap<String, Option<Value>>>>,
    content_columns: OnceCell<Arc<Vec<Column>>>,
    attributes_builder: OnceCell<AttributesBuilder>,
    table_metadata: OnceCell<Arc<TableMetadata>>,
    returning_columns: OnceCell<Arc<Vec<String>>>,
    sequence_name: tokio::sync::OnceCell<Option<String>>,
    /// Rendered batch statements by (key column, key count, scope)
    statements: DashMap<(String, usize, Scope), Arc<str>>,
}

impl LoadedSchema {
    fn new(
        model_name: String,
        table_name: String,
        columns: Vec<Column>,
        primary_key: PrimaryKey,
        inheritance_column: String,
        default_attributes: AttributeTable,
    ) -> Self {
        let columns_hash = columns
            .iter()
            .map(|column| (column.name.clone(), column.clone()))
            .collect();

        Self {
            model_name,
            table_name,
            columns: Arc::new(columns),
            columns_hash: Arc::new(columns_hash),
            primary_key,
            inheritance_column,
            default_attributes: Arc::new(default_attributes),
            column_names: OnceCell::new(),
            attribute_types: OnceCell::new(),
            column_defaults: OnceCell::new(),
            content_columns: OnceCell::new(),
            attributes_builder: OnceCell::new(),
            table_metadata: OnceCell::new(),
            returning_columns: OnceCell::new(),
            sequence_name: tokio::sync::OnceCell::new(),
            statements: DashMap::new(),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn columns_hash(&self) -> Arc<HashMap<String, Column>> {
        Arc::clone(&self.columns_hash)
    }

    /// Columns in table order
    pub fn columns(&self) -> Arc<Vec<Column>> {
        Arc::clone(&self.columns)
    }

    pub fn column_names(&self) -> Arc<Vec<String>> {
        Arc::clone(self.column_names.get_or_init(|| {
            Arc::new(self.columns.iter().map(|c| c.name.clone()).collect())
        }))
    }

    pub fn primary_key(&self) -> &PrimaryKey {
        &self.primary_key
    }

    pub fn composite_primary_key(&self) -> bool {
        self.primary_key.is_composite()
    }

    pub fn inheritance_column(&self) -> &str {
        &self.inheritance_column
    }

    /// Column types with the model's attribute modifications applied
    pub fn default_attributes(&self) -> Arc<AttributeTable> {
        Arc::clone(&self.default_attributes)
    }

    pub fn attribute_types(&self) -> Arc<HashMap<String, AttributeType>> {
        Arc::clone(
            self.attribute_types
                .get_or_init(|| Arc::new(self.default_attributes.types())),
        )
    }

    pub fn column_defaults(&self) -> Arc<HashMap<String, Option<Value>>> {
        Arc::clone(
            self.column_defaults
                .get_or_init(|| Arc::new(self.default_attributes.defaults())),
        )
    }

    pub fn attributes_builder(&self) -> AttributesBuilder {
        self.attributes_builder
            .get_or_init(|| {
                AttributesBuilder::new(
                    self.model_name.clone(),
                    Arc::clone(&self.default_attributes),
                    &self.primary_key.columns(),
                )
            })
            .clone()
    }

    /// Columns that hold content: everything except primary key columns,
    /// the inheritance column, and `*_id` / `*_count` columns
    pub fn content_columns(&self) -> Arc<Vec<Column>> {
        Arc::clone(self.content_columns.get_or_init(|| {
            Arc::new(
                self.columns
                    .iter()
                    .filter(|c| {
                        !self.primary_key.contains(&c.name)
                            && c.name != self.inheritance_column
                            && !c.name.ends_with("_id")
                            && !c.name.ends_with("_count")
                    })
                    .cloned()
                    .collect(),
            )
        }))
    }

    pub fn table_metadata(&self) -> Arc<TableMetadata> {
        Arc::clone(self.table_metadata.get_or_init(|| {
            Arc::new(TableMetadata::new(
                self.table_name.clone(),
                (*self.attribute_types()).clone(),
            ))
        }))
    }

    /// Statement for a batched fetch of this model's rows, rendered once per
    /// query shape in this generation
    pub fn batch_statement(&self, query: &BatchQuery) -> ModelResult<Arc<str>> {
        let key = (query.key_column.clone(), query.keys.len(), query.scope.clone());
        if let Some(statement) = self.statements.get(&key) {
            return Ok(Arc::clone(statement.value()));
        }
        let statement: Arc<str> = Arc::from(query.render_sql()?);
        Ok(Arc::clone(self.statements.entry(key).or_insert(statement).value()))
    }

    pub fn cached_statement_count(&self) -> usize {
        self.statements.len()
    }

    /// Column backing `name`, or a null column when there is none
    pub fn column_for_attribute(&self, name: &str) -> Column {
        self.columns_hash
            .get(name)
            .cloned()
            .unwrap_or_else(|| Column::null_column(name))
    }
}

type LoadOutcome = Result<Arc<LoadedSchema>, ModelError>;

enum LoadSlot {
    Idle,
    Loading {
        attempt: u64,
        outcome: watch::Receiver<Option<LoadOutcome>>,
    },
}

impl LoadSlot {
    fn is_attempt(&self, id: u64) -> bool {
        matches!(self, LoadSlot::Loading { attempt, .. } if *attempt == id)
    }
}

enum LoadStep {
    Wait(watch::Receiver<Option<LoadOutcome>>),
    Load {
        attempt: u64,
        epoch: u64,
        sender: watch::Sender<Option<LoadOutcome>>,
    },
}

/// Resets the slot if a load attempt is dropped before publishing an outcome
struct AttemptGuard<'a> {
    context: &'a SchemaContext,
    attempt: u64,
    sender: Option<watch::Sender<Option<LoadOutcome>>>,
}

impl AttemptGuard<'_> {
    fn complete(&mut self, outcome: LoadOutcome) {
        if let Some(sender) = self.sender.take() {
            sender.send_replace(Some(outcome));
        }
    }
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if self.sender.is_some() {
            let mut slot = self.context.slot.lock();
            if slot.is_attempt(self.attempt) {
                *slot = LoadSlot::Idle;
            }
        }
    }
}

/// Schema-context-dependent state of one model
pub struct SchemaContext {
    owner: Arc<dyn SchemaOwner>,
    context_key: ContextKey,
    sources: ContextSources,
    loaded: ArcSwapOption<LoadedSchema>,
    slot: Mutex<LoadSlot>,
    /// Bumped on invalidation; a load started under an older epoch is not cached
    epoch: AtomicU64,
    next_attempt: AtomicU64,
    fetch_count: AtomicU64,
}

impl SchemaContext {
    pub fn new(owner: Arc<dyn SchemaOwner>, context_key: ContextKey, sources: ContextSources) -> Self {
        Self {
            owner,
            context_key,
            sources,
            loaded: ArcSwapOption::empty(),
            slot: Mutex::new(LoadSlot::Idle),
            epoch: AtomicU64::new(0),
            next_attempt: AtomicU64::new(0),
            fetch_count: AtomicU64::new(0),
        }
    }

    pub fn model_name(&self) -> &str {
        self.owner.model_name()
    }

    pub fn context_key(&self) -> &ContextKey {
        &self.context_key
    }

    /// Table name as configured on the model; does not load the schema
    pub fn table_name(&self) -> Option<&str> {
        self.owner.table_name()
    }

    pub fn is_schema_loaded(&self) -> bool {
        self.loaded.load().is_some()
    }

    /// Number of metadata fetches performed so far
    pub fn fetch_count(&self) -> u64 {
        self.fetch_count.load(Ordering::SeqCst)
    }

    /// Return the current generation, loading it if necessary
    pub async fn load_schema(&self) -> ModelResult<Arc<LoadedSchema>> {
        loop {
            if let Some(schema) = self.loaded.load_full() {
                return Ok(schema);
            }

            let step = {
                let mut slot = self.slot.lock();
                if let Some(schema) = self.loaded.load_full() {
                    return Ok(schema);
                }
                match &*slot {
                    LoadSlot::Loading { outcome, .. } => LoadStep::Wait(outcome.clone()),
                    LoadSlot::Idle => {
                        let attempt = self.next_attempt.fetch_add(1, Ordering::SeqCst);
                        let (sender, receiver) = watch::channel(None);
                        *slot = LoadSlot::Loading {
                            attempt,
                            outcome: receiver,
                        };
                        LoadStep::Load {
                            attempt,
                            epoch: self.epoch.load(Ordering::SeqCst),
                            sender,
                        }
                    }
                }
            };

            match step {
                LoadStep::Wait(mut receiver) => {
                    let outcome = match receiver.wait_for(Option::is_some).await {
                        Ok(outcome) => (*outcome).clone(),
                        Err(_) => None,
                    };
                    match outcome {
                        Some(result) => return result,
                        // the loading task went away without an outcome; try again
                        None => continue,
                    }
                }
                LoadStep::Load {
                    attempt,
                    epoch,
                    sender,
                } => return self.run_load(attempt, epoch, sender).await,
            }
        }
    }

    async fn run_load(
        &self,
        attempt: u64,
        epoch: u64,
        sender: watch::Sender<Option<LoadOutcome>>,
    ) -> ModelResult<Arc<LoadedSchema>> {
        let mut guard = AttemptGuard {
            context: self,
            attempt,
            sender: Some(sender),
        };

        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        debug!(
            model = self.owner.model_name(),
            context = %self.context_key,
            attempt,
            "loading schema"
        );

        let outcome: LoadOutcome = self.fetch_schema().await.map(Arc::new);

        {
            let mut slot = self.slot.lock();
            let current = self.epoch.load(Ordering::SeqCst) == epoch;
            match &outcome {
                Ok(schema) if current => self.loaded.store(Some(Arc::clone(schema))),
                Ok(_) => debug!(
                    model = self.owner.model_name(),
                    context = %self.context_key,
                    "schema invalidated while loading; result not cached"
                ),
                Err(err) => {
                    warn!(
                        model = self.owner.model_name(),
                        context = %self.context_key,
                        error = %err,
                        "schema load failed"
                    );
                    if current {
                        self.loaded.store(None);
                    }
                }
            }
            if slot.is_attempt(attempt) {
                *slot = LoadSlot::Idle;
            }
        }

        guard.complete(outcome.clone());
        outcome
    }

    async fn fetch_schema(&self) -> ModelResult<LoadedSchema> {
        let model_name = self.owner.model_name().to_string();
        let table_name = self
            .owner
            .table_name()
            .ok_or_else(|| ModelError::TableNotSpecified {
                model: model_name.clone(),
            })?
            .to_string();

        let mut columns = self.sources.columns.columns(&table_name).await?;

        let only = self.owner.only_columns();
        let ignored = self.owner.ignored_columns();
        if !only.is_empty() {
            columns.retain(|c| only.contains(&c.name));
        } else if !ignored.is_empty() {
            columns.retain(|c| !ignored.contains(&c.name));
        }

        let primary_key = self.owner.primary_key().unwrap_or_else(|| {
            PrimaryKey::from_columns(
                columns
                    .iter()
                    .filter(|c| c.primary_key)
                    .map(|c| c.name.clone())
                    .collect(),
            )
        });

        // Precompute the attribute table so type errors in the model's
        // modifications fail the load instead of a later read
        let attributes = AttributeTable::from_columns(&columns, &self.owner.pending_modifications())?;

        Ok(LoadedSchema::new(
            model_name,
            table_name,
            columns,
            primary_key,
            self.owner.inheritance_column().to_string(),
            attributes,
        ))
    }

    /// Drop every cached value; the next access loads again
    pub fn reload_schema_from_cache(&self) {
        let mut slot = self.slot.lock();
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.loaded.store(None);
        // an in-flight attempt still answers its own waiters but is not cached
        *slot = LoadSlot::Idle;
        debug!(
            model = self.owner.model_name(),
            context = %self.context_key,
            "schema cache cleared"
        );
    }

    pub async fn columns_hash(&self) -> ModelResult<Arc<HashMap<String, Column>>> {
        Ok(self.load_schema().await?.columns_hash())
    }

    pub async fn columns(&self) -> ModelResult<Arc<Vec<Column>>> {
        Ok(self.load_schema().await?.columns())
    }

    pub async fn column_names(&self) -> ModelResult<Arc<Vec<String>>> {
        Ok(self.load_schema().await?.column_names())
    }

    pub async fn attribute_types(&self) -> ModelResult<Arc<HashMap<String, AttributeType>>> {
        Ok(self.load_schema().await?.attribute_types())
    }

    pub async fn default_attributes(&self) -> ModelResult<Arc<AttributeTable>> {
        Ok(self.load_schema().await?.default_attributes())
    }

    pub async fn column_defaults(&self) -> ModelResult<Arc<HashMap<String, Option<Value>>>> {
        Ok(self.load_schema().await?.column_defaults())
    }

    pub async fn attributes_builder(&self) -> ModelResult<AttributesBuilder> {
        Ok(self.load_schema().await?.attributes_builder())
    }

    pub async fn content_columns(&self) -> ModelResult<Arc<Vec<Column>>> {
        Ok(self.load_schema().await?.content_columns())
    }

    pub async fn primary_key(&self) -> ModelResult<PrimaryKey> {
        Ok(self.load_schema().await?.primary_key().clone())
    }

    pub async fn composite_primary_key(&self) -> ModelResult<bool> {
        Ok(self.load_schema().await?.composite_primary_key())
    }

    pub async fn table_metadata(&self) -> ModelResult<Arc<TableMetadata>> {
        Ok(self.load_schema().await?.table_metadata())
    }

    pub async fn column_for_attribute(&self, name: &str) -> ModelResult<Column> {
        Ok(self.load_schema().await?.column_for_attribute(name))
    }

    /// Sequence backing the primary key, resolved through a live connection
    /// once per generation
    pub async fn sequence_name(&self) -> ModelResult<Option<String>> {
        let schema = self.load_schema().await?;
        let name = schema
            .sequence_name
            .get_or_try_init(|| {
                self.sources
                    .connections
                    .default_sequence_name(&schema.table_name, &schema.primary_key)
            })
            .await?;
        Ok(name.clone())
    }

    /// Columns read back after an insert: the auto-populated ones, or the
    /// primary key when the connection populates none
    pub async fn returning_columns_for_insert(&self) -> ModelResult<Arc<Vec<String>>> {
        let schema = self.load_schema().await?;
        let columns = schema.returning_columns.get_or_init(|| {
            let auto_populated: Vec<String> = schema
                .columns
                .iter()
                .filter(|c| self.sources.connections.return_value_after_insert(c))
                .map(|c| c.name.clone())
                .collect();
            if auto_populated.is_empty() {
                Arc::new(
                    schema
                        .primary_key
                        .columns()
                        .into_iter()
                        .map(String::from)
                        .collect(),
                )
            } else {
                Arc::new(auto_populated)
            }
        });
        Ok(Arc::clone(columns))
    }
}

impl std::fmt::Debug for SchemaContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaContext")
            .field("model", &self.owner.model_name())
            .field("context_key", &self.context_key)
            .field("loaded", &self.is_schema_loaded())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::attributes::AttributeModifications;
    use crate::schema::definition::ModelDefinition;
    use crate::schema::provider::ColumnProvider;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    struct StaticColumns {
        columns: Vec<Column>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ColumnProvider for StaticColumns {
        async fn columns(&self, table_name: &str) -> ModelResult<Vec<Column>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if table_name == "posts" {
                Ok(self.columns.clone())
            } else {
                Err(ModelError::Schema(format!("Table '{}' does not exist", table_name)))
            }
        }
    }

    fn post_columns() -> Vec<Column> {
        vec![
            Column::new("id", "bigint").primary_key(),
            Column::new("title", "varchar").with_default(json!("untitled")),
            Column::new("body", "text"),
            Column::new("author_id", "bigint"),
            Column::new("comments_count", "integer").with_default(json!(0)),
            Column::new("type", "varchar"),
            Column::new("metadata", "text"),
        ]
    }

    fn context(definition: ModelDefinition) -> (SchemaContext, Arc<StaticColumns>) {
        let provider = Arc::new(StaticColumns {
            columns: post_columns(),
            calls: AtomicUsize::new(0),
        });
        let sources = ContextSources::with_columns(provider.clone());
        (
            SchemaContext::new(Arc::new(definition), ContextKey::default(), sources),
            provider,
        )
    }

    #[tokio::test]
    async fn test_load_is_lazy_and_idempotent() {
        let (ctx, provider) = context(ModelDefinition::new("Post").with_table_name("posts"));
        assert!(!ctx.is_schema_loaded());

        let names = ctx.column_names().await.unwrap();
        assert_eq!(names.len(), 7);
        assert!(ctx.is_schema_loaded());

        ctx.columns_hash().await.unwrap();
        ctx.attribute_types().await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_reload_clears_every_derived_value() {
        let (ctx, provider) = context(ModelDefinition::new("Post").with_table_name("posts"));
        let before = ctx.load_schema().await.unwrap();
        let names_before = before.column_names();

        ctx.reload_schema_from_cache();
        assert!(!ctx.is_schema_loaded());

        let after = ctx.load_schema().await.unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert!(!Arc::ptr_eq(&names_before, &after.column_names()));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_only_and_ignored_columns() {
        let (ctx, _) = context(
            ModelDefinition::new("Post")
                .with_table_name("posts")
                .with_only_columns(["id", "title"])
                .with_ignored_columns(["title"]),
        );
        assert_eq!(*ctx.column_names().await.unwrap(), vec!["id", "title"]);

        let (ctx, _) = context(
            ModelDefinition::new("Post")
                .with_table_name("posts")
                .with_ignored_columns(["body", "metadata"]),
        );
        let names = ctx.column_names().await.unwrap();
        assert!(!names.contains(&"body".to_string()));
        assert_eq!(names.len(), 5);
    }

    #[tokio::test]
    async fn test_missing_table_fails_and_retries() {
        let (ctx, provider) = context(ModelDefinition::new("Ghost"));
        let err = ctx.load_schema().await.unwrap_err();
        assert_eq!(err, ModelError::TableNotSpecified { model: "Ghost".into() });
        assert!(!ctx.is_schema_loaded());

        // a later call starts a fresh attempt instead of reusing the failure
        assert!(ctx.load_schema().await.is_err());
        assert_eq!(ctx.fetch_count(), 2);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_provider_failure_is_not_cached() {
        let (ctx, provider) = context(ModelDefinition::new("Post").with_table_name("missing"));
        assert!(matches!(ctx.columns().await, Err(ModelError::Schema(_))));
        assert!(matches!(ctx.columns().await, Err(ModelError::Schema(_))));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_content_columns_and_primary_key() {
        let (ctx, _) = context(ModelDefinition::new("Post").with_table_name("posts"));
        let content: Vec<String> = ctx
            .content_columns()
            .await
            .unwrap()
            .iter()
            .map(|c| c.name.clone())
            .collect();
        assert_eq!(content, vec!["title", "body", "metadata"]);
        assert_eq!(ctx.primary_key().await.unwrap(), PrimaryKey::Single("id".into()));
        assert!(!ctx.composite_primary_key().await.unwrap());
    }

    #[tokio::test]
    async fn test_explicit_composite_primary_key() {
        let (ctx, _) = context(
            ModelDefinition::new("Post")
                .with_table_name("posts")
                .with_primary_key(PrimaryKey::Composite(vec!["author_id".into(), "id".into()])),
        );
        assert!(ctx.composite_primary_key().await.unwrap());
        assert_eq!(ctx.sequence_name().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_modifications_and_defaults() {
        let (ctx, _) = context(
            ModelDefinition::new("Post")
                .with_table_name("posts")
                .with_attributes(
                    AttributeModifications::new()
                        .attribute("metadata", AttributeType::Json)
                        .attribute_with_default("draft", AttributeType::Boolean, json!("t")),
                ),
        );
        let types = ctx.attribute_types().await.unwrap();
        assert_eq!(types["metadata"], AttributeType::Json);
        assert_eq!(types["draft"], AttributeType::Boolean);

        let defaults = ctx.column_defaults().await.unwrap();
        assert_eq!(defaults["title"], Some(json!("untitled")));
        assert_eq!(defaults["draft"], Some(json!(true)));
        assert_eq!(defaults["body"], None);

        // virtual attributes have no backing column
        assert!(ctx.column_for_attribute("draft").await.unwrap().is_null_column());
        assert_eq!(ctx.column_for_attribute("title").await.unwrap().sql_type, "varchar");
    }

    #[tokio::test]
    async fn test_connection_dependent_metadata() {
        let (ctx, _) = context(ModelDefinition::new("Post").with_table_name("posts"));
        assert_eq!(ctx.sequence_name().await.unwrap().as_deref(), Some("posts_id_seq"));
        assert_eq!(*ctx.returning_columns_for_insert().await.unwrap(), vec!["id"]);

        let metadata = ctx.table_metadata().await.unwrap();
        assert_eq!(metadata.table_name(), "posts");
        assert_eq!(metadata.type_for("author_id"), AttributeType::BigInteger);
    }

    fn articles_query(schema: &LoadedSchema, keys: usize) -> BatchQuery {
        BatchQuery {
            model: schema.model_name().to_string(),
            table_name: schema.table_name().to_string(),
            key_column: "author_id".to_string(),
            key_type: AttributeType::BigInteger,
            keys: (1..=keys as i64).map(Value::from).collect(),
            scope: Scope::new().where_eq("type", "Article"),
            statement: None,
        }
    }

    #[tokio::test]
    async fn test_batch_statements_are_cached_per_generation_and_context() {
        let (ctx, provider) = context(ModelDefinition::new("Post").with_table_name("posts"));
        let schema = ctx.load_schema().await.unwrap();

        let first = schema.batch_statement(&articles_query(&schema, 2)).unwrap();
        let again = schema.batch_statement(&articles_query(&schema, 2)).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        schema.batch_statement(&articles_query(&schema, 3)).unwrap();
        assert_eq!(schema.cached_statement_count(), 2);

        ctx.reload_schema_from_cache();
        let reloaded = ctx.load_schema().await.unwrap();
        assert_eq!(reloaded.cached_statement_count(), 0);
        let rendered = reloaded.batch_statement(&articles_query(&reloaded, 2)).unwrap();
        assert!(!Arc::ptr_eq(&first, &rendered));
        assert_eq!(first, rendered);

        // a second connection shape keeps its own statements
        let replica = SchemaContext::new(
            Arc::new(ModelDefinition::new("Post").with_table_name("posts")),
            ContextKey::from("replica"),
            ContextSources::with_columns(provider.clone()),
        );
        let replica_schema = replica.load_schema().await.unwrap();
        assert_eq!(replica_schema.cached_statement_count(), 0);
        assert_eq!(reloaded.cached_statement_count(), 1);
    }
}
