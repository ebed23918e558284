//! Association preloading
//!
//! Given root records and a nested association specification, loads every
//! requested association with as few queries as possible. Loaders that
//! target the same model through the same key column under an equal scope
//! share one batched query; nested associations are loaded breadth-first,
//! each level owned by the records the previous level produced.
//!
//! ```ignore
//! let ctx = PreloadContext::new(associations, schemas, Arc::new(PgBatchExecutor::new(pool)));
//! let spec = PreloadSpec::from_json(&json!(["author", {"comments": "user"}]))?;
//! Preloader::new("Post", posts.clone(), spec).call(&ctx).await?;
//! ```

pub mod association;
pub mod batch;
pub mod branch;
pub mod executor;
pub mod loader;
pub mod spec;

use std::sync::Arc;

pub use association::{AssociationKind, AssociationMetadata, AssociationRegistry};
pub use batch::{Batch, PreloadStats};
pub use branch::Branch;
pub use executor::{BatchQuery, BatchQueryExecutor, PgBatchExecutor};
pub use loader::{GroupingKey, Loader};
pub use spec::{PreloadNode, PreloadSpec};

use crate::config::PreloadConfig;
use crate::error::{ModelError, ModelResult};
use crate::record::RecordRef;
use crate::schema::{ContextKey, SchemaRegistry};
use crate::scope::Scope;

/// Everything a preload call reads from: association metadata, schema
/// contexts and the query entry point
#[derive(Clone)]
pub struct PreloadContext {
    pub associations: Arc<AssociationRegistry>,
    pub schemas: Arc<SchemaRegistry>,
    pub context_key: ContextKey,
    pub executor: Arc<dyn BatchQueryExecutor>,
    pub config: PreloadConfig,
}

impl PreloadContext {
    pub fn new(
        associations: Arc<AssociationRegistry>,
        schemas: Arc<SchemaRegistry>,
        executor: Arc<dyn BatchQueryExecutor>,
    ) -> Self {
        Self {
            associations,
            schemas,
            context_key: ContextKey::default(),
            executor,
            config: PreloadConfig::default(),
        }
    }

    pub fn with_context_key(mut self, key: impl Into<ContextKey>) -> Self {
        self.context_key = key.into();
        self
    }

    pub fn with_config(mut self, config: PreloadConfig) -> Self {
        self.config = config;
        self
    }
}

impl std::fmt::Debug for PreloadContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreloadContext")
            .field("associations", &self.associations)
            .field("schemas", &self.schemas)
            .field("context_key", &self.context_key)
            .field("config", &self.config)
            .finish()
    }
}

/// A preload request: associations of `model` to load onto `records`
#[derive(Debug, Clone)]
pub struct Preloader {
    model: String,
    records: Vec<RecordRef>,
    nodes: Vec<PreloadNode>,
    scope: Scope,
}

impl Preloader {
    pub fn new(model: impl Into<String>, records: Vec<RecordRef>, spec: impl Into<PreloadSpec>) -> Self {
        Self {
            model: model.into(),
            records,
            nodes: spec.into().normalize(),
            scope: Scope::new(),
        }
    }

    /// Extra scope applied to every association loaded by this request
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() || self.nodes.is_empty()
    }

    /// Check every statically reachable association name and the tree depth
    pub(crate) fn validate(&self, ctx: &PreloadContext, depth: usize) -> ModelResult<()> {
        for node in &self.nodes {
            let deepest = depth + node.depth() - 1;
            if deepest > ctx.config.max_depth {
                return Err(ModelError::Configuration(format!(
                    "Preloading '{}' on {} nests {} levels deep, the limit is {}",
                    node.name, self.model, deepest, ctx.config.max_depth
                )));
            }
            validate_node(&ctx.associations, &self.model, node)?;
        }
        Ok(())
    }

    pub(crate) fn into_branches(self, depth: usize) -> Vec<Branch> {
        let Preloader {
            records,
            nodes,
            scope,
            ..
        } = self;
        nodes
            .into_iter()
            .map(|node| Branch::new(node, records.clone(), scope.clone(), depth))
            .collect()
    }

    /// Run this request on its own
    pub async fn call(self, ctx: &PreloadContext) -> ModelResult<PreloadStats> {
        Batch::new(ctx, vec![self]).call().await
    }
}

fn validate_node(registry: &AssociationRegistry, model: &str, node: &PreloadNode) -> ModelResult<()> {
    registry.fetch(model, &node.name)?;
    if node.children.is_empty() {
        return Ok(());
    }
    // polymorphic targets are only known once records are loaded
    if let Ok(Some(target)) = registry.target_model(model, &node.name) {
        for child in &node.children {
            validate_node(registry, &target, child)?;
        }
    }
    Ok(())
}
