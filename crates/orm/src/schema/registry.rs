//! Schema Registry - per model, per context key schema contexts

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use super::context::SchemaContext;
use super::definition::SchemaOwner;
use super::provider::{ContextKey, ContextSources};
use crate::error::{ModelError, ModelResult};

/// Thread-safe registry of models, context sources and their schema contexts
///
/// Contexts are created on first access and shared by every caller asking for
/// the same `(model, context key)` pair.
#[derive(Default)]
pub struct SchemaRegistry {
    models: DashMap<String, Arc<dyn SchemaOwner>>,
    sources: DashMap<ContextKey, ContextSources>,
    contexts: DashMap<(String, ContextKey), Arc<SchemaContext>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a model; existing contexts of the model are discarded
    pub fn register_model<M: SchemaOwner + 'static>(&self, model: M) {
        self.register_model_arc(Arc::new(model));
    }

    pub fn register_model_arc(&self, model: Arc<dyn SchemaOwner>) {
        let name = model.model_name().to_string();
        self.contexts.retain(|(model_name, _), _| model_name != &name);
        debug!(model = %name, "registered model");
        self.models.insert(name, model);
    }

    /// Register the metadata sources for a context key
    pub fn register_context(&self, key: impl Into<ContextKey>, sources: ContextSources) {
        let key = key.into();
        self.contexts.retain(|(_, context_key), _| context_key != &key);
        self.sources.insert(key, sources);
    }

    pub fn has_model(&self, model: &str) -> bool {
        self.models.contains_key(model)
    }

    /// Schema context of `model` under `key`, created on first access
    pub fn context_for(&self, model: &str, key: &ContextKey) -> ModelResult<Arc<SchemaContext>> {
        let cache_key = (model.to_string(), key.clone());
        if let Some(context) = self.contexts.get(&cache_key) {
            return Ok(Arc::clone(context.value()));
        }

        let owner = self
            .models
            .get(model)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ModelError::Configuration(format!("Model '{}' is not registered", model)))?;
        let sources = self
            .sources
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                ModelError::Configuration(format!("No schema sources registered for context '{}'", key))
            })?;

        let context = self
            .contexts
            .entry(cache_key)
            .or_insert_with(|| Arc::new(SchemaContext::new(owner, key.clone(), sources)));
        Ok(Arc::clone(context.value()))
    }

    /// Context keys for which `model` currently has a context
    pub fn context_keys_for(&self, model: &str) -> Vec<ContextKey> {
        let mut keys: Vec<ContextKey> = self
            .contexts
            .iter()
            .filter(|entry| entry.key().0 == model)
            .map(|entry| entry.key().1.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Clear the cached schema of `model` in every context
    pub fn invalidate_model(&self, model: &str) {
        for entry in self.contexts.iter().filter(|entry| entry.key().0 == model) {
            entry.value().reload_schema_from_cache();
        }
    }

    /// Clear every cached schema, e.g. after running migrations
    pub fn invalidate_all(&self) {
        for entry in self.contexts.iter() {
            entry.value().reload_schema_from_cache();
        }
        info!(contexts = self.contexts.len(), "schema cache invalidated");
    }

    /// Forget a model and tear down its contexts
    pub fn discard_model(&self, model: &str) {
        self.models.remove(model);
        self.contexts.retain(|(model_name, _), _| model_name != model);
    }

    /// Forget a context key and tear down every context using it
    pub fn discard_context(&self, key: &ContextKey) {
        self.sources.remove(key);
        self.contexts.retain(|(_, context_key), _| context_key != key);
    }
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("models", &self.models.len())
            .field("sources", &self.sources.len())
            .field("contexts", &self.contexts.len())
            .finish()
    }
}
