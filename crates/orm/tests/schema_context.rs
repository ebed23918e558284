mod support;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use strata_orm::schema::{AttributeModifications, AttributeType, Column};
use strata_orm::{ContextKey, ContextSources, ModelDefinition, ModelError, SchemaContext, SchemaRegistry};
use support::{init_tracing, MemoryColumns};

fn post_columns() -> MemoryColumns {
    MemoryColumns::new().with_table(
        "posts",
        vec![
            Column::new("id", "bigint").primary_key(),
            Column::new("title", "varchar").with_default(json!("untitled")),
            Column::new("settings", "text"),
            Column::new("author_id", "bigint"),
        ],
    )
}

fn post_context(columns: Arc<MemoryColumns>) -> Arc<SchemaContext> {
    let definition = ModelDefinition::new("Post").with_table_name("posts");
    Arc::new(SchemaContext::new(
        Arc::new(definition),
        ContextKey::default(),
        ContextSources::with_columns(columns),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_access_fetches_once() {
        init_tracing();
        let columns = Arc::new(post_columns().with_delay(Duration::from_millis(50)));
        let context = post_context(columns.clone());

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let context = Arc::clone(&context);
                tokio::spawn(async move { context.load_schema().await })
            })
            .collect();

        let mut generations = Vec::new();
        for task in tasks {
            generations.push(task.await.unwrap().unwrap());
        }

        assert_eq!(columns.calls(), 1);
        assert_eq!(context.fetch_count(), 1);
        assert!(generations.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_invalidation_triggers_exactly_one_refetch() {
        init_tracing();
        let columns = Arc::new(post_columns().with_delay(Duration::from_millis(20)));
        let context = post_context(columns.clone());

        let first = context.load_schema().await.unwrap();
        context.reload_schema_from_cache();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let context = Arc::clone(&context);
                tokio::spawn(async move { context.column_names().await })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().len(), 4);
        }

        assert_eq!(columns.calls(), 2);
        let second = context.load_schema().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failure_reaches_every_waiter_then_retries() {
        init_tracing();
        let columns = Arc::new(post_columns().with_delay(Duration::from_millis(50)).failing(1));
        let context = post_context(columns.clone());

        let tasks: Vec<_> = (0..6)
            .map(|_| {
                let context = Arc::clone(&context);
                tokio::spawn(async move { context.load_schema().await })
            })
            .collect();
        for task in tasks {
            let err = task.await.unwrap().unwrap_err();
            assert_eq!(err, ModelError::Database("connection reset".to_string()));
        }
        assert_eq!(columns.calls(), 1);
        assert!(!context.is_schema_loaded());

        assert!(context.load_schema().await.is_ok());
        assert_eq!(columns.calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_invalidation_during_load_is_not_cached() {
        init_tracing();
        let columns = Arc::new(post_columns().with_delay(Duration::from_millis(80)));
        let context = post_context(columns.clone());

        let loading = {
            let context = Arc::clone(&context);
            tokio::spawn(async move { context.load_schema().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        context.reload_schema_from_cache();

        // the in-flight attempt still answers its caller
        assert!(loading.await.unwrap().is_ok());
        assert!(!context.is_schema_loaded());

        context.load_schema().await.unwrap();
        assert_eq!(columns.calls(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_load_lets_the_next_caller_load() {
        init_tracing();
        let columns = Arc::new(post_columns().with_delay(Duration::from_millis(200)));
        let context = post_context(columns.clone());

        let timed_out = tokio::time::timeout(Duration::from_millis(10), context.load_schema()).await;
        assert!(timed_out.is_err());
        assert!(!context.is_schema_loaded());

        assert!(context.load_schema().await.is_ok());
        assert_eq!(columns.calls(), 2);
    }

    #[tokio::test]
    async fn test_attribute_modifications_layer_over_columns() {
        init_tracing();
        let definition = ModelDefinition::new("Post")
            .with_table_name("posts")
            .with_attributes(
                AttributeModifications::new()
                    .attribute("settings", AttributeType::Json)
                    .attribute_with_default("draft", AttributeType::Boolean, json!(true))
                    .default_value("title", json!("new post")),
            );
        let context = SchemaContext::new(
            Arc::new(definition),
            ContextKey::default(),
            ContextSources::with_columns(Arc::new(post_columns())),
        );

        let types = context.attribute_types().await.unwrap();
        assert_eq!(types["settings"], AttributeType::Json);
        assert_eq!(types["draft"], AttributeType::Boolean);
        assert_eq!(types["id"], AttributeType::BigInteger);

        let defaults = context.column_defaults().await.unwrap();
        assert_eq!(defaults["title"], Some(json!("new post")));

        let builder = context.attributes_builder().await.unwrap();
        let row = json!({"id": "5", "title": "Hi", "settings": "{\"theme\":\"dark\"}", "author_id": 1});
        let attributes = builder
            .build_from_database(row.as_object().unwrap())
            .unwrap();
        assert_eq!(attributes.read("id").unwrap(), &json!(5));
        assert_eq!(attributes.read("settings").unwrap(), &json!({"theme": "dark"}));
        assert_eq!(attributes.read("draft").unwrap(), &json!(true));
    }

    #[tokio::test]
    async fn test_registry_shares_contexts_across_shards_of_one_shape() {
        init_tracing();
        let columns = Arc::new(post_columns());
        let registry = SchemaRegistry::new();
        registry.register_model(ModelDefinition::new("Post").with_table_name("posts"));
        registry.register_context("pg", ContextSources::with_columns(columns.clone()));

        let key = ContextKey::from("pg");
        let shard_a = registry.context_for("Post", &key).unwrap();
        let shard_b = registry.context_for("Post", &key).unwrap();
        shard_a.load_schema().await.unwrap();
        shard_b.load_schema().await.unwrap();
        assert_eq!(columns.calls(), 1);

        // e.g. after running a migration
        registry.invalidate_all();
        shard_b.table_metadata().await.unwrap();
        assert_eq!(columns.calls(), 2);
    }
}
