//! Association metadata and the association registry

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};
use crate::scope::Scope;

/// How an association reaches its target records
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssociationKind {
    /// Foreign key lives on the owner
    BelongsTo,
    /// Foreign key lives on the target, at most one target
    HasOne,
    /// Foreign key lives on the target
    HasMany,
    /// Resolved by loading `through` on the owner, then `source` on those records
    Through { through: String, source: String },
}

impl AssociationKind {
    pub fn is_through(&self) -> bool {
        matches!(self, Self::Through { .. })
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, Self::HasMany)
    }
}

/// Metadata describing one association of one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociationMetadata {
    pub name: String,
    pub owner_model: String,
    pub kind: AssociationKind,
    /// Target model; `None` for a polymorphic belongs-to
    pub target_model: Option<String>,
    pub foreign_key: String,
    /// Key the foreign key points at; defaults to the primary key of the
    /// model holding it
    pub primary_key: Option<String>,
    /// Discriminator column on the owner of a polymorphic belongs-to
    pub polymorphic_type: Option<String>,
    /// Whether a through association yields a collection
    pub collection: bool,
    pub scope: Scope,
}

impl AssociationMetadata {
    fn new(owner_model: &str, name: &str, kind: AssociationKind, target_model: Option<String>, foreign_key: String) -> Self {
        let collection = kind.is_collection();
        Self {
            name: name.to_string(),
            owner_model: owner_model.to_string(),
            kind,
            target_model,
            foreign_key,
            primary_key: None,
            polymorphic_type: None,
            collection,
            scope: Scope::new(),
        }
    }

    /// `owner.<name>_id` references the target's primary key
    pub fn belongs_to(owner_model: &str, name: &str, target_model: &str) -> Self {
        Self::new(
            owner_model,
            name,
            AssociationKind::BelongsTo,
            Some(target_model.to_string()),
            format!("{}_id", name),
        )
    }

    /// `owner.<name>_id` + `owner.<name>_type` reference a record of any model
    pub fn polymorphic_belongs_to(owner_model: &str, name: &str) -> Self {
        let mut metadata = Self::new(
            owner_model,
            name,
            AssociationKind::BelongsTo,
            None,
            format!("{}_id", name),
        );
        metadata.polymorphic_type = Some(format!("{}_type", name));
        metadata
    }

    /// `target.<owner>_id` references the owner's primary key
    pub fn has_many(owner_model: &str, name: &str, target_model: &str) -> Self {
        Self::new(
            owner_model,
            name,
            AssociationKind::HasMany,
            Some(target_model.to_string()),
            format!("{}_id", snake_case(owner_model)),
        )
    }

    pub fn has_one(owner_model: &str, name: &str, target_model: &str) -> Self {
        Self::new(
            owner_model,
            name,
            AssociationKind::HasOne,
            Some(target_model.to_string()),
            format!("{}_id", snake_case(owner_model)),
        )
    }

    /// Loads `through` on the owner and `source` on the intermediate records
    pub fn through(owner_model: &str, name: &str, through: &str, source: &str) -> Self {
        let mut metadata = Self::new(
            owner_model,
            name,
            AssociationKind::Through {
                through: through.to_string(),
                source: source.to_string(),
            },
            None,
            String::new(),
        );
        metadata.collection = true;
        metadata
    }

    pub fn with_foreign_key(mut self, foreign_key: impl Into<String>) -> Self {
        self.foreign_key = foreign_key.into();
        self
    }

    pub fn with_primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = Some(primary_key.into());
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Mark a through association as yielding a single record
    pub fn singular(mut self) -> Self {
        self.collection = false;
        self
    }

    /// The target side of a polymorphic has-many/has-one: `as` names the
    /// polymorphic belongs-to on the target (`<as>_id`, `<as>_type`)
    pub fn as_polymorphic(mut self, as_name: &str) -> Self {
        self.foreign_key = format!("{}_id", as_name);
        self.scope = self
            .scope
            .where_eq(format!("{}_type", as_name), self.owner_model.clone());
        self
    }

    pub fn is_through(&self) -> bool {
        self.kind.is_through()
    }

    pub fn is_polymorphic_belongs_to(&self) -> bool {
        self.kind == AssociationKind::BelongsTo && self.polymorphic_type.is_some()
    }

    /// Validate the metadata for consistency
    pub fn validate(&self) -> ModelResult<()> {
        if self.name.is_empty() {
            return Err(ModelError::Configuration(format!(
                "Association on {} has an empty name",
                self.owner_model
            )));
        }

        match &self.kind {
            AssociationKind::Through { through, source } => {
                if through.is_empty() || source.is_empty() {
                    return Err(ModelError::Configuration(format!(
                        "Through association '{}' on {} needs both a through and a source association",
                        self.name, self.owner_model
                    )));
                }
                if through == &self.name {
                    return Err(ModelError::Configuration(format!(
                        "Through association '{}' on {} goes through itself",
                        self.name, self.owner_model
                    )));
                }
            }
            _ => {
                if self.foreign_key.is_empty() {
                    return Err(ModelError::Configuration(format!(
                        "Association '{}' on {} has no foreign key",
                        self.name, self.owner_model
                    )));
                }
                if self.target_model.is_none() && !self.is_polymorphic_belongs_to() {
                    return Err(ModelError::Configuration(format!(
                        "Association '{}' on {} has no target model",
                        self.name, self.owner_model
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Thread-safe registry of association metadata, keyed by owner model and name
#[derive(Debug, Clone, Default)]
pub struct AssociationRegistry {
    associations: Arc<DashMap<String, HashMap<String, Arc<AssociationMetadata>>>>,
}

impl AssociationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register association metadata on its owner model
    pub fn register(&self, metadata: AssociationMetadata) -> ModelResult<()> {
        metadata.validate()?;

        let mut model_associations = self
            .associations
            .entry(metadata.owner_model.clone())
            .or_default();
        model_associations.insert(metadata.name.clone(), Arc::new(metadata));
        Ok(())
    }

    pub fn get(&self, model: &str, name: &str) -> Option<Arc<AssociationMetadata>> {
        self.associations.get(model)?.get(name).cloned()
    }

    /// Like [`get`](Self::get) but fails with `UnknownAssociation`
    pub fn fetch(&self, model: &str, name: &str) -> ModelResult<Arc<AssociationMetadata>> {
        self.get(model, name)
            .ok_or_else(|| ModelError::unknown_association(model, name))
    }

    pub fn has_association(&self, model: &str, name: &str) -> bool {
        self.associations
            .get(model)
            .map(|associations| associations.contains_key(name))
            .unwrap_or(false)
    }

    pub fn association_names(&self, model: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .associations
            .get(model)
            .map(|associations| associations.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Model reached by following `name` from `model`, when it is statically known
    pub fn target_model(&self, model: &str, name: &str) -> ModelResult<Option<String>> {
        let metadata = self.fetch(model, name)?;
        match &metadata.kind {
            AssociationKind::Through { through, source } => {
                match self.target_model(model, through)? {
                    Some(middle) => self.target_model(&middle, source),
                    None => Ok(None),
                }
            }
            _ => Ok(metadata.target_model.clone()),
        }
    }
}

/// `BlogPost` → `blog_post`
fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_conventional_keys() {
        let author = AssociationMetadata::belongs_to("Post", "author", "Author");
        assert_eq!(author.foreign_key, "author_id");
        assert!(!author.kind.is_collection());

        let comments = AssociationMetadata::has_many("BlogPost", "comments", "Comment");
        assert_eq!(comments.foreign_key, "blog_post_id");
        assert!(comments.collection);

        let commentable = AssociationMetadata::polymorphic_belongs_to("Comment", "commentable");
        assert!(commentable.is_polymorphic_belongs_to());
        assert_eq!(commentable.polymorphic_type.as_deref(), Some("commentable_type"));
    }

    #[test]
    fn test_polymorphic_has_many_scope() {
        let comments = AssociationMetadata::has_many("Post", "comments", "Comment")
            .as_polymorphic("commentable");
        assert_eq!(comments.foreign_key, "commentable_id");
        assert_eq!(comments.scope.conditions().len(), 1);
        assert_eq!(comments.scope.conditions()[0].value, json!("Post"));
    }

    #[test]
    fn test_validation() {
        let mut bad = AssociationMetadata::belongs_to("Post", "author", "Author");
        bad.target_model = None;
        assert!(bad.validate().is_err());

        let looped = AssociationMetadata::through("Post", "tags", "tags", "tag");
        assert!(looped.validate().is_err());

        let registry = AssociationRegistry::new();
        assert!(registry.register(bad).is_err());
        assert!(!registry.has_association("Post", "author"));
    }

    #[test]
    fn test_registry_lookup() {
        let registry = AssociationRegistry::new();
        registry
            .register(AssociationMetadata::has_many("Post", "taggings", "Tagging"))
            .unwrap();
        registry
            .register(AssociationMetadata::belongs_to("Tagging", "tag", "Tag"))
            .unwrap();
        registry
            .register(AssociationMetadata::through("Post", "tags", "taggings", "tag"))
            .unwrap();

        assert_eq!(registry.association_names("Post"), vec!["taggings", "tags"]);
        assert_eq!(registry.target_model("Post", "tags").unwrap().as_deref(), Some("Tag"));
        assert!(matches!(
            registry.fetch("Post", "tgas"),
            Err(ModelError::UnknownAssociation { .. })
        ));
    }
}
