//! Loaders - one association for one group of similar owners

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::association::{AssociationKind, AssociationMetadata};
use super::batch::{Batch, PreloadStats};
use super::executor::BatchQuery;
use super::{PreloadContext, Preloader};
use crate::error::{ModelError, ModelResult};
use crate::record::{dedup_refs, Association, RecordRef};
use crate::schema::{AttributeType, LoadedSchema};
use crate::scope::{canonical, Scope};

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Loaders with equal keys share one batched query
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupingKey {
    pub model: String,
    pub key_column: String,
    pub scope: Scope,
}

/// Fetched target records indexed by canonical key value, in query order
pub(crate) type RecordIndex = HashMap<String, Vec<RecordRef>>;

/// How a direct (non-through) loader reaches its targets
#[derive(Debug, Clone)]
pub(crate) struct DirectPlan {
    pub target: Arc<LoadedSchema>,
    /// Attribute on the owner holding the key
    pub owner_key: String,
    /// Column on the target matched against the owner key
    pub target_key: String,
    pub key_type: AttributeType,
}

#[derive(Debug, Clone)]
enum Plan {
    Direct(DirectPlan),
    Through { through: String, source: String },
}

/// Loads one association for a set of owners of one model
#[derive(Debug)]
pub struct Loader {
    association: Arc<AssociationMetadata>,
    owner_model: String,
    owners: Vec<RecordRef>,
    scope: Scope,
    plan: Plan,
    depth: usize,
    run: bool,
}

impl Loader {
    /// Loader for a belongs-to / has-one / has-many association;
    /// `target_model` overrides the target of a polymorphic belongs-to
    pub(crate) async fn direct(
        ctx: &PreloadContext,
        association: Arc<AssociationMetadata>,
        owner_model: &str,
        target_model: Option<&str>,
        owners: Vec<RecordRef>,
        scope: Scope,
        depth: usize,
    ) -> ModelResult<Self> {
        let target_model = target_model
            .or(association.target_model.as_deref())
            .ok_or_else(|| {
                ModelError::Relationship(format!(
                    "Association '{}' on {} has no target model",
                    association.name, owner_model
                ))
            })?
            .to_string();

        let target = ctx
            .schemas
            .context_for(&target_model, &ctx.context_key)?
            .load_schema()
            .await?;

        let (owner_key, target_key) = match association.kind {
            AssociationKind::BelongsTo => {
                let target_key = match &association.primary_key {
                    Some(key) => key.clone(),
                    None => single_key(&target, &association)?,
                };
                (association.foreign_key.clone(), target_key)
            }
            AssociationKind::HasOne | AssociationKind::HasMany => {
                let owner_key = match &association.primary_key {
                    Some(key) => key.clone(),
                    None => {
                        let owner = ctx
                            .schemas
                            .context_for(owner_model, &ctx.context_key)?
                            .load_schema()
                            .await?;
                        single_key(&owner, &association)?
                    }
                };
                (owner_key, association.foreign_key.clone())
            }
            AssociationKind::Through { .. } => {
                return Err(ModelError::Relationship(format!(
                    "Association '{}' on {} is a through association",
                    association.name, owner_model
                )))
            }
        };

        let key_type = target.table_metadata().type_for(&target_key);

        Ok(Self {
            owner_model: owner_model.to_string(),
            scope: association.scope.merge(&scope),
            association,
            owners,
            plan: Plan::Direct(DirectPlan {
                target,
                owner_key,
                target_key,
                key_type,
            }),
            depth,
            run: false,
        })
    }

    pub(crate) fn through(
        association: Arc<AssociationMetadata>,
        owner_model: &str,
        owners: Vec<RecordRef>,
        scope: Scope,
        depth: usize,
    ) -> ModelResult<Self> {
        let AssociationKind::Through { through, source } = &association.kind else {
            return Err(ModelError::Relationship(format!(
                "Association '{}' on {} is not a through association",
                association.name, owner_model
            )));
        };

        Ok(Self {
            owner_model: owner_model.to_string(),
            plan: Plan::Through {
                through: through.clone(),
                source: source.clone(),
            },
            scope: association.scope.merge(&scope),
            association,
            owners,
            depth,
            run: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.association.name
    }

    pub fn owners(&self) -> &[RecordRef] {
        &self.owners
    }

    pub fn is_run(&self) -> bool {
        self.run
    }

    pub fn is_through(&self) -> bool {
        matches!(self.plan, Plan::Through { .. })
    }

    /// Every owner already carries the association
    pub fn already_loaded(&self) -> bool {
        let name = self.name();
        self.owners.iter().all(|owner| owner.read().is_loaded(name))
    }

    pub(crate) fn direct_plan(&self) -> Option<&DirectPlan> {
        match &self.plan {
            Plan::Direct(plan) => Some(plan),
            Plan::Through { .. } => None,
        }
    }

    pub fn grouping_key(&self) -> Option<GroupingKey> {
        self.direct_plan().map(|plan| GroupingKey {
            model: plan.target.model_name().to_string(),
            key_column: plan.target_key.clone(),
            scope: self.scope.clone(),
        })
    }

    /// The fetch this loader needs, or `None` when it has nothing to fetch
    pub(crate) fn batch_query(&self) -> Option<BatchQuery> {
        let plan = self.direct_plan()?;
        let keys = self.owner_keys();
        if keys.is_empty() {
            return None;
        }
        Some(BatchQuery {
            model: plan.target.model_name().to_string(),
            table_name: plan.target.table_name().to_string(),
            key_column: plan.target_key.clone(),
            key_type: plan.key_type,
            keys,
            scope: self.scope.clone(),
            statement: None,
        })
    }

    /// Distinct, cast, non-null keys of the owners still missing the association
    pub(crate) fn owner_keys(&self) -> Vec<Value> {
        let Some(plan) = self.direct_plan() else {
            return Vec::new();
        };

        let mut seen = std::collections::HashSet::new();
        let mut keys = Vec::new();
        for owner in &self.owners {
            let owner = owner.read();
            if owner.is_loaded(self.name()) {
                continue;
            }
            if let Some(key) = cast_key(plan, &owner.attribute(&plan.owner_key)) {
                if seen.insert(canonical(&key)) {
                    keys.push(key);
                }
            }
        }
        keys
    }

    /// Mark as run without querying; owners keep what they carry
    pub(crate) fn run_already_loaded(&mut self) {
        self.run = true;
    }

    /// Assign fetched records to the owners still missing the association
    pub(crate) fn run_direct(&mut self, index: &RecordIndex) -> ModelResult<()> {
        let plan = match &self.plan {
            Plan::Direct(plan) => plan,
            Plan::Through { .. } => {
                return Err(ModelError::Relationship(format!(
                    "Association '{}' on {} cannot be loaded directly",
                    self.association.name, self.owner_model
                )))
            }
        };

        let collection = self.association.kind.is_collection();
        for owner in &self.owners {
            let key = cast_key(plan, &owner.read().attribute(&plan.owner_key));
            let mut owner = owner.write();
            if owner.is_loaded(&self.association.name) {
                continue;
            }
            let matches = key
                .and_then(|key| index.get(&canonical(&key)))
                .cloned()
                .unwrap_or_default();
            owner.set_association(self.association.name.clone(), wrap(matches, collection));
        }

        self.run = true;
        Ok(())
    }

    /// Load the intermediate association, then the source association on
    /// the intermediate records, and hand the flattened result to the owners
    pub(crate) fn run_through<'a>(&'a mut self, ctx: &'a PreloadContext) -> BoxFuture<'a, ModelResult<PreloadStats>> {
        Box::pin(async move {
            let (through, source) = match &self.plan {
                Plan::Through { through, source } => (through.clone(), source.clone()),
                Plan::Direct(_) => {
                    return Err(ModelError::Relationship(format!(
                        "Association '{}' on {} is not a through association",
                        self.association.name, self.owner_model
                    )))
                }
            };

            if ctx.associations.get(&self.owner_model, &through).is_none() {
                return Err(ModelError::Relationship(format!(
                    "Through association '{}' on {} goes through unknown association '{}'",
                    self.association.name, self.owner_model, through
                )));
            }

            let pending: Vec<RecordRef> = self
                .owners
                .iter()
                .filter(|owner| !owner.read().is_loaded(&self.association.name))
                .cloned()
                .collect();
            debug!(
                association = %self.association.name,
                through = %through,
                source = %source,
                owners = pending.len(),
                "running through loader"
            );

            let mut stats = Batch::nested(
                ctx,
                vec![Preloader::new(self.owner_model.clone(), pending.clone(), through.as_str())],
                self.depth + 1,
            )
            .call()
            .await?;

            let middle = dedup_refs(pending.iter().flat_map(|owner| owner.read().targets(&through)));
            let mut middle_by_model: Vec<(String, Vec<RecordRef>)> = Vec::new();
            for record in middle {
                let model = record.read().model().to_string();
                if ctx.associations.get(&model, &source).is_none() {
                    return Err(ModelError::Relationship(format!(
                        "Through association '{}' on {} has no source association '{}' on {}",
                        self.association.name, self.owner_model, source, model
                    )));
                }
                match middle_by_model.iter_mut().find(|(m, _)| *m == model) {
                    Some((_, records)) => records.push(record),
                    None => middle_by_model.push((model, vec![record])),
                }
            }

            let preloaders = middle_by_model
                .into_iter()
                .map(|(model, records)| Preloader::new(model, records, source.as_str()).with_scope(self.scope.clone()))
                .collect();
            stats += Batch::nested(ctx, preloaders, self.depth + 1).call().await?;

            let collection = self.association.collection;
            for owner in &pending {
                let targets = dedup_refs(
                    owner
                        .read()
                        .targets(&through)
                        .iter()
                        .flat_map(|middle| middle.read().targets(&source)),
                );
                let mut owner = owner.write();
                if !owner.is_loaded(&self.association.name) {
                    owner.set_association(self.association.name.clone(), wrap(targets, collection));
                }
            }

            self.run = true;
            Ok(stats)
        })
    }

    /// Targets of every owner once run, for the next level of the tree
    pub fn target_records(&self) -> Vec<RecordRef> {
        dedup_refs(
            self.owners
                .iter()
                .flat_map(|owner| owner.read().targets(&self.association.name)),
        )
    }
}

fn single_key(schema: &LoadedSchema, association: &AssociationMetadata) -> ModelResult<String> {
    schema
        .primary_key()
        .single()
        .map(str::to_string)
        .ok_or_else(|| {
            ModelError::InvalidKey(format!(
                "Association '{}' on {} needs an explicit key: {} has no single-column primary key",
                association.name,
                association.owner_model,
                schema.model_name()
            ))
        })
}

/// Owner key cast to the target column type; uncastable keys match nothing
fn cast_key(plan: &DirectPlan, raw: &Value) -> Option<Value> {
    match plan.key_type.cast(raw) {
        Ok(Value::Null) => None,
        Ok(key) => Some(key),
        Err(error) => {
            debug!(key = %raw, column = %plan.target_key, error = %error, "skipping uncastable key");
            None
        }
    }
}

fn wrap(records: Vec<RecordRef>, collection: bool) -> Association {
    if collection {
        Association::Many(records)
    } else {
        Association::One(records.into_iter().next())
    }
}
