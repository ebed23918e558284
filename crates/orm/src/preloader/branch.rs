//! Branches - one association at one level of a preload tree

use serde_json::Value;
use tracing::debug;

use super::loader::Loader;
use super::spec::PreloadNode;
use super::PreloadContext;
use crate::error::{ModelError, ModelResult};
use crate::record::{dedup_refs, Association, Record, RecordRef};
use crate::scope::Scope;

/// One association of a preload tree applied to a set of owners
///
/// Loaders are built lazily, the first time the branch becomes active. The
/// branch is done once all of them have run; only then are its children
/// turned into branches over the records it loaded.
///
/// Below a polymorphic association the owners may belong to several models;
/// owners whose model lacks the association are skipped rather than failing.
#[derive(Debug)]
pub struct Branch {
    association: String,
    children: Vec<PreloadNode>,
    owners: Vec<RecordRef>,
    scope: Scope,
    depth: usize,
    loaders: Option<Vec<Loader>>,
    polymorphic: bool,
    polymorphic_parent: bool,
}

impl Branch {
    pub(crate) fn new(node: PreloadNode, owners: Vec<RecordRef>, scope: Scope, depth: usize) -> Self {
        Self {
            association: node.name,
            children: node.children,
            owners,
            scope,
            depth,
            loaders: None,
            polymorphic: false,
            polymorphic_parent: false,
        }
    }

    pub fn association(&self) -> &str {
        &self.association
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_done(&self) -> bool {
        self.loaders
            .as_ref()
            .map(|loaders| loaders.iter().all(Loader::is_run))
            .unwrap_or(false)
    }

    /// Build one loader per group of similar owners
    pub(crate) async fn prepare(&mut self, ctx: &PreloadContext) -> ModelResult<()> {
        if self.loaders.is_some() {
            return Ok(());
        }

        let mut loaders = Vec::new();
        for (model, owners) in group_by(&self.owners, |owner| Some(owner.model().to_string())) {
            let association = if self.polymorphic_parent {
                match ctx.associations.get(&model, &self.association) {
                    Some(association) => association,
                    None => {
                        debug!(
                            model = %model,
                            association = %self.association,
                            "skipping polymorphic owners without the association"
                        );
                        continue;
                    }
                }
            } else {
                ctx.associations.fetch(&model, &self.association)?
            };

            if association.is_through() {
                loaders.push(Loader::through(
                    association,
                    &model,
                    owners,
                    self.scope.clone(),
                    self.depth,
                )?);
            } else if let Some(type_column) = association.polymorphic_type.clone() {
                self.polymorphic = true;
                let mut typed = Vec::new();
                for owner in owners {
                    let discriminator = owner.read().attribute(&type_column);
                    match discriminator {
                        Value::String(target) if !target.is_empty() => typed.push(owner),
                        // a blank discriminator names no model
                        Value::Null | Value::String(_) => {
                            let mut owner = owner.write();
                            if !owner.is_loaded(&self.association) {
                                owner.set_association(self.association.clone(), Association::One(None));
                            }
                        }
                        other => {
                            return Err(ModelError::InvalidKey(format!(
                                "{}.{} is not a model name: {}",
                                model, type_column, other
                            )))
                        }
                    }
                }

                // one loader per target model
                for (target, owners) in group_by(&typed, |owner| {
                    owner.attribute(&type_column).as_str().map(str::to_string)
                }) {
                    loaders.push(
                        Loader::direct(
                            ctx,
                            association.clone(),
                            &model,
                            Some(target.as_str()),
                            owners,
                            self.scope.clone(),
                            self.depth,
                        )
                        .await?,
                    );
                }
            } else {
                loaders.push(
                    Loader::direct(
                        ctx,
                        association,
                        &model,
                        None,
                        owners,
                        self.scope.clone(),
                        self.depth,
                    )
                    .await?,
                );
            }
        }

        self.loaders = Some(loaders);
        Ok(())
    }

    /// Loaders that have not run yet
    pub(crate) fn runnable_loaders(&mut self) -> impl Iterator<Item = &mut Loader> {
        self.loaders
            .iter_mut()
            .flatten()
            .filter(|loader| !loader.is_run())
    }

    /// Records reached through this branch, each once
    pub fn target_records(&self) -> Vec<RecordRef> {
        dedup_refs(
            self.loaders
                .iter()
                .flatten()
                .flat_map(Loader::target_records),
        )
    }

    /// Branches for the nested associations, owned by this branch's targets
    pub(crate) fn into_children(self) -> Vec<Branch> {
        if self.children.is_empty() {
            return Vec::new();
        }
        let targets = self.target_records();
        if targets.is_empty() {
            return Vec::new();
        }

        let Branch {
            children,
            scope,
            depth,
            polymorphic,
            ..
        } = self;
        children
            .into_iter()
            .map(|child| {
                let mut branch = Branch::new(child, targets.clone(), scope.clone(), depth + 1);
                branch.polymorphic_parent = polymorphic;
                branch
            })
            .collect()
    }
}

/// Group records by a key read from each, keeping first-seen order; records
/// without a key are dropped
fn group_by(
    records: &[RecordRef],
    key: impl Fn(&Record) -> Option<String>,
) -> Vec<(String, Vec<RecordRef>)> {
    let mut groups: Vec<(String, Vec<RecordRef>)> = Vec::new();
    for record in records {
        let Some(group) = key(&*record.read()) else {
            continue;
        };
        match groups.iter_mut().find(|(existing, _)| *existing == group) {
            Some((_, members)) => members.push(record.clone()),
            None => groups.push((group, vec![record.clone()])),
        }
    }
    groups
}
