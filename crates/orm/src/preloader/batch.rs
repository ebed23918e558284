//! Batch - breadth-first driver coalescing loaders into batched queries

use std::collections::{HashMap, HashSet};
use std::ops::AddAssign;

use serde::Serialize;
use tracing::debug;

use super::branch::Branch;
use super::executor::BatchQuery;
use super::loader::{GroupingKey, Loader, RecordIndex};
use super::{PreloadContext, Preloader};
use crate::error::ModelResult;
use crate::record::{Record, RecordRef};
use crate::scope::canonical;

/// What one preload call did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PreloadStats {
    /// Batched queries sent to the executor
    pub queries: usize,
    pub loaders_run: usize,
    /// Loaders satisfied without a query because every owner was loaded
    pub already_loaded: usize,
    pub rounds: usize,
}

impl AddAssign for PreloadStats {
    fn add_assign(&mut self, other: Self) {
        self.queries += other.queries;
        self.loaders_run += other.loaders_run;
        self.already_loaded += other.already_loaded;
        self.rounds += other.rounds;
    }
}

/// Loads every association requested by a set of preloaders
pub struct Batch<'a> {
    ctx: &'a PreloadContext,
    preloaders: Vec<Preloader>,
    depth: usize,
}

impl<'a> Batch<'a> {
    pub fn new(ctx: &'a PreloadContext, preloaders: Vec<Preloader>) -> Self {
        Self::nested(ctx, preloaders, 1)
    }

    /// Batch whose root branches sit `depth` levels deep in an enclosing tree
    pub(crate) fn nested(ctx: &'a PreloadContext, preloaders: Vec<Preloader>, depth: usize) -> Self {
        Self {
            ctx,
            preloaders: preloaders.into_iter().filter(|p| !p.is_empty()).collect(),
            depth,
        }
    }

    pub async fn call(self) -> ModelResult<PreloadStats> {
        let Batch {
            ctx,
            preloaders,
            depth,
        } = self;
        ctx.config.validate()?;
        for preloader in &preloaders {
            preloader.validate(ctx, depth)?;
        }

        let mut stats = PreloadStats::default();
        let mut branches: Vec<Branch> = preloaders
            .into_iter()
            .flat_map(|preloader| preloader.into_branches(depth))
            .collect();

        while !branches.is_empty() {
            stats.rounds += 1;
            for branch in branches.iter_mut() {
                branch.prepare(ctx).await?;
            }

            {
                let runnable: Vec<&mut Loader> = branches
                    .iter_mut()
                    .flat_map(Branch::runnable_loaders)
                    .collect();
                let (loaded, pending): (Vec<_>, Vec<_>) =
                    runnable.into_iter().partition(|loader| loader.already_loaded());

                if !loaded.is_empty() {
                    for loader in loaded {
                        loader.run_already_loaded();
                        stats.already_loaded += 1;
                        stats.loaders_run += 1;
                    }
                } else {
                    stats += run_loaders(ctx, pending).await?;
                }
            }

            let mut next = Vec::with_capacity(branches.len());
            for branch in branches {
                if branch.is_done() {
                    next.extend(branch.into_children());
                } else {
                    next.push(branch);
                }
            }
            branches = next;
        }

        debug!(
            queries = stats.queries,
            loaders = stats.loaders_run,
            already_loaded = stats.already_loaded,
            rounds = stats.rounds,
            "preload finished"
        );
        Ok(stats)
    }
}

/// Group direct loaders into one query per grouping key, then run through
/// loaders one by one
async fn run_loaders(ctx: &PreloadContext, loaders: Vec<&mut Loader>) -> ModelResult<PreloadStats> {
    let mut stats = PreloadStats::default();
    let mut groups: Vec<(GroupingKey, Vec<&mut Loader>)> = Vec::new();
    let mut positions: HashMap<GroupingKey, usize> = HashMap::new();
    let mut through = Vec::new();

    for loader in loaders {
        match loader.grouping_key() {
            Some(key) => match positions.get(&key) {
                Some(&position) => groups[position].1.push(loader),
                None => {
                    positions.insert(key.clone(), groups.len());
                    groups.push((key, vec![loader]));
                }
            },
            None => through.push(loader),
        }
    }

    for (key, group) in groups {
        let index = fetch_group(ctx, &key, &group, &mut stats).await?;
        for loader in group {
            loader.run_direct(&index)?;
            stats.loaders_run += 1;
        }
    }

    for loader in through {
        stats += loader.run_through(ctx).await?;
        stats.loaders_run += 1;
    }

    Ok(stats)
}

/// Fetch the targets of a group of loaders and index them by key
async fn fetch_group(
    ctx: &PreloadContext,
    key: &GroupingKey,
    group: &[&mut Loader],
    stats: &mut PreloadStats,
) -> ModelResult<RecordIndex> {
    let mut index = RecordIndex::new();
    let Some(plan) = group.first().and_then(|loader| loader.direct_plan()) else {
        return Ok(index);
    };

    let mut query: Option<BatchQuery> = None;
    let mut seen = HashSet::new();
    for loader in group {
        let Some(loader_query) = loader.batch_query() else {
            continue;
        };
        let merged = query.get_or_insert_with(|| BatchQuery {
            keys: Vec::new(),
            ..loader_query.clone()
        });
        for key in loader_query.keys {
            if seen.insert(canonical(&key)) {
                merged.keys.push(key);
            }
        }
    }
    let Some(query) = query else {
        return Ok(index);
    };

    let chunk_size = ctx
        .config
        .max_batch_size
        .unwrap_or(query.keys.len())
        .max(1);
    let mut rows = Vec::new();
    for chunk in query.keys.chunks(chunk_size) {
        let mut chunk_query = BatchQuery {
            keys: chunk.to_vec(),
            ..query.clone()
        };
        chunk_query.statement = Some(plan.target.batch_statement(&chunk_query)?);
        debug!(
            model = %key.model,
            key_column = %key.key_column,
            keys = chunk.len(),
            "preloading batch"
        );
        rows.extend(ctx.executor.load_records(&chunk_query).await?);
        stats.queries += 1;
    }

    let builder = plan.target.attributes_builder();
    let primary_key = plan.target.primary_key().columns();
    let mut by_primary_key: HashMap<String, RecordRef> = HashMap::new();
    for row in rows {
        let record = Record::from_attribute_set(builder.build_from_database(&row)?);
        let join_value = plan.key_type.cast(&record.attribute(&plan.target_key))?;

        let record = if primary_key.is_empty() {
            record.into_ref()
        } else {
            let identity = primary_key
                .iter()
                .map(|column| canonical(&record.attribute(column)))
                .collect::<Vec<_>>()
                .join("|");
            by_primary_key
                .entry(identity)
                .or_insert_with(|| record.into_ref())
                .clone()
        };

        if !join_value.is_null() {
            index.entry(canonical(&join_value)).or_default().push(record);
        }
    }

    Ok(index)
}
