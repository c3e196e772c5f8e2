// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Chunked table filtering with staged, atomically published results.
//!
//! A result is built under the hidden query group of the scratch store and
//! moved to the scratch root only once every chunk has been written. A
//! failed query leaves nothing visible behind.

use arrow::compute::filter_record_batch;
use arrow_array::{ArrayRef, BooleanArray, Int64Array, RecordBatch};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use diagnostics::{log_debug, log_info, log_warn};
use hstore::{NodeKind, Store, path};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use crate::collision::{CollisionContext, CollisionResolver, resolve_name};
use crate::error::{GroveError, Result};
use crate::mutation::ViewerHook;
use crate::predicate::Predicate;
use crate::registry::{StoreId, StoreRegistry};
use crate::staging;

pub const ATTR_SOURCE_STORE: &str = "query:source_store";
pub const ATTR_SOURCE_TABLE: &str = "query:source_table";
pub const ATTR_CONDITION: &str = "query:condition";
pub const ATTR_RANGE: &str = "query:range";

/// One filter request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryDescriptor {
    pub condition: String,
    /// Alias used in the condition -> source column.
    pub variables: BTreeMap<String, String>,
    /// Result name; defaults to `<table>_filtered`.
    pub name: Option<String>,
    pub start: usize,
    /// Exclusive; `None` means the end of the table.
    pub stop: Option<usize>,
    pub step: usize,
    /// Add an Int64 column with each matched row's absolute offset. Through
    /// a `Workspace`, an empty name means the configured default.
    pub index_column: Option<String>,
}

impl QueryDescriptor {
    pub fn new<S: Into<String>>(condition: S) -> Self {
        Self {
            condition: condition.into(),
            variables: BTreeMap::new(),
            name: None,
            start: 0,
            stop: None,
            step: 1,
            index_column: None,
        }
    }

    #[must_use]
    pub fn bind<A: Into<String>, C: Into<String>>(mut self, alias: A, column: C) -> Self {
        self.variables.insert(alias.into(), column.into());
        self
    }

    #[must_use]
    pub fn named<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn range(mut self, start: usize, stop: Option<usize>) -> Self {
        self.start = start;
        self.stop = stop;
        self
    }

    #[must_use]
    pub fn step(mut self, step: usize) -> Self {
        self.step = step;
        self
    }

    #[must_use]
    pub fn with_index<S: Into<String>>(mut self, column: S) -> Self {
        self.index_column = Some(column.into());
        self
    }
}

/// A published result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOutcome {
    pub name: String,
    /// Path of the result at the scratch root.
    pub path: String,
    pub rows: usize,
    /// An existing node of the same name was overwritten.
    pub replaced: bool,
}

type TrackedKey = (StoreId, String);

/// Holds a table's tracking entry and gives it back when dropped, however
/// the query ends.
struct Tracked<'a> {
    set: &'a Mutex<HashSet<TrackedKey>>,
    key: TrackedKey,
}

impl Drop for Tracked<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

#[derive(Debug)]
pub struct QueryExecutor {
    tracked: Mutex<HashSet<TrackedKey>>,
    chunk_size: usize,
}

/// Validated shape of a run.
struct Plan {
    start: usize,
    stop: usize,
    step: usize,
    result_schema: SchemaRef,
    index: bool,
}

impl QueryExecutor {
    #[must_use]
    pub fn new(chunk_size: usize) -> Self {
        Self {
            tracked: Mutex::new(HashSet::new()),
            chunk_size: chunk_size.max(1),
        }
    }

    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// True while a query on this table is running.
    #[must_use]
    pub fn is_tracked(&self, store: StoreId, table: &str) -> bool {
        self.tracked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(store, table.to_string()))
    }

    fn track(&self, key: TrackedKey, label: String) -> Result<Tracked<'_>> {
        let mut set = self.tracked.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(key.clone()) {
            return Err(GroveError::QueryAlreadyRunning(label));
        }
        Ok(Tracked {
            set: &self.tracked,
            key,
        })
    }

    /// Filter `table` of `store` into a new table at the scratch root.
    ///
    /// The result name goes through the collision protocol against the
    /// visible scratch root before any row is read. `hook` hears about a
    /// result that is about to be overwritten.
    pub async fn run(
        &self,
        registry: &StoreRegistry,
        store: StoreId,
        table: &str,
        query: &QueryDescriptor,
        resolver: &mut dyn CollisionResolver,
        hook: &mut dyn ViewerHook,
    ) -> Result<QueryOutcome> {
        let source = registry.get(store)?.clone();
        let scratch = registry.scratch().clone();
        let descriptor = source
            .get_node(table)
            .await?
            .ok_or_else(|| GroveError::NoSuchNode {
                store: source.path().to_path_buf(),
                path: table.to_string(),
            })?;
        if descriptor.kind != NodeKind::Table {
            return Err(GroveError::NotATable(table.to_string()));
        }
        let schema = source.schema(table).await?;
        let plan = plan(query, &schema, source.num_rows(table).await?)?;

        let label = format!("{}:{table}", source.path().display());
        let _tracked = self.track((store, table.to_string()), label)?;

        let predicate = Predicate::compile(&query.condition, &schema, &query.variables)?;

        let candidate = query
            .name
            .clone()
            .unwrap_or_else(|| format!("{}_filtered", descriptor.name));
        let siblings: Vec<String> = scratch
            .list_children(path::ROOT)
            .await?
            .into_iter()
            .map(|c| c.name)
            .collect();
        let resolved = resolve_name(
            &candidate,
            &siblings,
            None,
            resolver,
            &CollisionContext {
                operation: "query",
                parent: path::ROOT,
            },
        )?;

        let run_id = uuid7::uuid7().to_string();
        let staged = staging::query_path(&run_id);
        let write_err = |source: hstore::Error| GroveError::StoreWrite {
            target: resolved.name.clone(),
            source,
        };
        let staged_name = path::basename(&staged).unwrap_or_default();
        scratch
            .create_table(staging::QUERY_GROUP, staged_name, plan.result_schema.clone())
            .await
            .map_err(write_err)?;

        let filled = self
            .fill(source.as_ref(), table, scratch.as_ref(), &staged, &predicate, &plan)
            .await;
        let rows = match filled {
            Ok(rows) => rows,
            Err(e) => {
                log_warn!(
                    "query on {table} failed, discarding staged result: {error}",
                    table: table,
                    error: e.to_string()
                );
                discard(scratch.as_ref(), &staged).await;
                return Err(e);
            }
        };

        let provenance = [
            (ATTR_SOURCE_STORE, source.path().display().to_string()),
            (ATTR_SOURCE_TABLE, table.to_string()),
            (ATTR_CONDITION, query.condition.clone()),
            (ATTR_RANGE, format!("{}:{}:{}", plan.start, plan.stop, plan.step)),
        ];
        let target = path::join(path::ROOT, &resolved.name);
        let mut publish = Publish {
            scratch: scratch.as_ref(),
            staged: &staged,
            target: &target,
            replaced: None,
            moved: false,
        };
        let published = async {
            for (key, value) in &provenance {
                scratch.set_attribute(&staged, key, value).await?;
            }
            if resolved.overwrite && scratch.get_node(&target).await?.is_some() {
                hook.before_remove(registry.scratch_id(), &target);
                // Parked until the result is on disk.
                let parked = staging::query_path(&format!("{run_id}_replaced"));
                let parked_name = path::basename(&parked).unwrap_or_default();
                scratch
                    .move_node(&target, staging::QUERY_GROUP, parked_name, false)
                    .await?;
                publish.replaced = Some(parked);
            }
            scratch
                .move_node(&staged, path::ROOT, &resolved.name, false)
                .await?;
            publish.moved = true;
            scratch.flush().await
        }
        .await;
        if let Err(e) = published {
            log_warn!(
                "publishing {target} failed, restoring the scratch store: {error}",
                target: target.as_str(),
                error: e.to_string()
            );
            publish.roll_back().await;
            return Err(write_err(e));
        }
        if let Some(parked) = &publish.replaced {
            discard(scratch.as_ref(), parked).await;
        }

        log_info!(
            "query on {table} published {rows} rows as {target}",
            table: table,
            rows: rows,
            target: target.as_str()
        );
        Ok(QueryOutcome {
            name: resolved.name,
            path: target,
            rows,
            replaced: resolved.overwrite,
        })
    }

    /// Evaluate every chunk of the range and append the matches to `staged`.
    async fn fill(
        &self,
        source: &dyn Store,
        table: &str,
        scratch: &dyn Store,
        staged: &str,
        predicate: &Predicate,
        plan: &Plan,
    ) -> Result<usize> {
        let mut written = 0;
        let mut first = plan.start;
        while first < plan.stop {
            let last = (first + self.chunk_size).min(plan.stop);
            let chunk = source.read_rows(table, first, last).await?;
            let mask = predicate.evaluate(&chunk, first)?;

            let keep: BooleanArray = (0..chunk.num_rows())
                .map(|i| Some(mask.value(i) && (first + i - plan.start) % plan.step == 0))
                .collect();
            let matched = filter_record_batch(&chunk, &keep).map_err(|e| {
                GroveError::PredicateEvaluation {
                    condition: predicate.condition().to_string(),
                    start: first,
                    stop: last,
                    message: e.to_string(),
                }
            })?;

            let mut columns = matched.columns().to_vec();
            if plan.index {
                let offsets: Int64Array = (0..chunk.num_rows())
                    .filter(|i| keep.value(*i))
                    .map(|i| (first + i) as i64)
                    .collect();
                columns.push(Arc::new(offsets) as ArrayRef);
            }
            let rows = RecordBatch::try_new(plan.result_schema.clone(), columns)
                .map_err(|e| GroveError::StoreWrite {
                    target: staged.to_string(),
                    source: e.into(),
                })?;

            let write_err = |source| GroveError::StoreWrite {
                target: staged.to_string(),
                source,
            };
            scratch.append_rows(staged, &rows).await.map_err(write_err)?;
            scratch.flush().await.map_err(write_err)?;
            written += rows.num_rows();
            log_debug!(
                "rows {first}..{last} of {table}: {matched} matched",
                first: first,
                last: last,
                table: table,
                matched: rows.num_rows()
            );

            first = last;
            tokio::task::yield_now().await;
        }
        Ok(written)
    }
}

fn plan(query: &QueryDescriptor, schema: &SchemaRef, total: usize) -> Result<Plan> {
    if query.step == 0 {
        return Err(GroveError::InvalidQuery("step must be at least 1".into()));
    }
    let stop = query.stop.unwrap_or(total).min(total);
    if query.start > stop {
        return Err(GroveError::InvalidQuery(format!(
            "start {} is past stop {stop}",
            query.start
        )));
    }

    let mut fields: Vec<Field> = schema.fields().iter().map(|f| f.as_ref().clone()).collect();
    if let Some(column) = &query.index_column {
        if column.is_empty() || schema.index_of(column).is_ok() {
            return Err(GroveError::InvalidQuery(format!(
                "index column {column:?} clashes with the table"
            )));
        }
        fields.push(Field::new(column, DataType::Int64, false));
    }
    Ok(Plan {
        start: query.start,
        stop,
        step: query.step,
        result_schema: Arc::new(Schema::new(fields)),
        index: query.index_column.is_some(),
    })
}

/// Publish step of a run, as far as it got.
struct Publish<'a> {
    scratch: &'a dyn Store,
    staged: &'a str,
    target: &'a str,
    /// Where an overwritten result was parked.
    replaced: Option<String>,
    moved: bool,
}

impl Publish<'_> {
    /// Put the scratch store back the way it was before the run.
    async fn roll_back(&self) {
        let restored = async {
            let leftover = if self.moved { self.target } else { self.staged };
            self.scratch.remove_node(leftover, true).await?;
            if let Some(parked) = &self.replaced {
                let name = path::basename(self.target).unwrap_or_default();
                self.scratch.move_node(parked, path::ROOT, name, false).await?;
            }
            self.scratch.flush().await
        }
        .await;
        if let Err(e) = restored {
            log_warn!(
                "could not restore {target}: {error}",
                target: self.target,
                error: e.to_string()
            );
        }
    }
}

async fn discard(scratch: &dyn Store, staged: &str) {
    let removed = async {
        scratch.remove_node(staged, true).await?;
        scratch.flush().await
    }
    .await;
    if let Err(e) = removed {
        log_warn!(
            "could not discard staged result {staged}: {error}",
            staged: staged,
            error: e.to_string()
        );
    }
}
