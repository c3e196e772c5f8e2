// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! The session context handed to presentation layers.
//!
//! A `Workspace` owns the store registry, the projection, the mutation
//! engine and the query executor, and keeps the projection in step with
//! store-level changes made through it.

use arrow_array::ArrayRef;
use arrow_schema::SchemaRef;
use diagnostics::{log_info, log_warn};
use hstore::OpenMode;
use std::path::Path;
use std::sync::Arc;

use crate::collision::CollisionResolver;
use crate::config::GroveConfig;
use crate::error::{GroveError, Result};
use crate::mutation::{MutationEngine, NoViewers, ViewerHook};
use crate::query::{QueryDescriptor, QueryExecutor, QueryOutcome};
use crate::registry::{StoreId, StoreRegistry};
use crate::session::{self, SessionRecord};
use crate::tree::{TreeNodeId, TreeObserver, TreeProjection};

pub struct Workspace {
    config: GroveConfig,
    registry: StoreRegistry,
    tree: TreeProjection,
    mutations: MutationEngine,
    queries: QueryExecutor,
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("config", &self.config)
            .field("tree", &self.tree)
            .finish_non_exhaustive()
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

impl Workspace {
    /// Start a session: create the scratch store and show its root.
    pub async fn new(config: GroveConfig) -> Result<Self> {
        let registry = StoreRegistry::new(&config).await?;
        Ok(Self::with_parts(config, registry, Box::new(NoViewers)))
    }

    /// Assemble a session from an existing registry and viewer hook.
    #[must_use]
    pub fn with_parts(
        config: GroveConfig,
        registry: StoreRegistry,
        hook: Box<dyn ViewerHook>,
    ) -> Self {
        let mut tree = TreeProjection::new();
        tree.open_root(registry.scratch_id(), config.scratch_label.clone());
        let queries = QueryExecutor::new(config.chunk_size);
        Self {
            config,
            registry,
            tree,
            mutations: MutationEngine::new(hook),
            queries,
        }
    }

    #[must_use]
    pub fn config(&self) -> &GroveConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &StoreRegistry {
        &self.registry
    }

    #[must_use]
    pub fn tree(&self) -> &TreeProjection {
        &self.tree
    }

    #[must_use]
    pub fn mutations(&self) -> &MutationEngine {
        &self.mutations
    }

    #[must_use]
    pub fn queries(&self) -> &QueryExecutor {
        &self.queries
    }

    pub fn subscribe(&mut self, observer: Box<dyn TreeObserver>) {
        self.tree.subscribe(observer);
    }

    /// Root of the scratch store in the projection.
    pub fn scratch_root(&self) -> Result<TreeNodeId> {
        self.root(self.registry.scratch_id())
    }

    pub fn root(&self, store: StoreId) -> Result<TreeNodeId> {
        self.tree
            .root_of(store)
            .ok_or(GroveError::UnknownStore(store.as_u64()))
    }

    /// Open a container file and add its root to the projection.
    ///
    /// Check `registry().get(id)?.mode()` afterwards: an append request on
    /// an unwritable file is downgraded to read-only.
    pub async fn open<P: AsRef<Path>>(&mut self, path: P, mode: OpenMode) -> Result<StoreId> {
        let path = path.as_ref();
        let id = self.registry.open(path, mode).await?;
        self.tree.open_root(id, file_label(path));
        Ok(id)
    }

    /// Create a new empty container file and show it.
    pub async fn create<P: AsRef<Path>>(&mut self, path: P) -> Result<StoreId> {
        let path = path.as_ref();
        let id = self.registry.create(path).await?;
        self.tree.open_root(id, file_label(path));
        Ok(id)
    }

    /// Register an already open store (another engine, a wrapper) and
    /// show it.
    pub async fn attach(&mut self, handle: Arc<dyn hstore::Store>) -> Result<StoreId> {
        let label = file_label(handle.path());
        let id = self.registry.attach(handle).await?;
        self.tree.open_root(id, label);
        Ok(id)
    }

    /// Drop the store from the projection, then close it.
    pub async fn close(&mut self, store: StoreId) -> Result<()> {
        if self.registry.is_scratch(store) {
            // Let the registry produce its refusal.
            return self.registry.close(store).await;
        }
        self.tree.close_root(store)?;
        self.registry.close(store).await
    }

    /// Materialise the children of a group node.
    pub async fn expand(&mut self, node: TreeNodeId) -> Result<Vec<TreeNodeId>> {
        let store = self.registry.get(self.tree.node(node)?.store())?.clone();
        self.tree.materialize_children(node, store.as_ref()).await
    }

    /// Materialise the ancestors of `path` and return its node.
    pub async fn reveal(&mut self, store: StoreId, path: &str) -> Result<TreeNodeId> {
        let handle = self.registry.get(store)?.clone();
        self.tree.reveal(store, handle.as_ref(), path).await
    }

    pub async fn create_group(
        &mut self,
        parent: TreeNodeId,
        name: &str,
        resolver: &mut dyn CollisionResolver,
    ) -> Result<TreeNodeId> {
        self.mutations
            .create_group(&self.registry, &mut self.tree, parent, name, resolver)
            .await
    }

    pub async fn create_table(
        &mut self,
        parent: TreeNodeId,
        name: &str,
        schema: SchemaRef,
        resolver: &mut dyn CollisionResolver,
    ) -> Result<TreeNodeId> {
        self.mutations
            .create_table(&self.registry, &mut self.tree, parent, name, schema, resolver)
            .await
    }

    pub async fn create_array(
        &mut self,
        parent: TreeNodeId,
        name: &str,
        values: ArrayRef,
        resolver: &mut dyn CollisionResolver,
    ) -> Result<TreeNodeId> {
        self.mutations
            .create_array(&self.registry, &mut self.tree, parent, name, values, resolver)
            .await
    }

    pub fn copy(&mut self, node: TreeNodeId) -> Result<()> {
        self.mutations.copy(&self.tree, node)
    }

    pub async fn cut(&mut self, node: TreeNodeId) -> Result<()> {
        self.mutations.cut(&self.registry, &mut self.tree, node).await
    }

    pub async fn paste(
        &mut self,
        target: TreeNodeId,
        name: Option<&str>,
        resolver: &mut dyn CollisionResolver,
    ) -> Result<TreeNodeId> {
        self.mutations
            .paste(&self.registry, &mut self.tree, target, name, resolver)
            .await
    }

    pub async fn rename(
        &mut self,
        node: TreeNodeId,
        new_name: &str,
        resolver: &mut dyn CollisionResolver,
    ) -> Result<TreeNodeId> {
        self.mutations
            .rename(&self.registry, &mut self.tree, node, new_name, resolver)
            .await
    }

    pub async fn delete(&mut self, node: TreeNodeId) -> Result<()> {
        self.mutations
            .delete(&self.registry, &mut self.tree, node)
            .await
    }

    pub async fn move_node(
        &mut self,
        node: TreeNodeId,
        target: TreeNodeId,
        name: Option<&str>,
        resolver: &mut dyn CollisionResolver,
    ) -> Result<TreeNodeId> {
        self.mutations
            .move_node(&self.registry, &mut self.tree, node, target, name, resolver)
            .await
    }

    /// Run a query and show its published result under the scratch root.
    pub async fn query(
        &mut self,
        store: StoreId,
        table: &str,
        descriptor: &QueryDescriptor,
        resolver: &mut dyn CollisionResolver,
    ) -> Result<(QueryOutcome, TreeNodeId)> {
        let mut descriptor = descriptor.clone();
        if descriptor.index_column.as_deref() == Some("") {
            descriptor.index_column = Some(self.config.index_column.clone());
        }
        let outcome = self
            .queries
            .run(
                &self.registry,
                store,
                table,
                &descriptor,
                resolver,
                self.mutations.hook_mut(),
            )
            .await?;

        let scratch = self.registry.scratch_id();
        if outcome.replaced {
            if let Some(stale) = self.tree.find(scratch, &outcome.path) {
                self.tree.remove_subtree(stale)?;
            }
        }
        let root = self.scratch_root()?;
        let handle = self.registry.scratch().clone();
        self.tree.materialize_children(root, handle.as_ref()).await?;
        let node = self
            .tree
            .child_named(root, &outcome.name)
            .ok_or_else(|| GroveError::NoSuchNode {
                store: handle.path().to_path_buf(),
                path: outcome.path.clone(),
            })?;
        Ok((outcome, node))
    }

    /// Write a copy of a store to `path` and show the copy.
    pub async fn save_as<P: AsRef<Path>>(
        &mut self,
        store: StoreId,
        path: P,
        resolver: &mut dyn CollisionResolver,
    ) -> Result<StoreId> {
        let path = path.as_ref();
        let saved = self.registry.save_as(store, path, resolver).await?;
        let label = file_label(self.registry.get(saved)?.path());
        self.prune_closed_roots()?;
        self.tree.open_root(saved, label);
        Ok(saved)
    }

    /// Remove roots of stores the registry no longer holds.
    fn prune_closed_roots(&mut self) -> Result<()> {
        let stale: Vec<StoreId> = self
            .tree
            .roots()
            .iter()
            .filter_map(|r| self.tree.node(*r).ok().map(|n| n.store()))
            .filter(|s| self.registry.get(*s).is_err())
            .collect();
        for store in stale {
            self.tree.close_root(store)?;
        }
        Ok(())
    }

    /// Replay persisted records: open each store and reveal its nodes.
    ///
    /// Returns the revealed nodes. Stores or nodes that cannot be restored
    /// are logged and skipped.
    pub async fn restore_session(&mut self, records: &[SessionRecord]) -> Vec<TreeNodeId> {
        let mut revealed = Vec::new();
        for record in records {
            let store = match self.open(&record.path, record.mode).await {
                Ok(id) => id,
                Err(GroveError::AlreadyOpen(_)) => match self.registry.find(&record.path) {
                    Some(id) => id,
                    None => continue,
                },
                Err(e) => {
                    log_warn!(
                        "not restoring {path}: {error}",
                        path: record.path.display().to_string(),
                        error: e.to_string()
                    );
                    continue;
                }
            };
            for node in &record.nodes {
                match self.reveal(store, node).await {
                    Ok(id) => revealed.push(id),
                    Err(e) => {
                        log_warn!(
                            "not restoring {node}: {error}",
                            node: node.as_str(),
                            error: e.to_string()
                        );
                    }
                }
            }
        }
        log_info!("restored {count} nodes from session", count: revealed.len());
        revealed
    }

    /// Records for every open user store, with `open_nodes` listed under
    /// the store they belong to.
    #[must_use]
    pub fn session_records(&self, open_nodes: &[TreeNodeId]) -> Vec<SessionRecord> {
        self.registry
            .stores()
            .filter(|id| !self.registry.is_scratch(*id))
            .filter_map(|id| {
                let handle = self.registry.get(id).ok()?;
                let mut record = SessionRecord::new(handle.mode(), handle.path());
                record.nodes = open_nodes
                    .iter()
                    .filter_map(|n| self.tree.node(*n).ok())
                    .filter(|n| n.store() == id && n.parent().is_some())
                    .map(|n| n.path().to_string())
                    .collect();
                Some(record)
            })
            .collect()
    }

    /// Replay the configured session file, if any.
    pub async fn load_session(&mut self) -> Result<Vec<TreeNodeId>> {
        let Some(file) = self.config.session_file.clone() else {
            return Ok(Vec::new());
        };
        let records = session::load(&file).await?;
        Ok(self.restore_session(&records).await)
    }

    /// Write the configured session file, if any.
    pub async fn save_session(&self, open_nodes: &[TreeNodeId]) -> Result<()> {
        match &self.config.session_file {
            Some(file) => session::save(file, &self.session_records(open_nodes)).await,
            None => Ok(()),
        }
    }

    /// Flush and close every store and delete the scratch store.
    pub async fn shutdown(self) -> Result<()> {
        self.registry.shutdown().await
    }

    /// Direct access to a store handle, for reading leaves.
    pub fn store(&self, store: StoreId) -> Result<Arc<dyn hstore::Store>> {
        Ok(self.registry.get(store)?.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::CancelOnCollision;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_new_shows_labelled_scratch_root() {
        let ws = Workspace::new(GroveConfig::default()).await.expect("workspace");
        let root = ws.scratch_root().expect("root");
        assert_eq!(ws.tree().node(root).expect("node").label(), "Query results");
        assert_eq!(ws.tree().roots().len(), 1);
        ws.shutdown().await.expect("shutdown");
    }

    #[tokio::test]
    async fn test_open_close_keeps_tree_in_step() {
        let dir = TempDir::new().expect("tempdir");
        let mut ws = Workspace::new(GroveConfig::default()).await.expect("workspace");
        let id = ws.create(dir.path().join("a.grove")).await.expect("create");
        let root = ws.root(id).expect("root");
        assert_eq!(ws.tree().node(root).expect("node").label(), "a.grove");
        ws.create_group(root, "g", &mut CancelOnCollision).await.expect("group");

        ws.close(id).await.expect("close");
        assert!(ws.root(id).is_err());
        let scratch = ws.registry().scratch_id();
        assert!(ws.close(scratch).await.is_err());
    }

    #[tokio::test]
    async fn test_session_round_trip() {
        let dir = TempDir::new().expect("tempdir");
        let file = dir.path().join("s.grove");
        let session_file = dir.path().join("session.txt");
        let config = GroveConfig {
            session_file: Some(session_file.clone()),
            ..GroveConfig::default()
        };

        let mut ws = Workspace::new(config.clone()).await.expect("workspace");
        let id = ws.create(&file).await.expect("create");
        let root = ws.root(id).expect("root");
        let g = ws.create_group(root, "g", &mut CancelOnCollision).await.expect("g");
        let t = ws.create_group(g, "t", &mut CancelOnCollision).await.expect("t");
        ws.save_session(&[t]).await.expect("save");
        ws.shutdown().await.expect("shutdown");

        let mut ws = Workspace::new(config).await.expect("workspace");
        let revealed = ws.load_session().await.expect("load");
        assert_eq!(revealed.len(), 1);
        assert_eq!(ws.tree().node(revealed[0]).expect("node").path(), "/g/t");
        let records = ws.session_records(&revealed);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].mode, OpenMode::Append);
        assert_eq!(records[0].nodes, vec!["/g/t"]);
    }
}
