// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Structural mutations spanning the stores and the projection.
//!
//! Every operation validates, resolves the target name, changes the
//! backing store, and only then changes the projection. A failure before
//! the store change leaves both untouched.

use arrow_array::ArrayRef;
use arrow_schema::SchemaRef;
use diagnostics::{log_debug, log_info};
use hstore::{NodeDescriptor, Store, copy_node, path};
use std::sync::Arc;

use crate::collision::{CollisionContext, CollisionResolver, Resolved, resolve_name};
use crate::error::{GroveError, Result};
use crate::registry::{StoreId, StoreRegistry};
use crate::staging;
use crate::tree::{TreeNodeId, TreeProjection};

/// Called before a node that may be on display is removed or overwritten,
/// so whatever shows it can let go first.
pub trait ViewerHook: Send {
    fn before_remove(&mut self, store: StoreId, path: &str);
}

/// Hook for sessions without viewers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoViewers;

impl ViewerHook for NoViewers {
    fn before_remove(&mut self, _: StoreId, _: &str) {}
}

/// Pending paste source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clipboard {
    /// Copy mark; can be pasted any number of times.
    Copied { store: StoreId, path: String },
    /// Node parked in the cut slot of the scratch store; consumed by paste.
    Cut { name: String, origin: String },
}

/// What a create call makes.
enum NewNode {
    Group,
    Table(SchemaRef),
    Array(ArrayRef),
}

impl NewNode {
    fn operation(&self) -> &'static str {
        match self {
            NewNode::Group => "create group",
            NewNode::Table(_) => "create table",
            NewNode::Array(_) => "create array",
        }
    }
}

pub struct MutationEngine {
    clipboard: Option<Clipboard>,
    hook: Box<dyn ViewerHook>,
}

impl Default for MutationEngine {
    fn default() -> Self {
        Self::new(Box::new(NoViewers))
    }
}

impl std::fmt::Debug for MutationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationEngine")
            .field("clipboard", &self.clipboard)
            .finish_non_exhaustive()
    }
}

/// Store and path behind a projected node.
fn locate(tree: &TreeProjection, id: TreeNodeId) -> Result<(StoreId, String)> {
    let node = tree.node(id)?;
    Ok((node.store(), node.path().to_string()))
}

fn not_root(tree: &TreeProjection, id: TreeNodeId, operation: &'static str) -> Result<()> {
    let node = tree.node(id)?;
    if node.parent().is_none() {
        return Err(GroveError::invalid_target(
            operation,
            node.path(),
            "the root of a store cannot be changed",
        ));
    }
    Ok(())
}

fn writable(
    registry: &StoreRegistry,
    store: StoreId,
    operation: &'static str,
    at: &str,
) -> Result<Arc<dyn Store>> {
    let handle = registry.get(store)?;
    if !handle.mode().is_writable() {
        return Err(GroveError::read_only(operation, at));
    }
    Ok(handle.clone())
}

async fn existing(store: &dyn Store, at: &str) -> Result<NodeDescriptor> {
    store
        .get_node(at)
        .await?
        .ok_or_else(|| GroveError::NoSuchNode {
            store: store.path().to_path_buf(),
            path: at.to_string(),
        })
}

async fn group_target(store: &dyn Store, at: &str, operation: &'static str) -> Result<()> {
    if !existing(store, at).await?.kind.is_group() {
        return Err(GroveError::invalid_target(operation, at, "not a group"));
    }
    Ok(())
}

async fn sibling_names(store: &dyn Store, parent: &str) -> Result<Vec<String>> {
    Ok(store
        .list_children(parent)
        .await?
        .into_iter()
        .map(|c| c.name)
        .collect())
}

async fn resolve(
    store: &dyn Store,
    parent: &str,
    candidate: &str,
    current: Option<&str>,
    operation: &'static str,
    resolver: &mut dyn CollisionResolver,
) -> Result<Resolved> {
    let siblings = sibling_names(store, parent).await?;
    resolve_name(
        candidate,
        &siblings,
        current,
        resolver,
        &CollisionContext { operation, parent },
    )
}

impl MutationEngine {
    #[must_use]
    pub fn new(hook: Box<dyn ViewerHook>) -> Self {
        Self {
            clipboard: None,
            hook,
        }
    }

    #[must_use]
    pub fn clipboard(&self) -> Option<&Clipboard> {
        self.clipboard.as_ref()
    }

    /// The hook, for collaborators that replace nodes on their own.
    pub fn hook_mut(&mut self) -> &mut dyn ViewerHook {
        self.hook.as_mut()
    }

    /// Remove the sibling an overwrite replaces, in the store and the view.
    ///
    /// `source` is the node about to take its place; replacing the source
    /// itself or one of its ancestors is refused.
    async fn remove_overwritten(
        &mut self,
        tree: &mut TreeProjection,
        store_id: StoreId,
        store: &dyn Store,
        victim: &str,
        source: Option<(StoreId, &str)>,
        operation: &'static str,
    ) -> Result<()> {
        if let Some((src_store, src_path)) = source {
            if src_store == store_id && path::is_within(src_path, victim) {
                return Err(GroveError::invalid_target(
                    operation,
                    victim,
                    "overwriting it would remove the node being placed",
                ));
            }
        }
        self.hook.before_remove(store_id, victim);
        store.remove_node(victim, true).await?;
        if let Some(id) = tree.find(store_id, victim) {
            tree.remove_subtree(id)?;
        }
        log_debug!("overwrote {victim}", victim: victim);
        Ok(())
    }

    pub async fn create_group(
        &mut self,
        registry: &StoreRegistry,
        tree: &mut TreeProjection,
        parent: TreeNodeId,
        name: &str,
        resolver: &mut dyn CollisionResolver,
    ) -> Result<TreeNodeId> {
        self.create(registry, tree, parent, name, NewNode::Group, resolver)
            .await
    }

    pub async fn create_table(
        &mut self,
        registry: &StoreRegistry,
        tree: &mut TreeProjection,
        parent: TreeNodeId,
        name: &str,
        schema: SchemaRef,
        resolver: &mut dyn CollisionResolver,
    ) -> Result<TreeNodeId> {
        self.create(registry, tree, parent, name, NewNode::Table(schema), resolver)
            .await
    }

    pub async fn create_array(
        &mut self,
        registry: &StoreRegistry,
        tree: &mut TreeProjection,
        parent: TreeNodeId,
        name: &str,
        values: ArrayRef,
        resolver: &mut dyn CollisionResolver,
    ) -> Result<TreeNodeId> {
        self.create(registry, tree, parent, name, NewNode::Array(values), resolver)
            .await
    }

    async fn create(
        &mut self,
        registry: &StoreRegistry,
        tree: &mut TreeProjection,
        parent: TreeNodeId,
        name: &str,
        new: NewNode,
        resolver: &mut dyn CollisionResolver,
    ) -> Result<TreeNodeId> {
        let operation = new.operation();
        let (store_id, parent_path) = locate(tree, parent)?;
        let store = writable(registry, store_id, operation, &parent_path)?;
        group_target(store.as_ref(), &parent_path, operation).await?;

        let resolved = resolve(
            store.as_ref(),
            &parent_path,
            name,
            None,
            operation,
            resolver,
        )
        .await?;
        let target = path::join(&parent_path, &resolved.name);
        if resolved.overwrite {
            self.remove_overwritten(tree, store_id, store.as_ref(), &target, None, operation)
                .await?;
        }

        let kind = match new {
            NewNode::Group => {
                store.create_group(&parent_path, &resolved.name).await?;
                hstore::NodeKind::Group
            }
            NewNode::Table(schema) => {
                store.create_table(&parent_path, &resolved.name, schema).await?;
                hstore::NodeKind::Table
            }
            NewNode::Array(values) => {
                store.create_array(&parent_path, &resolved.name, values).await?;
                hstore::NodeKind::Array
            }
        };
        store.flush().await?;

        let id = tree.attach_child(parent, &resolved.name, kind)?;
        log_info!("{op} {target}", op: operation, target: target.as_str());
        Ok(id)
    }

    /// Mark a node as the paste source.
    pub fn copy(&mut self, tree: &TreeProjection, node: TreeNodeId) -> Result<()> {
        not_root(tree, node, "copy")?;
        let (store, at) = locate(tree, node)?;
        log_debug!("copy mark on {path}", path: at.as_str());
        self.clipboard = Some(Clipboard::Copied { store, path: at });
        Ok(())
    }

    /// Park a node in the cut slot of the scratch store and drop it from
    /// the view.
    ///
    /// Whatever the slot held before is destroyed.
    pub async fn cut(
        &mut self,
        registry: &StoreRegistry,
        tree: &mut TreeProjection,
        node: TreeNodeId,
    ) -> Result<()> {
        not_root(tree, node, "cut")?;
        let (store_id, at) = locate(tree, node)?;
        let store = writable(registry, store_id, "cut", &at)?;
        let descriptor = existing(store.as_ref(), &at).await?;
        let scratch = registry.scratch().clone();

        for evicted in staging::evict_cut(scratch.as_ref()).await? {
            log_debug!("cut slot evicted {name}", name: evicted.as_str());
        }
        self.hook.before_remove(store_id, &at);
        if registry.is_scratch(store_id) {
            store
                .move_node(&at, staging::CUT_GROUP, &descriptor.name, false)
                .await?;
        } else {
            copy_node(
                store.as_ref(),
                &at,
                scratch.as_ref(),
                staging::CUT_GROUP,
                &descriptor.name,
                false,
                true,
            )
            .await?;
            store.remove_node(&at, true).await?;
            store.flush().await?;
        }
        scratch.flush().await?;

        tree.remove_subtree(node)?;
        self.clipboard = Some(Clipboard::Cut {
            name: descriptor.name,
            origin: at.clone(),
        });
        log_info!("cut {path}", path: at.as_str());
        Ok(())
    }

    /// Paste the clipboard under `target`, as `name` or under the source's
    /// own name.
    pub async fn paste(
        &mut self,
        registry: &StoreRegistry,
        tree: &mut TreeProjection,
        target: TreeNodeId,
        name: Option<&str>,
        resolver: &mut dyn CollisionResolver,
    ) -> Result<TreeNodeId> {
        let clipboard = self.clipboard.clone().ok_or(GroveError::NothingToPaste)?;
        let (dst_id, parent_path) = locate(tree, target)?;
        let dst = writable(registry, dst_id, "paste", &parent_path)?;
        group_target(dst.as_ref(), &parent_path, "paste").await?;

        let (src_id, src_path) = match &clipboard {
            Clipboard::Copied { store, path } => (*store, path.clone()),
            Clipboard::Cut { name, .. } => (registry.scratch_id(), staging::cut_path(name)),
        };
        let src = registry.get(src_id)?.clone();
        let descriptor = existing(src.as_ref(), &src_path).await?;
        if src_id == dst_id && path::is_within(&parent_path, &src_path) {
            return Err(GroveError::invalid_target(
                "paste",
                parent_path,
                "cannot paste a node into itself",
            ));
        }

        let candidate = name.unwrap_or(descriptor.name.as_str());
        let resolved =
            resolve(dst.as_ref(), &parent_path, candidate, None, "paste", resolver).await?;
        if resolved.overwrite {
            let victim = path::join(&parent_path, &resolved.name);
            self.remove_overwritten(
                tree,
                dst_id,
                dst.as_ref(),
                &victim,
                Some((src_id, &src_path)),
                "paste",
            )
            .await?;
        }

        match &clipboard {
            Clipboard::Cut { .. } if src_id == dst_id => {
                src.move_node(&src_path, &parent_path, &resolved.name, false)
                    .await?;
            }
            Clipboard::Cut { .. } => {
                copy_node(
                    src.as_ref(),
                    &src_path,
                    dst.as_ref(),
                    &parent_path,
                    &resolved.name,
                    false,
                    true,
                )
                .await?;
                src.remove_node(&src_path, true).await?;
                src.flush().await?;
            }
            Clipboard::Copied { .. } => {
                copy_node(
                    src.as_ref(),
                    &src_path,
                    dst.as_ref(),
                    &parent_path,
                    &resolved.name,
                    false,
                    true,
                )
                .await?;
            }
        }
        dst.flush().await?;
        if matches!(clipboard, Clipboard::Cut { .. }) {
            self.clipboard = None;
        }

        tree.materialize_children(target, dst.as_ref()).await?;
        let pasted = match tree.child_named(target, &resolved.name) {
            Some(id) => id,
            None => tree.attach_child(target, &resolved.name, descriptor.kind)?,
        };
        log_info!(
            "pasted {src} to {dst}",
            src: src_path.as_str(),
            dst: path::join(&parent_path, &resolved.name)
        );
        Ok(pasted)
    }

    /// Rename in place. Renaming a node to its current name does nothing.
    pub async fn rename(
        &mut self,
        registry: &StoreRegistry,
        tree: &mut TreeProjection,
        node: TreeNodeId,
        new_name: &str,
        resolver: &mut dyn CollisionResolver,
    ) -> Result<TreeNodeId> {
        not_root(tree, node, "rename")?;
        let (store_id, at) = locate(tree, node)?;
        let store = writable(registry, store_id, "rename", &at)?;
        let descriptor = existing(store.as_ref(), &at).await?;
        let parent_path = path::dirname(&at).unwrap_or(path::ROOT).to_string();

        let resolved = resolve(
            store.as_ref(),
            &parent_path,
            new_name,
            Some(&descriptor.name),
            "rename",
            resolver,
        )
        .await?;
        if resolved.name == descriptor.name {
            return Ok(node);
        }
        if resolved.overwrite {
            let victim = path::join(&parent_path, &resolved.name);
            self.remove_overwritten(
                tree,
                store_id,
                store.as_ref(),
                &victim,
                Some((store_id, &at)),
                "rename",
            )
            .await?;
        }

        store
            .move_node(&at, &parent_path, &resolved.name, false)
            .await?;
        store.flush().await?;
        tree.rename(node, &resolved.name)?;
        log_info!("renamed {from} to {to}", from: at.as_str(), to: resolved.name.as_str());
        Ok(node)
    }

    /// Remove a node and everything below it.
    pub async fn delete(
        &mut self,
        registry: &StoreRegistry,
        tree: &mut TreeProjection,
        node: TreeNodeId,
    ) -> Result<()> {
        not_root(tree, node, "delete")?;
        let (store_id, at) = locate(tree, node)?;
        let store = writable(registry, store_id, "delete", &at)?;
        existing(store.as_ref(), &at).await?;

        self.hook.before_remove(store_id, &at);
        store.remove_node(&at, true).await?;
        store.flush().await?;
        tree.remove_subtree(node)?;
        log_info!("deleted {path}", path: at.as_str());
        Ok(())
    }

    /// Cut and paste in one step, within a store or across stores.
    pub async fn move_node(
        &mut self,
        registry: &StoreRegistry,
        tree: &mut TreeProjection,
        node: TreeNodeId,
        target: TreeNodeId,
        name: Option<&str>,
        resolver: &mut dyn CollisionResolver,
    ) -> Result<TreeNodeId> {
        not_root(tree, node, "move")?;
        let (src_id, src_path) = locate(tree, node)?;
        let (dst_id, parent_path) = locate(tree, target)?;
        let src = writable(registry, src_id, "move", &src_path)?;
        let dst = writable(registry, dst_id, "move", &parent_path)?;
        let descriptor = existing(src.as_ref(), &src_path).await?;
        group_target(dst.as_ref(), &parent_path, "move").await?;

        let same_store = src_id == dst_id;
        if same_store && path::is_within(&parent_path, &src_path) {
            return Err(GroveError::invalid_target(
                "move",
                src_path,
                "cannot move a node into its own subtree",
            ));
        }
        let in_place = same_store && path::dirname(&src_path) == Some(parent_path.as_str());
        let current = in_place.then_some(descriptor.name.as_str());
        let candidate = name.unwrap_or(descriptor.name.as_str());
        let resolved =
            resolve(dst.as_ref(), &parent_path, candidate, current, "move", resolver).await?;
        if in_place && resolved.name == descriptor.name {
            return Ok(node);
        }
        if resolved.overwrite {
            let victim = path::join(&parent_path, &resolved.name);
            self.remove_overwritten(
                tree,
                dst_id,
                dst.as_ref(),
                &victim,
                Some((src_id, &src_path)),
                "move",
            )
            .await?;
        }

        if same_store {
            src.move_node(&src_path, &parent_path, &resolved.name, false)
                .await?;
        } else {
            self.hook.before_remove(src_id, &src_path);
            copy_node(
                src.as_ref(),
                &src_path,
                dst.as_ref(),
                &parent_path,
                &resolved.name,
                false,
                true,
            )
            .await?;
            src.remove_node(&src_path, true).await?;
            src.flush().await?;
        }
        dst.flush().await?;

        tree.reparent(node, target, &resolved.name)?;
        log_info!(
            "moved {from} to {to}",
            from: src_path.as_str(),
            to: path::join(&parent_path, &resolved.name)
        );
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::{CancelOnCollision, OverwriteOnCollision, Resolution, Scripted};
    use crate::config::GroveConfig;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        registry: StoreRegistry,
        tree: TreeProjection,
        store: StoreId,
        root: TreeNodeId,
    }

    /// Store with `/g1/t1` and `/g2`, root materialised.
    async fn fixture() -> Fixture {
        let dir = TempDir::new().expect("tempdir");
        let mut registry = StoreRegistry::new(&GroveConfig::default()).await.expect("registry");
        let store = registry.create(dir.path().join("s.grove")).await.expect("create");
        let handle = registry.get(store).expect("handle").clone();
        handle.create_group("/", "g1").await.expect("g1");
        handle.create_group("/g1", "t1").await.expect("t1");
        handle.create_group("/", "g2").await.expect("g2");

        let mut tree = TreeProjection::new();
        let root = tree.open_root(store, "s.grove");
        tree.materialize_children(root, handle.as_ref()).await.expect("mat");
        Fixture {
            _dir: dir,
            registry,
            tree,
            store,
            root,
        }
    }

    impl Fixture {
        fn handle(&self) -> Arc<dyn Store> {
            self.registry.get(self.store).expect("handle").clone()
        }

        fn at(&self, p: &str) -> TreeNodeId {
            self.tree.find(self.store, p).expect("materialised")
        }

        async fn exists(&self, p: &str) -> bool {
            self.handle().get_node(p).await.expect("get").is_some()
        }
    }

    #[derive(Clone, Default)]
    struct Seen(Arc<Mutex<Vec<String>>>);

    impl ViewerHook for Seen {
        fn before_remove(&mut self, _: StoreId, path: &str) {
            if let Ok(mut seen) = self.0.lock() {
                seen.push(path.to_string());
            }
        }
    }

    #[tokio::test]
    async fn test_create_group_overwrite_replaces_subtree() {
        let mut fx = fixture().await;
        let seen = Seen::default();
        let mut engine = MutationEngine::new(Box::new(seen.clone()));
        let mut resolver = Scripted::new([Resolution::Overwrite]);

        let g1 = engine
            .create_group(&fx.registry, &mut fx.tree, fx.root, "g1", &mut resolver)
            .await
            .expect("create");
        assert!(fx.exists("/g1").await);
        assert!(!fx.exists("/g1/t1").await);
        assert!(fx.tree.children(g1).expect("children").is_empty());
        assert_eq!(fx.tree.find(fx.store, "/g1"), Some(g1));
        assert_eq!(seen.0.lock().expect("seen").as_slice(), ["/g1"]);
    }

    #[tokio::test]
    async fn test_cancel_leaves_everything_unchanged() {
        let mut fx = fixture().await;
        let mut engine = MutationEngine::default();
        let g1 = fx.at("/g1");
        let err = engine
            .create_group(&fx.registry, &mut fx.tree, fx.root, "g1", &mut CancelOnCollision)
            .await
            .expect_err("cancelled");
        assert!(matches!(err, GroveError::NameCollisionAbandoned { .. }));
        assert!(fx.exists("/g1/t1").await);
        assert_eq!(fx.tree.find(fx.store, "/g1"), Some(g1));
    }

    #[tokio::test]
    async fn test_copy_paste_is_repeatable() {
        let mut fx = fixture().await;
        let mut engine = MutationEngine::default();
        let g1 = fx.at("/g1");
        let g2 = fx.at("/g2");
        engine.copy(&fx.tree, g1).expect("copy");

        let first = engine
            .paste(&fx.registry, &mut fx.tree, g2, None, &mut CancelOnCollision)
            .await
            .expect("paste");
        assert_eq!(fx.tree.node(first).expect("node").path(), "/g2/g1");
        assert!(fx.exists("/g2/g1/t1").await);
        assert!(fx.exists("/g1/t1").await);

        let second = engine
            .paste(&fx.registry, &mut fx.tree, g2, Some("again"), &mut CancelOnCollision)
            .await
            .expect("paste again");
        assert_eq!(fx.tree.node(second).expect("node").path(), "/g2/again");
    }

    #[tokio::test]
    async fn test_paste_into_own_subtree_rejected() {
        let mut fx = fixture().await;
        let mut engine = MutationEngine::default();
        let g1 = fx.at("/g1");
        fx.tree.materialize_children(g1, fx.handle().as_ref()).await.expect("mat");
        let t1 = fx.at("/g1/t1");
        engine.copy(&fx.tree, g1).expect("copy");
        assert!(matches!(
            engine
                .paste(&fx.registry, &mut fx.tree, t1, None, &mut CancelOnCollision)
                .await,
            Err(GroveError::InvalidTarget { .. })
        ));
    }

    #[tokio::test]
    async fn test_cut_evicts_previous_and_paste_consumes() {
        let mut fx = fixture().await;
        let handle = fx.handle();
        handle.create_group("/g1", "leafA").await.expect("a");
        handle.create_group("/g1", "leafB").await.expect("b");
        let g1 = fx.at("/g1");
        fx.tree.materialize_children(g1, handle.as_ref()).await.expect("mat");

        let mut engine = MutationEngine::default();
        let a = fx.at("/g1/leafA");
        let b = fx.at("/g1/leafB");
        engine.cut(&fx.registry, &mut fx.tree, a).await.expect("cut a");
        assert!(fx.tree.find(fx.store, "/g1/leafA").is_none());
        engine.cut(&fx.registry, &mut fx.tree, b).await.expect("cut b");

        let scratch = fx.registry.scratch().clone();
        let staged: Vec<String> = scratch
            .list_children(staging::CUT_GROUP)
            .await
            .expect("list")
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(staged, vec!["leafB"]);

        let g2 = fx.at("/g2");
        engine
            .paste(&fx.registry, &mut fx.tree, g2, None, &mut CancelOnCollision)
            .await
            .expect("paste");
        assert!(fx.exists("/g2/leafB").await);
        assert!(!fx.exists("/g1/leafA").await);
        assert!(!fx.exists("/g1/leafB").await);
        assert!(staging::staged_cut(scratch.as_ref()).await.expect("slot").is_none());
        assert!(engine.clipboard().is_none());
        assert!(matches!(
            engine
                .paste(&fx.registry, &mut fx.tree, g2, None, &mut CancelOnCollision)
                .await,
            Err(GroveError::NothingToPaste)
        ));
    }

    #[tokio::test]
    async fn test_rename_to_current_name_is_noop() {
        let mut fx = fixture().await;
        let mut engine = MutationEngine::default();
        let g1 = fx.at("/g1");
        let same = engine
            .rename(&fx.registry, &mut fx.tree, g1, "g1", &mut CancelOnCollision)
            .await
            .expect("noop");
        assert_eq!(same, g1);
        assert!(fx.exists("/g1/t1").await);
    }

    #[tokio::test]
    async fn test_rename_overwrite_of_sibling() {
        let mut fx = fixture().await;
        let mut engine = MutationEngine::default();
        let g1 = fx.at("/g1");
        engine
            .rename(&fx.registry, &mut fx.tree, g1, "g2", &mut OverwriteOnCollision)
            .await
            .expect("rename");
        assert!(fx.exists("/g2/t1").await);
        assert!(!fx.exists("/g1").await);
        assert_eq!(fx.tree.children(fx.root).expect("children"), &[g1]);
    }

    #[tokio::test]
    async fn test_move_within_store() {
        let mut fx = fixture().await;
        let mut engine = MutationEngine::default();
        let g1 = fx.at("/g1");
        fx.tree.materialize_children(g1, fx.handle().as_ref()).await.expect("mat");
        let t1 = fx.at("/g1/t1");
        let g2 = fx.at("/g2");

        engine
            .move_node(&fx.registry, &mut fx.tree, g1, g2, None, &mut CancelOnCollision)
            .await
            .expect("move");
        assert!(fx.exists("/g2/g1/t1").await);
        assert!(!fx.exists("/g1").await);
        assert_eq!(fx.tree.node(t1).expect("t1").path(), "/g2/g1/t1");

        assert!(matches!(
            engine
                .move_node(&fx.registry, &mut fx.tree, g2, t1, None, &mut CancelOnCollision)
                .await,
            Err(GroveError::InvalidTarget { .. })
        ));
    }

    #[tokio::test]
    async fn test_overwrite_of_own_ancestor_rejected() {
        let mut fx = fixture().await;
        let handle = fx.handle();
        handle.create_group("/g1", "g1").await.expect("nested");
        let g1 = fx.at("/g1");
        fx.tree.materialize_children(g1, handle.as_ref()).await.expect("mat");
        let inner = fx.at("/g1/g1");

        let mut engine = MutationEngine::default();
        let err = engine
            .move_node(&fx.registry, &mut fx.tree, inner, fx.root, None, &mut OverwriteOnCollision)
            .await
            .expect_err("ancestor");
        assert!(matches!(err, GroveError::InvalidTarget { .. }));
        assert!(fx.exists("/g1/g1").await);
    }

    #[tokio::test]
    async fn test_delete_calls_hook_first() {
        let mut fx = fixture().await;
        let seen = Seen::default();
        let mut engine = MutationEngine::new(Box::new(seen.clone()));
        let g1 = fx.at("/g1");
        engine.delete(&fx.registry, &mut fx.tree, g1).await.expect("delete");
        assert!(!fx.exists("/g1").await);
        assert!(fx.tree.find(fx.store, "/g1").is_none());
        assert_eq!(seen.0.lock().expect("seen").as_slice(), ["/g1"]);
    }

    #[tokio::test]
    async fn test_root_is_immutable() {
        let mut fx = fixture().await;
        let mut engine = MutationEngine::default();
        let root = fx.root;
        assert!(matches!(
            engine.delete(&fx.registry, &mut fx.tree, root).await,
            Err(GroveError::InvalidTarget { .. })
        ));
    }

    #[tokio::test]
    async fn test_vanished_source_is_no_such_node() {
        let mut fx = fixture().await;
        let mut engine = MutationEngine::default();
        let g2 = fx.at("/g2");
        fx.handle().remove_node("/g2", true).await.expect("external removal");
        assert!(matches!(
            engine.delete(&fx.registry, &mut fx.tree, g2).await,
            Err(GroveError::NoSuchNode { .. })
        ));
    }
}
