// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! In-memory projection of the open stores' hierarchies.
//!
//! Groups materialise their children only when asked. A group's
//! materialised children are always a subset of its true children.

use diagnostics::log_debug;
use hstore::{NodeKind, Store, path};
use std::collections::BTreeMap;

use crate::error::{GroveError, Result};
use crate::registry::StoreId;

/// Handle to a node of the projection. Ids are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreeNodeId(usize);

impl TreeNodeId {
    #[must_use]
    pub fn as_usize(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for TreeNodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Coarse shape of a projected node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeVariant {
    Root,
    Group,
    Leaf,
}

#[derive(Debug, Clone)]
pub struct TreeNode {
    id: TreeNodeId,
    kind: NodeKind,
    path: String,
    name: String,
    store: StoreId,
    parent: Option<TreeNodeId>,
    children: Vec<TreeNodeId>,
    label: Option<String>,
}

impl TreeNode {
    #[must_use]
    pub fn id(&self) -> TreeNodeId {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    #[must_use]
    pub fn variant(&self) -> NodeVariant {
        match self.kind {
            NodeKind::Root => NodeVariant::Root,
            NodeKind::Group => NodeVariant::Group,
            _ => NodeVariant::Leaf,
        }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last path segment; empty for roots.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Display label: the root's label, otherwise the name.
    #[must_use]
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }

    #[must_use]
    pub fn store(&self) -> StoreId {
        self.store
    }

    #[must_use]
    pub fn parent(&self) -> Option<TreeNodeId> {
        self.parent
    }

    #[must_use]
    pub fn children(&self) -> &[TreeNodeId] {
        &self.children
    }
}

/// Change notifications, delivered in the order changes are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeEvent {
    ChildAdded {
        parent: Option<TreeNodeId>,
        child: TreeNodeId,
    },
    ChildRemoved {
        parent: Option<TreeNodeId>,
        child: TreeNodeId,
        path: String,
    },
    NodeRenamed {
        node: TreeNodeId,
        old_path: String,
        new_path: String,
    },
}

/// Presentation layers subscribe to projection changes through this.
pub trait TreeObserver: Send {
    fn on_event(&mut self, event: &TreeEvent);
}

#[derive(Default)]
pub struct TreeProjection {
    nodes: BTreeMap<TreeNodeId, TreeNode>,
    roots: Vec<TreeNodeId>,
    next_id: usize,
    observers: Vec<Box<dyn TreeObserver>>,
}

impl std::fmt::Debug for TreeProjection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeProjection")
            .field("nodes", &self.nodes.len())
            .field("roots", &self.roots)
            .finish()
    }
}

impl TreeProjection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, observer: Box<dyn TreeObserver>) {
        self.observers.push(observer);
    }

    fn emit(&mut self, event: TreeEvent) {
        for observer in &mut self.observers {
            observer.on_event(&event);
        }
    }

    fn alloc(
        &mut self,
        kind: NodeKind,
        path: String,
        name: String,
        store: StoreId,
        parent: Option<TreeNodeId>,
    ) -> TreeNodeId {
        let id = TreeNodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(
            id,
            TreeNode {
                id,
                kind,
                path,
                name,
                store,
                parent,
                children: Vec::new(),
                label: None,
            },
        );
        id
    }

    pub fn node(&self, id: TreeNodeId) -> Result<&TreeNode> {
        self.nodes.get(&id).ok_or(GroveError::UnknownNode(id.0))
    }

    fn node_mut(&mut self, id: TreeNodeId) -> Result<&mut TreeNode> {
        self.nodes.get_mut(&id).ok_or(GroveError::UnknownNode(id.0))
    }

    pub fn children(&self, id: TreeNodeId) -> Result<&[TreeNodeId]> {
        Ok(self.node(id)?.children())
    }

    pub fn parent(&self, id: TreeNodeId) -> Result<Option<TreeNodeId>> {
        Ok(self.node(id)?.parent)
    }

    #[must_use]
    pub fn roots(&self) -> &[TreeNodeId] {
        &self.roots
    }

    #[must_use]
    pub fn root_of(&self, store: StoreId) -> Option<TreeNodeId> {
        self.roots
            .iter()
            .copied()
            .find(|id| self.nodes.get(id).is_some_and(|n| n.store == store))
    }

    /// Add a top-level entry for `store`. Children are not listed.
    ///
    /// A store already in the projection keeps its existing root.
    pub fn open_root<S: Into<String>>(&mut self, store: StoreId, label: S) -> TreeNodeId {
        if let Some(existing) = self.root_of(store) {
            return existing;
        }
        let id = self.alloc(
            NodeKind::Root,
            path::ROOT.to_string(),
            String::new(),
            store,
            None,
        );
        if let Some(node) = self.nodes.get_mut(&id) {
            node.label = Some(label.into());
        }
        self.roots.push(id);
        self.emit(TreeEvent::ChildAdded {
            parent: None,
            child: id,
        });
        id
    }

    /// Drop the top-level entry of `store` and everything under it.
    pub fn close_root(&mut self, store: StoreId) -> Result<()> {
        match self.root_of(store) {
            Some(root) => self.remove_subtree(root),
            None => Ok(()),
        }
    }

    /// Materialised child of `parent` called `name`.
    #[must_use]
    pub fn child_named(&self, parent: TreeNodeId, name: &str) -> Option<TreeNodeId> {
        let node = self.nodes.get(&parent)?;
        node.children
            .iter()
            .copied()
            .find(|c| self.nodes.get(c).is_some_and(|n| n.name == name))
    }

    /// Find the materialised node at `node_path` of `store`.
    #[must_use]
    pub fn find(&self, store: StoreId, node_path: &str) -> Option<TreeNodeId> {
        let mut current = self.root_of(store)?;
        for part in path::components(node_path).ok()? {
            current = self.child_named(current, part)?;
        }
        Some(current)
    }

    /// Bring the node's children in line with the backing store.
    ///
    /// Names missing from the projection are appended; children already
    /// present are left as they are. Returns the newly added nodes. When
    /// the store cannot list the group nothing is added.
    pub async fn materialize_children(
        &mut self,
        id: TreeNodeId,
        store: &dyn Store,
    ) -> Result<Vec<TreeNodeId>> {
        let node = self.node(id)?;
        if !node.kind.is_group() {
            return Ok(Vec::new());
        }
        let group_path = node.path.clone();
        let listing = store
            .list_children(&group_path)
            .await
            .map_err(|source| GroveError::StoreRead {
                path: group_path.clone(),
                source,
            })?;

        let mut added = Vec::new();
        for entry in listing {
            if self.child_named(id, &entry.name).is_none() {
                added.push(self.attach_child(id, &entry.name, entry.kind)?);
            }
        }
        if !added.is_empty() {
            log_debug!(
                "materialized {count} children of {path}",
                count: added.len(),
                path: group_path.as_str()
            );
        }
        Ok(added)
    }

    /// Add one known child to `parent`.
    ///
    /// If a child with that name is already materialised it is returned
    /// unchanged.
    pub fn attach_child(
        &mut self,
        parent: TreeNodeId,
        name: &str,
        kind: NodeKind,
    ) -> Result<TreeNodeId> {
        if let Some(existing) = self.child_named(parent, name) {
            return Ok(existing);
        }
        let (store, child_path) = {
            let p = self.node(parent)?;
            if !p.kind.is_group() {
                return Err(GroveError::invalid_target(
                    "attach",
                    p.path.clone(),
                    "not a group",
                ));
            }
            (p.store, path::join(&p.path, name))
        };
        let id = self.alloc(kind, child_path, name.to_string(), store, Some(parent));
        self.node_mut(parent)?.children.push(id);
        self.emit(TreeEvent::ChildAdded {
            parent: Some(parent),
            child: id,
        });
        Ok(id)
    }

    /// Remove a node and its materialised descendants from the projection.
    ///
    /// The backing store is not touched.
    pub fn remove_subtree(&mut self, id: TreeNodeId) -> Result<()> {
        let (parent, node_path) = {
            let node = self.node(id)?;
            (node.parent, node.path.clone())
        };
        match parent {
            Some(p) => self.node_mut(p)?.children.retain(|c| *c != id),
            None => self.roots.retain(|r| *r != id),
        }
        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            if let Some(node) = self.nodes.remove(&next) {
                pending.extend(node.children);
            }
        }
        self.emit(TreeEvent::ChildRemoved {
            parent,
            child: id,
            path: node_path,
        });
        Ok(())
    }

    /// Give a node a new name in place, rewriting the paths of all
    /// materialised descendants.
    pub fn rename(&mut self, id: TreeNodeId, new_name: &str) -> Result<()> {
        let node = self.node(id)?;
        let Some(parent_path) = path::dirname(&node.path).map(str::to_string) else {
            return Err(GroveError::invalid_target(
                "rename",
                node.path.clone(),
                "the root has no name",
            ));
        };
        let old_path = node.path.clone();
        let new_path = path::join(&parent_path, new_name);
        self.rewrite_subtree(id, &old_path, &new_path, None)?;
        self.node_mut(id)?.name = new_name.to_string();
        self.emit(TreeEvent::NodeRenamed {
            node: id,
            old_path,
            new_path,
        });
        Ok(())
    }

    /// Move a node under `new_parent` as `new_name`, possibly into another
    /// store's root, rewriting path and store of the whole materialised
    /// subtree.
    pub fn reparent(
        &mut self,
        id: TreeNodeId,
        new_parent: TreeNodeId,
        new_name: &str,
    ) -> Result<()> {
        let (old_parent, old_path) = {
            let node = self.node(id)?;
            (node.parent, node.path.clone())
        };
        let Some(old_parent) = old_parent else {
            return Err(GroveError::invalid_target("move", old_path, "roots cannot move"));
        };
        let (store, new_path) = {
            let target = self.node(new_parent)?;
            if !target.kind.is_group() {
                return Err(GroveError::invalid_target(
                    "move",
                    target.path.clone(),
                    "not a group",
                ));
            }
            (target.store, path::join(&target.path, new_name))
        };
        if self.is_ancestor_or_self(id, new_parent) {
            return Err(GroveError::invalid_target(
                "move",
                old_path,
                "cannot move a node into its own subtree",
            ));
        }

        self.node_mut(old_parent)?.children.retain(|c| *c != id);
        self.emit(TreeEvent::ChildRemoved {
            parent: Some(old_parent),
            child: id,
            path: old_path.clone(),
        });
        self.rewrite_subtree(id, &old_path, &new_path, Some(store))?;
        {
            let node = self.node_mut(id)?;
            node.name = new_name.to_string();
            node.parent = Some(new_parent);
        }
        self.node_mut(new_parent)?.children.push(id);
        self.emit(TreeEvent::ChildAdded {
            parent: Some(new_parent),
            child: id,
        });
        Ok(())
    }

    fn is_ancestor_or_self(&self, ancestor: TreeNodeId, mut id: TreeNodeId) -> bool {
        loop {
            if id == ancestor {
                return true;
            }
            match self.nodes.get(&id).and_then(|n| n.parent) {
                Some(p) => id = p,
                None => return false,
            }
        }
    }

    fn rewrite_subtree(
        &mut self,
        id: TreeNodeId,
        old_prefix: &str,
        new_prefix: &str,
        store: Option<StoreId>,
    ) -> Result<()> {
        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            let node = self.node_mut(next)?;
            if let Some(rebased) = path::rebase(&node.path, old_prefix, new_prefix) {
                node.path = rebased;
            }
            if let Some(store) = store {
                node.store = store;
            }
            pending.extend(node.children.iter().copied());
        }
        Ok(())
    }

    /// Materialise every ancestor of `node_path` and return its node.
    pub async fn reveal(
        &mut self,
        store_id: StoreId,
        store: &dyn Store,
        node_path: &str,
    ) -> Result<TreeNodeId> {
        let no_such = || GroveError::NoSuchNode {
            store: store.path().to_path_buf(),
            path: node_path.to_string(),
        };
        let mut current = self.root_of(store_id).ok_or_else(no_such)?;
        let parts = path::components(node_path).map_err(|_| no_such())?;
        for part in parts {
            let child = match self.child_named(current, part) {
                Some(child) => child,
                None => {
                    self.materialize_children(current, store).await?;
                    self.child_named(current, part).ok_or_else(no_such)?
                }
            };
            current = child;
        }
        Ok(current)
    }

    /// Every materialised path under `id`, depth first, `id` included.
    pub fn materialized_paths(&self, id: TreeNodeId) -> Result<Vec<String>> {
        let mut out = Vec::new();
        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            let node = self.node(next)?;
            out.push(node.path.clone());
            pending.extend(node.children.iter().rev().copied());
        }
        Ok(out)
    }
}
