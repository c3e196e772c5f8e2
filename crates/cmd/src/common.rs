// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use grove::collision::{AutoRename, CancelOnCollision, CollisionResolver, OverwriteOnCollision};
use grove::{GroveConfig, OpenMode, StoreId, TreeNodeId, Workspace};
use hstore::path;

/// What to do when a command's target name is already taken.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CollisionPolicy {
    #[default]
    Cancel,
    Overwrite,
    AutoRename,
}

impl CollisionPolicy {
    #[must_use]
    pub fn from_flags(overwrite: bool, auto_rename: bool) -> Self {
        match (overwrite, auto_rename) {
            (true, _) => CollisionPolicy::Overwrite,
            (false, true) => CollisionPolicy::AutoRename,
            (false, false) => CollisionPolicy::Cancel,
        }
    }

    #[must_use]
    pub fn resolver(self) -> Box<dyn CollisionResolver> {
        match self {
            CollisionPolicy::Cancel => Box::new(CancelOnCollision),
            CollisionPolicy::Overwrite => Box::new(OverwriteOnCollision),
            CollisionPolicy::AutoRename => Box::new(AutoRename),
        }
    }
}

/// Settings shared by every command invocation.
#[derive(Clone, Debug)]
pub struct GroveContext {
    pub config: GroveConfig,
    pub policy: CollisionPolicy,
}

impl GroveContext {
    #[must_use]
    pub fn new(config: GroveConfig, policy: CollisionPolicy) -> Self {
        Self { config, policy }
    }

    /// Configuration from `GROVE_CONFIG` (or defaults).
    pub fn from_env(policy: CollisionPolicy) -> Result<Self> {
        Ok(Self::new(GroveConfig::from_env()?, policy))
    }

    pub async fn workspace(&self) -> Result<Workspace> {
        Ok(Workspace::new(self.config.clone()).await?)
    }

    #[must_use]
    pub fn resolver(&self) -> Box<dyn CollisionResolver> {
        self.policy.resolver()
    }
}

/// A node inside a container file, written `FILE:PATH` on the command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Location {
    pub file: PathBuf,
    pub path: String,
}

impl Location {
    #[must_use]
    pub fn new<P: Into<PathBuf>, S: Into<String>>(file: P, path: S) -> Self {
        Self {
            file: file.into(),
            path: path.into(),
        }
    }

    /// `FILE:/a/b` or a bare `FILE` for its root.
    pub fn parse(arg: &str) -> Result<Self> {
        let (file, node) = match arg.rsplit_once(':') {
            Some((file, node)) if node.starts_with('/') => (file, node),
            _ => (arg, path::ROOT),
        };
        if file.is_empty() {
            return Err(anyhow!("missing file name in {arg:?}"));
        }
        Ok(Self::new(file, node))
    }

    #[must_use]
    pub fn parent(&self) -> &str {
        path::dirname(&self.path).unwrap_or(path::ROOT)
    }

    /// Last path component; the root has none.
    pub fn name(&self) -> Result<&str> {
        path::basename(&self.path).ok_or_else(|| anyhow!("{self} names the root group"))
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file.display(), self.path)
    }
}

/// Open `file`, or return the store already open for it.
pub async fn open_store(ws: &mut Workspace, file: &Path, mode: OpenMode) -> Result<StoreId> {
    let identity = std::fs::canonicalize(file).unwrap_or_else(|_| file.to_path_buf());
    if let Some(id) = ws.registry().find(&identity) {
        return Ok(id);
    }
    Ok(ws.open(&identity, mode).await?)
}

/// Open the location's file and reveal its node.
pub async fn locate(
    ws: &mut Workspace,
    at: &Location,
    mode: OpenMode,
) -> Result<(StoreId, TreeNodeId)> {
    let store = open_store(ws, &at.file, mode).await?;
    let node = ws.reveal(store, &at.path).await?;
    Ok((store, node))
}

/// Shut the workspace down whatever `result` holds, then return it.
///
/// The command's own error wins over a shutdown error.
pub async fn finish<T>(ws: Workspace, result: Result<T>) -> Result<T> {
    let closed = ws.shutdown().await;
    let value = result?;
    closed?;
    Ok(value)
}
