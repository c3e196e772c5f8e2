// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Registry of open stores, including the session's scratch store.

use diagnostics::{log_error, log_info, log_warn};
use hstore::{Container, OpenMode, Store};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use crate::collision::{CollisionContext, CollisionResolver, resolve_name};
use crate::config::GroveConfig;
use crate::error::{GroveError, Result};
use crate::staging;

const SCRATCH_FILE: &str = "scratch.grove";

/// Identifies an open store for the lifetime of the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreId(u64);

impl StoreId {
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for StoreId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "store#{}", self.0)
    }
}

struct Entry {
    handle: Arc<dyn Store>,
    /// Canonical host path used for "already open" checks.
    identity: PathBuf,
}

/// Sole owner of store handles.
///
/// The scratch store is created with the registry and lives until
/// [`StoreRegistry::shutdown`]; `scratch()` therefore always succeeds.
pub struct StoreRegistry {
    stores: BTreeMap<StoreId, Entry>,
    scratch: StoreId,
    next_id: u64,
    scratch_dir: Option<TempDir>,
}

impl StoreRegistry {
    /// Create the registry together with a fresh scratch store in a private
    /// temporary directory.
    ///
    /// Failure here is the one fatal startup condition.
    pub async fn new(config: &GroveConfig) -> Result<Self> {
        let dir = match &config.scratch_dir {
            Some(parent) => tempfile::Builder::new().prefix("grove-").tempdir_in(parent),
            None => tempfile::Builder::new().prefix("grove-").tempdir(),
        }
        .map_err(|e| {
            log_error!("cannot create scratch directory: {error}", error: e.to_string());
            GroveError::ScratchUnavailable(e.to_string())
        })?;

        let file = dir.path().join(SCRATCH_FILE);
        let scratch = Container::create(&file).await.map_err(|e| {
            log_error!("cannot create scratch store: {error}", error: e.to_string());
            GroveError::ScratchUnavailable(e.to_string())
        })?;
        log_info!("scratch store at {path}", path: file.display().to_string());
        Self::from_scratch(Arc::new(scratch), Some(dir)).await
    }

    /// Use an already open store as the scratch store.
    ///
    /// The store must be writable; its staging groups are created if missing.
    pub async fn with_scratch_store(scratch: Arc<dyn Store>) -> Result<Self> {
        Self::from_scratch(scratch, None).await
    }

    async fn from_scratch(scratch: Arc<dyn Store>, scratch_dir: Option<TempDir>) -> Result<Self> {
        if !scratch.mode().is_writable() {
            return Err(GroveError::ScratchUnavailable(format!(
                "{} is read-only",
                scratch.path().display()
            )));
        }
        staging::prepare(scratch.as_ref())
            .await
            .map_err(|e| GroveError::ScratchUnavailable(e.to_string()))?;

        let id = StoreId(0);
        let identity = scratch.path().to_path_buf();
        let mut stores = BTreeMap::new();
        stores.insert(
            id,
            Entry {
                handle: scratch,
                identity,
            },
        );
        Ok(Self {
            stores,
            scratch: id,
            next_id: 1,
            scratch_dir,
        })
    }

    /// Open a container file.
    ///
    /// Asking for `Append` on a file that cannot be written silently
    /// downgrades to `ReadOnly`; check `mode()` on the returned handle.
    pub async fn open<P: AsRef<Path>>(&mut self, path: P, mode: OpenMode) -> Result<StoreId> {
        let path = path.as_ref();
        let identity = identity(path).await;
        if self.find(&identity).is_some() {
            return Err(GroveError::AlreadyOpen(path.to_path_buf()));
        }

        let container = match Container::open(path, mode).await {
            Ok(c) => c,
            Err(hstore::Error::PermissionDenied(_)) if mode.is_writable() => {
                log_warn!(
                    "{path} is not writable, opened read-only",
                    path: path.display().to_string()
                );
                Container::open(path, OpenMode::ReadOnly)
                    .await
                    .map_err(GroveError::from_open)?
            }
            Err(e) => return Err(GroveError::from_open(e)),
        };
        let id = self.insert(Arc::new(container), identity);
        log_info!("opened {path} as {id}", path: path.display().to_string(), id: id.to_string());
        Ok(id)
    }

    /// Create a new empty container file and open it for appending.
    pub async fn create<P: AsRef<Path>>(&mut self, path: P) -> Result<StoreId> {
        let path = path.as_ref();
        let identity = identity(path).await;
        if self.find(&identity).is_some() {
            return Err(GroveError::AlreadyOpen(path.to_path_buf()));
        }
        let container = Container::create(path).await.map_err(GroveError::from_open)?;
        Ok(self.insert(Arc::new(container), identity))
    }

    /// Hand an already open store to the registry.
    pub async fn attach(&mut self, handle: Arc<dyn Store>) -> Result<StoreId> {
        let identity = identity(handle.path()).await;
        if self.find(&identity).is_some() {
            return Err(GroveError::AlreadyOpen(handle.path().to_path_buf()));
        }
        Ok(self.insert(handle, identity))
    }

    fn insert(&mut self, handle: Arc<dyn Store>, identity: PathBuf) -> StoreId {
        let id = StoreId(self.next_id);
        self.next_id += 1;
        self.stores.insert(id, Entry { handle, identity });
        id
    }

    /// Flush and release a user store.
    ///
    /// Callers detach projection state and viewers for the store first.
    pub async fn close(&mut self, id: StoreId) -> Result<()> {
        if id == self.scratch {
            return Err(GroveError::invalid_target(
                "close",
                self.scratch().path().display().to_string(),
                "the scratch store lives for the whole session",
            ));
        }
        let entry = self.stores.remove(&id).ok_or(GroveError::UnknownStore(id.0))?;
        entry.handle.close().await?;
        log_info!("closed {path}", path: entry.handle.path().display().to_string());
        Ok(())
    }

    pub fn get(&self, id: StoreId) -> Result<&Arc<dyn Store>> {
        self.stores
            .get(&id)
            .map(|e| &e.handle)
            .ok_or(GroveError::UnknownStore(id.0))
    }

    #[must_use]
    pub fn scratch(&self) -> &Arc<dyn Store> {
        // The scratch entry is inserted at construction and never removed.
        &self.stores[&self.scratch].handle
    }

    #[must_use]
    pub fn scratch_id(&self) -> StoreId {
        self.scratch
    }

    #[must_use]
    pub fn is_scratch(&self, id: StoreId) -> bool {
        id == self.scratch
    }

    /// User store open at `path`, if any. The scratch store is never found.
    #[must_use]
    pub fn find<P: AsRef<Path>>(&self, path: P) -> Option<StoreId> {
        let path = path.as_ref();
        self.stores
            .iter()
            .find(|(id, e)| **id != self.scratch && e.identity == path)
            .map(|(id, _)| *id)
    }

    /// Ids of every open store in the order they were opened, scratch first.
    pub fn stores(&self) -> impl Iterator<Item = StoreId> + '_ {
        self.stores.keys().copied()
    }

    /// Write a copy of a whole store to `new_path` and open the copy.
    ///
    /// The file name goes through the collision protocol against the
    /// destination directory. A user store is replaced by its copy; the
    /// scratch store stays where it is and the copy opens alongside it.
    pub async fn save_as<P: AsRef<Path>>(
        &mut self,
        id: StoreId,
        new_path: P,
        resolver: &mut dyn CollisionResolver,
    ) -> Result<StoreId> {
        let new_path = new_path.as_ref();
        let source = self.get(id)?.clone();
        let dir = new_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        let candidate = new_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| GroveError::InvalidName(new_path.display().to_string()))?;

        let mut siblings = Vec::new();
        let mut listing = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = listing.next_entry().await? {
            siblings.push(entry.file_name().to_string_lossy().to_string());
        }
        let dir_label = dir.display().to_string();
        let resolved = resolve_name(
            &candidate,
            &siblings,
            None,
            resolver,
            &CollisionContext {
                operation: "save as",
                parent: &dir_label,
            },
        )?;
        let target = dir.join(&resolved.name);

        if resolved.overwrite {
            if let Some(open) = self.find(identity(&target).await) {
                if open == id {
                    return Err(GroveError::invalid_target(
                        "save as",
                        target.display().to_string(),
                        "a store cannot be saved over itself",
                    ));
                }
                self.close(open).await?;
            }
        }

        source.flush().await?;
        let snapshot = source.export(hstore::path::ROOT).await?.without_hidden();
        let copy = Container::create_with(&target, snapshot).await?;
        let new_id = self.attach(Arc::new(copy)).await?;
        if !self.is_scratch(id) {
            self.close(id).await?;
        }
        log_info!(
            "saved {src} as {dst}",
            src: source.path().display().to_string(),
            dst: target.display().to_string()
        );
        Ok(new_id)
    }

    /// Flush and close every store, then remove the scratch store's directory.
    pub async fn shutdown(mut self) -> Result<()> {
        let mut first_error = None;
        let ids: Vec<StoreId> = self.stores.keys().copied().collect();
        for id in ids {
            if let Some(entry) = self.stores.remove(&id) {
                if let Err(e) = entry.handle.close().await {
                    log_warn!(
                        "closing {path} failed: {error}",
                        path: entry.handle.path().display().to_string(),
                        error: e.to_string()
                    );
                    first_error.get_or_insert(GroveError::from(e));
                }
            }
        }
        if let Some(dir) = self.scratch_dir.take() {
            dir.close()?;
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Canonical form of `path`, falling back to the canonical parent for files
/// that do not exist yet.
async fn identity(path: &Path) -> PathBuf {
    if let Ok(p) = tokio::fs::canonicalize(path).await {
        return p;
    }
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    match (tokio::fs::canonicalize(parent).await, path.file_name()) {
        (Ok(dir), Some(name)) => dir.join(name),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::{AutoRename, CancelOnCollision, OverwriteOnCollision};

    async fn registry() -> StoreRegistry {
        StoreRegistry::new(&GroveConfig::default()).await.expect("registry")
    }

    #[tokio::test]
    async fn test_scratch_created_with_staging_groups() {
        let reg = registry().await;
        let scratch = reg.scratch();
        assert!(scratch.get_node(staging::CUT_GROUP).await.expect("get").is_some());
        assert!(scratch.get_node(staging::QUERY_GROUP).await.expect("get").is_some());
        assert!(scratch.list_children("/").await.expect("list").is_empty());
        assert!(reg.find(scratch.path()).is_none());
    }

    #[tokio::test]
    async fn test_open_errors() {
        let dir = TempDir::new().expect("tempdir");
        let mut reg = registry().await;

        let missing = dir.path().join("missing.grove");
        assert!(matches!(
            reg.open(&missing, OpenMode::Append).await,
            Err(GroveError::NotFound(_))
        ));

        let text = dir.path().join("plain.txt");
        std::fs::write(&text, "not a container").expect("write");
        assert!(matches!(
            reg.open(&text, OpenMode::ReadOnly).await,
            Err(GroveError::NotAContainer(_))
        ));

        let file = dir.path().join("a.grove");
        Container::create(&file).await.expect("create");
        reg.open(&file, OpenMode::Append).await.expect("open");
        let dotted = dir.path().join(".").join("a.grove");
        assert!(matches!(
            reg.open(&dotted, OpenMode::ReadOnly).await,
            Err(GroveError::AlreadyOpen(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unwritable_file_downgrades_to_read_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().expect("tempdir");
        let file = dir.path().join("locked.grove");
        Container::create(&file).await.expect("create");
        std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o444)).expect("chmod");

        // Privileged users can write anyway; nothing to observe then.
        if std::fs::OpenOptions::new().append(true).open(&file).is_ok() {
            return;
        }

        let mut reg = registry().await;
        let id = reg.open(&file, OpenMode::Append).await.expect("downgraded open");
        assert_eq!(reg.get(id).expect("handle").mode(), OpenMode::ReadOnly);
    }

    #[tokio::test]
    async fn test_scratch_cannot_be_closed() {
        let mut reg = registry().await;
        let scratch = reg.scratch_id();
        assert!(matches!(reg.close(scratch).await, Err(GroveError::InvalidTarget { .. })));
        assert!(reg.get(scratch).is_ok());
    }

    #[tokio::test]
    async fn test_close_then_reopen() {
        let dir = TempDir::new().expect("tempdir");
        let file = dir.path().join("b.grove");
        let mut reg = registry().await;
        let id = reg.create(&file).await.expect("create");
        reg.get(id).expect("handle").create_group("/", "g").await.expect("group");
        reg.close(id).await.expect("close");
        assert!(matches!(reg.get(id), Err(GroveError::UnknownStore(_))));

        let id = reg.open(&file, OpenMode::ReadOnly).await.expect("reopen");
        let store = reg.get(id).expect("handle");
        assert!(store.get_node("/g").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn test_save_as_collision_protocol() {
        let dir = TempDir::new().expect("tempdir");
        let src = dir.path().join("src.grove");
        let taken = dir.path().join("copy.grove");
        std::fs::write(&taken, "occupied").expect("write");

        let mut reg = registry().await;
        let id = reg.create(&src).await.expect("create");
        reg.get(id).expect("handle").create_group("/", "g").await.expect("group");

        assert!(matches!(
            reg.save_as(id, &taken, &mut CancelOnCollision).await,
            Err(GroveError::NameCollisionAbandoned { .. })
        ));
        assert!(reg.get(id).is_ok());

        let renamed = reg.save_as(id, &taken, &mut AutoRename).await.expect("auto");
        assert!(reg.get(id).is_err());
        let copy = reg.get(renamed).expect("copy");
        assert!(copy.path().ends_with("copy_1.grove"));
        assert!(copy.get_node("/g").await.expect("get").is_some());

        let over = reg.save_as(renamed, &taken, &mut OverwriteOnCollision).await.expect("over");
        assert!(Container::is_container(reg.get(over).expect("h").path()).await);
    }

    #[tokio::test]
    async fn test_save_scratch_drops_staging_groups() {
        let dir = TempDir::new().expect("tempdir");
        let mut reg = registry().await;
        reg.scratch().create_group("/", "result").await.expect("group");
        let scratch = reg.scratch_id();

        let id = reg
            .save_as(scratch, dir.path().join("kept.grove"), &mut CancelOnCollision)
            .await
            .expect("save");
        let saved = reg.get(id).expect("saved");
        assert!(saved.get_node("/result").await.expect("get").is_some());
        assert!(saved.get_node(staging::CUT_GROUP).await.expect("get").is_none());
        assert!(reg.get(scratch).is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_removes_scratch() {
        let reg = registry().await;
        let scratch_path = reg.scratch().path().to_path_buf();
        assert!(scratch_path.exists());
        reg.shutdown().await.expect("shutdown");
        assert!(!scratch_path.exists());
    }
}
