// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use arrow_array::{ArrayRef, Int64Array, RecordBatch};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use async_trait::async_trait;
use grove::collision::{CancelOnCollision, Resolution, Scripted};
use grove::staging;
use grove::{
    GroveConfig, GroveError, NoViewers, OpenMode, QueryDescriptor, StoreId, StoreRegistry,
    TreeNodeId, Workspace,
};
use hstore::{ChildEntry, Container, NodeDescriptor, Store, Subtree};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::{TempDir, tempdir};

fn int_schema(columns: &[&str]) -> SchemaRef {
    Arc::new(Schema::new(
        columns
            .iter()
            .map(|c| Field::new(*c, DataType::Int64, false))
            .collect::<Vec<_>>(),
    ))
}

/// `S` with `/g1` and `/g1/t1`, written to disk and closed.
async fn store_s(dir: &Path) -> Result<PathBuf> {
    let path = dir.join("S.grove");
    let store = Container::create(&path).await?;
    store.create_group("/", "g1").await?;
    store.create_table("/g1", "t1", int_schema(&["x"])).await?;
    store.close().await?;
    Ok(path)
}

/// Workspace with a table `/t1` of `rows` rows: `x` = row number, `y` = x % 7.
async fn with_table(dir: &TempDir, rows: i64, chunk_size: usize) -> Result<(Workspace, StoreId)> {
    let config = GroveConfig::default().with_chunk_size(chunk_size);
    let mut ws = Workspace::new(config).await?;
    let id = ws.create(dir.path().join("data.grove")).await?;
    let schema = int_schema(&["x", "y"]);
    let root = ws.root(id)?;
    ws.create_table(root, "t1", schema.clone(), &mut CancelOnCollision).await?;
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int64Array::from_iter_values(0..rows)) as ArrayRef,
            Arc::new(Int64Array::from_iter_values((0..rows).map(|v| v % 7))),
        ],
    )?;
    ws.store(id)?.append_rows("/t1", &batch).await?;
    Ok((ws, id))
}

fn child_paths(ws: &Workspace, node: TreeNodeId) -> Vec<String> {
    ws.tree()
        .children(node)
        .map(|c| {
            c.iter()
                .filter_map(|id| ws.tree().node(*id).ok())
                .map(|n| n.path().to_string())
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn test_expanding_twice_materializes_once() -> Result<()> {
    let dir = tempdir()?;
    let path = store_s(dir.path()).await?;
    let mut ws = Workspace::new(GroveConfig::default()).await?;
    let id = ws.open(&path, OpenMode::Append).await?;
    let root = ws.root(id)?;
    ws.expand(root).await?;
    let g1 = ws.tree().find(id, "/g1").ok_or_else(|| anyhow::anyhow!("g1 missing"))?;

    let first = ws.expand(g1).await?;
    let second = ws.expand(g1).await?;
    assert_eq!(first.len(), 1);
    assert!(second.is_empty());
    assert_eq!(child_paths(&ws, g1), vec!["/g1/t1"]);
    ws.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_create_group_overwrite_shows_new_empty_group() -> Result<()> {
    let dir = tempdir()?;
    let path = store_s(dir.path()).await?;
    let mut ws = Workspace::new(GroveConfig::default()).await?;
    let id = ws.open(&path, OpenMode::Append).await?;
    let t1 = ws.reveal(id, "/g1/t1").await?;
    let root = ws.root(id)?;

    let mut resolver = Scripted::new([Resolution::Overwrite]);
    let g1 = ws.create_group(root, "g1", &mut resolver).await?;

    let store = ws.store(id)?;
    assert!(store.get_node("/g1").await?.is_some());
    assert!(store.get_node("/g1/t1").await?.is_none());
    assert!(ws.tree().node(t1).is_err());
    assert_eq!(child_paths(&ws, root), vec!["/g1"]);
    assert!(ws.tree().children(g1)?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_second_cut_destroys_first() -> Result<()> {
    let dir = tempdir()?;
    let mut ws = Workspace::new(GroveConfig::default()).await?;
    let id = ws.create(dir.path().join("S.grove")).await?;
    let root = ws.root(id)?;
    let g1 = ws.create_group(root, "g1", &mut CancelOnCollision).await?;
    let g2 = ws.create_group(root, "g2", &mut CancelOnCollision).await?;
    let a = ws
        .create_array(g1, "leafA", Arc::new(Int64Array::from(vec![1, 2])), &mut CancelOnCollision)
        .await?;
    let b = ws
        .create_array(g1, "leafB", Arc::new(Int64Array::from(vec![3])), &mut CancelOnCollision)
        .await?;

    ws.cut(a).await?;
    ws.cut(b).await?;
    ws.paste(g2, None, &mut CancelOnCollision).await?;

    let store = ws.store(id)?;
    assert!(store.get_node("/g2/leafB").await?.is_some());
    assert!(store.get_node("/g1/leafA").await?.is_none());
    assert!(store.get_node("/g2/leafA").await?.is_none());
    let scratch = ws.registry().scratch().clone();
    let whole = scratch.export("/").await?;
    // root, both staging groups, nothing else.
    assert_eq!(whole.node_count(), 3);
    assert!(scratch.list_children(staging::CUT_GROUP).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_query_with_unknown_column_publishes_nothing() -> Result<()> {
    let dir = tempdir()?;
    let (mut ws, id) = with_table(&dir, 1_000_000, 65_536).await?;
    let query = QueryDescriptor::new("no_such_column > 3").named("result");
    let err = ws.query(id, "/t1", &query, &mut CancelOnCollision).await;
    assert!(matches!(err, Err(GroveError::PredicateType { .. })));

    let scratch = ws.registry().scratch().clone();
    assert!(scratch.get_node("/result").await?.is_none());
    assert!(scratch.list_children("/").await?.is_empty());
    assert!(!ws.queries().is_tracked(id, "/t1"));
    Ok(())
}

#[tokio::test]
async fn test_query_runtime_failure_discards_partial_rows() -> Result<()> {
    let dir = tempdir()?;
    let (mut ws, id) = with_table(&dir, 10_000, 1_000).await?;
    let query = QueryDescriptor::new("x / (x - 7500) < 1").named("result");
    let err = ws.query(id, "/t1", &query, &mut CancelOnCollision).await;
    assert!(matches!(err, Err(GroveError::PredicateEvaluation { .. })));

    let scratch = ws.registry().scratch().clone();
    assert!(scratch.get_node("/result").await?.is_none());
    assert_eq!(scratch.export(staging::QUERY_GROUP).await?.node_count(), 1);
    assert!(!ws.queries().is_tracked(id, "/t1"));
    Ok(())
}

#[tokio::test]
async fn test_query_with_index_column() -> Result<()> {
    let dir = tempdir()?;
    let (mut ws, id) = with_table(&dir, 5_000, 128).await?;
    let query = QueryDescriptor::new("y = 3 AND x < 259").with_index("");
    let (outcome, node) = ws.query(id, "/t1", &query, &mut CancelOnCollision).await?;

    assert_eq!(outcome.rows, 37);
    assert_eq!(outcome.name, "t1_filtered");
    assert_eq!(ws.tree().node(node)?.path(), "/t1_filtered");
    let scratch = ws.registry().scratch().clone();
    let schema = scratch.schema("/t1_filtered").await?;
    assert_eq!(schema.field(2).name(), "row_index");
    assert_eq!(schema.field(2).data_type(), &DataType::Int64);

    let rows = scratch.read_rows("/t1_filtered", 0, 100).await?;
    let offsets = rows
        .column(2)
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| anyhow::anyhow!("index column is not Int64"))?;
    assert_eq!(offsets.len(), 37);
    assert!(offsets.values().windows(2).all(|w| w[0] < w[1]));
    assert!(offsets.values().iter().all(|o| o % 7 == 3));
    Ok(())
}

#[tokio::test]
async fn test_rename_rewrites_materialized_paths() -> Result<()> {
    let dir = tempdir()?;
    let path = store_s(dir.path()).await?;
    let mut ws = Workspace::new(GroveConfig::default()).await?;
    let id = ws.open(&path, OpenMode::Append).await?;
    let t1 = ws.reveal(id, "/g1/t1").await?;
    let g1 = ws.tree().parent(t1)?.ok_or_else(|| anyhow::anyhow!("no parent"))?;

    ws.rename(g1, "g1b", &mut CancelOnCollision).await?;
    assert_eq!(ws.tree().node(g1)?.path(), "/g1b");
    assert_eq!(ws.tree().node(t1)?.path(), "/g1b/t1");
    assert!(ws.store(id)?.get_node("/g1b/t1").await?.is_some());
    Ok(())
}

#[tokio::test]
async fn test_paths_stay_consistent_across_moves() -> Result<()> {
    let dir = tempdir()?;
    let mut ws = Workspace::new(GroveConfig::default()).await?;
    let a = ws.create(dir.path().join("a.grove")).await?;
    let b = ws.create(dir.path().join("b.grove")).await?;
    let root_a = ws.root(a)?;
    let root_b = ws.root(b)?;
    let top = ws.create_group(root_a, "top", &mut CancelOnCollision).await?;
    let mid = ws.create_group(top, "mid", &mut CancelOnCollision).await?;
    let leaf = ws.create_table(mid, "leaf", int_schema(&["v"]), &mut CancelOnCollision).await?;
    let dest = ws.create_group(root_b, "dest", &mut CancelOnCollision).await?;

    ws.move_node(top, dest, Some("moved"), &mut CancelOnCollision).await?;

    for (node, expected) in [
        (top, "/dest/moved"),
        (mid, "/dest/moved/mid"),
        (leaf, "/dest/moved/mid/leaf"),
    ] {
        let n = ws.tree().node(node)?;
        assert_eq!(n.path(), expected);
        assert_eq!(n.store(), b);
        assert!(ws.store(b)?.get_node(expected).await?.is_some());
    }
    assert!(ws.store(a)?.get_node("/top").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_read_only_store_rejects_every_mutation() -> Result<()> {
    let dir = tempdir()?;
    let path = store_s(dir.path()).await?;
    let before = std::fs::read(&path)?;

    let mut ws = Workspace::new(GroveConfig::default()).await?;
    let id = ws.open(&path, OpenMode::ReadOnly).await?;
    let root = ws.root(id)?;
    let t1 = ws.reveal(id, "/g1/t1").await?;
    let g1 = ws.tree().find(id, "/g1").ok_or_else(|| anyhow::anyhow!("g1 missing"))?;

    let read_only = |r: std::result::Result<_, GroveError>| {
        matches!(r, Err(GroveError::ReadOnlyViolation { .. }))
    };
    assert!(read_only(ws.create_group(root, "new", &mut CancelOnCollision).await.map(|_| ())));
    assert!(read_only(ws.rename(t1, "t2", &mut CancelOnCollision).await.map(|_| ())));
    assert!(read_only(ws.delete(t1).await));
    assert!(read_only(ws.cut(t1).await));
    ws.copy(t1)?;
    assert!(read_only(ws.paste(root, Some("copy"), &mut CancelOnCollision).await.map(|_| ())));
    assert!(read_only(ws.move_node(t1, root, None, &mut CancelOnCollision).await.map(|_| ())));

    assert_eq!(ws.tree().find(id, "/g1/t1"), Some(t1));
    assert_eq!(ws.tree().parent(t1)?, Some(g1));
    ws.shutdown().await?;
    assert_eq!(std::fs::read(&path)?, before);
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn test_unwritable_file_opens_read_only() -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempdir()?;
    let path = store_s(dir.path()).await?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o444))?;
    if std::fs::OpenOptions::new().append(true).open(&path).is_ok() {
        // Running with privileges that ignore file modes.
        return Ok(());
    }

    let mut ws = Workspace::new(GroveConfig::default()).await?;
    let id = ws.open(&path, OpenMode::Append).await?;
    assert_eq!(ws.store(id)?.mode(), OpenMode::ReadOnly);
    let root = ws.root(id)?;
    assert!(matches!(
        ws.create_group(root, "g2", &mut CancelOnCollision).await,
        Err(GroveError::ReadOnlyViolation { .. })
    ));
    Ok(())
}

/// A container whose listings can be made to fail, and whose flush after
/// the next move to the root can be made to fail once.
struct Flaky {
    inner: Container,
    broken: AtomicBool,
    fail_publish: AtomicBool,
    flush_poisoned: AtomicBool,
}

impl Flaky {
    fn new(inner: Container) -> Self {
        Self {
            inner,
            broken: AtomicBool::new(false),
            fail_publish: AtomicBool::new(false),
            flush_poisoned: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Store for Flaky {
    fn path(&self) -> &Path {
        self.inner.path()
    }

    fn mode(&self) -> OpenMode {
        self.inner.mode()
    }

    async fn get_node(&self, path: &str) -> hstore::Result<Option<NodeDescriptor>> {
        self.inner.get_node(path).await
    }

    async fn list_children(&self, group: &str) -> hstore::Result<Vec<ChildEntry>> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(hstore::Error::corrupt(self.inner.path(), "listing failed"));
        }
        self.inner.list_children(group).await
    }

    async fn create_group(&self, parent: &str, name: &str) -> hstore::Result<()> {
        self.inner.create_group(parent, name).await
    }

    async fn create_table(
        &self,
        parent: &str,
        name: &str,
        schema: SchemaRef,
    ) -> hstore::Result<()> {
        self.inner.create_table(parent, name, schema).await
    }

    async fn create_array(&self, parent: &str, name: &str, values: ArrayRef) -> hstore::Result<()> {
        self.inner.create_array(parent, name, values).await
    }

    async fn move_node(
        &self,
        src: &str,
        dst_parent: &str,
        dst_name: &str,
        overwrite: bool,
    ) -> hstore::Result<()> {
        self.inner.move_node(src, dst_parent, dst_name, overwrite).await?;
        if dst_parent == "/" && self.fail_publish.swap(false, Ordering::SeqCst) {
            self.flush_poisoned.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn export(&self, path: &str) -> hstore::Result<Subtree> {
        self.inner.export(path).await
    }

    async fn import(
        &self,
        parent: &str,
        name: &str,
        subtree: Subtree,
        overwrite: bool,
    ) -> hstore::Result<()> {
        self.inner.import(parent, name, subtree, overwrite).await
    }

    async fn remove_node(&self, path: &str, recursive: bool) -> hstore::Result<()> {
        self.inner.remove_node(path, recursive).await
    }

    async fn schema(&self, dataset: &str) -> hstore::Result<SchemaRef> {
        self.inner.schema(dataset).await
    }

    async fn num_rows(&self, dataset: &str) -> hstore::Result<usize> {
        self.inner.num_rows(dataset).await
    }

    async fn read_rows(
        &self,
        dataset: &str,
        start: usize,
        stop: usize,
    ) -> hstore::Result<RecordBatch> {
        self.inner.read_rows(dataset, start, stop).await
    }

    async fn append_rows(&self, dataset: &str, rows: &RecordBatch) -> hstore::Result<()> {
        self.inner.append_rows(dataset, rows).await
    }

    async fn set_attribute(&self, path: &str, key: &str, value: &str) -> hstore::Result<()> {
        self.inner.set_attribute(path, key, value).await
    }

    async fn flush(&self) -> hstore::Result<()> {
        if self.flush_poisoned.swap(false, Ordering::SeqCst) {
            return Err(hstore::Error::Io {
                path: self.inner.path().to_path_buf(),
                source: std::io::Error::other("disk full"),
            });
        }
        self.inner.flush().await
    }

    async fn close(&self) -> hstore::Result<()> {
        self.inner.close().await
    }
}

#[tokio::test]
async fn test_failed_listing_adds_no_children() -> Result<()> {
    let dir = tempdir()?;
    let path = store_s(dir.path()).await?;
    let flaky = Arc::new(Flaky::new(Container::open(&path, OpenMode::Append).await?));

    let mut ws = Workspace::new(GroveConfig::default()).await?;
    let id = ws.attach(flaky.clone()).await?;
    let root = ws.root(id)?;
    ws.expand(root).await?;
    let g1 = ws.tree().find(id, "/g1").ok_or_else(|| anyhow::anyhow!("g1 missing"))?;

    flaky.broken.store(true, Ordering::SeqCst);
    assert!(matches!(ws.expand(g1).await, Err(GroveError::StoreRead { .. })));
    assert!(ws.tree().children(g1)?.is_empty());

    flaky.broken.store(false, Ordering::SeqCst);
    assert_eq!(ws.expand(g1).await?.len(), 1);
    Ok(())
}

async fn scratch_names(ws: &Workspace) -> Result<Vec<String>> {
    Ok(ws
        .registry()
        .scratch()
        .list_children("/")
        .await?
        .into_iter()
        .map(|c| c.name)
        .collect())
}

#[tokio::test]
async fn test_failed_publish_restores_scratch() -> Result<()> {
    let dir = tempdir()?;
    let scratch_file = dir.path().join("scratch.grove");
    let flaky = Arc::new(Flaky::new(Container::create(&scratch_file).await?));
    let registry = StoreRegistry::with_scratch_store(flaky.clone()).await?;
    let config = GroveConfig::default().with_chunk_size(4);
    let mut ws = Workspace::with_parts(config, registry, Box::new(NoViewers));

    let id = ws.create(dir.path().join("data.grove")).await?;
    let schema = int_schema(&["x"]);
    let root = ws.root(id)?;
    ws.create_table(root, "t1", schema.clone(), &mut CancelOnCollision).await?;
    let batch = RecordBatch::try_new(
        schema,
        vec![Arc::new(Int64Array::from_iter_values(0..20)) as ArrayRef],
    )?;
    ws.store(id)?.append_rows("/t1", &batch).await?;

    flaky.fail_publish.store(true, Ordering::SeqCst);
    let fresh = QueryDescriptor::new("x < 6").named("r");
    let failed = ws.query(id, "/t1", &fresh, &mut CancelOnCollision).await;
    assert!(matches!(failed, Err(GroveError::StoreWrite { .. })));
    assert!(scratch_names(&ws).await?.is_empty());

    ws.query(id, "/t1", &QueryDescriptor::new("x < 3").named("r"), &mut CancelOnCollision)
        .await?;

    // An overwrite that fails to reach the disk keeps the earlier result.
    flaky.fail_publish.store(true, Ordering::SeqCst);
    let mut overwrite = Scripted::new([Resolution::Overwrite]);
    let failed = ws.query(id, "/t1", &fresh, &mut overwrite).await;
    assert!(matches!(failed, Err(GroveError::StoreWrite { .. })));

    assert_eq!(scratch_names(&ws).await?, vec!["r"]);
    let scratch = ws.registry().scratch().clone();
    assert_eq!(scratch.num_rows("/r").await?, 3);
    assert!(scratch.list_children(staging::QUERY_GROUP).await?.is_empty());

    // What reached the disk agrees.
    scratch.flush().await?;
    let on_disk = Container::open(&scratch_file, OpenMode::ReadOnly).await?;
    assert_eq!(on_disk.num_rows("/r").await?, 3);
    Ok(())
}

#[tokio::test]
async fn test_save_scratch_results_to_a_file() -> Result<()> {
    let dir = tempdir()?;
    let (mut ws, id) = with_table(&dir, 100, 16).await?;
    ws.query(id, "/t1", &QueryDescriptor::new("y = 0").named("zeros"), &mut CancelOnCollision)
        .await?;
    let scratch = ws.registry().scratch_id();
    let saved = ws
        .save_as(scratch, dir.path().join("results.grove"), &mut CancelOnCollision)
        .await?;

    let store = ws.store(saved)?;
    assert_eq!(store.num_rows("/zeros").await?, 15);
    assert!(store.get_node(staging::CUT_GROUP).await?.is_none());
    assert!(ws.root(saved).is_ok());
    assert!(ws.root(scratch).is_ok());
    Ok(())
}
