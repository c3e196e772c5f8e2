// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use arrow_array::{ArrayRef, RecordBatch};
use arrow_schema::SchemaRef;
use async_trait::async_trait;
use std::path::Path;

use crate::entry::Subtree;
use crate::error::Result;
use crate::node::{ChildEntry, NodeDescriptor, OpenMode};

/// An open hierarchical store.
///
/// Every path argument is an absolute node path (`/`, `/g1`, `/g1/t1`).
/// Mutating calls on a read-only store fail with `Error::ReadOnly`
/// without touching the store.
#[async_trait]
pub trait Store: Send + Sync {
    /// Host file backing this store.
    fn path(&self) -> &Path;

    /// Mode actually in effect (after any downgrade at open time).
    fn mode(&self) -> OpenMode;

    async fn get_node(&self, path: &str) -> Result<Option<NodeDescriptor>>;

    /// Visible children of a group, sorted by name. Hidden names are omitted.
    async fn list_children(&self, group: &str) -> Result<Vec<ChildEntry>>;

    async fn create_group(&self, parent: &str, name: &str) -> Result<()>;

    async fn create_table(&self, parent: &str, name: &str, schema: SchemaRef) -> Result<()>;

    /// Create a one-dimensional array leaf holding `values`.
    async fn create_array(&self, parent: &str, name: &str, values: ArrayRef) -> Result<()>;

    async fn move_node(
        &self,
        src: &str,
        dst_parent: &str,
        dst_name: &str,
        overwrite: bool,
    ) -> Result<()>;

    /// Detached copy of the node at `path` and its descendants.
    async fn export(&self, path: &str) -> Result<Subtree>;

    /// Attach a detached subtree as `parent/name`.
    async fn import(&self, parent: &str, name: &str, subtree: Subtree, overwrite: bool)
    -> Result<()>;

    async fn remove_node(&self, path: &str, recursive: bool) -> Result<()>;

    async fn schema(&self, dataset: &str) -> Result<SchemaRef>;

    async fn num_rows(&self, dataset: &str) -> Result<usize>;

    /// Rows `[start, stop)`; `stop` is clamped to the dataset length.
    async fn read_rows(&self, dataset: &str, start: usize, stop: usize) -> Result<RecordBatch>;

    async fn append_rows(&self, dataset: &str, rows: &RecordBatch) -> Result<()>;

    async fn set_attribute(&self, path: &str, key: &str, value: &str) -> Result<()>;

    async fn flush(&self) -> Result<()>;

    /// Flush and release. Later calls fail with `Error::Closed`.
    async fn close(&self) -> Result<()>;
}

/// Copy `src_path` of `src` to `dst_parent/dst_name` of `dst`.
///
/// `src` and `dst` may be the same store. The source is snapshotted before
/// anything is written, so copying a group into one of its own
/// descendants terminates.
pub async fn copy_node(
    src: &dyn Store,
    src_path: &str,
    dst: &dyn Store,
    dst_parent: &str,
    dst_name: &str,
    overwrite: bool,
    recursive: bool,
) -> Result<()> {
    let mut subtree = src.export(src_path).await?;
    if !recursive {
        subtree = subtree.shallow();
    }
    diagnostics::log_debug!(
        "copying {src_path} ({count} nodes) to {dst_parent}/{dst_name}",
        src_path: src_path,
        count: subtree.node_count(),
        dst_parent: dst_parent,
        dst_name: dst_name
    );
    dst.import(dst_parent, dst_name, subtree, overwrite).await
}
