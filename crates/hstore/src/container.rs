// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use arrow::compute::concat_batches;
use arrow_array::{ArrayRef, RecordBatch};
use arrow_schema::{Field, Schema, SchemaRef};
use async_trait::async_trait;
use diagnostics::{log_debug, log_info};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::entry::{Dataset, Entry, Group, Payload, Slot, Subtree};
use crate::error::{Error, Result};
use crate::format::{self, Block, Extent, HEADER_LEN};
use crate::node::{ChildEntry, NodeDescriptor, NodeKind, OpenMode};
use crate::path::{self, ROOT};
use crate::store::Store;

/// Column name used for array leaves.
pub const ARRAY_COLUMN: &str = "value";

/// Unreferenced bytes tolerated before a flush rewrites the whole file.
const COMPACT_MIN_BYTES: u64 = 64 * 1024;

/// A container file.
///
/// The hierarchy is held in memory; table rows stay in the file once
/// flushed and are read back on demand. `flush` appends what changed and
/// repoints the header, or rewrites the file atomically once enough of
/// it is unreferenced.
pub struct Container {
    path: PathBuf,
    mode: OpenMode,
    state: Mutex<State>,
}

struct State {
    root: Group,
    dirty: bool,
    closed: bool,
    /// Read handle on the file the extents refer to.
    file: tokio::fs::File,
    /// End of the last complete flush.
    file_len: u64,
    manifest: Extent,
    /// Bytes written by flushes since this handle was opened.
    bytes_written: u64,
}

/// Outcome of writing a flush to disk.
struct Written {
    extents: Vec<Extent>,
    manifest: Extent,
    file_len: u64,
    bytes: u64,
    /// Handle on the replacement file after a rewrite.
    file: Option<tokio::fs::File>,
}

impl Container {
    /// Write a new, empty container at `path` and open it for appending.
    pub async fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::create_from(path, Group::default()).await
    }

    /// Write a new container at `path` whose root is a copy of `subtree`.
    ///
    /// Used for "save as". The subtree must be a group.
    pub async fn create_with<P: AsRef<Path>>(path: P, subtree: Subtree) -> Result<Self> {
        let path = path.as_ref();
        match subtree.0 {
            Entry::Group(root) => Self::create_from(path, root).await,
            _ => Err(Error::not_a_group(path.display().to_string())),
        }
    }

    async fn create_from<P: AsRef<Path>>(path: P, mut root: Group) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let written = write_full(&path, &root, None).await?;
        format::commit(&mut root, true, &written.extents);
        let file = written
            .file
            .ok_or_else(|| Error::corrupt(&path, "rewrite left no file handle"))?;
        log_info!("created container {path}", path: path.display().to_string());
        Ok(Self {
            path,
            mode: OpenMode::Append,
            state: Mutex::new(State {
                root,
                dirty: false,
                closed: false,
                file,
                file_len: written.file_len,
                manifest: written.manifest,
                bytes_written: written.bytes,
            }),
        })
    }

    /// Open an existing container.
    ///
    /// Only the manifest is read; table rows are read when asked for.
    /// With `OpenMode::Append` the file must also be writable; otherwise
    /// this fails with `Error::PermissionDenied` and the caller decides
    /// whether to retry read-only.
    pub async fn open<P: AsRef<Path>>(path: P, mode: OpenMode) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| Error::from_io(&path, e))?;
        if !meta.is_file() {
            return Err(Error::NotAContainer(path));
        }
        let mut file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| Error::from_io(&path, e))?;
        let head = read_head(&mut file, &path).await?;
        let manifest = format::parse_header(&path, &head)?;
        if manifest.offset < HEADER_LEN || manifest.end().is_none_or(|end| end > meta.len()) {
            return Err(Error::corrupt(&path, "manifest out of bounds"));
        }
        let bytes = read_extent(&mut file, &path, manifest).await?;
        let root = format::decode_manifest(&path, &bytes, meta.len())?;

        if mode.is_writable() {
            tokio::fs::OpenOptions::new()
                .append(true)
                .open(&path)
                .await
                .map_err(|e| Error::from_io(&path, e))?;
        }

        log_debug!(
            "opened container {path} ({mode})",
            path: path.display().to_string(),
            mode: mode.to_string()
        );
        Ok(Self {
            path,
            mode,
            state: Mutex::new(State {
                root,
                dirty: false,
                closed: false,
                file,
                file_len: meta.len(),
                manifest,
                bytes_written: 0,
            }),
        })
    }

    /// True when the file at `path` starts with the container signature.
    pub async fn is_container<P: AsRef<Path>>(path: P) -> bool {
        let Ok(mut file) = tokio::fs::File::open(path.as_ref()).await else {
            return false;
        };
        let mut head = [0u8; 8];
        file.read_exact(&mut head).await.is_ok() && format::has_signature(&head)
    }

    fn check_writable(&self) -> Result<()> {
        if self.mode.is_writable() {
            Ok(())
        } else {
            Err(Error::ReadOnly(self.path.clone()))
        }
    }

    async fn state(&self) -> Result<tokio::sync::MutexGuard<'_, State>> {
        let state = self.state.lock().await;
        if state.closed {
            return Err(Error::Closed(self.path.clone()));
        }
        Ok(state)
    }

    async fn writable_state(&self) -> Result<tokio::sync::MutexGuard<'_, State>> {
        let state = self.state().await?;
        self.check_writable()?;
        Ok(state)
    }
}

impl State {
    /// Insert `entry` as `parent/name`, replacing an existing entry only if `overwrite`.
    fn insert(&mut self, parent: &str, name: &str, entry: Entry, overwrite: bool) -> Result<()> {
        check_name(name)?;
        let group = self.root.group_mut(parent)?;
        if !overwrite && group.children.contains_key(name) {
            return Err(Error::already_exists(path::join(parent, name)));
        }
        group.children.insert(name.to_string(), entry);
        self.dirty = true;
        Ok(())
    }

    fn take(&mut self, target: &str) -> Result<Entry> {
        let (parent, name) = split(target)?;
        let group = self.root.group_mut(parent)?;
        let entry = group
            .children
            .remove(name)
            .ok_or_else(|| Error::not_found(target))?;
        self.dirty = true;
        Ok(entry)
    }

    /// True once the unreferenced part of the file outweighs the rest.
    fn needs_rewrite(&self) -> bool {
        let live: u64 = self
            .root
            .slots()
            .iter()
            .filter_map(Slot::stored)
            .map(|e| e.len)
            .sum();
        let garbage = self
            .file_len
            .saturating_sub(HEADER_LEN + live + self.manifest.len);
        garbage > COMPACT_MIN_BYTES && garbage > live
    }
}

fn split(target: &str) -> Result<(&str, &str)> {
    match (path::dirname(target), path::basename(target)) {
        (Some(parent), Some(name)) => {
            path::components(target)?;
            Ok((parent, name))
        }
        _ => Err(Error::RootImmutable("moved or removed")),
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(Error::invalid_path(name));
    }
    Ok(())
}

/// Up to `HEADER_LEN` bytes from the start of `file`.
async fn read_head(file: &mut tokio::fs::File, path: &Path) -> Result<Vec<u8>> {
    let mut head = Vec::with_capacity(HEADER_LEN as usize);
    (&mut *file)
        .take(HEADER_LEN)
        .read_to_end(&mut head)
        .await
        .map_err(|e| Error::from_io(path, e))?;
    Ok(head)
}

async fn read_extent(file: &mut tokio::fs::File, path: &Path, extent: Extent) -> Result<Vec<u8>> {
    let len = usize::try_from(extent.len).map_err(|_| Error::corrupt(path, "extent too large"))?;
    let mut buf = vec![0; len];
    file.seek(SeekFrom::Start(extent.offset))
        .await
        .map_err(|e| Error::from_io(path, e))?;
    file.read_exact(&mut buf)
        .await
        .map_err(|e| Error::from_io(path, e))?;
    Ok(buf)
}

/// Write every payload of `root` to a sibling temp file, then rename it
/// over `path`. Stored payloads are copied from `current`.
async fn write_full(
    path: &Path,
    root: &Group,
    mut current: Option<&mut tokio::fs::File>,
) -> Result<Written> {
    let io = |e| Error::from_io(path, e);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let tmp = tempfile::NamedTempFile::new_in(dir).map_err(io)?;
    let mut out = tokio::fs::File::from_std(tmp.reopen().map_err(io)?);
    out.write_all(&format::header(Extent::default()))
        .await
        .map_err(io)?;

    let mut offset = HEADER_LEN;
    let mut extents = Vec::new();
    for block in format::blocks(root, true) {
        let rows = block.rows();
        let bytes = match (block, current.as_deref_mut()) {
            (Block::Segment(batch), _) => format::encode_segment(&batch)?,
            (Block::Bytes(bytes), _) => bytes,
            (Block::Copy(extent), Some(file)) => read_extent(file, path, extent).await?,
            (Block::Copy(extent), None) => {
                return Err(Error::corrupt(path, format!("no file to copy {extent:?} from")));
            }
        };
        out.write_all(&bytes).await.map_err(io)?;
        extents.push(Extent {
            offset,
            len: bytes.len() as u64,
            rows,
        });
        offset += bytes.len() as u64;
    }

    let manifest = format::encode_manifest(path, root, true, &extents)?;
    out.write_all(&manifest).await.map_err(io)?;
    out.flush().await.map_err(io)?;
    let manifest_at = Extent {
        offset,
        len: manifest.len() as u64,
        rows: 0,
    };
    out.seek(SeekFrom::Start(0)).await.map_err(io)?;
    out.write_all(&format::header(manifest_at)).await.map_err(io)?;
    out.flush().await.map_err(io)?;
    out.sync_all().await.map_err(io)?;
    tmp.persist(path).map_err(|e| Error::from_io(path, e.error))?;

    let file_len = offset + manifest_at.len;
    Ok(Written {
        extents,
        manifest: manifest_at,
        file_len,
        bytes: file_len,
        file: Some(out),
    })
}

/// Append the payloads still in memory and a new manifest after
/// `file_len`, then point the header at that manifest.
///
/// Until the header is rewritten the file still reads as before.
async fn write_append(path: &Path, root: &Group, file_len: u64) -> Result<Written> {
    let io = |e| Error::from_io(path, e);
    let mut tail = Vec::new();
    let mut extents = Vec::new();
    for block in format::blocks(root, false) {
        let rows = block.rows();
        let bytes = match block {
            Block::Segment(batch) => format::encode_segment(&batch)?,
            Block::Bytes(bytes) => bytes,
            Block::Copy(extent) => {
                return Err(Error::corrupt(path, format!("unexpected copy of {extent:?}")));
            }
        };
        extents.push(Extent {
            offset: file_len + tail.len() as u64,
            len: bytes.len() as u64,
            rows,
        });
        tail.extend_from_slice(&bytes);
    }
    let manifest = format::encode_manifest(path, root, false, &extents)?;
    let manifest_at = Extent {
        offset: file_len + tail.len() as u64,
        len: manifest.len() as u64,
        rows: 0,
    };
    tail.extend_from_slice(&manifest);

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .await
        .map_err(io)?;
    file.seek(SeekFrom::Start(file_len)).await.map_err(io)?;
    file.write_all(&tail).await.map_err(io)?;
    file.flush().await.map_err(io)?;
    file.sync_data().await.map_err(io)?;
    let header = format::header(manifest_at);
    file.seek(SeekFrom::Start(0)).await.map_err(io)?;
    file.write_all(&header).await.map_err(io)?;
    file.flush().await.map_err(io)?;
    file.sync_data().await.map_err(io)?;

    Ok(Written {
        extents,
        manifest: manifest_at,
        file_len: file_len + tail.len() as u64,
        bytes: (tail.len() + header.len()) as u64,
        file: None,
    })
}

#[async_trait]
impl Store for Container {
    fn path(&self) -> &Path {
        &self.path
    }

    fn mode(&self) -> OpenMode {
        self.mode
    }

    async fn get_node(&self, target: &str) -> Result<Option<NodeDescriptor>> {
        let state = self.state().await?;
        if target == ROOT {
            return Ok(Some(NodeDescriptor {
                path: ROOT.to_string(),
                name: String::new(),
                kind: NodeKind::Root,
                rows: None,
                attributes: state.root.attributes.clone(),
            }));
        }
        Ok(state.root.lookup(target)?.map(|entry| NodeDescriptor {
            path: target.to_string(),
            name: path::basename(target).unwrap_or_default().to_string(),
            kind: entry.kind(),
            rows: entry.rows(),
            attributes: entry.attributes().clone(),
        }))
    }

    async fn list_children(&self, group: &str) -> Result<Vec<ChildEntry>> {
        let state = self.state().await?;
        let group = state.root.group(group)?;
        Ok(group
            .children
            .iter()
            .filter(|(name, _)| !path::is_hidden(name))
            .map(|(name, entry)| ChildEntry::new(name.clone(), entry.kind()))
            .collect())
    }

    async fn create_group(&self, parent: &str, name: &str) -> Result<()> {
        let mut state = self.writable_state().await?;
        state.insert(parent, name, Entry::Group(Group::default()), false)
    }

    async fn create_table(&self, parent: &str, name: &str, schema: SchemaRef) -> Result<()> {
        let mut state = self.writable_state().await?;
        state.insert(parent, name, Entry::Table(Dataset::new(schema)), false)
    }

    async fn create_array(&self, parent: &str, name: &str, values: ArrayRef) -> Result<()> {
        let mut state = self.writable_state().await?;
        let schema = Arc::new(Schema::new(vec![Field::new(
            ARRAY_COLUMN,
            values.data_type().clone(),
            values.null_count() > 0,
        )]));
        let mut ds = Dataset::new(schema.clone());
        ds.push(&RecordBatch::try_new(schema, vec![values])?);
        state.insert(parent, name, Entry::Array(ds), false)
    }

    async fn move_node(
        &self,
        src: &str,
        dst_parent: &str,
        dst_name: &str,
        overwrite: bool,
    ) -> Result<()> {
        let mut state = self.writable_state().await?;
        let dst = path::join(dst_parent, dst_name);
        if dst == src {
            return Ok(());
        }
        split(src)?;
        if state.root.lookup(src)?.is_none() {
            return Err(Error::not_found(src));
        }
        // Neither into itself nor by overwriting one of its ancestors.
        if path::is_within(dst_parent, src) || path::is_within(src, &dst) {
            return Err(Error::InvalidMove {
                src: src.to_string(),
                dst,
            });
        }
        check_name(dst_name)?;
        let target = state.root.group(dst_parent)?;
        if target.children.contains_key(dst_name) && !overwrite {
            return Err(Error::already_exists(dst));
        }
        let entry = state.take(src)?;
        state.insert(dst_parent, dst_name, entry, overwrite)
    }

    async fn export(&self, target: &str) -> Result<Subtree> {
        let mut guard = self.state().await?;
        let state = &mut *guard;
        let mut entry = if target == ROOT {
            Entry::Group(state.root.clone())
        } else {
            state
                .root
                .lookup(target)?
                .cloned()
                .ok_or_else(|| Error::not_found(target))?
        };
        let stored: Vec<Extent> = entry.slots().iter().filter_map(Slot::stored).collect();
        let mut bytes = Vec::with_capacity(stored.len());
        for extent in stored {
            bytes.push(read_extent(&mut state.file, &self.path, extent).await?);
        }
        entry.load_stored(&self.path, bytes)?;
        Ok(Subtree(entry))
    }

    async fn import(
        &self,
        parent: &str,
        name: &str,
        subtree: Subtree,
        overwrite: bool,
    ) -> Result<()> {
        let mut state = self.writable_state().await?;
        state.insert(parent, name, subtree.0, overwrite)
    }

    async fn remove_node(&self, target: &str, recursive: bool) -> Result<()> {
        let mut state = self.writable_state().await?;
        split(target)?;
        match state.root.lookup(target)? {
            None => return Err(Error::not_found(target)),
            Some(Entry::Group(g)) if !recursive && !g.children.is_empty() => {
                return Err(Error::NotEmpty(target.to_string()));
            }
            Some(_) => {}
        }
        state.take(target).map(|_| ())
    }

    async fn schema(&self, dataset: &str) -> Result<SchemaRef> {
        let state = self.state().await?;
        Ok(state.root.dataset(dataset)?.schema.clone())
    }

    async fn num_rows(&self, dataset: &str) -> Result<usize> {
        let state = self.state().await?;
        Ok(state.root.dataset(dataset)?.num_rows())
    }

    async fn read_rows(&self, dataset: &str, start: usize, stop: usize) -> Result<RecordBatch> {
        let mut guard = self.state().await?;
        let state = &mut *guard;
        let ds = state.root.dataset(dataset)?;
        let mut pieces = Vec::new();
        for (segment, offset, len) in ds.overlapping(start, stop) {
            let batch = match segment {
                Payload::Loaded(batch) => batch.clone(),
                Payload::Stored(extent) => {
                    let bytes = read_extent(&mut state.file, &self.path, *extent).await?;
                    format::decode_segment(&self.path, &bytes)?
                }
            };
            pieces.push(batch.slice(offset, len));
        }
        Ok(concat_batches(&ds.schema, &pieces)?)
    }

    async fn append_rows(&self, dataset: &str, rows: &RecordBatch) -> Result<()> {
        let mut state = self.writable_state().await?;
        let ds = state.root.dataset_mut(dataset)?;
        if ds.schema.fields() != rows.schema().fields() {
            return Err(Error::SchemaMismatch {
                table: dataset.to_string(),
                message: format!("expected {:?}, got {:?}", ds.schema, rows.schema()),
            });
        }
        if rows.num_rows() == 0 {
            return Ok(());
        }
        ds.push(rows);
        state.dirty = true;
        Ok(())
    }

    async fn set_attribute(&self, target: &str, key: &str, value: &str) -> Result<()> {
        let mut state = self.writable_state().await?;
        let attrs = if target == ROOT {
            &mut state.root.attributes
        } else {
            state
                .root
                .lookup_mut(target)?
                .ok_or_else(|| Error::not_found(target))?
                .attributes_mut()
        };
        attrs.insert(key.to_string(), value.to_string());
        state.dirty = true;
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let mut guard = self.state().await?;
        let state = &mut *guard;
        if !self.mode.is_writable() || !state.dirty {
            return Ok(());
        }
        let full = state.needs_rewrite();
        let written = if full {
            write_full(&self.path, &state.root, Some(&mut state.file)).await?
        } else {
            write_append(&self.path, &state.root, state.file_len).await?
        };
        format::commit(&mut state.root, full, &written.extents);
        if let Some(file) = written.file {
            state.file = file;
        }
        state.file_len = written.file_len;
        state.manifest = written.manifest;
        state.bytes_written += written.bytes;
        state.dirty = false;
        let how = if full { "rewrite" } else { "append" };
        log_debug!(
            "flushed {path}: {bytes} bytes, {segments} payloads ({how})",
            path: self.path.display().to_string(),
            bytes: written.bytes,
            segments: written.extents.len(),
            how: how
        );
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.flush().await?;
        let mut state = self.state().await?;
        state.closed = true;
        log_debug!(
            "closed container {path} after writing {bytes} bytes",
            path: self.path.display().to_string(),
            bytes: state.bytes_written
        );
        Ok(())
    }
}
