// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! On-disk container layout.
//!
//! ```text
//! +----------+--------------+--------------+-------------------------------+
//! | MAGIC(8) | manifest off | manifest len | blocks and manifests ...      |
//! +----------+--------------+--------------+-------------------------------+
//! ```
//!
//! The header points at the current manifest, a JSON mirror of the
//! hierarchy. Each table segment is its own Arrow IPC stream block and
//! opaque leaves keep whatever bytes they arrived with. A flush appends
//! new blocks and a new manifest, then repoints the header; bytes no
//! manifest refers to any more are reclaimed by rewriting the file.

use arrow::compute::concat_batches;
use arrow::ipc::reader::StreamReader;
use arrow::ipc::writer::StreamWriter;
use arrow_array::RecordBatch;
use arrow_schema::Schema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use crate::entry::{Dataset, Entry, Group, Payload, Slot, SlotMut};
use crate::error::{Error, Result};
use crate::node::{Attributes, NodeKind};

pub const MAGIC: &[u8; 8] = b"\x89GROVE\r\n";
pub const FORMAT_VERSION: u32 = 1;

pub(crate) const HEADER_LEN: u64 = MAGIC.len() as u64 + 16;

/// A byte range of the file. `rows` is set for table segments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Extent {
    pub offset: u64,
    pub len: u64,
    #[serde(default)]
    pub rows: u64,
}

impl Extent {
    pub(crate) fn end(&self) -> Option<u64> {
        self.offset.checked_add(self.len)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    version: u32,
    root: ManifestNode,
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestNode {
    name: String,
    kind: NodeKind,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    attributes: Attributes,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<ManifestNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    schema: Option<Schema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    segments: Vec<Extent>,
}

/// One payload to write during a flush.
pub(crate) enum Block {
    Segment(RecordBatch),
    Bytes(Vec<u8>),
    /// Already in the file; a rewrite copies it across.
    Copy(Extent),
}

impl Block {
    pub(crate) fn rows(&self) -> u64 {
        match self {
            Block::Segment(batch) => batch.num_rows() as u64,
            Block::Bytes(_) => 0,
            Block::Copy(extent) => extent.rows,
        }
    }
}

/// True when `bytes` starts with the container signature.
#[must_use]
pub fn has_signature(bytes: &[u8]) -> bool {
    bytes.len() >= MAGIC.len() && &bytes[..MAGIC.len()] == MAGIC
}

pub(crate) fn header(manifest: Extent) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN as usize);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&manifest.offset.to_le_bytes());
    out.extend_from_slice(&manifest.len.to_le_bytes());
    out
}

/// Location of the manifest named by a header read from `path`.
pub(crate) fn parse_header(path: &Path, bytes: &[u8]) -> Result<Extent> {
    if !has_signature(bytes) {
        return Err(Error::NotAContainer(path.to_path_buf()));
    }
    if (bytes.len() as u64) < HEADER_LEN {
        return Err(Error::corrupt(path, "truncated header"));
    }
    let word = |at: usize| {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes[at..at + 8]);
        u64::from_le_bytes(buf)
    };
    Ok(Extent {
        offset: word(MAGIC.len()),
        len: word(MAGIC.len() + 8),
        rows: 0,
    })
}

pub(crate) fn encode_segment(batch: &RecordBatch) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    {
        let mut writer = StreamWriter::try_new(&mut buf, &batch.schema())?;
        writer.write(batch)?;
        writer.finish()?;
    }
    Ok(buf)
}

pub(crate) fn decode_segment(path: &Path, bytes: &[u8]) -> Result<RecordBatch> {
    let reader = StreamReader::try_new(Cursor::new(bytes), None)
        .map_err(|e| Error::corrupt(path, format!("segment: {e}")))?;
    let schema = reader.schema();
    let batches = reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::corrupt(path, format!("segment: {e}")))?;
    Ok(concat_batches(&schema, &batches)?)
}

fn written<T>(payload: &Payload<T>, full: bool) -> bool {
    full || payload.is_loaded()
}

/// Payloads of `root` a flush has to write, in slot order. A full rewrite
/// writes every payload; otherwise only those still in memory.
pub(crate) fn blocks(root: &Group, full: bool) -> Vec<Block> {
    root.slots()
        .into_iter()
        .filter_map(|slot| match slot {
            Slot::Rows(Payload::Loaded(batch)) => Some(Block::Segment(batch.clone())),
            Slot::Bytes(Payload::Loaded(bytes)) => Some(Block::Bytes(bytes.clone())),
            Slot::Rows(Payload::Stored(extent)) | Slot::Bytes(Payload::Stored(extent)) => {
                full.then_some(Block::Copy(*extent))
            }
        })
        .collect()
}

/// Mark the payloads `blocks` returned as stored at `extents`, dropping
/// them from memory.
pub(crate) fn commit(root: &mut Group, full: bool, extents: &[Extent]) {
    let mut extents = extents.iter().copied();
    for slot in root.slots_mut() {
        match slot {
            SlotMut::Rows(p) if written(p, full) => {
                if let Some(extent) = extents.next() {
                    *p = Payload::Stored(extent);
                }
            }
            SlotMut::Bytes(p) if written(p, full) => {
                if let Some(extent) = extents.next() {
                    *p = Payload::Stored(extent);
                }
            }
            SlotMut::Rows(_) | SlotMut::Bytes(_) => {}
        }
    }
}

/// Hands out extents in slot order: freshly written ones for payloads
/// `blocks` returned, existing ones for the rest.
struct Placer<'a> {
    path: &'a Path,
    full: bool,
    extents: std::slice::Iter<'a, Extent>,
}

impl Placer<'_> {
    fn place<T>(&mut self, payload: &Payload<T>) -> Result<Extent> {
        match payload {
            Payload::Stored(extent) if !written(payload, self.full) => Ok(*extent),
            _ => self
                .extents
                .next()
                .copied()
                .ok_or_else(|| Error::corrupt(self.path, "fewer blocks written than payloads")),
        }
    }
}

/// Serialize the manifest of `root` given where `blocks(root, full)` landed.
pub(crate) fn encode_manifest(
    path: &Path,
    root: &Group,
    full: bool,
    extents: &[Extent],
) -> Result<Vec<u8>> {
    let mut placer = Placer {
        path,
        full,
        extents: extents.iter(),
    };
    let manifest = Manifest {
        version: FORMAT_VERSION,
        root: encode_group("", NodeKind::Root, root, &mut placer)?,
    };
    serde_json::to_vec(&manifest)
        .map_err(|e| Error::corrupt(path, format!("manifest encoding: {e}")))
}

fn encode_group(
    name: &str,
    kind: NodeKind,
    group: &Group,
    placer: &mut Placer<'_>,
) -> Result<ManifestNode> {
    let mut children = Vec::with_capacity(group.children.len());
    for (child_name, entry) in &group.children {
        children.push(encode_entry(child_name, entry, placer)?);
    }
    Ok(ManifestNode {
        name: name.to_string(),
        kind,
        attributes: group.attributes.clone(),
        children,
        schema: None,
        segments: Vec::new(),
    })
}

fn encode_entry(name: &str, entry: &Entry, placer: &mut Placer<'_>) -> Result<ManifestNode> {
    let (schema, segments) = match entry {
        Entry::Group(g) => return encode_group(name, NodeKind::Group, g, placer),
        Entry::Table(d) | Entry::Array(d) => {
            let segments = d
                .segments
                .iter()
                .map(|s| placer.place(s))
                .collect::<Result<Vec<_>>>()?;
            (Some(d.schema.as_ref().clone()), segments)
        }
        Entry::Opaque { payload, .. } => (None, vec![placer.place(payload)?]),
    };
    Ok(ManifestNode {
        name: name.to_string(),
        kind: entry.kind(),
        attributes: entry.attributes().clone(),
        children: Vec::new(),
        schema,
        segments,
    })
}

/// Parse the manifest of a `file_len`-byte container at `path`.
pub(crate) fn decode_manifest(path: &Path, bytes: &[u8], file_len: u64) -> Result<Group> {
    let manifest: Manifest = serde_json::from_slice(bytes)
        .map_err(|e| Error::corrupt(path, format!("manifest: {e}")))?;
    if manifest.version > FORMAT_VERSION {
        return Err(Error::corrupt(
            path,
            format!("unsupported format version {}", manifest.version),
        ));
    }
    if manifest.root.kind != NodeKind::Root {
        return Err(Error::corrupt(path, "manifest root is not a root node"));
    }
    decode_group(path, manifest.root, file_len)
}

fn decode_group(path: &Path, node: ManifestNode, file_len: u64) -> Result<Group> {
    let mut group = Group {
        children: BTreeMap::new(),
        attributes: node.attributes,
    };
    for child in node.children {
        if child.name.is_empty() || child.name.contains('/') {
            return Err(Error::corrupt(path, format!("bad node name {:?}", child.name)));
        }
        let name = child.name.clone();
        let entry = decode_entry(path, child, file_len)?;
        if group.children.insert(name.clone(), entry).is_some() {
            return Err(Error::corrupt(path, format!("duplicate node name {name:?}")));
        }
    }
    Ok(group)
}

fn decode_entry(path: &Path, node: ManifestNode, file_len: u64) -> Result<Entry> {
    if node.kind == NodeKind::Group {
        return Ok(Entry::Group(decode_group(path, node, file_len)?));
    }
    for extent in &node.segments {
        match extent.end() {
            Some(end) if extent.offset >= HEADER_LEN && end <= file_len => {}
            _ => {
                return Err(Error::corrupt(
                    path,
                    format!("payload of {:?} out of bounds", node.name),
                ));
            }
        }
    }

    match node.kind {
        NodeKind::Table | NodeKind::Array => {
            let schema = node
                .schema
                .ok_or_else(|| Error::corrupt(path, format!("{:?} has no schema", node.name)))?;
            let mut ds = Dataset::new(Arc::new(schema));
            ds.segments = node.segments.into_iter().map(Payload::Stored).collect();
            ds.attributes = node.attributes;
            Ok(if node.kind == NodeKind::Table {
                Entry::Table(ds)
            } else {
                Entry::Array(ds)
            })
        }
        NodeKind::Other => match node.segments.as_slice() {
            [extent] => Ok(Entry::Opaque {
                payload: Payload::Stored(*extent),
                attributes: node.attributes,
            }),
            _ => Err(Error::corrupt(
                path,
                format!("leaf {:?} needs exactly one payload", node.name),
            )),
        },
        NodeKind::Root | NodeKind::Group => Err(Error::corrupt(
            path,
            format!("unexpected {} node {:?}", node.kind, node.name),
        )),
    }
}
