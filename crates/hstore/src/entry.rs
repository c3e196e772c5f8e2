// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! In-memory form of a container's hierarchy.
//!
//! Table segments and opaque payloads are either held in memory or point
//! at their bytes in the store's file. Flushed payloads are dropped from
//! memory and read back on demand.

use arrow_array::RecordBatch;
use arrow_schema::SchemaRef;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Error, Result};
use crate::format::{self, Extent};
use crate::node::{Attributes, NodeKind};
use crate::path::components;

/// Largest number of rows kept in one table segment.
pub(crate) const SEGMENT_ROWS: usize = 65_536;

/// A group: named children plus attributes.
#[derive(Debug, Clone, Default)]
pub struct Group {
    pub(crate) children: BTreeMap<String, Entry>,
    pub(crate) attributes: Attributes,
}

/// Where a payload's bytes are.
#[derive(Debug, Clone)]
pub(crate) enum Payload<T> {
    /// In memory only.
    Loaded(T),
    /// In the store's file.
    Stored(Extent),
}

impl<T> Payload<T> {
    pub(crate) fn is_loaded(&self) -> bool {
        matches!(self, Payload::Loaded(_))
    }
}

/// Tabular payload shared by tables and arrays.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub(crate) schema: SchemaRef,
    pub(crate) segments: Vec<Payload<RecordBatch>>,
    pub(crate) attributes: Attributes,
}

#[derive(Debug, Clone)]
pub enum Entry {
    Group(Group),
    Table(Dataset),
    Array(Dataset),
    Opaque {
        payload: Payload<Vec<u8>>,
        attributes: Attributes,
    },
}

/// A payload slot, visited in file order.
pub(crate) enum Slot<'a> {
    Rows(&'a Payload<RecordBatch>),
    Bytes(&'a Payload<Vec<u8>>),
}

pub(crate) enum SlotMut<'a> {
    Rows(&'a mut Payload<RecordBatch>),
    Bytes(&'a mut Payload<Vec<u8>>),
}

impl Slot<'_> {
    pub(crate) fn stored(&self) -> Option<Extent> {
        match self {
            Slot::Rows(Payload::Stored(e)) | Slot::Bytes(Payload::Stored(e)) => Some(*e),
            _ => None,
        }
    }
}

/// A detached copy of a node and everything below it.
///
/// Produced by `Store::export` and consumed by `Store::import`; this is
/// how nodes travel between two stores. Every payload of a subtree is in
/// memory.
#[derive(Debug, Clone)]
pub struct Subtree(pub(crate) Entry);

impl Subtree {
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        self.0.kind()
    }

    /// Number of nodes in the subtree, itself included.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.0.node_count()
    }

    /// Drop the children of a group, keeping its attributes.
    #[must_use]
    pub fn shallow(self) -> Self {
        match self.0 {
            Entry::Group(g) => Subtree(Entry::Group(Group {
                children: BTreeMap::new(),
                attributes: g.attributes,
            })),
            other => Subtree(other),
        }
    }

    /// Drop hidden children at every level.
    #[must_use]
    pub fn without_hidden(self) -> Self {
        fn strip(entry: Entry) -> Entry {
            match entry {
                Entry::Group(g) => Entry::Group(Group {
                    children: g
                        .children
                        .into_iter()
                        .filter(|(name, _)| !crate::path::is_hidden(name))
                        .map(|(name, child)| (name, strip(child)))
                        .collect(),
                    attributes: g.attributes,
                }),
                other => other,
            }
        }
        Subtree(strip(self.0))
    }
}

impl Group {
    pub(crate) fn lookup(&self, path: &str) -> Result<Option<&Entry>> {
        let parts = components(path)?;
        let Some((last, init)) = parts.split_last() else {
            return Ok(None);
        };
        let mut group = self;
        for part in init {
            match group.children.get(*part) {
                Some(Entry::Group(g)) => group = g,
                Some(_) | None => return Ok(None),
            }
        }
        Ok(group.children.get(*last))
    }

    pub(crate) fn lookup_mut(&mut self, path: &str) -> Result<Option<&mut Entry>> {
        let parts = components(path)?;
        let Some((last, init)) = parts.split_last() else {
            return Ok(None);
        };
        let mut group = self;
        for part in init {
            match group.children.get_mut(*part) {
                Some(Entry::Group(g)) => group = g,
                Some(_) | None => return Ok(None),
            }
        }
        Ok(group.children.get_mut(*last))
    }

    /// Resolve `path` to a group, treating `/` as `self`.
    pub(crate) fn group(&self, path: &str) -> Result<&Group> {
        if components(path)?.is_empty() {
            return Ok(self);
        }
        match self.lookup(path)? {
            Some(Entry::Group(g)) => Ok(g),
            Some(_) => Err(Error::not_a_group(path)),
            None => Err(Error::not_found(path)),
        }
    }

    pub(crate) fn group_mut(&mut self, path: &str) -> Result<&mut Group> {
        if components(path)?.is_empty() {
            return Ok(self);
        }
        match self.lookup_mut(path)? {
            Some(Entry::Group(g)) => Ok(g),
            Some(_) => Err(Error::not_a_group(path)),
            None => Err(Error::not_found(path)),
        }
    }

    pub(crate) fn dataset(&self, path: &str) -> Result<&Dataset> {
        match self.lookup(path)? {
            Some(Entry::Table(d) | Entry::Array(d)) => Ok(d),
            Some(_) => Err(Error::not_a_dataset(path)),
            None => Err(Error::not_found(path)),
        }
    }

    pub(crate) fn dataset_mut(&mut self, path: &str) -> Result<&mut Dataset> {
        match self.lookup_mut(path)? {
            Some(Entry::Table(d) | Entry::Array(d)) => Ok(d),
            Some(_) => Err(Error::not_a_dataset(path)),
            None => Err(Error::not_found(path)),
        }
    }

    /// Every payload below this group, in name order.
    pub(crate) fn slots(&self) -> Vec<Slot<'_>> {
        let mut out = Vec::new();
        for entry in self.children.values() {
            entry.collect_slots(&mut out);
        }
        out
    }

    /// Same order as [`Group::slots`].
    pub(crate) fn slots_mut(&mut self) -> Vec<SlotMut<'_>> {
        let mut out = Vec::new();
        for entry in self.children.values_mut() {
            entry.collect_slots_mut(&mut out);
        }
        out
    }
}

impl Dataset {
    pub(crate) fn new(schema: SchemaRef) -> Self {
        Self {
            schema,
            segments: Vec::new(),
            attributes: Attributes::new(),
        }
    }

    /// Append `rows` in memory, split into segments of at most `SEGMENT_ROWS`.
    pub(crate) fn push(&mut self, rows: &RecordBatch) {
        let total = rows.num_rows();
        let mut offset = 0;
        while offset < total {
            let len = SEGMENT_ROWS.min(total - offset);
            self.segments.push(Payload::Loaded(rows.slice(offset, len)));
            offset += len;
        }
    }

    pub(crate) fn num_rows(&self) -> usize {
        self.segments.iter().map(segment_rows).sum()
    }

    /// Segments overlapping rows `[start, stop)`, each with the offset and
    /// length of the overlap inside it.
    pub(crate) fn overlapping(
        &self,
        start: usize,
        stop: usize,
    ) -> Vec<(&Payload<RecordBatch>, usize, usize)> {
        let mut pieces = Vec::new();
        let mut offset = 0;
        for segment in &self.segments {
            if offset >= stop {
                break;
            }
            let len = segment_rows(segment);
            let lo = start.max(offset);
            let hi = stop.min(offset + len);
            if lo < hi {
                pieces.push((segment, lo - offset, hi - lo));
            }
            offset += len;
        }
        pieces
    }
}

fn segment_rows(segment: &Payload<RecordBatch>) -> usize {
    match segment {
        Payload::Loaded(batch) => batch.num_rows(),
        Payload::Stored(extent) => usize::try_from(extent.rows).unwrap_or(usize::MAX),
    }
}

impl Entry {
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        match self {
            Entry::Group(_) => NodeKind::Group,
            Entry::Table(_) => NodeKind::Table,
            Entry::Array(_) => NodeKind::Array,
            Entry::Opaque { .. } => NodeKind::Other,
        }
    }

    pub(crate) fn attributes(&self) -> &Attributes {
        match self {
            Entry::Group(g) => &g.attributes,
            Entry::Table(d) | Entry::Array(d) => &d.attributes,
            Entry::Opaque { attributes, .. } => attributes,
        }
    }

    pub(crate) fn attributes_mut(&mut self) -> &mut Attributes {
        match self {
            Entry::Group(g) => &mut g.attributes,
            Entry::Table(d) | Entry::Array(d) => &mut d.attributes,
            Entry::Opaque { attributes, .. } => attributes,
        }
    }

    pub(crate) fn rows(&self) -> Option<usize> {
        match self {
            Entry::Table(d) | Entry::Array(d) => Some(d.num_rows()),
            _ => None,
        }
    }

    fn node_count(&self) -> usize {
        match self {
            Entry::Group(g) => 1 + g.children.values().map(Entry::node_count).sum::<usize>(),
            _ => 1,
        }
    }

    pub(crate) fn slots(&self) -> Vec<Slot<'_>> {
        let mut out = Vec::new();
        self.collect_slots(&mut out);
        out
    }

    fn collect_slots<'a>(&'a self, out: &mut Vec<Slot<'a>>) {
        match self {
            Entry::Group(g) => {
                for child in g.children.values() {
                    child.collect_slots(out);
                }
            }
            Entry::Table(d) | Entry::Array(d) => out.extend(d.segments.iter().map(Slot::Rows)),
            Entry::Opaque { payload, .. } => out.push(Slot::Bytes(payload)),
        }
    }

    fn collect_slots_mut<'a>(&'a mut self, out: &mut Vec<SlotMut<'a>>) {
        match self {
            Entry::Group(g) => {
                for child in g.children.values_mut() {
                    child.collect_slots_mut(out);
                }
            }
            Entry::Table(d) | Entry::Array(d) => {
                out.extend(d.segments.iter_mut().map(SlotMut::Rows));
            }
            Entry::Opaque { payload, .. } => out.push(SlotMut::Bytes(payload)),
        }
    }

    /// Replace stored payloads with `bytes`, read from `path` in the order
    /// of [`Entry::slots`].
    pub(crate) fn load_stored(
        &mut self,
        path: &Path,
        bytes: impl IntoIterator<Item = Vec<u8>>,
    ) -> Result<()> {
        let mut bytes = bytes.into_iter();
        let mut slots = Vec::new();
        self.collect_slots_mut(&mut slots);
        for slot in slots {
            match slot {
                SlotMut::Rows(p) if !p.is_loaded() => {
                    let raw = bytes
                        .next()
                        .ok_or_else(|| Error::corrupt(path, "missing segment bytes"))?;
                    *p = Payload::Loaded(format::decode_segment(path, &raw)?);
                }
                SlotMut::Bytes(p) if !p.is_loaded() => {
                    let raw = bytes
                        .next()
                        .ok_or_else(|| Error::corrupt(path, "missing payload bytes"))?;
                    *p = Payload::Loaded(raw);
                }
                SlotMut::Rows(_) | SlotMut::Bytes(_) => {}
            }
        }
        Ok(())
    }
}
