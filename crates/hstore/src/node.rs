// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Node attributes: small string key/value pairs stored with the node.
pub type Attributes = BTreeMap<String, String>;

/// Kind of node stored in a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Root,
    Group,
    Table,
    Array,
    /// A leaf kind this version does not interpret; its payload is carried opaquely.
    Other,
}

impl NodeKind {
    #[must_use]
    pub fn is_group(self) -> bool {
        matches!(self, NodeKind::Root | NodeKind::Group)
    }

    #[must_use]
    pub fn is_leaf(self) -> bool {
        !self.is_group()
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeKind::Root => "root",
            NodeKind::Group => "group",
            NodeKind::Table => "table",
            NodeKind::Array => "array",
            NodeKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// Mode a store was opened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpenMode {
    ReadOnly,
    Append,
}

impl OpenMode {
    #[must_use]
    pub fn is_writable(self) -> bool {
        self == OpenMode::Append
    }

    /// Single-letter form used in persisted session records.
    #[must_use]
    pub fn as_flag(self) -> &'static str {
        match self {
            OpenMode::ReadOnly => "r",
            OpenMode::Append => "a",
        }
    }

    #[must_use]
    pub fn from_flag(flag: &str) -> Option<Self> {
        match flag {
            "r" => Some(OpenMode::ReadOnly),
            "a" => Some(OpenMode::Append),
            _ => None,
        }
    }
}

impl std::fmt::Display for OpenMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpenMode::ReadOnly => f.write_str("read-only"),
            OpenMode::Append => f.write_str("append"),
        }
    }
}

/// What `get_node` reports about a node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeDescriptor {
    pub path: String,
    pub name: String,
    pub kind: NodeKind,
    /// Row count for tables and arrays.
    pub rows: Option<usize>,
    pub attributes: Attributes,
}

/// One entry of `list_children`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildEntry {
    pub name: String,
    pub kind: NodeKind,
}

impl ChildEntry {
    pub fn new<S: Into<String>>(name: S, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}
