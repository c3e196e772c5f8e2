// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

// Error types for grove operations
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, GroveError>;

#[derive(Debug, thiserror::Error)]
pub enum GroveError {
    // Opening stores
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    #[error("Already open: {}", .0.display())]
    AlreadyOpen(PathBuf),

    #[error("Not a grove container: {}", .0.display())]
    NotAContainer(PathBuf),

    #[error("No open store with id {0}")]
    UnknownStore(u64),

    // Structural mutations
    #[error("No such node: {path} in {}", store.display())]
    NoSuchNode { store: PathBuf, path: String },

    #[error("Store opened read-only, cannot {operation} {path}")]
    ReadOnlyViolation { operation: &'static str, path: String },

    #[error("Name collision on {name:?} under {parent} abandoned")]
    NameCollisionAbandoned { parent: String, name: String },

    #[error("Invalid node name {0:?}")]
    InvalidName(String),

    #[error("Cannot {operation} {path}: {reason}")]
    InvalidTarget {
        operation: &'static str,
        path: String,
        reason: String,
    },

    #[error("Nothing to paste")]
    NothingToPaste,

    // Queries
    #[error("Syntax error in condition {condition:?}: {message}")]
    PredicateSyntax { condition: String, message: String },

    #[error("Condition {condition:?} does not fit the table columns: {message}")]
    PredicateType { condition: String, message: String },

    #[error("Condition {condition:?} failed on rows {start}..{stop}: {message}")]
    PredicateEvaluation {
        condition: String,
        start: usize,
        stop: usize,
        message: String,
    },

    #[error("Writing query result {target} failed: {source}")]
    StoreWrite {
        target: String,
        #[source]
        source: hstore::Error,
    },

    #[error("A query on {0} is already running")]
    QueryAlreadyRunning(String),

    #[error("Not a table: {0}")]
    NotATable(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    // Projection
    #[error("Node {0} is not in the tree")]
    UnknownNode(usize),

    #[error("Reading children of {path} failed: {source}")]
    StoreRead {
        path: String,
        #[source]
        source: hstore::Error,
    },

    // Startup
    #[error("Scratch store unavailable: {0}")]
    ScratchUnavailable(String),

    #[error("Store error: {0}")]
    Store(#[from] hstore::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl GroveError {
    pub fn read_only<S: Into<String>>(operation: &'static str, path: S) -> Self {
        GroveError::ReadOnlyViolation {
            operation,
            path: path.into(),
        }
    }

    pub fn invalid_target<P: Into<String>, R: Into<String>>(
        operation: &'static str,
        path: P,
        reason: R,
    ) -> Self {
        GroveError::InvalidTarget {
            operation,
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Lift an open-time store error into the open taxonomy.
    pub(crate) fn from_open(err: hstore::Error) -> Self {
        match err {
            hstore::Error::FileNotFound(p) => GroveError::NotFound(p),
            hstore::Error::PermissionDenied(p) => GroveError::PermissionDenied(p),
            hstore::Error::NotAContainer(p) => GroveError::NotAContainer(p),
            other => GroveError::Store(other),
        }
    }
}
