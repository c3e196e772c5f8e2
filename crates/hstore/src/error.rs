// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by a backing store.
///
/// Node paths inside a container are plain `/`-separated strings; file
/// paths on the host are `PathBuf`s.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    #[error("Not a grove container: {}", .0.display())]
    NotAContainer(PathBuf),

    #[error("Corrupt container {}: {message}", path.display())]
    Corrupt { path: PathBuf, message: String },

    #[error("Node not found: {0}")]
    NotFound(String),

    #[error("Not a group: {0}")]
    NotAGroup(String),

    #[error("Not a dataset: {0}")]
    NotADataset(String),

    #[error("Entry already exists: {0}")]
    AlreadyExists(String),

    #[error("Group not empty: {0}")]
    NotEmpty(String),

    #[error("Invalid node path: {0}")]
    InvalidPath(String),

    #[error("Cannot place {src} at {dst}")]
    InvalidMove { src: String, dst: String },

    #[error("The root group cannot be {0}")]
    RootImmutable(&'static str),

    #[error("Store is read-only: {}", .0.display())]
    ReadOnly(PathBuf),

    #[error("Store is closed: {}", .0.display())]
    Closed(PathBuf),

    #[error("Schema mismatch appending to {table}: {message}")]
    SchemaMismatch { table: String, message: String },

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn not_found<S: AsRef<str>>(path: S) -> Self {
        Error::NotFound(path.as_ref().to_string())
    }

    pub fn not_a_group<S: AsRef<str>>(path: S) -> Self {
        Error::NotAGroup(path.as_ref().to_string())
    }

    pub fn not_a_dataset<S: AsRef<str>>(path: S) -> Self {
        Error::NotADataset(path.as_ref().to_string())
    }

    pub fn already_exists<S: AsRef<str>>(path: S) -> Self {
        Error::AlreadyExists(path.as_ref().to_string())
    }

    pub fn invalid_path<S: AsRef<str>>(path: S) -> Self {
        Error::InvalidPath(path.as_ref().to_string())
    }

    pub fn corrupt<P: AsRef<Path>, M: Into<String>>(path: P, message: M) -> Self {
        Error::Corrupt {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }

    /// Classify a host I/O error against the file it concerned.
    pub fn from_io<P: AsRef<Path>>(path: P, source: std::io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        match source.kind() {
            std::io::ErrorKind::NotFound => Error::FileNotFound(path),
            std::io::ErrorKind::PermissionDenied => Error::PermissionDenied(path),
            _ => Error::Io { path, source },
        }
    }
}
