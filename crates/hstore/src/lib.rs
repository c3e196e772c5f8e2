// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Hierarchical container files.
//!
//! A container holds a tree of named groups whose leaves are tables
//! (Arrow record batches under one schema) or one-dimensional arrays.
//! [`Store`] is the contract the rest of grove programs against;
//! [`Container`] is the file-backed implementation.

mod container;
mod entry;
mod error;
mod format;
mod node;
pub mod path;
mod store;

pub use container::{ARRAY_COLUMN, Container};
pub use entry::Subtree;
pub use error::{Error, Result};
pub use format::{FORMAT_VERSION, MAGIC};
pub use node::{Attributes, ChildEntry, NodeDescriptor, NodeKind, OpenMode};
pub use store::{Store, copy_node};
