// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Browse, restructure and filter hierarchical container files.
//!
//! [`Workspace`] is the entry point. It ties together the registry of open
//! stores (with the session's scratch store), a lazily populated
//! [`TreeProjection`] of their hierarchies, the [`MutationEngine`] for
//! copy/cut/paste/rename/delete/move, and the [`QueryExecutor`] that
//! filters tables into new tables in the scratch store.

pub mod cells;
pub mod collision;
pub mod config;
mod error;
pub mod mutation;
pub mod predicate;
pub mod query;
pub mod registry;
pub mod session;
pub mod staging;
pub mod tree;
mod workspace;

pub use cells::{CellFormatter, FormatterChain, TimestampFormatter};
pub use collision::{
    AutoRename, CancelOnCollision, CollisionContext, CollisionResolver, OverwriteOnCollision,
    Resolution, Scripted,
};
pub use config::GroveConfig;
pub use error::{GroveError, Result};
pub use mutation::{Clipboard, MutationEngine, NoViewers, ViewerHook};
pub use query::{QueryDescriptor, QueryExecutor, QueryOutcome};
pub use registry::{StoreId, StoreRegistry};
pub use session::SessionRecord;
pub use tree::{NodeVariant, TreeEvent, TreeNode, TreeNodeId, TreeObserver, TreeProjection};
pub use workspace::Workspace;

pub use hstore::{NodeKind, OpenMode};
