// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Hidden groups of the scratch store.
//!
//! The cut slot holds at most one node. The query slot holds results that
//! are still being written; one dataset per running query.

use hstore::{ChildEntry, Store, path};

pub const CUT_GROUP: &str = "/_p_cut_node";
pub const QUERY_GROUP: &str = "/_p_query_results";

/// Create both staging groups if they are missing.
pub async fn prepare(scratch: &dyn Store) -> hstore::Result<()> {
    for group in [CUT_GROUP, QUERY_GROUP] {
        if scratch.get_node(group).await?.is_none() {
            let name = path::basename(group).unwrap_or_default();
            scratch.create_group(path::ROOT, name).await?;
        }
    }
    scratch.flush().await
}

/// Node currently held in the cut slot.
pub async fn staged_cut(scratch: &dyn Store) -> hstore::Result<Option<ChildEntry>> {
    Ok(scratch.list_children(CUT_GROUP).await?.into_iter().next())
}

/// Empty the cut slot. Whatever was there is gone for good.
pub async fn evict_cut(scratch: &dyn Store) -> hstore::Result<Vec<String>> {
    let mut evicted = Vec::new();
    for child in scratch.list_children(CUT_GROUP).await? {
        scratch.remove_node(&cut_path(&child.name), true).await?;
        evicted.push(child.name);
    }
    Ok(evicted)
}

#[must_use]
pub fn cut_path(name: &str) -> String {
    path::join(CUT_GROUP, name)
}

#[must_use]
pub fn query_path(name: &str) -> String {
    path::join(QUERY_GROUP, name)
}
