// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use anyhow::{Result, anyhow};
use grove::{NodeKind, OpenMode, Workspace};

use crate::common::{GroveContext, Location, finish, open_store};

/// Describe command - shows a node's kind, size, attributes and schema.
pub async fn describe_command<F>(ctx: &GroveContext, at: &Location, mut handler: F) -> Result<()>
where
    F: FnMut(&str),
{
    let mut ws = ctx.workspace().await?;
    let result = describe_impl(&mut ws, at).await;
    let output = finish(ws, result).await?;
    handler(&output);
    Ok(())
}

async fn describe_impl(ws: &mut Workspace, at: &Location) -> Result<String> {
    let id = open_store(ws, &at.file, OpenMode::ReadOnly).await?;
    let store = ws.store(id)?;
    let node = store
        .get_node(&at.path)
        .await?
        .ok_or_else(|| anyhow!("no node at {at}"))?;

    let mut out = String::new();
    out.push_str(&format!("Path: {}\n", node.path));
    out.push_str(&format!("Kind: {}\n", node.kind));
    out.push_str(&format!("Mode: {}\n", store.mode()));
    if let Some(rows) = node.rows {
        out.push_str(&format!("Rows: {rows}\n"));
    }
    if node.kind.is_group() {
        let children = store.list_children(&at.path).await?;
        out.push_str(&format!("Children: {}\n", children.len()));
    }
    if matches!(node.kind, NodeKind::Table | NodeKind::Array) {
        let schema = store.schema(&at.path).await?;
        out.push_str("Schema:\n");
        for field in schema.fields() {
            let nullable = if field.is_nullable() { " (nullable)" } else { "" };
            out.push_str(&format!("  {}: {}{nullable}\n", field.name(), field.data_type()));
        }
    }
    if !node.attributes.is_empty() {
        out.push_str("Attributes:\n");
        for (key, value) in &node.attributes {
            out.push_str(&format!("  {key} = {value}\n"));
        }
    }
    Ok(out)
}
