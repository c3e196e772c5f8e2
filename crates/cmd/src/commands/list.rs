// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use grove::{OpenMode, TreeNodeId, Workspace};

use crate::common::{GroveContext, Location, finish, locate};

/// List the children of a group, one `kind path` line each.
pub async fn list_command<F>(
    ctx: &GroveContext,
    at: &Location,
    recursive: bool,
    mut handler: F,
) -> Result<()>
where
    F: FnMut(&str),
{
    let mut ws = ctx.workspace().await?;
    let result = list_impl(&mut ws, at, recursive).await;
    for line in finish(ws, result).await? {
        handler(&line);
    }
    Ok(())
}

async fn list_impl(ws: &mut Workspace, at: &Location, recursive: bool) -> Result<Vec<String>> {
    let (_, start) = locate(ws, at, OpenMode::ReadOnly).await?;
    let mut lines = Vec::new();
    let mut pending: Vec<TreeNodeId> = vec![start];
    while let Some(group) = pending.pop() {
        ws.expand(group).await?;
        let children = ws.tree().children(group)?.to_vec();
        for child in children.iter().rev() {
            let node = ws.tree().node(*child)?;
            if recursive && node.kind().is_group() {
                pending.push(*child);
            }
        }
        for child in children {
            let node = ws.tree().node(child)?;
            lines.push(format!("{:<6} {}", node.kind().to_string(), node.path()));
        }
    }
    Ok(lines)
}
