// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use diagnostics::log_debug;
use grove::{OpenMode, Workspace};

use crate::common::{GroveContext, Location, finish, locate};

/// Move a node under another group, possibly in another file.
pub async fn move_command<F>(
    ctx: &GroveContext,
    src: &Location,
    dst: &Location,
    name: Option<&str>,
    mut handler: F,
) -> Result<()>
where
    F: FnMut(&str),
{
    log_debug!("move_command {src} {dst}", src: src.to_string(), dst: dst.to_string());
    let mut ws = ctx.workspace().await?;
    let result = move_impl(&mut ws, ctx, src, dst, name).await;
    let placed = finish(ws, result).await?;
    handler(&format!("Moved {src} to {}:{placed}", dst.file.display()));
    Ok(())
}

async fn move_impl(
    ws: &mut Workspace,
    ctx: &GroveContext,
    src: &Location,
    dst: &Location,
    name: Option<&str>,
) -> Result<String> {
    let (_, node) = locate(ws, src, OpenMode::Append).await?;
    let (_, target) = locate(ws, dst, OpenMode::Append).await?;
    let mut resolver = ctx.resolver();
    let moved = ws.move_node(node, target, name, resolver.as_mut()).await?;
    Ok(ws.tree().node(moved)?.path().to_string())
}
