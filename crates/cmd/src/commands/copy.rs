// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use diagnostics::log_debug;
use grove::{OpenMode, Workspace};

use crate::common::{GroveContext, Location, finish, locate};

/// Copy a node (and its subtree) under another group, possibly in another file.
pub async fn copy_command<F>(
    ctx: &GroveContext,
    src: &Location,
    dst: &Location,
    name: Option<&str>,
    mut handler: F,
) -> Result<()>
where
    F: FnMut(&str),
{
    log_debug!("copy_command {src} {dst}", src: src.to_string(), dst: dst.to_string());
    let mut ws = ctx.workspace().await?;
    let result = copy_impl(&mut ws, ctx, src, dst, name).await;
    let placed = finish(ws, result).await?;
    handler(&format!("Copied {src} to {}:{placed}", dst.file.display()));
    Ok(())
}

async fn copy_impl(
    ws: &mut Workspace,
    ctx: &GroveContext,
    src: &Location,
    dst: &Location,
    name: Option<&str>,
) -> Result<String> {
    // Destination first so a shared file is opened writable.
    let (_, target) = locate(ws, dst, OpenMode::Append).await?;
    let (_, node) = locate(ws, src, OpenMode::ReadOnly).await?;
    ws.copy(node)?;
    let mut resolver = ctx.resolver();
    let pasted = ws.paste(target, name, resolver.as_mut()).await?;
    Ok(ws.tree().node(pasted)?.path().to_string())
}
