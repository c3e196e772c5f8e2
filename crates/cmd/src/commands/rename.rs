// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use grove::{OpenMode, Workspace};

use crate::common::{GroveContext, Location, finish, locate};

pub async fn rename_command<F>(
    ctx: &GroveContext,
    at: &Location,
    new_name: &str,
    mut handler: F,
) -> Result<()>
where
    F: FnMut(&str),
{
    let mut ws = ctx.workspace().await?;
    let result = rename_impl(&mut ws, ctx, at, new_name).await;
    let renamed = finish(ws, result).await?;
    handler(&format!("Renamed {at} to {renamed}"));
    Ok(())
}

async fn rename_impl(
    ws: &mut Workspace,
    ctx: &GroveContext,
    at: &Location,
    new_name: &str,
) -> Result<String> {
    let (_, node) = locate(ws, at, OpenMode::Append).await?;
    let mut resolver = ctx.resolver();
    let node = ws.rename(node, new_name, resolver.as_mut()).await?;
    Ok(ws.tree().node(node)?.path().to_string())
}
