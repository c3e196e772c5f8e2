// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use grove::{OpenMode, Workspace};

use crate::common::{GroveContext, Location, finish, locate};

/// Delete a node and everything below it.
pub async fn remove_command<F>(ctx: &GroveContext, at: &Location, mut handler: F) -> Result<()>
where
    F: FnMut(&str),
{
    let mut ws = ctx.workspace().await?;
    let result = remove_impl(&mut ws, at).await;
    finish(ws, result).await?;
    handler(&format!("Removed {at}"));
    Ok(())
}

async fn remove_impl(ws: &mut Workspace, at: &Location) -> Result<()> {
    let (_, node) = locate(ws, at, OpenMode::Append).await?;
    ws.delete(node).await?;
    Ok(())
}
