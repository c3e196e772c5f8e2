// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use diagnostics::log_debug;
use grove::{OpenMode, Workspace};

use crate::common::{GroveContext, Location, finish, locate};

pub async fn mkdir_command<F>(ctx: &GroveContext, at: &Location, mut handler: F) -> Result<()>
where
    F: FnMut(&str),
{
    log_debug!("mkdir_command {at}", at: at.to_string());
    let mut ws = ctx.workspace().await?;
    let result = mkdir_impl(&mut ws, ctx, at).await;
    let created = finish(ws, result).await?;
    handler(&format!("Created group {}:{created}", at.file.display()));
    Ok(())
}

async fn mkdir_impl(ws: &mut Workspace, ctx: &GroveContext, at: &Location) -> Result<String> {
    let name = at.name()?;
    let parent = Location::new(&at.file, at.parent());
    let (_, parent) = locate(ws, &parent, OpenMode::Append).await?;
    let mut resolver = ctx.resolver();
    let group = ws.create_group(parent, name, resolver.as_mut()).await?;
    Ok(ws.tree().node(group)?.path().to_string())
}
