// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use anyhow::{Result, anyhow};
use diagnostics::log_debug;
use std::path::Path;

use crate::common::{CollisionPolicy, GroveContext, finish};

/// Create a new, empty container file.
///
/// An existing file is only replaced with `--overwrite`.
pub async fn init_command<F>(ctx: &GroveContext, file: &Path, mut handler: F) -> Result<()>
where
    F: FnMut(&str),
{
    log_debug!("init_command {file}", file: file.display().to_string());
    if file.exists() && ctx.policy != CollisionPolicy::Overwrite {
        return Err(anyhow!(
            "{} already exists (use --overwrite to replace it)",
            file.display()
        ));
    }

    let mut ws = ctx.workspace().await?;
    let result = ws.create(file).await.map_err(anyhow::Error::from);
    finish(ws, result).await?;
    handler(&format!("Created {}", file.display()));
    Ok(())
}
