// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use anyhow::{Result, anyhow};
use grove::{FormatterChain, OpenMode, TimestampFormatter, Workspace};

use crate::common::{GroveContext, Location, finish, open_store};

/// Rows read from the store per batch.
const READ_BATCH: usize = 8192;

#[derive(Clone, Debug, Default)]
pub struct CatOptions {
    pub start: usize,
    pub stop: Option<usize>,
    /// Columns holding epoch seconds, shown as timestamps.
    pub time_columns: Vec<String>,
}

/// Print a table or array as tab-separated text with a header line.
pub async fn cat_command<F>(
    ctx: &GroveContext,
    at: &Location,
    options: &CatOptions,
    mut handler: F,
) -> Result<()>
where
    F: FnMut(&str),
{
    let mut ws = ctx.workspace().await?;
    let result = cat_impl(&mut ws, at, options, &mut handler).await;
    finish(ws, result).await
}

async fn cat_impl<F>(
    ws: &mut Workspace,
    at: &Location,
    options: &CatOptions,
    handler: &mut F,
) -> Result<()>
where
    F: FnMut(&str),
{
    let id = open_store(ws, &at.file, OpenMode::ReadOnly).await?;
    let store = ws.store(id)?;
    let node = store
        .get_node(&at.path)
        .await?
        .ok_or_else(|| anyhow!("no node at {at}"))?;
    if node.kind.is_group() {
        return Err(anyhow!("{at} is a group"));
    }

    let schema = store.schema(&at.path).await?;
    for column in &options.time_columns {
        if schema.field_with_name(column).is_err() {
            return Err(anyhow!("{at} has no column {column}"));
        }
    }
    let chain = FormatterChain::new().with(Box::new(TimestampFormatter::new(
        options.time_columns.iter().cloned(),
    )));

    let header: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
    handler(&header.join("\t"));

    let total = store.num_rows(&at.path).await?;
    let stop = options.stop.map_or(total, |s| s.min(total));
    let mut offset = options.start.min(stop);
    while offset < stop {
        let end = (offset + READ_BATCH).min(stop);
        let batch = store.read_rows(&at.path, offset, end).await?;
        for row in 0..batch.num_rows() {
            handler(&chain.format_row(&batch, row)?.join("\t"));
        }
        offset = end;
    }
    Ok(())
}
