// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use anyhow::{Result, anyhow};
use diagnostics::log_debug;
use grove::{OpenMode, QueryDescriptor, Workspace};

use crate::common::{GroveContext, Location, finish, locate, open_store};

#[derive(Clone, Debug)]
pub struct QueryOptions {
    pub condition: String,
    pub name: Option<String>,
    pub start: usize,
    pub stop: Option<usize>,
    pub step: usize,
    /// `Some("")` asks for the configured default column name.
    pub index_column: Option<String>,
    /// `alias=column` bindings usable in the condition.
    pub variables: Vec<(String, String)>,
    /// Where to move the result; without it the result lives only as long
    /// as the command.
    pub into: Option<Location>,
}

impl QueryOptions {
    #[must_use]
    pub fn new<S: Into<String>>(condition: S) -> Self {
        Self {
            condition: condition.into(),
            name: None,
            start: 0,
            stop: None,
            step: 1,
            index_column: None,
            variables: Vec::new(),
            into: None,
        }
    }

    fn descriptor(&self) -> QueryDescriptor {
        let mut descriptor = QueryDescriptor::new(self.condition.clone())
            .range(self.start, self.stop)
            .step(self.step);
        if let Some(name) = &self.name {
            descriptor = descriptor.named(name.clone());
        }
        if let Some(index) = &self.index_column {
            descriptor = descriptor.with_index(index.clone());
        }
        for (alias, column) in &self.variables {
            descriptor = descriptor.bind(alias.clone(), column.clone());
        }
        descriptor
    }
}

/// Parse an `alias=column` binding.
pub fn parse_binding(arg: &str) -> Result<(String, String)> {
    match arg.split_once('=') {
        Some((alias, column)) if !alias.is_empty() && !column.is_empty() => {
            Ok((alias.to_string(), column.to_string()))
        }
        _ => Err(anyhow!("expected ALIAS=COLUMN, got {arg:?}")),
    }
}

/// Filter a table into a new table.
pub async fn query_command<F>(
    ctx: &GroveContext,
    table: &Location,
    options: &QueryOptions,
    mut handler: F,
) -> Result<()>
where
    F: FnMut(&str),
{
    log_debug!(
        "query_command {table} where {condition}",
        table: table.to_string(),
        condition: options.condition.clone()
    );
    let mut ws = ctx.workspace().await?;
    let result = query_impl(&mut ws, ctx, table, options).await;
    let line = finish(ws, result).await?;
    handler(&line);
    Ok(())
}

async fn query_impl(
    ws: &mut Workspace,
    ctx: &GroveContext,
    table: &Location,
    options: &QueryOptions,
) -> Result<String> {
    // A destination in the source file needs that file writable.
    if let Some(into) = &options.into {
        open_store(ws, &into.file, OpenMode::Append).await?;
    }
    let source = open_store(ws, &table.file, OpenMode::ReadOnly).await?;
    let mut resolver = ctx.resolver();
    let (outcome, node) = ws
        .query(source, &table.path, &options.descriptor(), resolver.as_mut())
        .await?;

    let Some(into) = &options.into else {
        return Ok(format!("{} rows matched into {}", outcome.rows, outcome.path));
    };
    let (_, target) = locate(ws, into, OpenMode::Append).await?;
    let placed = ws.move_node(node, target, None, resolver.as_mut()).await?;
    Ok(format!(
        "{} rows matched into {}:{}",
        outcome.rows,
        into.file.display(),
        ws.tree().node(placed)?.path()
    ))
}
