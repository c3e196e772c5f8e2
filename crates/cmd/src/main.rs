// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use cmd::commands::{self, CatOptions, QueryOptions};
use cmd::common::{CollisionPolicy, GroveContext, Location};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "grove")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    collisions: CollisionArgs,
}

#[derive(Args)]
struct CollisionArgs {
    /// Replace an existing node (or file) with the same name
    #[arg(long, global = true, conflicts_with = "auto_rename")]
    overwrite: bool,

    /// Pick a free name like `name_1` instead of failing
    #[arg(long, global = true)]
    auto_rename: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new, empty container file
    Init {
        file: PathBuf,
    },
    /// List the children of a group
    Ls {
        /// FILE or FILE:/group
        location: String,
        #[arg(short, long)]
        recursive: bool,
    },
    /// Create a group
    Mkdir {
        /// FILE:/parent/name
        location: String,
    },
    /// Copy a node under another group
    Cp {
        /// FILE:/node
        source: String,
        /// FILE:/group
        dest: String,
        /// Name for the copy
        #[arg(long)]
        name: Option<String>,
    },
    /// Move a node under another group
    Mv {
        source: String,
        dest: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// Rename a node in place
    Rename {
        location: String,
        new_name: String,
    },
    /// Delete a node and its subtree
    Rm {
        location: String,
    },
    /// Show a node's kind, schema and attributes
    Describe {
        location: String,
    },
    /// Print a table or array
    Cat {
        /// FILE:/table
        location: String,
        #[arg(long, default_value_t = 0)]
        start: usize,
        #[arg(long)]
        stop: Option<usize>,
        /// Column of epoch seconds to show as timestamps (repeatable)
        #[arg(long = "time-column")]
        time_columns: Vec<String>,
    },
    /// Filter a table's rows into a new table
    Query(QueryArgs),
}

#[derive(Args)]
struct QueryArgs {
    /// FILE:/table
    location: String,
    /// SQL boolean expression over the table's columns
    condition: String,
    /// Result name (defaults to `<table>_filtered`)
    #[arg(long)]
    name: Option<String>,
    #[arg(long, default_value_t = 0)]
    start: usize,
    #[arg(long)]
    stop: Option<usize>,
    #[arg(long, default_value_t = 1)]
    step: usize,
    /// Add a column with each row's source offset
    #[arg(long, num_args = 0..=1, default_missing_value = "")]
    index_column: Option<String>,
    /// Bind ALIAS=COLUMN for use in the condition (repeatable)
    #[arg(long = "var", value_parser = commands::parse_binding)]
    variables: Vec<(String, String)>,
    /// FILE:/group to move the result into
    #[arg(long)]
    into: Option<String>,
}

impl QueryArgs {
    fn options(&self) -> Result<QueryOptions> {
        let mut options = QueryOptions::new(self.condition.clone());
        options.name = self.name.clone();
        options.start = self.start;
        options.stop = self.stop;
        options.step = self.step;
        options.index_column = self.index_column.clone();
        options.variables = self.variables.clone();
        options.into = self.into.as_deref().map(Location::parse).transpose()?;
        Ok(options)
    }
}

#[allow(clippy::print_stdout)]
fn print_line(line: &str) {
    println!("{line}");
}

#[tokio::main]
async fn main() -> Result<()> {
    diagnostics::init_diagnostics();

    let cli = Cli::parse();
    let policy = CollisionPolicy::from_flags(cli.collisions.overwrite, cli.collisions.auto_rename);
    let ctx = GroveContext::from_env(policy)?;

    match &cli.command {
        Commands::Init { file } => commands::init_command(&ctx, file, print_line).await,
        Commands::Ls { location, recursive } => {
            commands::list_command(&ctx, &Location::parse(location)?, *recursive, print_line).await
        }
        Commands::Mkdir { location } => {
            commands::mkdir_command(&ctx, &Location::parse(location)?, print_line).await
        }
        Commands::Cp { source, dest, name } => {
            let (src, dst) = (Location::parse(source)?, Location::parse(dest)?);
            commands::copy_command(&ctx, &src, &dst, name.as_deref(), print_line).await
        }
        Commands::Mv { source, dest, name } => {
            let (src, dst) = (Location::parse(source)?, Location::parse(dest)?);
            commands::move_command(&ctx, &src, &dst, name.as_deref(), print_line).await
        }
        Commands::Rename { location, new_name } => {
            commands::rename_command(&ctx, &Location::parse(location)?, new_name, print_line).await
        }
        Commands::Rm { location } => {
            commands::remove_command(&ctx, &Location::parse(location)?, print_line).await
        }
        Commands::Describe { location } => {
            commands::describe_command(&ctx, &Location::parse(location)?, print_line).await
        }
        Commands::Cat {
            location,
            start,
            stop,
            time_columns,
        } => {
            let options = CatOptions {
                start: *start,
                stop: *stop,
                time_columns: time_columns.clone(),
            };
            commands::cat_command(&ctx, &Location::parse(location)?, &options, print_line).await
        }
        Commands::Query(args) => {
            let options = args.options()?;
            commands::query_command(&ctx, &Location::parse(&args.location)?, &options, print_line)
                .await
        }
    }
}
