// SPDX-License-Identifier: MIT OR Apache-2.0

//! cadgrep - Semantic extraction and similarity search over CAD drawings
//!
//! Parses DXF drawings into typed entities, classifies their text, stores
//! them in a local SQLite file and ranks them against free-text queries by
//! embedding similarity.

mod cli;
mod indexer;
mod query;

use anyhow::Result;
use cadgrep::config::{Config, ConfigOutputFormat};
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Commands, OutputFormat};
use indexer::embed::EmbedSelection;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Initialize tracing with CADGREP_LOG env var (e.g., CADGREP_LOG=debug cadgrep index)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("CADGREP_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let format = cli.format.unwrap_or_else(|| {
        match Config::load().output_format() {
            Some(ConfigOutputFormat::Json) => OutputFormat::Json,
            _ => OutputFormat::Text,
        }
    });

    match cli.command {
        Commands::Parse {
            input,
            output,
            index,
        } => {
            indexer::parse::run(&input, &output, index, format)?;
        }
        Commands::Analyze {
            file,
            output,
            pretty,
        } => {
            query::analyze::run(&file, output.as_deref(), pretty, format)?;
        }
        Commands::Import { input, dry_run } => {
            indexer::import::run(&input, dry_run, format)?;
        }
        Commands::Index {
            path,
            embeddings,
            exclude_paths,
        } => {
            indexer::index::run(path.as_deref(), exclude_paths, embeddings, format)?;
        }
        Commands::Embed {
            entities,
            drawings,
            all: _,
            force,
            limit,
        } => {
            let selection = EmbedSelection {
                entities_only: entities,
                drawings_only: drawings,
                force,
                limit,
            };
            indexer::embed::run(selection, format)?;
        }
        Commands::Search {
            query,
            limit,
            per_drawing,
            kind,
        } => {
            query::search::run(&query, limit, per_drawing, kind.map(Into::into), format)?;
        }
        Commands::Stats => {
            query::stats::run(format)?;
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "cadgrep", &mut std::io::stdout());
        }
    }

    Ok(())
}
