// SPDX-License-Identifier: MIT OR Apache-2.0

//! CLI argument parsing using clap

use cadgrep::model::EmbeddingKind;
use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// cadgrep - Semantic extraction and similarity search over CAD drawings
///
/// Parses DXF drawings into typed entities, classifies their text, stores
/// them locally and answers free-text similarity queries.
#[derive(Parser, Debug)]
#[command(name = "cadgrep")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true)]
    pub format: Option<OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for results
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Record kind filter for search
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CliKind {
    Drawing,
    Entity,
}

impl From<CliKind> for EmbeddingKind {
    fn from(kind: CliKind) -> Self {
        match kind {
            CliKind::Drawing => EmbeddingKind::Drawing,
            CliKind::Entity => EmbeddingKind::Entity,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Parse DXF drawings into JSON interchange files
    Parse {
        /// DXF file or directory of DXF files
        input: String,

        /// Output directory (defaults to ./parsed)
        #[arg(short, long, default_value = "parsed")]
        output: String,

        /// Also write index.jsonl with one summary line per drawing
        #[arg(long)]
        index: bool,
    },

    /// Analyze one drawing: classified text, dimensions, materials, BOM
    Analyze {
        /// DXF file to analyze
        file: String,

        /// Write the report to a file instead of stdout
        #[arg(short, long)]
        output: Option<String>,

        /// Pretty-print JSON
        #[arg(long)]
        pretty: bool,
    },

    /// Import parsed JSON interchange files into the drawing store
    Import {
        /// JSON file or directory of JSON files
        input: String,

        /// Validate files without writing to the store
        #[arg(long)]
        dry_run: bool,
    },

    /// Scan a directory for DXF drawings, parse and store them
    Index {
        /// Path to index (defaults to current directory)
        #[arg(short, long)]
        path: Option<String>,

        /// Generate embeddings for new records afterwards
        #[arg(long)]
        embeddings: bool,

        /// Paths/patterns to exclude (can be specified multiple times)
        #[arg(long = "exclude", short = 'e')]
        exclude_paths: Vec<String>,
    },

    /// Generate embeddings for stored drawings and entities
    Embed {
        /// Embed entities only
        #[arg(long, conflicts_with_all = ["drawings", "all"])]
        entities: bool,

        /// Embed drawings only
        #[arg(long, conflicts_with = "all")]
        drawings: bool,

        /// Embed drawings and entities (default)
        #[arg(long)]
        all: bool,

        /// Re-embed records that already have a vector
        #[arg(long)]
        force: bool,

        /// Maximum records per kind
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Free-text similarity search over stored drawings and entities
    #[command(visible_alias = "s")]
    Search {
        /// Search query
        query: String,

        /// Maximum number of results (1-100)
        #[arg(short = 'm', long = "max-results")]
        limit: Option<usize>,

        /// Keep only the best hit per drawing
        #[arg(long)]
        per_drawing: bool,

        /// Restrict results to one record kind
        #[arg(long, value_enum)]
        kind: Option<CliKind>,
    },

    /// Show store counts
    Stats,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_search_flags() {
        let cli = Cli::try_parse_from([
            "cadgrep",
            "search",
            "stainless bracket",
            "-m",
            "5",
            "--per-drawing",
            "--kind",
            "drawing",
            "--format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.format, Some(OutputFormat::Json));
        match cli.command {
            Commands::Search {
                query,
                limit,
                per_drawing,
                kind,
            } => {
                assert_eq!(query, "stainless bracket");
                assert_eq!(limit, Some(5));
                assert!(per_drawing);
                assert_eq!(kind, Some(CliKind::Drawing));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn embed_kind_flags_conflict() {
        assert!(Cli::try_parse_from(["cadgrep", "embed", "--entities", "--drawings"]).is_err());
        assert!(Cli::try_parse_from(["cadgrep", "embed", "--force", "--limit", "10"]).is_ok());
    }

    #[test]
    fn parse_defaults_output_dir() {
        let cli = Cli::try_parse_from(["cadgrep", "parse", "drawings/"]).unwrap();
        match cli.command {
            Commands::Parse { output, index, .. } => {
                assert_eq!(output, "parsed");
                assert!(!index);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
