// SPDX-License-Identifier: MIT OR Apache-2.0

//! Index builder: parses drawings in parallel and stores them

use anyhow::Result;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use cadgrep::config::Config;
use cadgrep::dxf::{DrawingParser, ParseStats};
use cadgrep::model::ParsedDrawing;
use cadgrep::output::use_colors;
use cadgrep::storage::DrawingStore;

use crate::cli::OutputFormat;
use crate::indexer::embed::{self, EmbedSelection};
use crate::indexer::scanner::DrawingScanner;

/// Outcome of one index run
#[derive(Debug, Default, Clone, Serialize)]
pub struct IndexReport {
    pub scanned: usize,
    pub indexed: usize,
    pub failed: usize,
    pub entities: usize,
    pub dropped_entities: usize,
    pub failures: Vec<IndexFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexFailure {
    pub path: String,
    pub error: String,
}

enum ProcessedDrawing {
    Parsed {
        drawing: Box<ParsedDrawing>,
        stats: ParseStats,
    },
    Failed {
        path: String,
        error: String,
    },
}

/// Parses every drawing under a root into the store
pub struct DrawingIndexer {
    root: PathBuf,
    exclude_paths: Vec<String>,
    max_file_size: u64,
    batch_size: usize,
}

impl DrawingIndexer {
    pub fn new(root: impl AsRef<Path>, config: &Config) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            exclude_paths: config.index().exclude_paths().to_vec(),
            max_file_size: config.index().max_file_size(),
            batch_size: config.import().batch_size(),
        }
    }

    /// Additional exclude patterns (CLI first, then config)
    pub fn with_excludes(mut self, mut patterns: Vec<String>) -> Self {
        patterns.append(&mut self.exclude_paths);
        self.exclude_paths = patterns;
        self
    }

    pub fn build(&self, store: &mut DrawingStore, show_progress: bool) -> Result<IndexReport> {
        let files = DrawingScanner::new(&self.root)
            .with_excludes(self.exclude_paths.clone())
            .with_max_file_size(self.max_file_size)
            .list_files()?;

        let mut report = IndexReport {
            scanned: files.len(),
            ..Default::default()
        };

        let pb = if show_progress {
            ProgressBar::new(files.len() as u64)
        } else {
            ProgressBar::hidden()
        };
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{bar:40.cyan/blue}] {pos}/{len} drawings | Indexing {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##."),
        );

        let (tx, rx) = mpsc::sync_channel::<ProcessedDrawing>(16);
        let batch_size = self.batch_size;

        rayon::scope(|s| {
            let tx_producer = tx.clone();
            let pb_producer = pb.clone();
            let files = &files;
            s.spawn(move |_| {
                files.par_iter().for_each_with(tx_producer, |tx, path| {
                    pb_producer.set_message(path.display().to_string());
                    let processed = match DrawingParser::open(path)
                        .and_then(|stream| stream.collect_drawing())
                    {
                        Ok((drawing, stats)) => ProcessedDrawing::Parsed {
                            drawing: Box::new(drawing),
                            stats,
                        },
                        Err(err) => ProcessedDrawing::Failed {
                            path: path.display().to_string(),
                            error: err.to_string(),
                        },
                    };
                    let _ = tx.send(processed);
                    pb_producer.inc(1);
                });
            });

            drop(tx);
            for msg in rx {
                match msg {
                    ProcessedDrawing::Parsed { drawing, stats } => {
                        match store.import_drawing(&drawing.meta, &drawing.entities, batch_size) {
                            Ok(_) => {
                                report.indexed += 1;
                                report.entities += drawing.entities.len();
                                report.dropped_entities += stats.failure_count();
                            }
                            Err(err) => {
                                tracing::warn!("Failed to store {}: {:#}", drawing.meta.path, err);
                                report.failed += 1;
                                report.failures.push(IndexFailure {
                                    path: drawing.meta.path.clone(),
                                    error: format!("{:#}", err),
                                });
                            }
                        }
                    }
                    ProcessedDrawing::Failed { path, error } => {
                        tracing::warn!("Failed to parse {}: {}", path, error);
                        report.failed += 1;
                        report.failures.push(IndexFailure { path, error });
                    }
                }
            }
        });

        pb.finish_and_clear();

        report.failures.sort_by(|a, b| a.path.cmp(&b.path));
        tracing::info!(
            "Indexed {} of {} drawings ({} entities)",
            report.indexed,
            report.scanned,
            report.entities
        );
        Ok(report)
    }
}

/// Run the index command
pub fn run(
    path: Option<&str>,
    exclude_paths: Vec<String>,
    embeddings: bool,
    format: OutputFormat,
) -> Result<()> {
    let root = path
        .map(PathBuf::from)
        .or_else(|| std::env::current_dir().ok())
        .ok_or_else(|| anyhow::anyhow!("Cannot determine current directory"))?;
    let root = root.canonicalize().unwrap_or(root);

    let config = Config::load_for(&root);
    let mut store = DrawingStore::open_default(&root)?;

    let indexer = DrawingIndexer::new(&root, &config).with_excludes(exclude_paths);
    let report = indexer.build(&mut store, format == OutputFormat::Text)?;

    let embed_report = if embeddings {
        Some(embed::embed_store(
            &mut store,
            &config,
            EmbedSelection::default(),
            format == OutputFormat::Text,
        )?)
    } else {
        None
    };

    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "root": root.display().to_string(),
                "index": report,
                "embeddings": embed_report,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            let use_color = use_colors();
            for failure in &report.failures {
                eprintln!("Warning: failed to index {}: {}", failure.path, failure.error);
            }
            if use_color {
                println!(
                    "{} Indexed {} drawings ({} entities, {} failed)",
                    "✓".green(),
                    report.indexed.to_string().cyan(),
                    report.entities,
                    report.failed.to_string().dimmed()
                );
            } else {
                println!(
                    "Indexed {} drawings ({} entities, {} failed)",
                    report.indexed, report.entities, report.failed
                );
            }
            if report.dropped_entities > 0 {
                println!("  {} malformed entities skipped", report.dropped_entities);
            }
            if let Some(embed_report) = embed_report {
                embed::print_report(&embed_report, use_color);
            }
        }
    }

    store.close()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PLATE: &str = "0\nSECTION\n2\nENTITIES\n0\nLINE\n8\n0\n10\n0\n20\n0\n11\n10\n21\n0\n0\nCIRCLE\n8\nHOLES\n10\n5\n20\n5\n40\n2\n0\nENDSEC\n0\nEOF\n";

    #[test]
    fn indexes_good_drawings_and_reports_bad_ones() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::write(root.join("plate.dxf"), PLATE).unwrap();
        std::fs::write(root.join("broken.dxf"), "0\nSECTION\n2\nENTITIES\n0\nLINE\n").unwrap();

        let config = Config::default();
        let mut store = DrawingStore::open_default(root).unwrap();
        let report = DrawingIndexer::new(root, &config)
            .build(&mut store, false)
            .unwrap();

        assert_eq!(report.scanned, 2);
        assert_eq!(report.indexed, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.entities, 2);
        assert!(report.failures[0].path.ends_with("broken.dxf"));

        let counts = store.counts().unwrap();
        assert_eq!(counts.drawings, 1);
        assert_eq!(counts.entities, 2);
    }

    #[test]
    fn store_failure_skips_only_that_drawing() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let rejected = "0\nSECTION\n2\nENTITIES\n0\nLINE\n8\n0\n10\n0\n20\n0\n11\n1\n21\n1\n0\nTEXT\n8\n0\n10\n0\n20\n0\n1\nREJECT\n0\nENDSEC\n0\nEOF\n";
        std::fs::write(root.join("a.dxf"), PLATE).unwrap();
        std::fs::write(root.join("b.dxf"), rejected).unwrap();
        std::fs::write(root.join("c.dxf"), PLATE).unwrap();

        let mut store = DrawingStore::open_default(root).unwrap();
        rusqlite::Connection::open(DrawingStore::default_path(root))
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_marked BEFORE INSERT ON entities \
                 WHEN NEW.text = 'REJECT' BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        let config = Config::default();
        let report = DrawingIndexer::new(root, &config)
            .build(&mut store, false)
            .unwrap();

        assert_eq!(report.scanned, 3);
        assert_eq!(report.indexed, 2);
        assert_eq!(report.failed, 1);
        assert!(report.failures[0].path.ends_with("b.dxf"));
        assert!(report.failures[0].error.contains("rejected"));

        let counts = store.counts().unwrap();
        assert_eq!(counts.drawings, 2);
        assert_eq!(counts.entities, 4);
    }

    #[test]
    fn reindex_replaces_instead_of_duplicating() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::write(root.join("plate.dxf"), PLATE).unwrap();

        let config = Config::default();
        let mut store = DrawingStore::open_default(root).unwrap();
        let indexer = DrawingIndexer::new(root, &config);
        indexer.build(&mut store, false).unwrap();
        indexer.build(&mut store, false).unwrap();

        let counts = store.counts().unwrap();
        assert_eq!(counts.drawings, 1);
        assert_eq!(counts.entities, 2);
    }
}
