// SPDX-License-Identifier: MIT OR Apache-2.0

//! Import command: JSON interchange files into the drawing store

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use cadgrep::config::Config;
use cadgrep::model::{DrawingMeta, EntityRecord, ParsedDrawing};
use cadgrep::output::{colorize_path, status_mark, use_colors};
use cadgrep::storage::DrawingStore;
use cadgrep::utils::get_root_with_store;

use crate::cli::OutputFormat;
use crate::indexer::scanner::resolve_inputs;

#[derive(Debug, Clone, Serialize)]
pub struct ImportedFile {
    pub path: String,
    pub drawing_id: Option<String>,
    pub entities: usize,
    /// Entity records that failed to deserialize and were skipped.
    pub dropped: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub dry_run: bool,
    pub imported: usize,
    pub failed: usize,
    pub entities: usize,
    pub dropped: usize,
    pub files: Vec<ImportedFile>,
}

/// Interchange file with entities left untyped, so each one is checked on
/// its own.
#[derive(Deserialize)]
struct InterchangeFile {
    meta: DrawingMeta,
    #[serde(default)]
    entities: Vec<serde_json::Value>,
}

/// Reads a drawing, skipping malformed entity records. Returns the drawing
/// and the number of records skipped.
fn read_drawing(path: &Path) -> Result<(ParsedDrawing, usize)> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file: InterchangeFile = serde_json::from_str(&content)
        .with_context(|| format!("Invalid drawing JSON: {}", path.display()))?;

    let mut dropped = 0;
    let mut entities = Vec::with_capacity(file.entities.len());
    for (idx, value) in file.entities.into_iter().enumerate() {
        match serde_json::from_value::<EntityRecord>(value) {
            Ok(entity) => entities.push(entity),
            Err(err) => {
                dropped += 1;
                tracing::debug!("Skipping entity {} in {}: {}", idx, path.display(), err);
            }
        }
    }

    let mut meta = file.meta;
    meta.entity_sampled = entities.len();
    Ok((ParsedDrawing { meta, entities }, dropped))
}

/// Imports each file. With no store the files are only validated.
pub fn import_files(
    inputs: &[PathBuf],
    mut store: Option<&mut DrawingStore>,
    batch_size: usize,
) -> ImportReport {
    let mut report = ImportReport {
        dry_run: store.is_none(),
        ..Default::default()
    };

    for path in inputs {
        let result = read_drawing(path).and_then(|(drawing, dropped)| {
            let id = match store.as_deref_mut() {
                Some(store) => {
                    Some(store.import_drawing(&drawing.meta, &drawing.entities, batch_size)?)
                }
                None => None,
            };
            Ok((id, drawing.entities.len(), dropped))
        });

        match result {
            Ok((drawing_id, entities, dropped)) => {
                if dropped > 0 {
                    tracing::warn!(
                        "Skipped {} malformed entities in {}",
                        dropped,
                        path.display()
                    );
                }
                report.imported += 1;
                report.entities += entities;
                report.dropped += dropped;
                report.files.push(ImportedFile {
                    path: path.display().to_string(),
                    drawing_id,
                    entities,
                    dropped,
                    error: None,
                });
            }
            Err(err) => {
                tracing::warn!("Failed to import {}: {:#}", path.display(), err);
                report.failed += 1;
                report.files.push(ImportedFile {
                    path: path.display().to_string(),
                    drawing_id: None,
                    entities: 0,
                    dropped: 0,
                    error: Some(format!("{:#}", err)),
                });
            }
        }
    }

    report
}

/// Run the import command
pub fn run(input: &str, dry_run: bool, format: OutputFormat) -> Result<()> {
    let inputs: Vec<PathBuf> = resolve_inputs(Path::new(input), &["json"])?;
    if inputs.is_empty() {
        anyhow::bail!("No JSON files found in {}", input);
    }

    let cwd = std::env::current_dir()?;
    let root = get_root_with_store(&cwd);
    let config = Config::load_for(&root);

    let report = if dry_run {
        import_files(&inputs, None, config.import().batch_size())
    } else {
        let mut store = DrawingStore::open_default(&root)?;
        let report = import_files(&inputs, Some(&mut store), config.import().batch_size());
        store.close()?;
        report
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => {
            let use_color = use_colors();
            for file in &report.files {
                match &file.error {
                    None if file.dropped > 0 => println!(
                        "{} {} ({} entities, {} skipped)",
                        status_mark(true, use_color),
                        colorize_path(&file.path, use_color),
                        file.entities,
                        file.dropped
                    ),
                    None => println!(
                        "{} {} ({} entities)",
                        status_mark(true, use_color),
                        colorize_path(&file.path, use_color),
                        file.entities
                    ),
                    Some(error) => println!(
                        "{} {}: {}",
                        status_mark(false, use_color),
                        colorize_path(&file.path, use_color),
                        error
                    ),
                }
            }
            let verb = if report.dry_run { "Validated" } else { "Imported" };
            println!(
                "\n{} {} drawings ({} entities), {} failed",
                verb, report.imported, report.entities, report.failed
            );
        }
    }
    Ok(())
}
