// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parse command: DXF drawings to JSON interchange files

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use cadgrep::dxf::DrawingParser;
use cadgrep::model::ParsedDrawing;
use cadgrep::output::{colorize_path, status_mark, use_colors};

use crate::cli::OutputFormat;
use crate::indexer::scanner::resolve_inputs;

const INDEX_FILE: &str = "index.jsonl";

/// One line of index.jsonl
#[derive(Debug, Clone, Serialize)]
pub struct ParsedFileSummary {
    pub filename: String,
    pub path: String,
    pub output: String,
    pub version: Option<String>,
    pub layer_count: usize,
    pub entity_sampled: usize,
    pub entity_counts: BTreeMap<String, usize>,
    pub dropped_entities: usize,
}

/// Per-file outcome
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ParseOutcome {
    Ok(ParsedFileSummary),
    Fail { path: String, error: String },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ParseReport {
    pub parsed: usize,
    pub failed: usize,
    pub files: Vec<ParseOutcome>,
}

/// Output file for a drawing: `<stem>.json`, then `<stem>-2.json` and so on
/// when several inputs share a stem.
fn output_name(path: &Path, taken: &mut BTreeMap<String, usize>) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "drawing".to_string());
    let seen = taken.entry(stem.clone()).or_insert(0);
    *seen += 1;
    if *seen == 1 {
        format!("{}.json", stem)
    } else {
        format!("{}-{}.json", stem, seen)
    }
}

fn write_drawing(drawing: &ParsedDrawing, target: &Path) -> Result<()> {
    let file = File::create(target)
        .with_context(|| format!("Failed to create {}", target.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, drawing)?;
    writer.flush()?;
    Ok(())
}

/// Parses `inputs` into `output_dir`. A failing file is reported and skipped.
pub fn parse_files(inputs: &[PathBuf], output_dir: &Path, write_index: bool) -> Result<ParseReport> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create directory: {}", output_dir.display()))?;

    let mut report = ParseReport::default();
    let mut taken = BTreeMap::new();
    let mut index_lines = Vec::new();

    for path in inputs {
        let parsed = DrawingParser::open(path).and_then(|stream| stream.collect_drawing());
        let (drawing, stats) = match parsed {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!("Failed to parse {}: {}", path.display(), err);
                report.failed += 1;
                report.files.push(ParseOutcome::Fail {
                    path: path.display().to_string(),
                    error: err.to_string(),
                });
                continue;
            }
        };

        let target = output_dir.join(output_name(path, &mut taken));
        write_drawing(&drawing, &target)?;

        let summary = ParsedFileSummary {
            filename: drawing.meta.filename.clone(),
            path: drawing.meta.path.clone(),
            output: target.display().to_string(),
            version: drawing.meta.version.clone(),
            layer_count: drawing.meta.layer_count,
            entity_sampled: drawing.meta.entity_sampled,
            entity_counts: drawing.meta.entity_counts.clone(),
            dropped_entities: stats.failure_count(),
        };
        if write_index {
            index_lines.push(serde_json::to_string(&summary)?);
        }
        report.parsed += 1;
        report.files.push(ParseOutcome::Ok(summary));
    }

    if write_index {
        let index_path = output_dir.join(INDEX_FILE);
        let mut content = index_lines.join("\n");
        if !content.is_empty() {
            content.push('\n');
        }
        std::fs::write(&index_path, content)
            .with_context(|| format!("Failed to write {}", index_path.display()))?;
    }

    Ok(report)
}

/// Run the parse command
pub fn run(input: &str, output: &str, write_index: bool, format: OutputFormat) -> Result<()> {
    let inputs = resolve_inputs(Path::new(input), &["dxf"])?;
    if inputs.is_empty() {
        anyhow::bail!("No DXF files found in {}", input);
    }

    let report = parse_files(&inputs, Path::new(output), write_index)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => {
            let use_color = use_colors();
            for outcome in &report.files {
                match outcome {
                    ParseOutcome::Ok(summary) => println!(
                        "{} {} -> {} ({} entities)",
                        status_mark(true, use_color),
                        colorize_path(&summary.path, use_color),
                        summary.output,
                        summary.entity_sampled
                    ),
                    ParseOutcome::Fail { path, error } => println!(
                        "{} {}: {}",
                        status_mark(false, use_color),
                        colorize_path(path, use_color),
                        error
                    ),
                }
            }
            println!(
                "\nParsed {} drawings, {} failed",
                report.parsed, report.failed
            );
        }
    }
    Ok(())
}
