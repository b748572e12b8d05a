// SPDX-License-Identifier: MIT OR Apache-2.0

//! Analyze command: full report for one drawing

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::Path;

use cadgrep::analysis::{DrawingAnalysis, DrawingAnalyzer};
use cadgrep::config::Config;
use cadgrep::dxf::DrawingParser;
use cadgrep::output::{colorize_category, colorize_name, colorize_path, truncate, use_colors};

use crate::cli::OutputFormat;

/// Parses and analyzes `path` with the given analyzer
pub fn analyze_file(path: &Path, analyzer: &DrawingAnalyzer) -> Result<DrawingAnalysis> {
    let (drawing, stats) = DrawingParser::open(path)?.collect_drawing()?;
    if stats.failure_count() > 0 {
        tracing::info!(
            "{}: skipped {} malformed entities",
            path.display(),
            stats.failure_count()
        );
    }
    Ok(analyzer.analyze(&drawing))
}

fn to_json(analysis: &DrawingAnalysis, pretty: bool) -> Result<String> {
    Ok(if pretty {
        serde_json::to_string_pretty(analysis)?
    } else {
        serde_json::to_string(analysis)?
    })
}

/// Run the analyze command
pub fn run(file: &str, output: Option<&str>, pretty: bool, format: OutputFormat) -> Result<()> {
    let path = Path::new(file);
    let config = Config::load();
    let analyzer = DrawingAnalyzer::from_config(&config)?;
    let analysis = analyze_file(path, &analyzer)?;

    if let Some(output) = output {
        std::fs::write(output, to_json(&analysis, pretty)?)
            .with_context(|| format!("Failed to write {}", output))?;
        if format == OutputFormat::Text {
            println!("Analysis written to {}", output);
        }
        return Ok(());
    }

    match format {
        OutputFormat::Json => println!("{}", to_json(&analysis, pretty)?),
        OutputFormat::Text if pretty => println!("{}", to_json(&analysis, true)?),
        OutputFormat::Text => print_text(&analysis, use_colors()),
    }
    Ok(())
}

fn print_text(analysis: &DrawingAnalysis, use_color: bool) {
    let summary = &analysis.summary;
    let heading = |s: &str| {
        if use_color {
            s.bold().to_string()
        } else {
            s.to_string()
        }
    };

    println!(
        "{} ({})",
        colorize_path(&analysis.filename, use_color),
        analysis.version.as_deref().unwrap_or("unknown version")
    );

    println!("\n{}", heading("Geometry"));
    println!("  total: {}", summary.total_entities);
    for (kind, count) in &summary.entity_histogram {
        println!("  {:<12} {}", kind, count);
    }

    println!("\n{}", heading("Key dimensions"));
    if summary.key_dimensions.is_empty() {
        println!("  -");
    }
    for dim in &summary.key_dimensions {
        let value = dim.measurement.map(|m| m.to_string()).unwrap_or_default();
        match &dim.text {
            Some(text) => println!("  {} ({})", value, text),
            None => println!("  {}", value),
        }
    }

    println!("\n{}", heading("Materials"));
    if summary.materials.is_empty() {
        println!("  -");
    }
    for material in &summary.materials {
        println!("  {}", truncate(material, 100));
    }

    println!("\n{}", heading("Texts"));
    for text in &analysis.texts {
        println!(
            "  [{}] {}",
            colorize_category(text.category, use_color),
            truncate(&text.text, 100)
        );
    }

    println!(
        "\n{} {}  {} {}",
        heading("BOM:"),
        if summary.has_bom { "yes" } else { "no" },
        heading("Annotations:"),
        summary.annotation_count
    );
    for bom in &analysis.bom_candidates {
        println!("  block {}", colorize_name(&bom.name, use_color));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadgrep::classify::Category;
    use tempfile::TempDir;

    const NOTES: &str = "0\nSECTION\n2\nENTITIES\n0\nTEXT\n8\nNOTES\n10\n0\n20\n0\n40\n2.5\n1\nSUS304\n0\nDIMENSION\n8\nDIMS\n10\n0\n20\n0\n42\n25.0\n0\nENDSEC\n0\nEOF\n";

    #[test]
    fn analyze_file_reports_materials_and_dimensions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.dxf");
        std::fs::write(&path, NOTES).unwrap();

        let analysis = analyze_file(&path, &DrawingAnalyzer::default()).unwrap();
        assert_eq!(analysis.filename, "notes.dxf");
        assert_eq!(analysis.summary.materials, vec!["SUS304".to_string()]);
        assert_eq!(analysis.texts[0].category, Category::Material);
        assert_eq!(analysis.summary.key_dimensions.len(), 1);
        assert_eq!(analysis.summary.key_dimensions[0].measurement, Some(25.0));

        let json = to_json(&analysis, false).unwrap();
        assert!(json.contains("\"category\":\"material\""));
    }

    #[test]
    fn analyze_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        assert!(analyze_file(&dir.path().join("none.dxf"), &DrawingAnalyzer::default()).is_err());
    }
}
