// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embed command: vectors for stored drawings and entities

use anyhow::Result;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use cadgrep::config::Config;
use cadgrep::embedding::{create_provider, EmbedOptions, EmbedReport, EmbeddingPipeline};
use cadgrep::output::use_colors;
use cadgrep::storage::DrawingStore;
use cadgrep::utils::get_root_with_store;

use crate::cli::OutputFormat;

/// Which records to embed
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbedSelection {
    pub entities_only: bool,
    pub drawings_only: bool,
    pub force: bool,
    pub limit: Option<usize>,
}

impl EmbedSelection {
    fn options(&self) -> EmbedOptions {
        EmbedOptions {
            drawings: !self.entities_only,
            entities: !self.drawings_only,
            force: self.force,
            limit: self.limit,
        }
    }
}

/// Embeds pending records of an open store with the configured provider
pub fn embed_store(
    store: &mut DrawingStore,
    config: &Config,
    selection: EmbedSelection,
    show_progress: bool,
) -> Result<EmbedReport> {
    let mut provider = create_provider(config.embeddings())?;
    let mut pipeline = EmbeddingPipeline::new(provider.as_mut(), selection.options());

    let pending = pipeline.pending_count(store)?;
    let pb = if show_progress && pending > 0 {
        ProgressBar::new(pending as u64)
    } else {
        ProgressBar::hidden()
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{bar:40.cyan/blue}] {pos}/{len} records | Embedding")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##."),
    );

    let report = pipeline.run(store, |n| pb.inc(n as u64))?;
    pb.finish_and_clear();
    Ok(report)
}

pub fn print_report(report: &EmbedReport, use_color: bool) {
    if use_color {
        println!(
            "{} Embedded {} drawings and {} entities",
            "✓".green(),
            report.drawings_embedded.to_string().cyan(),
            report.entities_embedded.to_string().cyan()
        );
    } else {
        println!(
            "Embedded {} drawings and {} entities",
            report.drawings_embedded, report.entities_embedded
        );
    }
    if report.failed_batches > 0 {
        eprintln!(
            "Warning: {} batches ({} records) failed to embed",
            report.failed_batches, report.failed_records
        );
    }
}

/// Run the embed command
pub fn run(selection: EmbedSelection, format: OutputFormat) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let root = get_root_with_store(&cwd);
    let config = Config::load_for(&root);
    let mut store = DrawingStore::open_existing(&root)?;

    let report = embed_store(&mut store, &config, selection, format == OutputFormat::Text)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_report(&report, use_colors()),
    }

    store.close()
}
