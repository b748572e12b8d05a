// SPDX-License-Identifier: MIT OR Apache-2.0

//! Search command: free-text similarity search over the drawing store

use anyhow::Result;
use colored::Colorize;
use std::time::Instant;

use cadgrep::config::Config;
use cadgrep::embedding::create_provider;
use cadgrep::model::EmbeddingKind;
use cadgrep::output::{
    colorize_context, colorize_kind, colorize_name, colorize_path, colorize_score, truncate,
    use_colors,
};
use cadgrep::similarity::{search, RankMode, SearchRequest, SearchResponse, SearchResult};
use cadgrep::storage::DrawingStore;
use cadgrep::utils::find_store_root;

use crate::cli::OutputFormat;

/// Run the search command
pub fn run(
    query: &str,
    limit: Option<usize>,
    per_drawing: bool,
    kind: Option<EmbeddingKind>,
    format: OutputFormat,
) -> Result<()> {
    let start_time = Instant::now();
    let cwd = std::env::current_dir()?;

    // Store may live in a parent directory
    let root = match find_store_root(&cwd) {
        Some(store_root) => {
            if store_root.from_parent {
                eprintln!("Using store from: {}", store_root.root.display());
            }
            store_root.root
        }
        None => cwd,
    };

    let config = Config::load_for(&root);
    let mode = if per_drawing || config.search().per_drawing() {
        RankMode::PerDrawing
    } else {
        RankMode::TopK
    };
    let request = SearchRequest::new(query, config.merge_limit(limit))?
        .with_mode(mode)
        .with_kind(kind);

    let store = DrawingStore::open_existing(&root)?;
    let mut provider = create_provider(config.embeddings())?;
    let response = search(&request, provider.as_mut(), &store)?;
    store.close()?;

    tracing::debug!(
        "Search for {:?} returned {} results in {:?}",
        query,
        response.count,
        start_time.elapsed()
    );

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&response)?),
        OutputFormat::Text => print_text(&response, use_colors()),
    }
    Ok(())
}

fn result_label(result: &SearchResult) -> String {
    match (&result.entity_type, result.kind) {
        (Some(entity_type), _) => entity_type.clone(),
        (None, EmbeddingKind::Drawing) => "drawing".to_string(),
        (None, EmbeddingKind::Entity) => "entity".to_string(),
    }
}

fn print_text(response: &SearchResponse, use_color: bool) {
    if response.results.is_empty() {
        if use_color {
            println!(
                "{} No results found for: {}",
                "✗".red(),
                response.query.yellow()
            );
        } else {
            println!("No results found for: {}", response.query);
        }
        return;
    }

    if use_color {
        println!(
            "\n{} Found {} results for: {}\n",
            "✓".green(),
            response.count.to_string().cyan(),
            response.query.yellow()
        );
    } else {
        println!("\nFound {} results for: {}\n", response.count, response.query);
    }

    for result in &response.results {
        let filename = result.filename.as_deref().unwrap_or(&result.drawing_id);
        let mut header = format!(
            "{}  {} (score: {})",
            colorize_path(filename, use_color),
            colorize_kind(&result_label(result), use_color),
            colorize_score(result.score, use_color)
        );
        if let Some(layer) = &result.layer {
            header.push_str(&format!("  layer {}", colorize_name(layer, use_color)));
        }
        println!("{}", header);
        if let Some(text) = &result.text {
            println!("    {}", truncate(text, 120));
        }
        println!("    {}", colorize_context(&truncate(&result.payload, 160), use_color));
    }
}
