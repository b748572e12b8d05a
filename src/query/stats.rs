// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stats command: store counts

use anyhow::Result;
use colored::Colorize;

use cadgrep::output::use_colors;
use cadgrep::storage::DrawingStore;
use cadgrep::utils::get_root_with_store;

use crate::cli::OutputFormat;

/// Run the stats command
pub fn run(format: OutputFormat) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let root = get_root_with_store(&cwd);
    let store = DrawingStore::open_existing(&root)?;
    let counts = store.counts()?;
    let path = store.path().display().to_string();
    store.close()?;

    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "store": path,
                "counts": counts,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            let use_color = use_colors();
            let label = |s: &str| {
                if use_color {
                    s.bold().to_string()
                } else {
                    s.to_string()
                }
            };
            println!("{} {}", label("Store:"), path);
            println!("{} {}", label("Drawings:"), counts.drawings);
            println!("{} {}", label("Entities:"), counts.entities);
            println!(
                "{} {} drawing, {} entity",
                label("Embeddings:"),
                counts.drawing_embeddings,
                counts.entity_embeddings
            );
            match counts.embedding_dim {
                Some(dim) => println!("{} {}", label("Dimension:"), dim),
                None => println!("{} -", label("Dimension:")),
            }
        }
    }
    Ok(())
}
