// SPDX-License-Identifier: MIT OR Apache-2.0

//! Output and color utilities for consistent terminal formatting
//!
//! Provides shared color functions respecting NO_COLOR environment variable.

use crate::classify::Category;
use colored::Colorize;

/// Check if colors should be used (respects NO_COLOR env var)
pub fn use_colors() -> bool {
    std::env::var("NO_COLOR").is_err()
}

/// Colorize file path (cyan)
pub fn colorize_path(text: &str, use_color: bool) -> String {
    if use_color {
        text.cyan().to_string()
    } else {
        text.to_string()
    }
}

/// Colorize a similarity score (yellow, three decimals)
pub fn colorize_score(score: f32, use_color: bool) -> String {
    let text = format!("{:.3}", score);
    if use_color {
        text.yellow().to_string()
    } else {
        text
    }
}

/// Colorize entity type (green)
pub fn colorize_kind(text: &str, use_color: bool) -> String {
    if use_color {
        text.green().to_string()
    } else {
        text.to_string()
    }
}

/// Colorize a text category; annotations stay plain
pub fn colorize_category(category: Category, use_color: bool) -> String {
    let text = category.as_str();
    if !use_color {
        return text.to_string();
    }
    match category {
        Category::Material => text.magenta().to_string(),
        Category::Tolerance => text.red().to_string(),
        Category::Thread => text.blue().to_string(),
        Category::SurfaceFinish => text.cyan().to_string(),
        Category::DimensionValue => text.yellow().to_string(),
        Category::Annotation => text.to_string(),
    }
}

/// Colorize block or layer name (bold)
pub fn colorize_name(text: &str, use_color: bool) -> String {
    if use_color {
        text.bold().to_string()
    } else {
        text.to_string()
    }
}

/// Colorize secondary details (dimmed)
pub fn colorize_context(text: &str, use_color: bool) -> String {
    if use_color {
        text.dimmed().to_string()
    } else {
        text.to_string()
    }
}

/// Status marker for a per-file outcome
pub fn status_mark(ok: bool, use_color: bool) -> String {
    match (ok, use_color) {
        (true, true) => "✓".green().to_string(),
        (false, true) => "✗".red().to_string(),
        (true, false) => "OK".to_string(),
        (false, false) => "FAIL".to_string(),
    }
}

/// Shortens `text` to `max_chars` characters, marking the cut with `…`
pub fn truncate(text: &str, max_chars: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &flat[..idx]),
        None => flat,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_output_without_color() {
        assert_eq!(colorize_path("a.dxf", false), "a.dxf");
        assert_eq!(colorize_score(0.98765, false), "0.988");
        assert_eq!(colorize_category(Category::Thread, false), "thread");
        assert_eq!(status_mark(false, false), "FAIL");
    }

    #[test]
    fn truncate_flattens_and_cuts() {
        assert_eq!(truncate("GENERAL\nNOTES", 40), "GENERAL NOTES");
        assert_eq!(truncate("abcdef", 3), "abc…");
        assert_eq!(truncate("材質アルミ", 2), "材質…");
    }
}
