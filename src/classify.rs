// SPDX-License-Identifier: MIT OR Apache-2.0

//! Semantic classification of drawing text
//!
//! Categories are tested in a fixed order and the first match wins:
//! material, tolerance, thread, surface finish, dimension value, annotation.

use crate::config::ClassifierConfig;
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_MATERIAL_KEYWORDS: &[&str] = &[
    "SUS",
    "SS",
    "STEEL",
    "ALUMINUM",
    "ALUMINIUM",
    "AL",
    "BRASS",
    "SPCC",
    "S45C",
    "MATERIAL",
    "鋼",
    "アルミ",
    "ステンレス",
    "材質",
];

pub const DEFAULT_TOLERANCE_KEYWORDS: &[&str] = &[
    "±", "+/-", "TOL", "TOLERANCE", "H6", "H7", "H8", "G6", "JS", "公差",
];

pub const DEFAULT_THREAD_PATTERNS: &[&str] = &[
    r"(?:^|[^A-Z])M\d+(?:\.\d+)?",
    r"(?:^|[^A-Z])(?:UNC|UNF|UNEF|NPT|PT|RC|RP)(?:[^A-Z]|$)",
];

pub const DEFAULT_SURFACE_FINISH_MARKERS: &[&str] = &["RA", "RZ", "▽", "∇"];

static DEFAULT_CLASSIFIER: Lazy<TextClassifier> = Lazy::new(TextClassifier::default);

/// Semantic category of a text entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Material,
    Tolerance,
    Thread,
    SurfaceFinish,
    DimensionValue,
    Annotation,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Material => "material",
            Category::Tolerance => "tolerance",
            Category::Thread => "thread",
            Category::SurfaceFinish => "surface_finish",
            Category::DimensionValue => "dimension_value",
            Category::Annotation => "annotation",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies `text` with the built-in keyword lists.
pub fn classify(text: &str) -> Category {
    DEFAULT_CLASSIFIER.classify(text)
}

/// A keyword, upper-cased once.
///
/// ASCII keywords containing a letter must stand as a token: the characters
/// around a match may not be ASCII letters, so `SS` matches `SS400` but not
/// `ASSEMBLY`. Other keywords (symbols, CJK) match as plain substrings.
#[derive(Debug, Clone)]
struct Keyword {
    upper: String,
    token: bool,
}

impl Keyword {
    fn new(raw: &str) -> Option<Self> {
        let upper = raw.trim().to_uppercase();
        if upper.is_empty() {
            return None;
        }
        let token = upper.is_ascii() && upper.chars().any(|c| c.is_ascii_alphabetic());
        Some(Self { upper, token })
    }

    fn is_in(&self, haystack: &str) -> bool {
        if !self.token {
            return haystack.contains(&self.upper);
        }
        haystack.match_indices(&self.upper).any(|(start, m)| {
            let before = haystack[..start].chars().next_back();
            let after = haystack[start + m.len()..].chars().next();
            !before.is_some_and(|c| c.is_ascii_alphabetic())
                && !after.is_some_and(|c| c.is_ascii_alphabetic())
        })
    }
}

/// Digits, decimal points and `±` only.
fn is_dimension_value(text: &str) -> bool {
    let text = text.trim();
    !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_ascii_digit() || c == '.' || c == '±')
}

fn keywords<S: AsRef<str>>(raw: &[S]) -> Vec<Keyword> {
    raw.iter().filter_map(|k| Keyword::new(k.as_ref())).collect()
}

fn compile_pattern(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

/// Keyword-driven text classifier.
#[derive(Debug, Clone)]
pub struct TextClassifier {
    materials: Vec<Keyword>,
    tolerances: Vec<Keyword>,
    threads: Vec<Regex>,
    surface_finish: Vec<Keyword>,
}

impl Default for TextClassifier {
    fn default() -> Self {
        Self {
            materials: keywords(DEFAULT_MATERIAL_KEYWORDS),
            tolerances: keywords(DEFAULT_TOLERANCE_KEYWORDS),
            threads: DEFAULT_THREAD_PATTERNS
                .iter()
                .filter_map(|p| compile_pattern(p).ok())
                .collect(),
            surface_finish: keywords(DEFAULT_SURFACE_FINISH_MARKERS),
        }
    }
}

impl TextClassifier {
    /// Builds a classifier, replacing each default list the config sets.
    pub fn from_config(config: &ClassifierConfig) -> Result<Self> {
        let mut classifier = Self::default();
        if let Some(list) = &config.material_keywords {
            classifier.materials = keywords(list);
        }
        if let Some(list) = &config.tolerance_keywords {
            classifier.tolerances = keywords(list);
        }
        if let Some(list) = &config.thread_patterns {
            classifier.threads = list
                .iter()
                .map(|p| {
                    compile_pattern(p)
                        .with_context(|| format!("Invalid thread pattern in config: {}", p))
                })
                .collect::<Result<Vec<_>>>()?;
        }
        if let Some(list) = &config.surface_finish_markers {
            classifier.surface_finish = keywords(list);
        }
        Ok(classifier)
    }

    pub fn classify(&self, text: &str) -> Category {
        let upper = text.to_uppercase();

        if self.materials.iter().any(|k| k.is_in(&upper)) {
            Category::Material
        } else if self.tolerances.iter().any(|k| k.is_in(&upper)) {
            Category::Tolerance
        } else if self.threads.iter().any(|re| re.is_match(text)) {
            Category::Thread
        } else if self.surface_finish.iter().any(|k| k.is_in(&upper)) {
            Category::SurfaceFinish
        } else if is_dimension_value(text) {
            Category::DimensionValue
        } else {
            Category::Annotation
        }
    }
}
