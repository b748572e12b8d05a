// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-drawing analysis: classified text, dimensions and the summary.

use crate::classify::{Category, TextClassifier};
use crate::config::Config;
use crate::model::{EntityKind, EntityRecord, ParsedDrawing, Point2};
use anyhow::Result;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;

pub const DEFAULT_BOM_KEYWORDS: &[&str] = &["BOM", "PARTS", "LIST", "部品表", "部品リスト"];

/// A TEXT, MTEXT or DIMENSION text tagged with its category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotatedText {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    pub category: Category,
    pub layer: Option<String>,
    pub position: Option<Point2>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DimensionInfo {
    pub measurement: Option<f64>,
    pub text: Option<String>,
    pub layer: Option<String>,
    pub position: Option<Point2>,
}

/// An INSERT whose block name looks like a bill of materials.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BomCandidate {
    pub name: String,
    pub position: Option<Point2>,
    pub layer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrawingSummary {
    /// Largest resolved measurements, descending.
    pub key_dimensions: Vec<DimensionInfo>,
    pub materials: Vec<String>,
    /// Size of the geometry subset.
    pub total_entities: usize,
    pub has_bom: bool,
    pub annotation_count: usize,
    /// Counts over LINE, CIRCLE, ARC, LWPOLYLINE, POLYLINE, SPLINE, ELLIPSE.
    pub entity_histogram: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrawingAnalysis {
    pub filename: String,
    pub version: Option<String>,
    pub texts: Vec<AnnotatedText>,
    pub dimensions: Vec<DimensionInfo>,
    pub materials: Vec<AnnotatedText>,
    pub annotations: Vec<AnnotatedText>,
    pub bom_candidates: Vec<BomCandidate>,
    pub summary: DrawingSummary,
}

/// Builds [`DrawingAnalysis`] reports.
#[derive(Debug, Clone)]
pub struct DrawingAnalyzer {
    classifier: TextClassifier,
    bom_keywords: Vec<String>,
    key_dimensions: usize,
}

impl Default for DrawingAnalyzer {
    fn default() -> Self {
        Self {
            classifier: TextClassifier::default(),
            bom_keywords: upper_all(DEFAULT_BOM_KEYWORDS),
            key_dimensions: 5,
        }
    }
}

fn upper_all<S: AsRef<str>>(keywords: &[S]) -> Vec<String> {
    keywords
        .iter()
        .map(|k| k.as_ref().trim().to_uppercase())
        .filter(|k| !k.is_empty())
        .collect()
}

impl DrawingAnalyzer {
    pub fn from_config(config: &Config) -> Result<Self> {
        let summary = config.summary();
        Ok(Self {
            classifier: TextClassifier::from_config(config.classifier())?,
            bom_keywords: match &summary.bom_keywords {
                Some(list) => upper_all(list),
                None => upper_all(DEFAULT_BOM_KEYWORDS),
            },
            key_dimensions: summary.key_dimensions(),
        })
    }

    pub fn classifier(&self) -> &TextClassifier {
        &self.classifier
    }

    /// True if the block name contains a BOM keyword, ignoring case.
    pub fn is_bom_block(&self, name: &str) -> bool {
        let upper = name.to_uppercase();
        self.bom_keywords.iter().any(|k| upper.contains(k.as_str()))
    }

    /// Classifies the text of a TEXT, MTEXT or DIMENSION entity. Blank text
    /// and other kinds yield `None`.
    pub fn annotate(&self, entity: &EntityRecord) -> Option<AnnotatedText> {
        let kind = entity.kind();
        if !(kind.is_text() || kind == EntityKind::Dimension) {
            return None;
        }
        let text = entity.text()?.trim();
        if text.is_empty() {
            return None;
        }
        Some(AnnotatedText {
            kind: kind.as_str().to_string(),
            text: text.to_string(),
            category: self.classifier.classify(text),
            layer: entity.layer.clone(),
            position: entity.position(),
        })
    }

    pub fn analyze(&self, drawing: &ParsedDrawing) -> DrawingAnalysis {
        let mut texts = Vec::new();
        let mut dimensions = Vec::new();
        let mut bom_candidates = Vec::new();
        let mut histogram: BTreeMap<String, usize> = BTreeMap::new();

        for entity in &drawing.entities {
            let kind = entity.kind();
            if kind.is_geometry() {
                *histogram.entry(kind.as_str().to_string()).or_insert(0) += 1;
            }
            if kind == EntityKind::Dimension {
                dimensions.push(DimensionInfo {
                    measurement: entity.measurement(),
                    text: entity.text().map(str::to_string),
                    layer: entity.layer.clone(),
                    position: entity.position(),
                });
            }
            if let Some(name) = entity.block_name() {
                if self.is_bom_block(name) {
                    bom_candidates.push(BomCandidate {
                        name: name.to_string(),
                        position: entity.position(),
                        layer: entity.layer.clone(),
                    });
                }
            }
            if let Some(annotated) = self.annotate(entity) {
                texts.push(annotated);
            }
        }

        let materials: Vec<AnnotatedText> = texts
            .iter()
            .filter(|t| t.category == Category::Material)
            .cloned()
            .collect();
        let annotations: Vec<AnnotatedText> = texts
            .iter()
            .filter(|t| t.category == Category::Annotation)
            .cloned()
            .collect();

        let summary = DrawingSummary {
            key_dimensions: key_dimensions(&dimensions, self.key_dimensions),
            materials: materials.iter().map(|t| t.text.clone()).collect(),
            total_entities: histogram.values().sum(),
            has_bom: !bom_candidates.is_empty(),
            annotation_count: annotations.len(),
            entity_histogram: histogram,
        };

        DrawingAnalysis {
            filename: drawing.meta.filename.clone(),
            version: drawing.meta.version.clone(),
            texts,
            dimensions,
            materials,
            annotations,
            bom_candidates,
            summary,
        }
    }
}

/// Top `n` dimensions with a measurement, largest first. The sort is stable
/// so equal measurements keep extraction order.
pub fn key_dimensions(dimensions: &[DimensionInfo], n: usize) -> Vec<DimensionInfo> {
    let mut measured: Vec<&DimensionInfo> = dimensions
        .iter()
        .filter(|d| d.measurement.is_some_and(f64::is_finite))
        .collect();
    measured.sort_by(|a, b| {
        b.measurement
            .partial_cmp(&a.measurement)
            .unwrap_or(Ordering::Equal)
    });
    measured.into_iter().take(n).cloned().collect()
}
