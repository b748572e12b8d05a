// SPDX-License-Identifier: MIT OR Apache-2.0

//! Drawing, entity and embedding records.
//!
//! `ParsedDrawing` is the interchange form written by `cadgrep parse` and read
//! back by `cadgrep import`; its field names are shared with downstream tooling
//! and must not change.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A 2D point, serialized as `[x, y]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2(pub f64, pub f64);

impl Point2 {
    pub fn x(&self) -> f64 {
        self.0
    }

    pub fn y(&self) -> f64 {
        self.1
    }
}

/// Axis-aligned bounds, serialized as `[min_x, min_y, max_x, max_y]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox(pub f64, pub f64, pub f64, pub f64);

impl BoundingBox {
    /// Bounds of a point set; `None` when the set is empty.
    pub fn from_points<'a, I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Point2>,
    {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut bbox = BoundingBox(first.0, first.1, first.0, first.1);
        for p in iter {
            bbox.0 = bbox.0.min(p.0);
            bbox.1 = bbox.1.min(p.1);
            bbox.2 = bbox.2.max(p.0);
            bbox.3 = bbox.3.max(p.1);
        }
        Some(bbox)
    }
}

/// The closed set of entity kinds that are extracted in depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Line,
    Circle,
    Arc,
    LwPolyline,
    Polyline,
    Ellipse,
    Spline,
    Point,
    Text,
    MText,
    Dimension,
    Hatch,
    Insert,
}

impl EntityKind {
    pub const ALL: [EntityKind; 13] = [
        EntityKind::Line,
        EntityKind::Circle,
        EntityKind::Arc,
        EntityKind::LwPolyline,
        EntityKind::Polyline,
        EntityKind::Ellipse,
        EntityKind::Spline,
        EntityKind::Point,
        EntityKind::Text,
        EntityKind::MText,
        EntityKind::Dimension,
        EntityKind::Hatch,
        EntityKind::Insert,
    ];

    /// DXF type name (`LINE`, `MTEXT`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Line => "LINE",
            EntityKind::Circle => "CIRCLE",
            EntityKind::Arc => "ARC",
            EntityKind::LwPolyline => "LWPOLYLINE",
            EntityKind::Polyline => "POLYLINE",
            EntityKind::Ellipse => "ELLIPSE",
            EntityKind::Spline => "SPLINE",
            EntityKind::Point => "POINT",
            EntityKind::Text => "TEXT",
            EntityKind::MText => "MTEXT",
            EntityKind::Dimension => "DIMENSION",
            EntityKind::Hatch => "HATCH",
            EntityKind::Insert => "INSERT",
        }
    }

    /// Maps a DXF type name to a modeled kind; unmodeled names yield `None`.
    pub fn from_dxf_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == name)
    }

    /// Pure geometry kinds, summarized in the entity histogram.
    pub fn is_geometry(&self) -> bool {
        matches!(
            self,
            EntityKind::Line
                | EntityKind::Circle
                | EntityKind::Arc
                | EntityKind::LwPolyline
                | EntityKind::Polyline
                | EntityKind::Spline
                | EntityKind::Ellipse
        )
    }

    /// TEXT and MTEXT.
    pub fn is_text(&self) -> bool {
        matches!(self, EntityKind::Text | EntityKind::MText)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineData {
    pub start: Point2,
    pub end: Point2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircleData {
    pub center: Point2,
    pub radius: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArcData {
    pub center: Point2,
    pub radius: f64,
    pub start_angle: f64,
    pub end_angle: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolylineData {
    pub points: Vec<Point2>,
    pub is_closed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EllipseData {
    pub center: Point2,
    pub major_axis: Point2,
    /// Minor to major axis ratio.
    pub ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplineData {
    pub fit_points: Vec<Point2>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointData {
    pub location: Point2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextData {
    pub text: String,
    #[serde(default)]
    pub position: Option<Point2>,
    #[serde(default)]
    pub height: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionData {
    /// Measured value; `None` when the drawing does not carry one.
    #[serde(default)]
    pub measurement: Option<f64>,
    /// Override text.
    #[serde(default)]
    pub text: Option<String>,
    /// Definition point.
    #[serde(default)]
    pub position: Option<Point2>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HatchData {
    pub solid_fill: bool,
    #[serde(default)]
    pub pattern_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertData {
    pub name: String,
    pub insert: Point2,
    pub xscale: f64,
    pub yscale: f64,
    pub rotation: f64,
}

/// Kind-specific payload. The `type` tag doubles as the entity type field of
/// the interchange record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EntityGeometry {
    #[serde(rename = "LINE")]
    Line(LineData),
    #[serde(rename = "CIRCLE")]
    Circle(CircleData),
    #[serde(rename = "ARC")]
    Arc(ArcData),
    #[serde(rename = "LWPOLYLINE")]
    LwPolyline(PolylineData),
    #[serde(rename = "POLYLINE")]
    Polyline(PolylineData),
    #[serde(rename = "ELLIPSE")]
    Ellipse(EllipseData),
    #[serde(rename = "SPLINE")]
    Spline(SplineData),
    #[serde(rename = "POINT")]
    Point(PointData),
    #[serde(rename = "TEXT")]
    Text(TextData),
    #[serde(rename = "MTEXT")]
    MText(TextData),
    #[serde(rename = "DIMENSION")]
    Dimension(DimensionData),
    #[serde(rename = "HATCH")]
    Hatch(HatchData),
    #[serde(rename = "INSERT")]
    Insert(InsertData),
}

impl EntityGeometry {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityGeometry::Line(_) => EntityKind::Line,
            EntityGeometry::Circle(_) => EntityKind::Circle,
            EntityGeometry::Arc(_) => EntityKind::Arc,
            EntityGeometry::LwPolyline(_) => EntityKind::LwPolyline,
            EntityGeometry::Polyline(_) => EntityKind::Polyline,
            EntityGeometry::Ellipse(_) => EntityKind::Ellipse,
            EntityGeometry::Spline(_) => EntityKind::Spline,
            EntityGeometry::Point(_) => EntityKind::Point,
            EntityGeometry::Text(_) => EntityKind::Text,
            EntityGeometry::MText(_) => EntityKind::MText,
            EntityGeometry::Dimension(_) => EntityKind::Dimension,
            EntityGeometry::Hatch(_) => EntityKind::Hatch,
            EntityGeometry::Insert(_) => EntityKind::Insert,
        }
    }
}

/// One extracted entity in interchange form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    #[serde(flatten)]
    pub geometry: EntityGeometry,
    #[serde(default)]
    pub layer: Option<String>,
    #[serde(default)]
    pub color: Option<i16>,
    #[serde(default)]
    pub linetype: Option<String>,
    #[serde(default)]
    pub lineweight: Option<i16>,
    #[serde(default)]
    pub bbox: Option<BoundingBox>,
}

impl EntityRecord {
    pub fn kind(&self) -> EntityKind {
        self.geometry.kind()
    }

    /// Text content: TEXT/MTEXT content or a DIMENSION override.
    pub fn text(&self) -> Option<&str> {
        match &self.geometry {
            EntityGeometry::Text(t) | EntityGeometry::MText(t) => Some(t.text.as_str()),
            EntityGeometry::Dimension(d) => d.text.as_deref(),
            _ => None,
        }
    }

    pub fn measurement(&self) -> Option<f64> {
        match &self.geometry {
            EntityGeometry::Dimension(d) => d.measurement,
            _ => None,
        }
    }

    /// Block name of an INSERT.
    pub fn block_name(&self) -> Option<&str> {
        match &self.geometry {
            EntityGeometry::Insert(i) => Some(i.name.as_str()),
            _ => None,
        }
    }

    /// Anchor point used in reports (insertion, definition point, location).
    pub fn position(&self) -> Option<Point2> {
        match &self.geometry {
            EntityGeometry::Text(t) | EntityGeometry::MText(t) => t.position,
            EntityGeometry::Dimension(d) => d.position,
            EntityGeometry::Insert(i) => Some(i.insert),
            EntityGeometry::Point(p) => Some(p.location),
            _ => None,
        }
    }
}

/// Per-file drawing metadata (`meta` in the interchange schema).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawingMeta {
    pub filename: String,
    pub path: String,
    #[serde(default)]
    pub version: Option<String>,
    pub layer_count: usize,
    #[serde(default)]
    pub layers: Vec<String>,
    /// Occurrences per DXF type name, including unmodeled types.
    #[serde(default)]
    pub entity_counts: BTreeMap<String, usize>,
    /// Number of entities actually extracted.
    pub entity_sampled: usize,
}

/// A drawing with all of its extracted entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedDrawing {
    pub meta: DrawingMeta,
    pub entities: Vec<EntityRecord>,
}

/// What an embedding record represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingKind {
    Drawing,
    Entity,
}

impl EmbeddingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingKind::Drawing => "drawing",
            EmbeddingKind::Entity => "entity",
        }
    }
}

impl fmt::Display for EmbeddingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EmbeddingKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "drawing" => Ok(EmbeddingKind::Drawing),
            "entity" => Ok(EmbeddingKind::Entity),
            _ => Err(format!("Unknown embedding kind: {}", s)),
        }
    }
}

/// A payload and its vector.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub id: String,
    pub drawing_id: String,
    /// `None` for drawing-level records.
    pub entity_id: Option<String>,
    pub kind: EmbeddingKind,
    pub payload: String,
    pub vector: Vec<f32>,
}
