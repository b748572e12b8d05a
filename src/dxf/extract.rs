// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-kind entity extraction from raw tags.

use super::reader::Tag;
use super::text::{decode_text, mtext_plain_text};
use crate::errors::ExtractionError;
use crate::model::{
    ArcData, BoundingBox, CircleData, DimensionData, EllipseData, EntityGeometry, EntityKind,
    EntityRecord, HatchData, InsertData, LineData, Point2, PointData, PolylineData, SplineData,
    TextData,
};

/// An entity's own tags plus the tags of the sub-entities folded into it
/// (POLYLINE vertices).
#[derive(Debug, Clone, Default)]
pub struct RawEntity {
    pub tags: Vec<Tag>,
    pub vertices: Vec<Vec<Tag>>,
}

impl RawEntity {
    /// Group code 67 set to 1 places the entity in paper space.
    pub fn is_paperspace(&self) -> bool {
        self.tags
            .iter()
            .any(|(code, value)| *code == 67 && value.trim() == "1")
    }
}

type Result<T> = std::result::Result<T, ExtractionError>;

/// Builds the typed record for `kind` or reports why it cannot.
pub fn extract(kind: EntityKind, raw: &RawEntity) -> Result<EntityRecord> {
    let fields = Fields::new(kind, &raw.tags);

    let geometry = match kind {
        EntityKind::Line => EntityGeometry::Line(LineData {
            start: fields.point(10)?,
            end: fields.point(11)?,
        }),
        EntityKind::Circle => EntityGeometry::Circle(CircleData {
            center: fields.point(10)?,
            radius: fields.f64(40)?,
        }),
        EntityKind::Arc => EntityGeometry::Arc(ArcData {
            center: fields.point(10)?,
            radius: fields.f64(40)?,
            start_angle: fields.f64(50)?,
            end_angle: fields.f64(51)?,
        }),
        EntityKind::LwPolyline => EntityGeometry::LwPolyline(PolylineData {
            points: fields.points(10)?,
            is_closed: fields.flags(70)? & 1 != 0,
        }),
        EntityKind::Polyline => {
            let mut points = Vec::with_capacity(raw.vertices.len());
            for vertex in &raw.vertices {
                points.push(Fields::new(kind, vertex).point(10)?);
            }
            EntityGeometry::Polyline(PolylineData {
                points,
                is_closed: fields.flags(70)? & 1 != 0,
            })
        }
        EntityKind::Ellipse => EntityGeometry::Ellipse(EllipseData {
            center: fields.point(10)?,
            major_axis: fields.point(11)?,
            ratio: fields.f64(40)?,
        }),
        EntityKind::Spline => EntityGeometry::Spline(SplineData {
            fit_points: fields.points(11)?,
        }),
        EntityKind::Point => EntityGeometry::Point(PointData {
            location: fields.point(10)?,
        }),
        EntityKind::Text => EntityGeometry::Text(TextData {
            text: decode_text(fields.str(1).unwrap_or_default()),
            position: fields.opt_point(10),
            height: fields.opt_f64(40),
        }),
        EntityKind::MText => {
            // Long MTEXT is split into code-3 chunks followed by a final code 1.
            let mut raw_text: String = fields.all(3).collect();
            raw_text.push_str(fields.str(1).unwrap_or_default());
            EntityGeometry::MText(TextData {
                text: mtext_plain_text(&raw_text),
                position: fields.opt_point(10),
                height: fields.opt_f64(40),
            })
        }
        EntityKind::Dimension => EntityGeometry::Dimension(DimensionData {
            measurement: fields.opt_f64(42),
            text: fields
                .str(1)
                .filter(|t| !t.is_empty() && *t != "<>")
                .map(mtext_plain_text),
            position: fields.opt_point(10),
        }),
        EntityKind::Hatch => EntityGeometry::Hatch(HatchData {
            solid_fill: fields.flags(70)? & 1 != 0,
            pattern_name: fields
                .str(2)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        }),
        EntityKind::Insert => EntityGeometry::Insert(InsertData {
            name: fields
                .str(2)
                .map(str::to_string)
                .ok_or(ExtractionError::MissingField {
                    kind: kind.as_str(),
                    code: 2,
                })?,
            insert: fields.point(10)?,
            xscale: fields.f64_or(41, 1.0)?,
            yscale: fields.f64_or(42, 1.0)?,
            rotation: fields.f64_or(50, 0.0)?,
        }),
    };

    let bbox = bounding_box(&geometry);
    Ok(EntityRecord {
        geometry,
        layer: Some(fields.str(8).unwrap_or("0").to_string()),
        color: fields.opt_i16(62),
        linetype: fields.str(6).map(str::to_string),
        lineweight: fields.opt_i16(370),
        bbox,
    })
}

/// Typed lookup over an entity's tags. The first occurrence of a code wins.
struct Fields<'a> {
    kind: EntityKind,
    tags: &'a [Tag],
}

impl<'a> Fields<'a> {
    fn new(kind: EntityKind, tags: &'a [Tag]) -> Self {
        Self { kind, tags }
    }

    fn str(&self, code: i32) -> Option<&'a str> {
        self.tags
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, v)| v.as_str())
    }

    fn all(&self, code: i32) -> impl Iterator<Item = &'a str> + 'a {
        self.tags
            .iter()
            .filter(move |(c, _)| *c == code)
            .map(|(_, v)| v.as_str())
    }

    fn parse(&self, code: i32, raw: &str) -> Result<f64> {
        raw.trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| ExtractionError::InvalidValue {
                kind: self.kind.as_str(),
                code,
                value: raw.to_string(),
            })
    }

    fn f64(&self, code: i32) -> Result<f64> {
        let raw = self.str(code).ok_or(ExtractionError::MissingField {
            kind: self.kind.as_str(),
            code,
        })?;
        self.parse(code, raw)
    }

    fn f64_or(&self, code: i32, default: f64) -> Result<f64> {
        match self.str(code) {
            Some(raw) => self.parse(code, raw),
            None => Ok(default),
        }
    }

    /// Best-effort value: absent, unparsable and non-finite all yield `None`.
    fn opt_f64(&self, code: i32) -> Option<f64> {
        self.str(code).and_then(|raw| self.parse(code, raw).ok())
    }

    fn opt_i16(&self, code: i32) -> Option<i16> {
        self.str(code).and_then(|raw| raw.trim().parse::<i16>().ok())
    }

    fn flags(&self, code: i32) -> Result<i32> {
        match self.str(code) {
            Some(raw) => raw
                .trim()
                .parse::<i32>()
                .map_err(|_| ExtractionError::InvalidValue {
                    kind: self.kind.as_str(),
                    code,
                    value: raw.to_string(),
                }),
            None => Ok(0),
        }
    }

    fn point(&self, x_code: i32) -> Result<Point2> {
        Ok(Point2(self.f64(x_code)?, self.f64(x_code + 10)?))
    }

    fn opt_point(&self, x_code: i32) -> Option<Point2> {
        Some(Point2(self.opt_f64(x_code)?, self.opt_f64(x_code + 10)?))
    }

    /// Repeated `x_code`/`x_code + 10` pairs in tag order.
    fn points(&self, x_code: i32) -> Result<Vec<Point2>> {
        let mut points = Vec::new();
        let mut pending_x: Option<f64> = None;
        for (code, raw) in self.tags {
            if *code == x_code {
                if pending_x.is_some() {
                    return Err(ExtractionError::MissingField {
                        kind: self.kind.as_str(),
                        code: x_code + 10,
                    });
                }
                pending_x = Some(self.parse(*code, raw)?);
            } else if *code == x_code + 10 {
                let x = pending_x.take().ok_or(ExtractionError::MissingField {
                    kind: self.kind.as_str(),
                    code: x_code,
                })?;
                points.push(Point2(x, self.parse(*code, raw)?));
            }
        }
        if pending_x.is_some() {
            return Err(ExtractionError::MissingField {
                kind: self.kind.as_str(),
                code: x_code + 10,
            });
        }
        Ok(points)
    }
}

fn bounding_box(geometry: &EntityGeometry) -> Option<BoundingBox> {
    match geometry {
        EntityGeometry::Line(line) => BoundingBox::from_points([&line.start, &line.end]),
        EntityGeometry::Circle(c) => Some(BoundingBox(
            c.center.0 - c.radius.abs(),
            c.center.1 - c.radius.abs(),
            c.center.0 + c.radius.abs(),
            c.center.1 + c.radius.abs(),
        )),
        EntityGeometry::Arc(arc) => Some(arc_extents(arc)),
        EntityGeometry::LwPolyline(p) | EntityGeometry::Polyline(p) => {
            BoundingBox::from_points(&p.points)
        }
        EntityGeometry::Ellipse(e) => {
            let (ax, ay) = (e.major_axis.0, e.major_axis.1);
            let (bx, by) = (-ay * e.ratio, ax * e.ratio);
            let hx = (ax * ax + bx * bx).sqrt();
            let hy = (ay * ay + by * by).sqrt();
            Some(BoundingBox(
                e.center.0 - hx,
                e.center.1 - hy,
                e.center.0 + hx,
                e.center.1 + hy,
            ))
        }
        EntityGeometry::Spline(s) => BoundingBox::from_points(&s.fit_points),
        EntityGeometry::Point(p) => BoundingBox::from_points([&p.location]),
        EntityGeometry::Text(_)
        | EntityGeometry::MText(_)
        | EntityGeometry::Dimension(_)
        | EntityGeometry::Hatch(_)
        | EntityGeometry::Insert(_) => None,
    }
}

/// Exact extents of a counter-clockwise arc: both endpoints plus every axis
/// crossing inside the sweep. Equal start and end angles sweep a full circle.
fn arc_extents(arc: &ArcData) -> BoundingBox {
    let start = arc.start_angle.rem_euclid(360.0);
    let mut end = arc.end_angle.rem_euclid(360.0);
    if end <= start {
        end += 360.0;
    }

    let at = |deg: f64| {
        let rad = deg.to_radians();
        Point2(
            arc.center.0 + arc.radius * rad.cos(),
            arc.center.1 + arc.radius * rad.sin(),
        )
    };

    let mut points = vec![at(start), at(end)];
    points.extend(
        (0..8)
            .map(|quadrant| quadrant as f64 * 90.0)
            .filter(|q| *q > start && *q < end)
            .map(at),
    );

    // from_points only returns None for an empty set.
    BoundingBox::from_points(&points).unwrap_or(BoundingBox(
        arc.center.0,
        arc.center.1,
        arc.center.0,
        arc.center.1,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(i32, &str)]) -> RawEntity {
        RawEntity {
            tags: pairs.iter().map(|(c, v)| (*c, v.to_string())).collect(),
            vertices: Vec::new(),
        }
    }

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{} != {}", a, b);
    }

    #[test]
    fn line_with_common_attributes() {
        let raw = tags(&[
            (8, "OUTLINE"),
            (62, "3"),
            (6, "DASHED"),
            (370, "25"),
            (10, "0"),
            (20, "0"),
            (11, "10.5"),
            (21, "-2"),
        ]);
        let record = extract(EntityKind::Line, &raw).unwrap();
        assert_eq!(record.layer.as_deref(), Some("OUTLINE"));
        assert_eq!(record.color, Some(3));
        assert_eq!(record.linetype.as_deref(), Some("DASHED"));
        assert_eq!(record.lineweight, Some(25));
        assert_eq!(record.bbox, Some(BoundingBox(0.0, -2.0, 10.5, 0.0)));
    }

    #[test]
    fn layer_defaults_to_zero() {
        let raw = tags(&[(10, "1"), (20, "1"), (40, "2")]);
        let record = extract(EntityKind::Circle, &raw).unwrap();
        assert_eq!(record.layer.as_deref(), Some("0"));
        assert_eq!(record.color, None);
    }

    #[test]
    fn malformed_radius_is_an_error() {
        let raw = tags(&[(10, "1"), (20, "1"), (40, "abc")]);
        let err = extract(EntityKind::Circle, &raw).unwrap_err();
        assert_eq!(
            err,
            ExtractionError::InvalidValue {
                kind: "CIRCLE",
                code: 40,
                value: "abc".to_string()
            }
        );

        let missing = tags(&[(10, "1"), (20, "1")]);
        assert!(matches!(
            extract(EntityKind::Circle, &missing),
            Err(ExtractionError::MissingField { code: 40, .. })
        ));
    }

    #[test]
    fn arc_extents_follow_the_sweep() {
        let raw = tags(&[(10, "0"), (20, "0"), (40, "1"), (50, "0"), (51, "90")]);
        let bbox = extract(EntityKind::Arc, &raw).unwrap().bbox.unwrap();
        assert_close(bbox.0, 0.0);
        assert_close(bbox.1, 0.0);
        assert_close(bbox.2, 1.0);
        assert_close(bbox.3, 1.0);

        // 270 -> 90 crosses 0 degrees.
        let raw = tags(&[(10, "0"), (20, "0"), (40, "2"), (50, "270"), (51, "90")]);
        let bbox = extract(EntityKind::Arc, &raw).unwrap().bbox.unwrap();
        assert_close(bbox.0, 0.0);
        assert_close(bbox.1, -2.0);
        assert_close(bbox.2, 2.0);
        assert_close(bbox.3, 2.0);
    }

    #[test]
    fn lwpolyline_points_in_order() {
        let raw = tags(&[
            (90, "3"),
            (70, "1"),
            (10, "0"),
            (20, "0"),
            (10, "5"),
            (20, "0"),
            (10, "5"),
            (20, "5"),
        ]);
        let record = extract(EntityKind::LwPolyline, &raw).unwrap();
        match record.geometry {
            EntityGeometry::LwPolyline(p) => {
                assert!(p.is_closed);
                assert_eq!(
                    p.points,
                    vec![Point2(0.0, 0.0), Point2(5.0, 0.0), Point2(5.0, 5.0)]
                );
            }
            other => panic!("unexpected geometry {:?}", other),
        }
    }

    #[test]
    fn polyline_reads_vertices() {
        let mut raw = tags(&[(66, "1"), (70, "0")]);
        raw.vertices = vec![
            vec![(10, "1".to_string()), (20, "2".to_string())],
            vec![(10, "3".to_string()), (20, "4".to_string())],
        ];
        let record = extract(EntityKind::Polyline, &raw).unwrap();
        assert_eq!(record.bbox, Some(BoundingBox(1.0, 2.0, 3.0, 4.0)));
    }

    #[test]
    fn ellipse_full_extents() {
        let raw = tags(&[(10, "0"), (20, "0"), (11, "4"), (21, "0"), (40, "0.5")]);
        let record = extract(EntityKind::Ellipse, &raw).unwrap();
        assert_eq!(record.bbox, Some(BoundingBox(-4.0, -2.0, 4.0, 2.0)));
    }

    #[test]
    fn dimension_measurement_and_override() {
        let raw = tags(&[(1, "<>"), (10, "5"), (20, "6"), (42, "25.4")]);
        let record = extract(EntityKind::Dimension, &raw).unwrap();
        assert_eq!(record.measurement(), Some(25.4));
        assert_eq!(record.text(), None);
        assert_eq!(record.position(), Some(Point2(5.0, 6.0)));

        let raw = tags(&[(1, "%%c20 H7"), (42, "nan")]);
        let record = extract(EntityKind::Dimension, &raw).unwrap();
        assert_eq!(record.measurement(), None);
        assert_eq!(record.text(), Some("⌀20 H7"));
        assert_eq!(record.bbox, None);
    }

    #[test]
    fn mtext_joins_chunks() {
        let raw = tags(&[(3, "MATERIAL: "), (1, "SUS304\\PQTY 2"), (10, "1"), (20, "2")]);
        let record = extract(EntityKind::MText, &raw).unwrap();
        assert_eq!(record.text(), Some("MATERIAL: SUS304\nQTY 2"));
        assert_eq!(record.position(), Some(Point2(1.0, 2.0)));
    }

    #[test]
    fn insert_defaults_scale_and_rotation() {
        let raw = tags(&[(2, "BOM_TABLE"), (10, "100"), (20, "50")]);
        let record = extract(EntityKind::Insert, &raw).unwrap();
        match record.geometry {
            EntityGeometry::Insert(i) => {
                assert_eq!(i.name, "BOM_TABLE");
                assert_eq!(i.xscale, 1.0);
                assert_eq!(i.yscale, 1.0);
                assert_eq!(i.rotation, 0.0);
            }
            other => panic!("unexpected geometry {:?}", other),
        }
    }

    #[test]
    fn hatch_flags() {
        let raw = tags(&[(2, "SOLID"), (70, "1"), (71, "0")]);
        let record = extract(EntityKind::Hatch, &raw).unwrap();
        assert_eq!(
            record.geometry,
            EntityGeometry::Hatch(HatchData {
                solid_fill: true,
                pattern_name: Some("SOLID".to_string())
            })
        );
    }
}
