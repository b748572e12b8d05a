// SPDX-License-Identifier: MIT OR Apache-2.0

//! DXF drawing parser
//!
//! Opening a drawing reads the header and layer table eagerly; entities are
//! then extracted lazily, one per `next()`. Entity kinds outside
//! [`EntityKind`] and entities that fail extraction are counted in the type
//! tally but never yielded.

pub mod extract;
pub mod reader;
pub mod text;

use crate::errors::DrawingError;
use crate::model::{DrawingMeta, EntityKind, EntityRecord, ParsedDrawing};
use crate::utils::file_name_of;
use extract::RawEntity;
use reader::TagReader;
use std::collections::BTreeMap;
use std::path::Path;

/// Maps a `$ACADVER` code to its release name; unknown codes are kept.
pub fn release_name(acadver: &str) -> String {
    let release = match acadver {
        "AC1009" => "R12",
        "AC1012" => "R13",
        "AC1014" => "R14",
        "AC1015" => "R2000",
        "AC1018" => "R2004",
        "AC1021" => "R2007",
        "AC1024" => "R2010",
        "AC1027" => "R2013",
        "AC1032" => "R2018",
        other => other,
    };
    release.to_string()
}

/// Extraction tallies for one drawing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub extracted: usize,
    /// Entities of modeled kinds dropped by extraction failures, per type.
    pub failed: BTreeMap<String, usize>,
    /// Entities of kinds that are counted but not modeled.
    pub unmodeled: usize,
    /// Paper-space entities, skipped without being counted by type.
    pub paperspace: usize,
}

impl ParseStats {
    pub fn failure_count(&self) -> usize {
        self.failed.values().sum()
    }
}

/// Entry point for reading drawings.
pub struct DrawingParser;

impl DrawingParser {
    /// Opens a drawing and positions the stream at its first entity.
    pub fn open(path: &Path) -> Result<EntityStream, DrawingError> {
        EntityStream::new(TagReader::open(path)?)
    }

    /// Parses in-memory ASCII DXF; `path` is used for naming and errors.
    pub fn from_ascii(path: &Path, text: &str) -> Result<EntityStream, DrawingError> {
        EntityStream::new(TagReader::from_ascii(path, text))
    }
}

/// Parses a whole drawing.
pub fn parse_drawing(path: &Path) -> Result<ParsedDrawing, DrawingError> {
    let (drawing, _) = DrawingParser::open(path)?.collect_drawing()?;
    Ok(drawing)
}

/// Lazy entity sequence of one opened drawing.
///
/// Restartable only by reopening. After a fatal error the stream is fused.
pub struct EntityStream {
    reader: TagReader,
    version: Option<String>,
    layers: Vec<String>,
    entity_counts: BTreeMap<String, usize>,
    stats: ParseStats,
    in_entities: bool,
}

impl EntityStream {
    fn new(reader: TagReader) -> Result<Self, DrawingError> {
        let mut stream = Self {
            reader,
            version: None,
            layers: Vec::new(),
            entity_counts: BTreeMap::new(),
            stats: ParseStats::default(),
            in_entities: false,
        };
        stream.read_preamble()?;
        Ok(stream)
    }

    /// Reads sections until ENTITIES begins (or the file ends).
    fn read_preamble(&mut self) -> Result<(), DrawingError> {
        let mut saw_tag = false;
        while let Some((code, value)) = self.reader.next_pair()? {
            saw_tag = true;
            if code == 999 {
                continue;
            }
            if code != 0 {
                return Err(self
                    .reader
                    .corrupt(format!("unexpected group code {} outside a section", code)));
            }
            match value.as_str() {
                "SECTION" => {
                    let name = match self.reader.next_pair()? {
                        Some((2, name)) => name,
                        _ => return Err(self.reader.corrupt("SECTION is missing its name")),
                    };
                    match name.as_str() {
                        "HEADER" => self.read_header()?,
                        "TABLES" => self.read_tables()?,
                        "ENTITIES" => {
                            self.in_entities = true;
                            return Ok(());
                        }
                        _ => self.reader.skip_section()?,
                    }
                }
                "EOF" => break,
                other => {
                    return Err(self
                        .reader
                        .corrupt(format!("expected SECTION or EOF, found {:?}", other)))
                }
            }
        }
        if !saw_tag {
            return Err(self.reader.corrupt("file is empty"));
        }
        Ok(())
    }

    fn read_header(&mut self) -> Result<(), DrawingError> {
        let mut current_var: Option<String> = None;
        let mut acadver: Option<String> = None;
        let mut codepage: Option<String> = None;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) if value == "ENDSEC" => break,
                Some((9, name)) => current_var = Some(name),
                Some((1, value)) if current_var.as_deref() == Some("$ACADVER") => {
                    let code = value.trim().to_string();
                    self.version = Some(release_name(&code));
                    acadver = Some(code);
                    current_var = None;
                }
                Some((3, value)) if current_var.as_deref() == Some("$DWGCODEPAGE") => {
                    codepage = Some(value.trim().to_string());
                    current_var = None;
                }
                Some(_) => {}
                None => return Err(self.reader.corrupt("HEADER is missing ENDSEC")),
            }
        }

        // R2007 (AC1021) and later are always UTF-8.
        let legacy = acadver.as_deref().map_or(true, |code| code < "AC1021");
        if let Some(codepage) = codepage.filter(|_| legacy) {
            match reader::codepage_encoding(&codepage) {
                Some(encoding) => self.reader.set_encoding(encoding),
                None => tracing::debug!(
                    "Unknown codepage {} in {}, reading text as UTF-8",
                    codepage,
                    self.reader.path().display()
                ),
            }
        }
        Ok(())
    }

    fn read_tables(&mut self) -> Result<(), DrawingError> {
        let mut table: Option<String> = None;
        let mut in_layer_record = false;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => match value.as_str() {
                    "ENDSEC" => return Ok(()),
                    "TABLE" => {
                        table = match self.reader.next_pair()? {
                            Some((2, name)) => Some(name),
                            Some(other) => {
                                self.reader.put_back(other);
                                None
                            }
                            None => None,
                        };
                        in_layer_record = false;
                    }
                    "ENDTAB" => {
                        table = None;
                        in_layer_record = false;
                    }
                    record => {
                        in_layer_record =
                            record == "LAYER" && table.as_deref() == Some("LAYER");
                    }
                },
                Some((2, name)) if in_layer_record => {
                    self.layers.push(name);
                    in_layer_record = false;
                }
                Some(_) => {}
                None => return Err(self.reader.corrupt("TABLES is missing ENDSEC")),
            }
        }
    }

    /// Reads the next top-level entity: its tags plus folded sub-entities.
    fn next_raw(&mut self) -> Result<Option<(String, RawEntity)>, DrawingError> {
        loop {
            let (code, name) = match self.reader.next_pair()? {
                Some(pair) => pair,
                None => return Err(self.reader.corrupt("ENTITIES is missing ENDSEC")),
            };
            if code != 0 {
                return Err(self
                    .reader
                    .corrupt(format!("expected an entity, found group code {}", code)));
            }
            if name == "ENDSEC" {
                return Ok(None);
            }

            let tags = self.reader.read_body()?;
            // Orphaned sub-entities are not entities of their own.
            if matches!(name.as_str(), "VERTEX" | "ATTRIB" | "SEQEND") {
                continue;
            }

            let mut raw = RawEntity {
                tags,
                vertices: Vec::new(),
            };
            if matches!(name.as_str(), "POLYLINE" | "INSERT") {
                self.fold_children(&mut raw)?;
            }
            return Ok(Some((name, raw)));
        }
    }

    /// Consumes VERTEX/ATTRIB children and their SEQEND.
    fn fold_children(&mut self, owner: &mut RawEntity) -> Result<(), DrawingError> {
        while let Some((code, name)) = self.reader.next_pair()? {
            match (code, name.as_str()) {
                (0, "VERTEX") => {
                    let tags = self.reader.read_body()?;
                    owner.vertices.push(tags);
                }
                (0, "ATTRIB") => {
                    self.reader.read_body()?;
                }
                (0, "SEQEND") => {
                    self.reader.read_body()?;
                    break;
                }
                _ => {
                    self.reader.put_back((code, name));
                    break;
                }
            }
        }
        Ok(())
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn layers(&self) -> &[String] {
        &self.layers
    }

    /// Type tally so far; complete once the stream is exhausted.
    pub fn entity_counts(&self) -> &BTreeMap<String, usize> {
        &self.entity_counts
    }

    pub fn stats(&self) -> &ParseStats {
        &self.stats
    }

    /// Drawing metadata reflecting the entities consumed so far.
    pub fn meta(&self) -> DrawingMeta {
        let path = self.reader.path();
        DrawingMeta {
            filename: file_name_of(path),
            path: path.to_string_lossy().into_owned(),
            version: self.version.clone(),
            layer_count: self.layers.len(),
            layers: self.layers.clone(),
            entity_counts: self.entity_counts.clone(),
            entity_sampled: self.stats.extracted,
        }
    }

    /// Drains the stream into a complete drawing.
    pub fn collect_drawing(mut self) -> Result<(ParsedDrawing, ParseStats), DrawingError> {
        let mut entities = Vec::new();
        for entity in self.by_ref() {
            entities.push(entity?);
        }
        let drawing = ParsedDrawing {
            meta: self.meta(),
            entities,
        };
        Ok((drawing, self.stats))
    }
}

impl Iterator for EntityStream {
    type Item = Result<EntityRecord, DrawingError>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.in_entities {
            let (name, raw) = match self.next_raw() {
                Ok(Some(entity)) => entity,
                Ok(None) => {
                    self.in_entities = false;
                    return None;
                }
                Err(err) => {
                    self.in_entities = false;
                    return Some(Err(err));
                }
            };

            if raw.is_paperspace() {
                self.stats.paperspace += 1;
                continue;
            }

            *self.entity_counts.entry(name.clone()).or_insert(0) += 1;

            let Some(kind) = EntityKind::from_dxf_name(&name) else {
                self.stats.unmodeled += 1;
                tracing::trace!("Skipping unmodeled entity {}", name);
                continue;
            };

            match extract::extract(kind, &raw) {
                Ok(record) => {
                    self.stats.extracted += 1;
                    return Some(Ok(record));
                }
                Err(err) => {
                    *self.stats.failed.entry(name).or_insert(0) += 1;
                    tracing::debug!(
                        "Dropping entity in {}: {}",
                        self.reader.path().display(),
                        err
                    );
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityGeometry;
    use std::path::PathBuf;

    fn dxf(body: &[&str]) -> String {
        let mut text = body.join("\n");
        text.push('\n');
        text
    }

    fn sample() -> String {
        dxf(&[
            "0", "SECTION", "2", "HEADER", "9", "$ACADVER", "1", "AC1015", "9", "$INSUNITS",
            "70", "4", "0", "ENDSEC", //
            "0", "SECTION", "2", "TABLES", "0", "TABLE", "2", "LTYPE", "0", "LTYPE", "2",
            "CONTINUOUS", "0", "ENDTAB", "0", "TABLE", "2", "LAYER", "70", "2", "0", "LAYER",
            "2", "0", "70", "0", "0", "LAYER", "2", "DIMS", "70", "0", "0", "ENDTAB", "0",
            "ENDSEC", //
            "0", "SECTION", "2", "BLOCKS", "0", "BLOCK", "2", "X", "0", "ENDBLK", "0", "ENDSEC",
            //
            "0", "SECTION", "2", "ENTITIES", //
            "0", "LINE", "8", "0", "10", "0", "20", "0", "11", "1", "21", "1", //
            "0", "3DFACE", "8", "0", "10", "0", "20", "0", //
            "0", "POLYLINE", "8", "0", "66", "1", "70", "1", "0", "VERTEX", "10", "0", "20",
            "0", "0", "VERTEX", "10", "2", "20", "0", "0", "SEQEND", //
            "0", "INSERT", "8", "0", "66", "1", "2", "TITLE", "10", "0", "20", "0", "0",
            "ATTRIB", "1", "A", "0", "SEQEND", //
            "0", "CIRCLE", "8", "0", "10", "0", "20", "0", "40", "oops", //
            "0", "ENDSEC", "0", "EOF",
        ])
    }

    #[test]
    fn reads_header_layers_and_entities() {
        let stream = DrawingParser::from_ascii(&PathBuf::from("/tmp/part.dxf"), &sample())
            .unwrap();
        assert_eq!(stream.version(), Some("R2000"));
        assert_eq!(stream.layers().to_vec(), vec!["0".to_string(), "DIMS".to_string()]);

        let (drawing, stats) = stream.collect_drawing().unwrap();
        let kinds: Vec<_> = drawing.entities.iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec![EntityKind::Line, EntityKind::Polyline, EntityKind::Insert]
        );

        let meta = &drawing.meta;
        assert_eq!(meta.filename, "part.dxf");
        assert_eq!(meta.layer_count, 2);
        assert_eq!(meta.entity_sampled, 3);
        assert_eq!(meta.entity_counts.get("3DFACE"), Some(&1));
        assert_eq!(meta.entity_counts.get("CIRCLE"), Some(&1));
        assert_eq!(meta.entity_counts.get("VERTEX"), None);
        assert_eq!(meta.entity_counts.get("ATTRIB"), None);
        assert_eq!(meta.entity_counts.get("SEQEND"), None);

        assert_eq!(stats.extracted, 3);
        assert_eq!(stats.unmodeled, 1);
        assert_eq!(stats.failed.get("CIRCLE"), Some(&1));

        match &drawing.entities[1].geometry {
            EntityGeometry::Polyline(p) => {
                assert_eq!(p.points.len(), 2);
                assert!(p.is_closed);
            }
            other => panic!("unexpected geometry {:?}", other),
        }
    }

    #[test]
    fn paperspace_entities_are_skipped() {
        let text = dxf(&[
            "0", "SECTION", "2", "ENTITIES", //
            "0", "LINE", "8", "0", "10", "0", "20", "0", "11", "1", "21", "1", //
            "0", "TEXT", "67", "1", "8", "TITLE", "10", "0", "20", "0", "1", "SHEET 1", //
            "0", "CIRCLE", "67", "0", "8", "0", "10", "0", "20", "0", "40", "2", //
            "0", "ENDSEC", "0", "EOF",
        ]);
        let (drawing, stats) = DrawingParser::from_ascii(&PathBuf::from("f.dxf"), &text)
            .unwrap()
            .collect_drawing()
            .unwrap();
        let kinds: Vec<_> = drawing.entities.iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec![EntityKind::Line, EntityKind::Circle]);
        assert_eq!(drawing.meta.entity_counts.get("TEXT"), None);
        assert_eq!(stats.paperspace, 1);
    }

    #[test]
    fn entities_stream_lazily() {
        let mut stream =
            DrawingParser::from_ascii(&PathBuf::from("a.dxf"), &sample()).unwrap();
        assert!(stream.next().unwrap().is_ok());
        assert_eq!(stream.entity_counts().get("LINE"), Some(&1));
        assert_eq!(stream.entity_counts().get("CIRCLE"), None);
    }

    #[test]
    fn missing_header_leaves_version_absent() {
        let text = dxf(&["0", "SECTION", "2", "ENTITIES", "0", "ENDSEC", "0", "EOF"]);
        let (drawing, _) = DrawingParser::from_ascii(&PathBuf::from("b.dxf"), &text)
            .unwrap()
            .collect_drawing()
            .unwrap();
        assert_eq!(drawing.meta.version, None);
        assert!(drawing.entities.is_empty());
        assert!(drawing.meta.layers.is_empty());
    }

    #[test]
    fn truncated_entities_section_is_corrupt() {
        let text = dxf(&[
            "0", "SECTION", "2", "ENTITIES", "0", "LINE", "10", "0", "20", "0", "11", "1",
            "21", "1",
        ]);
        let mut stream = DrawingParser::from_ascii(&PathBuf::from("c.dxf"), &text).unwrap();
        assert!(stream.next().unwrap().is_ok());
        assert!(matches!(
            stream.next(),
            Some(Err(DrawingError::Corrupt { .. }))
        ));
        assert!(stream.next().is_none());
    }

    #[test]
    fn garbage_is_corrupt() {
        let result = DrawingParser::from_ascii(&PathBuf::from("d.dxf"), "hello\nworld\n");
        assert!(matches!(result, Err(DrawingError::Corrupt { .. })));
        let result = DrawingParser::from_ascii(&PathBuf::from("e.dxf"), "");
        assert!(matches!(result, Err(DrawingError::Corrupt { .. })));
    }

    fn shift_jis_drawing(acadver: &str) -> Vec<u8> {
        let mut bytes = dxf(&[
            "0", "SECTION", "2", "HEADER", "9", "$ACADVER", "1", acadver, "9",
            "$DWGCODEPAGE", "3", "ANSI_932", "0", "ENDSEC", //
            "0", "SECTION", "2", "ENTITIES", "0", "TEXT", "8", "NOTES", "10", "0", "20", "0",
            "1",
        ])
        .into_bytes();
        // "ステンレス" in Shift-JIS
        bytes.extend_from_slice(&[0x83, 0x58, 0x83, 0x65, 0x83, 0x93, 0x83, 0x8C, 0x83, 0x58]);
        bytes.extend_from_slice(b"\n0\nENDSEC\n0\nEOF\n");
        bytes
    }

    fn only_text(bytes: Vec<u8>) -> String {
        let stream = EntityStream::new(TagReader::from_bytes("jp.dxf", bytes)).unwrap();
        let (drawing, _) = stream.collect_drawing().unwrap();
        match &drawing.entities[0].geometry {
            EntityGeometry::Text(text) => text.text.clone(),
            other => panic!("unexpected geometry {:?}", other),
        }
    }

    #[test]
    fn legacy_codepage_text_is_decoded() {
        let text = only_text(shift_jis_drawing("AC1015"));
        assert_eq!(text, "ステンレス");
        assert_eq!(
            crate::classify::classify(&text),
            crate::classify::Category::Material
        );
    }

    #[test]
    fn codepage_is_ignored_from_r2007() {
        let text = only_text(shift_jis_drawing("AC1021"));
        assert_ne!(text, "ステンレス");
    }

    #[test]
    fn release_names() {
        assert_eq!(release_name("AC1009"), "R12");
        assert_eq!(release_name("AC1032"), "R2018");
        assert_eq!(release_name("AC9999"), "AC9999");
    }
}
