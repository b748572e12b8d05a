// SPDX-License-Identifier: MIT OR Apache-2.0

//! Group-code/value tag stream over ASCII and binary DXF.

use crate::errors::DrawingError;
use encoding_rs::Encoding;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Read};
use std::path::{Path, PathBuf};

/// Binary DXF files start with this sentinel.
pub const BINARY_SENTINEL: &[u8; 22] = b"AutoCAD Binary DXF\r\n\x1a\0";

/// One group-code/value pair. Binary values are rendered to text so that
/// both encodings feed the same extraction code.
pub type Tag = (i32, String);

/// Text encoding named by a `$DWGCODEPAGE` value such as `ANSI_932`.
///
/// Returns `None` for codepages without a known mapping.
pub fn codepage_encoding(codepage: &str) -> Option<&'static Encoding> {
    let encoding = match codepage.trim().to_ascii_uppercase().as_str() {
        "ANSI_874" => encoding_rs::WINDOWS_874,
        "ANSI_932" | "DOS932" => encoding_rs::SHIFT_JIS,
        "ANSI_936" => encoding_rs::GBK,
        "ANSI_949" => encoding_rs::EUC_KR,
        "ANSI_950" => encoding_rs::BIG5,
        "ANSI_1250" => encoding_rs::WINDOWS_1250,
        "ANSI_1251" => encoding_rs::WINDOWS_1251,
        "ANSI_1252" => encoding_rs::WINDOWS_1252,
        "ANSI_1253" => encoding_rs::WINDOWS_1253,
        "ANSI_1254" => encoding_rs::WINDOWS_1254,
        "ANSI_1255" => encoding_rs::WINDOWS_1255,
        "ANSI_1256" => encoding_rs::WINDOWS_1256,
        "ANSI_1257" => encoding_rs::WINDOWS_1257,
        "ANSI_1258" => encoding_rs::WINDOWS_1258,
        "DOS866" => encoding_rs::IBM866,
        "UTF8" | "UTF-8" => encoding_rs::UTF_8,
        _ => return None,
    };
    Some(encoding)
}

enum Source {
    Ascii(AsciiTags),
    Binary(BinaryTags),
}

/// Tag reader with one tag of look-back.
pub struct TagReader {
    path: PathBuf,
    source: Source,
    buffer: Option<Tag>,
}

impl TagReader {
    /// Opens `path`, sniffing the binary sentinel.
    pub fn open(path: &Path) -> Result<Self, DrawingError> {
        let read_err = |source| DrawingError::Read {
            path: path.to_path_buf(),
            source,
        };
        let mut file = File::open(path).map_err(read_err)?;

        let mut prefix = Vec::with_capacity(BINARY_SENTINEL.len());
        (&mut file)
            .take(BINARY_SENTINEL.len() as u64)
            .read_to_end(&mut prefix)
            .map_err(read_err)?;

        let source = if prefix.as_slice() == BINARY_SENTINEL.as_slice() {
            let boxed: Box<dyn Read> = Box::new(file);
            Source::Binary(BinaryTags::new(BufReader::new(boxed)))
        } else {
            let chained: Box<dyn Read> = Box::new(Cursor::new(prefix).chain(file));
            Source::Ascii(AsciiTags::new(BufReader::new(chained)))
        };

        Ok(Self {
            path: path.to_path_buf(),
            source,
            buffer: None,
        })
    }

    /// Reader over in-memory ASCII DXF text.
    pub fn from_ascii(path: impl Into<PathBuf>, text: &str) -> Self {
        Self::from_bytes(path, text.as_bytes().to_vec())
    }

    /// Reader over in-memory ASCII DXF bytes in any codepage.
    pub fn from_bytes(path: impl Into<PathBuf>, bytes: Vec<u8>) -> Self {
        let reader: Box<dyn Read> = Box::new(Cursor::new(bytes));
        Self {
            path: path.into(),
            source: Source::Ascii(AsciiTags::new(BufReader::new(reader))),
            buffer: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Encoding used for text values read from here on. Defaults to UTF-8.
    pub fn set_encoding(&mut self, encoding: &'static Encoding) {
        match &mut self.source {
            Source::Ascii(s) => s.encoding = encoding,
            Source::Binary(s) => s.encoding = encoding,
        }
    }

    /// Line number (ASCII) or tag ordinal (binary) of the last tag read.
    pub fn position(&self) -> usize {
        match &self.source {
            Source::Ascii(s) => s.line_number,
            Source::Binary(s) => s.tag_number,
        }
    }

    pub fn next_pair(&mut self) -> Result<Option<Tag>, DrawingError> {
        if let Some(pair) = self.buffer.take() {
            return Ok(Some(pair));
        }
        let result = match &mut self.source {
            Source::Ascii(s) => s.next_tag(),
            Source::Binary(s) => s.next_tag(),
        };
        result.map_err(|err| self.to_drawing_error(err))
    }

    /// Pushes a tag back. Only one tag of look-back is kept; a second call
    /// before `next_pair` replaces the first.
    pub fn put_back(&mut self, pair: Tag) {
        debug_assert!(self.buffer.is_none(), "tag look-back overflow");
        self.buffer = Some(pair);
    }

    /// Reads every tag up to (not including) the next code-0 tag.
    pub fn read_body(&mut self) -> Result<Vec<Tag>, DrawingError> {
        let mut tags = Vec::new();
        while let Some(pair) = self.next_pair()? {
            if pair.0 == 0 {
                self.put_back(pair);
                break;
            }
            tags.push(pair);
        }
        Ok(tags)
    }

    /// Discards tags through the next `0/ENDSEC`.
    pub fn skip_section(&mut self) -> Result<(), DrawingError> {
        loop {
            match self.next_pair()? {
                Some((0, value)) if value == "ENDSEC" => return Ok(()),
                Some(_) => continue,
                None => return Err(self.corrupt("section is missing ENDSEC")),
            }
        }
    }

    pub fn corrupt(&self, message: impl Into<String>) -> DrawingError {
        DrawingError::Corrupt {
            path: self.path.clone(),
            line: self.position(),
            message: message.into(),
        }
    }

    fn to_drawing_error(&self, err: TagError) -> DrawingError {
        match err {
            TagError::Io(source) => DrawingError::Read {
                path: self.path.clone(),
                source,
            },
            TagError::Malformed(message) => self.corrupt(message),
        }
    }
}

enum TagError {
    Io(std::io::Error),
    Malformed(String),
}

impl From<std::io::Error> for TagError {
    fn from(err: std::io::Error) -> Self {
        TagError::Io(err)
    }
}

struct AsciiTags {
    reader: BufReader<Box<dyn Read>>,
    line: Vec<u8>,
    line_number: usize,
    encoding: &'static Encoding,
}

impl AsciiTags {
    fn new(reader: BufReader<Box<dyn Read>>) -> Self {
        Self {
            reader,
            line: Vec::new(),
            line_number: 0,
            encoding: encoding_rs::UTF_8,
        }
    }

    fn read_line(&mut self) -> Result<Option<String>, TagError> {
        self.line.clear();
        if self.reader.read_until(b'\n', &mut self.line)? == 0 {
            return Ok(None);
        }
        self.line_number += 1;
        let (text, _) = self.encoding.decode_without_bom_handling(&self.line);
        Ok(Some(text.trim_end_matches(['\n', '\r']).to_string()))
    }

    fn next_tag(&mut self) -> Result<Option<Tag>, TagError> {
        let code_line = loop {
            match self.read_line()? {
                // Trailing blank lines after EOF are common.
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => break line,
                None => return Ok(None),
            }
        };

        let code = code_line.trim().parse::<i32>().map_err(|_| {
            TagError::Malformed(format!("group code {:?} is not an integer", code_line.trim()))
        })?;

        let value = self.read_line()?.ok_or_else(|| {
            TagError::Malformed(format!("group code {} has no value line", code))
        })?;

        Ok(Some((code, value)))
    }
}

/// Value encoding of a binary group code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryValue {
    Text,
    Double,
    Int16,
    Int32,
    Int64,
    Bool,
    Chunk,
}

fn binary_value_type(code: i32) -> BinaryValue {
    match code {
        0..=9 | 100..=102 | 105 | 300..=309 | 320..=369 | 390..=399 | 410..=419 | 430..=439
        | 470..=481 | 999 | 1000..=1003 | 1005..=1009 => BinaryValue::Text,
        10..=59 | 110..=149 | 210..=239 | 460..=469 | 1010..=1059 => BinaryValue::Double,
        60..=79 | 170..=179 | 270..=289 | 370..=389 | 400..=409 | 1060..=1070 => {
            BinaryValue::Int16
        }
        90..=99 | 420..=429 | 440..=459 | 1071 => BinaryValue::Int32,
        160..=169 => BinaryValue::Int64,
        290..=299 => BinaryValue::Bool,
        310..=319 | 1004 => BinaryValue::Chunk,
        _ => BinaryValue::Text,
    }
}

struct BinaryTags {
    reader: BufReader<Box<dyn Read>>,
    /// `None` until the first tag has been sniffed.
    wide_codes: Option<bool>,
    tag_number: usize,
    encoding: &'static Encoding,
}

impl BinaryTags {
    fn new(reader: BufReader<Box<dyn Read>>) -> Self {
        Self {
            reader,
            wide_codes: None,
            tag_number: 0,
            encoding: encoding_rs::UTF_8,
        }
    }

    fn read_exact<const N: usize>(&mut self) -> Result<[u8; N], TagError> {
        let mut buf = [0u8; N];
        self.reader.read_exact(&mut buf).map_err(|err| {
            if err.kind() == std::io::ErrorKind::UnexpectedEof {
                TagError::Malformed("binary tag is truncated".to_string())
            } else {
                TagError::Io(err)
            }
        })?;
        Ok(buf)
    }

    fn read_code(&mut self) -> Result<Option<i32>, TagError> {
        let available = self.reader.fill_buf()?;
        if available.is_empty() {
            return Ok(None);
        }

        // R13+ writes 2-byte codes. The first tag is always 0/SECTION, so a
        // zero second byte means a 16-bit code.
        let wide = match self.wide_codes {
            Some(wide) => wide,
            None => {
                let wide = available.len() >= 2 && available[0] == 0 && available[1] == 0;
                self.wide_codes = Some(wide);
                wide
            }
        };

        let code = if wide {
            i16::from_le_bytes(self.read_exact::<2>()?) as i32
        } else {
            match self.read_exact::<1>()?[0] {
                255 => i16::from_le_bytes(self.read_exact::<2>()?) as i32,
                byte => byte as i32,
            }
        };
        Ok(Some(code))
    }

    fn read_text(&mut self) -> Result<String, TagError> {
        let mut raw = Vec::new();
        self.reader.read_until(0, &mut raw)?;
        if raw.pop() != Some(0) {
            return Err(TagError::Malformed(
                "binary string is not terminated".to_string(),
            ));
        }
        let (text, _) = self.encoding.decode_without_bom_handling(&raw);
        Ok(text.into_owned())
    }

    fn next_tag(&mut self) -> Result<Option<Tag>, TagError> {
        let Some(code) = self.read_code()? else {
            return Ok(None);
        };
        self.tag_number += 1;

        let value = match binary_value_type(code) {
            BinaryValue::Text => self.read_text()?,
            BinaryValue::Double => f64::from_le_bytes(self.read_exact::<8>()?).to_string(),
            BinaryValue::Int16 => i16::from_le_bytes(self.read_exact::<2>()?).to_string(),
            BinaryValue::Int32 => i32::from_le_bytes(self.read_exact::<4>()?).to_string(),
            BinaryValue::Int64 => i64::from_le_bytes(self.read_exact::<8>()?).to_string(),
            BinaryValue::Bool => u8::from_le_bytes(self.read_exact::<1>()?).to_string(),
            BinaryValue::Chunk => {
                let len = self.read_exact::<1>()?[0] as usize;
                let mut chunk = vec![0u8; len];
                self.reader.read_exact(&mut chunk).map_err(|_| {
                    TagError::Malformed("binary chunk is truncated".to_string())
                })?;
                chunk.iter().map(|b| format!("{:02X}", b)).collect()
            }
        };
        Ok(Some((code, value)))
    }
}
