//! PLY header: format line, elements and their properties.

use std::fmt;
use std::io::BufRead;

use serde::Serialize;

use crate::error::{ArtifactError, Result};

/// Headers longer than this are rejected rather than scanned forever.
const MAX_HEADER_LINES: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlyFormat {
    Ascii,
    BinaryLittleEndian,
    BinaryBigEndian,
}

impl PlyFormat {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "ascii" => Some(Self::Ascii),
            "binary_little_endian" => Some(Self::BinaryLittleEndian),
            "binary_big_endian" => Some(Self::BinaryBigEndian),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ascii => "ascii",
            Self::BinaryLittleEndian => "binary_little_endian",
            Self::BinaryBigEndian => "binary_big_endian",
        }
    }
}

impl fmt::Display for PlyFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Float32,
    Float64,
}

impl ScalarType {
    /// Accepts both the classic (`uchar`, `float`) and sized (`uint8`, `float32`) names.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "char" | "int8" => Some(Self::Int8),
            "uchar" | "uint8" => Some(Self::UInt8),
            "short" | "int16" => Some(Self::Int16),
            "ushort" | "uint16" => Some(Self::UInt16),
            "int" | "int32" => Some(Self::Int32),
            "uint" | "uint32" => Some(Self::UInt32),
            "float" | "float32" => Some(Self::Float32),
            "double" | "float64" => Some(Self::Float64),
            _ => None,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }

    /// Decode one little-endian value. `bytes.len()` must equal `size()`.
    pub fn decode_le(&self, bytes: &[u8]) -> f64 {
        match self {
            Self::Int8 => bytes[0] as i8 as f64,
            Self::UInt8 => bytes[0] as f64,
            Self::Int16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f64,
            Self::UInt16 => u16::from_le_bytes([bytes[0], bytes[1]]) as f64,
            Self::Int32 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
            Self::UInt32 => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
            Self::Float32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
            Self::Float64 => {
                let mut b = [0u8; 8];
                b.copy_from_slice(&bytes[..8]);
                f64::from_le_bytes(b)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Scalar(ScalarType),
    List { count: ScalarType, item: ScalarType },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    pub kind: PropertyKind,
}

impl Property {
    pub fn is_scalar(&self) -> bool {
        matches!(self.kind, PropertyKind::Scalar(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub count: usize,
    pub properties: Vec<Property>,
}

impl Element {
    pub fn property_index(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| p.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlyHeader {
    pub format: PlyFormat,
    pub version: String,
    pub elements: Vec<Element>,
    pub comments: Vec<String>,
}

impl PlyHeader {
    pub fn element(&self, name: &str) -> Option<&Element> {
        self.elements.iter().find(|e| e.name == name)
    }

    pub fn vertex(&self) -> Option<&Element> {
        self.element("vertex")
    }

    /// Read through `end_header`, leaving `reader` positioned at the body.
    pub fn read<R: BufRead>(reader: &mut R) -> Result<Self> {
        let mut line_no = 0usize;
        let mut buf = Vec::new();
        let mut next_line = |reader: &mut R, line_no: &mut usize| -> Result<Option<String>> {
            buf.clear();
            let n = reader
                .read_until(b'\n', &mut buf)
                .map_err(|e| ArtifactError::MalformedHeader {
                    line: *line_no + 1,
                    reason: e.to_string(),
                })?;
            if n == 0 {
                return Ok(None);
            }
            *line_no += 1;
            let text = std::str::from_utf8(&buf).map_err(|_| ArtifactError::MalformedHeader {
                line: *line_no,
                reason: "header is not valid text".to_string(),
            })?;
            Ok(Some(text.trim_end_matches(['\r', '\n']).to_string()))
        };

        match next_line(reader, &mut line_no)? {
            Some(magic) if magic.trim() == "ply" => {}
            _ => return Err(ArtifactError::NotPly),
        }

        let mut format: Option<(PlyFormat, String)> = None;
        let mut elements: Vec<Element> = Vec::new();
        let mut comments = Vec::new();

        loop {
            if line_no > MAX_HEADER_LINES {
                return Err(ArtifactError::MalformedHeader {
                    line: line_no,
                    reason: format!("no end_header within {} lines", MAX_HEADER_LINES),
                });
            }
            let Some(line) = next_line(reader, &mut line_no)? else {
                return Err(ArtifactError::MalformedHeader {
                    line: line_no,
                    reason: "unexpected end of file before end_header".to_string(),
                });
            };
            let malformed = |reason: String| ArtifactError::MalformedHeader {
                line: line_no,
                reason,
            };
            let tokens: Vec<&str> = line.split_whitespace().collect();
            match tokens.as_slice() {
                [] => {}
                ["end_header"] => break,
                ["comment", ..] | ["obj_info", ..] => {
                    comments.push(line.trim_start()[tokens[0].len()..].trim().to_string());
                }
                ["format", kind, version] => {
                    let parsed = PlyFormat::parse(kind)
                        .ok_or_else(|| malformed(format!("unknown format '{}'", kind)))?;
                    format = Some((parsed, version.to_string()));
                }
                ["element", name, count] => {
                    let count = count
                        .parse::<usize>()
                        .map_err(|_| malformed(format!("invalid element count '{}'", count)))?;
                    elements.push(Element {
                        name: name.to_string(),
                        count,
                        properties: Vec::new(),
                    });
                }
                ["property", "list", count_ty, item_ty, name] => {
                    let count = ScalarType::parse(count_ty)
                        .ok_or_else(|| malformed(format!("unknown type '{}'", count_ty)))?;
                    let item = ScalarType::parse(item_ty)
                        .ok_or_else(|| malformed(format!("unknown type '{}'", item_ty)))?;
                    let element = elements
                        .last_mut()
                        .ok_or_else(|| malformed("property before any element".to_string()))?;
                    element.properties.push(Property {
                        name: name.to_string(),
                        kind: PropertyKind::List { count, item },
                    });
                }
                ["property", ty, name] => {
                    let ty = ScalarType::parse(ty)
                        .ok_or_else(|| malformed(format!("unknown type '{}'", ty)))?;
                    let element = elements
                        .last_mut()
                        .ok_or_else(|| malformed("property before any element".to_string()))?;
                    element.properties.push(Property {
                        name: name.to_string(),
                        kind: PropertyKind::Scalar(ty),
                    });
                }
                _ => return Err(malformed(format!("unrecognized line '{}'", line))),
            }
        }

        let (format, version) = format.ok_or(ArtifactError::MalformedHeader {
            line: line_no,
            reason: "missing format line".to_string(),
        })?;
        Ok(Self {
            format,
            version,
            elements,
            comments,
        })
    }
}
