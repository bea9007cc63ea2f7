//! Vertex decoding for splat PLY files.
//!
//! Every element in the body is walked in declaration order; only `vertex`
//! records are kept. Records with a non-finite splat field are dropped and
//! counted rather than failing the whole file.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

use crate::error::{ArtifactError, Result};
use crate::gate::REQUIRED_FIELDS;
use crate::ply::header::{Element, PlyFormat, PlyHeader, PropertyKind, ScalarType};

const POSITION_FIELDS: [&str; 3] = ["x", "y", "z"];

/// Upper bound on points reserved up front. The header count is untrusted.
const MAX_PREALLOC_POINTS: usize = 1 << 20;

/// One gaussian as stored in the PLY. `scale` is log-space and `opacity` is a
/// logit; `rotation` is `rot_0..rot_3`, i.e. `w, x, y, z`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplatPoint {
    pub position: [f32; 3],
    pub scale: [f32; 3],
    pub rotation: [f32; 4],
    pub f_dc: [f32; 3],
    pub opacity: f32,
}

impl SplatPoint {
    fn from_fields(v: &[f64; 14]) -> Option<Self> {
        if v.iter().any(|x| !x.is_finite()) {
            return None;
        }
        let f = |i: usize| v[i] as f32;
        Some(Self {
            position: [f(0), f(1), f(2)],
            f_dc: [f(3), f(4), f(5)],
            opacity: f(6),
            scale: [f(7), f(8), f(9)],
            rotation: [f(10), f(11), f(12), f(13)],
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct SplatCloud {
    pub points: Vec<SplatPoint>,
    /// Records skipped because a field was NaN or infinite
    pub dropped: usize,
}

impl SplatCloud {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Decode every splat in `path`.
pub fn read_splats(path: &Path) -> Result<SplatCloud> {
    let file = File::open(path).map_err(|e| ArtifactError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let header = PlyHeader::read(&mut reader)?;
    let cloud = match header.format {
        PlyFormat::BinaryBigEndian => {
            return Err(ArtifactError::UnsupportedFormat(
                header.format.as_str().to_string(),
            ))
        }
        PlyFormat::BinaryLittleEndian => decode(&header, &mut BinarySource { reader })?,
        PlyFormat::Ascii => {
            let mut body = String::new();
            reader
                .read_to_string(&mut body)
                .map_err(|e| ArtifactError::io(path, e))?;
            decode(&header, &mut AsciiSource {
                tokens: body.split_whitespace(),
            })?
        }
    };
    tracing::debug!(
        path = %path.display(),
        points = cloud.len(),
        dropped = cloud.dropped,
        "splats decoded"
    );
    Ok(cloud)
}

/// Column of each splat field within the vertex record, in `SplatPoint::from_fields` order.
fn field_columns(vertex: Option<&Element>) -> Result<[usize; 14]> {
    let wanted = POSITION_FIELDS.iter().chain(REQUIRED_FIELDS.iter());
    let mut columns = [0usize; 14];
    let mut missing = Vec::new();
    for (slot, name) in wanted.enumerate() {
        let column = vertex.and_then(|v| {
            v.property_index(name)
                .filter(|&i| v.properties[i].is_scalar())
        });
        match column {
            Some(i) => columns[slot] = i,
            None => missing.push(name.to_string()),
        }
    }
    if missing.is_empty() {
        Ok(columns)
    } else {
        Err(ArtifactError::MissingFields(missing))
    }
}

/// Failure while pulling one value out of the body.
enum Pull {
    Eof,
    Bad(String),
    Io(io::Error),
}

trait ValueSource {
    fn scalar(&mut self, ty: ScalarType) -> std::result::Result<f64, Pull>;
}

struct AsciiSource<'a> {
    tokens: std::str::SplitWhitespace<'a>,
}

impl ValueSource for AsciiSource<'_> {
    fn scalar(&mut self, _ty: ScalarType) -> std::result::Result<f64, Pull> {
        let token = self.tokens.next().ok_or(Pull::Eof)?;
        match token {
            "nan" | "NaN" | "-nan" => Ok(f64::NAN),
            "inf" | "Infinity" => Ok(f64::INFINITY),
            "-inf" | "-Infinity" => Ok(f64::NEG_INFINITY),
            _ => token
                .parse::<f64>()
                .map_err(|_| Pull::Bad(format!("'{}' is not a number", token))),
        }
    }
}

struct BinarySource<R> {
    reader: R,
}

impl<R: BufRead> ValueSource for BinarySource<R> {
    fn scalar(&mut self, ty: ScalarType) -> std::result::Result<f64, Pull> {
        let mut buf = [0u8; 8];
        let bytes = &mut buf[..ty.size()];
        self.reader.read_exact(bytes).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                Pull::Eof
            } else {
                Pull::Io(e)
            }
        })?;
        Ok(ty.decode_le(bytes))
    }
}

fn decode(header: &PlyHeader, source: &mut dyn ValueSource) -> Result<SplatCloud> {
    let columns = field_columns(header.vertex())?;
    let mut cloud = SplatCloud::default();

    for element in &header.elements {
        let is_vertex = element.name == "vertex";
        if is_vertex {
            cloud.points.reserve(element.count.min(MAX_PREALLOC_POINTS));
        }
        let mut record = vec![0f64; element.properties.len()];
        for index in 0..element.count {
            let fail = |pull: Pull| match pull {
                Pull::Eof => ArtifactError::Truncated {
                    element: element.name.clone(),
                    expected: element.count,
                    read: index,
                },
                Pull::Bad(reason) => ArtifactError::InvalidValue {
                    element: element.name.clone(),
                    record: index,
                    reason,
                },
                Pull::Io(e) => ArtifactError::InvalidValue {
                    element: element.name.clone(),
                    record: index,
                    reason: e.to_string(),
                },
            };
            for (slot, property) in record.iter_mut().zip(&element.properties) {
                match property.kind {
                    PropertyKind::Scalar(ty) => *slot = source.scalar(ty).map_err(fail)?,
                    PropertyKind::List { count, item } => {
                        let n = source.scalar(count).map_err(fail)?;
                        if !(n >= 0.0 && n.fract() == 0.0) {
                            return Err(fail(Pull::Bad(format!(
                                "invalid list length {} for '{}'",
                                n, property.name
                            ))));
                        }
                        for _ in 0..n as usize {
                            source.scalar(item).map_err(fail)?;
                        }
                        *slot = f64::NAN;
                    }
                }
            }
            if is_vertex {
                let fields: [f64; 14] = std::array::from_fn(|i| record[columns[i]]);
                match SplatPoint::from_fields(&fields) {
                    Some(point) => cloud.points.push(point),
                    None => cloud.dropped += 1,
                }
            }
        }
    }
    Ok(cloud)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::test_support::{ascii_header, SPLAT_FIELDS};

    fn write(dir: &Path, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.join("cloud.ply");
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_read_ascii_drops_nan_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut text = ascii_header(3, &SPLAT_FIELDS);
        text.push_str("1 2 3 0 0 0 0 0 0 0 1 0 0 0\n");
        text.push_str("nan 0 0 0 0 0 0 0 0 0 1 0 0 0\n");
        text.push_str("4 5 6 0.5 -0.5 1 2 -1 -2 -3 0 1 0 0\n");
        let path = write(dir.path(), text.as_bytes());

        let cloud = read_splats(&path).unwrap();
        assert_eq!(cloud.len(), 2);
        assert_eq!(cloud.dropped, 1);
        let last = cloud.points[1];
        assert_eq!(last.position, [4.0, 5.0, 6.0]);
        assert_eq!(last.f_dc, [0.5, -0.5, 1.0]);
        assert_eq!(last.opacity, 2.0);
        assert_eq!(last.scale, [-1.0, -2.0, -3.0]);
        assert_eq!(last.rotation, [0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_read_binary_with_extra_columns_and_elements() {
        let dir = tempfile::tempdir().unwrap();
        // Property order differs from SplatPoint layout on purpose.
        let header = "ply\nformat binary_little_endian 1.0\n\
element extrinsic 2\nproperty float extrinsic\n\
element vertex 1\n\
property float opacity\nproperty float x\nproperty float y\nproperty float z\n\
property uchar flag\nproperty list uchar float tags\n\
property float f_dc_0\nproperty float f_dc_1\nproperty float f_dc_2\n\
property float scale_0\nproperty float scale_1\nproperty float scale_2\n\
property float rot_0\nproperty float rot_1\nproperty float rot_2\nproperty float rot_3\n\
end_header\n";
        let mut bytes = header.as_bytes().to_vec();
        for v in [9.0f32, 9.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes.extend_from_slice(&0.25f32.to_le_bytes());
        for v in [1.0f32, 2.0, 3.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes.push(7);
        bytes.push(2);
        for v in [100.0f32, 200.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        for v in [0.1f32, 0.2, 0.3, -1.0, -1.0, -1.0, 1.0, 0.0, 0.0, 0.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let path = write(dir.path(), &bytes);

        let cloud = read_splats(&path).unwrap();
        assert_eq!(cloud.len(), 1);
        let p = cloud.points[0];
        assert_eq!(p.position, [1.0, 2.0, 3.0]);
        assert_eq!(p.opacity, 0.25);
        assert_eq!(p.f_dc, [0.1, 0.2, 0.3]);
        assert_eq!(p.rotation, [1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_truncated_binary_body() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = ascii_header(2, &SPLAT_FIELDS)
            .replace("format ascii", "format binary_little_endian")
            .into_bytes();
        for _ in 0..14 {
            bytes.extend_from_slice(&1.0f32.to_le_bytes());
        }
        bytes.extend_from_slice(&[0, 0]);
        let path = write(dir.path(), &bytes);

        match read_splats(&path).unwrap_err() {
            ArtifactError::Truncated {
                element,
                expected,
                read,
            } => {
                assert_eq!(element, "vertex");
                assert_eq!(expected, 2);
                assert_eq!(read, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_missing_position_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), ascii_header(0, &REQUIRED_FIELDS).as_bytes());
        let err = read_splats(&path).unwrap_err();
        assert_eq!(err.missing_fields(), ["x", "y", "z"]);
    }

    #[test]
    fn test_huge_vertex_count_is_truncation_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let mut text = ascii_header(usize::MAX, &SPLAT_FIELDS);
        text.push_str("1 2 3 0 0 0 0 0 0 0 1 0 0 0\n");
        let path = write(dir.path(), text.as_bytes());
        match read_splats(&path).unwrap_err() {
            ArtifactError::Truncated { expected, read, .. } => {
                assert_eq!(expected, usize::MAX);
                assert_eq!(read, 1);
            }
            other => panic!("unexpected {other:?}"),
        }

        let mut bytes = ascii_header(usize::MAX, &SPLAT_FIELDS)
            .replace("format ascii", "format binary_little_endian")
            .into_bytes();
        bytes.extend_from_slice(&1.0f32.to_le_bytes());
        let path = write(dir.path(), &bytes);
        assert!(matches!(
            read_splats(&path),
            Err(ArtifactError::Truncated { read: 0, .. })
        ));
    }

    #[test]
    fn test_garbage_ascii_value() {
        let dir = tempfile::tempdir().unwrap();
        let mut text = ascii_header(1, &SPLAT_FIELDS);
        text.push_str("1 2 three 0 0 0 0 0 0 0 1 0 0 0\n");
        let path = write(dir.path(), text.as_bytes());
        assert!(matches!(
            read_splats(&path),
            Err(ArtifactError::InvalidValue { record: 0, .. })
        ));
    }
}
