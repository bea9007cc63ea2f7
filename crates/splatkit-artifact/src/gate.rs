//! Artifact gate: does a PLY carry the per-vertex fields a splat renderer needs?
//!
//! Only the header is read; the body is never touched and the file is never
//! modified.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::Serialize;

use crate::error::{ArtifactError, Result};
use crate::ply::header::{PlyFormat, PlyHeader};

/// Required vertex properties, in the order missing fields are reported.
pub const REQUIRED_FIELDS: [&str; 11] = [
    "f_dc_0", "f_dc_1", "f_dc_2", "opacity", "scale_0", "scale_1", "scale_2", "rot_0", "rot_1",
    "rot_2", "rot_3",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactReport {
    pub valid: bool,
    pub missing_fields: Vec<String>,
    pub format: PlyFormat,
    pub vertex_count: usize,
    /// Vertex property names in declaration order
    pub property_names: Vec<String>,
}

/// Open `path`, parse its header and check the required fields.
pub fn validate_splat_artifact(path: &Path) -> Result<ArtifactReport> {
    let file = File::open(path).map_err(|e| ArtifactError::io(path, e))?;
    let header = PlyHeader::read(&mut BufReader::new(file))?;
    let report = check_header(&header)?;
    tracing::debug!(
        path = %path.display(),
        valid = report.valid,
        vertices = report.vertex_count,
        "artifact checked"
    );
    Ok(report)
}

/// A required field declared as a list counts as missing. Big-endian bodies
/// are refused outright since nothing downstream decodes them.
pub fn check_header(header: &PlyHeader) -> Result<ArtifactReport> {
    if header.format == PlyFormat::BinaryBigEndian {
        return Err(ArtifactError::UnsupportedFormat(
            header.format.as_str().to_string(),
        ));
    }
    let (vertex_count, property_names, missing_fields) = match header.vertex() {
        Some(vertex) => {
            let missing = REQUIRED_FIELDS
                .iter()
                .filter(|field| {
                    !vertex
                        .properties
                        .iter()
                        .any(|p| p.name == **field && p.is_scalar())
                })
                .map(|f| f.to_string())
                .collect::<Vec<_>>();
            let names = vertex.properties.iter().map(|p| p.name.clone()).collect();
            (vertex.count, names, missing)
        }
        None => (
            0,
            Vec::new(),
            REQUIRED_FIELDS.iter().map(|f| f.to_string()).collect(),
        ),
    };
    Ok(ArtifactReport {
        valid: missing_fields.is_empty(),
        missing_fields,
        format: header.format,
        vertex_count,
        property_names,
    })
}
