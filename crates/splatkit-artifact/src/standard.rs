//! Standard 3DGS PLY export.
//!
//! The inference CLI writes extra `extrinsic`/`intrinsic` elements and stores
//! rotation as `w, x, y, z`. Most viewers expect a file with only a `vertex`
//! element, float32 properties in [`STANDARD_FIELDS`] order and rotation as
//! `x, y, z, w` in `rot_0..rot_3`.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{ArtifactError, Result};
use crate::ply::reader::SplatPoint;

pub const STANDARD_FIELDS: [&str; 14] = [
    "x", "y", "z", "scale_0", "scale_1", "scale_2", "rot_0", "rot_1", "rot_2", "rot_3", "f_dc_0",
    "f_dc_1", "f_dc_2", "opacity",
];

pub const STANDARD_RECORD_SIZE: usize = STANDARD_FIELDS.len() * 4;

fn standard_header(count: usize) -> String {
    let mut header = format!(
        "ply\nformat binary_little_endian 1.0\nelement vertex {}\n",
        count
    );
    for name in STANDARD_FIELDS {
        header.push_str("property float ");
        header.push_str(name);
        header.push('\n');
    }
    header.push_str("end_header\n");
    header
}

pub fn encode_standard_record(point: &SplatPoint) -> [u8; STANDARD_RECORD_SIZE] {
    let [w, x, y, z] = point.rotation;
    let rotation = [x, y, z, w];
    let values = point
        .position
        .iter()
        .chain(&point.scale)
        .chain(&rotation)
        .chain(&point.f_dc)
        .chain(std::iter::once(&point.opacity));
    let mut out = [0u8; STANDARD_RECORD_SIZE];
    for (chunk, v) in out.chunks_exact_mut(4).zip(values) {
        chunk.copy_from_slice(&v.to_le_bytes());
    }
    out
}

/// Write `points` as a standard 3DGS PLY. `path` may be the file the points
/// were read from: the output goes to a temp file that replaces it at the end.
pub fn write_standard_ply(path: &Path, points: &[SplatPoint]) -> Result<u64> {
    let tmp = path.with_extension("ply.tmp");
    let header = standard_header(points.len());
    let write = || -> std::io::Result<()> {
        let mut out = BufWriter::new(File::create(&tmp)?);
        out.write_all(header.as_bytes())?;
        for point in points {
            out.write_all(&encode_standard_record(point))?;
        }
        out.into_inner().map_err(|e| e.into_error())?.sync_all()
    };
    if let Err(e) = write() {
        let _ = fs::remove_file(&tmp);
        return Err(ArtifactError::io(&tmp, e));
    }
    fs::rename(&tmp, path).map_err(|e| ArtifactError::io(path, e))?;
    let bytes = (header.len() + points.len() * STANDARD_RECORD_SIZE) as u64;
    tracing::info!(path = %path.display(), points = points.len(), bytes, "wrote standard PLY");
    Ok(bytes)
}
