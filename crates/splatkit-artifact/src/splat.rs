//! `.splat` export: the 32-byte-per-gaussian layout read by web viewers.
//!
//! | bytes  | content                                  |
//! |--------|------------------------------------------|
//! | 0..12  | position, f32 LE ×3                      |
//! | 12..24 | `exp(scale)`, f32 LE ×3                  |
//! | 24..28 | RGBA u8                                  |
//! | 28..32 | unit quaternion XYZW, `q * 128 + 128` u8 |

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::color::to_rgba8;
use crate::error::{ArtifactError, Result};
use crate::ply::reader::SplatPoint;

pub const SPLAT_RECORD_SIZE: usize = 32;

/// `scene.ply` → `scene.splat`, same directory.
pub fn splat_path_for(ply: &Path) -> PathBuf {
    ply.with_extension("splat")
}

pub fn encode_record(point: &SplatPoint) -> [u8; SPLAT_RECORD_SIZE] {
    let mut out = [0u8; SPLAT_RECORD_SIZE];
    let floats = point
        .position
        .iter()
        .copied()
        .chain(point.scale.iter().map(|s| s.exp()));
    for (i, v) in floats.enumerate() {
        out[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
    }
    out[24..28].copy_from_slice(&to_rgba8(point.f_dc, point.opacity));

    let [w, x, y, z] = point.rotation;
    let mut q = [x, y, z, w];
    let mag = q.iter().map(|c| c * c).sum::<f32>().sqrt();
    if mag > 0.0 {
        q.iter_mut().for_each(|c| *c /= mag);
    }
    for (slot, c) in out[28..32].iter_mut().zip(q) {
        *slot = (c * 128.0 + 128.0).clamp(0.0, 255.0) as u8;
    }
    out
}

/// Write every point to `path` through a temp file, renamed into place once complete.
pub fn write_splat_file(path: &Path, points: &[SplatPoint]) -> Result<u64> {
    let tmp = path.with_extension("splat.tmp");
    let write = || -> std::io::Result<()> {
        let mut out = BufWriter::new(File::create(&tmp)?);
        for point in points {
            out.write_all(&encode_record(point))?;
        }
        out.into_inner().map_err(|e| e.into_error())?.sync_all()
    };
    if let Err(e) = write() {
        let _ = fs::remove_file(&tmp);
        return Err(ArtifactError::io(&tmp, e));
    }
    fs::rename(&tmp, path).map_err(|e| ArtifactError::io(path, e))?;
    let bytes = (points.len() * SPLAT_RECORD_SIZE) as u64;
    tracing::info!(path = %path.display(), points = points.len(), bytes, "wrote splat file");
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point() -> SplatPoint {
        SplatPoint {
            position: [1.0, -2.0, 0.5],
            scale: [0.0, 0.0, 0.0],
            rotation: [2.0, 0.0, 0.0, 0.0],
            f_dc: [0.0; 3],
            opacity: 0.0,
        }
    }

    #[test]
    fn test_encode_record_layout() {
        let rec = encode_record(&point());
        assert_eq!(&rec[0..4], &1.0f32.to_le_bytes());
        assert_eq!(&rec[4..8], &(-2.0f32).to_le_bytes());
        assert_eq!(&rec[12..16], &1.0f32.to_le_bytes());
        assert_eq!(&rec[24..28], &[127, 127, 127, 127]);
        // w=1 after normalization lands last
        assert_eq!(&rec[28..32], &[128, 128, 128, 255]);
    }

    #[test]
    fn test_zero_quaternion_left_unnormalized() {
        let mut p = point();
        p.rotation = [0.0; 4];
        assert_eq!(&encode_record(&p)[28..32], &[128; 4]);
    }

    #[test]
    fn test_write_splat_file() {
        let dir = tempfile::tempdir().unwrap();
        let ply = dir.path().join("scene.ply");
        let out = splat_path_for(&ply);
        assert_eq!(out, dir.path().join("scene.splat"));

        let bytes = write_splat_file(&out, &[point(), point()]).unwrap();
        assert_eq!(bytes, 64);
        assert_eq!(fs::read(&out).unwrap().len(), 64);
        assert!(!dir.path().join("scene.splat.tmp").exists());
    }
}
