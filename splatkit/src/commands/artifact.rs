//! `splatkit validate` and `splatkit convert`.

use anyhow::Result;
use std::path::{Path, PathBuf};

use splatkit_artifact::{read_splats, splat_path_for, write_splat_file};
use splatkit_services::environment::{artifact_error, gate, standardize_ply};

use super::report;

/// `splatkit validate`
pub fn cmd_validate(ply: &str, json: bool) -> Result<()> {
    let path = Path::new(ply);
    let checked = gate(path);
    if json {
        let value = match checked {
            Ok(ref report) => serde_json::to_value(report)?,
            Err(ref e) => serde_json::json!({
                "valid": false,
                "error": e.to_string(),
                "missing_fields": match e {
                    splatkit_runtime::RuntimeError::InvalidArtifact { missing, .. } => missing.clone(),
                    _ => Vec::new(),
                },
            }),
        };
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    let artifact = checked.map_err(report)?;
    if !json {
        eprintln!(
            "✓ {} is a valid splat PLY ({}, {} vertices, {} properties)",
            path.display(),
            artifact.format,
            artifact.vertex_count,
            artifact.property_names.len()
        );
    }
    Ok(())
}

/// `splatkit convert`
pub fn cmd_convert(ply: &str, out: Option<&str>, standard_ply: Option<&str>) -> Result<()> {
    let path = Path::new(ply);
    let out = out.map(PathBuf::from).unwrap_or_else(|| splat_path_for(path));
    let cloud = read_splats(path).map_err(|e| report(artifact_error(path, e)))?;
    // Decoded before the PLY is rewritten, so an in-place rewrite is safe.
    if let Some(dst) = standard_ply {
        let written = standardize_ply(path, Path::new(dst)).map_err(report)?;
        eprintln!(
            "✓ Wrote standard PLY with {} splats to {}",
            written.points,
            written.path.display()
        );
    }
    let bytes = write_splat_file(&out, &cloud.points).map_err(|e| report(artifact_error(&out, e)))?;
    eprintln!(
        "✓ Wrote {} splats ({} bytes) to {}",
        cloud.len(),
        bytes,
        out.display()
    );
    if cloud.dropped > 0 {
        eprintln!("  {} record(s) with NaN/Inf values skipped", cloud.dropped);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use splatkit_artifact::{PlyHeader, SPLAT_RECORD_SIZE, STANDARD_FIELDS};

    const FIELDS: [&str; 14] = [
        "x", "y", "z", "f_dc_0", "f_dc_1", "f_dc_2", "opacity", "scale_0", "scale_1", "scale_2",
        "rot_0", "rot_1", "rot_2", "rot_3",
    ];

    #[test]
    fn test_convert_with_in_place_standard_ply() {
        let dir = tempfile::tempdir().unwrap();
        let ply = dir.path().join("scene.ply");
        let mut text = String::from(
            "ply\nformat ascii 1.0\nelement extrinsic 1\nproperty float extrinsic\nelement vertex 2\n",
        );
        for name in FIELDS {
            text.push_str(&format!("property float {}\n", name));
        }
        text.push_str("end_header\n0\n1 2 3 0 0 0 0 0 0 0 1 0 0 0\n4 5 6 0 0 0 0 0 0 0 1 0 0 0\n");
        std::fs::write(&ply, text).unwrap();
        let ply_str = ply.to_str().unwrap();

        cmd_convert(ply_str, None, Some(ply_str)).unwrap();

        let splat = dir.path().join("scene.splat");
        assert_eq!(
            std::fs::metadata(&splat).unwrap().len(),
            (2 * SPLAT_RECORD_SIZE) as u64
        );
        let mut reader = std::io::BufReader::new(std::fs::File::open(&ply).unwrap());
        let header = PlyHeader::read(&mut reader).unwrap();
        assert_eq!(header.elements.len(), 1);
        let vertex = header.vertex().unwrap();
        assert_eq!(vertex.count, 2);
        assert_eq!(vertex.properties[6].name, STANDARD_FIELDS[6]);
    }
}
