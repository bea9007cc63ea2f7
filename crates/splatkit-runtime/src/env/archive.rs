//! Interpreter bundle extraction and the embeddable `._pth` patch.

use std::fs::{self, File};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;

use crate::platform::ArchiveKind;

/// python-build-standalone archives nest everything under `python/`.
const STANDALONE_TOP_DIR: &str = "python";

pub(crate) fn extract(kind: ArchiveKind, archive: &Path, dest: &Path) -> Result<usize, String> {
    fs::create_dir_all(dest).map_err(|e| format!("create {}: {}", dest.display(), e))?;
    match kind {
        ArchiveKind::Zip => extract_zip(archive, dest),
        ArchiveKind::TarGz => extract_tar_gz(archive, dest),
    }
}

fn extract_zip(archive: &Path, dest: &Path) -> Result<usize, String> {
    let file = File::open(archive).map_err(|e| format!("open {}: {}", archive.display(), e))?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| format!("invalid zip archive: {}", e))?;
    let mut count = 0;
    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| format!("read zip entry {}: {}", i, e))?;
        // Entries escaping the destination are skipped, not fatal.
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            continue;
        };
        let out_path = dest.join(&relative);
        if entry.is_dir() {
            fs::create_dir_all(&out_path)
                .map_err(|e| format!("create {}: {}", out_path.display(), e))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| format!("create {}: {}", parent.display(), e))?;
        }
        let mut out = File::create(&out_path)
            .map_err(|e| format!("create {}: {}", out_path.display(), e))?;
        std::io::copy(&mut entry, &mut out)
            .map_err(|e| format!("extract {}: {}", relative.display(), e))?;
        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&out_path, fs::Permissions::from_mode(mode & 0o777));
        }
        count += 1;
    }
    Ok(count)
}

fn extract_tar_gz(archive: &Path, dest: &Path) -> Result<usize, String> {
    let file = File::open(archive).map_err(|e| format!("open {}: {}", archive.display(), e))?;
    let mut tar = tar::Archive::new(GzDecoder::new(file));
    let entries = tar
        .entries()
        .map_err(|e| format!("invalid tar.gz archive: {}", e))?;
    let mut count = 0;
    for entry in entries {
        let mut entry = entry.map_err(|e| format!("read tar entry: {}", e))?;
        let raw = entry
            .path()
            .map_err(|e| format!("tar entry path: {}", e))?
            .into_owned();
        let Some(relative) = strip_top_dir(&raw) else {
            continue;
        };
        let out_path = dest.join(&relative);
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| format!("create {}: {}", parent.display(), e))?;
        }
        if entry.header().entry_type().is_hard_link() {
            // Link targets are archive paths; resolve them against `dest` ourselves.
            let target = entry
                .link_name()
                .ok()
                .flatten()
                .and_then(|t| strip_top_dir(&t))
                .ok_or_else(|| format!("hard link {} has no usable target", raw.display()))?;
            fs::copy(dest.join(&target), &out_path)
                .map_err(|e| format!("link {}: {}", relative.display(), e))?;
        } else {
            entry
                .unpack(&out_path)
                .map_err(|e| format!("extract {}: {}", relative.display(), e))?;
        }
        count += 1;
    }
    Ok(count)
}

/// Drop a leading `python/` and reject anything that could escape the destination.
fn strip_top_dir(path: &Path) -> Option<PathBuf> {
    let mut components = path.components().peekable();
    while matches!(components.peek(), Some(Component::CurDir)) {
        components.next();
    }
    if matches!(components.peek(), Some(Component::Normal(c)) if *c == STANDALONE_TOP_DIR) {
        components.next();
    }
    let mut out = PathBuf::new();
    for c in components {
        match c {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Enable `site` and add `Lib/site-packages` to an embeddable `._pth` file.
/// Applying it twice yields the same content.
pub(crate) fn patch_pth_content(content: &str) -> String {
    let mut lines: Vec<String> = content
        .lines()
        .map(|line| {
            if line.trim() == "#import site" {
                "import site".to_string()
            } else {
                line.to_string()
            }
        })
        .collect();
    if !lines.iter().any(|l| l.trim() == "import site") {
        lines.push("import site".to_string());
    }
    if !lines.iter().any(|l| l.trim() == "Lib/site-packages") {
        lines.push("Lib/site-packages".to_string());
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

pub(crate) fn patch_path_config(path: &Path) -> std::io::Result<()> {
    let content = fs::read_to_string(path)?;
    fs::write(path, patch_pth_content(&content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const EMBED_PTH: &str = "python313.zip\n.\n\n# Uncomment to run site.main() automatically\n#import site\n";

    #[test]
    fn test_pth_patch_is_idempotent() {
        let once = patch_pth_content(EMBED_PTH);
        assert!(once.contains("\nimport site\n"));
        assert!(!once.contains("#import site"));
        assert!(once.ends_with("Lib/site-packages\n"));
        assert_eq!(patch_pth_content(&once), once);
    }

    #[test]
    fn test_strip_top_dir() {
        assert_eq!(
            strip_top_dir(Path::new("python/bin/python3")),
            Some(PathBuf::from("bin/python3"))
        );
        assert_eq!(
            strip_top_dir(Path::new("./python/lib")),
            Some(PathBuf::from("lib"))
        );
        assert_eq!(strip_top_dir(Path::new("python")), None);
        assert_eq!(strip_top_dir(Path::new("python/../../etc")), None);
        assert_eq!(
            strip_top_dir(Path::new("python.exe")),
            Some(PathBuf::from("python.exe"))
        );
    }

    #[test]
    fn test_extract_tar_gz_strips_python_dir() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("bundle.tar.gz");
        {
            let file = File::create(&archive_path).unwrap();
            let gz = flate2::write::GzEncoder::new(file, flate2::Compression::fast());
            let mut builder = tar::Builder::new(gz);
            let data = b"#!/bin/sh\necho python\n";
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder
                .append_data(&mut header, "python/bin/python3", &data[..])
                .unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }
        let dest = dir.path().join("out");
        let count = extract(ArchiveKind::TarGz, &archive_path, &dest).unwrap();
        assert_eq!(count, 1);
        assert!(dest.join("bin").join("python3").is_file());
    }

    #[test]
    fn test_extract_zip() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("bundle.zip");
        {
            let file = File::create(&archive_path).unwrap();
            let mut zip = zip::ZipWriter::new(file);
            let options = zip::write::FileOptions::default();
            zip.start_file("python.exe", options).unwrap();
            zip.write_all(b"MZ").unwrap();
            zip.start_file("python313._pth", options).unwrap();
            zip.write_all(EMBED_PTH.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        let dest = dir.path().join("out");
        assert_eq!(extract(ArchiveKind::Zip, &archive_path, &dest).unwrap(), 2);
        patch_path_config(&dest.join("python313._pth")).unwrap();
        let patched = fs::read_to_string(dest.join("python313._pth")).unwrap();
        assert!(patched.contains("Lib/site-packages"));
    }

    #[test]
    fn test_corrupt_archive_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("bundle.zip");
        fs::write(&archive_path, b"not a zip").unwrap();
        assert!(extract(ArchiveKind::Zip, &archive_path, &dir.path().join("out")).is_err());
    }
}
