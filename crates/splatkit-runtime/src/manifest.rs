//! Package manifest: pinned `name==version` lines consumed by pip.
//!
//! The vendored inference package is resolved through `PYTHONPATH`, so
//! editable installs (`-e`) and `via` annotations from lock exports are
//! dropped rather than handed to pip.

use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::error::{Result, RuntimeError};

/// pip options that may appear on their own line and are passed through.
const PASSTHROUGH_OPTIONS: &[&str] = &["--index-url", "--extra-index-url", "--find-links"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub name: String,
    pub extras: Option<String>,
    pub version: String,
    /// Environment marker after `;`, kept verbatim
    pub marker: Option<String>,
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(ref extras) = self.extras {
            write!(f, "[{}]", extras)?;
        }
        write!(f, "=={}", self.version)?;
        if let Some(ref marker) = self.marker {
            write!(f, " ; {}", marker)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    pub options: Vec<String>,
    pub requirements: Vec<Requirement>,
}

fn requirement_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^([A-Za-z0-9][A-Za-z0-9._-]*)\s*(?:\[([A-Za-z0-9,._ -]+)\])?\s*==\s*([A-Za-z0-9][A-Za-z0-9.+!_*-]*)\s*(?:;\s*(.+))?$",
        )
        .expect("static regex requirement_re")
    })
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RuntimeError::Configuration(format!(
                    "package manifest not found: {}",
                    path.display()
                ))
            } else {
                RuntimeError::io(format!("read {}", path.display()), e)
            }
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut manifest = Manifest::default();
        for (idx, raw) in content.lines().enumerate() {
            let line = strip_comment(raw).trim();
            let line = line.trim_end_matches('\\').trim();
            if line.is_empty() || line.starts_with("-e") || line.starts_with("via") {
                continue;
            }
            if line.starts_with("--hash") {
                continue;
            }
            if let Some(opt) = PASSTHROUGH_OPTIONS.iter().find(|o| line.starts_with(*o)) {
                let value = line[opt.len()..].trim_start_matches('=').trim();
                if value.is_empty() {
                    return Err(RuntimeError::Configuration(format!(
                        "manifest line {}: {} needs a value",
                        idx + 1,
                        opt
                    )));
                }
                manifest.options.push(format!("{} {}", opt, value));
                continue;
            }
            // Hashes are dropped whether they trail the requirement or sit on
            // continuation lines.
            let line = match line.find(" --hash") {
                Some(pos) => line[..pos].trim_end(),
                None => line,
            };
            let caps = requirement_re().captures(line).ok_or_else(|| {
                RuntimeError::Configuration(format!(
                    "manifest line {}: expected 'name==version', got '{}'",
                    idx + 1,
                    line
                ))
            })?;
            manifest.requirements.push(Requirement {
                name: caps[1].to_string(),
                extras: caps.get(2).map(|m| m.as_str().trim().to_string()),
                version: caps[3].to_string(),
                marker: caps.get(4).map(|m| m.as_str().trim().to_string()),
            });
        }
        Ok(manifest)
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.requirements.len()
    }

    /// Filtered requirements file handed to `pip install -r`.
    pub fn to_requirements_txt(&self) -> String {
        let mut out = String::new();
        for opt in &self.options {
            out.push_str(opt);
            out.push('\n');
        }
        for req in &self.requirements {
            out.push_str(&req.to_string());
            out.push('\n');
        }
        out
    }

    /// SHA-256 of the filtered requirements; stored as the install stamp.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.to_requirements_txt().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Drop a trailing ` # comment`. A `#` inside a URL fragment has no leading space.
fn strip_comment(line: &str) -> &str {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') {
        return "";
    }
    match line.find(" #") {
        Some(pos) => &line[..pos],
        None => line,
    }
}
