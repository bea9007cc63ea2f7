//! Environment locator: per-platform interpreter paths and bundle sources.
//!
//! Everything here is pure path math. Nothing touches the filesystem, so an
//! unsupported platform is always a configuration error and never confused
//! with "not yet installed".

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Result, RuntimeError};

pub const PYTHON_VERSION: &str = "3.13.0";
/// `lib/python3.13/site-packages` on Unix builds
pub const PYTHON_MINOR: &str = "3.13";
/// Windows embeddable distributions read `python313._pth` for sys.path
pub const WINDOWS_PATH_CONFIG: &str = "python313._pth";
/// python-build-standalone release tag
const STANDALONE_TAG: &str = "20241016";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Linux,
    #[serde(rename = "macos")]
    MacOs,
}

impl Platform {
    /// Map an OS identifier (`std::env::consts::OS` or `sys.platform` style).
    pub fn from_os(os: &str) -> Result<Self> {
        match os.trim().to_lowercase().as_str() {
            "windows" | "win32" => Ok(Self::Windows),
            "linux" => Ok(Self::Linux),
            "macos" | "darwin" => Ok(Self::MacOs),
            other => Err(RuntimeError::Configuration(format!(
                "unsupported platform '{}' (supported: windows, linux, macos)",
                other
            ))),
        }
    }

    pub fn current() -> Result<Self> {
        Self::from_os(std::env::consts::OS)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Windows => "windows",
            Self::Linux => "linux",
            Self::MacOs => "macos",
        }
    }

    /// Default interpreter bundle for this platform and CPU architecture.
    pub fn default_bundle(&self, arch: &str) -> Result<InterpreterBundle> {
        let url = match (self, arch) {
            (Self::Windows, "x86_64") => format!(
                "https://www.python.org/ftp/python/{v}/python-{v}-embed-amd64.zip",
                v = PYTHON_VERSION
            ),
            (Self::Windows, "aarch64") => format!(
                "https://www.python.org/ftp/python/{v}/python-{v}-embed-arm64.zip",
                v = PYTHON_VERSION
            ),
            (Self::Linux | Self::MacOs, "x86_64" | "aarch64") => {
                let triple = match self {
                    Self::Linux => format!("{}-unknown-linux-gnu", arch),
                    _ => format!("{}-apple-darwin", arch),
                };
                format!(
                    "https://github.com/astral-sh/python-build-standalone/releases/download/{tag}/cpython-{v}+{tag}-{triple}-install_only.tar.gz",
                    tag = STANDALONE_TAG,
                    v = PYTHON_VERSION,
                    triple = triple
                )
            }
            _ => {
                return Err(RuntimeError::Configuration(format!(
                    "no interpreter bundle for {} on {}",
                    self, arch
                )))
            }
        };
        InterpreterBundle::from_url(url)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterBundle {
    pub url: String,
    pub kind: ArchiveKind,
}

impl InterpreterBundle {
    /// Infer the archive type from the URL path.
    pub fn from_url(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        let path = url.split(['?', '#']).next().unwrap_or_default().to_lowercase();
        let kind = if path.ends_with(".zip") {
            ArchiveKind::Zip
        } else if path.ends_with(".tar.gz") || path.ends_with(".tgz") {
            ArchiveKind::TarGz
        } else {
            return Err(RuntimeError::Configuration(format!(
                "interpreter bundle must be a .zip or .tar.gz archive: {}",
                url
            )));
        };
        Ok(Self { url, kind })
    }

    pub fn file_name(&self) -> &'static str {
        match self.kind {
            ArchiveKind::Zip => "python-bundle.zip",
            ArchiveKind::TarGz => "python-bundle.tar.gz",
        }
    }
}

/// Expected interpreter location inside an environment root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeInterpreter {
    pub interpreter: PathBuf,
    pub site_packages: PathBuf,
    /// `._pth` file controlling sys.path (Windows embeddable only)
    pub path_config: Option<PathBuf>,
}

/// Resolve interpreter paths for `platform` under `env_root`.
pub fn locate(platform: Platform, env_root: &Path) -> RuntimeInterpreter {
    match platform {
        Platform::Windows => RuntimeInterpreter {
            interpreter: env_root.join("python.exe"),
            site_packages: env_root.join("Lib").join("site-packages"),
            path_config: Some(env_root.join(WINDOWS_PATH_CONFIG)),
        },
        Platform::Linux | Platform::MacOs => RuntimeInterpreter {
            interpreter: env_root.join("bin").join("python3"),
            site_packages: env_root
                .join("lib")
                .join(format!("python{}", PYTHON_MINOR))
                .join("site-packages"),
            path_config: None,
        },
    }
}
