//! Every path the provisioning subsystem reads or writes, resolved once.

use std::path::{Path, PathBuf};
use std::process::Command;

use splatkit_core::config::{PathsConfig, SourcesConfig};

use crate::error::Result;
use crate::platform::{self, Platform};

const REQUIREMENTS_STAMP: &str = ".splatkit-requirements";
/// File name of `RuntimeLayout::owner_marker`.
pub const OWNER_MARKER: &str = ".splatkit-env";
const FILTERED_REQUIREMENTS: &str = "requirements_filtered.txt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeLayout {
    pub platform: Platform,
    pub env_root: PathBuf,
    pub interpreter: PathBuf,
    pub site_packages: PathBuf,
    pub path_config: Option<PathBuf>,
    /// Vendored inference package root; the subprocess runs from here
    pub inference_dir: PathBuf,
    /// Prepended to `PYTHONPATH` so the vendored package imports without being installed
    pub inference_src: PathBuf,
    pub manifest: PathBuf,
    pub checkpoint: PathBuf,
    pub output_dir: PathBuf,
}

impl RuntimeLayout {
    /// Resolve for the platform this process runs on.
    pub fn resolve(paths: &PathsConfig, sources: &SourcesConfig) -> Result<Self> {
        Ok(Self::for_platform(Platform::current()?, paths, sources))
    }

    pub fn for_platform(platform: Platform, paths: &PathsConfig, sources: &SourcesConfig) -> Self {
        let located = platform::locate(platform, &paths.env_dir);
        Self {
            platform,
            env_root: paths.env_dir.clone(),
            interpreter: located.interpreter,
            site_packages: located.site_packages,
            path_config: located.path_config,
            inference_src: paths.inference_dir.join("src"),
            manifest: paths.inference_dir.join("requirements.txt"),
            inference_dir: paths.inference_dir.clone(),
            checkpoint: paths.checkpoint_dir.join(&sources.checkpoint_file),
            output_dir: paths.output_dir.clone(),
        }
    }

    /// `python` from this environment, isolated from user site-packages and
    /// any `PYTHONHOME` the host process inherited.
    pub fn python_command(&self) -> Command {
        let mut cmd = Command::new(&self.interpreter);
        cmd.env_remove("PYTHONHOME").env("PYTHONNOUSERSITE", "1");
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }
        cmd
    }

    /// Interpreter path relative to the environment root.
    pub fn interpreter_relative(&self) -> &Path {
        self.interpreter
            .strip_prefix(&self.env_root)
            .unwrap_or(&self.interpreter)
    }

    /// Sibling directory the interpreter archive is extracted into before
    /// being moved to `env_root`.
    pub fn staging_dir(&self) -> PathBuf {
        sibling_with_suffix(&self.env_root, ".staging")
    }

    /// `pip/__init__.py` inside site-packages: present once pip is importable.
    pub fn pip_marker(&self) -> PathBuf {
        self.site_packages.join("pip").join("__init__.py")
    }

    /// Written by the installer into every environment root it creates.
    pub fn owner_marker(&self) -> PathBuf {
        self.env_root.join(OWNER_MARKER)
    }

    pub fn requirements_stamp(&self) -> PathBuf {
        self.env_root.join(REQUIREMENTS_STAMP)
    }

    pub fn filtered_requirements(&self) -> PathBuf {
        self.env_root.join(FILTERED_REQUIREMENTS)
    }

    pub fn checkpoint_partial(&self) -> PathBuf {
        sibling_with_suffix(&self.checkpoint, ".partial")
    }

    pub fn checkpoint_receipt(&self) -> PathBuf {
        sibling_with_suffix(&self.checkpoint, ".receipt.json")
    }
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}
