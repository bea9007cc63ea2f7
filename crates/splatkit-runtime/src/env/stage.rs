//! Installer stages and their completion markers.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RuntimeError};
use crate::layout::RuntimeLayout;
use crate::manifest::Manifest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallationStage {
    FetchInterpreter,
    BootstrapPackageManager,
    InstallDependencies,
    FetchModelWeights,
    Complete,
}

impl InstallationStage {
    /// Actionable stages in execution order. `Complete` is the terminal state.
    pub const PIPELINE: [InstallationStage; 4] = [
        Self::FetchInterpreter,
        Self::BootstrapPackageManager,
        Self::InstallDependencies,
        Self::FetchModelWeights,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn next(self) -> Self {
        match self {
            Self::FetchInterpreter => Self::BootstrapPackageManager,
            Self::BootstrapPackageManager => Self::InstallDependencies,
            Self::InstallDependencies => Self::FetchModelWeights,
            Self::FetchModelWeights | Self::Complete => Self::Complete,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::FetchInterpreter => "fetch_interpreter",
            Self::BootstrapPackageManager => "bootstrap_package_manager",
            Self::InstallDependencies => "install_dependencies",
            Self::FetchModelWeights => "fetch_model_weights",
            Self::Complete => "complete",
        }
    }

    /// Human-readable label for status lines.
    pub fn label(self) -> &'static str {
        match self {
            Self::FetchInterpreter => "Downloading Python runtime",
            Self::BootstrapPackageManager => "Installing pip",
            Self::InstallDependencies => "Installing packages",
            Self::FetchModelWeights => "Downloading model weights",
            Self::Complete => "Complete",
        }
    }

    /// Share of overall progress, in percent. Sums to 100 over `PIPELINE`.
    pub fn weight(self) -> f32 {
        match self {
            Self::FetchInterpreter => 10.0,
            Self::BootstrapPackageManager => 5.0,
            Self::InstallDependencies => 45.0,
            Self::FetchModelWeights => 40.0,
            Self::Complete => 0.0,
        }
    }

    /// Overall percent at which this stage starts.
    pub fn progress_offset(self) -> f32 {
        Self::PIPELINE
            .iter()
            .take_while(|s| **s < self)
            .map(|s| s.weight())
            .sum()
    }

    /// The canonical file whose presence proves this stage finished.
    pub fn marker_path(self, layout: &RuntimeLayout) -> Option<PathBuf> {
        match self {
            Self::FetchInterpreter => Some(layout.interpreter.clone()),
            Self::BootstrapPackageManager => Some(layout.pip_marker()),
            Self::InstallDependencies => Some(layout.requirements_stamp()),
            Self::FetchModelWeights => Some(layout.checkpoint_receipt()),
            Self::Complete => None,
        }
    }

    pub fn is_complete(self, layout: &RuntimeLayout) -> bool {
        match self {
            Self::FetchInterpreter => layout.interpreter.is_file(),
            Self::BootstrapPackageManager => layout.pip_marker().is_file(),
            Self::InstallDependencies => requirements_current(layout),
            Self::FetchModelWeights => checkpoint_installed(layout),
            Self::Complete => Self::PIPELINE.iter().all(|s| s.is_complete(layout)),
        }
    }

    /// First stage whose marker is missing, or `Complete`.
    pub fn first_incomplete(layout: &RuntimeLayout) -> Self {
        Self::PIPELINE
            .into_iter()
            .find(|s| !s.is_complete(layout))
            .unwrap_or(Self::Complete)
    }
}

impl fmt::Display for InstallationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The stamp must match the manifest as it is now; an edited manifest
/// re-runs the dependency stage.
fn requirements_current(layout: &RuntimeLayout) -> bool {
    let Ok(stamp) = std::fs::read_to_string(layout.requirements_stamp()) else {
        return false;
    };
    match Manifest::load(&layout.manifest) {
        Ok(manifest) => stamp.trim() == manifest.digest(),
        Err(_) => false,
    }
}

/// Sidecar written next to the checkpoint after a verified download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightsReceipt {
    pub url: String,
    pub bytes: u64,
    pub completed_at: DateTime<Utc>,
}

impl WeightsReceipt {
    pub fn new(url: &str, bytes: u64) -> Self {
        Self {
            url: url.to_string(),
            bytes,
            completed_at: Utc::now(),
        }
    }

    pub fn load(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| {
            RuntimeError::io(
                format!("serialize receipt {}", path.display()),
                std::io::Error::other(e),
            )
        })?;
        std::fs::write(path, json)
            .map_err(|e| RuntimeError::io(format!("write {}", path.display()), e))
    }
}

/// Receipt present and the checkpoint still has the recorded size.
pub fn checkpoint_installed(layout: &RuntimeLayout) -> bool {
    let Some(receipt) = WeightsReceipt::load(&layout.checkpoint_receipt()) else {
        return false;
    };
    std::fs::metadata(&layout.checkpoint)
        .map(|m| m.is_file() && m.len() == receipt.bytes)
        .unwrap_or(false)
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_pipeline_order_and_weights() {
        let mut stage = InstallationStage::FetchInterpreter;
        for expected in InstallationStage::PIPELINE {
            assert_eq!(stage, expected);
            stage = stage.next();
        }
        assert_eq!(stage, InstallationStage::Complete);
        let total: f32 = InstallationStage::PIPELINE.iter().map(|s| s.weight()).sum();
        assert_eq!(total, 100.0);
        assert_eq!(InstallationStage::InstallDependencies.progress_offset(), 15.0);
    }

    #[test]
    fn test_markers_drive_first_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_in(dir.path());
        assert_eq!(
            InstallationStage::first_incomplete(&layout),
            InstallationStage::FetchInterpreter
        );
        mark_complete(&layout, InstallationStage::FetchInterpreter);
        mark_complete(&layout, InstallationStage::BootstrapPackageManager);
        assert_eq!(
            InstallationStage::first_incomplete(&layout),
            InstallationStage::InstallDependencies
        );
        mark_complete(&layout, InstallationStage::Complete);
        assert!(InstallationStage::Complete.is_complete(&layout));
    }

    #[test]
    fn test_edited_manifest_invalidates_stamp() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_in(dir.path());
        mark_complete(&layout, InstallationStage::InstallDependencies);
        assert!(InstallationStage::InstallDependencies.is_complete(&layout));
        std::fs::write(&layout.manifest, "numpy==2.2.0\n").unwrap();
        assert!(!InstallationStage::InstallDependencies.is_complete(&layout));
    }

    #[test]
    fn test_truncated_checkpoint_is_not_installed() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_in(dir.path());
        mark_complete(&layout, InstallationStage::FetchModelWeights);
        assert!(checkpoint_installed(&layout));
        std::fs::write(&layout.checkpoint, b"wei").unwrap();
        assert!(!checkpoint_installed(&layout));
        std::fs::remove_file(layout.checkpoint_receipt()).unwrap();
        std::fs::write(&layout.checkpoint, b"weights").unwrap();
        assert!(!checkpoint_installed(&layout));
    }
}
