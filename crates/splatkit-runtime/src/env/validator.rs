//! Readiness check: interpreter present, core imports succeed, weights on disk.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use splatkit_core::config::InferenceConfig;

use super::stage::checkpoint_installed;
use crate::layout::RuntimeLayout;
use crate::process;

/// Printed by the probe script after every import succeeded.
const PROBE_SENTINEL: &str = "OK";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentStatus {
    pub python_installed: bool,
    /// Never true without `python_installed`
    pub packages_installed: bool,
    pub checkpoint_installed: bool,
    pub message: String,
    pub interpreter: PathBuf,
    pub checkpoint: PathBuf,
}

impl EnvironmentStatus {
    pub fn is_ready(&self) -> bool {
        self.python_installed && self.packages_installed && self.checkpoint_installed
    }
}

/// Imports that must succeed in the isolated interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportProbe {
    pub modules: Vec<String>,
    pub timeout: Duration,
}

impl ImportProbe {
    pub fn new<I, S>(modules: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            modules: modules.into_iter().map(Into::into).collect(),
            timeout,
        }
    }

    pub fn from_config(cfg: &InferenceConfig) -> Self {
        Self::new(
            cfg.probe_modules.iter().cloned(),
            Duration::from_secs(cfg.probe_timeout_secs),
        )
    }

    /// `import a; import b; print('OK')`
    pub fn script(&self) -> String {
        let mut script: String = self
            .modules
            .iter()
            .map(|m| format!("import {}; ", m))
            .collect();
        script.push_str(&format!("print('{}')", PROBE_SENTINEL));
        script
    }
}

impl Default for ImportProbe {
    fn default() -> Self {
        Self::from_config(&InferenceConfig::default())
    }
}

/// Inspect the filesystem and the interpreter. Never fails: anything that
/// goes wrong shows up as a `false` field and an explanatory message.
pub fn check_environment(layout: &RuntimeLayout, probe: &ImportProbe) -> EnvironmentStatus {
    let python_installed = layout.interpreter.is_file();
    let mut problems = Vec::new();

    let packages_installed = if python_installed {
        match run_probe(layout, probe) {
            Ok(()) => true,
            Err(reason) => {
                problems.push(reason);
                false
            }
        }
    } else {
        problems.push(format!(
            "Python runtime not found at {}",
            layout.interpreter.display()
        ));
        false
    };

    let checkpoint_installed = checkpoint_installed(layout);
    if !checkpoint_installed {
        problems.push(format!(
            "model weights not found at {}",
            layout.checkpoint.display()
        ));
    }

    let message = if problems.is_empty() {
        "Environment ready".to_string()
    } else {
        problems.join("; ")
    };
    tracing::debug!(
        python_installed,
        packages_installed,
        checkpoint_installed,
        "environment checked"
    );

    EnvironmentStatus {
        python_installed,
        packages_installed,
        checkpoint_installed,
        message,
        interpreter: layout.interpreter.clone(),
        checkpoint: layout.checkpoint.clone(),
    }
}

fn run_probe(layout: &RuntimeLayout, probe: &ImportProbe) -> Result<(), String> {
    let mut cmd = layout.python_command();
    cmd.arg("-c").arg(probe.script());
    if layout.env_root.is_dir() {
        cmd.current_dir(&layout.env_root);
    }
    let output = process::run_captured(&mut cmd, Some(probe.timeout), None)
        .map_err(|e| format!("failed to start Python: {}", e))?;
    if output.timed_out {
        return Err(format!(
            "package check timed out after {}s",
            probe.timeout.as_secs()
        ));
    }
    if output.success() && output.stdout.contains(PROBE_SENTINEL) {
        return Ok(());
    }
    tracing::debug!(stderr = %output.stderr, "import probe failed");
    Err(format!(
        "required packages missing ({})",
        probe.modules.join(", ")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::stage::test_support::{layout_in, mark_complete};
    use crate::env::stage::InstallationStage;

    #[test]
    fn test_probe_script() {
        let probe = ImportProbe::new(["torch", "gsplat"], Duration::from_secs(10));
        assert_eq!(probe.script(), "import torch; import gsplat; print('OK')");
    }

    #[test]
    fn test_no_interpreter() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_in(dir.path());
        let status = check_environment(&layout, &ImportProbe::default());
        assert!(!status.python_installed);
        assert!(!status.packages_installed);
        assert!(!status.checkpoint_installed);
        assert!(!status.is_ready());
        assert!(status.message.contains("Python runtime not found"));
    }

    #[test]
    fn test_checkpoint_checked_independently() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_in(dir.path());
        mark_complete(&layout, InstallationStage::FetchModelWeights);
        let status = check_environment(&layout, &ImportProbe::default());
        assert!(!status.python_installed);
        assert!(status.checkpoint_installed);
    }

    #[cfg(unix)]
    fn fake_python(layout: &RuntimeLayout, body: &str) {
        use std::os::unix::fs::PermissionsExt;
        std::fs::create_dir_all(layout.interpreter.parent().unwrap()).unwrap();
        std::fs::write(&layout.interpreter, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&layout.interpreter, std::fs::Permissions::from_mode(0o755))
            .unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_ready_with_working_probe() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_in(dir.path());
        fake_python(&layout, "echo OK");
        mark_complete(&layout, InstallationStage::FetchModelWeights);
        let status = check_environment(&layout, &ImportProbe::default());
        assert!(status.is_ready(), "{}", status.message);
        assert_eq!(status.message, "Environment ready");
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_probe_reports_packages_missing() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_in(dir.path());
        fake_python(&layout, "echo 'ModuleNotFoundError: torch' >&2; exit 1");
        let status = check_environment(&layout, &ImportProbe::default());
        assert!(status.python_installed);
        assert!(!status.packages_installed);
        assert!(status.message.contains("torch, gsplat"));
    }

    #[cfg(unix)]
    #[test]
    fn test_hanging_probe_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_in(dir.path());
        fake_python(&layout, "exec sleep 5");
        let probe = ImportProbe::new(["torch"], Duration::from_millis(200));
        let status = check_environment(&layout, &probe);
        assert!(!status.packages_installed);
        assert!(status.message.contains("timed out"));
    }
}
