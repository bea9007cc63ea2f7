//! Error taxonomy for provisioning and invocation.
//!
//! Every public entry point returns these as values. Each variant carries a
//! short `user_message()` for a status line and a `diagnostics()` payload for
//! verbose logging. Nothing here is retried automatically; resumable errors
//! are resumed by the user re-running the same operation.

use std::path::PathBuf;

use thiserror::Error;

use crate::env::stage::InstallationStage;

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Diagnostic payload of a failed inference run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceFailure {
    /// `-1` when the process was killed or died from a signal.
    pub exit_code: i32,
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    /// Set when the process exited 0 but produced no artifact.
    pub missing_output: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Unsupported platform, malformed manifest, missing vendored sources. Fatal.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("environment not ready: {message}")]
    NotReady { message: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{stage}: download of {url} failed: {reason}")]
    Network {
        stage: InstallationStage,
        url: String,
        reason: String,
    },

    #[error("{stage}: downloaded {actual} bytes but the server advertised {expected}")]
    SizeMismatch {
        stage: InstallationStage,
        expected: u64,
        actual: u64,
    },

    #[error("{stage} failed: {detail}")]
    StageFailed {
        stage: InstallationStage,
        detail: String,
    },

    #[error("an installation is already running for {}", env_root.display())]
    InstallInProgress { env_root: PathBuf },

    #[error("{stage} cancelled")]
    Cancelled { stage: InstallationStage },

    #[error("{}", describe_inference_failure(.0))]
    InferenceFailed(Box<InferenceFailure>),

    #[error("invalid splat artifact {}: {reason}", path.display())]
    InvalidArtifact {
        path: PathBuf,
        reason: String,
        missing: Vec<String>,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

fn describe_inference_failure(f: &InferenceFailure) -> String {
    if f.timed_out {
        "inference timed out and was terminated".to_string()
    } else if let Some(ref path) = f.missing_output {
        format!(
            "inference exited {} but produced no output at {}",
            f.exit_code,
            path.display()
        )
    } else {
        format!("inference failed with exit code {}", f.exit_code)
    }
}

impl RuntimeError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Stage the error is scoped to, if any.
    pub fn stage(&self) -> Option<InstallationStage> {
        match self {
            Self::Network { stage, .. }
            | Self::SizeMismatch { stage, .. }
            | Self::StageFailed { stage, .. }
            | Self::Cancelled { stage } => Some(*stage),
            _ => None,
        }
    }

    /// True when re-running the installer picks up where this failure left off.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            Self::NotReady { .. }
                | Self::Network { .. }
                | Self::SizeMismatch { .. }
                | Self::StageFailed { .. }
                | Self::Cancelled { .. }
                | Self::InstallInProgress { .. }
        )
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::Configuration(msg) => format!("Configuration error: {}", msg),
            Self::NotReady { .. } => {
                "Environment is not installed yet. Run the installer first.".to_string()
            }
            Self::InvalidRequest(msg) => msg.clone(),
            Self::Network { stage, .. } => format!(
                "Download failed during '{}'. Check your connection and run install again to resume.",
                stage.label()
            ),
            Self::SizeMismatch { stage, .. } => format!(
                "Download during '{}' was incomplete. Run install again to re-fetch it.",
                stage.label()
            ),
            Self::StageFailed { stage, .. } => format!(
                "'{}' failed. Run install again to retry this step.",
                stage.label()
            ),
            Self::InstallInProgress { .. } => "An installation is already running.".to_string(),
            Self::Cancelled { stage } => format!(
                "Installation cancelled during '{}'. Run install again to resume.",
                stage.label()
            ),
            Self::InferenceFailed(f) if f.timed_out => {
                "Generation timed out and was stopped.".to_string()
            }
            Self::InferenceFailed(_) => {
                "Generation failed. Enable verbose logging for details.".to_string()
            }
            Self::InvalidArtifact { missing, .. } if !missing.is_empty() => format!(
                "Generated file is missing splat attributes: {}",
                missing.join(", ")
            ),
            Self::InvalidArtifact { reason, .. } => {
                format!("Generated file is not a valid splat PLY: {}", reason)
            }
            Self::Io { context, .. } => format!("File system error: {}", context),
        }
    }

    /// Verbose payload for logs: command line, exit code and captured streams.
    pub fn diagnostics(&self) -> String {
        match self {
            Self::InferenceFailed(f) => {
                let mut out = format!(
                    "exit code: {}\ntimed out: {}\ncommand: {}\n",
                    f.exit_code, f.timed_out, f.command
                );
                if let Some(ref path) = f.missing_output {
                    out.push_str(&format!("expected output: {}\n", path.display()));
                }
                if !f.stdout.trim().is_empty() {
                    out.push_str("--- stdout ---\n");
                    out.push_str(f.stdout.trim_end());
                    out.push('\n');
                }
                if !f.stderr.trim().is_empty() {
                    out.push_str("--- stderr ---\n");
                    out.push_str(f.stderr.trim_end());
                    out.push('\n');
                }
                out
            }
            Self::Io { context, source } => format!("{}: {:?}", context, source),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(timed_out: bool) -> InferenceFailure {
        InferenceFailure {
            exit_code: 2,
            command: "python -m sharp predict".to_string(),
            stdout: "loading".to_string(),
            stderr: "Traceback".to_string(),
            timed_out,
            missing_output: None,
        }
    }

    #[test]
    fn test_inference_diagnostics_include_streams() {
        let err = RuntimeError::InferenceFailed(Box::new(failure(false)));
        let diag = err.diagnostics();
        assert!(diag.contains("exit code: 2"));
        assert!(diag.contains("python -m sharp predict"));
        assert!(diag.contains("--- stderr ---\nTraceback"));
        assert!(!err.is_resumable());
    }

    #[test]
    fn test_timeout_is_distinct() {
        let err = RuntimeError::InferenceFailed(Box::new(failure(true)));
        assert!(err.to_string().contains("timed out"));
        assert!(err.user_message().contains("timed out"));
    }

    #[test]
    fn test_stage_scoped_errors() {
        let err = RuntimeError::SizeMismatch {
            stage: InstallationStage::FetchModelWeights,
            expected: 10,
            actual: 4,
        };
        assert_eq!(err.stage(), Some(InstallationStage::FetchModelWeights));
        assert!(err.is_resumable());
        assert!(RuntimeError::Configuration("x".into()).stage().is_none());
    }
}
