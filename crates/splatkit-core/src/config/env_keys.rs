//! Environment variable key constants.
//!
//! Primary keys use the `SPLATKIT_*` prefix. `MLSHARP_*` aliases are accepted
//! for installs laid out by the older add-on.

/// Directory layout
pub mod paths {
    pub const SPLATKIT_HOME: &str = "SPLATKIT_HOME";

    pub const SPLATKIT_ENV_DIR: &str = "SPLATKIT_ENV_DIR";
    pub const ENV_DIR_ALIASES: &[&str] = &["MLSHARP_ENV_DIR"];

    pub const SPLATKIT_INFERENCE_DIR: &str = "SPLATKIT_INFERENCE_DIR";
    pub const INFERENCE_DIR_ALIASES: &[&str] = &["MLSHARP_DIR"];

    pub const SPLATKIT_OUTPUT_DIR: &str = "SPLATKIT_OUTPUT_DIR";

    pub const SPLATKIT_CHECKPOINT_DIR: &str = "SPLATKIT_CHECKPOINT_DIR";
}

/// Download sources for the isolated runtime and model weights
pub mod sources {
    /// Interpreter bundle URL. Unset means the per-platform default.
    pub const SPLATKIT_PYTHON_URL: &str = "SPLATKIT_PYTHON_URL";

    pub const SPLATKIT_GET_PIP_URL: &str = "SPLATKIT_GET_PIP_URL";

    pub const SPLATKIT_CHECKPOINT_URL: &str = "SPLATKIT_CHECKPOINT_URL";
    pub const CHECKPOINT_URL_ALIASES: &[&str] = &["MLSHARP_CHECKPOINT_URL"];

    pub const SPLATKIT_CHECKPOINT_FILE: &str = "SPLATKIT_CHECKPOINT_FILE";
}

/// Inference invocation
pub mod inference {
    pub const SPLATKIT_INFERENCE_MODULE: &str = "SPLATKIT_INFERENCE_MODULE";

    /// Comma separated modules imported by the readiness probe.
    pub const SPLATKIT_PROBE_MODULES: &str = "SPLATKIT_PROBE_MODULES";

    pub const SPLATKIT_TIMEOUT_SECS: &str = "SPLATKIT_TIMEOUT_SECS";

    pub const SPLATKIT_PROBE_TIMEOUT_SECS: &str = "SPLATKIT_PROBE_TIMEOUT_SECS";

    /// auto | cpu | cuda | mps | gpu
    pub const SPLATKIT_DEVICE: &str = "SPLATKIT_DEVICE";
}

/// Observability and logging
pub mod observability {
    pub const SPLATKIT_QUIET: &str = "SPLATKIT_QUIET";

    pub const SPLATKIT_LOG_LEVEL: &str = "SPLATKIT_LOG_LEVEL";

    pub const SPLATKIT_LOG_JSON: &str = "SPLATKIT_LOG_JSON";

    pub const SPLATKIT_AUDIT_LOG: &str = "SPLATKIT_AUDIT_LOG";
}
