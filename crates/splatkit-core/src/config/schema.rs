//! Configuration structs grouped by domain, loaded from environment variables.

use super::env_keys::{inference as inf_keys, observability as obv_keys, paths, sources};
use super::loader::{env_bool, env_optional, env_or, env_u64, load_dotenv};
use std::path::PathBuf;

pub const DEFAULT_GET_PIP_URL: &str = "https://bootstrap.pypa.io/get-pip.py";
pub const DEFAULT_CHECKPOINT_URL: &str =
    "https://huggingface.co/TimChen/ml-sharp/resolve/main/sharp_2572gikvuh.pt?download=true";
pub const DEFAULT_CHECKPOINT_FILE: &str = "sharp_2572gikvuh.pt";
pub const DEFAULT_INFERENCE_MODULE: &str = "sharp";
pub const DEFAULT_PROBE_MODULES: &[&str] = &["torch", "gsplat"];

/// Inference runs can take many minutes on CPU.
pub const DEFAULT_INFERENCE_TIMEOUT_SECS: u64 = 1800;
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 10;

/// Directory layout. Everything hangs off `home` unless overridden.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathsConfig {
    pub home: PathBuf,
    /// Root of the isolated interpreter
    pub env_dir: PathBuf,
    /// Vendored inference package root (contains `src/` and `requirements.txt`)
    pub inference_dir: PathBuf,
    pub output_dir: PathBuf,
    pub checkpoint_dir: PathBuf,
}

impl PathsConfig {
    pub fn from_env() -> Self {
        load_dotenv();
        let home = env_optional(paths::SPLATKIT_HOME, &[])
            .map(PathBuf::from)
            .unwrap_or_else(default_home);
        let mut cfg = Self::under(home);
        if let Some(dir) = env_optional(paths::SPLATKIT_ENV_DIR, paths::ENV_DIR_ALIASES) {
            cfg.env_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_optional(paths::SPLATKIT_INFERENCE_DIR, paths::INFERENCE_DIR_ALIASES)
        {
            cfg.inference_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_optional(paths::SPLATKIT_OUTPUT_DIR, &[]) {
            cfg.output_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_optional(paths::SPLATKIT_CHECKPOINT_DIR, &[]) {
            cfg.checkpoint_dir = PathBuf::from(dir);
        }
        cfg
    }

    /// Default layout rooted at `home`, without consulting the environment.
    pub fn under(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            env_dir: home.join("env"),
            inference_dir: home.join("ml-sharp"),
            output_dir: home.join("output"),
            checkpoint_dir: home.join("models"),
            home,
        }
    }
}

fn default_home() -> PathBuf {
    dirs::data_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".local").join("share")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("splatkit")
}

/// Where the installer downloads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcesConfig {
    /// `None` selects the bundle for the current platform.
    pub python_url: Option<String>,
    pub get_pip_url: String,
    pub checkpoint_url: String,
    pub checkpoint_file: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            python_url: None,
            get_pip_url: DEFAULT_GET_PIP_URL.to_string(),
            checkpoint_url: DEFAULT_CHECKPOINT_URL.to_string(),
            checkpoint_file: DEFAULT_CHECKPOINT_FILE.to_string(),
        }
    }
}

impl SourcesConfig {
    pub fn from_env() -> Self {
        load_dotenv();
        Self {
            python_url: env_optional(sources::SPLATKIT_PYTHON_URL, &[]),
            get_pip_url: env_or(sources::SPLATKIT_GET_PIP_URL, &[], || {
                DEFAULT_GET_PIP_URL.to_string()
            }),
            checkpoint_url: env_or(
                sources::SPLATKIT_CHECKPOINT_URL,
                sources::CHECKPOINT_URL_ALIASES,
                || DEFAULT_CHECKPOINT_URL.to_string(),
            ),
            checkpoint_file: env_or(sources::SPLATKIT_CHECKPOINT_FILE, &[], || {
                DEFAULT_CHECKPOINT_FILE.to_string()
            }),
        }
    }
}

/// Inference CLI invocation settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceConfig {
    /// Module run with `python -m`
    pub module: String,
    /// Modules the readiness probe imports
    pub probe_modules: Vec<String>,
    pub timeout_secs: u64,
    pub probe_timeout_secs: u64,
    /// Raw device string; parsed by the runtime crate
    pub device: String,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            module: DEFAULT_INFERENCE_MODULE.to_string(),
            probe_modules: DEFAULT_PROBE_MODULES.iter().map(|s| s.to_string()).collect(),
            timeout_secs: DEFAULT_INFERENCE_TIMEOUT_SECS,
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS,
            device: "auto".to_string(),
        }
    }
}

impl InferenceConfig {
    pub fn from_env() -> Self {
        load_dotenv();
        let defaults = Self::default();
        let probe_modules = env_optional(inf_keys::SPLATKIT_PROBE_MODULES, &[])
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(String::from)
                    .collect::<Vec<_>>()
            })
            .filter(|mods| !mods.is_empty())
            .unwrap_or(defaults.probe_modules);
        Self {
            module: env_or(inf_keys::SPLATKIT_INFERENCE_MODULE, &[], || defaults.module),
            probe_modules,
            timeout_secs: env_u64(inf_keys::SPLATKIT_TIMEOUT_SECS, &[], defaults.timeout_secs),
            probe_timeout_secs: env_u64(
                inf_keys::SPLATKIT_PROBE_TIMEOUT_SECS,
                &[],
                defaults.probe_timeout_secs,
            ),
            device: env_or(inf_keys::SPLATKIT_DEVICE, &[], || defaults.device),
        }
    }
}

/// Observability: quiet, log_level, log_json, audit_log
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub quiet: bool,
    pub log_level: String,
    pub log_json: bool,
    pub audit_log: Option<String>,
}

impl ObservabilityConfig {
    pub fn from_env() -> &'static Self {
        use std::sync::OnceLock;
        static CACHE: OnceLock<ObservabilityConfig> = OnceLock::new();
        CACHE.get_or_init(|| {
            load_dotenv();
            Self {
                quiet: env_bool(obv_keys::SPLATKIT_QUIET, &[], false),
                log_level: env_or(obv_keys::SPLATKIT_LOG_LEVEL, &[], || {
                    "splatkit=info".to_string()
                }),
                log_json: env_bool(obv_keys::SPLATKIT_LOG_JSON, &[], false),
                audit_log: env_optional(obv_keys::SPLATKIT_AUDIT_LOG, &[]),
            }
        })
    }
}
