//! Observability: tracing init and the JSONL audit log.
//!
//! Uses config::ObservabilityConfig for SPLATKIT_QUIET, LOG_LEVEL, LOG_JSON, AUDIT_LOG.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use serde_json::json;
use tracing_subscriber::{prelude::*, EnvFilter};

use crate::config::ObservabilityConfig;

static AUDIT_PATH: Mutex<Option<String>> = Mutex::new(None);

/// Initialize tracing. Call once at process startup.
/// When SPLATKIT_QUIET=1, only WARN and above are logged.
pub fn init_tracing() {
    let cfg = ObservabilityConfig::from_env();
    let level = if cfg.quiet {
        "splatkit=warn".to_string()
    } else {
        cfg.log_level.clone()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    let _ = if cfg.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };
}

fn get_audit_path() -> Option<String> {
    {
        let guard = AUDIT_PATH.lock().ok()?;
        if let Some(ref p) = *guard {
            return Some(p.clone());
        }
    }
    let path = ObservabilityConfig::from_env().audit_log.clone()?;
    if let Some(parent) = Path::new(&path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    {
        let mut guard = AUDIT_PATH.lock().ok()?;
        *guard = Some(path.clone());
    }
    Some(path)
}

fn append_jsonl(path: &str, record: &serde_json::Value) {
    if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(path) {
        if let Ok(line) = serde_json::to_string(record) {
            let _ = writeln!(f, "{}", line);
        }
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Audit: one installer stage finished (`outcome` is completed / skipped / failed / cancelled)
pub fn audit_install_stage(env_root: &str, stage: &str, outcome: &str, detail: Option<&str>) {
    if let Some(path) = get_audit_path() {
        let record = json!({
            "ts": timestamp(),
            "event": "install_stage",
            "env_root": env_root,
            "stage": stage,
            "outcome": outcome,
            "detail": detail,
        });
        append_jsonl(&path, &record);
    }
}

/// Audit: inference subprocess launched
pub fn audit_inference_invoked(image: &str, command: &str, cwd: &str) {
    if let Some(path) = get_audit_path() {
        let record = json!({
            "ts": timestamp(),
            "event": "inference_invoked",
            "image": image,
            "command": command,
            "cwd": cwd,
        });
        append_jsonl(&path, &record);
    }
}

/// Audit: inference subprocess finished
pub fn audit_inference_completed(
    image: &str,
    exit_code: i32,
    duration_ms: u64,
    artifact: Option<&str>,
    timed_out: bool,
) {
    if let Some(path) = get_audit_path() {
        let record = json!({
            "ts": timestamp(),
            "event": "inference_completed",
            "image": image,
            "exit_code": exit_code,
            "duration_ms": duration_ms,
            "artifact": artifact,
            "timed_out": timed_out,
        });
        append_jsonl(&path, &record);
    }
}
