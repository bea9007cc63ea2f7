//! CLI commands. Each one builds an `EnvironmentService` from environment
//! configuration and renders its results for a terminal.
//!
//!   env:      status, install, clean, path
//!   predict:  image → splat PLY (optionally .splat)
//!   artifact: validate, convert

pub mod artifact;
pub mod env;
pub mod predict;

use anyhow::Result;
use splatkit_core::config::{InferenceConfig, PathsConfig, SourcesConfig};
use splatkit_runtime::{RuntimeError, RuntimeLayout};
use splatkit_services::EnvironmentService;

/// Service for the current platform; `timeout` overrides the configured inference timeout.
pub(crate) fn service(timeout: Option<u64>) -> Result<EnvironmentService> {
    let paths = PathsConfig::from_env();
    let sources = SourcesConfig::from_env();
    let mut inference = InferenceConfig::from_env();
    if let Some(secs) = timeout {
        inference.timeout_secs = secs;
    }
    let layout = RuntimeLayout::resolve(&paths, &sources).map_err(report)?;
    Ok(EnvironmentService::new(layout, sources, &inference))
}

/// Short message on top, full error chain underneath; diagnostics go to the debug log.
pub(crate) fn report(err: RuntimeError) -> anyhow::Error {
    tracing::debug!("{}", err.diagnostics());
    let message = err.user_message();
    anyhow::Error::new(err).context(message)
}
