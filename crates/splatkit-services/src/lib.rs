//! Host-facing services.
//!
//! `EnvironmentService` is the one object an entry point (CLI, editor add-on)
//! holds: it caches readiness, runs installs and predictions off the calling
//! thread, and turns artifact problems into `RuntimeError` values.

pub mod environment;
pub mod status;

pub use environment::{
    standardize_ply, EnvironmentService, InstallEvent, InstallHandle, PredictEvent,
    PredictOutcome, StandardPlyReport,
};
pub use splatkit_runtime::CancelToken;
pub use status::StatusCache;
