//! Isolated runtime provisioning and inference invocation.
//!
//! - `platform` / `layout`: where the isolated interpreter lives (pure path math)
//! - `env`: validator, installer state machine, completion markers, single-flight lease
//! - `invoker`: runs the inference CLI out of process
//! - `download` / `process`: network fetch and subprocess primitives

pub mod cancel;
pub mod download;
pub mod env;
pub mod error;
pub mod invoker;
pub mod layout;
pub mod log;
pub mod manifest;
pub mod platform;
pub mod process;

pub use cancel::CancelToken;
pub use env::installer::{InstallProgress, InstallReport, Installer};
pub use env::stage::InstallationStage;
pub use env::validator::{check_environment, EnvironmentStatus, ImportProbe};
pub use error::{InferenceFailure, Result, RuntimeError};
pub use invoker::{Device, InferenceRequest, InferenceResult, Invoker, InvokerOptions};
pub use layout::RuntimeLayout;
pub use platform::Platform;
