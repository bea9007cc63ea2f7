//! Unified configuration layer.
//!
//! Every environment variable read lives here; runtime code accesses
//! structured config instead of calling `std::env::var` directly.
//!
//! - `loader`: env_or, env_optional, env_bool, env_u64 helpers
//! - `schema`: PathsConfig, SourcesConfig, InferenceConfig, ObservabilityConfig
//! - `env_keys`: key constants

pub mod env_keys;
pub mod loader;
pub mod schema;

pub use loader::{env_bool, env_optional, env_or, env_u64, load_dotenv, load_dotenv_from_dir};
pub use schema::{InferenceConfig, ObservabilityConfig, PathsConfig, SourcesConfig};
