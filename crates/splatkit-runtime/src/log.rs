//! Quiet-mode aware logging. When SPLATKIT_QUIET=1 (e.g. embedded in a host UI), suppress [INFO].
//! Uses `tracing::info!` so output is captured by the tracing subscriber.

#[macro_export]
macro_rules! info_log {
    ($($arg:tt)*) => {{
        if !$crate::log::is_quiet() {
            tracing::info!($($arg)*);
        }
    }};
}

pub fn is_quiet() -> bool {
    splatkit_core::config::ObservabilityConfig::from_env().quiet
}
