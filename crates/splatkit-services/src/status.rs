//! In-memory readiness cache.
//!
//! The probe spawns the interpreter, so hosts that redraw often must not call
//! it on every frame. An incomplete status expires after the TTL; a ready one
//! stays until `invalidate()`.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use splatkit_runtime::EnvironmentStatus;

pub const DEFAULT_STATUS_TTL: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct StatusCache {
    ttl: Duration,
    entry: Mutex<Option<(Instant, EnvironmentStatus)>>,
}

impl Default for StatusCache {
    fn default() -> Self {
        Self::new(DEFAULT_STATUS_TTL)
    }
}

impl StatusCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: Mutex::new(None),
        }
    }

    /// Cached status, or `compute()` when missing or stale.
    pub fn get_or_refresh(&self, compute: impl FnOnce() -> EnvironmentStatus) -> EnvironmentStatus {
        if let Some(status) = self.peek() {
            return status;
        }
        let status = compute();
        let mut guard = self.entry.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some((Instant::now(), status.clone()));
        status
    }

    /// Cached status if still fresh, without computing anything.
    pub fn peek(&self) -> Option<EnvironmentStatus> {
        let guard = self.entry.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some((at, status)) if status.is_ready() || at.elapsed() < self.ttl => {
                Some(status.clone())
            }
            _ => None,
        }
    }

    pub fn invalidate(&self) {
        let mut guard = self.entry.lock().unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::path::PathBuf;

    fn status(ready: bool) -> EnvironmentStatus {
        EnvironmentStatus {
            python_installed: true,
            packages_installed: ready,
            checkpoint_installed: ready,
            message: if ready { "Environment ready" } else { "missing" }.to_string(),
            interpreter: PathBuf::from("/env/bin/python3"),
            checkpoint: PathBuf::from("/models/sharp.pt"),
        }
    }

    #[test]
    fn test_incomplete_status_expires() {
        let cache = StatusCache::new(Duration::ZERO);
        let calls = Cell::new(0);
        for _ in 0..3 {
            cache.get_or_refresh(|| {
                calls.set(calls.get() + 1);
                status(false)
            });
        }
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_incomplete_status_cached_within_ttl() {
        let cache = StatusCache::new(Duration::from_secs(60));
        let calls = Cell::new(0);
        for _ in 0..3 {
            cache.get_or_refresh(|| {
                calls.set(calls.get() + 1);
                status(false)
            });
        }
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_ready_status_pinned_until_invalidated() {
        let cache = StatusCache::new(Duration::ZERO);
        let calls = Cell::new(0);
        let compute = || {
            calls.set(calls.get() + 1);
            status(true)
        };
        assert!(cache.get_or_refresh(compute).is_ready());
        assert!(cache.get_or_refresh(compute).is_ready());
        assert_eq!(calls.get(), 1);

        cache.invalidate();
        assert!(cache.peek().is_none());
        cache.get_or_refresh(compute);
        assert_eq!(calls.get(), 2);
    }
}
