//! Process-wide single-flight guard: at most one installer per environment root.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use crate::error::{Result, RuntimeError};

fn active_roots() -> &'static Mutex<HashSet<PathBuf>> {
    static ACTIVE: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
    ACTIVE.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Roots may not exist yet, so `canonicalize` is not an option.
fn lease_key(env_root: &Path) -> PathBuf {
    std::path::absolute(env_root).unwrap_or_else(|_| env_root.to_path_buf())
}

/// Held for the duration of one install. Dropping it (on success, error,
/// cancellation or unwind) frees the root for the next installer.
#[derive(Debug)]
pub struct InstallLease {
    key: PathBuf,
}

impl InstallLease {
    /// Fails immediately with `InstallInProgress` if another lease holds `env_root`.
    pub fn acquire(env_root: &Path) -> Result<Self> {
        let key = lease_key(env_root);
        let mut active = active_roots()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !active.insert(key.clone()) {
            return Err(RuntimeError::InstallInProgress {
                env_root: env_root.to_path_buf(),
            });
        }
        tracing::debug!(env_root = %key.display(), "install lease acquired");
        Ok(Self { key })
    }

    pub fn is_held(env_root: &Path) -> bool {
        active_roots()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(&lease_key(env_root))
    }

    pub fn env_root(&self) -> &Path {
        &self.key
    }
}

impl Drop for InstallLease {
    fn drop(&mut self) {
        let mut active = active_roots()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        active.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_rejected_until_drop() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("env");
        let lease = InstallLease::acquire(&root).unwrap();
        assert!(InstallLease::is_held(&root));
        let err = InstallLease::acquire(&root).unwrap_err();
        assert!(matches!(err, RuntimeError::InstallInProgress { .. }));
        drop(lease);
        assert!(!InstallLease::is_held(&root));
        assert!(InstallLease::acquire(&root).is_ok());
    }

    #[test]
    fn test_distinct_roots_do_not_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let _a = InstallLease::acquire(&dir.path().join("a")).unwrap();
        let _b = InstallLease::acquire(&dir.path().join("b")).unwrap();
    }

    #[test]
    fn test_released_on_unwind() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("env");
        let r = root.clone();
        let joined = std::thread::spawn(move || {
            let _lease = InstallLease::acquire(&r).unwrap();
            panic!("installer crashed");
        })
        .join();
        assert!(joined.is_err());
        assert!(!InstallLease::is_held(&root));
    }
}
