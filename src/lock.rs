//! Single-instance lock
//!
//! Exactly one engine instance may run per host. The lock is an
//! exclusive flock on a well-known lockfile; a second instance fails
//! fast. Dropping the guard releases the lock on every exit path.

use crate::error::{IoResultExt, Result, VaultError};
use fs2::FileExt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

/// Guard holding the exclusive instance lock
pub struct InstanceLock {
    _file: std::fs::File,
    path: PathBuf,
}

impl InstanceLock {
    /// Acquire the lock or fail immediately if another instance holds it
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_path(path)?;
        file.try_lock_exclusive()
            .map_err(|_| VaultError::Locked(path.to_path_buf()))?;
        Ok(Self {
            _file: file,
            path: path.to_path_buf(),
        })
    }

    /// Path of the lockfile
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_acquire_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lock");
        let held = InstanceLock::acquire(&path).unwrap();
        assert!(matches!(
            InstanceLock::acquire(&path),
            Err(VaultError::Locked(_))
        ));
        drop(held);
        assert!(InstanceLock::acquire(&path).is_ok());
    }
}
