//! Per-instance advisory locks.
//!
//! Every mutating sequence (create, download+deploy, backup, restore,
//! uninstall) runs with the instance's exclusive lock held, so two
//! overlapping invocations cannot interleave on the same instance. The lock
//! is a non-blocking `flock` on `<data_dir>/locks/<name>.lock`; it is
//! released when the guard drops, even on panic or kill.

use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;

use nix::fcntl::{Flock, FlockArg};

use crate::error::{AppError, Result};
use crate::paths;
use crate::settings::Settings;

/// Held exclusive lock for one instance. Dropping releases it.
#[derive(Debug)]
pub struct InstanceLock {
    _flock: Flock<File>,
    path: PathBuf,
}

impl InstanceLock {
    /// Acquire the lock without blocking. Fails with `Locked` when another
    /// operation already holds it.
    pub fn acquire(settings: &Settings, instance: &str) -> Result<Self> {
        let locks_dir = paths::locks_dir(settings);
        fs::create_dir_all(&locks_dir)
            .map_err(|e| AppError::io(format!("failed to create locks dir: {}", e)))?;

        let path = locks_dir.join(format!("{}.lock", instance));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| AppError::io(format!("failed to open {}: {}", path.display(), e)))?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(flock) => Ok(Self { _flock: flock, path }),
            Err((_, nix::errno::Errno::EWOULDBLOCK)) => Err(AppError::locked(instance)),
            Err((_, errno)) => Err(AppError::io(format!(
                "failed to lock {}: {}",
                path.display(),
                errno
            ))),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::InstanceLock;
    use crate::settings::Settings;

    fn settings_in(dir: &std::path::Path) -> Settings {
        Settings {
            data_dir: dir.to_path_buf(),
            ..Settings::default()
        }
    }

    #[test]
    fn second_acquire_fails_while_held() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = settings_in(dir.path());

        let held = InstanceLock::acquire(&settings, "factorio-0001").unwrap();
        let err = InstanceLock::acquire(&settings, "factorio-0001").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Locked);
        drop(held);

        InstanceLock::acquire(&settings, "factorio-0001").unwrap();
    }

    #[test]
    fn locks_are_scoped_per_instance() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = settings_in(dir.path());

        let _a = InstanceLock::acquire(&settings, "factorio-0001").unwrap();
        let _b = InstanceLock::acquire(&settings, "rust-0001").unwrap();
    }
}
