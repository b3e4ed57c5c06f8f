use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

/// Holds an advisory exclusive lock on a sidecar file next to the database for
/// the lifetime of the process. Dropping it releases the lock.
pub struct InstanceLock {
    _file: File,
    path: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("failed to open lock file {0}: {1}")]
    Open(PathBuf, std::io::Error),
    #[error("another aggregator instance is already running against {0}")]
    AlreadyLocked(PathBuf),
}

impl InstanceLock {
    pub fn acquire(db_path: &Path) -> Result<Self, LockError> {
        let lock_path = lock_file_path(db_path);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| LockError::Open(lock_path.clone(), e))?;

        file.try_lock_exclusive()
            .map_err(|_| LockError::AlreadyLocked(lock_path.clone()))?;

        Ok(InstanceLock {
            _file: file,
            path: lock_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn lock_file_path(db_path: &Path) -> PathBuf {
    let mut path = db_path.as_os_str().to_owned();
    path.push(".lock");
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_on_same_path_fails() {
        let dir = std::env::temp_dir().join(format!("fleetwatch-lock-test-{}", std::process::id()));
        let db_path = dir.with_extension("db");
        let _first = InstanceLock::acquire(&db_path).expect("first lock succeeds");
        let second = InstanceLock::acquire(&db_path);
        assert!(matches!(second, Err(LockError::AlreadyLocked(_))));
        let _ = std::fs::remove_file(lock_file_path(&db_path));
    }
}
