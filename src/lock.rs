use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use fs2::FileExt;
use tracing::debug;
use crate::error::StoreError;

/// Exclusive advisory lock on `<store>.lock`.
///
/// Held by every command that mutates the store, from load to save. The lock
/// is released when the value is dropped.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Blocks until the lock is acquired.
    pub fn acquire(store_path: &Path) -> Result<StoreLock, StoreError> {
        let path = lock_path_for(store_path);
        let locked = |source| StoreError::StoreLocked {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(locked)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(locked)?;

        if file.try_lock_exclusive().is_err() {
            debug!("Waiting for lock on {}", path.display());
            file.lock_exclusive().map_err(locked)?;
        }
        debug!("Acquired lock on {}", path.display());
        Ok(StoreLock { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!("Released lock on {}", self.path.display());
    }
}

/// `config.toml` → `config.toml.lock`
pub fn lock_path_for(store_path: &Path) -> PathBuf {
    let mut name = store_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    store_path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_path() {
        assert_eq!(
            lock_path_for(Path::new("/a/config.toml")),
            PathBuf::from("/a/config.toml.lock")
        );
    }

    #[test]
    fn test_lock_is_exclusive_until_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("nested").join("config.toml");
        let lock = StoreLock::acquire(&store).unwrap();
        assert!(lock.path().exists());

        let other = OpenOptions::new().write(true).open(lock.path()).unwrap();
        assert!(other.try_lock_exclusive().is_err());

        drop(lock);
        assert!(other.try_lock_exclusive().is_ok());
        FileExt::unlock(&other).unwrap();
    }
}
