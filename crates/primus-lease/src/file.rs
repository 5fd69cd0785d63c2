//! Advisory file lock lease for single-host deployments
//!
//! All contending instances share a filesystem, so an exclusive OS-level
//! lock on one file is enough. The lock dies with the process, which makes
//! crash recovery automatic.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::PathBuf;

use async_trait::async_trait;
use fs2::FileExt;

use primus_common::current_timestamp;

use crate::Lease;
use crate::config::FileLeaseConfig;

pub struct FileLease {
    path: PathBuf,
    handle: Option<File>,
}

impl FileLease {
    pub fn new(cfg: FileLeaseConfig) -> Self {
        Self {
            path: cfg.path,
            handle: None,
        }
    }

    fn try_lock(&mut self) -> std::io::Result<bool> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                // Latest acquisition timestamp, for operators inspecting the
                // file. Truncated only after the lock is ours.
                let mut file = file;
                let _ = file.set_len(0);
                let _ = writeln!(file, "{}", current_timestamp());
                self.handle = Some(file);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Lease for FileLease {
    async fn acquire(&mut self) -> anyhow::Result<bool> {
        if self.handle.is_some() {
            // Already held; the OS keeps it until we unlock or die.
            return Ok(true);
        }
        match self.try_lock() {
            Ok(held) => {
                if held {
                    tracing::info!(path = %self.path.display(), "acquired file lease");
                }
                Ok(held)
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "file lease attempt failed: {}", e);
                Ok(false)
            }
        }
    }

    /// Held for as long as we keep the descriptor and the file still exists.
    /// An administrator deleting the lock file demotes the holder.
    async fn is_alive(&mut self) -> anyhow::Result<bool> {
        Ok(self.handle.is_some() && self.path.exists())
    }

    async fn release(&mut self) {
        if let Some(file) = self.handle.take() {
            if let Err(e) = file.unlock() {
                tracing::warn!(path = %self.path.display(), "failed to unlock lease file: {}", e);
            }
            tracing::info!(path = %self.path.display(), "released file lease");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lease_at(path: &std::path::Path) -> FileLease {
        FileLease::new(FileLeaseConfig {
            path: path.to_path_buf(),
        })
    }

    #[tokio::test]
    async fn test_exclusive_between_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("master.lock");
        let mut a = lease_at(&path);
        let mut b = lease_at(&path);

        assert!(a.acquire().await.unwrap());
        assert!(!b.acquire().await.unwrap());

        a.release().await;
        assert!(!a.is_alive().await.unwrap());
        assert!(b.acquire().await.unwrap());
    }

    #[tokio::test]
    async fn test_reacquire_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("master.lock");
        let mut a = lease_at(&path);

        assert!(a.acquire().await.unwrap());
        assert!(a.acquire().await.unwrap());
        assert!(a.is_alive().await.unwrap());
    }

    #[tokio::test]
    async fn test_deleted_lock_file_demotes_holder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("master.lock");
        let mut a = lease_at(&path);

        assert!(a.acquire().await.unwrap());
        std::fs::remove_file(&path).unwrap();
        assert!(!a.is_alive().await.unwrap());
    }

    #[tokio::test]
    async fn test_lock_file_keeps_only_latest_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("master.lock");
        let mut a = lease_at(&path);

        assert!(a.acquire().await.unwrap());
        a.release().await;
        assert!(a.acquire().await.unwrap());

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_parent_directories_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/dir/master.lock");
        let mut a = lease_at(&path);
        assert!(a.acquire().await.unwrap());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_release_without_hold_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("master.lock");
        let mut a = lease_at(&path);
        a.release().await;
        assert!(!a.is_alive().await.unwrap());
    }
}
