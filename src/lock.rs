//! Single-instance guard for background tasks.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use fs2::FileExt;
use tracing::debug;

use crate::marker::task_name;
use crate::model::Network;

/// Exclusive lock on `<root>/<NETWORK>/locks/<task>.lock`, held until drop.
#[derive(Debug)]
pub struct RunningLock {
    file: File,
    path: PathBuf,
}

impl RunningLock {
    /// Take the lock for `task`, failing fast if another process holds it.
    pub fn acquire(storage_root: &Path, network: Network, task: &str) -> Result<Self> {
        let dir = storage_root.join(network.as_upper()).join("locks");
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create lock directory {}", dir.display()))?;

        let path = dir.join(format!("{}.lock", task_name(task, network)));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .with_context(|| format!("Failed to open lock file {}", path.display()))?;

        if let Err(e) = file.try_lock_exclusive() {
            if e.kind() == fs2::lock_contended_error().kind() {
                bail!(
                    "{} is already running (lock held on {})",
                    task_name(task, network),
                    path.display()
                );
            }
            return Err(e).with_context(|| format!("Failed to lock {}", path.display()));
        }

        debug!(lock = %path.display(), "running lock acquired");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunningLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
