//! Advisory file lock electing the one process allowed to spawn a hub.
//!
//! The lock is a kernel `flock` on `<runtime>/hub.lock`, so a holder that
//! crashes releases it automatically; no staleness sweep is needed. The
//! file's contents are diagnostics only: the pid and timestamp of the last
//! holder, for inspecting a wedged election by hand.

// Rust guideline compliant 2026-08

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use fs2::FileExt;

/// Held advisory lock on the hub lock file.
///
/// Whoever holds this is the elected spawner. Dropping the guard releases
/// the lock; the file itself stays behind with the last holder's metadata.
pub struct LeaderLock {
    file: File,
    path: PathBuf,
}

impl std::fmt::Debug for LeaderLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderLock")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl LeaderLock {
    /// Try to acquire the lock without blocking.
    ///
    /// Returns `Ok(None)` when another process holds it.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file cannot be created or written.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create lock directory: {}", parent.display())
            })?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("Failed to open lock file: {}", path.display()))?;

        if file.try_lock_exclusive().is_err() {
            return Ok(None);
        }

        let metadata = format!(
            "pid={}\nacquired_at={}\n",
            std::process::id(),
            Utc::now().to_rfc3339(),
        );
        file.set_len(0)?;
        file.write_all(metadata.as_bytes())?;
        file.flush()?;

        log::debug!("[Bridge] Acquired leader lock: {}", path.display());
        Ok(Some(Self {
            file,
            path: path.to_path_buf(),
        }))
    }
}

impl Drop for LeaderLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        log::debug!("[Bridge] Released leader lock: {}", self.path.display());
    }
}
