//! Exclusive advisory file locks backing the State Store's read-modify-write
//! cycle and the supervisor's staging lock.
//!
//! Locks are acquired on a sibling `.lock` file next to the resource being
//! protected, never on the resource itself — readers must be able to open
//! the resource file without contending for the lock.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::error::StateError;

/// Poll interval while waiting for a contended lock.
const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

/// Default deadline for lock acquisition.
const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// An acquired exclusive lock, released when dropped.
///
/// The lock file itself is never deleted — only ever created once and
/// reused — so that a deleted-then-recreated lock file can't be raced by
/// two processes each locking a different inode for the "same" path.
pub struct FileLock {
    file: File,
    lock_path: PathBuf,
}

impl FileLock {
    /// Path of the underlying lock file.
    #[must_use]
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = fs2::FileExt::unlock(&self.file) {
            tracing::debug!(path = %self.lock_path.display(), error = %e, "lock release failed (process exit will clear it)");
        }
    }
}

/// Tuning for [`acquire`].
#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    /// How long to wait for the lock before giving up.
    pub timeout: Duration,
    /// Delay between acquisition attempts.
    pub poll_interval: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

/// Acquire an exclusive lock on `lock_path`, creating it if absent.
///
/// Uses a deadline and non-blocking retry loop rather than a blocking OS
/// wait, so that a holder whose process died leaves nothing but a stale
/// file — the lock itself is released by the kernel when that process
/// exits, and the next `try_lock_exclusive` simply succeeds.
///
/// # Errors
///
/// [`StateError::Io`] if the lock file can't be opened/created, or
/// [`StateError::LockTimeout`] if the deadline elapses while contended.
pub async fn acquire(lock_path: &Path, options: LockOptions) -> Result<FileLock, StateError> {
    if let Some(parent) = lock_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| StateError::Io { path: parent.display().to_string(), source })?;
    }

    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(lock_path)
        .map_err(|source| StateError::Io { path: lock_path.display().to_string(), source })?;

    let start = Instant::now();
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => {
                return Ok(FileLock { file, lock_path: lock_path.to_path_buf() });
            }
            Err(_) if start.elapsed() >= options.timeout => {
                return Err(StateError::LockTimeout {
                    path: lock_path.display().to_string(),
                    waited_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
                });
            }
            Err(_) => {
                tokio::time::sleep(options.poll_interval).await;
            }
        }
    }
}

/// Run `f` while holding an exclusive lock on `lock_path`.
///
/// # Errors
///
/// Propagates [`acquire`]'s errors, or whatever `f` itself returns.
pub async fn with_lock<F, Fut, T, E>(lock_path: &Path, options: LockOptions, f: F) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: From<StateError>,
{
    let _lock = acquire(lock_path, options).await?;
    f().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_and_release_allows_reacquire() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let lock_path = dir.path().join("state.lock");

        {
            let lock = acquire(&lock_path, LockOptions::default())
                .await
                .unwrap_or_else(|e| panic!("{e}"));
            assert!(lock.lock_path().exists());
        }

        let lock2 = acquire(&lock_path, LockOptions::default())
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        drop(lock2);
    }

    #[tokio::test]
    async fn contended_lock_times_out() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let lock_path = dir.path().join("state.lock");

        let _held = acquire(&lock_path, LockOptions::default())
            .await
            .unwrap_or_else(|e| panic!("{e}"));

        let options = LockOptions {
            timeout: Duration::from_millis(100),
            poll_interval: Duration::from_millis(10),
        };
        let result = acquire(&lock_path, options).await;
        assert!(matches!(result, Err(StateError::LockTimeout { .. })));
    }
}
