//! Signal files (C8): the cheapest possible IPC primitive — the mere
//! atomic appearance of a file tells the supervisor a worker/verifier
//! reached a milestone.
//!
//! Layout: `<root>/.orchestrator/signals/<task-id>.{done,verified,heartbeat}`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::StateError;

/// The kind of milestone a signal file records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// The worker finished its work.
    Done,
    /// The verifier finished checking the task.
    Verified,
    /// A liveness heartbeat; only the mtime matters.
    Heartbeat,
}

impl SignalKind {
    fn extension(self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::Verified => "verified",
            Self::Heartbeat => "heartbeat",
        }
    }
}

/// Directory holding signal files for one orchestration root.
pub struct SignalDir {
    dir: PathBuf,
}

impl SignalDir {
    /// `<root>/.orchestrator/signals`.
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self { dir: root.join(".orchestrator").join("signals") }
    }

    fn path_for(&self, task_id: &str, kind: SignalKind) -> PathBuf {
        self.dir.join(format!("{task_id}.{}", kind.extension()))
    }

    /// Write (or refresh) a signal atomically: write-tmp-then-rename, body
    /// is `content` (conventionally an ISO timestamp or the `request_id`,
    /// so cleanup can recognize signals belonging to the current run).
    ///
    /// # Errors
    ///
    /// [`StateError::Io`] on any filesystem failure.
    pub async fn emit(&self, task_id: &str, kind: SignalKind, content: &str) -> Result<(), StateError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| StateError::Io { path: self.dir.display().to_string(), source })?;

        let target = self.path_for(task_id, kind);
        let tmp = target.with_extension(format!("{}.tmp", kind.extension()));
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|source| StateError::Io { path: tmp.display().to_string(), source })?;
        tokio::fs::rename(&tmp, &target)
            .await
            .map_err(|source| StateError::Io { path: target.display().to_string(), source })?;
        Ok(())
    }

    /// `true` if the signal exists and is non-empty (an empty file is
    /// treated the same as absent — it means a writer crashed mid-write
    /// before the atomic rename, which should never actually happen, but
    /// a zero-length file is cheap to guard against regardless).
    pub async fn is_present(&self, task_id: &str, kind: SignalKind) -> bool {
        let path = self.path_for(task_id, kind);
        match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.len() > 0,
            Err(_) => false,
        }
    }

    /// The signal file's modification time, if present.
    pub async fn modified_at(&self, task_id: &str, kind: SignalKind) -> Option<DateTime<Utc>> {
        let path = self.path_for(task_id, kind);
        let meta = tokio::fs::metadata(&path).await.ok()?;
        let modified = meta.modified().ok()?;
        Some(DateTime::<Utc>::from(modified))
    }

    /// Remove signals older than `max_age` whose content does not contain
    /// `current_request_id` (spec.md 4.8: never clean up signals tagged
    /// with the current run, even if stale by age).
    ///
    /// # Errors
    ///
    /// [`StateError::Io`] if the directory can't be read.
    pub async fn cleanup_stale(
        &self,
        max_age: std::time::Duration,
        current_request_id: &str,
    ) -> Result<usize, StateError> {
        let mut removed = 0;
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(source) => return Err(StateError::Io { path: self.dir.display().to_string(), source }),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| StateError::Io { path: self.dir.display().to_string(), source })?
        {
            let path = entry.path();
            let Ok(meta) = entry.metadata().await else { continue };
            let Ok(modified) = meta.modified() else { continue };
            let Ok(age) = modified.elapsed() else { continue };
            if age < max_age {
                continue;
            }
            let content = tokio::fs::read_to_string(&path).await.unwrap_or_default();
            if content.contains(current_request_id) {
                continue;
            }
            if tokio::fs::remove_file(&path).await.is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_then_is_present() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let signals = SignalDir::new(dir.path());
        assert!(!signals.is_present("a", SignalKind::Done).await);
        signals.emit("a", SignalKind::Done, "2026-01-01T00:00:00Z").await.unwrap_or_else(|e| panic!("{e}"));
        assert!(signals.is_present("a", SignalKind::Done).await);
    }

    #[tokio::test]
    async fn distinct_kinds_are_independent() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let signals = SignalDir::new(dir.path());
        signals.emit("a", SignalKind::Done, "x").await.unwrap_or_else(|e| panic!("{e}"));
        assert!(signals.is_present("a", SignalKind::Done).await);
        assert!(!signals.is_present("a", SignalKind::Verified).await);
    }

    #[tokio::test]
    async fn cleanup_preserves_current_request_tagged_signals() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let signals = SignalDir::new(dir.path());
        signals.emit("a", SignalKind::Done, "req-current").await.unwrap_or_else(|e| panic!("{e}"));
        signals.emit("b", SignalKind::Done, "req-old").await.unwrap_or_else(|e| panic!("{e}"));

        let removed = signals
            .cleanup_stale(std::time::Duration::from_secs(0), "req-current")
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(removed, 1);
        assert!(signals.is_present("a", SignalKind::Done).await);
        assert!(!signals.is_present("b", SignalKind::Done).await);
    }
}
