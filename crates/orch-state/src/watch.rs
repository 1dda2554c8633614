//! Filesystem-notification fast path for the signal directory.
//!
//! The monitoring loop's correctness never depends on this: it polls on a
//! fixed interval regardless (spec.md 4.7, 5 — "every blocking wait is a
//! filesystem poll with an explicit deadline"). This module only lets the
//! loop wake up promptly when the OS supports it, falling back to the
//! poll interval whenever a watch can't be established.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_mini::new_debouncer;
use tokio::sync::mpsc;

use crate::error::StateError;

/// A signal directory changed; the receiver should re-poll signal state
/// rather than trust the event's path (debounced events can coalesce
/// several files into one notification).
#[derive(Debug, Clone, Copy)]
pub struct SignalDirChanged;

/// Watch `dir` for changes, debounced by `debounce`, returning a channel
/// that receives [`SignalDirChanged`] on activity.
///
/// The watcher is kept alive in a background task for the lifetime of the
/// returned receiver; dropping the receiver stops the watch.
///
/// # Errors
///
/// [`StateError::Io`] if the debouncer or the underlying watch can't be
/// established (the caller should fall back to pure polling, not treat
/// this as fatal).
pub fn watch_signal_dir(dir: &Path, debounce: Duration) -> Result<mpsc::Receiver<SignalDirChanged>, StateError> {
    let (tx, rx) = mpsc::channel(16);
    let dir_owned: PathBuf = dir.to_path_buf();

    let mut debouncer = new_debouncer(debounce, move |res: notify_debouncer_mini::DebounceEventResult| {
        if res.is_ok() {
            let _ = tx.blocking_send(SignalDirChanged);
        }
    })
    .map_err(|e| StateError::Io {
        path: dir_owned.display().to_string(),
        source: std::io::Error::other(e.to_string()),
    })?;

    debouncer
        .watcher()
        .watch(dir, RecursiveMode::NonRecursive)
        .map_err(|e| StateError::Io { path: dir.display().to_string(), source: std::io::Error::other(e.to_string()) })?;

    tokio::spawn(async move {
        let _debouncer = debouncer;
        std::future::pending::<()>().await;
    });

    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn watch_fires_on_new_signal_file() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        tokio::fs::create_dir_all(dir.path()).await.unwrap_or_else(|e| panic!("{e}"));

        let mut rx = watch_signal_dir(dir.path(), Duration::from_millis(20))
            .unwrap_or_else(|e| panic!("{e}"));

        tokio::fs::write(dir.path().join("a.done"), "x").await.unwrap_or_else(|e| panic!("{e}"));

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
        assert!(event.is_ok(), "expected a signal-dir-changed notification");
    }
}
