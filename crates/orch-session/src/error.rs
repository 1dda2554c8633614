//! Error type for the session supervisor.

use thiserror::Error;

/// Errors raised by [`crate::tmux`] and [`crate::session::SessionSupervisor`].
#[derive(Debug, Error)]
pub enum SessionError {
    /// The `tmux` binary could not be located on `PATH`.
    #[error("tmux binary not found on PATH: {0}")]
    TmuxNotFound(#[source] which::Error),
    /// Spawning or waiting on a `tmux` subprocess failed.
    #[error("failed to run `tmux {args}`: {source}")]
    Spawn {
        /// The arguments passed to `tmux`, joined for display.
        args: String,
        /// Underlying spawn error.
        #[source]
        source: std::io::Error,
    },
    /// `tmux` exited non-zero.
    #[error("`tmux {args}` failed: {stderr}")]
    CommandFailed {
        /// The arguments passed to `tmux`, joined for display.
        args: String,
        /// Captured stderr.
        stderr: String,
    },
    /// A task id failed the safe-id pattern check before being used in a
    /// session name.
    #[error("unsafe task id rejected before reaching tmux: {0}")]
    UnsafeTaskId(#[from] orch_core::TaskIdError),
    /// Filesystem operation outside of `tmux` itself failed (log persistence).
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path the operation was attempted against.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}
