//! Error type for the verification pipeline.

use thiserror::Error;

/// Errors raised while running the verification pipeline.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// Spawning a `git` or check-command subprocess failed.
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        /// The command line attempted.
        command: String,
        /// Underlying spawn error.
        #[source]
        source: std::io::Error,
    },
    /// `git` exited non-zero for a diff/status query this pipeline needs.
    #[error("`git {args}` failed: {stderr}")]
    GitFailed {
        /// The arguments passed to `git`.
        args: String,
        /// Captured stderr.
        stderr: String,
    },
    /// Neither `main...HEAD` nor `HEAD~1..HEAD` produced a usable diff —
    /// per spec.md 4.9, this must hard-fail rather than silently treat the
    /// modified set as empty.
    #[error("could not determine the modified-file set for {worktree}: both diff bases failed")]
    NoUsableDiffBase {
        /// The worktree the diff was attempted against.
        worktree: String,
    },
    /// Filesystem operation (contract file read, log write) failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path the operation was attempted against.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}
