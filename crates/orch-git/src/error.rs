//! Error type for the worktree manager.

use thiserror::Error;

/// Errors raised by [`crate::worktree::WorktreeManager`].
#[derive(Debug, Error)]
pub enum GitError {
    /// The `git` binary could not be located on `PATH`.
    #[error("git binary not found on PATH: {0}")]
    GitNotFound(#[source] which::Error),
    /// Spawning or waiting on a `git` subprocess failed.
    #[error("failed to run `git {args}`: {source}")]
    Spawn {
        /// The arguments passed to `git`, joined for display.
        args: String,
        /// Underlying spawn error.
        #[source]
        source: std::io::Error,
    },
    /// `git` exited non-zero.
    #[error("`git {args}` failed: {stderr}")]
    CommandFailed {
        /// The arguments passed to `git`, joined for display.
        args: String,
        /// Captured stderr.
        stderr: String,
    },
    /// A task id failed the safe-id pattern check before being used in a
    /// branch or path name.
    #[error("unsafe task id rejected before reaching git: {0}")]
    UnsafeTaskId(#[from] orch_core::TaskIdError),
    /// Filesystem operation outside of `git` itself failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path the operation was attempted against.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// `git worktree list --porcelain` produced output this parser could
    /// not understand.
    #[error("failed to parse `git worktree list --porcelain` output")]
    UnparseableWorktreeList,
    /// A merge failed and was rolled back with `git merge --abort`.
    #[error("merge of {branch} into {target} failed and was aborted: {stderr}")]
    MergeFailed {
        /// The task branch that failed to merge.
        branch: String,
        /// The branch it was being merged into.
        target: String,
        /// Captured stderr from the failed merge.
        stderr: String,
    },
}
