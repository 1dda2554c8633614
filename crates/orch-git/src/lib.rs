//! The Worktree Manager (C6): per-task git worktrees and branches, created,
//! merged, and torn down via `git` subprocesses run as argv lists.

#![forbid(unsafe_code)]

pub mod error;
pub mod worktree;

pub use error::GitError;
pub use worktree::{CleanupOutcome, WorktreeEntry, WorktreeManager};

/// Confirm the `git` binary is reachable on `PATH` before any worktree
/// operation is attempted (spec.md 6 preflight checks).
///
/// # Errors
///
/// [`GitError::GitNotFound`] if it isn't.
pub fn check_git_installed() -> Result<(), GitError> {
    which::which("git").map(|_| ()).map_err(GitError::GitNotFound)
}
