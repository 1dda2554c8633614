//! Validated identifiers.
//!
//! `TaskId` is the single trusted, injection-safe token used to build branch
//! names, worktree paths, session names, and signal file names. Every other
//! module accepts `&TaskId`, never a bare `&str`, so the safe-id check can
//! only ever be bypassed by constructing one through [`TaskId::new`].

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when a task id fails the safe-id pattern check.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaskIdError {
    /// The id was empty.
    #[error("task id cannot be empty")]
    Empty,
    /// The id contained a character outside `[A-Za-z0-9_./-]`, or did not
    /// start with an alphanumeric character.
    #[error("task id {0:?} contains characters unsafe for branch/path/session names")]
    InvalidCharacters(String),
}

/// A task identifier, validated against the pattern
/// `[A-Za-z0-9][A-Za-z0-9_./-]*` at construction time.
///
/// This is the *only* trusted token for composing git branch names,
/// worktree directory names, tmux session names, and signal file names.
/// Constructing a `TaskId` is the sole point where untrusted input crosses
/// into those contexts, so every downstream consumer can treat the string
/// as pre-sanitized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskId(String);

impl TaskId {
    /// Parse and validate a task id.
    ///
    /// # Errors
    ///
    /// Returns [`TaskIdError`] if `raw` is empty or contains any character
    /// outside `[A-Za-z0-9_./-]`, or does not start with an alphanumeric
    /// character.
    pub fn new(raw: impl Into<String>) -> Result<Self, TaskIdError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(TaskIdError::Empty);
        }
        let mut chars = raw.chars();
        let Some(first) = chars.next() else {
            return Err(TaskIdError::Empty);
        };
        if !first.is_ascii_alphanumeric() {
            return Err(TaskIdError::InvalidCharacters(raw));
        }
        let rest_ok = chars.all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '/' | '-')
        });
        if !rest_ok {
            return Err(TaskIdError::InvalidCharacters(raw));
        }
        Ok(Self(raw))
    }

    /// Borrow the validated string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The branch name this task's worktree lives on: `task/<id>`.
    #[must_use]
    pub fn branch_name(&self) -> String {
        format!("task/{}", self.0)
    }

    /// The worktree directory name for this task (relative to
    /// `<root>/.worktrees/`).
    #[must_use]
    pub fn worktree_dir_name(&self) -> &str {
        &self.0
    }

    /// The worker session name: `worker-<id>`.
    #[must_use]
    pub fn worker_session_name(&self) -> String {
        format!("worker-{}", self.0)
    }

    /// The verifier session name: `verifier-<id>`.
    #[must_use]
    pub fn verifier_session_name(&self) -> String {
        format!("verifier-{}", self.0)
    }
}

impl TryFrom<String> for TaskId {
    type Error = TaskIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TaskId> for String {
    fn from(value: TaskId) -> Self {
        value.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for TaskId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_safe_ids() {
        assert!(TaskId::new("a").is_ok());
        assert!(TaskId::new("task-001").is_ok());
        assert!(TaskId::new("A1_b.c/d-e").is_ok());
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(TaskId::new(""), Err(TaskIdError::Empty));
    }

    #[test]
    fn rejects_leading_special_char() {
        assert!(TaskId::new("-task").is_err());
        assert!(TaskId::new("_task").is_err());
        assert!(TaskId::new(".task").is_err());
    }

    #[test]
    fn rejects_shell_metacharacters() {
        assert!(TaskId::new("task; rm -rf /").is_err());
        assert!(TaskId::new("task`whoami`").is_err());
        assert!(TaskId::new("task$(whoami)").is_err());
        assert!(TaskId::new("task && echo pwned").is_err());
    }

    #[test]
    fn derives_conventional_names() {
        let id = TaskId::new("add-auth").unwrap_or_else(|_| unreachable!());
        assert_eq!(id.branch_name(), "task/add-auth");
        assert_eq!(id.worker_session_name(), "worker-add-auth");
        assert_eq!(id.verifier_session_name(), "verifier-add-auth");
    }
}
