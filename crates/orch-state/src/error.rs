//! Error types for the state store, signal/mailbox IPC, and environment
//! hasher.

use thiserror::Error;

/// Errors raised by [`crate::lock`], [`crate::state`], [`crate::signals`],
/// [`crate::mailbox`], and [`crate::envhash`].
#[derive(Debug, Error)]
pub enum StateError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path the operation was attempted against.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The exclusive lock could not be acquired before the deadline.
    #[error("timed out acquiring lock {path} after {waited_ms}ms")]
    LockTimeout {
        /// Lock file path.
        path: String,
        /// How long was spent waiting.
        waited_ms: u64,
    },
    /// The state document failed to parse as JSON after all retries.
    #[error("failed to parse state document at {path} after {attempts} attempts: {source}")]
    Corrupt {
        /// Path of the document.
        path: String,
        /// Number of retries attempted.
        attempts: u32,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
    /// A task transition was not allowed by the state machine.
    #[error("invalid transition for task {task}: {from:?} -> {to:?}")]
    InvalidTransition {
        /// The task id.
        task: String,
        /// The state the task was in.
        from: crate::state::TaskStatus,
        /// The state the caller requested.
        to: crate::state::TaskStatus,
    },
    /// The task id referenced does not exist in the state document.
    #[error("unknown task {0}")]
    UnknownTask(String),
}
