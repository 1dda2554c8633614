//! Persisted orchestration state, filesystem-backed locking, signal and
//! mailbox IPC, and the environment hasher.
//!
//! Everything in this crate coordinates through the filesystem only — no
//! shared in-process memory is assumed between the supervisor and the
//! worker/verifier processes it spawns (spec.md 5: "no shared in-process
//! memory between agents").

#![forbid(unsafe_code)]

pub mod envhash;
pub mod error;
pub mod lock;
pub mod mailbox;
pub mod signals;
pub mod state;
pub mod watch;

pub use error::StateError;
pub use lock::{acquire as acquire_lock, with_lock, FileLock, LockOptions};
pub use mailbox::{Mailbox, Message};
pub use signals::{SignalDir, SignalKind};
pub use state::{
    ContractUsage, EnvironmentRecord, OrchestrationState, StateStore, TaskRecord, TaskStatus,
    VerificationResult,
};
