//! The Session Supervisor (C7): one detached tmux session per agent,
//! spawned, liveness-checked, and monitored via subprocess calls run as
//! argv lists.

#![forbid(unsafe_code)]

pub mod error;
pub mod protocol;
pub mod session;
pub mod tmux;

pub use error::SessionError;
pub use protocol::{evaluate, MonitorAction, MonitorInputs};
pub use session::{LivenessStatus, Role, SessionSupervisor};

/// Confirm the `tmux` binary is reachable on `PATH` before any session
/// operation is attempted (spec.md 6 preflight checks).
///
/// # Errors
///
/// [`SessionError::TmuxNotFound`] if it isn't.
pub fn check_tmux_installed() -> Result<(), SessionError> {
    which::which("tmux").map(|_| ()).map_err(SessionError::TmuxNotFound)
}
