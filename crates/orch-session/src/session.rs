//! Session Supervisor (C7): spawns one detached tmux session per agent,
//! verifies it actually started, and persists failure logs. Combines the
//! pure decisions in [`crate::protocol`] with the `tmux` shell in
//! [`crate::tmux`].

use std::path::{Path, PathBuf};

use orch_core::TaskId;

use crate::error::SessionError;
use crate::protocol;

/// Which role a spawned session plays — determines its name via
/// [`TaskId::worker_session_name`] or [`TaskId::verifier_session_name`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The planning pass that turns a human request into a [`Plan`](orch_core::Plan).
    /// Runs once per orchestration, ahead of any task.
    Planner,
    /// A task's primary worker.
    Worker,
    /// The verification pass for a task, run in its own session so a
    /// verifier crash can't be mistaken for a worker crash.
    Verifier,
}

impl Role {
    #[must_use]
    pub fn session_name(self, id: &TaskId) -> String {
        match self {
            Role::Planner => format!("planner-{id}"),
            Role::Worker => id.worker_session_name(),
            Role::Verifier => id.verifier_session_name(),
        }
    }
}

/// Result of [`SessionSupervisor::verify_liveness`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LivenessStatus {
    /// The pane is still at its login shell; not yet conclusive.
    Starting,
    /// Something other than a shell is running in the pane.
    Running,
    /// The pane is still at its login shell *and* a concrete shell-level
    /// error was found in its output.
    Failed(String),
}

/// Spawns and supervises detached tmux sessions for worker and verifier
/// agents.
pub struct SessionSupervisor {
    launcher_path: PathBuf,
    heap_size_mb: Option<u32>,
}

impl SessionSupervisor {
    /// `launcher_path` must be the launcher binary's absolute path,
    /// resolved once at orchestrator startup — never a bare name relying
    /// on the ambient `PATH`, since the session's own `PATH` is what
    /// spawning step 2 constructs.
    #[must_use]
    pub fn new(launcher_path: impl Into<PathBuf>, heap_size_mb: Option<u32>) -> Self {
        Self { launcher_path: launcher_path.into(), heap_size_mb }
    }

    /// Runs the 5-step spawning protocol from spec.md 4.7, steps 1-4
    /// (step 5, liveness verification, is [`Self::verify_liveness`] —
    /// callers sleep ~3s between the two so the agent has time to start).
    ///
    /// Returns the final session name (`worker-<id>` or `verifier-<id>`).
    ///
    /// # Errors
    ///
    /// Any [`SessionError`] from the underlying `tmux` calls.
    pub fn spawn(
        &self,
        id: &TaskId,
        role: Role,
        worktree_dir: &Path,
        prompt_file: &Path,
        temp_suffix: &str,
    ) -> Result<String, SessionError> {
        let target = role.session_name(id);
        let temp = protocol::temp_session_name(&target, temp_suffix);

        crate::tmux::new_detached(&temp, worktree_dir)?;

        let launcher_dir = self
            .launcher_path
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        crate::tmux::send_keys(&temp, &protocol::init_command(&launcher_dir, self.heap_size_mb))?;

        if crate::tmux::has_session(&target) {
            crate::tmux::kill_session(&target)?;
        }
        crate::tmux::rename_session(&temp, &target)?;

        let launch = protocol::launch_command(
            &self.launcher_path.to_string_lossy(),
            &prompt_file.to_string_lossy(),
        );
        crate::tmux::send_keys(&target, &launch)?;

        Ok(target)
    }

    /// Step 5 of the spawning protocol: inspect the pane's
    /// `current_command` and, if it's still a shell, scan its output for
    /// a concrete shell-level error before declaring [`LivenessStatus::Failed`].
    ///
    /// # Errors
    ///
    /// [`SessionError::CommandFailed`] if the session has already vanished.
    pub fn verify_liveness(&self, session_name: &str) -> Result<LivenessStatus, SessionError> {
        let current = crate::tmux::current_command(session_name)?;
        if !protocol::is_shell_command(&current) {
            return Ok(LivenessStatus::Running);
        }
        let pane = crate::tmux::capture_pane(session_name, 200)?;
        match protocol::find_shell_error(&pane) {
            Some(marker) => Ok(LivenessStatus::Failed(marker.to_string())),
            None => Ok(LivenessStatus::Starting),
        }
    }

    /// Whether the named session still exists.
    #[must_use]
    pub fn exists(&self, session_name: &str) -> bool {
        crate::tmux::has_session(session_name)
    }

    /// Kill the named session. Not an error if it's already gone.
    ///
    /// # Errors
    ///
    /// [`SessionError::Spawn`] if `tmux` itself could not be executed.
    pub fn kill(&self, session_name: &str) -> Result<(), SessionError> {
        crate::tmux::kill_session(session_name)
    }

    /// Persist the last ~1000 lines of pane output to
    /// `<logs_root>/<session>_<timestamp>.log` (spec.md 4.7: "on any
    /// failure, the last ~1000 lines of pane output are copied").
    ///
    /// # Errors
    ///
    /// [`SessionError::CommandFailed`] if capture fails, or
    /// [`SessionError::Io`] if the log can't be written.
    pub fn save_failure_log(
        &self,
        session_name: &str,
        logs_root: &Path,
    ) -> Result<PathBuf, SessionError> {
        let pane = crate::tmux::capture_pane(session_name, 1000)?;
        std::fs::create_dir_all(logs_root)
            .map_err(|source| SessionError::Io { path: logs_root.display().to_string(), source })?;

        let ts = chrono::Utc::now().format("%Y%m%dT%H%M%SZ");
        let path = logs_root.join(format!("{session_name}_{ts}.log"));
        std::fs::write(&path, pane)
            .map_err(|source| SessionError::Io { path: path.display().to_string(), source })?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_session_names_match_task_id_helpers() {
        let id = TaskId::new("add-healthcheck").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(Role::Worker.session_name(&id), id.worker_session_name());
        assert_eq!(Role::Verifier.session_name(&id), id.verifier_session_name());
    }
}
