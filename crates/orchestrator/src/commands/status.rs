//! `orchestrator status [--json]`: report the effective status of every
//! task (spec.md 4.5's state-document + worker-status-file merge rule).

use std::path::Path;

use anyhow::{Context, Result};
use orch_state::{StateStore, TaskStatus};
use serde::Serialize;

use crate::paths::Layout;
use crate::task_status;

/// One task's effective status line.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatusEntry {
    /// Task id.
    pub id: String,
    /// Effective status (spec.md 4.5: worker's own file if fresher, else
    /// the state document's).
    pub status: TaskStatus,
    /// Retry count so far.
    pub attempt: u32,
    /// Worktree path, once created.
    pub worktree: Option<std::path::PathBuf>,
    /// Last recorded error, if any.
    pub error: Option<String>,
    /// Set when the worker reported it's blocked on a missing external
    /// dependency (spec.md 4.7 `needs_dependency`) — this is only
    /// observable from the worker's own status file, never from the
    /// state document (spec.md §3).
    pub blocked: bool,
    /// The worker's reason, present when `blocked` is set.
    pub blocked_reason: Option<String>,
}

/// Full status report for one orchestration run.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// The orchestration's request id.
    pub request_id: String,
    /// The original human request.
    pub original_request: String,
    /// Current orchestration phase label.
    pub current_phase: String,
    /// Current wave/retry iteration.
    pub iteration: u32,
    /// Environment hash currently recorded.
    pub environment_hash: String,
    /// Per-task entries, sorted by id.
    pub tasks: Vec<TaskStatusEntry>,
}

/// Load the orchestration state at `root` and compute each task's
/// effective status.
///
/// # Errors
///
/// [`anyhow::Error`] if no orchestration state exists at `root` or it
/// fails to parse.
pub async fn run(root: &Path) -> Result<StatusReport> {
    let layout = Layout::new(root);
    let store = StateStore::new(layout.state_file());
    let state = store
        .load()
        .await
        .with_context(|| format!("no orchestration state found at {}", layout.state_file().display()))?;

    let mut tasks: Vec<TaskStatusEntry> = state
        .tasks
        .iter()
        .map(|(id, record)| {
            let effective =
                task_status::effective_status(record.worktree.as_deref(), record.status, record.updated_at);
            let worker_status = record.worktree.as_deref().and_then(task_status::read);
            TaskStatusEntry {
                id: id.clone(),
                status: effective,
                attempt: record.attempt,
                worktree: record.worktree.clone(),
                error: record.error.clone(),
                blocked: worker_status.as_ref().is_some_and(|w| w.blocked),
                blocked_reason: worker_status.and_then(|w| w.blocked_reason),
            }
        })
        .collect();
    tasks.sort_by(|a, b| a.id.cmp(&b.id));

    Ok(StatusReport {
        request_id: state.request_id,
        original_request: state.original_request,
        current_phase: state.current_phase,
        iteration: state.iteration,
        environment_hash: state.environment.hash,
        tasks,
    })
}

/// Whether `report` has a task blocked on a missing external dependency
/// (spec.md 6/7: exit code 2 is reserved for this, not for ordinary
/// failures).
#[must_use]
pub fn has_blocked_task(report: &StatusReport) -> bool {
    report.tasks.iter().any(|t| t.blocked)
}
