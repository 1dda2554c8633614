//! `orchestrator worktrees [--all]`: list task worktrees and which task
//! each belongs to.

use std::path::Path;

use anyhow::{Context, Result};
use orch_core::OrchestrationConfig;
use orch_git::{WorktreeEntry, WorktreeManager};
use orch_state::StateStore;

use crate::paths::Layout;

/// One listed worktree, annotated with the task it belongs to and that
/// task's current status, when known.
#[derive(Debug, Clone)]
pub struct WorktreeRow {
    /// The underlying `git worktree` entry.
    pub entry: WorktreeEntry,
    /// Task id this worktree's branch belongs to, if it follows the
    /// `task/<id>` naming convention.
    pub task_id: Option<String>,
    /// That task's recorded status, if the orchestration state has one.
    pub status: Option<orch_state::TaskStatus>,
}

/// List every worktree under the configured worktree directory.
/// `include_base` additionally includes the entry for the main checkout
/// itself (normally filtered out, since it is never a task worktree).
///
/// # Errors
///
/// [`anyhow::Error`] if `git worktree list` fails.
pub async fn run(root: &Path, config: OrchestrationConfig, include_base: bool) -> Result<Vec<WorktreeRow>> {
    let layout = Layout::new(root);
    let manager = WorktreeManager::new(root, &config.orchestration.worktree_dir);
    let entries = manager.list().context("failed to list worktrees")?;

    let store = StateStore::new(layout.state_file());
    let state = store.load().await.ok();

    let rows = entries
        .into_iter()
        .filter(|e| include_base || e.path.as_path() != root)
        .map(|entry| {
            let task_id = entry
                .branch
                .as_deref()
                .and_then(|b| b.strip_prefix("refs/heads/task/").or_else(|| b.strip_prefix("task/")))
                .map(str::to_string);
            let status = task_id
                .as_deref()
                .and_then(|id| state.as_ref().and_then(|s| s.tasks.get(id)))
                .map(|r| r.status);
            WorktreeRow { entry, task_id, status }
        })
        .collect();

    Ok(rows)
}
