//! `orchestrator cleanup [--force]`: prune stale worktrees and signal
//! files left behind by a finished or abandoned orchestration.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use orch_core::OrchestrationConfig;
use orch_git::WorktreeManager;
use orch_state::{SignalDir, StateStore};

use crate::paths::Layout;

/// Default age a signal file must reach before `cleanup` considers it
/// stale, when `--force` isn't given.
const DEFAULT_SIGNAL_MAX_AGE: Duration = Duration::from_secs(3600);

/// What `cleanup` removed.
#[derive(Debug, Clone)]
pub struct CleanupReport {
    /// Worktree directories removed (no longer tracked by `git worktree
    /// list`).
    pub worktrees_removed: usize,
    /// Stale signal files removed.
    pub signals_removed: usize,
}

/// Prune untracked worktree directories and signal files stale relative
/// to the current orchestration's `request_id` (or all of them, if
/// `force` is set or no state exists to compare against).
///
/// # Errors
///
/// [`anyhow::Error`] on any git or filesystem failure.
pub async fn run(root: &Path, config: OrchestrationConfig, force: bool) -> Result<CleanupReport> {
    let layout = Layout::new(root);
    let worktrees = WorktreeManager::new(root, &config.orchestration.worktree_dir);
    let worktrees_removed = worktrees.cleanup_stale().context("failed to prune stale worktrees")?;

    let store = StateStore::new(layout.state_file());
    let current_request_id = store.load().await.map(|s| s.request_id).unwrap_or_default();

    let signals = SignalDir::new(root);
    let max_age = if force { Duration::ZERO } else { DEFAULT_SIGNAL_MAX_AGE };
    let signals_removed = signals
        .cleanup_stale(max_age, &current_request_id)
        .await
        .context("failed to prune stale signal files")?;

    Ok(CleanupReport { worktrees_removed, signals_removed })
}
