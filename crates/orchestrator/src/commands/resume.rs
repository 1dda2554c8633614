//! `orchestrator resume`: reconcile an interrupted orchestration and
//! continue it (spec.md 4.12's resume path, 4.5's effective-status rule).

use std::path::Path;

use anyhow::{Context, Result};
use orch_core::OrchestrationConfig;
use orch_state::TaskStatus;

use crate::engine::{Engine, RunReport};

/// What `resume` is about to do, or did.
pub enum ResumeOutcome {
    /// `--dry-run`: the ids of tasks that would be reset to `pending`.
    WouldReconcile(Vec<String>),
    /// The orchestration actually ran to completion or the next blocker.
    Ran(RunReport),
}

/// Reconcile every `executing` task (kill its session, recover its
/// worktree, reset it to `pending`) then continue running the persisted
/// plan, unless `dry_run` is set, in which case nothing is mutated and
/// only the affected task ids are reported.
///
/// # Errors
///
/// [`anyhow::Error`] if no plan/state was persisted to resume, or on any
/// state/git/session failure during reconciliation or the run itself.
pub async fn run(root: &Path, config: OrchestrationConfig, force: bool, dry_run: bool) -> Result<ResumeOutcome> {
    let engine = Engine::new(root, config)?;

    if dry_run {
        let state = engine.state_store().load().await.context("failed to read orchestration state")?;
        let affected = state
            .tasks
            .iter()
            .filter(|(_, r)| r.status == TaskStatus::Executing)
            .map(|(id, _)| id.clone())
            .collect();
        return Ok(ResumeOutcome::WouldReconcile(affected));
    }

    engine.resume(force).await.map(ResumeOutcome::Ran)
}
