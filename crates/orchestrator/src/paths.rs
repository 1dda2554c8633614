//! The fixed layout of `<root>/.orchestrator/` and its sibling files,
//! shared by every command so path construction lives in one place.

use std::path::{Path, PathBuf};

/// All filesystem locations one orchestration run touches, rooted at the
/// repository checkout.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    /// `root` is the main repository checkout (the directory containing
    /// `.git` and, conventionally, `.claude-agents.yaml`).
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The repository root itself.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/.orchestrator`.
    #[must_use]
    pub fn orchestrator_dir(&self) -> PathBuf {
        self.root.join(".orchestrator")
    }

    /// `<root>/.orchestration-state.json`.
    #[must_use]
    pub fn state_file(&self) -> PathBuf {
        self.root.join(".orchestration-state.json")
    }

    /// `<root>/.orchestrator/signals`.
    #[must_use]
    pub fn signals_dir(&self) -> PathBuf {
        self.orchestrator_dir().join("signals")
    }

    /// `<root>/.orchestrator/mailbox`.
    #[must_use]
    pub fn mailbox_dir(&self) -> PathBuf {
        self.orchestrator_dir().join("mailbox")
    }

    /// `<root>/.orchestrator/logs`.
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.orchestrator_dir().join("logs")
    }

    /// `<root>/.orchestrator/staging.lock`.
    #[must_use]
    pub fn staging_lock_file(&self) -> PathBuf {
        self.orchestrator_dir().join("staging.lock")
    }

    /// `<root>/.claude-agents.yaml`.
    #[must_use]
    pub fn config_file(&self) -> PathBuf {
        self.root.join(".claude-agents.yaml")
    }

    /// `<worktree_dir>/<id>/.task-status.json`, the per-task status file
    /// a worker writes for its own transitions (spec.md 6).
    #[must_use]
    pub fn task_status_file(&self, worktree: &Path) -> PathBuf {
        worktree.join(".task-status.json")
    }

    /// `<root>/.orchestrator/prompts`, where prompt files handed to a
    /// spawned agent's stdin are written before the session starts.
    #[must_use]
    pub fn prompts_dir(&self) -> PathBuf {
        self.orchestrator_dir().join("prompts")
    }

    /// `<root>/.orchestrator/plan.json`, the parsed [`orch_core::Plan`]
    /// persisted at Stage 0.5 so the verifier, merge, and resume paths
    /// never need to re-parse the original plan file.
    #[must_use]
    pub fn plan_file(&self) -> PathBuf {
        self.orchestrator_dir().join("plan.json")
    }

    /// `<root>/.orchestrator/approval` — presence of this file is the
    /// human-gated approval token required before Stage 0.5 runs when the
    /// risk scorer's verdict is not `auto_approve` (spec.md 4.12 phase 2).
    #[must_use]
    pub fn approval_file(&self) -> PathBuf {
        self.orchestrator_dir().join("approval")
    }
}
