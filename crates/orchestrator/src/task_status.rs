//! The worker's own per-task status file (`.task-status.json`, spec.md
//! §3 "Transitions from the worker's own status file ... are
//! *advisory*"), and the effective-status merge rule from spec.md 4.5.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use orch_state::{ContractUsage, TaskStatus};
use serde::{Deserialize, Serialize};

/// What a worker (or verifier) writes about its own task, advisory only —
/// the [`orch_state::StateStore`] remains authoritative. Reconciliation
/// uses this file only to enrich the terminal status report, plus two
/// things the monitor can't observe any other way: `blocked` and the
/// environment hash the worker actually ran against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatus {
    /// The worker's own view of its status.
    pub status: TaskStatus,
    /// Set by a worker that discovered it cannot proceed without an
    /// external dependency a human must install (spec.md 4.7's
    /// `needs_dependency`).
    #[serde(default)]
    pub blocked: bool,
    /// Human-readable reason, present when `blocked` is set.
    #[serde(default)]
    pub blocked_reason: Option<String>,
    /// The environment hash this worker observed when it started, for
    /// the verification pipeline's Step C (spec.md 4.9).
    #[serde(default)]
    pub environment: Option<String>,
    /// Contracts this worker consumed while doing its work.
    #[serde(default)]
    pub contracts_used: BTreeMap<String, ContractUsage>,
    /// When the worker last wrote this file.
    pub updated_at: DateTime<Utc>,
}

/// Read and parse `<worktree>/.task-status.json`. Returns `None` if it
/// doesn't exist or fails to parse — a worker that hasn't written one yet
/// (or wrote a transient partial one) is not a protocol violation, just
/// "nothing advisory to report yet".
#[must_use]
pub fn read(worktree: &Path) -> Option<WorkerStatus> {
    let path = worktree.join(".task-status.json");
    let text = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&text).ok()
}

/// Whether the worker's own status file is newer than `state_updated_at`
/// and parses — the condition under which spec.md 4.5 says to prefer its
/// `status` over the State Store's.
#[must_use]
pub fn is_fresher_than(worktree: &Path, state_updated_at: DateTime<Utc>) -> bool {
    let path = worktree.join(".task-status.json");
    let Ok(meta) = std::fs::metadata(&path) else { return false };
    let Ok(modified) = meta.modified() else { return false };
    let modified_utc: DateTime<Utc> = modified.into();
    modified_utc > state_updated_at
}

/// The effective status for a task (spec.md 4.5): the worker's own status
/// file's `status` if it is newer than the state document's `updated_at`
/// and parses, otherwise the state document's status.
#[must_use]
pub fn effective_status(worktree: Option<&Path>, state_status: TaskStatus, state_updated_at: DateTime<Utc>) -> TaskStatus {
    let Some(worktree) = worktree else { return state_status };
    if !is_fresher_than(worktree, state_updated_at) {
        return state_status;
    }
    read(worktree).map_or(state_status, |w| w.status)
}

/// Age of a file's mtime, `None` if it doesn't exist or the clock is
/// unavailable.
#[must_use]
pub fn file_age(path: &Path) -> Option<std::time::Duration> {
    let meta = std::fs::metadata(path).ok()?;
    let modified = meta.modified().ok()?;
    SystemTime::now().duration_since(modified).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn write_status(dir: &Path, status: TaskStatus, blocked: bool) {
        let body = WorkerStatus {
            status,
            blocked,
            blocked_reason: if blocked { Some("missing redis binary".into()) } else { None },
            environment: Some("abc12345".into()),
            contracts_used: BTreeMap::new(),
            updated_at: Utc::now(),
        };
        std::fs::write(dir.join(".task-status.json"), serde_json::to_vec(&body).unwrap_or_default())
            .unwrap_or_else(|e| panic!("{e}"));
    }

    #[test]
    fn missing_file_returns_none() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        assert!(read(dir.path()).is_none());
    }

    #[test]
    fn reads_back_written_status() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        write_status(dir.path(), TaskStatus::Completed, false);
        let status = read(dir.path()).unwrap_or_else(|| panic!("expected a status"));
        assert_eq!(status.status, TaskStatus::Completed);
        assert!(!status.blocked);
    }

    #[test]
    fn blocked_worker_reports_reason() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        write_status(dir.path(), TaskStatus::Executing, true);
        let status = read(dir.path()).unwrap_or_else(|| panic!("expected a status"));
        assert!(status.blocked);
        assert_eq!(status.blocked_reason.as_deref(), Some("missing redis binary"));
    }

    #[test]
    fn effective_status_prefers_fresher_worker_file() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        write_status(dir.path(), TaskStatus::Completed, false);
        let stale_state_time = Utc::now() - ChronoDuration::seconds(60);
        let effective = effective_status(Some(dir.path()), TaskStatus::Executing, stale_state_time);
        assert_eq!(effective, TaskStatus::Completed);
    }

    #[test]
    fn effective_status_falls_back_when_state_is_newer() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        write_status(dir.path(), TaskStatus::Completed, false);
        let future_state_time = Utc::now() + ChronoDuration::seconds(60);
        let effective = effective_status(Some(dir.path()), TaskStatus::Executing, future_state_time);
        assert_eq!(effective, TaskStatus::Executing);
    }

    #[test]
    fn effective_status_with_no_worktree_uses_state() {
        let effective = effective_status(None, TaskStatus::Merged, Utc::now());
        assert_eq!(effective, TaskStatus::Merged);
    }
}
