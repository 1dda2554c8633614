//! The State Store (C5): the single persisted mutable document tracking an
//! orchestration run, `<root>/.orchestration-state.json`.
//!
//! Every mutation goes through [`StateStore::transition`] or
//! [`StateStore::update`], both of which take the exclusive lock from
//! [`crate::lock`], read the current document, apply the change, and
//! write it back atomically (temp file + fsync + rename).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StateError;
use crate::lock::{self, LockOptions};

/// Maximum attempts a reader makes to parse the state document before
/// giving up — tolerates observing an in-flight writer mid-rename even
/// though the rename itself is atomic (spec.md 4.5).
const READ_RETRY_ATTEMPTS: u32 = 3;

/// Delay between read retries.
const READ_RETRY_DELAY: Duration = Duration::from_millis(20);

/// A task's lifecycle state, enforced by [`StateStore::transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Queued, not yet started.
    Pending,
    /// A worker session is running.
    Executing,
    /// The worker signaled completion; awaiting verification.
    Completed,
    /// The verification pipeline passed.
    Verified,
    /// Merged into the target branch. Terminal.
    Merged,
    /// The task failed; may be retried by transitioning back to `Pending`.
    Failed,
}

impl TaskStatus {
    /// Whether `self -> next` is an allowed transition (spec.md "Task
    /// states" table).
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Executing | Self::Failed)
                | (Self::Executing, Self::Completed | Self::Failed | Self::Pending)
                | (Self::Completed, Self::Verified | Self::Failed)
                | (Self::Verified, Self::Merged | Self::Failed)
                | (Self::Failed, Self::Pending)
        )
    }
}

/// Recorded environment hash and the lockfiles it was computed from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentRecord {
    /// First 8 hex chars of the SHA-256 over every lockfile's bytes, or
    /// `"no-lock"` when none are present.
    pub hash: String,
    /// Lockfile basenames folded into the hash, in the order hashed.
    pub lockfiles: Vec<String>,
    /// When this hash was computed.
    pub recorded_at: Option<DateTime<Utc>>,
}

/// Per-task verification result summary, recorded after the pipeline runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Whether every required check passed.
    pub passed: bool,
    /// The command (if any) that first failed.
    pub failed_at: Option<String>,
    /// Per-check exit codes, in execution order.
    pub check_exit_codes: Vec<i32>,
}

/// A contract a task consumed, with the version/method set it recorded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContractUsage {
    /// The contract version the task built against.
    pub version: String,
    /// Methods the task actually called.
    pub methods_used: Vec<String>,
}

/// Persisted record for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// Absolute path to the task's worktree, once created.
    pub worktree: Option<PathBuf>,
    /// Timestamp of the last update.
    pub updated_at: DateTime<Utc>,
    /// Terminal error description, if any.
    pub error: Option<String>,
    /// Commit hash the task was merged as, once merged.
    pub merge_commit: Option<String>,
    /// Environment hash the worker recorded when it ran.
    pub environment: Option<String>,
    /// Contracts this task consumed, by name.
    pub contracts_used: BTreeMap<String, ContractUsage>,
    /// Most recent verification pipeline result.
    pub verification_result: Option<VerificationResult>,
    /// Retry count for this task (capped by `OrchestrationState.iteration`
    /// at the plan level, but tracked per task for the loop to decide
    /// whether `failed -> pending` is still allowed).
    pub attempt: u32,
    /// Opaque extra fields a caller attached via [`StateStore::transition`]'s
    /// `extra` map.
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
}

impl TaskRecord {
    /// A fresh record in `Pending`.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            status: TaskStatus::Pending,
            worktree: None,
            updated_at: now,
            error: None,
            merge_commit: None,
            environment: None,
            contracts_used: BTreeMap::new(),
            verification_result: None,
            attempt: 0,
            extra: BTreeMap::new(),
        }
    }
}

/// The full persisted orchestration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationState {
    /// Unique id for this orchestration run.
    pub request_id: String,
    /// The original human request the plan was generated from.
    pub original_request: String,
    /// When this orchestration started.
    pub created_at: DateTime<Utc>,
    /// The environment fingerprint, set once at Stage 0.5.
    pub environment: EnvironmentRecord,
    /// Per-task records, keyed by task id.
    pub tasks: BTreeMap<String, TaskRecord>,
    /// Human-readable name of the current loop phase.
    pub current_phase: String,
    /// Retry iteration counter, capped by config (default 3).
    pub iteration: u32,
    /// Contract renegotiations consumed so far this orchestration, capped
    /// by config `contracts.max_renegotiations` (spec.md 4.9/7:
    /// `ContractIncompatible`).
    #[serde(default)]
    pub renegotiations_used: u32,
}

impl OrchestrationState {
    /// A new, empty document for a freshly parsed plan.
    #[must_use]
    pub fn new(request_id: String, original_request: String, now: DateTime<Utc>) -> Self {
        Self {
            request_id,
            original_request,
            created_at: now,
            environment: EnvironmentRecord::default(),
            tasks: BTreeMap::new(),
            current_phase: "planning".to_string(),
            iteration: 0,
            renegotiations_used: 0,
        }
    }
}

/// Handle onto the persisted state document at `path`, with its sibling
/// lock at `<path>.lock`.
pub struct StateStore {
    path: PathBuf,
    lock_path: PathBuf,
    lock_options: LockOptions,
}

impl StateStore {
    /// Open a store rooted at `path` (conventionally
    /// `<root>/.orchestration-state.json`).
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = Self::sibling_lock_path(&path);
        Self { path, lock_path, lock_options: LockOptions::default() }
    }

    fn sibling_lock_path(path: &Path) -> PathBuf {
        let mut name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        name.push_str(".lock");
        path.with_file_name(name)
    }

    /// Override the lock acquisition deadline/poll interval.
    #[must_use]
    pub fn with_lock_options(mut self, options: LockOptions) -> Self {
        self.lock_options = options;
        self
    }

    /// Load the document without taking the lock (for read-only callers
    /// like `status`/`resume` scans that tolerate a benign race with an
    /// in-flight writer).
    ///
    /// # Errors
    ///
    /// [`StateError::Io`] if the file is missing or unreadable, or
    /// [`StateError::Corrupt`] if it fails to parse after
    /// [`READ_RETRY_ATTEMPTS`].
    pub async fn load(&self) -> Result<OrchestrationState, StateError> {
        let mut last_err = None;
        for attempt in 0..READ_RETRY_ATTEMPTS {
            let text = tokio::fs::read_to_string(&self.path)
                .await
                .map_err(|source| StateError::Io { path: self.path.display().to_string(), source })?;
            match serde_json::from_str(&text) {
                Ok(state) => return Ok(state),
                Err(source) => {
                    last_err = Some(source);
                    if attempt + 1 < READ_RETRY_ATTEMPTS {
                        tokio::time::sleep(READ_RETRY_DELAY).await;
                    }
                }
            }
        }
        Err(StateError::Corrupt {
            path: self.path.display().to_string(),
            attempts: READ_RETRY_ATTEMPTS,
            source: last_err.unwrap_or_else(|| serde::de::Error::custom("unreachable: no parse error recorded")),
        })
    }

    /// Atomically persist `state`: write to a sibling temp file, fsync,
    /// then rename over the target.
    async fn write_atomic(&self, state: &OrchestrationState) -> Result<(), StateError> {
        let body = serde_json::to_vec_pretty(state).map_err(|source| StateError::Corrupt {
            path: self.path.display().to_string(),
            attempts: 0,
            source,
        })?;

        let tmp_path = self.path.with_extension("json.tmp");
        let mut file = tokio::fs::File::create(&tmp_path)
            .await
            .map_err(|source| StateError::Io { path: tmp_path.display().to_string(), source })?;
        tokio::io::AsyncWriteExt::write_all(&mut file, &body)
            .await
            .map_err(|source| StateError::Io { path: tmp_path.display().to_string(), source })?;
        file.sync_all()
            .await
            .map_err(|source| StateError::Io { path: tmp_path.display().to_string(), source })?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|source| StateError::Io { path: self.path.display().to_string(), source })?;
        Ok(())
    }

    /// Create the document if it doesn't already exist. No-op (and not an
    /// error) if it does.
    ///
    /// # Errors
    ///
    /// [`StateError::Io`] or [`StateError::LockTimeout`].
    pub async fn init_if_absent(&self, initial: OrchestrationState) -> Result<(), StateError> {
        let _lock = lock::acquire(&self.lock_path, self.lock_options).await?;
        if tokio::fs::metadata(&self.path).await.is_ok() {
            return Ok(());
        }
        self.write_atomic(&initial).await
    }

    /// Read-modify-write `f` over the document under the exclusive lock.
    ///
    /// # Errors
    ///
    /// Propagates lock, I/O, or parse errors, or whatever `f` returns.
    pub async fn update<F>(&self, f: F) -> Result<OrchestrationState, StateError>
    where
        F: FnOnce(&mut OrchestrationState) -> Result<(), StateError>,
    {
        let _lock = lock::acquire(&self.lock_path, self.lock_options).await?;
        let mut state = self.load().await?;
        f(&mut state)?;
        self.write_atomic(&state).await?;
        Ok(state)
    }

    /// Validate and apply `task_id -> new_state`, stamping `updated_at` and
    /// merging `extra` into the record.
    ///
    /// # Errors
    ///
    /// [`StateError::UnknownTask`] if the id isn't present,
    /// [`StateError::InvalidTransition`] if the state machine forbids the
    /// move, or any error from [`Self::update`].
    pub async fn transition(
        &self,
        task_id: &str,
        new_state: TaskStatus,
        extra: BTreeMap<String, Value>,
    ) -> Result<OrchestrationState, StateError> {
        self.update(|state| {
            let record = state
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| StateError::UnknownTask(task_id.to_string()))?;
            if !record.status.can_transition_to(new_state) {
                return Err(StateError::InvalidTransition {
                    task: task_id.to_string(),
                    from: record.status,
                    to: new_state,
                });
            }
            if new_state == TaskStatus::Pending && record.status == TaskStatus::Failed {
                record.attempt += 1;
            }
            record.status = new_state;
            record.updated_at = Utc::now();
            record.extra.extend(extra);
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &tempfile::TempDir) -> StateStore {
        StateStore::new(dir.path().join(".orchestration-state.json"))
    }

    fn seeded(now: DateTime<Utc>) -> OrchestrationState {
        let mut state = OrchestrationState::new("req-1".into(), "add health check".into(), now);
        state.tasks.insert("a".into(), TaskRecord::new(now));
        state
    }

    #[tokio::test]
    async fn init_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let store = store(&dir);
        let now = Utc::now();
        store.init_if_absent(seeded(now)).await.unwrap_or_else(|e| panic!("{e}"));
        let loaded = store.load().await.unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(loaded.request_id, "req-1");
        assert_eq!(loaded.tasks["a"].status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn init_if_absent_is_idempotent() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let store = store(&dir);
        let now = Utc::now();
        store.init_if_absent(seeded(now)).await.unwrap_or_else(|e| panic!("{e}"));
        store
            .transition("a", TaskStatus::Executing, BTreeMap::new())
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        store.init_if_absent(seeded(now)).await.unwrap_or_else(|e| panic!("{e}"));
        let loaded = store.load().await.unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(loaded.tasks["a"].status, TaskStatus::Executing);
    }

    #[tokio::test]
    async fn valid_transition_chain_succeeds() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let store = store(&dir);
        store.init_if_absent(seeded(Utc::now())).await.unwrap_or_else(|e| panic!("{e}"));

        for next in [TaskStatus::Executing, TaskStatus::Completed, TaskStatus::Verified, TaskStatus::Merged] {
            store
                .transition("a", next, BTreeMap::new())
                .await
                .unwrap_or_else(|e| panic!("{e}"));
        }
        let loaded = store.load().await.unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(loaded.tasks["a"].status, TaskStatus::Merged);
    }

    #[tokio::test]
    async fn invalid_transition_is_rejected() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let store = store(&dir);
        store.init_if_absent(seeded(Utc::now())).await.unwrap_or_else(|e| panic!("{e}"));

        let err = store
            .transition("a", TaskStatus::Merged, BTreeMap::new())
            .await
            .expect_err("pending -> merged must be rejected");
        assert!(matches!(err, StateError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn retry_increments_attempt_counter() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let store = store(&dir);
        store.init_if_absent(seeded(Utc::now())).await.unwrap_or_else(|e| panic!("{e}"));

        store.transition("a", TaskStatus::Executing, BTreeMap::new()).await.unwrap_or_else(|e| panic!("{e}"));
        store.transition("a", TaskStatus::Failed, BTreeMap::new()).await.unwrap_or_else(|e| panic!("{e}"));
        let state = store.transition("a", TaskStatus::Pending, BTreeMap::new()).await.unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(state.tasks["a"].attempt, 1);
    }

    #[tokio::test]
    async fn unknown_task_is_rejected() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let store = store(&dir);
        store.init_if_absent(seeded(Utc::now())).await.unwrap_or_else(|e| panic!("{e}"));

        let err = store
            .transition("missing", TaskStatus::Executing, BTreeMap::new())
            .await
            .expect_err("unknown task must be rejected");
        assert!(matches!(err, StateError::UnknownTask(id) if id == "missing"));
    }
}
