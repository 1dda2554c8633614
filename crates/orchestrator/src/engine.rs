//! The Orchestration Loop (C12): plan -> risk gate -> Stage 0.5 -> wave
//! execution -> verify -> merge -> stabilization gate (spec.md 4.12).
//!
//! Owns every long-lived handle a run needs (state store, worktree
//! manager, session supervisor, signal/mailbox IPC) and drives one task
//! at a time through [`run_task`], with waves of tasks running
//! concurrently up to `orchestration.max_parallel_workers`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use orch_core::plan::Intent;
use orch_core::{OrchestrationConfig, Plan, Task, TaskId};
use orch_git::WorktreeManager;
use orch_integrator::adapter::GenericAdapter;
use orch_session::{MonitorAction, MonitorInputs, Role, SessionSupervisor};
use orch_state::{LockOptions, Mailbox, OrchestrationState, SignalDir, SignalKind, StateStore, TaskStatus};
use orch_verify::VerificationContext;
use serde_json::json;
use tracing::{info, warn};

use crate::paths::Layout;
use crate::spawn::{spawn_agent, SpawnOutcome};
use crate::task_status;

/// How a single task's run through the loop ended.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    /// Merged into the base branch.
    Merged {
        /// The merge commit hash.
        commit: String,
    },
    /// Exhausted its retry budget (or hit a non-retryable failure).
    Failed {
        /// Human-readable reason.
        reason: String,
    },
    /// The worker reported it needs an external dependency a human must
    /// install (spec.md 4.7 `needs_dependency`). Terminal for this run.
    Blocked {
        /// The worker's own explanation, if it gave one.
        reason: String,
    },
    /// Never ran because a dependency permanently failed first.
    SkippedDependencyFailed {
        /// The dependency that failed.
        depends_on: String,
    },
}

/// Summary returned after a plan finishes running (successfully,
/// partially, or blocked).
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Per-task outcome, in completion order.
    pub outcomes: Vec<(String, TaskOutcome)>,
}

impl RunReport {
    /// Whether every task merged.
    #[must_use]
    pub fn all_merged(&self) -> bool {
        self.outcomes.iter().all(|(_, o)| matches!(o, TaskOutcome::Merged { .. }))
    }

    /// The first blocked task's reason, if any task was blocked.
    #[must_use]
    pub fn blocked(&self) -> Option<(&str, &str)> {
        self.outcomes.iter().find_map(|(id, o)| match o {
            TaskOutcome::Blocked { reason } => Some((id.as_str(), reason.as_str())),
            _ => None,
        })
    }
}

/// Everything one orchestration run needs, bound to a single repository
/// checkout.
pub struct Engine {
    repo_root: PathBuf,
    layout: Layout,
    config: OrchestrationConfig,
    state: StateStore,
    worktrees: WorktreeManager,
    signals: SignalDir,
    mailbox: Mailbox,
    sessions: SessionSupervisor,
}

impl Engine {
    /// Build an engine rooted at `repo_root`, resolving the agent
    /// launcher binary once up front so every spawned session uses the
    /// same absolute path (spec.md 4.7: never rely on the session's own
    /// ambient `PATH` to find it).
    ///
    /// # Errors
    ///
    /// [`anyhow::Error`] if no launcher binary can be resolved from
    /// `ORCHESTRATOR_LAUNCHER` or `claude` on `PATH`.
    pub fn new(repo_root: impl Into<PathBuf>, config: OrchestrationConfig) -> Result<Self> {
        let repo_root = repo_root.into();
        let layout = Layout::new(&repo_root);

        let launcher = std::env::var("ORCHESTRATOR_LAUNCHER")
            .ok()
            .and_then(|name| which::which(name).ok())
            .or_else(|| which::which("claude").ok())
            .ok_or_else(|| anyhow!("no agent launcher found (set ORCHESTRATOR_LAUNCHER or install `claude` on PATH)"))?;

        let heap_size_mb = std::env::var("ORCHESTRATOR_AGENT_HEAP_MB").ok().and_then(|v| v.parse().ok());

        let state = StateStore::new(layout.state_file());
        let worktrees = WorktreeManager::new(&repo_root, &config.orchestration.worktree_dir);
        let signals = SignalDir::new(&repo_root);
        let mailbox = Mailbox::new(&repo_root);
        let sessions = SessionSupervisor::new(launcher, heap_size_mb);

        Ok(Self { repo_root, layout, config, state, worktrees, signals, mailbox, sessions })
    }

    /// Read-only access to the layout (commands that only inspect state
    /// reuse this rather than duplicating path logic).
    #[must_use]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    #[must_use]
    pub fn state_store(&self) -> &StateStore {
        &self.state
    }

    #[must_use]
    pub fn worktree_manager(&self) -> &WorktreeManager {
        &self.worktrees
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionSupervisor {
        &self.sessions
    }

    /// Run the planner agent against `request` and return the resulting
    /// plan, or parse `plan_file` directly when given (the supported way
    /// to skip the planner entirely, since planner prompting itself is
    /// out of scope here — see spec.md 1's non-goals).
    ///
    /// # Errors
    ///
    /// [`anyhow::Error`] if the planner never produces a parseable plan,
    /// or if `plan_file` can't be read/parsed.
    pub async fn obtain_plan(&self, request: &str, plan_file: Option<&Path>) -> Result<Plan> {
        if let Some(path) = plan_file {
            let source = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read plan file {}", path.display()))?;
            let format = match path.extension().and_then(|e| e.to_str()) {
                Some("json") => orch_core::PlanFormat::Json,
                _ => orch_core::PlanFormat::Yaml,
            };
            return Plan::parse(&source, format).map_err(|e| anyhow!("{e}"));
        }

        let prompt = render_planner_prompt(request);
        let id = TaskId::new("planner").unwrap_or_else(|e| unreachable!("literal id always valid: {e}"));
        let outcome =
            spawn_agent(&self.sessions, &id, Role::Planner, &self.repo_root, &self.layout.prompts_dir(), &prompt)
                .await?;
        let session = match &outcome {
            SpawnOutcome::Started { session } | SpawnOutcome::Starting { session } | SpawnOutcome::Failed { session, .. } => {
                session.clone()
            }
        };
        if let SpawnOutcome::Failed { reason, .. } = &outcome {
            self.sessions.kill(&session).ok();
            return Err(anyhow!("planner session failed to start: {reason}"));
        }

        let deadline = Instant::now() + Duration::from_secs(self.config.orchestration.task_timeout_secs);
        let plan_path = self.layout.orchestrator_dir().join("tasks.yaml");
        loop {
            if self.signals.is_present("planner", SignalKind::Done).await {
                break;
            }
            if Instant::now() >= deadline {
                self.sessions.kill(&session).ok();
                return Err(anyhow!("planner timed out after {}s without producing {}", self.config.orchestration.task_timeout_secs, plan_path.display()));
            }
            if !self.sessions.exists(&session) {
                return Err(anyhow!("planner session terminated before signaling completion"));
            }
            tokio::time::sleep(Duration::from_secs(self.config.orchestration.poll_interval_secs.min(5))).await;
        }
        self.sessions.kill(&session).ok();

        let source = tokio::fs::read_to_string(&plan_path)
            .await
            .with_context(|| format!("planner signaled done but {} is missing", plan_path.display()))?;
        Plan::parse(&source, orch_core::PlanFormat::Yaml).map_err(|e| anyhow!("{e}"))
    }

    /// Stage 0.5 (spec.md 4.12): install declared dependencies and
    /// compute the environment fingerprint, persisting it into the
    /// orchestration state.
    ///
    /// # Errors
    ///
    /// [`anyhow::Error`] if a dependency install command fails, or the
    /// environment hash can't be computed/persisted.
    pub async fn stage_environment(&self, plan: &Plan) -> Result<()> {
        self.ensure_state_initialized(plan).await?;
        install_declared_dependencies(&self.repo_root, plan, &self.config)?;

        let record = orch_state::envhash::compute(&self.repo_root, &self.config.lockfile_names())
            .await
            .context("failed to compute environment hash")?;
        self.state.update(|s| { s.environment = record.clone(); Ok(()) }).await?;
        Ok(())
    }

    /// Create the state document for `plan` if it doesn't already exist
    /// (fresh run). A no-op on resume.
    ///
    /// # Errors
    ///
    /// [`anyhow::Error`] on any I/O or lock failure.
    pub async fn ensure_state_initialized(&self, plan: &Plan) -> Result<()> {
        let now = Utc::now();
        let mut initial = OrchestrationState::new(uuid::Uuid::new_v4().to_string(), plan.request.clone(), now);
        for task in &plan.tasks {
            initial.tasks.insert(task.id.as_str().to_string(), orch_state::TaskRecord::new(now));
        }
        self.state.init_if_absent(initial).await.map_err(anyhow::Error::from)
    }

    /// Run every wave of `plan` to completion (or until a task blocks or
    /// permanently fails, cascading failure to its dependents), then run
    /// the stabilization gate if every task merged.
    ///
    /// # Errors
    ///
    /// [`anyhow::Error`] on any unrecoverable I/O, lock, or subprocess
    /// failure. Task-level failures are reported in the returned
    /// [`RunReport`], not as an `Err`.
    pub async fn run(&self, plan: &Plan) -> Result<RunReport> {
        let waves = orch_core::dag::waves(&plan.tasks).map_err(|e| anyhow!("{e}"))?;
        let lockfile_regexes = self.config.lockfile_regexes();
        let mut report = RunReport::default();
        let mut permanently_failed: std::collections::HashSet<String> = std::collections::HashSet::new();
        let mut blocked = false;

        for wave in waves {
            if blocked {
                break;
            }
            let runnable: Vec<&Task> = wave
                .iter()
                .filter_map(|id| plan.task(id))
                .collect();

            let mut to_run = Vec::new();
            for task in runnable {
                let state_now = self.state.load().await?;
                if matches!(state_now.tasks.get(task.id.as_str()).map(|r| r.status), Some(TaskStatus::Merged)) {
                    continue;
                }
                let failed_dep = task.depends_on.iter().find(|d| permanently_failed.contains(*d));
                if let Some(dep) = failed_dep {
                    report.outcomes.push((
                        task.id.as_str().to_string(),
                        TaskOutcome::SkippedDependencyFailed { depends_on: dep.clone() },
                    ));
                    permanently_failed.insert(task.id.as_str().to_string());
                    continue;
                }
                to_run.push(task);
            }

            if to_run.is_empty() {
                continue;
            }

            let max_parallel = self.config.orchestration.max_parallel_workers.max(1);
            for chunk in to_run.chunks(max_parallel) {
                let task_futures = chunk.iter().map(|task| self.run_task(task, plan, &lockfile_regexes));
                let outcomes = futures::future::join_all(task_futures).await;
                for (task, outcome) in chunk.iter().zip(outcomes) {
                    let outcome = outcome?;
                    if matches!(outcome, TaskOutcome::Failed { .. }) {
                        permanently_failed.insert(task.id.as_str().to_string());
                    }
                    if matches!(outcome, TaskOutcome::Blocked { .. }) {
                        blocked = true;
                    }
                    report.outcomes.push((task.id.as_str().to_string(), outcome));
                }
                if blocked {
                    break;
                }
            }
        }

        if report.all_merged() && self.config.quality.stabilization_gate {
            self.run_stabilization_gate()?;
        }

        Ok(report)
    }

    /// Post-merge barrier: every command in `quality.post_merge_checks`
    /// and every required `quality.barrier_checks` entry, in order.
    ///
    /// # Errors
    ///
    /// [`anyhow::Error`] if any required check exits non-zero.
    fn run_stabilization_gate(&self) -> Result<()> {
        for command in &self.config.quality.post_merge_checks {
            run_gate_command(&self.repo_root, command)?;
        }
        for check in &self.config.quality.barrier_checks {
            let result = run_gate_command(&self.repo_root, &check.command);
            if check.required {
                result.with_context(|| format!("barrier check {:?} failed", check.name))?;
            }
        }
        Ok(())
    }

    /// Resume an interrupted orchestration: reconcile every task still
    /// `executing` (kill any lingering session, run recovery cleanup on
    /// its worktree, reset it to `pending`), then continue the wave loop
    /// from wherever it left off (spec.md 4.12's resume path).
    ///
    /// # Errors
    ///
    /// [`anyhow::Error`] on a missing plan file or any state/git/session
    /// failure during reconciliation.
    pub async fn resume(&self, force: bool) -> Result<RunReport> {
        let plan_path = self.layout.plan_file();
        let source = tokio::fs::read_to_string(&plan_path)
            .await
            .with_context(|| format!("no plan to resume at {}", plan_path.display()))?;
        let plan: Plan = serde_json::from_str(&source).context("failed to parse persisted plan.json")?;

        let state = self.state.load().await?;
        for (id, record) in &state.tasks {
            if record.status != TaskStatus::Executing {
                continue;
            }
            let task_id = TaskId::new(id.clone())?;
            for role in [Role::Worker, Role::Verifier] {
                let session = role.session_name(&task_id);
                if self.sessions.exists(&session) {
                    self.sessions.kill(&session).ok();
                }
            }
            if self.worktrees.cleanup_incomplete(&task_id, force).is_err() {
                warn!(task = %id, "recovery cleanup of interrupted worktree failed, continuing anyway");
            }
            self.state.transition(id, TaskStatus::Pending, BTreeMap::new()).await?;
        }

        self.run(&plan).await
    }

    /// Abort the current orchestration: kill every live worker/verifier
    /// session for a task still `executing`, run recovery cleanup on its
    /// worktree, and mark it `failed`. Does not touch `merged` tasks.
    ///
    /// # Errors
    ///
    /// [`anyhow::Error`] on any state/git/session failure.
    pub async fn abort(&self, force: bool) -> Result<Vec<String>> {
        let state = self.state.load().await?;
        let mut aborted = Vec::new();
        for (id, record) in &state.tasks {
            if !matches!(record.status, TaskStatus::Executing | TaskStatus::Completed) {
                continue;
            }
            let task_id = TaskId::new(id.clone())?;
            for role in [Role::Worker, Role::Verifier] {
                let session = role.session_name(&task_id);
                if self.sessions.exists(&session) {
                    self.sessions.kill(&session).ok();
                }
            }
            self.worktrees.cleanup_incomplete(&task_id, force).ok();
            self.state
                .transition(id, TaskStatus::Failed, BTreeMap::from([("abort_reason".to_string(), json!("aborted by operator"))]))
                .await?;
            aborted.push(id.clone());
        }
        Ok(aborted)
    }

    /// Run one task through worker -> verify -> merge, retrying within
    /// its attempt budget where spec.md 7's "requeue automatically?"
    /// column says yes.
    async fn run_task(&self, task: &Task, plan: &Plan, lockfile_regexes: &[regex::Regex]) -> Result<TaskOutcome> {
        loop {
            let worktree = self.ensure_worktree(task).await?;
            self.state.transition(task.id.as_str(), TaskStatus::Executing, BTreeMap::new()).await?;

            let prompt = render_worker_prompt(task, plan);
            let spawn_result =
                spawn_agent(&self.sessions, &task.id, Role::Worker, &worktree, &self.layout.prompts_dir(), &prompt)
                    .await?;

            let session = match &spawn_result {
                SpawnOutcome::Started { session }
                | SpawnOutcome::Starting { session }
                | SpawnOutcome::Failed { session, .. } => session.clone(),
            };

            if let SpawnOutcome::Failed { reason, .. } = &spawn_result {
                self.sessions.save_failure_log(&session, &self.layout.logs_dir()).ok();
                self.sessions.kill(&session).ok();
                if let Some(outcome) = self.fail_or_requeue(task, &format!("worker failed to start: {reason}")).await? {
                    return Ok(outcome);
                }
                continue;
            }

            match self.monitor_worker(task, &worktree, &session).await? {
                MonitorOutcome::Completed => {}
                MonitorOutcome::Blocked(reason) => return Ok(TaskOutcome::Blocked { reason }),
                MonitorOutcome::Failed(reason) => {
                    self.sessions.save_failure_log(&session, &self.layout.logs_dir()).ok();
                    self.sessions.kill(&session).ok();
                    if let Some(outcome) = self.fail_or_requeue(task, &reason).await? {
                        return Ok(outcome);
                    }
                    continue;
                }
            }

            self.state.transition(task.id.as_str(), TaskStatus::Completed, BTreeMap::new()).await?;
            self.record_worker_status(task, &worktree).await?;

            match self.verify_and_merge(task, plan, &worktree, lockfile_regexes).await? {
                VerifyOutcome::Merged { commit } => {
                    self.worktrees.delete(&task.id, false).ok();
                    return Ok(TaskOutcome::Merged { commit });
                }
                VerifyOutcome::Failed { reason, retryable } => {
                    if retryable {
                        if let Some(outcome) = self.fail_or_requeue(task, &reason).await? {
                            return Ok(outcome);
                        }
                        self.worktrees.cleanup_incomplete(&task.id, true).ok();
                        continue;
                    }
                    self.state
                        .transition(task.id.as_str(), TaskStatus::Failed, BTreeMap::from([("error".to_string(), json!(reason.clone()))]))
                        .await?;
                    return Ok(TaskOutcome::Failed { reason });
                }
            }
        }
    }

    async fn ensure_worktree(&self, task: &Task) -> Result<PathBuf> {
        let state = self.state.load().await?;
        if let Some(path) = state.tasks.get(task.id.as_str()).and_then(|r| r.worktree.clone()) {
            if path.exists() {
                return Ok(path);
            }
        }
        // A retried task may still have its branch around from a prior
        // attempt (cleanup_incomplete keeps it on purpose); `create`
        // always makes a fresh branch, so drop the stale one first.
        run_git(&self.repo_root, &["branch", "-D", &task.id.branch_name()]).ok();
        let path = self.worktrees.create(&task.id, &self.config.orchestration.base_branch)?;
        let path_for_closure = path.clone();
        self.state
            .update(|s| {
                if let Some(record) = s.tasks.get_mut(task.id.as_str()) {
                    record.worktree = Some(path_for_closure.clone());
                }
                Ok(())
            })
            .await?;
        Ok(path)
    }

    /// Record a `Failed` transition and decide whether the task may retry.
    /// Returns `Some(outcome)` when the budget is exhausted (caller should
    /// return it), `None` when a `Pending` requeue happened and the
    /// caller's loop should try again.
    async fn fail_or_requeue(&self, task: &Task, reason: &str) -> Result<Option<TaskOutcome>> {
        self.state
            .transition(task.id.as_str(), TaskStatus::Failed, BTreeMap::from([("error".to_string(), json!(reason))]))
            .await?;
        let state = self.state.load().await?;
        let attempt = state.tasks.get(task.id.as_str()).map_or(0, |r| r.attempt);
        if attempt >= self.config.orchestration.max_iterations {
            return Ok(Some(TaskOutcome::Failed { reason: reason.to_string() }));
        }
        self.state.transition(task.id.as_str(), TaskStatus::Pending, BTreeMap::new()).await?;
        info!(task = %task.id, attempt = attempt + 1, "requeued after failure");
        Ok(None)
    }

    async fn record_worker_status(&self, task: &Task, worktree: &Path) -> Result<()> {
        let Some(worker_status) = task_status::read(worktree) else { return Ok(()) };
        self.state
            .update(|s| {
                if let Some(record) = s.tasks.get_mut(task.id.as_str()) {
                    record.environment = worker_status.environment.clone();
                    record.contracts_used = worker_status.contracts_used.clone();
                }
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn monitor_worker(&self, task: &Task, worktree: &Path, session: &str) -> Result<MonitorOutcome> {
        let start = Instant::now();
        let task_timeout = Duration::from_secs(self.config.orchestration.task_timeout_secs);
        let poll_interval = Duration::from_secs(self.config.orchestration.poll_interval_secs.max(1));

        loop {
            let done = self.signals.is_present(task.id.as_str(), SignalKind::Done).await;
            let worker_status = task_status::read(worktree);
            let blocked = worker_status.as_ref().is_some_and(|w| w.blocked);
            let heartbeat_age = self
                .signals
                .modified_at(task.id.as_str(), SignalKind::Heartbeat)
                .await
                .and_then(|at| (Utc::now() - at).to_std().ok());

            let inputs = MonitorInputs {
                done_signal_present: done,
                blocked,
                heartbeat_age,
                elapsed_since_start: start.elapsed(),
                session_exists: self.sessions.exists(session),
                task_timeout,
            };

            match orch_session::evaluate(&inputs) {
                MonitorAction::Completed => return Ok(MonitorOutcome::Completed),
                MonitorAction::NeedsDependency => {
                    let reason = worker_status.and_then(|w| w.blocked_reason).unwrap_or_else(|| "blocked on a missing dependency".to_string());
                    return Ok(MonitorOutcome::Blocked(reason));
                }
                MonitorAction::FailedHung => return Ok(MonitorOutcome::Failed("heartbeat stale; worker appears hung".to_string())),
                MonitorAction::FailedTimeout => return Ok(MonitorOutcome::Failed("task timeout exceeded".to_string())),
                MonitorAction::FailedTerminated => return Ok(MonitorOutcome::Failed("tmux session terminated unexpectedly".to_string())),
                MonitorAction::KeepWaiting => {
                    self.drain_mailbox(task).await;
                    tokio::time::sleep(poll_interval).await;
                }
            }
        }
    }

    async fn drain_mailbox(&self, task: &Task) {
        if let Ok(messages) = self.mailbox.poll_broadcasts(task.id.as_str()).await {
            for message in messages {
                info!(task = %task.id, sender = %message.from, "broadcast received");
            }
        }
    }

    async fn verify_and_merge(
        &self,
        task: &Task,
        plan: &Plan,
        worktree: &Path,
        lockfile_regexes: &[regex::Regex],
    ) -> Result<VerifyOutcome> {
        let state = self.state.load().await?;
        let record = state
            .tasks
            .get(task.id.as_str())
            .ok_or_else(|| anyhow!("task {} vanished from state mid-run", task.id))?;

        let ctx = VerificationContext {
            worktree,
            repo_root: &self.repo_root,
            task,
            base_ref: &self.config.orchestration.base_branch,
            boundaries: &self.config.boundaries,
            lockfile_regexes,
            plan_contracts: &plan.contracts,
            contracts_used: &record.contracts_used,
            task_environment_hash: record.environment.as_deref(),
            state_environment_hash: &state.environment.hash,
            renegotiations_used: state.renegotiations_used,
            max_renegotiations: self.config.contracts.max_renegotiations,
            fail_fast: true,
        };
        let report = orch_verify::run(&ctx).context("verification pipeline failed to run")?;
        self.signals
            .emit(task.id.as_str(), SignalKind::Verified, &Utc::now().to_rfc3339())
            .await
            .ok();

        if !report.boundary_violations.is_empty() {
            let reason = format!("boundary violations: {:?}", report.boundary_violations);
            return Ok(VerifyOutcome::Failed { reason, retryable: false });
        }
        if !report.contract_violations.is_empty() {
            use orch_verify::ContractViolation;
            let exhausted =
                report.contract_violations.iter().any(|v| matches!(v, ContractViolation::RenegotiationBudgetExceeded { .. }));
            let mismatched =
                report.contract_violations.iter().any(|v| matches!(v, ContractViolation::VersionMismatch { .. }));
            if mismatched && !exhausted {
                self.state
                    .update(|s| {
                        s.renegotiations_used += 1;
                        Ok(())
                    })
                    .await?;
            }
            let reason = format!("contract violations: {:?}", report.contract_violations);
            return Ok(VerifyOutcome::Failed { reason, retryable: false });
        }
        if !report.environment_ok {
            return Ok(VerifyOutcome::Failed {
                reason: "task ran against a stale environment hash; resume after reinstalling deps".to_string(),
                retryable: false,
            });
        }
        if let Some(result) = &report.check_result {
            if !result.passed {
                let reason = result.failed_at.clone().unwrap_or_else(|| "a required check failed".to_string());
                self.state
                    .update(|s| {
                        if let Some(record) = s.tasks.get_mut(task.id.as_str()) {
                            record.verification_result = Some(orch_state::VerificationResult {
                                passed: false,
                                failed_at: result.failed_at.clone(),
                                check_exit_codes: result.outcomes.iter().filter_map(|o| o.exit_code).collect(),
                            });
                        }
                        Ok(())
                    })
                    .await?;
                return Ok(VerifyOutcome::Failed { reason, retryable: true });
            }
        }

        self.state
            .update(|s| {
                if let Some(record) = s.tasks.get_mut(task.id.as_str()) {
                    record.verification_result = Some(orch_state::VerificationResult {
                        passed: true,
                        failed_at: None,
                        check_exit_codes: report
                            .check_result
                            .as_ref()
                            .map(|r| r.outcomes.iter().filter_map(|o| o.exit_code).collect())
                            .unwrap_or_default(),
                    });
                }
                Ok(())
            })
            .await?;
        self.state.transition(task.id.as_str(), TaskStatus::Verified, BTreeMap::new()).await?;

        match self.merge_task(task).await {
            Ok(commit) => {
                self.state
                    .transition(
                        task.id.as_str(),
                        TaskStatus::Merged,
                        BTreeMap::from([("merge_commit".to_string(), json!(commit.clone()))]),
                    )
                    .await?;
                self.state
                    .update(|s| {
                        if let Some(record) = s.tasks.get_mut(task.id.as_str()) {
                            record.merge_commit = Some(commit.clone());
                        }
                        Ok(())
                    })
                    .await?;
                Ok(VerifyOutcome::Merged { commit })
            }
            Err(e) => Ok(VerifyOutcome::Failed { reason: format!("merge failed: {e}"), retryable: true }),
        }
    }

    /// Merge `task`'s branch into the base branch under the staging
    /// lock, then apply any hot-file patch intents directly against the
    /// base branch's working tree and commit them separately (spec.md
    /// 4.10: hot files are never merged via a task's own worktree diff).
    ///
    /// # Errors
    ///
    /// Any [`orch_git::GitError`] from the merge itself, or
    /// [`orch_integrator::IntegratorError`] from applying patch intents.
    async fn merge_task(&self, task: &Task) -> Result<String> {
        let _lock = orch_state::acquire_lock(&self.layout.staging_lock_file(), LockOptions::default())
            .await
            .map_err(anyhow::Error::from)?;

        let commit = self.worktrees.merge(&task.id, &self.config.orchestration.base_branch)?;

        if self.config.patch_intents.enabled && !task.patch_intents.is_empty() {
            self.apply_patch_intents(task)?;
        }

        Ok(commit)
    }

    /// Apply `task`'s patch intents against the hot files they target,
    /// grouped by file, and commit the result. Only [`GenericAdapter`] is
    /// wired in by default (no framework-specific adapter ships with
    /// this crate) — see DESIGN.md.
    fn apply_patch_intents(&self, task: &Task) -> Result<()> {
        let adapter = GenericAdapter;
        let mut by_file: BTreeMap<&str, Vec<Intent>> = BTreeMap::new();
        for intent in &task.patch_intents {
            by_file.entry(intent.file.as_str()).or_default().push(intent.clone());
        }

        let mut touched = false;
        for (file, intents) in by_file {
            let path = self.repo_root.join(file);
            let content = std::fs::read_to_string(&path).unwrap_or_default();
            let updated = orch_integrator::apply_intents(&content, &intents, &adapter)?;
            if updated != content {
                std::fs::write(&path, updated).with_context(|| format!("failed to write {}", path.display()))?;
                touched = true;
            }
        }

        if touched {
            run_git(&self.repo_root, &["add", "-A"])?;
            run_git(&self.repo_root, &["commit", "-m", &format!("integrator: apply intents for task {}", task.id)])?;
        }
        Ok(())
    }
}

enum MonitorOutcome {
    Completed,
    Blocked(String),
    Failed(String),
}

enum VerifyOutcome {
    Merged { commit: String },
    Failed { reason: String, retryable: bool },
}

fn run_git(cwd: &Path, args: &[&str]) -> Result<()> {
    let output = std::process::Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .with_context(|| format!("failed to run git {}", args.join(" ")))?;
    if !output.status.success() {
        return Err(anyhow!("git {} failed: {}", args.join(" "), String::from_utf8_lossy(&output.stderr)));
    }
    Ok(())
}

fn run_gate_command(cwd: &Path, command: &str) -> Result<()> {
    let output = std::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .output()
        .with_context(|| format!("failed to run gate command `{command}`"))?;
    if !output.status.success() {
        return Err(anyhow!(
            "gate command `{command}` failed (exit {:?}): {}",
            output.status.code(),
            String::from_utf8_lossy(&output.stderr)
        ));
    }
    Ok(())
}

/// Install every ecosystem's runtime/dev dependencies a task declared via
/// `deps_required`, using the manager binary configured for that
/// ecosystem (spec.md 4.12 Stage 0.5). Supervisor-only: workers never
/// install their own dependencies unless `dependencies.allow_worker_installs`
/// is set, which this function does not consult — it always runs as the
/// supervisor.
fn install_declared_dependencies(repo_root: &Path, plan: &Plan, config: &OrchestrationConfig) -> Result<()> {
    let any_deps = plan.tasks.iter().any(|t| t.deps_required.is_some());
    if !any_deps || config.dependencies.ecosystems.is_empty() {
        return Ok(());
    }
    for eco in config.dependencies.ecosystems.values() {
        if which::which(&eco.manager).is_err() {
            warn!(manager = %eco.manager, "declared ecosystem manager not found on PATH, skipping install");
            continue;
        }
        let output = std::process::Command::new(&eco.manager)
            .arg("install")
            .current_dir(repo_root)
            .output()
            .with_context(|| format!("failed to run {} install", eco.manager))?;
        if !output.status.success() {
            return Err(anyhow!(
                "{} install failed: {}",
                eco.manager,
                String::from_utf8_lossy(&output.stderr)
            ));
        }
    }
    Ok(())
}

fn render_worker_prompt(task: &Task, plan: &Plan) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!("You are implementing task `{}` from the plan: {}\n\n", task.id, plan.request));
    prompt.push_str(&format!("Description: {}\n\n", task.description));
    if !task.files_write.is_empty() {
        prompt.push_str(&format!("You may write: {}\n", task.files_write.join(", ")));
    }
    if !task.files_read.is_empty() {
        prompt.push_str(&format!("You may read (but not modify): {}\n", task.files_read.join(", ")));
    }
    if !task.verification.is_empty() {
        let commands: Vec<&str> = task.verification.iter().map(|c| c.command.as_str()).collect();
        prompt.push_str(&format!("\nYour work must pass: {}\n", commands.join("; ")));
    }
    prompt.push_str(
        "\nWhen finished, write your status to `.task-status.json` in this worktree and signal completion \
         through the orchestrator's done-signal protocol.\n",
    );
    prompt
}

fn render_planner_prompt(request: &str) -> String {
    format!(
        "Produce a task plan for the following request, written to `.orchestrator/tasks.yaml` in this \
         repository's root, then signal completion through the orchestrator's done-signal protocol.\n\n\
         Request: {request}\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_report_all_merged_is_true_when_empty() {
        let report = RunReport::default();
        assert!(report.all_merged());
    }

    #[test]
    fn run_report_detects_blocked_task() {
        let report = RunReport {
            outcomes: vec![("a".to_string(), TaskOutcome::Blocked { reason: "needs redis".to_string() })],
        };
        assert_eq!(report.blocked(), Some(("a", "needs redis")));
        assert!(!report.all_merged());
    }

    #[test]
    fn render_worker_prompt_includes_task_id_and_checks() {
        let task = Task {
            id: TaskId::new("add-healthcheck").unwrap_or_else(|e| panic!("{e}")),
            description: "Add a /healthz route".to_string(),
            files_write: vec!["src/health.py".to_string()],
            files_read: vec![],
            files_append: vec![],
            resources_write: vec![],
            resources_read: vec![],
            depends_on: Default::default(),
            verification: vec![orch_core::Check {
                command: "pytest tests/test_health.py".to_string(),
                check_type: orch_core::CheckType::Test,
                required: true,
                timeout: None,
            }],
            patch_intents: vec![],
            deps_required: None,
            allow_large_changes: false,
        };
        let plan = Plan { request: "add a health check endpoint".to_string(), tasks: vec![task.clone()], contracts: vec![] };
        let prompt = render_worker_prompt(&task, &plan);
        assert!(prompt.contains("add-healthcheck"));
        assert!(prompt.contains("pytest tests/test_health.py"));
    }
}
