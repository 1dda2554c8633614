//! Composes Steps A-D into the full per-task verification pipeline
//! (spec.md 4.9). Boundary violations gate the rest of the pipeline: a
//! task that touched the wrong files doesn't get to spend time running
//! its test suite.

use std::collections::BTreeMap;
use std::path::Path;

use orch_core::config::BoundarySettings;
use orch_core::plan::Contract;
use orch_core::Task;
use orch_state::ContractUsage;
use regex::Regex;

use crate::boundary::{self, BoundaryViolation, FileChangeStats};
use crate::checks::{self, PipelineResult};
use crate::contract::{self, ContractViolation};
use crate::environment;
use crate::error::VerifyError;

/// Everything the pipeline needs to verify one task, gathered by the
/// caller (the orchestration loop) before invoking [`run`].
pub struct VerificationContext<'a> {
    /// The task's checked-out worktree.
    pub worktree: &'a Path,
    /// The main repository root (for contract file lookups).
    pub repo_root: &'a Path,
    /// The task being verified.
    pub task: &'a Task,
    /// The branch/ref the task diffs against (conventionally `main`).
    pub base_ref: &'a str,
    /// Boundary check tuning.
    pub boundaries: &'a BoundarySettings,
    /// Compiled lockfile regexes (only the supervisor may touch these).
    pub lockfile_regexes: &'a [Regex],
    /// The plan's declared contracts.
    pub plan_contracts: &'a [Contract],
    /// Contracts this task recorded using.
    pub contracts_used: &'a BTreeMap<String, ContractUsage>,
    /// This task's recorded environment hash.
    pub task_environment_hash: Option<&'a str>,
    /// The orchestration's current environment hash.
    pub state_environment_hash: &'a str,
    /// Renegotiations already used by this orchestration.
    pub renegotiations_used: u32,
    /// Maximum renegotiations allowed (config `contracts.max_renegotiations`).
    pub max_renegotiations: u32,
    /// Whether to stop at the first failing required check.
    pub fail_fast: bool,
}

/// The full result of verifying one task.
#[derive(Debug, Clone)]
pub struct VerificationReport {
    /// Files the boundary check considered.
    pub modified_files: Vec<String>,
    /// Step A violations. Non-empty means Steps B-D were skipped.
    pub boundary_violations: Vec<BoundaryViolation>,
    /// Step B result, `None` if Step A failed first.
    pub check_result: Option<PipelineResult>,
    /// Step C result.
    pub environment_ok: bool,
    /// Step D violations.
    pub contract_violations: Vec<ContractViolation>,
    /// Whether the task passed verification overall.
    pub passed: bool,
}

/// Run the full pipeline for one task.
///
/// # Errors
///
/// Any [`VerifyError`] from the underlying `git`/check-command/contract
/// I/O.
pub fn run(ctx: &VerificationContext<'_>) -> Result<VerificationReport, VerifyError> {
    let modified_files = boundary::modified_files(ctx.worktree, ctx.base_ref)?;
    let stats: Vec<FileChangeStats> =
        boundary::gather_stats(ctx.worktree, ctx.base_ref, &modified_files)?;
    let boundary_violations =
        boundary::evaluate(&stats, ctx.task, ctx.boundaries, ctx.lockfile_regexes);

    if !boundary_violations.is_empty() {
        return Ok(VerificationReport {
            modified_files,
            boundary_violations,
            check_result: None,
            environment_ok: false,
            contract_violations: Vec::new(),
            passed: false,
        });
    }

    let modified_tests = checks::discover_modified_tests(ctx.worktree, &modified_files);
    let check_result = checks::run_checks(
        ctx.worktree,
        &ctx.task.verification,
        &modified_files,
        &modified_tests,
        ctx.fail_fast,
    )?;

    let environment_ok =
        environment::environment_matches(ctx.task_environment_hash, ctx.state_environment_hash);

    let contract_violations = contract::check_contracts(
        ctx.plan_contracts,
        ctx.contracts_used,
        ctx.repo_root,
        ctx.renegotiations_used,
        ctx.max_renegotiations,
    )?;

    let passed = check_result.passed && environment_ok && contract_violations.is_empty();

    Ok(VerificationReport {
        modified_files,
        boundary_violations,
        check_result: Some(check_result),
        environment_ok,
        contract_violations,
        passed,
    })
}
