//! `orchestrator plan <request>`: the full pipeline from a human request
//! to a merged plan (spec.md 4.12 phases 1-3) — obtain a plan, risk-score
//! and gate it on approval, then hand off to the orchestration loop.

use std::path::Path;

use anyhow::{Context, Result};
use orch_core::{OrchestrationConfig, Plan, RiskAssessment};

use crate::engine::{Engine, RunReport};
use crate::paths::Layout;

/// What `plan` produced. `report` is `None` when the plan is still
/// awaiting human approval (spec.md 4.12 phase 2).
pub struct PlanOutcome {
    /// The parsed plan.
    pub plan: Plan,
    /// The risk scorer's verdict.
    pub risk: RiskAssessment,
    /// Set once the plan has actually run.
    pub report: Option<RunReport>,
}

/// Run phases 1-3: obtain a plan (spawning the planner, or parsing
/// `plan_file`), score its risk, gate on approval unless it auto-approves
/// or `approve` is set, then persist it and run the orchestration loop.
///
/// # Errors
///
/// [`anyhow::Error`] on any failure obtaining, persisting, or running the
/// plan.
pub async fn run(
    root: &Path,
    config: OrchestrationConfig,
    request: &str,
    plan_file: Option<&Path>,
    approve: bool,
) -> Result<PlanOutcome> {
    let layout = Layout::new(root);
    let engine = Engine::new(root, config.clone())?;

    let plan = engine.obtain_plan(request, plan_file).await?;
    let validation_errors = plan.validate_full();
    if !validation_errors.is_empty() {
        anyhow::bail!(
            "planner produced an invalid plan: {}",
            validation_errors.iter().map(std::string::ToString::to_string).collect::<Vec<_>>().join("; ")
        );
    }

    let risk = orch_core::score_risk(&plan, &config.approval);

    let approved = risk.auto_approve || approve || layout.approval_file().exists();
    if !approved {
        persist_plan(&layout, &plan)?;
        return Ok(PlanOutcome { plan, risk, report: None });
    }

    if !risk.auto_approve {
        std::fs::write(layout.approval_file(), "approved\n")
            .with_context(|| format!("failed to write approval marker at {}", layout.approval_file().display()))?;
    }

    persist_plan(&layout, &plan)?;
    engine.stage_environment(&plan).await?;
    let report = engine.run(&plan).await?;

    Ok(PlanOutcome { plan, risk, report: Some(report) })
}

fn persist_plan(layout: &Layout, plan: &Plan) -> Result<()> {
    let path = layout.plan_file();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(plan).context("failed to serialize plan")?;
    std::fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))
}
