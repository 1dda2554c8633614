//! `orchestrator validate <tasks.yaml>`: parse and validate a plan
//! without touching any state, worktree, or session.

use std::path::Path;

use anyhow::{Context, Result};
use orch_core::{Plan, PlanFormat};

/// Outcome of validating a plan file.
pub struct ValidationReport {
    /// The parsed plan, if it was structurally valid.
    pub plan: Option<Plan>,
    /// Human-readable validation errors, if parsing failed.
    pub errors: Vec<String>,
    /// Non-fatal warnings from a successfully parsed plan.
    pub warnings: Vec<String>,
}

fn format_for(path: &Path) -> PlanFormat {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => PlanFormat::Json,
        _ => PlanFormat::Yaml,
    }
}

/// Read, parse, and validate the plan file at `path`.
///
/// # Errors
///
/// Only if the file itself can't be read — parse/validation failures are
/// reported in [`ValidationReport::errors`], not as an `Err`.
pub fn run(path: &Path) -> Result<ValidationReport> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read plan file {}", path.display()))?;

    match Plan::parse(&source, format_for(path)) {
        Ok(plan) => {
            let warnings = plan
                .warnings()
                .into_iter()
                .map(|w| format!("{w:?}"))
                .collect();
            Ok(ValidationReport { plan: Some(plan), errors: Vec::new(), warnings })
        }
        Err(err) => {
            let errors = match err {
                orch_core::PlanError::Parse(msg) => vec![msg],
                orch_core::PlanError::Invalid(errs) => errs.iter().map(|e| e.to_string()).collect(),
            };
            Ok(ValidationReport { plan: None, errors, warnings: Vec::new() })
        }
    }
}
