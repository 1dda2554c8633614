//! `orchestrator init [path]`: scaffold `.claude-agents.yaml` and the
//! `.orchestrator/` directory tree in a repository that doesn't have
//! them yet.

use std::path::Path;

use anyhow::{bail, Context, Result};
use orch_core::OrchestrationConfig;

use crate::paths::Layout;

const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Orchestrator configuration. Every field has a built-in default;
# uncomment and edit only what you need to change.

orchestration:
  max_parallel_workers: 5
  max_iterations: 3
  worktree_dir: .worktrees
  task_timeout_secs: 1800
  poll_interval_secs: 30

boundaries:
  churn_threshold_lines: 500

contracts:
  max_renegotiations: 2

patch_intents:
  enabled: true
  adapter: auto
  fallback: serialize

quality:
  stabilization_gate: true
"#;

/// Scaffold `.claude-agents.yaml` and the `.orchestrator/` subdirectories
/// at `root`. Safe to re-run: existing files and directories are left
/// untouched.
///
/// # Errors
///
/// [`anyhow::Error`] if `root` isn't a git repository, or if any
/// directory/file creation fails.
pub fn run(root: &Path) -> Result<()> {
    if !root.join(".git").exists() {
        bail!("{} is not a git repository; run `git init` first", root.display());
    }

    let layout = Layout::new(root);
    for dir in [layout.signals_dir(), layout.mailbox_dir(), layout.logs_dir()] {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let config_path = layout.config_file();
    if !config_path.exists() {
        std::fs::write(&config_path, DEFAULT_CONFIG_TEMPLATE)
            .with_context(|| format!("failed to write {}", config_path.display()))?;
    }

    // Validate the template we just wrote (or whatever already existed)
    // parses, so `init` never leaves a broken config behind.
    OrchestrationConfig::load(&config_path)
        .with_context(|| format!("generated config at {} failed to parse", config_path.display()))?;

    Ok(())
}
