//! `orchestrator abort [--force]`: stop the current orchestration,
//! killing live sessions and marking in-flight tasks `failed`.

use std::path::Path;

use anyhow::Result;
use orch_core::OrchestrationConfig;

/// Abort every `executing`/`completed`-but-unmerged task, returning the
/// ids that were touched.
///
/// # Errors
///
/// [`anyhow::Error`] on any state/git/session failure.
pub async fn run(root: &Path, config: OrchestrationConfig, force: bool) -> Result<Vec<String>> {
    let engine = crate::engine::Engine::new(root, config)?;
    engine.abort(force).await
}
