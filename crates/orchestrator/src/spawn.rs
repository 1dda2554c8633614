//! Shared agent-spawning glue used by the planner, worker, and verifier
//! roles: write the prompt file, run the Session Supervisor's 5-step
//! protocol (spec.md 4.7), and report whether the agent actually started.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use orch_core::TaskId;
use orch_session::{LivenessStatus, Role, SessionSupervisor};
use tracing::warn;
use uuid::Uuid;

/// How long to wait after spawning before checking liveness (spec.md 4.7
/// step 5: "after ~3s, inspect the pane's `current_command`").
const LIVENESS_DELAY: std::time::Duration = std::time::Duration::from_secs(3);

/// Outcome of [`spawn_agent`].
pub enum SpawnOutcome {
    /// The agent started and is running.
    Started {
        /// The final session name.
        session: String,
    },
    /// The session exists but never left its login shell, and a concrete
    /// shell-level error was found.
    Failed {
        /// The final session name (still exists; caller should kill it).
        session: String,
        /// The shell-level error marker that was found.
        reason: String,
    },
    /// Still at the login shell with no concrete error yet; the caller
    /// may poll again.
    Starting {
        /// The final session name.
        session: String,
    },
}

/// Write `prompt` to a fresh prompt file under `prompts_dir` and spawn
/// `role`'s session for `id` in `worktree_dir`, then run one liveness
/// check after the standard grace period.
///
/// # Errors
///
/// [`anyhow::Error`] if the prompt file can't be written, or any
/// [`orch_session::SessionError`] from the underlying `tmux` calls.
pub async fn spawn_agent(
    sessions: &SessionSupervisor,
    id: &TaskId,
    role: Role,
    worktree_dir: &Path,
    prompts_dir: &Path,
    prompt: &str,
) -> Result<SpawnOutcome> {
    tokio::fs::create_dir_all(prompts_dir)
        .await
        .with_context(|| format!("failed to create {}", prompts_dir.display()))?;
    let prompt_file = prompt_file_path(prompts_dir, id, role);
    tokio::fs::write(&prompt_file, prompt)
        .await
        .with_context(|| format!("failed to write prompt file {}", prompt_file.display()))?;

    let temp_suffix = Uuid::new_v4().to_string();
    let session = sessions.spawn(id, role, worktree_dir, &prompt_file, &temp_suffix)?;

    tokio::time::sleep(LIVENESS_DELAY).await;

    match sessions.verify_liveness(&session)? {
        LivenessStatus::Running => Ok(SpawnOutcome::Started { session }),
        LivenessStatus::Failed(reason) => {
            warn!(session = %session, reason = %reason, "agent failed to start");
            Ok(SpawnOutcome::Failed { session, reason })
        }
        LivenessStatus::Starting => Ok(SpawnOutcome::Starting { session }),
    }
}

fn prompt_file_path(prompts_dir: &Path, id: &TaskId, role: Role) -> PathBuf {
    let role_name = match role {
        Role::Planner => "planner",
        Role::Worker => "worker",
        Role::Verifier => "verifier",
    };
    prompts_dir.join(format!("{}-{role_name}.txt", id.as_str()))
}
