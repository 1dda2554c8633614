//! `orchestrator preflight`: the checks spec.md 6 requires to all pass
//! before `plan` is allowed to run.

use std::path::Path;

use anyhow::{bail, Result};

/// One preflight check's outcome.
#[derive(Debug, Clone)]
pub struct CheckResult {
    /// Short name of the check.
    pub name: String,
    /// Whether it passed.
    pub ok: bool,
    /// Human-readable detail (the failure reason, or "ok").
    pub detail: String,
}

/// Run every preflight check and report them all, rather than stopping
/// at the first failure — an operator fixing their environment wants
/// the whole list at once.
#[must_use]
pub fn run_checks(root: &Path) -> Vec<CheckResult> {
    let mut results = Vec::new();

    results.push(match orch_git::check_git_installed() {
        Ok(()) => CheckResult { name: "git".into(), ok: true, detail: "ok".into() },
        Err(e) => CheckResult { name: "git".into(), ok: false, detail: e.to_string() },
    });

    results.push(match orch_session::check_tmux_installed() {
        Ok(()) => CheckResult { name: "tmux".into(), ok: true, detail: "ok".into() },
        Err(e) => CheckResult { name: "tmux".into(), ok: false, detail: e.to_string() },
    });

    results.push(if root.join(".git").exists() {
        CheckResult { name: "git-repo".into(), ok: true, detail: "ok".into() }
    } else {
        CheckResult {
            name: "git-repo".into(),
            ok: false,
            detail: format!("{} is not a git repository", root.display()),
        }
    });

    let launcher_found = std::env::var("ORCHESTRATOR_LAUNCHER")
        .ok()
        .and_then(|name| which::which(name).ok())
        .or_else(|| which::which("claude").ok());
    results.push(match launcher_found {
        Some(path) => CheckResult {
            name: "agent-launcher".into(),
            ok: true,
            detail: format!("resolved to {}", path.display()),
        },
        None => CheckResult {
            name: "agent-launcher".into(),
            ok: false,
            detail: "no agent launcher binary found on PATH (set ORCHESTRATOR_LAUNCHER)".into(),
        },
    });

    results.push(CheckResult { name: "yaml-parser".into(), ok: true, detail: "ok (serde_yaml linked)".into() });

    results.push(soft_ulimit_advisory());

    results
}

#[cfg(unix)]
fn soft_ulimit_advisory() -> CheckResult {
    // SAFETY-FREE advisory only: a low open-file limit doesn't block
    // `plan`, it just makes many concurrent worktrees more likely to hit
    // EMFILE. We can't forbid unsafe_code and call getrlimit directly, so
    // this is a best-effort check via `ulimit -n` through the shell.
    let output = std::process::Command::new("sh").arg("-c").arg("ulimit -n").output();
    match output {
        Ok(out) if out.status.success() => {
            let text = String::from_utf8_lossy(&out.stdout).trim().to_string();
            let low = text.parse::<u64>().map(|n| n < 1024).unwrap_or(false);
            CheckResult {
                name: "ulimit-nofile".into(),
                ok: !low,
                detail: if low {
                    format!("open-file limit is {text}; consider raising it for large waves")
                } else {
                    format!("{text} (advisory only)")
                },
            }
        }
        _ => CheckResult {
            name: "ulimit-nofile".into(),
            ok: true,
            detail: "could not query (advisory only, non-blocking)".into(),
        },
    }
}

#[cfg(not(unix))]
fn soft_ulimit_advisory() -> CheckResult {
    CheckResult { name: "ulimit-nofile".into(), ok: true, detail: "not applicable on this platform".into() }
}

/// Run all checks and return an error if any hard (non-advisory) check
/// failed. `ulimit-nofile` is advisory and never blocks.
pub fn require_all_pass(root: &Path) -> Result<()> {
    let results = run_checks(root);
    let failures: Vec<&CheckResult> =
        results.iter().filter(|r| !r.ok && r.name != "ulimit-nofile").collect();
    if !failures.is_empty() {
        let detail = failures
            .iter()
            .map(|r| format!("{}: {}", r.name, r.detail))
            .collect::<Vec<_>>()
            .join("; ");
        bail!("preflight checks failed: {detail}");
    }
    Ok(())
}
