//! Step B — Command runner (spec.md 4.9): executes a task's declared
//! [`Check`]s in order, with template resolution, per-check timeout, and
//! `fail_fast` short-circuiting.

use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use orch_core::plan::Check;

use crate::error::VerifyError;

/// Default `fail_fast` behavior: stop at the first failing `required`
/// check (spec.md 4.9 step B.4). Not currently exposed as a plan- or
/// config-level override — every pipeline run uses this default.
pub const DEFAULT_FAIL_FAST: bool = true;

/// Shell-quote one filename for safe interpolation into a command
/// template (single-quote, escaping embedded quotes).
#[must_use]
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Resolve `{modified_files}` and `{modified_tests}` placeholders in a
/// check's command template, shell-quoting every interpolated filename.
/// Pure — no I/O.
#[must_use]
pub fn resolve_template(template: &str, modified_files: &[String], modified_tests: &[String]) -> String {
    let files = modified_files.iter().map(|f| shell_quote(f)).collect::<Vec<_>>().join(" ");
    let tests = modified_tests.iter().map(|f| shell_quote(f)).collect::<Vec<_>>().join(" ");
    template.replace("{modified_files}", &files).replace("{modified_tests}", &tests)
}

/// Candidate conventional test paths for a modified source file, across
/// the Python/JS-TS/Rust conventions this orchestrator expects to see.
/// Pure — returns candidates regardless of whether they exist;
/// [`discover_modified_tests`] filters by existence.
#[must_use]
pub fn candidate_test_paths(source_path: &str) -> Vec<String> {
    let path = Path::new(source_path);
    let Some(file_stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return Vec::new();
    };
    let Some(extension) = path.extension().and_then(|s| s.to_str()) else {
        return Vec::new();
    };
    let parent = path.parent().map(|p| p.to_string_lossy().into_owned()).unwrap_or_default();

    let mut candidates = Vec::new();
    match extension {
        "py" => {
            candidates.push(format!("{parent}/test_{file_stem}.py"));
            candidates.push(format!("tests/test_{file_stem}.py"));
        }
        "ts" | "tsx" | "js" | "jsx" => {
            candidates.push(format!("{parent}/{file_stem}.test.{extension}"));
            candidates.push(format!("{parent}/__tests__/{file_stem}.test.{extension}"));
            candidates.push(format!("__tests__/{file_stem}.test.{extension}"));
        }
        "go" => candidates.push(format!("{parent}/{file_stem}_test.go")),
        _ => {}
    }
    candidates
}

/// Map every modified source path to its conventional test path(s) that
/// actually exist under `worktree` (spec.md 4.9 step B.1's
/// `{modified_tests}`).
#[must_use]
pub fn discover_modified_tests(worktree: &Path, modified_files: &[String]) -> Vec<String> {
    let mut found = Vec::new();
    for file in modified_files {
        for candidate in candidate_test_paths(file) {
            if worktree.join(&candidate).is_file() {
                found.push(candidate);
            }
        }
    }
    found
}

/// Outcome of running one [`Check`].
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    /// The fully resolved command that was run.
    pub command: String,
    /// Whether it was a required check.
    pub required: bool,
    /// Process exit code, or `None` if it was killed for exceeding its
    /// timeout.
    pub exit_code: Option<i32>,
    /// Captured stdout, truncated to a reasonable size for logging.
    pub stdout: String,
    /// Captured stderr, truncated to a reasonable size for logging.
    pub stderr: String,
    /// Wall-clock duration of the run.
    pub duration: Duration,
    /// Whether the process was killed for exceeding its timeout.
    pub timed_out: bool,
}

impl CheckOutcome {
    /// Whether this outcome counts as passing (exited 0, not timed out).
    #[must_use]
    pub fn passed(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

const OUTPUT_TRUNCATE_BYTES: usize = 64 * 1024;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

fn truncate(bytes: Vec<u8>) -> String {
    let text = String::from_utf8_lossy(&bytes).into_owned();
    if text.len() > OUTPUT_TRUNCATE_BYTES {
        let mut truncated = text[..OUTPUT_TRUNCATE_BYTES].to_string();
        truncated.push_str("\n... [truncated]");
        truncated
    } else {
        text
    }
}

/// Run one resolved command in `worktree`, shell on, killing it if it
/// exceeds `timeout`.
///
/// # Errors
///
/// [`VerifyError::Spawn`] if the command could not be spawned.
pub fn run_command(worktree: &Path, command: &str, timeout: Duration) -> Result<(Option<i32>, bool, Vec<u8>, Vec<u8>, Duration), VerifyError> {
    let start = Instant::now();
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(worktree)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| VerifyError::Spawn { command: command.to_string(), source })?;

    let timed_out = loop {
        match child.try_wait() {
            Ok(Some(_)) => break false,
            Ok(None) => {
                if start.elapsed() >= timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    break true;
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(source) => {
                return Err(VerifyError::Spawn { command: command.to_string(), source });
            }
        }
    };

    let output = child.wait_with_output().map_err(|source| VerifyError::Spawn {
        command: command.to_string(),
        source,
    })?;
    let exit_code = if timed_out { None } else { output.status.code() };
    Ok((exit_code, timed_out, output.stdout, output.stderr, start.elapsed()))
}

/// Result of running a task's full verification command list.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    /// Per-check outcomes, in execution order (may stop early on
    /// `fail_fast`).
    pub outcomes: Vec<CheckOutcome>,
    /// Whether every required check passed.
    pub passed: bool,
    /// The command that first failed and stopped the run, if any.
    pub failed_at: Option<String>,
}

/// Run every check in order, template-resolving against `modified_files`
/// and `modified_tests`, stopping early at the first failing `required`
/// check when `fail_fast` is true.
///
/// # Errors
///
/// [`VerifyError::Spawn`] if any command could not be spawned.
pub fn run_checks(
    worktree: &Path,
    checks: &[Check],
    modified_files: &[String],
    modified_tests: &[String],
    fail_fast: bool,
) -> Result<PipelineResult, VerifyError> {
    let mut outcomes = Vec::with_capacity(checks.len());
    let mut passed = true;
    let mut failed_at = None;

    for check in checks {
        let command = resolve_template(&check.command, modified_files, modified_tests);
        let timeout = Duration::from_secs(check.effective_timeout_secs());
        let (exit_code, timed_out, stdout, stderr, duration) =
            run_command(worktree, &command, timeout)?;

        let outcome = CheckOutcome {
            command: command.clone(),
            required: check.required,
            exit_code,
            stdout: truncate(stdout),
            stderr: truncate(stderr),
            duration,
            timed_out,
        };
        let this_passed = outcome.passed();
        outcomes.push(outcome);

        if !this_passed && check.required {
            passed = false;
            if failed_at.is_none() {
                failed_at = Some(command.clone());
            }
            if fail_fast {
                break;
            }
        }
    }

    Ok(PipelineResult { outcomes, passed, failed_at })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_resolution_quotes_every_file() {
        let resolved = resolve_template(
            "pytest {modified_tests}",
            &["src/a.py".to_string()],
            &["tests/test_a.py".to_string()],
        );
        assert_eq!(resolved, "pytest 'tests/test_a.py'");
    }

    #[test]
    fn python_candidates_include_sibling_and_tests_dir() {
        let candidates = candidate_test_paths("src/widgets.py");
        assert!(candidates.contains(&"src/test_widgets.py".to_string()));
        assert!(candidates.contains(&"tests/test_widgets.py".to_string()));
    }

    #[test]
    fn rust_files_have_no_convention_candidates() {
        assert!(candidate_test_paths("src/lib.rs").is_empty());
    }

    #[test]
    fn successful_command_passes() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let (code, timed_out, _, _, _) =
            run_command(dir.path(), "exit 0", Duration::from_secs(5)).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(code, Some(0));
        assert!(!timed_out);
    }

    #[test]
    fn failing_required_check_stops_with_fail_fast() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let checks = vec![
            Check { command: "exit 1".into(), check_type: orch_core::CheckType::Lint, required: true, timeout: None },
            Check { command: "exit 0".into(), check_type: orch_core::CheckType::Test, required: true, timeout: None },
        ];
        let result = run_checks(dir.path(), &checks, &[], &[], true).unwrap_or_else(|e| panic!("{e}"));
        assert!(!result.passed);
        assert_eq!(result.outcomes.len(), 1);
        assert_eq!(result.failed_at.as_deref(), Some("exit 1"));
    }

    #[test]
    fn timeout_kills_long_running_command() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let (code, timed_out, _, _, _) =
            run_command(dir.path(), "sleep 5", Duration::from_millis(200)).unwrap_or_else(|e| panic!("{e}"));
        assert!(timed_out);
        assert_eq!(code, None);
    }
}
