//! Functional core: pure session-naming, command-building, and
//! liveness/monitoring decisions. Nothing in this module touches a
//! filesystem or spawns a process — see [`crate::tmux`] for the shell.

use std::time::Duration;

/// Process names that mean "the launcher hasn't started yet, this is
/// still the session's login shell".
const SHELL_NAMES: &[&str] = &["bash", "sh", "zsh", "fish", "dash", "ksh"];

/// Concrete shell-level failures worth surfacing during liveness
/// verification. Deliberately narrow — spec.md 4.7 warns against keying
/// liveness off pane text scans for the word "error", since an agent's
/// normal output contains that word routinely.
const SHELL_ERROR_MARKERS: &[&str] =
    &["command not found", "No such file or directory", "Permission denied"];

/// Whether `current_command` (as tmux reports `pane_current_command`)
/// indicates the pane is still sitting at its login shell.
#[must_use]
pub fn is_shell_command(current_command: &str) -> bool {
    SHELL_NAMES.iter().any(|name| *name == current_command)
}

/// Scan captured pane output for a concrete shell-level error, per the
/// narrow marker list above.
#[must_use]
pub fn find_shell_error(pane_output: &str) -> Option<&'static str> {
    SHELL_ERROR_MARKERS.iter().copied().find(|marker| pane_output.contains(marker))
}

/// Build the session init command: export `PATH` (with the launcher's
/// directory prepended) and an optional heap-size env var, then clear the
/// screen so later liveness checks see a clean pane. Exporting `PATH`
/// directly — rather than sourcing a shell profile — avoids the
/// intermittent "command not found" failures caused by profiles that
/// early-exit in non-interactive shells.
#[must_use]
pub fn init_command(launcher_dir: &str, heap_size_mb: Option<u32>) -> String {
    let mut cmd = format!("export PATH=\"{launcher_dir}:$PATH\"");
    if let Some(mb) = heap_size_mb {
        cmd.push_str(&format!(" && export NODE_OPTIONS=\"--max-old-space-size={mb}\""));
    }
    cmd.push_str(" && clear");
    cmd
}

/// Build the piped-prompt launch command: `cat <prompt-file> | <launcher>
/// -p`. Piping from a file — rather than passing the prompt as a CLI
/// argument — avoids shell-escaping hazards on large, arbitrary-content
/// prompts.
#[must_use]
pub fn launch_command(launcher: &str, prompt_file: &str) -> String {
    format!("cat {} | {} -p", shell_quote(prompt_file), shell_quote(launcher))
}

/// Single-quote a string for safe inclusion in a shell command line,
/// escaping embedded single quotes as `'\''`.
#[must_use]
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// A unique temporary session name, distinct from the final target name,
/// used during the create-then-rename spawning step.
#[must_use]
pub fn temp_session_name(target: &str, suffix: &str) -> String {
    format!("{target}-tmp-{suffix}")
}

/// Raw facts the monitoring loop gathers once per poll (spec.md 4.7's
/// per-task table), fed into [`evaluate`].
#[derive(Debug, Clone, Copy)]
pub struct MonitorInputs {
    /// A non-empty `.done` signal file exists for this task.
    pub done_signal_present: bool,
    /// The worker wrote a `blocked` status into its per-task file.
    pub blocked: bool,
    /// Age of the heartbeat file, if one has ever been written.
    pub heartbeat_age: Option<Duration>,
    /// Wall-clock time since the session was spawned.
    pub elapsed_since_start: Duration,
    /// Whether the tmux session still exists.
    pub session_exists: bool,
    /// This task's configured timeout (default 1800s).
    pub task_timeout: Duration,
}

/// Heartbeat staleness threshold before a hang is declared.
pub const HEARTBEAT_STALE_AFTER: Duration = Duration::from_secs(300);
/// Minimum elapsed time before a stale heartbeat is trusted — a worker
/// that hasn't had time to write its first heartbeat yet isn't hung.
pub const HEARTBEAT_GRACE_PERIOD: Duration = Duration::from_secs(60);

/// The outcome of one monitoring-loop poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorAction {
    /// `done` signal seen — task completed.
    Completed,
    /// Worker reported `blocked` — exit monitoring, needs a human or
    /// supervisor decision.
    NeedsDependency,
    /// Heartbeat too stale — session is hung.
    FailedHung,
    /// Elapsed time exceeded the task timeout.
    FailedTimeout,
    /// The session no longer exists.
    FailedTerminated,
    /// Nothing actionable yet; poll again later.
    KeepWaiting,
}

/// Evaluate one poll against spec.md 4.7's observation table, in the
/// table's own priority order.
#[must_use]
pub fn evaluate(inputs: &MonitorInputs) -> MonitorAction {
    if inputs.done_signal_present {
        return MonitorAction::Completed;
    }
    if inputs.blocked {
        return MonitorAction::NeedsDependency;
    }
    if let Some(age) = inputs.heartbeat_age {
        if age > HEARTBEAT_STALE_AFTER && inputs.elapsed_since_start >= HEARTBEAT_GRACE_PERIOD {
            return MonitorAction::FailedHung;
        }
    }
    if inputs.elapsed_since_start > inputs.task_timeout {
        return MonitorAction::FailedTimeout;
    }
    if !inputs.session_exists {
        return MonitorAction::FailedTerminated;
    }
    MonitorAction::KeepWaiting
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_names_are_detected() {
        assert!(is_shell_command("bash"));
        assert!(is_shell_command("zsh"));
        assert!(!is_shell_command("node"));
        assert!(!is_shell_command("claude"));
    }

    #[test]
    fn shell_error_markers_are_found() {
        assert_eq!(find_shell_error("bash: foo: command not found\n"), Some("command not found"));
        assert_eq!(find_shell_error("Error: rate limited, retrying"), None);
    }

    #[test]
    fn quoting_escapes_embedded_single_quotes() {
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn launch_command_quotes_both_paths() {
        let cmd = launch_command("/usr/local/bin/claude", "/tmp/prompt.txt");
        assert_eq!(cmd, "cat '/tmp/prompt.txt' | '/usr/local/bin/claude' -p");
    }

    fn base_inputs() -> MonitorInputs {
        MonitorInputs {
            done_signal_present: false,
            blocked: false,
            heartbeat_age: None,
            elapsed_since_start: Duration::from_secs(10),
            session_exists: true,
            task_timeout: Duration::from_secs(1800),
        }
    }

    #[test]
    fn done_signal_wins_over_everything_else() {
        let mut inputs = base_inputs();
        inputs.done_signal_present = true;
        inputs.blocked = true;
        assert_eq!(evaluate(&inputs), MonitorAction::Completed);
    }

    #[test]
    fn blocked_reports_needs_dependency() {
        let mut inputs = base_inputs();
        inputs.blocked = true;
        assert_eq!(evaluate(&inputs), MonitorAction::NeedsDependency);
    }

    #[test]
    fn stale_heartbeat_before_grace_period_is_not_hung() {
        let mut inputs = base_inputs();
        inputs.elapsed_since_start = Duration::from_secs(30);
        inputs.heartbeat_age = Some(Duration::from_secs(400));
        assert_eq!(evaluate(&inputs), MonitorAction::KeepWaiting);
    }

    #[test]
    fn stale_heartbeat_after_grace_period_is_hung() {
        let mut inputs = base_inputs();
        inputs.elapsed_since_start = Duration::from_secs(120);
        inputs.heartbeat_age = Some(Duration::from_secs(400));
        assert_eq!(evaluate(&inputs), MonitorAction::FailedHung);
    }

    #[test]
    fn overall_timeout_fires() {
        let mut inputs = base_inputs();
        inputs.elapsed_since_start = Duration::from_secs(1801);
        assert_eq!(evaluate(&inputs), MonitorAction::FailedTimeout);
    }

    #[test]
    fn missing_session_is_terminated() {
        let mut inputs = base_inputs();
        inputs.session_exists = false;
        assert_eq!(evaluate(&inputs), MonitorAction::FailedTerminated);
    }

    #[test]
    fn otherwise_keeps_waiting() {
        assert_eq!(evaluate(&base_inputs()), MonitorAction::KeepWaiting);
    }
}
