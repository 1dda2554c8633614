//! Imperative shell: every `tmux` invocation lives here, always run as an
//! argv list (`Command::new("tmux").args([...])`), never as a shell
//! string — the same injection-safety pattern `orch-git` uses for `git`.

use std::path::Path;
use std::process::{Command, Output};

use tracing::debug;

use crate::error::SessionError;

fn run(args: &[&str]) -> Result<Output, SessionError> {
    debug!(args = ?args, "running tmux");
    Command::new("tmux")
        .args(args)
        .output()
        .map_err(|source| SessionError::Spawn { args: args.join(" "), source })
}

fn run_ok(args: &[&str]) -> Result<Output, SessionError> {
    let output = run(args)?;
    if !output.status.success() {
        return Err(SessionError::CommandFailed {
            args: args.join(" "),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(output)
}

/// `tmux new-session -d -s <name> -c <cwd>`.
///
/// # Errors
///
/// [`SessionError::CommandFailed`] if the session already exists or
/// `cwd` is invalid.
pub fn new_detached(name: &str, cwd: &Path) -> Result<(), SessionError> {
    let cwd_str = cwd.to_string_lossy().into_owned();
    run_ok(&["new-session", "-d", "-s", name, "-c", &cwd_str])?;
    Ok(())
}

/// `tmux send-keys -t <name> <keys> Enter`.
///
/// # Errors
///
/// [`SessionError::CommandFailed`] if the target session doesn't exist.
pub fn send_keys(name: &str, keys: &str) -> Result<(), SessionError> {
    run_ok(&["send-keys", "-t", name, keys, "Enter"])?;
    Ok(())
}

/// `tmux has-session -t <name>`, true iff it exits 0.
#[must_use]
pub fn has_session(name: &str) -> bool {
    matches!(run(&["has-session", "-t", name]), Ok(output) if output.status.success())
}

/// `tmux kill-session -t <name>`. Killing an already-gone session is not
/// an error — the caller's goal ("make sure it's gone") is already met.
///
/// # Errors
///
/// [`SessionError::Spawn`] if `tmux` itself could not be executed.
pub fn kill_session(name: &str) -> Result<(), SessionError> {
    let output = run(&["kill-session", "-t", name])?;
    let _ = output;
    Ok(())
}

/// `tmux rename-session -t <old> <new>`.
///
/// # Errors
///
/// [`SessionError::CommandFailed`] if `old` doesn't exist or `new` is
/// already taken.
pub fn rename_session(old: &str, new: &str) -> Result<(), SessionError> {
    run_ok(&["rename-session", "-t", old, new])?;
    Ok(())
}

/// `tmux display-message -t <name> -p '#{pane_current_command}'`.
///
/// # Errors
///
/// [`SessionError::CommandFailed`] if the session doesn't exist.
pub fn current_command(name: &str) -> Result<String, SessionError> {
    let output = run_ok(&["display-message", "-t", name, "-p", "#{pane_current_command}"])?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// `tmux capture-pane -t <name> -p -S -<lines>`: the last `lines` lines
/// of pane scrollback.
///
/// # Errors
///
/// [`SessionError::CommandFailed`] if the session doesn't exist.
pub fn capture_pane(name: &str, lines: u32) -> Result<String, SessionError> {
    let start = format!("-{lines}");
    let output = run_ok(&["capture-pane", "-t", name, "-p", "-S", &start])?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
