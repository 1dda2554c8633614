//! Step A — Boundary check (spec.md 4.9): the modified-file set on a task
//! branch must stay inside what the task declared, and must not touch
//! forbidden paths, lockfiles, or blow past the churn threshold.
//!
//! Split functional-core/imperative-shell: [`modified_files`] and
//! [`gather_stats`] are the only functions that shell out to `git`;
//! [`evaluate`] is pure and takes already-gathered [`FileChangeStats`].

use std::collections::HashSet;
use std::path::Path;
use std::process::Command;

use orch_core::config::BoundarySettings;
use orch_core::Task;
use regex::Regex;

use crate::error::VerifyError;

fn run_git(worktree: &Path, args: &[&str]) -> Result<std::process::Output, VerifyError> {
    Command::new("git").args(args).current_dir(worktree).output().map_err(|source| {
        VerifyError::Spawn { command: format!("git {}", args.join(" ")), source }
    })
}

/// Files changed on the task branch vs `main`: tries `main...HEAD` first,
/// falls back to `HEAD~1..HEAD`, and hard-fails (never returns an empty
/// set on failure) if both fail.
///
/// # Errors
///
/// [`VerifyError::NoUsableDiffBase`] if neither diff base works.
pub fn modified_files(worktree: &Path, base: &str) -> Result<Vec<String>, VerifyError> {
    let range = format!("{base}...HEAD");
    if let Ok(output) = run_git(worktree, &["diff", "--name-only", &range]) {
        if output.status.success() {
            return Ok(parse_names(&output.stdout));
        }
    }
    if let Ok(output) = run_git(worktree, &["diff", "--name-only", "HEAD~1..HEAD"]) {
        if output.status.success() {
            return Ok(parse_names(&output.stdout));
        }
    }
    Err(VerifyError::NoUsableDiffBase { worktree: worktree.display().to_string() })
}

fn parse_names(stdout: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

/// Per-file change stats needed by [`evaluate`]: total changed lines and
/// whether the diff is whitespace-only.
#[derive(Debug, Clone)]
pub struct FileChangeStats {
    /// The modified path, relative to the worktree root.
    pub path: String,
    /// Added + deleted lines, from `git diff --numstat`.
    pub lines_changed: usize,
    /// `git diff -w --quiet <base>...HEAD -- <path>` exited 0: the diff
    /// disappears once whitespace is ignored.
    pub formatting_only: bool,
}

/// Gather [`FileChangeStats`] for every entry in `modified`.
///
/// # Errors
///
/// [`VerifyError::Spawn`] if `git` can't be executed.
pub fn gather_stats(
    worktree: &Path,
    base: &str,
    modified: &[String],
) -> Result<Vec<FileChangeStats>, VerifyError> {
    let range = format!("{base}...HEAD");
    let numstat = run_git(worktree, &["diff", "--numstat", &range])?;
    let mut lines_by_path = std::collections::HashMap::new();
    for line in String::from_utf8_lossy(&numstat.stdout).lines() {
        let mut fields = line.split_whitespace();
        let added = fields.next().and_then(|s| s.parse::<usize>().ok()).unwrap_or(0);
        let deleted = fields.next().and_then(|s| s.parse::<usize>().ok()).unwrap_or(0);
        if let Some(path) = fields.next() {
            lines_by_path.insert(path.to_string(), added + deleted);
        }
    }

    let mut stats = Vec::with_capacity(modified.len());
    for path in modified {
        let lines_changed = lines_by_path.get(path).copied().unwrap_or(0);
        let formatting_only = run_git(worktree, &["diff", "-w", "--quiet", &range, "--", path])
            .map(|o| o.status.success())
            .unwrap_or(false);
        stats.push(FileChangeStats { path: path.clone(), lines_changed, formatting_only });
    }
    Ok(stats)
}

/// One boundary violation found by [`evaluate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundaryViolation {
    /// A modified path was not declared in `files_write`/`files_append`.
    NotDeclared(String),
    /// A modified path matched a forbidden pattern.
    Forbidden(String),
    /// A modified path matched the lockfile set (supervisor-only).
    Lockfile(String),
    /// A file's changed-line count exceeded the churn threshold.
    ExcessiveChurn {
        /// The offending path.
        path: String,
        /// Lines changed.
        lines: usize,
        /// The configured threshold.
        threshold: usize,
    },
    /// A file in the formatting-sensitive allowlist changed only
    /// whitespace.
    FormattingOnly(String),
}

/// Evaluate already-gathered [`FileChangeStats`] against `task`'s
/// declared boundaries. Pure — no I/O.
#[must_use]
pub fn evaluate(
    stats: &[FileChangeStats],
    task: &Task,
    boundaries: &BoundarySettings,
    lockfile_regexes: &[Regex],
) -> Vec<BoundaryViolation> {
    let writable = task.writable_paths();
    let forbidden: Vec<Regex> =
        boundaries.forbidden_patterns.iter().filter_map(|p| Regex::new(p).ok()).collect();
    let allowlist: HashSet<&str> =
        boundaries.formatting_check_allowlist.iter().map(String::as_str).collect();
    let denylist: HashSet<&str> =
        boundaries.formatting_check_denylist.iter().map(String::as_str).collect();

    let mut violations = Vec::new();
    for file in stats {
        if !writable.contains(file.path.as_str()) {
            violations.push(BoundaryViolation::NotDeclared(file.path.clone()));
        }
        if forbidden.iter().any(|re| re.is_match(&file.path)) {
            violations.push(BoundaryViolation::Forbidden(file.path.clone()));
        }
        if lockfile_regexes.iter().any(|re| re.is_match(&file.path)) {
            violations.push(BoundaryViolation::Lockfile(file.path.clone()));
        }
        if file.lines_changed > boundaries.churn_threshold_lines && !task.allow_large_changes {
            violations.push(BoundaryViolation::ExcessiveChurn {
                path: file.path.clone(),
                lines: file.lines_changed,
                threshold: boundaries.churn_threshold_lines,
            });
        }
        let extension_matches = |set: &HashSet<&str>| {
            set.iter().any(|pat| file.path.ends_with(*pat))
        };
        if file.formatting_only && extension_matches(&allowlist) && !extension_matches(&denylist) {
            violations.push(BoundaryViolation::FormattingOnly(file.path.clone()));
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use orch_core::{Task, TaskId};

    fn task(writes: &[&str]) -> Task {
        Task {
            id: TaskId::new("t1").unwrap_or_else(|e| panic!("{e}")),
            description: String::new(),
            files_write: writes.iter().map(|s| s.to_string()).collect(),
            files_read: Vec::new(),
            files_append: Vec::new(),
            resources_write: Vec::new(),
            resources_read: Vec::new(),
            depends_on: Default::default(),
            verification: Vec::new(),
            patch_intents: Vec::new(),
            deps_required: None,
            allow_large_changes: false,
        }
    }

    fn stat(path: &str, lines: usize, fmt_only: bool) -> FileChangeStats {
        FileChangeStats { path: path.to_string(), lines_changed: lines, formatting_only: fmt_only }
    }

    #[test]
    fn undeclared_file_is_a_violation() {
        let t = task(&["src/a.rs"]);
        let boundaries = BoundarySettings::default();
        let violations = evaluate(&[stat("src/b.rs", 1, false)], &t, &boundaries, &[]);
        assert_eq!(violations, vec![BoundaryViolation::NotDeclared("src/b.rs".to_string())]);
    }

    #[test]
    fn forbidden_pattern_is_flagged() {
        let t = task(&["node_modules/pkg/index.js"]);
        let boundaries = BoundarySettings::default();
        let violations =
            evaluate(&[stat("node_modules/pkg/index.js", 1, false)], &t, &boundaries, &[]);
        assert!(violations
            .iter()
            .any(|v| matches!(v, BoundaryViolation::Forbidden(p) if p == "node_modules/pkg/index.js")));
    }

    #[test]
    fn excessive_churn_is_flagged_unless_allowed() {
        let mut t = task(&["src/a.rs"]);
        let boundaries = BoundarySettings::default();
        let violations = evaluate(&[stat("src/a.rs", 600, false)], &t, &boundaries, &[]);
        assert!(violations.iter().any(|v| matches!(v, BoundaryViolation::ExcessiveChurn { .. })));

        t.allow_large_changes = true;
        let violations = evaluate(&[stat("src/a.rs", 600, false)], &t, &boundaries, &[]);
        assert!(!violations.iter().any(|v| matches!(v, BoundaryViolation::ExcessiveChurn { .. })));
    }

    #[test]
    fn formatting_only_diff_in_allowlist_is_flagged() {
        let t = task(&["src/a.rs"]);
        let boundaries = BoundarySettings::default();
        let violations = evaluate(&[stat("src/a.rs", 5, true)], &t, &boundaries, &[]);
        assert!(violations.iter().any(|v| matches!(v, BoundaryViolation::FormattingOnly(_))));
    }

    #[test]
    fn formatting_only_diff_in_denylist_is_not_flagged() {
        let t = task(&["src/a.py"]);
        let boundaries = BoundarySettings::default();
        let violations = evaluate(&[stat("src/a.py", 5, true)], &t, &boundaries, &[]);
        assert!(violations.is_empty());
    }

    #[test]
    fn lockfile_modification_is_flagged() {
        let t = task(&["Cargo.lock"]);
        let boundaries = BoundarySettings::default();
        let re = Regex::new(r"(^|/)Cargo\.lock$").unwrap_or_else(|e| panic!("{e}"));
        let violations = evaluate(&[stat("Cargo.lock", 2, false)], &t, &boundaries, &[re]);
        assert!(violations.iter().any(|v| matches!(v, BoundaryViolation::Lockfile(_))));
    }
}
