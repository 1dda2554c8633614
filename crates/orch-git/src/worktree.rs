//! Worktree Manager (C6): one git worktree and branch per task, created
//! from a base ref and merged back under the caller's control.
//!
//! All git invocations run as argv lists (`Command::new("git").args([...])`),
//! never through a shell, and every identifier that flows into a branch
//! name or path first passes [`orch_core::TaskId`]'s safe-id validation —
//! that's the only place a malicious plan-authored string could otherwise
//! reach a subprocess boundary.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use orch_core::TaskId;
use tracing::{debug, warn};

use crate::error::GitError;

/// Info about one entry from `git worktree list --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeEntry {
    /// Absolute path of the worktree.
    pub path: PathBuf,
    /// Commit the worktree's HEAD points at.
    pub head: String,
    /// The branch checked out, if any (detached worktrees have none).
    pub branch: Option<String>,
}

/// The outcome of [`WorktreeManager::cleanup_incomplete`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// The worktree had no uncommitted changes; it was simply removed.
    Clean,
    /// Uncommitted work was committed to the task branch as a recovery
    /// commit before the worktree was removed; the branch survives.
    RecoveryCommitted {
        /// The branch the recovery commit landed on.
        branch: String,
    },
}

/// Manages per-task worktrees rooted under `<repo_root>/<worktree_dir>`.
pub struct WorktreeManager {
    repo_root: PathBuf,
    worktree_dir: PathBuf,
}

impl WorktreeManager {
    /// `repo_root` is the main repository checkout; `worktree_dir` is
    /// relative to it (conventionally `.worktrees`, per
    /// `orchestration.worktree_dir` in config).
    #[must_use]
    pub fn new(repo_root: impl Into<PathBuf>, worktree_dir: impl AsRef<Path>) -> Self {
        let repo_root = repo_root.into();
        let worktree_dir = repo_root.join(worktree_dir.as_ref());
        Self { repo_root, worktree_dir }
    }

    fn path_for(&self, id: &TaskId) -> PathBuf {
        self.worktree_dir.join(id.worktree_dir_name())
    }

    fn run(&self, args: &[&str], cwd: &Path) -> Result<Output, GitError> {
        debug!(args = ?args, cwd = %cwd.display(), "running git");
        Command::new("git")
            .args(args)
            .current_dir(cwd)
            .output()
            .map_err(|source| GitError::Spawn { args: args.join(" "), source })
    }

    fn run_ok(&self, args: &[&str], cwd: &Path) -> Result<Output, GitError> {
        let output = self.run(args, cwd)?;
        if !output.status.success() {
            return Err(GitError::CommandFailed {
                args: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(output)
    }

    /// Create `task/<id>` branched from `base`, checked out at
    /// `<worktree_dir>/<id>`.
    ///
    /// # Errors
    ///
    /// [`GitError::CommandFailed`] if `git worktree add` fails (e.g. the
    /// branch already exists), or [`GitError::Io`] if the parent
    /// directory can't be created.
    pub fn create(&self, id: &TaskId, base: &str) -> Result<PathBuf, GitError> {
        std::fs::create_dir_all(&self.worktree_dir)
            .map_err(|source| GitError::Io { path: self.worktree_dir.display().to_string(), source })?;

        let path = self.path_for(id);
        let path_str = path.to_string_lossy().into_owned();
        let branch = id.branch_name();
        self.run_ok(&["worktree", "add", "-b", &branch, &path_str, base], &self.repo_root)?;
        Ok(path)
    }

    /// Merge `task/<id>` into `target` from the main checkout.
    ///
    /// On merge failure, runs `git merge --abort` so the main worktree is
    /// never left dirty, then returns [`GitError::MergeFailed`].
    ///
    /// # Errors
    ///
    /// [`GitError::CommandFailed`] if the checkout itself fails, or
    /// [`GitError::MergeFailed`] if the merge conflicts.
    pub fn merge(&self, id: &TaskId, target: &str) -> Result<String, GitError> {
        let branch = id.branch_name();
        self.run_ok(&["checkout", target], &self.repo_root)?;

        let merge_output = self.run(&["merge", "--no-edit", &branch], &self.repo_root)?;
        if !merge_output.status.success() {
            let stderr = String::from_utf8_lossy(&merge_output.stderr).into_owned();
            if let Err(abort_err) = self.run_ok(&["merge", "--abort"], &self.repo_root) {
                warn!(error = %abort_err, "git merge --abort itself failed after a failed merge");
            }
            return Err(GitError::MergeFailed { branch, target: target.to_string(), stderr });
        }

        let rev_parse = self.run_ok(&["rev-parse", "HEAD"], &self.repo_root)?;
        Ok(String::from_utf8_lossy(&rev_parse.stdout).trim().to_string())
    }

    /// Remove the worktree at `<worktree_dir>/<id>` and delete its branch.
    ///
    /// # Errors
    ///
    /// [`GitError::CommandFailed`] if either step fails.
    pub fn delete(&self, id: &TaskId, force: bool) -> Result<(), GitError> {
        let path = self.path_for(id);
        let path_str = path.to_string_lossy().into_owned();
        let mut remove_args = vec!["worktree", "remove"];
        if force {
            remove_args.push("--force");
        }
        remove_args.push(&path_str);
        self.run_ok(&remove_args, &self.repo_root)?;

        let branch = id.branch_name();
        let mut branch_args = vec!["branch", "-D"];
        branch_args.push(&branch);
        self.run_ok(&branch_args, &self.repo_root)?;
        Ok(())
    }

    /// Parse `git worktree list --porcelain`.
    ///
    /// # Errors
    ///
    /// [`GitError::CommandFailed`] if the command itself fails, or
    /// [`GitError::UnparseableWorktreeList`] if its output doesn't match
    /// the expected porcelain shape.
    pub fn list(&self) -> Result<Vec<WorktreeEntry>, GitError> {
        let output = self.run_ok(&["worktree", "list", "--porcelain"], &self.repo_root)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_worktree_list(&stdout)
    }

    /// `git worktree prune` followed by removal of any directory under
    /// `worktree_dir` that `git worktree list` no longer tracks.
    ///
    /// # Errors
    ///
    /// [`GitError::CommandFailed`] if `prune` itself fails.
    pub fn cleanup_stale(&self) -> Result<usize, GitError> {
        self.run_ok(&["worktree", "prune"], &self.repo_root)?;

        let tracked: std::collections::HashSet<PathBuf> =
            self.list()?.into_iter().map(|e| e.path).collect();

        let mut removed = 0;
        let Ok(entries) = std::fs::read_dir(&self.worktree_dir) else {
            return Ok(0);
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() && !tracked.contains(&path) {
                if std::fs::remove_dir_all(&path).is_ok() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Whether `id`'s worktree has uncommitted changes (`git status
    /// --porcelain` is non-empty).
    ///
    /// # Errors
    ///
    /// [`GitError::CommandFailed`] if `git status` fails.
    pub fn has_uncommitted_changes(&self, id: &TaskId) -> Result<bool, GitError> {
        let path = self.path_for(id);
        let output = self.run_ok(&["status", "--porcelain"], &path)?;
        Ok(!output.stdout.is_empty())
    }

    /// Recovery cleanup for a task interrupted mid-`executing` (resume
    /// path, spec.md 4.12): if the worktree has uncommitted changes and
    /// `force` is false, commit them to the task branch as a recovery
    /// commit before removing the worktree; the branch is always kept.
    ///
    /// # Errors
    ///
    /// [`GitError::CommandFailed`] if any underlying git command fails.
    pub fn cleanup_incomplete(&self, id: &TaskId, force: bool) -> Result<CleanupOutcome, GitError> {
        let path = self.path_for(id);
        let dirty = !force && self.has_uncommitted_changes(id)?;

        if dirty {
            self.run_ok(&["add", "-A"], &path)?;
            self.run_ok(
                &["commit", "-m", "orchestrator: recovery commit for interrupted task"],
                &path,
            )?;
        }

        self.run_ok(&["worktree", "remove", "--force", &path.to_string_lossy()], &self.repo_root)?;

        if dirty {
            Ok(CleanupOutcome::RecoveryCommitted { branch: id.branch_name() })
        } else {
            Ok(CleanupOutcome::Clean)
        }
    }
}

fn parse_worktree_list(stdout: &str) -> Result<Vec<WorktreeEntry>, GitError> {
    let mut entries = Vec::new();
    let mut path: Option<PathBuf> = None;
    let mut head: Option<String> = None;
    let mut branch: Option<String> = None;

    for line in stdout.lines().chain(std::iter::once("")) {
        if line.is_empty() {
            if let (Some(p), Some(h)) = (path.take(), head.take()) {
                entries.push(WorktreeEntry { path: p, head: h, branch: branch.take() });
            } else {
                branch = None;
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("worktree ") {
            path = Some(PathBuf::from(rest));
        } else if let Some(rest) = line.strip_prefix("HEAD ") {
            head = Some(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("branch ") {
            branch = Some(rest.trim_start_matches("refs/heads/").to_string());
        }
    }

    if stdout.trim().is_empty() {
        return Ok(entries);
    }
    if entries.is_empty() {
        return Err(GitError::UnparseableWorktreeList);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_two_worktrees() {
        let stdout = "worktree /repo\nHEAD abcdef1234567890\nbranch refs/heads/main\n\nworktree /repo/.worktrees/t1\nHEAD 1234567890abcdef\nbranch refs/heads/task/t1\n";
        let entries = parse_worktree_list(stdout).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].branch.as_deref(), Some("main"));
        assert_eq!(entries[1].path, PathBuf::from("/repo/.worktrees/t1"));
        assert_eq!(entries[1].branch.as_deref(), Some("task/t1"));
    }

    #[test]
    fn detached_worktree_has_no_branch() {
        let stdout = "worktree /repo\nHEAD abcdef1234567890\ndetached\n";
        let entries = parse_worktree_list(stdout).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].branch, None);
    }

    #[test]
    fn empty_output_is_empty_list() {
        let entries = parse_worktree_list("").unwrap_or_else(|e| panic!("{e}"));
        assert!(entries.is_empty());
    }

    #[test]
    fn task_id_derives_expected_branch_and_dir_names() {
        let id = TaskId::new("add-healthcheck").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(id.branch_name(), "task/add-healthcheck");
    }
}
