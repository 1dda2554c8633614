//! `.claude-agents.yaml` configuration schema.
//!
//! Grounded in `examples/original_source/src/claude_orchestrator/schemas/config.py`
//! (the pydantic model the distilled spec's `config file` section summarizes).
//! All fields have defaults so an absent or partial config file degrades to
//! sane behavior (spec.md 6: config fields each declare their own default).

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::risk::RiskConfig;

/// Error loading or parsing `.claude-agents.yaml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// The file's contents failed to parse as YAML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// `orchestration.*` settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationSettings {
    /// Maximum number of tasks executed in parallel within a wave.
    pub max_parallel_workers: usize,
    /// Maximum retry iterations before a task/plan is marked failed.
    pub max_iterations: u32,
    /// Directory (relative to repo root) holding task worktrees.
    pub worktree_dir: String,
    /// Default per-task timeout in seconds (C7 monitor).
    pub task_timeout_secs: u64,
    /// Monitor poll interval in seconds.
    pub poll_interval_secs: u64,
    /// The branch tasks are created from and merged into.
    pub base_branch: String,
}

impl Default for OrchestrationSettings {
    fn default() -> Self {
        Self {
            max_parallel_workers: 5,
            max_iterations: 3,
            worktree_dir: ".worktrees".into(),
            task_timeout_secs: 1800,
            poll_interval_secs: 30,
            base_branch: "main".into(),
        }
    }
}

/// `boundaries.*` settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundarySettings {
    /// Maximum changed lines before a diff is rejected as excessive churn.
    pub churn_threshold_lines: usize,
    /// Extensions where a whitespace-only diff is rejected as
    /// formatting-only churn.
    pub formatting_check_allowlist: Vec<String>,
    /// Extensions (or filenames) exempt from the formatting-only check
    /// because whitespace is semantic there.
    pub formatting_check_denylist: Vec<String>,
    /// Regex patterns for paths no task may ever modify.
    pub forbidden_patterns: Vec<String>,
}

impl Default for BoundarySettings {
    fn default() -> Self {
        Self {
            churn_threshold_lines: 500,
            formatting_check_allowlist: vec![
                ".js", ".ts", ".jsx", ".tsx", ".json", ".css", ".html", ".java", ".go", ".rs",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            formatting_check_denylist: vec![".py", ".yaml", ".yml", ".mk", "Makefile"]
                .into_iter()
                .map(String::from)
                .collect(),
            forbidden_patterns: vec![
                r"node_modules/",
                r"__pycache__/",
                r"\.pyc$",
                r"(^|/)\.env",
                r"vendor/",
                r"dist/",
                r"build/",
                r"\.generated\.",
                r"\.min\.(js|css)$",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// A single ecosystem's package manager/manifest/lockfile triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EcosystemConfig {
    /// Package manager binary name (npm, pnpm, uv, cargo, ...).
    pub manager: String,
    /// Manifest file name.
    pub manifest: String,
    /// Lockfile name.
    pub lockfile: String,
}

/// `dependencies.*` settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencySettings {
    /// Per-ecosystem manager/manifest/lockfile declarations.
    pub ecosystems: BTreeMap<String, EcosystemConfig>,
    /// Whether workers may install their own dependencies (spec default:
    /// no — only the supervisor, at Stage 0.5, installs deps).
    pub allow_worker_installs: bool,
}

impl Default for DependencySettings {
    fn default() -> Self {
        Self {
            ecosystems: BTreeMap::new(),
            allow_worker_installs: false,
        }
    }
}

/// `contracts.*` settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContractSettings {
    /// Maximum number of contract renegotiations allowed per orchestration.
    pub max_renegotiations: u32,
}

impl Default for ContractSettings {
    fn default() -> Self {
        Self { max_renegotiations: 2 }
    }
}

/// `patch_intents.*` settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchIntentSettings {
    /// Whether the integrator is enabled at all.
    pub enabled: bool,
    /// Adapter selection: `"auto"` or a specific adapter name.
    pub adapter: String,
    /// Fallback behavior when a needed region's anchor can't be found:
    /// `serialize`, `error`, `end_of_imports`, `start_of_file`,
    /// `end_of_file`.
    pub fallback: String,
}

impl Default for PatchIntentSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            adapter: "auto".into(),
            fallback: "serialize".into(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// One global barrier or post-merge check command (supplements spec.md
/// 4.12 step 6's "run global verification").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarrierCheck {
    /// Display name.
    pub name: String,
    /// Shell command to run.
    pub command: String,
    /// Whether failure blocks completion.
    #[serde(default = "default_true")]
    pub required: bool,
}

/// `quality.*` and `phases.*` settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualitySettings {
    /// Commands run at the stabilization gate after the last wave.
    pub post_merge_checks: Vec<String>,
    /// Additional named barrier checks between waves.
    pub barrier_checks: Vec<BarrierCheck>,
    /// Whether the stabilization gate runs at all.
    pub stabilization_gate: bool,
}

impl Default for QualitySettings {
    fn default() -> Self {
        Self {
            post_merge_checks: Vec::new(),
            barrier_checks: Vec::new(),
            stabilization_gate: true,
        }
    }
}

/// Full `.claude-agents.yaml` configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    /// Orchestration loop tuning.
    pub orchestration: OrchestrationSettings,
    /// Risk scorer thresholds and sensitive patterns.
    pub approval: RiskConfig,
    /// Boundary check tuning.
    pub boundaries: BoundarySettings,
    /// Dependency install / ecosystem declarations.
    pub dependencies: DependencySettings,
    /// Contract renegotiation budget.
    pub contracts: ContractSettings,
    /// Integrator adapter selection.
    pub patch_intents: PatchIntentSettings,
    /// Stabilization gate and barrier checks.
    pub quality: QualitySettings,
}

/// Common lockfile basenames checked regardless of configured ecosystems.
const COMMON_LOCKFILES: &[&str] = &[
    "package-lock.json",
    "pnpm-lock.yaml",
    "yarn.lock",
    "uv.lock",
    "poetry.lock",
    "requirements.lock",
    "Pipfile.lock",
    "Cargo.lock",
    "go.sum",
    "Gemfile.lock",
    "packages.lock.json",
    "composer.lock",
];

impl OrchestrationConfig {
    /// Load configuration from `path`, returning defaults if the file does
    /// not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file exists but can't be read or
    /// parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_yaml::from_str(&text)?;
        Ok(config)
    }

    /// Plain basenames (no regex) for every configured ecosystem lockfile
    /// unioned with [`COMMON_LOCKFILES`], deduplicated, in stable order.
    /// Feeds the Environment Hasher (C11), which hashes literal filenames
    /// rather than matching patterns.
    #[must_use]
    pub fn lockfile_names(&self) -> Vec<String> {
        let mut names: Vec<String> =
            self.dependencies.ecosystems.values().map(|eco| eco.lockfile.clone()).collect();
        for name in COMMON_LOCKFILES {
            if !names.iter().any(|n| n == name) {
                names.push((*name).to_string());
            }
        }
        names
    }

    /// Anchored regexes (`(^|/)<escaped>$`) for every configured ecosystem
    /// lockfile unioned with [`COMMON_LOCKFILES`], deduplicated.
    #[must_use]
    pub fn lockfile_patterns(&self) -> Vec<String> {
        let mut patterns = Vec::new();
        for eco in self.dependencies.ecosystems.values() {
            let pattern = format!("(^|/){}$", regex::escape(&eco.lockfile));
            if !patterns.contains(&pattern) {
                patterns.push(pattern);
            }
        }
        for name in COMMON_LOCKFILES {
            let pattern = format!("(^|/){}$", regex::escape(name));
            if !patterns.contains(&pattern) {
                patterns.push(pattern);
            }
        }
        patterns
    }

    /// Compile [`Self::lockfile_patterns`] into regexes, dropping (rather
    /// than failing on) any that do not compile.
    #[must_use]
    pub fn lockfile_regexes(&self) -> Vec<Regex> {
        self.lockfile_patterns()
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_worktree_dir() {
        let config = OrchestrationConfig::default();
        assert_eq!(config.orchestration.worktree_dir, ".worktrees");
        assert_eq!(config.orchestration.max_iterations, 3);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let config = OrchestrationConfig::load(Path::new("/nonexistent/path/config.yaml"))
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(config.contracts.max_renegotiations, 2);
    }

    #[test]
    fn lockfile_patterns_include_common_and_ecosystem() {
        let mut config = OrchestrationConfig::default();
        config.dependencies.ecosystems.insert(
            "python".into(),
            EcosystemConfig {
                manager: "uv".into(),
                manifest: "pyproject.toml".into(),
                lockfile: "uv.lock".into(),
            },
        );
        let patterns = config.lockfile_patterns();
        assert!(patterns.iter().any(|p| p.contains("uv.lock")));
        assert!(patterns.iter().any(|p| p.contains("Cargo.lock")));
    }
}
