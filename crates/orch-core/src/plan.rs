//! Plan model and validator (C1).
//!
//! A [`Plan`] is immutable after [`Plan::parse`] succeeds. Parsing is
//! parse-then-validate: a syntactically well-formed YAML/JSON document that
//! fails any hard rule in [`ValidationError`] never becomes a `Plan`.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{TaskId, TaskIdError};

/// Maximum allowed check timeout, in seconds. Declared timeouts above this
/// are silently capped (spec.md 8: "Check with `timeout: 900` => silently
/// capped to 600").
pub const MAX_CHECK_TIMEOUT_SECS: u64 = 600;

/// Default check timeout when unspecified.
pub const DEFAULT_CHECK_TIMEOUT_SECS: u64 = 300;

/// Serialized plan format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanFormat {
    /// YAML (the conventional `tasks.yaml`).
    Yaml,
    /// JSON.
    Json,
}

/// The kind of an executable [`Check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckType {
    /// A test suite invocation.
    Test,
    /// A linter invocation.
    Lint,
    /// A static type checker invocation.
    Typecheck,
    /// Anything else the plan author declares.
    Custom,
}

/// One executable verification step declared by a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    /// Command template. May reference `{modified_files}` or
    /// `{modified_tests}`, resolved by the verification pipeline.
    pub command: String,
    /// The kind of check, used by the risk scorer's test-coverage factor.
    #[serde(rename = "type")]
    pub check_type: CheckType,
    /// Whether a failure of this check fails the task.
    #[serde(default = "default_true")]
    pub required: bool,
    /// Timeout in seconds, capped at [`MAX_CHECK_TIMEOUT_SECS`].
    #[serde(default)]
    pub timeout: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl Check {
    /// The effective timeout: the declared value capped at
    /// [`MAX_CHECK_TIMEOUT_SECS`], or [`DEFAULT_CHECK_TIMEOUT_SECS`] if
    /// unspecified.
    #[must_use]
    pub fn effective_timeout_secs(&self) -> u64 {
        self.timeout
            .unwrap_or(DEFAULT_CHECK_TIMEOUT_SECS)
            .min(MAX_CHECK_TIMEOUT_SECS)
    }
}

/// A structured, high-level edit request against a hot file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    /// The hot file this intent targets.
    pub file: String,
    /// Adapter-defined action name (e.g. `add_router`).
    pub action: String,
    /// Opaque, action-specific parameters.
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

/// Runtime/dev dependency lists a task wants installed at Stage 0.5.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepsRequired {
    /// Runtime dependencies.
    #[serde(default)]
    pub runtime: Vec<String>,
    /// Development-only dependencies.
    #[serde(default)]
    pub dev: Vec<String>,
}

/// A versioned interface declaration under `contracts/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    /// Contract name, used as the key in `contracts_used`.
    pub name: String,
    /// Short commit hash recorded when the contract was created.
    pub version: String,
    /// Path to the contract file, conventionally `contracts/<name>.py`.
    pub file_path: String,
    /// Method names the contract declares.
    #[serde(default)]
    pub methods: Vec<String>,
    /// Creation timestamp (RFC 3339).
    pub created_at: String,
    /// Ids of tasks that consume this contract.
    #[serde(default)]
    pub consumers: Vec<String>,
}

/// One unit of work in a [`Plan`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Validated task identifier.
    pub id: TaskId,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Paths this task is permitted to write (boundary enforced).
    #[serde(default)]
    pub files_write: Vec<String>,
    /// Paths this task reads but does not modify.
    #[serde(default)]
    pub files_read: Vec<String>,
    /// Paths this task is permitted to append to.
    #[serde(default)]
    pub files_append: Vec<String>,
    /// Logical resources this task writes (conventionally `<kind>:<value>`).
    #[serde(default)]
    pub resources_write: Vec<String>,
    /// Logical resources this task reads.
    #[serde(default)]
    pub resources_read: Vec<String>,
    /// Ids of tasks that must complete (merge) before this one runs.
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    /// Non-empty ordered verification steps. Empty is a hard validation
    /// error.
    #[serde(default)]
    pub verification: Vec<Check>,
    /// Ordered hot-file edit intents.
    #[serde(default)]
    pub patch_intents: Vec<Intent>,
    /// Optional runtime/dev dependency lists.
    #[serde(default)]
    pub deps_required: Option<DepsRequired>,
    /// Override for the boundary pipeline's churn gate.
    #[serde(default)]
    pub allow_large_changes: bool,
}

impl Task {
    /// The union of `files_write` and `files_append`: the full set of paths
    /// this task may modify (spec.md 4.9 Step A).
    #[must_use]
    pub fn writable_paths(&self) -> HashSet<&str> {
        self.files_write
            .iter()
            .chain(self.files_append.iter())
            .map(String::as_str)
            .collect()
    }
}

/// A parsed, structurally valid plan. Immutable after [`Plan::parse`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// The human-readable change request this plan implements.
    pub request: String,
    /// Ordered list of tasks.
    pub tasks: Vec<Task>,
    /// Contracts referenced by this plan's tasks.
    #[serde(default)]
    pub contracts: Vec<Contract>,
}

/// A single plan validation failure. Plans are validated exhaustively: all
/// applicable errors are collected and returned together rather than
/// failing on the first one (spec.md 4.1: "surface all errors at once").
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// `tasks` was absent or empty.
    #[error("plan has no tasks")]
    NoTasks,
    /// A task id failed the safe-id pattern.
    #[error("task {index} has an invalid id: {source}")]
    InvalidTaskId {
        /// Index of the offending task in the raw document.
        index: usize,
        /// Underlying id error.
        source: TaskIdError,
    },
    /// Two tasks declared the same id.
    #[error("duplicate task id: {0}")]
    DuplicateTaskId(String),
    /// A task declared no `files_write`.
    #[error("task {0} has empty files_write")]
    EmptyFilesWrite(String),
    /// A task declared no verification checks.
    #[error("task {0} has empty verification (every task must have at least one check)")]
    EmptyVerification(String),
    /// A check in a task's verification list had an empty command.
    #[error("task {task} has a verification entry with an empty command")]
    EmptyCheckCommand {
        /// The owning task id.
        task: String,
    },
    /// `depends_on` referenced an id not present in the plan.
    #[error("task {task} depends on unknown task {depends_on}")]
    UnknownDependency {
        /// The dependent task id.
        task: String,
        /// The unknown id it referenced.
        depends_on: String,
    },
    /// The dependency graph contains a cycle.
    #[error("dependency cycle detected: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
    /// Two tasks share a write target without a dependency chain ordering
    /// them (see [`crate::conflict`]).
    #[error("unresolved conflict on {resource}: tasks {} (suggested fix: {suggestion})", .tasks.join(", "))]
    UnresolvedConflict {
        /// The file path or resource identifier in conflict.
        resource: String,
        /// The task ids claiming it.
        tasks: Vec<String>,
        /// Human-readable suggested dependency edge.
        suggestion: String,
    },
}

/// A non-fatal observation surfaced to the caller but not blocking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// A task has no `test`-typed check among its verification steps.
    NoTestCheck(String),
    /// The plan declares an unusually large number of files across tasks.
    LargeFileCount(usize),
}

impl Plan {
    /// Parse and structurally validate a plan document.
    ///
    /// Performs the schema-level hard checks from spec.md 4.1: non-empty
    /// tasks, valid/unique ids, non-empty `files_write`/`verification`,
    /// non-empty check commands, and that `depends_on` only references
    /// known ids. Cycle detection and conflict analysis are layered on by
    /// [`crate::dag`] and [`crate::conflict`] respectively — this function
    /// validates everything that does not require graph analysis, then
    /// additionally runs cycle detection and conflict analysis since an
    /// acyclic, conflict-free DAG is a prerequisite invariant of `Plan`
    /// itself (see [`Self::validate_full`]).
    ///
    /// # Errors
    ///
    /// Returns every applicable [`ValidationError`] found, or the raw
    /// deserialization error wrapped in [`PlanError::Parse`].
    pub fn parse(source: &str, format: PlanFormat) -> Result<Self, PlanError> {
        let raw: RawPlan = match format {
            PlanFormat::Yaml => {
                serde_yaml::from_str(source).map_err(|e| PlanError::Parse(e.to_string()))?
            }
            PlanFormat::Json => {
                serde_json::from_str(source).map_err(|e| PlanError::Parse(e.to_string()))?
            }
        };
        let plan = raw.into_plan()?;
        let errors = plan.validate_full();
        if !errors.is_empty() {
            return Err(PlanError::Invalid(errors));
        }
        Ok(plan)
    }

    /// Full validation: [`Self::validate_structure`] plus the graph-level
    /// checks that require the whole task list — cycle detection
    /// ([`crate::dag::validate`]) and unresolved write/resource conflicts
    /// ([`crate::conflict::analyze`]). Cycle detection only runs when
    /// structural validation passed, since a dangling `depends_on` would
    /// otherwise surface as a confusing cycle error instead of
    /// [`ValidationError::UnknownDependency`].
    #[must_use]
    pub fn validate_full(&self) -> Vec<ValidationError> {
        let mut errors = self.validate_structure();
        if !errors.is_empty() {
            return errors;
        }

        if let Err(crate::dag::DagError::Cycle(cycle)) = crate::dag::validate(&self.tasks) {
            errors.push(ValidationError::Cycle(cycle));
            return errors;
        }

        for conflict in crate::conflict::analyze(&self.tasks) {
            if !conflict.resolved {
                let suggestion = conflict
                    .suggested_edges
                    .iter()
                    .map(|(dependent, dependency)| format!("{dependent} depends_on {dependency}"))
                    .collect::<Vec<_>>()
                    .join("; ");
                errors.push(ValidationError::UnresolvedConflict {
                    resource: conflict.target,
                    tasks: conflict.tasks,
                    suggestion,
                });
            }
        }

        errors
    }

    /// The schema-level hard checks only: non-empty tasks, valid/unique
    /// ids, non-empty `files_write`/`verification`, non-empty check
    /// commands, and that `depends_on` only references known ids. Does not
    /// run graph analysis — see [`Self::validate_full`] for the complete
    /// check used by [`Self::parse`].
    #[must_use]
    pub fn validate_structure(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.tasks.is_empty() {
            errors.push(ValidationError::NoTasks);
            return errors;
        }

        let mut seen_ids = HashSet::new();
        for task in &self.tasks {
            if !seen_ids.insert(task.id.as_str()) {
                errors.push(ValidationError::DuplicateTaskId(task.id.as_str().to_string()));
            }
            if task.files_write.is_empty() {
                errors.push(ValidationError::EmptyFilesWrite(task.id.as_str().to_string()));
            }
            if task.verification.is_empty() {
                errors.push(ValidationError::EmptyVerification(
                    task.id.as_str().to_string(),
                ));
            }
            for check in &task.verification {
                if check.command.trim().is_empty() {
                    errors.push(ValidationError::EmptyCheckCommand {
                        task: task.id.as_str().to_string(),
                    });
                }
            }
        }

        let known_ids: HashSet<&str> = self.tasks.iter().map(|t| t.id.as_str()).collect();
        for task in &self.tasks {
            for dep in &task.depends_on {
                if !known_ids.contains(dep.as_str()) {
                    errors.push(ValidationError::UnknownDependency {
                        task: task.id.as_str().to_string(),
                        depends_on: dep.clone(),
                    });
                }
            }
        }

        errors
    }

    /// Non-fatal warnings: tasks without a test-typed check, and an
    /// unusually large total file count (feeds the risk scorer, spec.md
    /// 4.1 "Soft warnings").
    #[must_use]
    pub fn warnings(&self) -> Vec<Warning> {
        let mut warnings = Vec::new();
        for task in &self.tasks {
            let has_test = task
                .verification
                .iter()
                .any(|c| c.check_type == CheckType::Test);
            if !has_test {
                warnings.push(Warning::NoTestCheck(task.id.as_str().to_string()));
            }
        }
        let total_files: usize = self
            .tasks
            .iter()
            .map(|t| t.files_write.len() + t.files_read.len() + t.files_append.len())
            .sum();
        if total_files > 50 {
            warnings.push(Warning::LargeFileCount(total_files));
        }
        warnings
    }

    /// Serialize back to the given format (used by the round-trip law in
    /// spec.md 8: `Parse(Emit(Plan)) = Plan`).
    ///
    /// # Errors
    ///
    /// Returns a serialization error on failure.
    pub fn emit(&self, format: PlanFormat) -> Result<String, PlanError> {
        match format {
            PlanFormat::Yaml => {
                serde_yaml::to_string(self).map_err(|e| PlanError::Parse(e.to_string()))
            }
            PlanFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| PlanError::Parse(e.to_string())),
        }
    }

    /// Look up a task by id.
    #[must_use]
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id.as_str() == id)
    }
}

/// Top-level plan error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// The document failed to deserialize.
    #[error("failed to parse plan: {0}")]
    Parse(String),
    /// The document deserialized but failed structural validation.
    #[error("plan is invalid: {0:?}")]
    Invalid(Vec<ValidationError>),
}

/// Raw, pre-validation wire shape. Tasks carry a plain `String` id here;
/// `into_plan` promotes it to a validated [`TaskId`], collecting any
/// failures as [`ValidationError::InvalidTaskId`] rather than failing the
/// whole parse on the first bad id.
#[derive(Debug, Deserialize)]
struct RawPlan {
    request: String,
    tasks: Vec<RawTask>,
    #[serde(default)]
    contracts: Vec<Contract>,
}

#[derive(Debug, Deserialize)]
struct RawTask {
    id: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    files_write: Vec<String>,
    #[serde(default)]
    files_read: Vec<String>,
    #[serde(default)]
    files_append: Vec<String>,
    #[serde(default)]
    resources_write: Vec<String>,
    #[serde(default)]
    resources_read: Vec<String>,
    #[serde(default)]
    depends_on: BTreeSet<String>,
    #[serde(default)]
    verification: Vec<Check>,
    #[serde(default)]
    patch_intents: Vec<Intent>,
    #[serde(default)]
    deps_required: Option<DepsRequired>,
    #[serde(default)]
    allow_large_changes: bool,
}

impl RawPlan {
    fn into_plan(self) -> Result<Plan, PlanError> {
        let mut id_errors = Vec::new();
        let mut tasks = Vec::with_capacity(self.tasks.len());
        for (index, raw) in self.tasks.into_iter().enumerate() {
            match TaskId::new(raw.id.clone()) {
                Ok(id) => tasks.push(Task {
                    id,
                    description: raw.description,
                    files_write: raw.files_write,
                    files_read: raw.files_read,
                    files_append: raw.files_append,
                    resources_write: raw.resources_write,
                    resources_read: raw.resources_read,
                    depends_on: raw.depends_on,
                    verification: raw.verification,
                    patch_intents: raw.patch_intents,
                    deps_required: raw.deps_required,
                    allow_large_changes: raw.allow_large_changes,
                }),
                Err(source) => id_errors.push(ValidationError::InvalidTaskId { index, source }),
            }
        }
        if !id_errors.is_empty() {
            return Err(PlanError::Invalid(id_errors));
        }
        Ok(Plan {
            request: self.request,
            tasks,
            contracts: self.contracts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        r#"
request: add a health check endpoint
tasks:
  - id: a
    files_write: [src/a.py]
    verification:
      - command: "echo ok"
        type: custom
"#
    }

    #[test]
    fn parses_minimal_plan() {
        let plan = Plan::parse(minimal_yaml(), PlanFormat::Yaml)
            .unwrap_or_else(|e| panic!("expected valid plan, got {e}"));
        assert_eq!(plan.tasks.len(), 1);
    }

    #[test]
    fn empty_task_list_is_invalid() {
        let doc = "request: x\ntasks: []\n";
        let err = Plan::parse(doc, PlanFormat::Yaml).expect_err("empty tasks must be rejected");
        match err {
            PlanError::Invalid(errs) => assert!(errs.contains(&ValidationError::NoTasks)),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn empty_verification_is_rejected() {
        let doc = r#"
request: x
tasks:
  - id: a
    files_write: [src/a.py]
    verification: []
"#;
        let err = Plan::parse(doc, PlanFormat::Yaml).expect_err("empty verification must fail");
        match err {
            PlanError::Invalid(errs) => assert!(errs
                .iter()
                .any(|e| matches!(e, ValidationError::EmptyVerification(id) if id == "a"))),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let doc = r#"
request: x
tasks:
  - id: a
    files_write: [src/a.py]
    depends_on: [missing]
    verification:
      - command: "echo ok"
        type: custom
"#;
        let err = Plan::parse(doc, PlanFormat::Yaml).expect_err("unknown dep must fail");
        match err {
            PlanError::Invalid(errs) => assert!(errs.iter().any(|e| matches!(
                e,
                ValidationError::UnknownDependency { depends_on, .. } if depends_on == "missing"
            ))),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn duplicate_ids_rejected() {
        let doc = r#"
request: x
tasks:
  - id: a
    files_write: [src/a.py]
    verification: [{command: "echo ok", type: custom}]
  - id: a
    files_write: [src/b.py]
    verification: [{command: "echo ok", type: custom}]
"#;
        let err = Plan::parse(doc, PlanFormat::Yaml).expect_err("dup id must fail");
        match err {
            PlanError::Invalid(errs) => {
                assert!(errs.contains(&ValidationError::DuplicateTaskId("a".to_string())));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn timeout_is_capped_at_600() {
        let check = Check {
            command: "echo".into(),
            check_type: CheckType::Custom,
            required: true,
            timeout: Some(900),
        };
        assert_eq!(check.effective_timeout_secs(), MAX_CHECK_TIMEOUT_SECS);
    }

    #[test]
    fn dependency_cycle_is_rejected() {
        let doc = r#"
request: x
tasks:
  - id: a
    files_write: [src/a.py]
    depends_on: [b]
    verification: [{command: "echo ok", type: custom}]
  - id: b
    files_write: [src/b.py]
    depends_on: [a]
    verification: [{command: "echo ok", type: custom}]
"#;
        let err = Plan::parse(doc, PlanFormat::Yaml).expect_err("cycle must fail");
        match err {
            PlanError::Invalid(errs) => {
                assert!(errs.iter().any(|e| matches!(e, ValidationError::Cycle(_))));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unresolved_write_conflict_is_rejected_at_parse() {
        let doc = r#"
request: x
tasks:
  - id: a
    files_write: [src/shared.py]
    verification: [{command: "echo ok", type: custom}]
  - id: b
    files_write: [src/shared.py]
    verification: [{command: "echo ok", type: custom}]
"#;
        let err = Plan::parse(doc, PlanFormat::Yaml).expect_err("unresolved conflict must fail");
        match err {
            PlanError::Invalid(errs) => assert!(errs
                .iter()
                .any(|e| matches!(e, ValidationError::UnresolvedConflict { resource, .. } if resource == "src/shared.py"))),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn emit_then_parse_round_trips() {
        let plan = Plan::parse(minimal_yaml(), PlanFormat::Yaml)
            .unwrap_or_else(|e| panic!("expected valid plan, got {e}"));
        let emitted = plan
            .emit(PlanFormat::Yaml)
            .unwrap_or_else(|e| panic!("emit failed: {e}"));
        let reparsed = Plan::parse(&emitted, PlanFormat::Yaml)
            .unwrap_or_else(|e| panic!("reparse failed: {e}"));
        assert_eq!(plan.request, reparsed.request);
        assert_eq!(plan.tasks.len(), reparsed.tasks.len());
    }
}
