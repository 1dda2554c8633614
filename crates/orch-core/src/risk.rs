//! Risk scorer (C4): a deterministic weighted sum of plan factors,
//! producing an auto-approve/review verdict.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::plan::{CheckType, Plan};

/// A sensitive-path pattern and its weight, loaded from
/// `approval.sensitive_patterns` in config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensitivePattern {
    /// Regex matched against every declared file path across the plan.
    pub pattern: String,
    /// Score contribution per matching path.
    pub weight: i64,
}

/// Risk scorer configuration (`approval.*` in `.claude-agents.yaml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Score at or below which a plan is auto-approved.
    #[serde(default = "default_threshold")]
    pub auto_approve_threshold: i64,
    /// Sensitive-path patterns and weights.
    #[serde(default = "default_patterns")]
    pub sensitive_patterns: Vec<SensitivePattern>,
}

fn default_threshold() -> i64 {
    25
}

fn default_patterns() -> Vec<SensitivePattern> {
    vec![
        SensitivePattern { pattern: "auth|security|crypto".into(), weight: 20 },
        SensitivePattern { pattern: "payment|billing".into(), weight: 25 },
        SensitivePattern { pattern: "prod|deploy".into(), weight: 30 },
        SensitivePattern { pattern: "migration|schema".into(), weight: 15 },
        SensitivePattern { pattern: "env|secret".into(), weight: 20 },
    ]
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            auto_approve_threshold: default_threshold(),
            sensitive_patterns: default_patterns(),
        }
    }
}

/// One line item contributing to the total risk score, kept for
/// human-readable reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskFactor {
    /// Short name of the factor (e.g. `"sensitive_path:auth|security|crypto"`).
    pub name: String,
    /// Points contributed (always >= 0; negative contributions don't occur
    /// in this model).
    pub contribution: i64,
}

/// Full risk assessment of a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Individual contributing factors, in evaluation order.
    pub factors: Vec<RiskFactor>,
    /// Sum of all factor contributions.
    pub score: i64,
    /// `true` iff `score <= threshold`.
    pub auto_approve: bool,
    /// Regex patterns from config that failed to compile and were
    /// dropped (never fail the scorer on a bad pattern).
    pub dropped_patterns: Vec<String>,
}

/// Score a plan against `config`.
///
/// Never fails: an invalid regex in `sensitive_patterns` is skipped and
/// recorded in [`RiskAssessment::dropped_patterns`] rather than aborting
/// the scorer (spec.md 4.4).
#[must_use]
pub fn score(plan: &Plan, config: &RiskConfig) -> RiskAssessment {
    let mut factors = Vec::new();
    let mut dropped_patterns = Vec::new();

    let all_paths: Vec<&str> = plan
        .tasks
        .iter()
        .flat_map(|t| {
            t.files_write
                .iter()
                .chain(t.files_read.iter())
                .chain(t.files_append.iter())
        })
        .map(String::as_str)
        .collect();

    for sp in &config.sensitive_patterns {
        match Regex::new(&sp.pattern) {
            Ok(re) => {
                let hits = all_paths.iter().filter(|p| re.is_match(p)).count();
                if hits > 0 {
                    factors.push(RiskFactor {
                        name: format!("sensitive_path:{}", sp.pattern),
                        contribution: sp.weight,
                    });
                }
            }
            Err(_) => dropped_patterns.push(sp.pattern.clone()),
        }
    }

    let task_count = plan.tasks.len();
    if task_count > 5 {
        factors.push(RiskFactor {
            name: "task_count".into(),
            contribution: i64::try_from(task_count - 5).unwrap_or(i64::MAX) * 5,
        });
    }

    let total_files: usize = plan
        .tasks
        .iter()
        .map(|t| t.files_write.len() + t.files_read.len() + t.files_append.len())
        .sum();
    if total_files > 10 {
        factors.push(RiskFactor {
            name: "total_files".into(),
            contribution: i64::try_from(total_files - 10).unwrap_or(i64::MAX) * 3,
        });
    }

    let total_intents: usize = plan.tasks.iter().map(|t| t.patch_intents.len()).sum();
    if total_intents > 3 {
        factors.push(RiskFactor {
            name: "patch_intents".into(),
            contribution: i64::try_from(total_intents - 3).unwrap_or(i64::MAX) * 5,
        });
    }

    let new_runtime_deps: usize = plan
        .tasks
        .iter()
        .filter_map(|t| t.deps_required.as_ref())
        .map(|d| d.runtime.len())
        .sum();
    if new_runtime_deps > 0 {
        factors.push(RiskFactor {
            name: "new_runtime_deps".into(),
            contribution: i64::try_from(new_runtime_deps).unwrap_or(i64::MAX) * 3,
        });
    }

    if plan.contracts.len() > 3 {
        factors.push(RiskFactor {
            name: "contracts".into(),
            contribution: i64::try_from(plan.contracts.len() - 3).unwrap_or(i64::MAX) * 5,
        });
    }

    if task_count > 0 {
        let without_test = plan
            .tasks
            .iter()
            .filter(|t| !t.verification.iter().any(|c| c.check_type == CheckType::Test))
            .count();
        #[allow(clippy::cast_precision_loss)]
        let fraction = without_test as f64 / task_count as f64;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let contribution = (fraction * 20.0).round() as i64;
        if contribution > 0 {
            factors.push(RiskFactor {
                name: "missing_test_coverage".into(),
                contribution,
            });
        }
    }

    let score: i64 = factors.iter().map(|f| f.contribution).sum();
    let auto_approve = score <= config.auto_approve_threshold;

    RiskAssessment {
        factors,
        score,
        auto_approve,
        dropped_patterns,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::TaskId;
    use crate::plan::{Check, Task};

    fn task(id: &str, files: &[&str], test_check: bool) -> Task {
        Task {
            id: TaskId::new(id).unwrap_or_else(|_| unreachable!()),
            description: String::new(),
            files_write: files.iter().map(|s| (*s).to_string()).collect(),
            files_read: vec![],
            files_append: vec![],
            resources_write: vec![],
            resources_read: vec![],
            depends_on: Default::default(),
            verification: vec![Check {
                command: "echo ok".into(),
                check_type: if test_check { CheckType::Test } else { CheckType::Custom },
                required: true,
                timeout: None,
            }],
            patch_intents: vec![],
            deps_required: None,
            allow_large_changes: false,
        }
    }

    #[test]
    fn trivial_plan_auto_approves() {
        let plan = Plan {
            request: "x".into(),
            tasks: vec![task("a", &["src/a.py"], true)],
            contracts: vec![],
        };
        let assessment = score(&plan, &RiskConfig::default());
        assert!(assessment.auto_approve);
        assert_eq!(assessment.score, 0);
    }

    #[test]
    fn sensitive_path_adds_weight() {
        let plan = Plan {
            request: "x".into(),
            tasks: vec![task("a", &["src/auth/login.py"], true)],
            contracts: vec![],
        };
        let assessment = score(&plan, &RiskConfig::default());
        assert!(assessment.score >= 20);
    }

    #[test]
    fn missing_test_coverage_contributes() {
        let plan = Plan {
            request: "x".into(),
            tasks: vec![task("a", &["src/a.py"], false)],
            contracts: vec![],
        };
        let assessment = score(&plan, &RiskConfig::default());
        assert!(assessment
            .factors
            .iter()
            .any(|f| f.name == "missing_test_coverage"));
    }

    #[test]
    fn invalid_regex_is_dropped_not_fatal() {
        let config = RiskConfig {
            auto_approve_threshold: 25,
            sensitive_patterns: vec![SensitivePattern {
                pattern: "(unclosed".into(),
                weight: 99,
            }],
        };
        let plan = Plan {
            request: "x".into(),
            tasks: vec![task("a", &["src/a.py"], true)],
            contracts: vec![],
        };
        let assessment = score(&plan, &config);
        assert_eq!(assessment.dropped_patterns, vec!["(unclosed".to_string()]);
        assert_eq!(assessment.score, 0);
    }
}
