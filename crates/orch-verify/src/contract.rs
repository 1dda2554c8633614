//! Step D — Contract check (spec.md 4.9): every contract a task recorded
//! using must still exist in the plan and match the version its file
//! declares. A mismatch is a hard failure; renegotiating a contract
//! (bumping its version) is allowed only up to a configured budget.

use std::collections::BTreeMap;
use std::path::Path;

use orch_core::plan::Contract;
use orch_state::ContractUsage;
use regex::Regex;

use crate::error::VerifyError;

/// One contract-check failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractViolation {
    /// A task recorded usage of a contract the plan no longer declares.
    UnknownContract(String),
    /// The contract file's `Version:` header doesn't match what the task
    /// recorded.
    VersionMismatch {
        /// Contract name.
        name: String,
        /// Version the task built against.
        recorded: String,
        /// Version the contract file currently declares.
        current: String,
    },
    /// The contract file could not be read or had no `Version:` header.
    UnparseableContractFile(String),
    /// A version mismatch was found but the renegotiation budget for this
    /// orchestration is already exhausted.
    RenegotiationBudgetExceeded {
        /// Contract name.
        name: String,
        /// Renegotiations already used.
        used: u32,
        /// Configured maximum.
        max: u32,
    },
}

fn extract_version(content: &str) -> Option<String> {
    let re = Regex::new(r"(?m)^\s*#?\s*Version:\s*(\S+)").ok()?;
    re.captures(content).and_then(|c| c.get(1)).map(|m| m.as_str().to_string())
}

/// Verify every entry in `contracts_used` against `plan_contracts` and
/// the actual contract file on disk.
///
/// # Errors
///
/// [`VerifyError::Io`] if a contract file exists but can't be read (a
/// missing file is instead reported as [`ContractViolation::UnparseableContractFile`]).
pub fn check_contracts(
    plan_contracts: &[Contract],
    contracts_used: &BTreeMap<String, ContractUsage>,
    repo_root: &Path,
    renegotiations_used: u32,
    max_renegotiations: u32,
) -> Result<Vec<ContractViolation>, VerifyError> {
    let mut violations = Vec::new();

    for (name, usage) in contracts_used {
        let Some(contract) = plan_contracts.iter().find(|c| &c.name == name) else {
            violations.push(ContractViolation::UnknownContract(name.clone()));
            continue;
        };

        let path = repo_root.join(&contract.file_path);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(_) => {
                violations.push(ContractViolation::UnparseableContractFile(name.clone()));
                continue;
            }
        };

        let Some(current_version) = extract_version(&content) else {
            violations.push(ContractViolation::UnparseableContractFile(name.clone()));
            continue;
        };

        if current_version != usage.version {
            violations.push(ContractViolation::VersionMismatch {
                name: name.clone(),
                recorded: usage.version.clone(),
                current: current_version,
            });
            if renegotiations_used >= max_renegotiations {
                violations.push(ContractViolation::RenegotiationBudgetExceeded {
                    name: name.clone(),
                    used: renegotiations_used,
                    max: max_renegotiations,
                });
            }
        }
    }

    Ok(violations)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract(name: &str, file_path: &str) -> Contract {
        Contract {
            name: name.to_string(),
            version: "abc123".to_string(),
            file_path: file_path.to_string(),
            methods: Vec::new(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            consumers: Vec::new(),
        }
    }

    #[test]
    fn matching_version_has_no_violations() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        std::fs::write(dir.path().join("auth.py"), "# Version: abc123\nclass Auth:\n    pass\n")
            .unwrap_or_else(|e| panic!("{e}"));

        let contracts = vec![contract("auth", "auth.py")];
        let mut used = BTreeMap::new();
        used.insert("auth".to_string(), ContractUsage { version: "abc123".to_string(), methods_used: vec![] });

        let violations = check_contracts(&contracts, &used, dir.path(), 0, 2).unwrap_or_else(|e| panic!("{e}"));
        assert!(violations.is_empty());
    }

    #[test]
    fn version_mismatch_within_budget_is_reported_but_not_exhausted() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        std::fs::write(dir.path().join("auth.py"), "# Version: def456\n").unwrap_or_else(|e| panic!("{e}"));

        let contracts = vec![contract("auth", "auth.py")];
        let mut used = BTreeMap::new();
        used.insert("auth".to_string(), ContractUsage { version: "abc123".to_string(), methods_used: vec![] });

        let violations = check_contracts(&contracts, &used, dir.path(), 0, 2).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(violations.len(), 1);
        assert!(matches!(&violations[0], ContractViolation::VersionMismatch { .. }));
    }

    #[test]
    fn version_mismatch_over_budget_also_reports_exhaustion() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        std::fs::write(dir.path().join("auth.py"), "# Version: def456\n").unwrap_or_else(|e| panic!("{e}"));

        let contracts = vec![contract("auth", "auth.py")];
        let mut used = BTreeMap::new();
        used.insert("auth".to_string(), ContractUsage { version: "abc123".to_string(), methods_used: vec![] });

        let violations = check_contracts(&contracts, &used, dir.path(), 2, 2).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(violations.len(), 2);
        assert!(violations.iter().any(|v| matches!(v, ContractViolation::RenegotiationBudgetExceeded { .. })));
    }

    #[test]
    fn unknown_contract_is_reported() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let mut used = BTreeMap::new();
        used.insert("ghost".to_string(), ContractUsage { version: "abc123".to_string(), methods_used: vec![] });

        let violations = check_contracts(&[], &used, dir.path(), 0, 2).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(violations, vec![ContractViolation::UnknownContract("ghost".to_string())]);
    }
}
