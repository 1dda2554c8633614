//! Conflict analyzer (C3): detects file-write and logical-resource
//! collisions between tasks that are not already serialized by a
//! dependency chain.

use std::collections::{BTreeMap, HashSet};

use crate::dag::ordered_in_chain;
use crate::plan::{Intent, Task};

/// Maps an intent action to the logical resources it implies, e.g.
/// `add_router` with `{"prefix": "/auth"}` implies `route:/auth`.
///
/// This is a fixed mapping shared with the integrator's adapter layer
/// (spec.md 4.3, 4.10); unknown actions imply no resources.
#[must_use]
pub fn implied_resources(intent: &Intent) -> Vec<String> {
    let param = |key: &str| -> Option<String> {
        intent
            .parameters
            .get(key)
            .and_then(|v| v.as_str())
            .map(ToString::to_string)
    };

    match intent.action.as_str() {
        "add_router" => param("prefix")
            .map(|p| vec![format!("route:{p}")])
            .unwrap_or_default(),
        "add_middleware" => param("class_name")
            .map(|c| vec![format!("middleware:{c}")])
            .unwrap_or_default(),
        "add_dependency_injection" | "add_di" => param("name")
            .map(|n| vec![format!("di:{n}")])
            .unwrap_or_default(),
        "add_config" | "set_config" => param("key")
            .map(|k| vec![format!("config:{k}")])
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// All resources a task claims: explicit `resources_write` plus every
/// resource implied by its `patch_intents`.
#[must_use]
pub fn claimed_resources(task: &Task) -> HashSet<String> {
    let mut set: HashSet<String> = task.resources_write.iter().cloned().collect();
    for intent in &task.patch_intents {
        set.extend(implied_resources(intent));
    }
    set
}

/// The kind of collision target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// Two or more tasks write the same file path.
    File,
    /// Two or more tasks claim the same logical resource.
    Resource,
}

/// One detected collision, resolved or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// The colliding file path or resource identifier.
    pub target: String,
    /// Which kind of collision this is.
    pub kind: ConflictKind,
    /// Task ids (sorted) claiming the target.
    pub tasks: Vec<String>,
    /// True if the colliding tasks form a single dependency chain (the
    /// conflict is resolved, not an error).
    pub resolved: bool,
    /// Suggested dependency edges `(dependent, dependency)` that would
    /// serialize an unresolved conflict, in claim order.
    pub suggested_edges: Vec<(String, String)>,
}

/// Analyze a task list for file and resource conflicts.
///
/// Conflicts whose tasks form a linear dependency chain ([`ordered_in_chain`])
/// are reported with `resolved = true`; everything else is `resolved =
/// false` and should cause the plan to be rejected (spec.md 4.1, 4.3).
#[must_use]
pub fn analyze(tasks: &[Task]) -> Vec<Conflict> {
    let mut by_file: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    let mut by_resource: BTreeMap<String, Vec<&str>> = BTreeMap::new();

    for task in tasks {
        for file in &task.files_write {
            by_file.entry(file.as_str()).or_default().push(task.id.as_str());
        }
        for resource in claimed_resources(task) {
            by_resource.entry(resource).or_default().push(task.id.as_str());
        }
    }

    let mut conflicts = Vec::new();

    for (file, mut owners) in by_file {
        if owners.len() < 2 {
            continue;
        }
        owners.sort_unstable();
        owners.dedup();
        if owners.len() < 2 {
            continue;
        }
        conflicts.push(build_conflict(file, ConflictKind::File, &owners, tasks));
    }

    for (resource, mut owners) in by_resource {
        if owners.len() < 2 {
            continue;
        }
        owners.sort_unstable();
        owners.dedup();
        if owners.len() < 2 {
            continue;
        }
        conflicts.push(build_conflict(&resource, ConflictKind::Resource, &owners, tasks));
    }

    conflicts
}

fn build_conflict(target: &str, kind: ConflictKind, owners: &[&str], tasks: &[Task]) -> Conflict {
    let id_set: HashSet<String> = owners.iter().map(|s| (*s).to_string()).collect();
    let resolved = ordered_in_chain(&id_set, tasks);
    let suggested_edges = if resolved {
        Vec::new()
    } else {
        owners
            .windows(2)
            .map(|pair| (pair[1].to_string(), pair[0].to_string()))
            .collect()
    };
    Conflict {
        target: target.to_string(),
        kind,
        tasks: owners.iter().map(|s| (*s).to_string()).collect(),
        resolved,
        suggested_edges,
    }
}

/// True if every conflict in `tasks` is resolved by an existing dependency
/// chain (i.e. the plan should be accepted per spec.md invariant 4).
#[must_use]
pub fn all_resolved(tasks: &[Task]) -> bool {
    analyze(tasks).iter().all(|c| c.resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::TaskId;
    use crate::plan::{Check, CheckType};
    use serde_json::json;

    fn task_with(id: &str, files: &[&str], deps: &[&str], intents: Vec<Intent>) -> Task {
        Task {
            id: TaskId::new(id).unwrap_or_else(|_| unreachable!()),
            description: String::new(),
            files_write: files.iter().map(|s| (*s).to_string()).collect(),
            files_read: vec![],
            files_append: vec![],
            resources_write: vec![],
            resources_read: vec![],
            depends_on: deps.iter().map(|s| (*s).to_string()).collect(),
            verification: vec![Check {
                command: "echo ok".into(),
                check_type: CheckType::Custom,
                required: true,
                timeout: None,
            }],
            patch_intents: intents,
            deps_required: None,
            allow_large_changes: false,
        }
    }

    #[test]
    fn no_conflict_for_disjoint_files() {
        let tasks = vec![
            task_with("a", &["src/a.py"], &[], vec![]),
            task_with("b", &["src/b.py"], &[], vec![]),
        ];
        assert!(analyze(&tasks).is_empty());
    }

    #[test]
    fn unresolved_file_conflict_without_dependency() {
        let tasks = vec![
            task_with("a", &["src/shared.py"], &[], vec![]),
            task_with("b", &["src/shared.py"], &[], vec![]),
        ];
        let conflicts = analyze(&tasks);
        assert_eq!(conflicts.len(), 1);
        assert!(!conflicts[0].resolved);
        assert_eq!(conflicts[0].suggested_edges, vec![("b".to_string(), "a".to_string())]);
    }

    #[test]
    fn resolved_file_conflict_with_dependency_chain() {
        let tasks = vec![
            task_with("a", &["src/shared.py"], &[], vec![]),
            task_with("b", &["src/shared.py"], &["a"], vec![]),
        ];
        let conflicts = analyze(&tasks);
        assert_eq!(conflicts.len(), 1);
        assert!(conflicts[0].resolved);
    }

    #[test]
    fn resource_conflict_from_patch_intents() {
        let make_intent = || Intent {
            file: "app.py".into(),
            action: "add_router".into(),
            parameters: json!({"prefix": "/auth"}).as_object().cloned().unwrap_or_default(),
        };
        let tasks = vec![
            task_with("a", &["src/a.py"], &[], vec![make_intent()]),
            task_with("b", &["src/b.py"], &[], vec![make_intent()]),
        ];
        let conflicts = analyze(&tasks);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::Resource);
        assert_eq!(conflicts[0].target, "route:/auth");
        assert!(!conflicts[0].resolved);
    }
}
