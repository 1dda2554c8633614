//! Step C — Environment check (spec.md 4.9): a task's recorded
//! environment hash must match the orchestration-wide hash computed at
//! Stage 0.5, or the task ran against a stale dependency set.

/// Compare a task's recorded environment hash against the orchestration
/// state's current hash. Pure.
#[must_use]
pub fn environment_matches(task_recorded_hash: Option<&str>, state_hash: &str) -> bool {
    task_recorded_hash == Some(state_hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_hash_passes() {
        assert!(environment_matches(Some("abcd1234"), "abcd1234"));
    }

    #[test]
    fn stale_hash_fails() {
        assert!(!environment_matches(Some("old"), "abcd1234"));
    }

    #[test]
    fn missing_recorded_hash_fails() {
        assert!(!environment_matches(None, "abcd1234"));
    }
}
