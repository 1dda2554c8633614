//! Adapter auto-selection: highest [`Adapter::detect_applicability`]
//! confidence, required to clear a minimum threshold.

use std::path::Path;

use crate::adapter::Adapter;

/// Minimum confidence an adapter must clear to be auto-selected.
pub const MIN_CONFIDENCE: f64 = 0.5;

/// Select the highest-confidence adapter for `project_root`, or `None`
/// if nothing clears [`MIN_CONFIDENCE`] — including when `candidates`
/// includes [`crate::adapter::GenericAdapter`], whose confidence is
/// always below the threshold, so an explicit fallback decision is left
/// to the caller rather than silently picked here.
#[must_use]
pub fn select_adapter<'a>(
    project_root: &Path,
    candidates: &'a [Box<dyn Adapter>],
) -> Option<&'a dyn Adapter> {
    let mut best: Option<(&dyn Adapter, f64)> = None;
    for candidate in candidates {
        let confidence = candidate.detect_applicability(project_root);
        let is_better = match best {
            Some((_, best_confidence)) => confidence > best_confidence,
            None => true,
        };
        if is_better {
            best = Some((candidate.as_ref(), confidence));
        }
    }
    best.filter(|(_, confidence)| *confidence >= MIN_CONFIDENCE).map(|(adapter, _)| adapter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AnchorPattern, GeneratedCode, GenericAdapter};
    use serde_json::Value;
    use std::collections::HashMap;

    struct AlwaysConfident(f64);
    impl Adapter for AlwaysConfident {
        fn name(&self) -> &str {
            "always-confident"
        }
        fn supported_actions(&self) -> &[&str] {
            &[]
        }
        fn generate(
            &self,
            _action: &str,
            _params: &serde_json::Map<String, Value>,
        ) -> Result<GeneratedCode, crate::error::IntegratorError> {
            Ok(GeneratedCode::default())
        }
        fn region_markers(&self) -> HashMap<String, (String, String)> {
            HashMap::new()
        }
        fn anchor_patterns(&self) -> HashMap<String, AnchorPattern> {
            HashMap::new()
        }
        fn implied_resources(&self, _action: &str, _params: &serde_json::Map<String, Value>) -> Vec<String> {
            Vec::new()
        }
        fn detect_applicability(&self, _project_root: &Path) -> f64 {
            self.0
        }
    }

    #[test]
    fn picks_highest_confidence_above_threshold() {
        let candidates: Vec<Box<dyn Adapter>> =
            vec![Box::new(GenericAdapter), Box::new(AlwaysConfident(0.9))];
        let selected = select_adapter(Path::new("/tmp"), &candidates).unwrap_or_else(|| panic!("expected a match"));
        assert_eq!(selected.name(), "always-confident");
    }

    #[test]
    fn nothing_above_threshold_returns_none() {
        let candidates: Vec<Box<dyn Adapter>> = vec![Box::new(GenericAdapter)];
        assert!(select_adapter(Path::new("/tmp"), &candidates).is_none());
    }
}
