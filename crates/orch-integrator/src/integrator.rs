//! Top-level entry point: apply a hot file's ordered patch intents,
//! bootstrapping region markers as needed and deduplicating per region.

use std::collections::HashSet;

use orch_core::plan::Intent;

use crate::adapter::Adapter;
use crate::error::IntegratorError;
use crate::regions;

/// Apply every intent targeting one hot file, in order, against
/// `content`. Intents are expected to have already been filtered to a
/// single `file` by the caller — the integrator itself is file-scoped.
///
/// # Errors
///
/// [`IntegratorError::UnsupportedAction`] or
/// [`IntegratorError::InvalidIntentParameter`] from [`Adapter::generate`],
/// or [`IntegratorError::RegionNotFound`] if a needed region's markers
/// could not be bootstrapped (the anchor's fallback was `serialize` or
/// `error`, or it had no anchor at all).
pub fn apply_intents(
    content: &str,
    intents: &[Intent],
    adapter: &dyn Adapter,
) -> Result<String, IntegratorError> {
    let markers = adapter.region_markers();
    let anchors = adapter.anchor_patterns();

    let mut generated = Vec::with_capacity(intents.len());
    for intent in intents {
        let code = adapter.generate(&intent.action, &intent.parameters)?;
        generated.push((intent, code));
    }

    let mut regions_needed = HashSet::new();
    for (intent, code) in &generated {
        if !code.imports.is_empty() {
            regions_needed.insert("imports".to_string());
        }
        if !code.body.is_empty() {
            regions_needed.insert(adapter.body_region(&intent.action));
        }
        if !code.config.is_empty() {
            regions_needed.insert("config".to_string());
        }
    }

    let mut content = regions::ensure_region_markers(content, &regions_needed, &markers, &anchors);

    for (intent, code) in &generated {
        if !code.imports.is_empty() {
            if let Some((start, end)) = markers.get("imports") {
                content = regions::insert_into_region(&content, start, end, "imports", &code.imports, true)?;
            } else {
                return Err(IntegratorError::RegionNotFound("imports".to_string()));
            }
        }
        if !code.body.is_empty() {
            let region_name = adapter.body_region(&intent.action);
            if let Some((start, end)) = markers.get(&region_name) {
                content = regions::insert_into_region(&content, start, end, &region_name, &code.body, true)?;
            } else {
                return Err(IntegratorError::RegionNotFound(region_name));
            }
        }
        if !code.config.is_empty() {
            if let Some((start, end)) = markers.get("config") {
                content = regions::insert_into_region(&content, start, end, "config", &code.config, true)?;
            } else {
                return Err(IntegratorError::RegionNotFound("config".to_string()));
            }
        }
    }

    Ok(content)
}

/// The union of [`Adapter::implied_resources`] across every intent,
/// fed to the conflict analyzer (C3) when a plan declares patch intents
/// instead of (or alongside) direct file writes.
#[must_use]
pub fn implied_resources(intents: &[Intent], adapter: &dyn Adapter) -> Vec<String> {
    let mut resources = Vec::new();
    for intent in intents {
        resources.extend(adapter.implied_resources(&intent.action, &intent.parameters));
    }
    resources.sort();
    resources.dedup();
    resources
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::GenericAdapter;
    use serde_json::json;

    fn intent(action: &str, params: serde_json::Value) -> Intent {
        Intent {
            file: "app.py".to_string(),
            action: action.to_string(),
            parameters: params.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn applies_import_and_body_intents_in_order() {
        let content = "# === AUTO:IMPORTS ===\n# === END:IMPORTS ===\n# === AUTO:BODY ===\n# === END:BODY ===\n";
        let intents = vec![
            intent("add_import", json!({"import_line": "import os"})),
            intent("append_to_list", json!({"item": "handler"})),
        ];
        let updated = apply_intents(content, &intents, &GenericAdapter).unwrap_or_else(|e| panic!("{e}"));
        assert!(updated.contains("import os"));
        assert!(updated.contains("handler,"));
    }

    #[test]
    fn missing_region_with_no_anchor_errors() {
        let content = "nothing here";
        let intents = vec![intent("add_import", json!({"import_line": "import os"}))];
        let err = apply_intents(content, &intents, &GenericAdapter).expect_err("must fail");
        assert!(matches!(err, IntegratorError::RegionNotFound(region) if region == "imports"));
    }

    #[test]
    fn implied_resources_are_deduped_and_sorted() {
        let intents =
            vec![intent("add_import", json!({"import_line": "import os"})), intent("add_import", json!({"import_line": "import sys"}))];
        assert!(implied_resources(&intents, &GenericAdapter).is_empty());
    }
}
