//! The [`Adapter`] trait: framework-specific code generation, region
//! marker conventions, and implied-resource declarations for the
//! Integrator (C10).

use std::collections::HashMap;
use std::path::Path;

use serde_json::Value;

use crate::error::IntegratorError;

/// Multi-region output from adapter code generation. Each slice goes to
/// its own region: `imports` to the `imports` region, `body` to the
/// action-specific region, `config` to the `config` region (if the
/// adapter declares one).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratedCode {
    /// Lines to add to the file's imports region.
    pub imports: Vec<String>,
    /// Lines to add to the action's body region.
    pub body: Vec<String>,
    /// Lines to add to the file's config region.
    pub config: Vec<String>,
}

/// Where a region's markers should be inserted when they don't already
/// exist in a hot file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorPattern {
    /// Filenames this anchor applies to (e.g. `["main.py", "app.py"]`).
    pub target_files: Vec<String>,
    /// Regex searched for, line by line, to find the insertion point.
    pub anchor_regex: String,
    /// Whether markers go before or after the matched line.
    pub position: Position,
    /// What to do when the anchor regex doesn't match anything.
    pub fallback: Fallback,
}

/// Marker insertion position relative to an anchor match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// Insert immediately after the matched line.
    After,
    /// Insert immediately before the matched line.
    Before,
}

/// What an anchor does when its regex finds no match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    /// Insert at the end of the file.
    EndOfFile,
    /// Insert at the start of the file.
    StartOfFile,
    /// Insert after the last recognized import statement.
    EndOfImports,
    /// Refuse to bootstrap the region; intents targeting it must be
    /// applied strictly sequentially across tasks instead.
    Serialize,
    /// Refuse and surface a hard error.
    Error,
}

/// Framework-specific code generation and region-marker conventions.
/// Adapters are stateless: all per-call context arrives as parameters.
pub trait Adapter {
    /// Adapter identifier (e.g. `"fastapi-python"`, `"generic"`).
    fn name(&self) -> &str;

    /// Actions this adapter knows how to generate code for.
    fn supported_actions(&self) -> &[&str];

    /// Generate the multi-region code for one intent.
    ///
    /// # Errors
    ///
    /// [`IntegratorError::UnsupportedAction`] if `action` isn't in
    /// [`Self::supported_actions`], or
    /// [`IntegratorError::InvalidIntentParameter`] if a required
    /// parameter is missing or malformed.
    fn generate(
        &self,
        action: &str,
        params: &serde_json::Map<String, Value>,
    ) -> Result<GeneratedCode, IntegratorError>;

    /// Region name -> `(start_marker, end_marker)`.
    fn region_markers(&self) -> HashMap<String, (String, String)>;

    /// Region name -> anchor pattern used to bootstrap its markers.
    fn anchor_patterns(&self) -> HashMap<String, AnchorPattern>;

    /// Logical resources this intent implies (fed to the conflict
    /// analyzer, C3).
    fn implied_resources(&self, action: &str, params: &serde_json::Map<String, Value>) -> Vec<String>;

    /// Confidence in `[0, 1]` that this adapter applies to the project
    /// rooted at `project_root`.
    fn detect_applicability(&self, project_root: &Path) -> f64;

    /// Which region an action's `body` output belongs to. Defaults to a
    /// single shared `"body"` region; adapters with multiple
    /// action-specific regions (e.g. `AUTO:ROUTERS` vs `AUTO:MIDDLEWARE`)
    /// override this.
    fn body_region(&self, _action: &str) -> String {
        "body".to_string()
    }
}

fn require_str<'a>(
    params: &'a serde_json::Map<String, Value>,
    action: &str,
    field: &str,
) -> Result<&'a str, IntegratorError> {
    params.get(field).and_then(Value::as_str).ok_or_else(|| IntegratorError::InvalidIntentParameter {
        action: action.to_string(),
        field: field.to_string(),
    })
}

/// Fallback adapter used when no framework-specific adapter's confidence
/// clears the auto-selection threshold. Supports only the
/// lowest-common-denominator actions every codebase can express, and
/// never auto-bootstraps region markers (`anchor_patterns` is empty) —
/// files must already carry them, or intents targeting them serialize.
pub struct GenericAdapter;

impl Adapter for GenericAdapter {
    fn name(&self) -> &str {
        "generic"
    }

    fn supported_actions(&self) -> &[&str] {
        &["add_import", "append_to_list", "add_line"]
    }

    fn generate(
        &self,
        action: &str,
        params: &serde_json::Map<String, Value>,
    ) -> Result<GeneratedCode, IntegratorError> {
        match action {
            "add_import" => {
                let line = require_str(params, action, "import_line")?;
                Ok(GeneratedCode { imports: vec![line.to_string()], ..Default::default() })
            }
            "append_to_list" => {
                let item = require_str(params, action, "item")?;
                Ok(GeneratedCode { body: vec![format!("    {item},")], ..Default::default() })
            }
            "add_line" => {
                let line = require_str(params, action, "line")?;
                let region = params.get("region").and_then(Value::as_str).unwrap_or("body");
                match region {
                    "imports" => Ok(GeneratedCode { imports: vec![line.to_string()], ..Default::default() }),
                    "config" => Ok(GeneratedCode { config: vec![line.to_string()], ..Default::default() }),
                    _ => Ok(GeneratedCode { body: vec![line.to_string()], ..Default::default() }),
                }
            }
            other => Err(IntegratorError::UnsupportedAction {
                adapter: self.name().to_string(),
                action: other.to_string(),
            }),
        }
    }

    fn region_markers(&self) -> HashMap<String, (String, String)> {
        [
            ("imports".to_string(), ("# === AUTO:IMPORTS ===".to_string(), "# === END:IMPORTS ===".to_string())),
            ("body".to_string(), ("# === AUTO:BODY ===".to_string(), "# === END:BODY ===".to_string())),
        ]
        .into_iter()
        .collect()
    }

    fn anchor_patterns(&self) -> HashMap<String, AnchorPattern> {
        HashMap::new()
    }

    fn implied_resources(&self, _action: &str, _params: &serde_json::Map<String, Value>) -> Vec<String> {
        Vec::new()
    }

    fn detect_applicability(&self, _project_root: &Path) -> f64 {
        0.1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn add_import_generates_import_line() {
        let adapter = GenericAdapter;
        let params = json!({"import_line": "import os"}).as_object().cloned().unwrap_or_default();
        let code = adapter.generate("add_import", &params).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(code.imports, vec!["import os".to_string()]);
    }

    #[test]
    fn missing_parameter_is_reported() {
        let adapter = GenericAdapter;
        let params = serde_json::Map::new();
        let err = adapter.generate("add_import", &params).expect_err("must fail");
        assert!(matches!(err, IntegratorError::InvalidIntentParameter { field, .. } if field == "import_line"));
    }

    #[test]
    fn unsupported_action_is_reported() {
        let adapter = GenericAdapter;
        let params = serde_json::Map::new();
        let err = adapter.generate("delete_everything", &params).expect_err("must fail");
        assert!(matches!(err, IntegratorError::UnsupportedAction { .. }));
    }

    #[test]
    fn generic_adapter_confidence_is_low() {
        let adapter = GenericAdapter;
        assert!(adapter.detect_applicability(Path::new("/tmp")) < 0.5);
    }
}
