//! Region markers divide a hot file into named, independently-writable
//! blocks (e.g. `# === AUTO:IMPORTS === ... # === END:IMPORTS ===`).
//! Every function here is pure: it takes file content as a `&str` and
//! returns new content, never touching the filesystem itself.

use std::collections::HashSet;

use crate::adapter::{AnchorPattern, Fallback, Position};
use crate::error::IntegratorError;

/// The location and content of one marked region within a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionLocation {
    /// Line index of the start marker.
    pub start_line: usize,
    /// Line index of the end marker.
    pub end_line: usize,
    /// The lines strictly between the markers.
    pub content_lines: Vec<String>,
}

/// Find one named region by its literal marker strings.
#[must_use]
pub fn find_region(content: &str, start_marker: &str, end_marker: &str) -> Option<RegionLocation> {
    let lines: Vec<&str> = content.split('\n').collect();
    let mut start_idx = None;
    let mut end_idx = None;

    for (i, line) in lines.iter().enumerate() {
        if start_idx.is_none() && line.contains(start_marker) {
            start_idx = Some(i);
        } else if start_idx.is_some() && line.contains(end_marker) {
            end_idx = Some(i);
            break;
        }
    }

    match (start_idx, end_idx) {
        (Some(start), Some(end)) => Some(RegionLocation {
            start_line: start,
            end_line: end,
            content_lines: lines[start + 1..end].iter().map(|s| s.to_string()).collect(),
        }),
        _ => None,
    }
}

/// Insert `start_marker`/`end_marker` at the location `anchor` describes,
/// falling back to a structural position when the anchor regex doesn't
/// match.
///
/// # Errors
///
/// [`IntegratorError::AnchorNotFound`] if the anchor doesn't match and
/// `anchor.fallback` is [`Fallback::Serialize`] or [`Fallback::Error`].
pub fn insert_markers(
    content: &str,
    start_marker: &str,
    end_marker: &str,
    region: &str,
    anchor: &AnchorPattern,
) -> Result<String, IntegratorError> {
    let mut lines: Vec<String> = content.split('\n').map(String::from).collect();

    let anchor_idx = find_anchor_line(&lines, anchor).or_else(|| match anchor.fallback {
        Fallback::EndOfFile => Some(lines.len()),
        Fallback::StartOfFile => Some(0),
        Fallback::EndOfImports => Some(end_of_imports(&lines)),
        Fallback::Serialize | Fallback::Error => None,
    });

    let Some(idx) = anchor_idx else {
        return Err(IntegratorError::AnchorNotFound {
            region: region.to_string(),
            anchor_regex: anchor.anchor_regex.clone(),
        });
    };

    let marker_block = vec![String::new(), start_marker.to_string(), end_marker.to_string(), String::new()];
    let mut result = Vec::with_capacity(lines.len() + marker_block.len());
    result.extend(lines.drain(..idx));
    result.extend(marker_block);
    result.extend(lines);
    Ok(result.join("\n"))
}

fn find_anchor_line(lines: &[String], anchor: &AnchorPattern) -> Option<usize> {
    let re = regex::Regex::new(&anchor.anchor_regex).ok()?;
    for (i, line) in lines.iter().enumerate() {
        if re.is_match(line) {
            return Some(match anchor.position {
                Position::After => i + 1,
                Position::Before => i,
            });
        }
    }
    None
}

fn end_of_imports(lines: &[String]) -> usize {
    let mut idx = 0;
    for (i, line) in lines.iter().enumerate() {
        let stripped = line.trim();
        if stripped.starts_with("import ")
            || stripped.starts_with("from ")
            || (stripped.starts_with("use ") && stripped.ends_with(';'))
            || (stripped.starts_with("const ") && stripped.contains("require("))
        {
            idx = i + 1;
        }
    }
    idx
}

/// Ensure every region in `regions_needed` has its markers present in
/// `content`, bootstrapping any that are missing via the adapter's
/// anchor patterns. Anchors that fail with a `serialize`/`error`
/// fallback are skipped (logged by the caller) rather than aborting the
/// whole pass — those regions simply remain absent, and the caller must
/// treat intents targeting them as strictly sequential.
#[must_use]
pub fn ensure_region_markers(
    content: &str,
    regions_needed: &HashSet<String>,
    markers: &std::collections::HashMap<String, (String, String)>,
    anchors: &std::collections::HashMap<String, AnchorPattern>,
) -> String {
    let mut content = content.to_string();
    for region in regions_needed {
        let Some((start_marker, end_marker)) = markers.get(region) else {
            continue;
        };
        if content.contains(start_marker.as_str()) {
            continue;
        }
        if let Some(anchor) = anchors.get(region) {
            match insert_markers(&content, start_marker, end_marker, region, anchor) {
                Ok(updated) => content = updated,
                Err(_) => continue,
            }
        }
    }
    content
}

/// Insert `new_lines` into an already-marked region, deduplicating
/// against existing region content (and within `new_lines` itself) by
/// stripped-line equality when `deduplicate` is true.
///
/// # Errors
///
/// [`IntegratorError::RegionNotFound`] if the markers aren't present.
pub fn insert_into_region(
    content: &str,
    start_marker: &str,
    end_marker: &str,
    region_name: &str,
    new_lines: &[String],
    deduplicate: bool,
) -> Result<String, IntegratorError> {
    let region = find_region(content, start_marker, end_marker)
        .ok_or_else(|| IntegratorError::RegionNotFound(region_name.to_string()))?;

    let to_insert: Vec<String> = if deduplicate {
        let existing: HashSet<String> = region
            .content_lines
            .iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        let mut seen = existing;
        let mut filtered = Vec::new();
        for line in new_lines {
            let stripped = line.trim().to_string();
            if stripped.is_empty() || seen.contains(&stripped) {
                continue;
            }
            seen.insert(stripped);
            filtered.push(line.clone());
        }
        filtered
    } else {
        new_lines.to_vec()
    };

    let mut lines: Vec<String> = content.split('\n').map(String::from).collect();
    let mut result = Vec::with_capacity(lines.len() + to_insert.len());
    result.extend(lines.drain(..region.end_line));
    result.extend(to_insert);
    result.extend(lines);
    Ok(result.join("\n"))
}

/// The lines currently inside a marked region, or empty if it doesn't
/// exist.
#[must_use]
pub fn region_content(content: &str, start_marker: &str, end_marker: &str) -> Vec<String> {
    find_region(content, start_marker, end_marker).map(|r| r.content_lines).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AnchorPattern, Fallback, Position};

    const IMPORTS: &str = "# === AUTO:IMPORTS ===\n# === END:IMPORTS ===";

    #[test]
    fn find_region_locates_markers() {
        let content = format!("a\n{IMPORTS}\nb");
        let region = find_region(&content, "AUTO:IMPORTS", "END:IMPORTS").unwrap_or_else(|| panic!("not found"));
        assert_eq!(region.content_lines, Vec::<String>::new());
    }

    #[test]
    fn missing_region_returns_none() {
        assert!(find_region("no markers here", "AUTO:IMPORTS", "END:IMPORTS").is_none());
    }

    #[test]
    fn insert_into_region_dedupes_against_existing() {
        let content = "# === AUTO:IMPORTS ===\nimport os\n# === END:IMPORTS ===\n";
        let updated = insert_into_region(
            content,
            "AUTO:IMPORTS",
            "END:IMPORTS",
            "imports",
            &["import os".to_string(), "import sys".to_string()],
            true,
        )
        .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(updated.matches("import os").count(), 1);
        assert!(updated.contains("import sys"));
    }

    #[test]
    fn insert_into_region_missing_markers_errors() {
        let err = insert_into_region("no markers", "A", "B", "imports", &[], true)
            .expect_err("must fail without markers");
        assert!(matches!(err, IntegratorError::RegionNotFound(region) if region == "imports"));
    }

    #[test]
    fn insert_markers_uses_anchor_when_present() {
        let content = "app = FastAPI()\nother_code()";
        let anchor = AnchorPattern {
            target_files: vec!["main.py".to_string()],
            anchor_regex: r"^app = FastAPI\(".to_string(),
            position: Position::After,
            fallback: Fallback::EndOfFile,
        };
        let updated =
            insert_markers(content, "# === AUTO:ROUTERS ===", "# === END:ROUTERS ===", "routers", &anchor)
                .unwrap_or_else(|e| panic!("{e}"));
        let lines: Vec<&str> = updated.split('\n').collect();
        assert_eq!(lines[0], "app = FastAPI()");
        assert!(lines[1..].iter().any(|l| l.contains("AUTO:ROUTERS")));
    }

    #[test]
    fn insert_markers_falls_back_to_end_of_file() {
        let content = "no anchor here";
        let anchor = AnchorPattern {
            target_files: vec![],
            anchor_regex: r"NEVER_MATCHES".to_string(),
            position: Position::After,
            fallback: Fallback::EndOfFile,
        };
        let updated = insert_markers(content, "# === AUTO:X ===", "# === END:X ===", "x", &anchor)
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(updated.trim_end().ends_with("# === END:X ==="));
    }

    #[test]
    fn insert_markers_serialize_fallback_errors() {
        let anchor = AnchorPattern {
            target_files: vec![],
            anchor_regex: r"NEVER_MATCHES".to_string(),
            position: Position::After,
            fallback: Fallback::Serialize,
        };
        let err = insert_markers("content", "A", "B", "body", &anchor).expect_err("must error");
        assert!(matches!(err, IntegratorError::AnchorNotFound { region, .. } if region == "body"));
    }
}
