//! Evidence payload validation.
//!
//! Structural problems (empty required fields, wrongly typed well-known keys)
//! are always issues. Quality problems (short or boilerplate text, changed
//! files that do not exist) are issues in strict mode and warnings otherwise.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::allowlist::normalize_path;
use crate::core::types::Evidence;

pub const DIFF_SUMMARY_MIN_CHARS: usize = 20;
pub const SUMMARY_MIN_CHARS: usize = 15;

const VAGUE_PHRASES: &[&str] = &[
    "done",
    "fixed",
    "works",
    "updated",
    "completed",
    "implemented",
    "made changes",
    "see above",
    "same as before",
];

const STRING_LIST_KEYS: &[&str] = &["changed_files", "commands_run", "tests_run"];
const BOOL_KEYS: &[&str] = &["tests_passed", "lint_passed"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }

    /// Record a quality finding: an issue in strict mode, a warning otherwise.
    pub fn quality(&mut self, strict: bool, message: String) {
        if strict {
            self.issues.push(message);
        } else {
            self.warnings.push(message);
        }
    }
}

/// Validate `evidence` against `required_fields` and the well-known key rules.
pub fn validate(
    evidence: &Evidence,
    required_fields: &[String],
    repo_root: Option<&Path>,
    strict: bool,
) -> ValidationReport {
    let mut report = ValidationReport::default();

    for field in required_fields {
        match evidence.get(field) {
            None => report.issues.push(format!("Required evidence '{field}' is missing")),
            Some(value) if is_empty_value(value) => {
                report.issues.push(format!("Required evidence '{field}' is empty"));
            }
            Some(_) => {}
        }
    }

    for key in STRING_LIST_KEYS {
        if let Some(value) = evidence.get(*key)
            && !value.is_null()
            && string_list(value).is_none()
        {
            report.issues.push(format!("'{key}' must be a list of strings"));
        }
    }
    for key in BOOL_KEYS {
        if let Some(value) = evidence.get(*key)
            && !value.is_null()
            && !value.is_boolean()
        {
            report.issues.push(format!("'{key}' must be a boolean"));
        }
    }
    if let Some(value) = evidence.get("criteria_checklist")
        && !value.is_null()
    {
        let well_formed = value
            .as_object()
            .is_some_and(|map| map.values().all(Value::is_boolean));
        if !well_formed {
            report
                .issues
                .push("'criteria_checklist' must be a map of string to boolean".to_string());
        }
    }

    if let (Some(root), Some(files)) = (repo_root, evidence.get("changed_files").and_then(string_list)) {
        for file in files {
            let normalized = normalize_path(file);
            if !root.join(&normalized).exists() {
                report.quality(strict, format!("Changed file does not exist: {normalized}"));
            }
        }
    }

    for (field, min_len) in [("diff_summary", DIFF_SUMMARY_MIN_CHARS), ("summary", SUMMARY_MIN_CHARS)] {
        if let Some(Value::String(text)) = evidence.get(field)
            && let Some(problem) = check_text_quality(field, text, min_len)
        {
            report.quality(strict, problem);
        }
    }

    report
}

/// Describe why `text` is too short or too vague, if it is.
pub fn check_text_quality(field: &str, text: &str, min_len: usize) -> Option<String> {
    let trimmed = text.trim();
    if is_vague(trimmed) {
        return Some(format!("'{field}' is too vague: \"{trimmed}\""));
    }
    let len = trimmed.chars().count();
    if len < min_len {
        return Some(format!(
            "'{field}' is too short ({len} characters, minimum {min_len})"
        ));
    }
    None
}

fn is_vague(text: &str) -> bool {
    let normalized = text
        .trim_end_matches(['.', '!', ' '])
        .trim()
        .to_lowercase();
    VAGUE_PHRASES.contains(&normalized.as_str())
}

/// Absent, null, blank strings and empty lists all count as empty.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn string_list(value: &Value) -> Option<Vec<&str>> {
    value.as_array()?.iter().map(Value::as_str).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    fn evidence(value: Value) -> Evidence {
        value.as_object().cloned().expect("object")
    }

    fn required(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn empty_required_values_are_issues() {
        let ev = evidence(json!({
            "a": null,
            "b": "   ",
            "c": [],
            "d": false
        }));
        let report = validate(&ev, &required(&["a", "b", "c", "d", "e"]), None, false);
        assert_eq!(
            report.issues,
            vec![
                "Required evidence 'a' is empty",
                "Required evidence 'b' is empty",
                "Required evidence 'c' is empty",
                "Required evidence 'e' is missing",
            ]
        );
    }

    #[test]
    fn typed_keys_are_checked_in_both_modes() {
        let ev = evidence(json!({
            "tests_passed": "yes",
            "commands_run": ["cargo test", 3],
            "criteria_checklist": {"c1": "true"}
        }));
        let report = validate(&ev, &[], None, false);
        assert_eq!(report.issues.len(), 3);
        assert!(!report.is_valid());
    }

    #[test]
    fn vague_summary_is_warning_when_loose_and_issue_when_strict() {
        let ev = evidence(json!({"diff_summary": "Fixed."}));
        let loose = validate(&ev, &[], None, false);
        assert!(loose.is_valid());
        assert_eq!(loose.warnings.len(), 1);

        let strict = validate(&ev, &[], None, true);
        assert_eq!(strict.issues.len(), 1);
        assert!(strict.issues[0].contains("too vague"));
    }

    #[test]
    fn short_diff_summary_is_flagged() {
        let ev = evidence(json!({"diff_summary": "Renamed a var"}));
        let report = validate(&ev, &[], None, true);
        assert!(report.issues[0].contains("too short"));

        let ok = evidence(json!({"diff_summary": "Renamed parse_args to parse_cli_args in main.rs"}));
        assert!(validate(&ok, &[], None, true).issues.is_empty());
    }

    #[test]
    fn missing_changed_files_depend_on_mode() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("src")).expect("mkdir");
        fs::write(temp.path().join("src/lib.rs"), "").expect("write");
        let ev = evidence(json!({"changed_files": ["./src/lib.rs", "src/gone.rs"]}));

        let loose = validate(&ev, &[], Some(temp.path()), false);
        assert!(loose.is_valid());
        assert_eq!(loose.warnings, vec!["Changed file does not exist: src/gone.rs"]);

        let strict = validate(&ev, &[], Some(temp.path()), true);
        assert_eq!(strict.issues, vec!["Changed file does not exist: src/gone.rs"]);
    }

    #[test]
    fn text_quality_helper() {
        assert!(check_text_quality("summary", "works", SUMMARY_MIN_CHARS).is_some());
        assert!(check_text_quality("summary", "SEE ABOVE!", SUMMARY_MIN_CHARS).is_some());
        assert!(check_text_quality("summary", "short one", SUMMARY_MIN_CHARS).is_some());
        assert_eq!(
            check_text_quality("summary", "Added retry handling to the client", SUMMARY_MIN_CHARS),
            None
        );
    }
}
