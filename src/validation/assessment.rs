//! Deterministic validation of composed assessments.
//!
//! An assessment embeds the weak model's flawed material verbatim, with each
//! failing span marked inline as `<<exact substring>>` and described once in
//! the `errors` list. The validator either returns a sanitized
//! [`AssessmentPayload`] or every violation it found, in check order.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::OnceLock;

use crate::difficulty::DifficultyLevel;
use crate::error::ConfigError;
use crate::stages::types::ContentKind;

/// Opening span marker.
pub const SPAN_OPEN: &str = "<<";
/// Closing span marker.
pub const SPAN_CLOSE: &str = ">>";

fn span_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<<(.+?)>>").expect("span pattern is a valid regex"))
}

/// Every `<<...>>` span in `text`, in order of appearance.
///
/// Matching is non-greedy and never crosses a line break.
pub fn extract_spans(text: &str) -> Vec<String> {
    span_pattern()
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Bounds applied by [`AssessmentValidator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorConfig {
    pub allowed_difficulties: Vec<DifficultyLevel>,
    pub min_lines: usize,
    pub max_lines: usize,
    pub min_errors: usize,
    pub max_errors: usize,
    pub min_span_len: usize,
    pub max_span_len: usize,
    pub max_description_len: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            allowed_difficulties: DifficultyLevel::ALL.to_vec(),
            min_lines: 24,
            max_lines: 60,
            min_errors: 1,
            max_errors: 5,
            min_span_len: 20,
            max_span_len: 120,
            max_description_len: 180,
        }
    }
}

impl ValidatorConfig {
    /// Profile demanding at least three errors while allowing shorter spans.
    pub fn strict() -> Self {
        Self {
            min_errors: 3,
            min_span_len: 10,
            ..Self::default()
        }
    }

    /// Set the accepted content line range.
    pub fn with_line_bounds(mut self, min: usize, max: usize) -> Self {
        self.min_lines = min;
        self.max_lines = max;
        self
    }

    /// Set the accepted error count range.
    pub fn with_error_bounds(mut self, min: usize, max: usize) -> Self {
        self.min_errors = min;
        self.max_errors = max;
        self
    }

    /// Set the accepted span (error id) length range, in characters.
    pub fn with_span_bounds(mut self, min: usize, max: usize) -> Self {
        self.min_span_len = min;
        self.max_span_len = max;
        self
    }

    /// Check that every range is non-empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ranges = [
            ("content lines", self.min_lines, self.max_lines),
            ("error count", self.min_errors, self.max_errors),
            ("span length", self.min_span_len, self.max_span_len),
        ];
        for (name, min, max) in ranges {
            if min > max {
                return Err(ConfigError::InvalidBounds {
                    name: name.to_string(),
                    min,
                    max,
                });
            }
        }
        if self.max_errors == 0 {
            return Err(ConfigError::ZeroLimit("max_errors".to_string()));
        }
        if self.allowed_difficulties.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "allowed_difficulties".to_string(),
                value: "[]".to_string(),
                reason: "at least one difficulty must be allowed".to_string(),
            });
        }
        Ok(())
    }
}

/// One marked flaw in an assessment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssessmentError {
    /// The exact substring wrapped in span markers.
    pub id: String,
    /// Student-facing explanation.
    pub description: String,
}

/// A validated, sanitized assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentPayload {
    pub title: String,
    pub difficulty: DifficultyLevel,
    pub content_type: ContentKind,
    pub content: Vec<String>,
    /// Same lines as `content`, for consumers of the older field name.
    pub code: Vec<String>,
    pub errors: Vec<AssessmentError>,
}

impl AssessmentPayload {
    /// Content lines joined with newlines.
    pub fn joined_content(&self) -> String {
        self.content.join("\n")
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Validates raw composer output against a [`ValidatorConfig`].
#[derive(Debug, Clone, Default)]
pub struct AssessmentValidator {
    config: ValidatorConfig,
}

impl AssessmentValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Validate a raw payload.
    ///
    /// Returns the sanitized payload when every check passes, otherwise the
    /// ordered list of violation messages.
    pub fn validate(&self, raw: &Value) -> Result<AssessmentPayload, Vec<String>> {
        let Some(object) = raw.as_object() else {
            return Err(vec!["Assessment payload must be a JSON object.".to_string()]);
        };
        let cfg = &self.config;
        let mut issues = Vec::new();

        let title = object
            .get("title")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|title| !title.is_empty());
        if title.is_none() {
            issues.push("`title` must be a non-empty string.".to_string());
        }

        let difficulty = object
            .get("difficulty")
            .and_then(Value::as_str)
            .and_then(|label| label.parse::<DifficultyLevel>().ok())
            .filter(|level| cfg.allowed_difficulties.contains(level));
        if difficulty.is_none() {
            let allowed: Vec<&str> = cfg.allowed_difficulties.iter().map(|d| d.as_str()).collect();
            issues.push(format!(
                "`difficulty` must be one of: {}.",
                allowed.join(", ")
            ));
        }

        let content_type = resolve_content_type(object, &mut issues);
        let lines = resolve_lines(object, &mut issues);

        let joined = lines.as_ref().map(|lines| lines.join("\n"));
        let spans = joined.as_deref().map(extract_spans).unwrap_or_default();

        if let (Some(lines), Some(joined)) = (&lines, &joined) {
            if lines.len() < cfg.min_lines || lines.len() > cfg.max_lines {
                issues.push(format!(
                    "`content` must contain between {} and {} lines (found {}).",
                    cfg.min_lines,
                    cfg.max_lines,
                    lines.len()
                ));
            }
            if spans.is_empty() {
                issues.push("No <<...>> error spans were found in the `content`.".to_string());
            }
            if joined.matches(SPAN_OPEN).count() != joined.matches(SPAN_CLOSE).count() {
                issues.push("Unbalanced number of << and >> delimiters in the `content`.".to_string());
            }
        }

        let errors = self.check_errors(object, joined.as_deref().unwrap_or(""), &spans, &mut issues);

        if lines.is_some() && spans.len() != errors.len() {
            issues.push(format!(
                "Number of marked spans ({}) does not match number of error entries ({}).",
                spans.len(),
                errors.len()
            ));
        }

        match (issues.is_empty(), title, difficulty, content_type, lines) {
            (true, Some(title), Some(difficulty), Some(content_type), Some(lines)) => {
                Ok(AssessmentPayload {
                    title: title.to_string(),
                    difficulty,
                    content_type,
                    code: lines.clone(),
                    content: lines,
                    errors,
                })
            }
            _ => Err(issues),
        }
    }

    /// Check every declared error entry; returns the trimmed entries.
    fn check_errors(
        &self,
        object: &Map<String, Value>,
        joined: &str,
        spans: &[String],
        issues: &mut Vec<String>,
    ) -> Vec<AssessmentError> {
        let cfg = &self.config;
        let Some(entries) = object.get("errors").and_then(Value::as_array) else {
            issues.push("`errors` must be an array of objects.".to_string());
            return Vec::new();
        };

        if entries.len() < cfg.min_errors || entries.len() > cfg.max_errors {
            issues.push(format!(
                "`errors` must contain between {} and {} entries (found {}).",
                cfg.min_errors,
                cfg.max_errors,
                entries.len()
            ));
        }

        let mut seen = HashSet::new();
        let mut errors = Vec::with_capacity(entries.len());

        for (index, entry) in entries.iter().enumerate() {
            let Some(entry) = entry.as_object() else {
                issues.push(format!("Error entry {} must be an object.", index + 1));
                continue;
            };
            let id = entry
                .get("id")
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or_default();
            if id.is_empty() {
                issues.push(format!("Error entry {} needs a non-empty `id`.", index + 1));
                continue;
            }

            let id_len = id.chars().count();
            if id_len < cfg.min_span_len || id_len > cfg.max_span_len {
                issues.push(format!(
                    "Error id '{}' must be between {} and {} characters (found {}).",
                    id, cfg.min_span_len, cfg.max_span_len, id_len
                ));
            }
            if !seen.insert(id.to_string()) {
                issues.push(format!("Error id '{}' is declared more than once.", id));
            }

            let occurrences = joined.matches(&format!("{SPAN_OPEN}{id}{SPAN_CLOSE}")).count();
            if occurrences != 1 {
                issues.push(format!(
                    "Error id '{}' must appear exactly once in the `content`; found {}.",
                    id, occurrences
                ));
            }
            if !spans.iter().any(|span| span == id) {
                issues.push(format!(
                    "Error id '{}' is not wrapped in <<...>> within the `content`.",
                    id
                ));
            }

            let description = entry
                .get("description")
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or_default();
            let description_len = description.chars().count();
            if description.is_empty() {
                issues.push(format!("Error '{}' needs a non-empty `description`.", id));
            } else if description_len > cfg.max_description_len {
                issues.push(format!(
                    "Description for error '{}' must be at most {} characters (found {}).",
                    id, cfg.max_description_len, description_len
                ));
            }

            errors.push(AssessmentError {
                id: id.to_string(),
                description: description.to_string(),
            });
        }

        errors
    }
}

/// `content_type`, or `code` when only a legacy `code` list is present.
fn resolve_content_type(object: &Map<String, Value>, issues: &mut Vec<String>) -> Option<ContentKind> {
    match object.get("content_type") {
        Some(value) => {
            let kind = value.as_str().and_then(ContentKind::parse);
            if kind.is_none() {
                issues.push(format!(
                    "`content_type` must be one of: {}.",
                    ContentKind::labels()
                ));
            }
            kind
        }
        None if object.get("code").is_some_and(Value::is_array) => Some(ContentKind::Code),
        None => {
            issues.push(
                "`content_type` is required when no legacy `code` list is present.".to_string(),
            );
            None
        }
    }
}

/// Normalize `content` (or legacy `code`) into lines.
///
/// Accepts a list of strings, a JSON-encoded list of strings, or one string
/// split on line boundaries.
fn resolve_lines(object: &Map<String, Value>, issues: &mut Vec<String>) -> Option<Vec<String>> {
    let source = object.get("content").or_else(|| object.get("code"));
    let lines = match source {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| item.as_str().map(strip_line_ending))
            .collect::<Option<Vec<_>>>(),
        Some(Value::String(text)) => Some(split_text_content(text)),
        _ => None,
    };
    if lines.is_none() {
        issues.push("`content` must be a list of line strings.".to_string());
    }
    lines
}

fn split_text_content(text: &str) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.starts_with('[') {
        if let Ok(items) = serde_json::from_str::<Vec<String>>(trimmed) {
            return items.iter().map(|line| strip_line_ending(line)).collect();
        }
    }
    text.lines().map(str::to_string).collect()
}

fn strip_line_ending(line: &str) -> String {
    line.trim_end_matches(['\r', '\n']).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SPAN_A: &str = "total = total + price * qty";
    const SPAN_B: &str = "for i in range(1, len(items)):";

    fn lines_with(count: usize, marked: &[(usize, &str)]) -> Vec<String> {
        (0..count)
            .map(|i| {
                marked
                    .iter()
                    .find(|(line, _)| *line == i)
                    .map(|(_, span)| format!("    <<{}>>", span))
                    .unwrap_or_else(|| format!("    step_{} = compute({})", i, i))
            })
            .collect()
    }

    fn payload(lines: Vec<String>, errors: Value) -> Value {
        json!({
            "title": "  Order total audit  ",
            "difficulty": "Intermediate",
            "content_type": "code",
            "content": lines,
            "errors": errors,
        })
    }

    fn one_error() -> Value {
        json!([{ "id": SPAN_A, "description": " Discount is applied after tax. " }])
    }

    #[test]
    fn test_valid_payload_is_sanitized() {
        let validator = AssessmentValidator::default();
        let raw = payload(lines_with(24, &[(5, SPAN_A)]), one_error());

        let accepted = validator.validate(&raw).expect("payload should be valid");
        assert_eq!(accepted.title, "Order total audit");
        assert_eq!(accepted.errors[0].description, "Discount is applied after tax.");
        assert_eq!(accepted.content, accepted.code);
        assert_eq!(accepted.content_type, ContentKind::Code);
    }

    #[test]
    fn test_validation_is_idempotent() {
        let validator = AssessmentValidator::default();
        let raw = payload(lines_with(30, &[(5, SPAN_A)]), one_error());

        let first = validator.validate(&raw).expect("first pass valid");
        let second = validator
            .validate(&first.to_value())
            .expect("sanitized payload stays valid");
        assert_eq!(first, second);
    }

    #[test]
    fn test_too_few_lines_cites_bounds() {
        let validator = AssessmentValidator::default();
        let raw = payload(lines_with(23, &[(5, SPAN_A)]), one_error());

        let issues = validator.validate(&raw).expect_err("23 lines must be rejected");
        let line_issue = issues
            .iter()
            .find(|issue| issue.contains("lines"))
            .expect("line-count issue present");
        assert!(line_issue.contains("24"));
        assert!(line_issue.contains("60"));
        assert!(line_issue.contains("found 23"));
    }

    #[test]
    fn test_span_count_mismatch() {
        let validator = AssessmentValidator::default();
        let raw = payload(lines_with(24, &[(3, SPAN_A), (9, SPAN_B)]), one_error());

        let issues = validator.validate(&raw).expect_err("mismatch must be rejected");
        assert!(issues.contains(
            &"Number of marked spans (2) does not match number of error entries (1).".to_string()
        ));
    }

    #[test]
    fn test_short_error_id_cites_configured_bounds() {
        let validator = AssessmentValidator::default();
        let span = "y = compute(10)";
        assert_eq!(span.chars().count(), 15);
        let raw = payload(
            lines_with(24, &[(2, span)]),
            json!([{ "id": span, "description": "Off by one." }]),
        );

        let issues = validator.validate(&raw).expect_err("short id must be rejected");
        assert!(issues.contains(&format!(
            "Error id '{}' must be between 20 and 120 characters (found 15).",
            span
        )));
    }

    #[test]
    fn test_strict_profile_accepts_short_spans_but_needs_three_errors() {
        let validator = AssessmentValidator::new(ValidatorConfig::strict());
        let span = "y = compute(10)";
        let raw = payload(
            lines_with(24, &[(2, span)]),
            json!([{ "id": span, "description": "Off by one." }]),
        );

        let issues = validator.validate(&raw).expect_err("one error is too few");
        assert_eq!(
            issues,
            vec!["`errors` must contain between 3 and 5 entries (found 1).".to_string()]
        );
    }

    #[test]
    fn test_missing_spans_and_unbalanced_markers() {
        let validator = AssessmentValidator::default();
        let mut lines = lines_with(24, &[]);
        lines[4] = "value = a << 2".to_string();
        let raw = payload(lines, one_error());

        let issues = validator.validate(&raw).expect_err("no spans");
        assert!(issues.contains(&"No <<...>> error spans were found in the `content`.".to_string()));
        assert!(issues
            .contains(&"Unbalanced number of << and >> delimiters in the `content`.".to_string()));
        assert!(issues.contains(&format!(
            "Error id '{}' is not wrapped in <<...>> within the `content`.",
            SPAN_A
        )));
    }

    #[test]
    fn test_duplicate_span_occurrence() {
        let validator = AssessmentValidator::default();
        let raw = payload(lines_with(24, &[(1, SPAN_A), (7, SPAN_A)]), one_error());

        let issues = validator.validate(&raw).expect_err("span occurs twice");
        assert!(issues.contains(&format!(
            "Error id '{}' must appear exactly once in the `content`; found 2.",
            SPAN_A
        )));
    }

    #[test]
    fn test_string_content_is_repaired() {
        let validator = AssessmentValidator::default();
        let lines = lines_with(24, &[(5, SPAN_A)]);

        let mut as_json_text = payload(Vec::new(), one_error());
        as_json_text["content"] = Value::String(serde_json::to_string(&lines).expect("encode"));
        assert!(validator.validate(&as_json_text).is_ok());

        let mut as_block = payload(Vec::new(), one_error());
        as_block["content"] = Value::String(lines.join("\n"));
        let accepted = validator.validate(&as_block).expect("split text is valid");
        assert_eq!(accepted.content.len(), 24);
    }

    #[test]
    fn test_legacy_code_field_implies_code_type() {
        let validator = AssessmentValidator::default();
        let raw = json!({
            "title": "Legacy",
            "difficulty": "Advanced",
            "code": lines_with(24, &[(5, SPAN_A)]),
            "errors": one_error(),
        });

        let accepted = validator.validate(&raw).expect("legacy payload valid");
        assert_eq!(accepted.content_type, ContentKind::Code);

        let mut without_code = raw.clone();
        let object = without_code.as_object_mut().expect("object");
        let lines = object.remove("code").expect("code present");
        object.insert("content".to_string(), lines);
        let issues = validator.validate(&without_code).expect_err("type cannot be inferred");
        assert!(issues[0].contains("`content_type` is required"));
    }

    #[test]
    fn test_bad_difficulty_and_description() {
        let validator = AssessmentValidator::default();
        let mut raw = payload(
            lines_with(24, &[(5, SPAN_A)]),
            json!([{ "id": SPAN_A, "description": "d".repeat(181) }]),
        );
        raw["difficulty"] = json!("Hard");

        let issues = validator.validate(&raw).expect_err("invalid");
        assert!(issues[0].starts_with("`difficulty` must be one of"));
        assert!(issues
            .iter()
            .any(|issue| issue.contains("at most 180 characters (found 181)")));
    }

    #[test]
    fn test_non_object_payload() {
        let validator = AssessmentValidator::default();
        let issues = validator.validate(&json!(["not", "an", "object"])).expect_err("invalid");
        assert_eq!(issues.len(), 1);
    }

    #[test]
    fn test_extract_spans_is_non_greedy_and_line_bound() {
        let spans = extract_spans("a <<first span>> b <<second>>\n<<open\nclose>>");
        assert_eq!(spans, vec!["first span".to_string(), "second".to_string()]);
    }

    #[test]
    fn test_config_validation() {
        assert!(ValidatorConfig::default().validate().is_ok());
        assert!(ValidatorConfig::strict().validate().is_ok());
        let inverted = ValidatorConfig::default().with_line_bounds(60, 24);
        assert!(matches!(
            inverted.validate(),
            Err(ConfigError::InvalidBounds { .. })
        ));
    }
}
