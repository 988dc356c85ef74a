//! JSON extraction from free-form model output.
//!
//! Models asked for a tool call sometimes answer in plain content instead,
//! wrapping the object in a code fence or prose. Strategies, in order:
//! 1. JSON in a ```json fenced block
//! 2. JSON in a generic fenced block
//! 3. Content that is itself a JSON object
//! 4. The first balanced `{...}` anywhere in the content
//!
//! ```
//! use trapforge::utils::json_extraction::extract_json_object;
//!
//! let reply = "Sure, here it is: {\"title\": \"Cache eviction\"} hope that helps";
//! let object = extract_json_object(reply).expect("object found");
//! assert_eq!(object["title"], "Cache eviction");
//! ```

use serde_json::{Map, Value};

/// Result of a JSON extraction attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonExtractionResult {
    /// A complete JSON object was found.
    Success(Map<String, Value>),
    /// An object was opened but never closed.
    Truncated { unclosed_braces: usize },
    /// Nothing object-like in the content.
    NotFound,
}

impl JsonExtractionResult {
    /// Returns true if an object was extracted.
    pub fn is_success(&self) -> bool {
        matches!(self, JsonExtractionResult::Success(_))
    }

    /// Consume the result, keeping only a successful object.
    pub fn into_object(self) -> Option<Map<String, Value>> {
        match self {
            JsonExtractionResult::Success(object) => Some(object),
            _ => None,
        }
    }
}

/// Try every strategy and report what was found.
pub fn try_extract_json_object(content: &str) -> JsonExtractionResult {
    let trimmed = content.trim();

    let fenced = fenced_block(trimmed, "```json").or_else(|| fenced_block(trimmed, "```"));
    if let Some(object) = fenced.and_then(parse_object) {
        return JsonExtractionResult::Success(object);
    }

    if let Some(object) = parse_object(trimmed) {
        return JsonExtractionResult::Success(object);
    }

    let Some(start) = trimmed.find('{') else {
        return JsonExtractionResult::NotFound;
    };
    match find_matching_brace(&trimmed[start..]) {
        Some(end) => parse_object(&trimmed[start..=start + end])
            .map(JsonExtractionResult::Success)
            .unwrap_or(JsonExtractionResult::NotFound),
        None => JsonExtractionResult::Truncated {
            unclosed_braces: unclosed_braces(&trimmed[start..]),
        },
    }
}

/// Extract the first JSON object from model output, if any.
pub fn extract_json_object(content: &str) -> Option<Map<String, Value>> {
    try_extract_json_object(content).into_object()
}

fn parse_object(candidate: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(candidate.trim()) {
        Ok(Value::Object(object)) => Some(object),
        _ => None,
    }
}

fn fenced_block<'a>(content: &'a str, fence: &str) -> Option<&'a str> {
    let start = content.find(fence)? + fence.len();
    let rest = &content[start..];
    let end = rest.find("```")?;
    Some(rest[..end].trim())
}

/// Index of the brace closing the object that opens at byte 0.
///
/// Braces inside string literals, escaped quotes included, are ignored.
pub fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn unclosed_braces(s: &str) -> usize {
    let mut depth: isize = 0;
    let mut in_string = false;
    let mut escape_next = false;
    for c in s.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => depth -= 1,
            _ => {}
        }
    }
    depth.max(0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_object() {
        let object = extract_json_object(r#"{"a": 1}"#).expect("object");
        assert_eq!(object["a"], 1);
    }

    #[test]
    fn test_json_code_fence() {
        let content = "Here you go:\n```json\n{\"title\": \"x\"}\n```\nDone.";
        let object = extract_json_object(content).expect("object");
        assert_eq!(object["title"], "x");
    }

    #[test]
    fn test_generic_code_fence() {
        let content = "```\n{\"n\": [1, 2]}\n```";
        let object = extract_json_object(content).expect("object");
        assert_eq!(object["n"][1], 2);
    }

    #[test]
    fn test_object_embedded_in_prose_with_braces_in_strings() {
        let content = r#"Reasoning first. {"text": "a } tricky \" brace", "ok": true} trailing"#;
        let object = extract_json_object(content).expect("object");
        assert_eq!(object["ok"], true);
        assert_eq!(object["text"], "a } tricky \" brace");
    }

    #[test]
    fn test_array_is_not_an_object() {
        assert_eq!(try_extract_json_object("[1, 2, 3]"), JsonExtractionResult::NotFound);
    }

    #[test]
    fn test_truncated_object() {
        let result = try_extract_json_object(r#"{"a": {"b": 1"#);
        assert_eq!(result, JsonExtractionResult::Truncated { unclosed_braces: 2 });
        assert!(!result.is_success());
    }

    #[test]
    fn test_not_found() {
        assert_eq!(
            try_extract_json_object("no structure here"),
            JsonExtractionResult::NotFound
        );
    }

    #[test]
    fn test_find_matching_brace_nested() {
        assert_eq!(find_matching_brace(r#"{"a": {"b": {}}} tail"#), Some(15));
        assert_eq!(find_matching_brace("{"), None);
    }
}
