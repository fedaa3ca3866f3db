//! JSON extraction from free-form generation backend responses.
//!
//! Stage prompts ask for a single JSON object, but models still wrap it in
//! markdown fences, prepend reasoning, or get cut off by the token limit.
//! Extraction tries, in order:
//! 1. A ```json fenced block
//! 2. Any fenced block containing an object
//! 3. The content itself when it starts with '{'
//! 4. The largest valid object anywhere in the content (later wins on ties)
//!
//! ```
//! use capsule_forge::utils::json_extraction::{extract_json_object, JsonExtraction};
//!
//! let response = "Sure! {\"score\": 42}";
//! assert_eq!(
//!     extract_json_object(response),
//!     JsonExtraction::Found("{\"score\": 42}".to_string())
//! );
//! ```

use regex::Regex;
use std::sync::OnceLock;

/// Outcome of looking for a JSON object in a response.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonExtraction {
    /// A syntactically valid JSON object.
    Found(String),
    /// An object was started but never closed, usually a token-limit cut.
    Truncated {
        partial: String,
        unclosed_braces: usize,
    },
    /// Nothing resembling an object.
    Missing,
}

impl JsonExtraction {
    /// Converts into a `Result`, describing the failure for logs and errors.
    pub fn into_result(self) -> Result<String, String> {
        match self {
            JsonExtraction::Found(json) => Ok(json),
            JsonExtraction::Truncated {
                partial,
                unclosed_braces,
            } => Err(format!(
                "JSON appears truncated ({} unclosed braces): {}...",
                unclosed_braces,
                preview(&partial, 120)
            )),
            JsonExtraction::Missing => Err("No JSON object found in response".to_string()),
        }
    }
}

fn json_fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```json\s*\n?([\s\S]*?)\n?```").expect("static regex"))
}

fn any_fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```(?:\w+)?\s*\n?([\s\S]*?)\n?```").expect("static regex"))
}

/// Finds the JSON object in a backend response.
pub fn extract_json_object(content: &str) -> JsonExtraction {
    let trimmed = content.trim();

    for re in [json_fence(), any_fence()] {
        for caps in re.captures_iter(trimmed) {
            if let Some(block) = caps.get(1) {
                if let Some(json) = first_valid_object(block.as_str().trim()) {
                    return JsonExtraction::Found(json);
                }
            }
        }
    }

    if trimmed.starts_with('{') {
        if let Some(end) = find_matching_brace(trimmed) {
            let candidate = &trimmed[..=end];
            if is_valid(candidate) {
                return JsonExtraction::Found(candidate.to_string());
            }
        }
    }

    if let Some(json) = largest_valid_object(trimmed) {
        return JsonExtraction::Found(json);
    }

    match trimmed.find('{') {
        Some(start) => {
            let unclosed = unclosed_braces(&trimmed[start..]);
            if unclosed > 0 {
                JsonExtraction::Truncated {
                    partial: trimmed[start..].to_string(),
                    unclosed_braces: unclosed,
                }
            } else {
                JsonExtraction::Missing
            }
        }
        None => JsonExtraction::Missing,
    }
}

/// Index of the '}' closing the object that `s` starts with.
///
/// Braces inside string literals (including escaped quotes) are ignored.
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
                depth = depth.saturating_sub(1);
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

fn is_valid(candidate: &str) -> bool {
    matches!(
        serde_json::from_str::<serde_json::Value>(candidate),
        Ok(serde_json::Value::Object(_))
    )
}

fn first_valid_object(block: &str) -> Option<String> {
    let start = block.find('{')?;
    let end = find_matching_brace(&block[start..])?;
    let candidate = &block[start..=start + end];
    is_valid(candidate).then(|| candidate.to_string())
}

fn largest_valid_object(content: &str) -> Option<String> {
    content
        .char_indices()
        .filter(|(_, c)| *c == '{')
        .filter_map(|(start, _)| {
            let end = find_matching_brace(&content[start..])?;
            let candidate = &content[start..=start + end];
            is_valid(candidate).then(|| (start, candidate))
        })
        .max_by(|(pos_a, a), (pos_b, b)| a.len().cmp(&b.len()).then(pos_a.cmp(pos_b)))
        .map(|(_, json)| json.to_string())
}

/// Char-boundary-safe prefix used in log lines and error messages.
pub fn preview(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_object() {
        let result = extract_json_object(r#"{"a": 1}"#);
        assert_eq!(result, JsonExtraction::Found(r#"{"a": 1}"#.to_string()));
    }

    #[test]
    fn test_json_fence_preferred() {
        let content = "Thinking about {\"draft\": true}\n```json\n{\"final\": true}\n```";
        assert_eq!(
            extract_json_object(content),
            JsonExtraction::Found("{\"final\": true}".to_string())
        );
    }

    #[test]
    fn test_generic_fence() {
        let content = "```\n{\"x\": [1, 2]}\n```";
        assert_eq!(
            extract_json_object(content),
            JsonExtraction::Found("{\"x\": [1, 2]}".to_string())
        );
    }

    #[test]
    fn test_largest_object_wins() {
        let content = r#"Example {"a":1}. Answer: {"a":1,"b":{"c":2}} done"#;
        assert_eq!(
            extract_json_object(content),
            JsonExtraction::Found(r#"{"a":1,"b":{"c":2}}"#.to_string())
        );
    }

    #[test]
    fn test_braces_inside_strings() {
        let content = r#"{"code": "def f():\n    return {'k': '}'}"}"#;
        assert!(matches!(extract_json_object(content), JsonExtraction::Found(_)));
    }

    #[test]
    fn test_truncated() {
        let content = r#"{"solution_code": "def f(x):", "test_cases": [{"a": 1"#;
        match extract_json_object(content) {
            JsonExtraction::Truncated {
                unclosed_braces, ..
            } => assert_eq!(unclosed_braces, 2),
            other => panic!("expected truncation, got {:?}", other),
        }
    }

    #[test]
    fn test_missing() {
        assert_eq!(extract_json_object("no json here"), JsonExtraction::Missing);
        assert!(extract_json_object("nope").into_result().is_err());
    }

    #[test]
    fn test_preview_is_char_safe() {
        assert_eq!(preview("héllo wörld", 4), "héll");
    }
}
