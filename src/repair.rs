//! Tolerant JSON extraction from free-text model output.
//!
//! Handles:
//! - JSON wrapped in a ```json fenced block, surrounded by prose
//! - JSON embedded in prose without fences
//! - closers of the wrong kind (`{"performance": 8 ]`), stray closers and
//!   closers missing at the end of a truncated answer
//! - trailing commas before `}` or `]`
//! - arrays wrapped in an object under an arbitrary key (`{"comparisons": [...]}`)

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

static JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)```json\s*(.*?)\s*```").expect("static regex"));

/// The model's text could not be reduced to JSON of the expected shape.
#[derive(Debug, Clone, Error)]
#[error("malformed response: {reason}")]
pub struct MalformedResponse {
    pub reason: String,
    /// Full model output, for diagnostics.
    pub raw: String,
    /// The repaired text that was handed to the JSON parser, if one was located.
    pub candidate: Option<String>,
}

impl MalformedResponse {
    fn new(reason: impl Into<String>, raw: &str, candidate: Option<&str>) -> Self {
        Self {
            reason: reason.into(),
            raw: raw.to_string(),
            candidate: candidate.map(str::to_string),
        }
    }
}

// =============================================================================
// Entry points
// =============================================================================

/// Extract an array of JSON values from model output.
///
/// A top-level array is returned as-is. A top-level object is unwrapped to the
/// value of its first key holding an array; metadata keys before it are
/// skipped.
pub fn extract_json(raw: &str) -> Result<Vec<Value>, MalformedResponse> {
    let value = extract_json_value(raw)?;
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(map) => map
            .into_iter()
            .find_map(|(_, v)| match v {
                Value::Array(items) => Some(items),
                _ => None,
            })
            .ok_or_else(|| {
                MalformedResponse::new("JSON object does not contain an array", raw, None)
            }),
        _ => Err(MalformedResponse::new(
            "JSON is neither an array nor an object",
            raw,
            None,
        )),
    }
}

/// Extract a JSON array, looking specifically for `[` ... `]` boundaries.
pub fn extract_json_array(raw: &str) -> Result<Vec<Value>, MalformedResponse> {
    let scope = fenced_block(raw).unwrap_or(raw);
    let start = scope
        .find('[')
        .ok_or_else(|| MalformedResponse::new("no JSON array found", raw, None))?;
    let end = scope
        .rfind(']')
        .filter(|end| *end > start)
        .ok_or_else(|| MalformedResponse::new("no complete JSON array found", raw, None))?;

    match parse_candidate(raw, &scope[start..=end])? {
        Value::Array(items) => Ok(items),
        _ => Err(MalformedResponse::new(
            "JSON is not an array",
            raw,
            Some(&scope[start..=end]),
        )),
    }
}

/// Extract a JSON value of any shape from model output.
pub fn extract_json_value(raw: &str) -> Result<Value, MalformedResponse> {
    let candidate = locate_candidate(raw)?;
    parse_candidate(raw, candidate)
}

// =============================================================================
// Candidate location
// =============================================================================

fn fenced_block(raw: &str) -> Option<&str> {
    JSON_FENCE
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

fn locate_candidate(raw: &str) -> Result<&str, MalformedResponse> {
    if let Some(inner) = fenced_block(raw) {
        return Ok(inner);
    }

    let start = match (raw.find('{'), raw.find('[')) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) | (None, Some(a)) => a,
        (None, None) => {
            return Err(MalformedResponse::new(
                "no JSON object or array found",
                raw,
                None,
            ))
        }
    };
    let end = match (raw.rfind('}'), raw.rfind(']')) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };

    match end {
        Some(end) if end > start => Ok(&raw[start..=end]),
        _ => Err(MalformedResponse::new(
            "no complete JSON object or array found",
            raw,
            None,
        )),
    }
}

fn parse_candidate(raw: &str, candidate: &str) -> Result<Value, MalformedResponse> {
    let repaired = strip_trailing_commas(&balance_brackets(candidate));
    if repaired != candidate {
        debug!(
            before = candidate.len(),
            after = repaired.len(),
            "repaired model JSON before parsing"
        );
    }

    serde_json::from_str(&repaired).map_err(|e| {
        MalformedResponse::new(format!("invalid JSON: {e}"), raw, Some(&repaired))
    })
}

// =============================================================================
// Repair passes
// =============================================================================

/// Rewrite closers so every `{` is closed by `}` and every `[` by `]`.
///
/// Scans characters with string/escape tracking and a stack of expected
/// closers. A closer of the wrong kind becomes the expected one, a closer
/// with nothing open is dropped, and closers still pending at the end are
/// appended.
pub fn balance_brackets(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 8);
    let mut expected: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escape = false;

    for c in input.chars() {
        if in_string {
            out.push(c);
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '{' => {
                expected.push('}');
                out.push(c);
            }
            '[' => {
                expected.push(']');
                out.push(c);
            }
            '}' | ']' => {
                if let Some(closer) = expected.pop() {
                    out.push(closer);
                }
            }
            _ => out.push(c),
        }
    }

    if in_string {
        if escape {
            out.pop();
        }
        out.push('"');
    }
    while let Some(closer) = expected.pop() {
        out.push(closer);
    }
    out
}

/// Remove commas that directly precede `}` or `]` (whitespace allowed
/// between), ignoring commas inside strings.
pub fn strip_trailing_commas(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escape = false;

    for (i, c) in input.char_indices() {
        if in_string {
            out.push(c);
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let rest = input[i + 1..].trim_start();
                if !(rest.starts_with('}') || rest.starts_with(']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fenced_block_ignores_surrounding_prose() {
        let raw = "Here you go!\n```json\n[{\"brand\": \"Dell\"}]\n```\nHope this helps {not json}.";
        let items = extract_json(raw).unwrap();
        assert_eq!(items, vec![json!({"brand": "Dell"})]);
    }

    #[test]
    fn fence_tag_is_case_insensitive() {
        let raw = "```JSON\n{\"laptops\": [1, 2]}\n```";
        assert_eq!(extract_json(raw).unwrap(), vec![json!(1), json!(2)]);
    }

    #[test]
    fn trailing_comma_before_close() {
        let raw = r#"{"comparisons": [{"brand":"A"}],}"#;
        assert_eq!(extract_json(raw).unwrap(), vec![json!({"brand": "A"})]);
    }

    #[test]
    fn rating_breakdown_closed_with_square_bracket() {
        let raw = r#"{"comparisons": [{"model": "X", "ratingBreakdown": {"performance": 8 ]}]}"#;
        let items = extract_json(raw).unwrap();
        assert_eq!(items[0]["ratingBreakdown"]["performance"], json!(8));
    }

    #[test]
    fn gaming_performance_closed_with_square_bracket() {
        let raw = r#"Result: {"laptops": [{"gamingPerformance": {"1080p": "90 fps", "1440p": "60 fps"], "model": "Y"}]}"#;
        let items = extract_json(raw).unwrap();
        assert_eq!(items[0]["gamingPerformance"]["1440p"], json!("60 fps"));
    }

    #[test]
    fn no_brackets_is_malformed() {
        let err = extract_json("Sorry, I could not find any laptops.").unwrap_err();
        assert!(err.candidate.is_none());
        assert!(err.reason.contains("no JSON"));
    }

    #[test]
    fn closer_before_opener_is_malformed() {
        assert!(extract_json("] nothing here {").is_err());
    }

    #[test]
    fn unparseable_candidate_keeps_diagnostics() {
        let raw = "prefix {\"a\": nope} suffix";
        let err = extract_json(raw).unwrap_err();
        assert_eq!(err.raw, raw);
        assert_eq!(err.candidate.as_deref(), Some("{\"a\": nope}"));
    }

    #[test]
    fn diagnostics_carry_repaired_candidate() {
        let raw = "```json\n{\"a\": [nope,}\n```";
        let err = extract_json(raw).unwrap_err();
        assert_eq!(err.candidate.as_deref(), Some("{\"a\": [nope]}"));
    }

    #[test]
    fn picks_first_array_valued_key() {
        let raw = r#"{"query": "thin laptops", "count": 2, "laptops": [{"m": 1}, {"m": 2}]}"#;
        assert_eq!(extract_json(raw).unwrap().len(), 2);
    }

    #[test]
    fn object_without_array_is_malformed() {
        let raw = r#"{"brand": "Dell", "model": "XPS 13"}"#;
        let err = extract_json(raw).unwrap_err();
        assert!(err.reason.contains("does not contain an array"));
    }

    #[test]
    fn scalar_is_malformed() {
        assert!(extract_json("```json\n42\n```").is_err());
    }

    #[test]
    fn braces_inside_strings_are_not_rebalanced() {
        let raw = r#"[{"summary": "uses {braces] and [brackets}, inside"}]"#;
        let items = extract_json(raw).unwrap();
        assert_eq!(items[0]["summary"], json!("uses {braces] and [brackets}, inside"));
    }

    #[test]
    fn balance_appends_missing_closers() {
        assert_eq!(balance_brackets(r#"{"a": [1, {"b": 2"#), r#"{"a": [1, {"b": 2}]}"#);
    }

    #[test]
    fn balance_drops_stray_closer() {
        assert_eq!(balance_brackets("[1]]"), "[1]");
    }

    #[test]
    fn balance_closes_truncated_string() {
        assert_eq!(balance_brackets(r#"["abc"#), r#"["abc"]"#);
    }

    #[test]
    fn trailing_commas_inside_strings_survive() {
        assert_eq!(
            strip_trailing_commas(r#"{"a": "x, }", "b": [1, 2 , ] , }"#),
            r#"{"a": "x, }", "b": [1, 2  ]  }"#
        );
    }

    #[test]
    fn array_entry_point_requires_array() {
        let raw = "Peers:\n[{\"name\": \"Ryzen 7\", \"score\": 100,},]\nDone.";
        assert_eq!(extract_json_array(raw).unwrap().len(), 1);
        assert!(extract_json_array(r#"{"a": 1}"#).is_err());
    }

    #[test]
    fn array_entry_point_reads_inside_fence() {
        let raw = "```json\n{\"peers\": [{\"name\": \"A\"}]}\n``` [ignored]";
        assert_eq!(extract_json_array(raw).unwrap(), vec![json!({"name": "A"})]);
    }

    #[test]
    fn value_entry_point_returns_objects() {
        let raw = "Analysis: {\"name\": \"RTX 4060\", \"strengths\": [\"fast\",]}";
        let value = extract_json_value(raw).unwrap();
        assert_eq!(value["name"], json!("RTX 4060"));
    }
}
