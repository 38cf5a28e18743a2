//! Locating the JSON object inside a free-text model reply.
//!
//! Models wrap their JSON in prose or markdown fences. The scan starts at
//! the first `{`, tracks nesting depth (ignoring braces inside JSON string
//! literals) and stops at the brace that returns depth to zero. A candidate
//! that does not decode is skipped as a whole and the scan resumes after it,
//! so stray `{...}` prose before the real object is tolerated while nested
//! objects are never returned on their own. A `{` that never closes is
//! skipped too unless the text from it onwards is a truncated JSON value.

use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::error::ParseError;

/// Raw model output for one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionReply {
    pub filename: String,
    pub text: String,
}

impl ExtractionReply {
    pub fn new(filename: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            text: text.into(),
        }
    }

    /// Decode the JSON object embedded in this reply.
    pub fn parse(&self) -> Result<Map<String, Value>, ParseError> {
        extract_json_object(&self.text).inspect_err(|e| {
            debug!("{}: could not parse reply: {}", self.filename, e);
        })
    }
}

/// Find and decode the first well-formed top-level JSON object in `text`.
pub fn extract_json_object(text: &str) -> Result<Map<String, Value>, ParseError> {
    let bytes = text.as_bytes();
    let mut from = 0;
    let mut last_error = None;

    while let Some(offset) = text[from..].find('{') {
        let start = from + offset;

        let Some(end) = matching_brace(bytes, start) else {
            if is_truncated_json(&text[start..]) {
                // Every later `{` sits inside this unterminated object.
                return Err(last_error.unwrap_or(ParseError::Unbalanced(start)));
            }
            trace!("Skipping unclosed brace in prose at byte {}", start);
            last_error.get_or_insert(ParseError::Unbalanced(start));
            from = start + 1;
            continue;
        };

        let candidate = &text[start..=end];
        match serde_json::from_str::<Value>(candidate) {
            Ok(Value::Object(map)) => {
                trace!("Decoded JSON object at bytes {}..={}", start, end);
                return Ok(map);
            }
            Ok(other) => {
                last_error = Some(ParseError::InvalidJson(format!("expected object, found {}", other)));
            }
            Err(e) => {
                trace!("Skipping undecodable candidate at byte {}: {}", start, e);
                last_error = Some(ParseError::InvalidJson(e.to_string()));
            }
        }

        from = end + 1;
    }

    Err(last_error.unwrap_or(ParseError::NoObject))
}

/// Whether `text` is valid JSON that was cut off before its end.
fn is_truncated_json(text: &str) -> bool {
    match serde_json::from_str::<Value>(text) {
        Ok(_) => false,
        Err(e) => e.is_eof(),
    }
}

/// Byte index of the `}` closing the `{` at `start`.
fn matching_brace(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn parsed(text: &str) -> Value {
        Value::Object(extract_json_object(text).unwrap())
    }

    #[test]
    fn test_prose_around_object() {
        let reply = "Here you go:\n{\"invoice_date\":\"2024-01-05\",\"total_amount\":\"120.00\"}\nThanks";
        assert_eq!(
            parsed(reply),
            json!({"invoice_date": "2024-01-05", "total_amount": "120.00"})
        );
    }

    #[test]
    fn test_code_fence() {
        let reply = "```json\n{\"a\": {\"b\": [1, 2]}}\n```";
        assert_eq!(parsed(reply), json!({"a": {"b": [1, 2]}}));
    }

    #[test]
    fn test_trailing_brace_in_prose() {
        // first/last slicing would run into the closing note
        let reply = r#"{"a": {"b": 1}} Note: fields like {c} were unavailable }"#;
        assert_eq!(parsed(reply), json!({"a": {"b": 1}}));
    }

    #[test]
    fn test_braces_inside_strings() {
        let reply = r#"Result: {"name": "ACME {Europe}", "note": "a \"quoted\" } brace"} done"#;
        assert_eq!(
            parsed(reply),
            json!({"name": "ACME {Europe}", "note": "a \"quoted\" } brace"})
        );
    }

    #[test]
    fn test_skips_undecodable_leading_candidate() {
        let reply = r#"Template {placeholder} filled: {"invoice_number": "INV-7"}"#;
        assert_eq!(parsed(reply), json!({"invoice_number": "INV-7"}));
    }

    #[test]
    fn test_embedded_anywhere() {
        let object = json!({"x": "1", "nested": {"y": null}, "list": [{"z": "2"}]});
        let encoded = serde_json::to_string(&object).unwrap();
        for (before, after) in [("", ""), ("lead ", ""), ("", " trail"), ("a\n\n", "\n}b")] {
            let reply = format!("{}{}{}", before, encoded, after);
            assert_eq!(parsed(&reply), object);
        }
    }

    #[test]
    fn test_no_object() {
        assert!(matches!(extract_json_object("no json here"), Err(ParseError::NoObject)));
        assert!(matches!(extract_json_object(""), Err(ParseError::NoObject)));
    }

    #[test]
    fn test_unbalanced() {
        assert!(matches!(
            extract_json_object(r#"cut off: {"a": {"b": 1}"#),
            Err(ParseError::Unbalanced(9))
        ));
    }

    #[test]
    fn test_unclosed_brace_in_leading_prose() {
        let reply = r#"Use { to open. Result: {"invoice_number": "INV-1"}"#;
        assert_eq!(parsed(reply), json!({"invoice_number": "INV-1"}));

        let reply = r#"Quote " and { here. {"total_amount": "9.50"} done"#;
        assert_eq!(parsed(reply), json!({"total_amount": "9.50"}));
    }

    #[test]
    fn test_unclosed_brace_without_object() {
        assert!(matches!(
            extract_json_object("Use { to open"),
            Err(ParseError::Unbalanced(4))
        ));
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            extract_json_object("{not: json}"),
            Err(ParseError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_reply_parse() {
        let reply = ExtractionReply::new("a.png", "ok {\"k\": \"v\"}");
        assert_eq!(reply.parse().unwrap().get("k"), Some(&json!("v")));
    }
}
