//! Tolerant extraction of JSON from LLM output.
//!
//! Models wrap JSON in prose and code fences; we take the first
//! balanced `{...}` or `[...]` span, honoring string literals and
//! escapes, and parse that.

use serde::de::DeserializeOwned;

use sy_domain::{Error, Result};

/// The first balanced JSON object or array in `text`, if any.
pub fn extract_first_json(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find(['{', '['])?;
    let open = bytes[start];
    let close = if open == b'{' { b'}' } else { b']' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            _ if b == open => depth += 1,
            _ if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Extract and deserialize the first JSON value in `text`.
pub fn parse_first_json<T: DeserializeOwned>(text: &str) -> Result<T> {
    let span = extract_first_json(text)
        .ok_or_else(|| Error::Parse("no JSON value in model output".into()))?;
    serde_json::from_str(span).map_err(|e| Error::Parse(format!("model JSON malformed: {e}")))
}
