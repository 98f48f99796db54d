//! Lenient JSON parsing for metadata documents.
//!
//! Python writers emit bare `NaN`, `Infinity` and `-Infinity` tokens, which
//! are not JSON. They are rewritten to the strings `"NaN"`, `"Infinity"` and
//! `"-Infinity"` before parsing.

use std::borrow::Cow;

use serde_json::Value;

use crate::error::{RemoteArrayError, Result};

const NON_FINITE: [&str; 3] = ["-Infinity", "Infinity", "NaN"];

/// Quote non-finite number tokens that appear outside string literals.
pub fn repair_non_finite(text: &str) -> Cow<'_, str> {
    if !NON_FINITE.iter().any(|t| text.contains(t)) {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len() + 16);
    let mut in_string = false;
    let mut escaped = false;
    let mut rest = text;

    while let Some(c) = rest.chars().next() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
        } else if let Some(token) = NON_FINITE.iter().find(|t| rest.starts_with(**t)) {
            out.push('"');
            out.push_str(token);
            out.push('"');
            rest = &rest[token.len()..];
            continue;
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }

    Cow::Owned(out)
}

/// Parse a metadata document, repairing non-finite tokens first.
pub fn parse_json(data: &[u8]) -> Result<Value> {
    let text = std::str::from_utf8(data)
        .map_err(|e| RemoteArrayError::malformed(format!("metadata is not UTF-8: {}", e)))?;
    Ok(serde_json::from_str(&repair_non_finite(text))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_repairs_bare_tokens() {
        let value = parse_json(br#"{"fill_value": NaN, "range": [-Infinity, Infinity]}"#).unwrap();
        assert_eq!(
            value,
            json!({"fill_value": "NaN", "range": ["-Infinity", "Infinity"]})
        );
    }

    #[test]
    fn test_leaves_strings_alone() {
        let text = r#"{"note": "NaN in \"quoted NaN\" text", "v": 1}"#;
        assert!(matches!(repair_non_finite(text), Cow::Owned(_)));
        let value = parse_json(text.as_bytes()).unwrap();
        assert_eq!(value["note"], json!("NaN in \"quoted NaN\" text"));
    }

    #[test]
    fn test_untouched_when_clean() {
        assert!(matches!(repair_non_finite(r#"{"a": 1}"#), Cow::Borrowed(_)));
    }

    #[test]
    fn test_invalid_json_is_malformed() {
        assert!(matches!(
            parse_json(b"{\"a\": }"),
            Err(RemoteArrayError::MalformedMetadata(_))
        ));
        assert!(parse_json(&[0xff]).is_err());
    }
}
