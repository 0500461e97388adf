//! # HTTP Utilities
//!
//! Helpers for turning provider response bodies into JSON with useful error
//! context, and for describing common failure statuses.

use serde_json::Value;
use thiserror::Error;

/// Return a user-friendly error message for common HTTP status codes.
///
/// # Example
/// ```rust
/// use eogate_util::http::status_error_message;
///
/// let error_401 = status_error_message(401).unwrap();
/// assert!(error_401.contains("Unauthorized"));
/// assert!(error_401.contains(".netrc"));
///
/// assert!(status_error_message(429).unwrap().contains("Too Many Requests"));
/// assert!(status_error_message(404).is_none());
/// ```
pub fn status_error_message(status_code: u16) -> Option<String> {
    match status_code {
        401 => Some("Unauthorized (401). Hint: check the provider credentials in the auth block or ~/.netrc".into()),
        403 => Some("Forbidden (403). Hint: the account may not have access to this collection".into()),
        429 => Some("Too Many Requests (429). Hint: the provider is rate limiting; retry later".into()),
        _ => None,
    }
}

/// Parse response bytes into JSON, providing detailed errors on failure.
///
/// # Errors
/// Returns a [`JsonParseError`] carrying the serde error and up to 200
/// characters of the body (whitespace collapsed) to aid debugging truncated
/// or malformed payloads.
///
/// # Example
/// ```rust
/// use eogate_util::http::parse_response_json_strict;
///
/// assert!(parse_response_json_strict(br#"{"features": []}"#, Some(200)).is_ok());
///
/// let error = parse_response_json_strict(b"<html>oops</html>", Some(502)).unwrap_err();
/// assert!(error.to_string().contains("status 502"));
/// assert_eq!(error.body_preview(), "<html>oops</html>");
/// ```
pub fn parse_response_json_strict(bytes: &[u8], status: Option<u16>) -> Result<Value, JsonParseError> {
    serde_json::from_slice::<Value>(bytes).map_err(|error| {
        let status_note = status
            .map(|code| format!("status {code}"))
            .unwrap_or_else(|| "unknown status".to_string());
        let preview = truncate_response_preview(&String::from_utf8_lossy(bytes), 200);

        JsonParseError::new(status_note, error, preview)
    })
}

/// Collapses whitespace and truncates `text` for log and error messages.
pub fn truncate_response_preview(text: &str, limit: usize) -> String {
    if text.trim().is_empty() {
        return "<empty>".to_string();
    }

    let mut preview = String::new();
    for ch in text.chars() {
        if preview.len() >= limit {
            preview.push_str("...");
            break;
        }
        match ch {
            '\n' | '\r' | '\t' => {
                if !preview.ends_with(' ') {
                    preview.push(' ');
                }
            }
            _ => preview.push(ch),
        }
    }

    preview.trim().to_string()
}

/// Error returned when strict JSON parsing of an HTTP response fails.
#[derive(Debug, Error)]
#[error("failed to parse JSON response ({status_note}): {source}. body preview: {body_preview}")]
pub struct JsonParseError {
    status_note: String,
    #[source]
    source: serde_json::Error,
    body_preview: String,
}

impl JsonParseError {
    pub fn new(status_note: String, source: serde_json::Error, body_preview: String) -> Self {
        Self {
            status_note,
            source,
            body_preview,
        }
    }

    /// Access the truncated response preview captured during parsing.
    pub fn body_preview(&self) -> &str {
        &self.body_preview
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_collapses_newlines_and_truncates() {
        let body = format!("line one\n\tline two {}", "x".repeat(300));
        let preview = truncate_response_preview(&body, 20);
        assert!(preview.starts_with("line one line two"));
        assert!(preview.ends_with("..."));
    }

    #[test]
    fn empty_body_preview() {
        assert_eq!(truncate_response_preview("  \n", 10), "<empty>");
    }
}
