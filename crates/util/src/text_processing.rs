//! # Text Processing Utilities
//!
//! Redaction of credentials before URLs, headers or response previews reach
//! the logs.

use once_cell::sync::Lazy;
use regex::Regex;

/// Redacts values that look like secrets in a string.
///
/// Matches authorization headers, bearer/basic credentials, credential-like
/// query parameters and `KEY=value` style assignments. Key names are kept so
/// logs stay useful.
///
/// # Example
/// ```rust
/// use eogate_util::text_processing::redact_sensitive;
///
/// assert_eq!(
///     redact_sensitive("https://x.test/search?apikey=abc123&page=2"),
///     "https://x.test/search?apikey=[REDACTED]&page=2"
/// );
/// assert_eq!(redact_sensitive("Authorization: Bearer secret123"), "Authorization: [REDACTED]");
/// assert_eq!(redact_sensitive("API_KEY=abc123 TOKEN=xyz789"), "API_KEY=[REDACTED] TOKEN=[REDACTED]");
/// ```
pub fn redact_sensitive(input: &str) -> String {
    redact_sensitive_with(input, "[REDACTED]")
}

/// Redacts sensitive-looking values, using a custom replacement token.
pub fn redact_sensitive_with(input: &str, replacement: &str) -> String {
    let mut redacted = input.to_string();

    for pattern in get_redact_patterns().iter() {
        redacted = pattern
            .replace_all(&redacted, |captures: &regex::Captures| {
                let prefix = captures.get(1).map(|m| m.as_str()).unwrap_or("");
                format!("{}{}", prefix, replacement)
            })
            .to_string();
    }

    redacted
}

/// Returns compiled regex patterns for detecting sensitive information, most
/// specific first. Group 1 is the kept prefix, group 2 the secret.
pub fn get_redact_patterns() -> &'static Vec<Regex> {
    static REDACT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(build_redact_patterns);

    &REDACT_PATTERNS
}

fn build_redact_patterns() -> Vec<Regex> {
    [
        r"(?i)(authorization:\s+)([^\s]+(?:\s+[^\s]+)*)",
        r"(?i)((?:^|\b)Bearer\s+)([A-Za-z0-9\-._~+/]+=*)",
        r"(?i)((?:^|\b)Basic\s+)([A-Za-z0-9+/]+=*)",
        r"(?i)([?&](?:api_?key|access_token|token|password|secret|key)=)([^&\s]+)",
        r"(?i)(\b[A-Z0-9_]*(?:KEY|TOKEN|SECRET|PASSWORD)=)([^\s&]+)",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("redaction pattern should compile"))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_non_secret_parameters() {
        let input = "https://catalogue.test/search?productType=S2&maxRecords=20";
        assert_eq!(redact_sensitive(input), input);
    }

    #[test]
    fn custom_replacement_token() {
        assert_eq!(
            redact_sensitive_with("?access_token=t0k3n", "***"),
            "?access_token=***"
        );
    }
}
