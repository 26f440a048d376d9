// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Error Classifier
//!
//! Coarse HARD/SOFT classification of tool error text. The class only decides
//! how long a failure is remembered (see [`TtlPolicy`](super::failure::TtlPolicy)),
//! never whether a call is blocked.

use super::failure::ErrorType;

/// Case-insensitive substrings that mark a failure as transient, in match order.
///
/// Purely numeric entries are HTTP status codes. They only match a standalone
/// number whose preceding word is one of [`STATUS_CONTEXT`], so `line 500`
/// stays HARD while `HTTP 500` is SOFT.
pub const DEFAULT_SOFT_PATTERNS: &[&str] = &[
    // connectivity
    "connection",
    "network",
    "unreachable",
    "refused",
    "reset by peer",
    "broken pipe",
    "dns",
    // timeouts
    "timeout",
    "timed out",
    // permissions
    "permission",
    "access denied",
    // disk / resources
    "no space",
    "disk full",
    "disk quota",
    "out of memory",
    // rate limiting
    "rate limit",
    "ratelimit",
    "too many requests",
    "429",
    // 5xx
    "500",
    "502",
    "503",
    "504",
    "internal server error",
    "bad gateway",
    "service unavailable",
    "gateway timeout",
    // generic transience
    "temporary",
    "temporarily",
    "retry",
    "unavailable",
    "try again",
];

/// Words that mark a following bare number as an HTTP status.
pub const STATUS_CONTEXT: &[&str] = &[
    "http",
    "https",
    "status",
    "code",
    "error",
    "got",
    "with",
    "returned",
    "response",
    "responded",
];

/// Maps error text to [`ErrorType`].
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    soft_patterns: Vec<String>,
}

impl ErrorClassifier {
    /// Classifier with the built-in pattern list.
    pub fn new() -> Self {
        Self {
            soft_patterns: DEFAULT_SOFT_PATTERNS.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Append extra SOFT patterns after the built-in ones. Blank patterns are dropped.
    pub fn with_extra_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.soft_patterns.extend(
            patterns
                .into_iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .filter(|p| !p.is_empty()),
        );
        self
    }

    pub fn classify(&self, error_text: &str) -> ErrorType {
        match self.matching_pattern(error_text) {
            Some(_) => ErrorType::Soft,
            None => ErrorType::Hard,
        }
    }

    /// First SOFT pattern found in `error_text`, if any.
    pub fn matching_pattern(&self, error_text: &str) -> Option<&str> {
        let haystack = error_text.to_lowercase();
        self.soft_patterns
            .iter()
            .find(|pattern| contains_pattern(&haystack, pattern))
            .map(String::as_str)
    }

    pub fn patterns(&self) -> &[String] {
        &self.soft_patterns
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

fn contains_pattern(haystack: &str, pattern: &str) -> bool {
    if !pattern.bytes().all(|b| b.is_ascii_digit()) {
        return haystack.contains(pattern);
    }
    haystack
        .match_indices(pattern)
        .any(|(start, _)| is_status_code(haystack, start, start + pattern.len()))
}

/// `haystack[start..end]` is a whole number introduced by a status word, or
/// leads the text.
fn is_status_code(haystack: &str, start: usize, end: usize) -> bool {
    let bytes = haystack.as_bytes();
    let standalone = (start == 0 || !bytes[start - 1].is_ascii_digit())
        && bytes.get(end).map_or(true, |b| !b.is_ascii_digit());

    standalone
        && preceding_word(&haystack[..start]).map_or(true, |word| STATUS_CONTEXT.contains(&word))
}

/// Last alphabetic word of `prefix`, skipping digits and punctuation (`http/1.1 ` gives `http`).
fn preceding_word(prefix: &str) -> Option<&str> {
    let trimmed = prefix.trim_end_matches(|c: char| !c.is_alphabetic());
    let start = trimmed
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_alphabetic())
        .last()
        .map(|(i, _)| i)?;
    Some(&trimmed[start..])
}

/// Classify with the built-in patterns.
pub fn classify(error_text: &str) -> ErrorType {
    ErrorClassifier::new().classify(error_text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors_are_soft() {
        for text in [
            "Connection refused",
            "Request TIMED OUT after 30s",
            "Permission denied (os error 13)",
            "No space left on device",
            "Rate limit exceeded",
            "HTTP 503 Service Unavailable",
            "upstream returned 502",
            "Resource temporarily unavailable",
        ] {
            assert_eq!(classify(text), ErrorType::Soft, "{text}");
        }
    }

    #[test]
    fn test_status_codes_need_http_context() {
        let classifier = ErrorClassifier::new();
        assert_eq!(classifier.matching_pattern("HTTP/1.1 502"), Some("502"));
        assert_eq!(classifier.matching_pattern("request failed: status 504"), Some("504"));
        assert_eq!(classifier.matching_pattern("error 429"), Some("429"));
        assert_eq!(classifier.matching_pattern("500"), Some("500"));

        assert_eq!(classifier.matching_pattern("invalid syntax at line 500"), None);
        assert_eq!(classifier.matching_pattern("status 5030"), None);
        assert_eq!(classifier.matching_pattern("column 429: unexpected token"), None);
    }

    #[test]
    fn test_logic_errors_are_hard() {
        for text in [
            "SyntaxError: invalid syntax",
            "SyntaxError: invalid syntax at line 500",
            "IndexError at offset 15003",
            "KeyError: 'user_429'",
            "File not found: missing.py",
            "KeyError: 'name'",
            "thread 'main' panicked at index out of bounds",
            "",
        ] {
            assert_eq!(classify(text), ErrorType::Hard, "{text}");
        }
    }

    #[test]
    fn test_first_matching_pattern_reported() {
        let classifier = ErrorClassifier::new();
        assert_eq!(
            classifier.matching_pattern("connection timeout"),
            Some("connection")
        );
        assert_eq!(classifier.matching_pattern("TypeError"), None);
    }

    #[test]
    fn test_extra_patterns() {
        let classifier = ErrorClassifier::new().with_extra_patterns(["  Lock Contention ", ""]);
        assert_eq!(classifier.classify("database lock contention"), ErrorType::Soft);
        assert_eq!(classifier.patterns().len(), DEFAULT_SOFT_PATTERNS.len() + 1);
    }
}
