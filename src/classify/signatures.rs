//! Every stderr signature the classifier recognizes. Extend the taxonomy
//! here; the decision order lives in the parent module.

use std::sync::LazyLock;

use regex::Regex;

/// Quota and throttling markers.
pub const RATE_LIMIT: &[&str] = &[
    "You exceeded your current quota",
    "exceeded your current quota",
    "ResourceExhausted: 429",
    "429 Too Many Requests",
    "API rate limit",
    "retry_delay",
    "Retry-After",
];

/// Any of these means an import failed.
pub const MISSING_MODULE: &[&str] = &["ModuleNotFoundError", "No module named"];

/// Extracts the module name from a failed import.
pub static MODULE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"No module named ['"]([^'"]+)['"]"#).expect("valid regex"));

/// Unset, invalid or unavailable API keys.
pub const CREDENTIAL: &[&str] = &[
    "GOOGLE_API_KEY environment variable not set",
    "API key not available",
    "API key invalid",
    "API key not found",
    "API key is required",
    "API_KEY_INVALID",
    "api_key",
];

/// Printed together when faiss falls back to its generic build.
pub const FAISS_AVX2_FALLBACK: &[&str] = &[
    "Could not load library with AVX2 support",
    "No module named 'faiss.swigfaiss_avx2'",
    "Successfully loaded faiss",
];

/// Throttling that did not stop the worker from finishing.
pub const SOFT_THROTTLE: &[&str] = &["ResourceExhausted"];

/// First signature in `table` that occurs in `haystack`.
pub fn find<'a>(table: &[&'a str], haystack: &str) -> Option<&'a str> {
    table.iter().copied().find(|sig| haystack.contains(sig))
}

/// The trimmed line of `haystack` containing `signature`.
pub fn line_containing(haystack: &str, signature: &str) -> String {
    haystack
        .lines()
        .find(|line| line.contains(signature))
        .unwrap_or(signature)
        .trim()
        .to_string()
}
