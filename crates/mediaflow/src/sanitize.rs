//! Helpers for sanitizing data before it enters tracing span attributes.
//!
//! Source URLs can carry credentials or signed query parameters; these
//! functions keep them out of logs.

use std::path::Path;

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Strips userinfo, query string and fragment from a URL.
///
/// - `https://user:pw@host/watch?v=1&sig=x` → `https://****@host/watch`
/// - `https://host/video.mp4` → unchanged
pub fn redact_url(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or_default();

    if let Some(scheme_end) = without_query.find("://") {
        let after_scheme = &without_query[scheme_end + 3..];
        let authority_end = after_scheme.find('/').unwrap_or(after_scheme.len());
        if let Some(at_pos) = after_scheme[..authority_end].rfind('@') {
            let scheme = &without_query[..scheme_end + 3];
            let after_at = &after_scheme[at_pos + 1..];
            return format!("{}****@{}", scheme, after_at);
        }
    }

    without_query.to_string()
}
