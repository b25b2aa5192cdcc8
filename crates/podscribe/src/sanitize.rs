//! Helpers for sanitizing data before it reaches logs, span attributes or
//! file names.
//!
//! Audio and feed URLs are often pre-signed, so their credentials and query
//! strings never go into traces.

use std::sync::LazyLock;

use regex::Regex;

static RE_NON_SLUG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9\x{4e00}-\x{9fff}]+").unwrap());

/// Maximum length of a sanitized file name stem, in characters.
const MAX_FILENAME_LEN: usize = 200;

/// Strips userinfo, query string and fragment from a URL.
///
/// - `https://user:pw@cdn.example.com/a.mp3?sig=x` → `https://cdn.example.com/a.mp3`
/// - `https://cdn.example.com/a.mp3` → unchanged
pub fn redact_url(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or_default();

    if let Some(scheme_end) = without_query.find("://") {
        let (scheme, rest) = without_query.split_at(scheme_end + 3);
        let authority_end = rest.find('/').unwrap_or(rest.len());
        let (authority, path) = rest.split_at(authority_end);
        let host = authority.rsplit('@').next().unwrap_or(authority);
        return format!("{}{}{}", scheme, host, path);
    }

    without_query.to_string()
}

/// Turns arbitrary text into a lowercase slug of at most `max_len`
/// characters. Runs of other characters collapse into a single `-`.
pub fn slugify(text: &str, max_len: usize) -> String {
    let slug = RE_NON_SLUG.replace_all(text, "-").to_lowercase();
    let truncated: String = slug.trim_matches('-').chars().take(max_len).collect();
    truncated.trim_end_matches('-').to_string()
}

/// Makes a title safe to use as a file name stem.
///
/// Removes `<>:"/\|?*` and control characters, limits the length and trims
/// leading and trailing spaces and dots. Falls back to `"untitled"`.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
        .filter(|c| !c.is_control())
        .take(MAX_FILENAME_LEN)
        .collect();

    let trimmed = cleaned.trim_matches(|c: char| c == ' ' || c == '.');
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}
