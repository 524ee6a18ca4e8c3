#![forbid(unsafe_code)]

//! Turns user-supplied YouTube URLs into canonical 11-character video IDs.
//!
//! The patterns are tried specific-first: embed and short-link URLs often
//! carry an unrelated 11-character token earlier in the path, so the generic
//! `v=`/path-segment matcher runs last. Matching the generic pattern first
//! is a known way to misidentify those URLs.

use regex::Regex;
use std::sync::LazyLock;

/// Ordered matchers. Each captures the video ID in group 1; the first match
/// anywhere in the input wins.
static ID_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Embed form: .../embed/<id>
        r"embed/([0-9A-Za-z_-]{11})",
        // Short-link form: youtu.be/<id>
        r"youtu\.be/([0-9A-Za-z_-]{11})",
        // Generic form: ?v=<id> or any path segment followed by an 11-char token
        r"(?:v=|/)([0-9A-Za-z_-]{11})",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("hardcoded pattern compiles"))
    .collect()
});

/// Extracts the canonical video ID from any of the recognized URL shapes.
/// Returns `None` when no pattern matches anywhere in the string. Pure
/// function, no side effects.
pub fn extract_video_id(url: &str) -> Option<String> {
    ID_PATTERNS.iter().find_map(|pattern| {
        pattern
            .captures(url)
            .and_then(|caps| caps.get(1))
            .map(|id| id.as_str().to_string())
    })
}

/// Canonical watch URL for a video ID, used when a metadata endpoint wants a
/// full URL rather than a bare ID.
pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}
