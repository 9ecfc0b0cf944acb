//! Download filename derivation.

use std::sync::LazyLock;

use regex::Regex;

static DISALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9\s\-_]").unwrap());
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").unwrap());
static HYPHENS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-+").unwrap());

/// Stem used when a title sanitizes to nothing.
pub const FALLBACK_STEM: &str = "download";

const MAX_STEM_LEN: usize = 100;

/// Turn a media title into a filesystem- and header-safe filename stem.
///
/// Keeps ASCII letters, digits, whitespace, `-` and `_`; whitespace runs become
/// a single `-`, repeated hyphens collapse, a leading or trailing hyphen is
/// dropped, and the result is cut to 100 characters.
pub fn sanitize_stem(title: &str) -> String {
    let kept = DISALLOWED.replace_all(title, "");
    let dashed = WHITESPACE.replace_all(&kept, "-");
    let collapsed = HYPHENS.replace_all(&dashed, "-");
    let trimmed = collapsed.trim_matches('-');

    // Only ASCII survives the first pass, so byte and char lengths agree.
    let stem: String = trimmed.chars().take(MAX_STEM_LEN).collect();
    if stem.is_empty() {
        FALLBACK_STEM.to_string()
    } else {
        stem
    }
}

/// Stem plus extension, e.g. `My-Video.mp4`.
pub fn with_extension(stem: &str, extension: &str) -> String {
    format!("{stem}.{extension}")
}
