//! Text normalization — markup out, whitespace collapsed.

use std::sync::LazyLock;

use regex::Regex;

static SCRIPT_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>|<style\b[^>]*>.*?</style\s*>")
        .expect("static regex")
});

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("static regex"));

/// Reduce a raw (possibly HTML) body to plain text.
///
/// Tags become a single space so adjacent words never fuse; `<script>` and
/// `<style>` blocks are dropped with their contents. Whitespace runs
/// (including `&nbsp;`) collapse to one space and the result is trimmed.
///
/// Idempotent: `normalize(Some(&normalize(x))) == normalize(x)`.
pub fn normalize(body: Option<&str>) -> String {
    let Some(body) = body else {
        return String::new();
    };
    if body.is_empty() {
        return String::new();
    }

    let without_blocks = SCRIPT_STYLE.replace_all(body, " ");
    let without_tags = TAG.replace_all(&without_blocks, " ");
    let spaced = without_tags.replace("&nbsp;", " ");

    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize bytes that may not be valid UTF-8.
#[cfg(test)]
pub fn normalize_bytes(body: &[u8]) -> String {
    normalize(Some(&String::from_utf8_lossy(body)))
}

/// Lower-cased normalized text, used for case-insensitive matching.
pub fn normalize_lower(body: Option<&str>) -> String {
    normalize(body).to_lowercase()
}
