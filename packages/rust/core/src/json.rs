//! Locating a JSON document inside free-form model output.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// Find and parse the first JSON document embedded in `raw`.
///
/// Tries, in order: fenced code blocks (with or without a `json` tag), the
/// whole trimmed text, then the outermost `{...}` or `[...]` span.
pub fn extract_json(raw: &str) -> Option<Value> {
    static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)```[A-Za-z]*\s*\n?(.*?)```").expect("valid regex")
    });

    for caps in FENCE_RE.captures_iter(raw) {
        if let Ok(value) = serde_json::from_str(caps[1].trim()) {
            return Some(value);
        }
    }

    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    let mut spans: Vec<(usize, usize)> = [('{', '}'), ('[', ']')]
        .into_iter()
        .filter_map(|(open, close)| {
            let start = trimmed.find(open)?;
            let end = trimmed.rfind(close)?;
            (end > start).then_some((start, end))
        })
        .collect();
    // Whichever container opens first is the outermost one.
    spans.sort_unstable();

    spans
        .into_iter()
        .find_map(|(start, end)| serde_json::from_str(&trimmed[start..=end]).ok())
}
