//! Post-conversion cleanup for rendered web pages.
//!
//! Each pass is a function `&str -> String` applied in sequence. The output is
//! meant for text matching and LLM context, so link targets and images are
//! dropped while their visible text is kept.

use std::sync::LazyLock;

use regex::Regex;

/// Run the full cleanup pipeline on raw Markdown text.
pub(crate) fn run_pipeline(md: &str) -> String {
    let mut result = strip_images(md);
    result = unwrap_links(&result);
    result = strip_leftover_html(&result);
    result = normalize_whitespace(&result);
    result = collapse_blank_lines(&result);
    result.trim().to_string()
}

// ---------------------------------------------------------------------------
// Pass 1: Drop images
// ---------------------------------------------------------------------------

/// Remove `![alt](src)` images entirely.
fn strip_images(md: &str) -> String {
    static IMG_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").expect("valid regex"));

    IMG_RE.replace_all(md, "").to_string()
}

// ---------------------------------------------------------------------------
// Pass 2: Keep link text, drop targets
// ---------------------------------------------------------------------------

/// Replace `[text](href)` with `text`; empty-text links disappear.
fn unwrap_links(md: &str) -> String {
    static LINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("valid regex"));

    LINK_RE.replace_all(md, "$1").to_string()
}

// ---------------------------------------------------------------------------
// Pass 3: Strip leftover HTML tags
// ---------------------------------------------------------------------------

/// Remove stray tags outside fenced code, preserving their inner text.
fn strip_leftover_html(md: &str) -> String {
    static HTML_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"</?[a-zA-Z][a-zA-Z0-9-]*(?:\s[^>]*)?/?>").expect("valid regex")
    });

    let mut in_code_block = false;
    md.lines()
        .map(|line| {
            if line.trim_start().starts_with("```") {
                in_code_block = !in_code_block;
                return line.to_string();
            }
            if in_code_block {
                line.to_string()
            } else {
                HTML_TAG_RE.replace_all(line, "").to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Pass 4: Whitespace
// ---------------------------------------------------------------------------

/// Trim trailing whitespace and turn whitespace-only lines into blank lines.
fn normalize_whitespace(md: &str) -> String {
    md.lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Collapse runs of blank lines into a single blank line.
fn collapse_blank_lines(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    MULTI_BLANK_RE.replace_all(md, "\n\n").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn images_are_removed() {
        let result = strip_images("before ![logo](/img/logo.png) after");
        assert_eq!(result, "before  after");
    }

    #[test]
    fn links_keep_their_text() {
        let result = unwrap_links("see [the docs](https://example.com/docs) and [](#x)");
        assert_eq!(result, "see the docs and ");
    }

    #[test]
    fn leftover_tags_are_stripped_outside_code() {
        let input = "<span class=\"x\">kept</span>\n```html\n<div>code</div>\n```";
        let result = strip_leftover_html(input);
        assert!(result.starts_with("kept\n"));
        assert!(result.contains("<div>code</div>"));
    }

    #[test]
    fn blank_runs_collapse_to_one_blank_line() {
        let result = collapse_blank_lines("a\n\n\n\n\nb");
        assert_eq!(result, "a\n\nb");
    }

    #[test]
    fn full_pipeline_produces_plain_paragraphs() {
        let input = "# Title   \n\n\n\n![x](y.png)\n\nRead [more](/more) <b>now</b>\n\n\n";
        let result = run_pipeline(input);
        assert_eq!(result, "# Title\n\nRead more now");
    }
}
