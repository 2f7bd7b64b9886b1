//! HTML-to-Markdown rendering and section splitting for fetched web pages.
//!
//! Renders raw HTML to readable Markdown using the `htmd` crate, runs a cleanup
//! pipeline tuned for text matching, and splits the result into paragraph-level
//! sections the aggregator can score.

mod cleanup;
mod sections;

use scraper::{Html, Selector};
use tracing::{debug, instrument};

use quarry_shared::{QuarryError, Result};

pub use sections::split_sections;

/// Tags whose content never carries page text.
const SKIP_TAGS: &[&str] = &[
    "script", "style", "nav", "header", "footer", "aside", "form", "iframe", "noscript", "svg",
    "button",
];

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// A page rendered to Markdown.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// Cleaned Markdown body.
    pub markdown: String,
    /// `<title>` or first H1, when present.
    pub title: Option<String>,
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Render an HTML document to cleaned Markdown.
///
/// 1. Pick the main content container (falls back to `<body>`)
/// 2. Flatten tables into pipe rows
/// 3. Convert HTML → Markdown via `htmd`
/// 4. Run the cleanup pipeline
#[instrument(skip(html), fields(len = html.len()))]
pub fn render(html: &str) -> Result<RenderedPage> {
    let doc = Html::parse_document(html);
    let title = extract_title(&doc);

    let content_html = extract_content_html(&doc).unwrap_or_else(|| html.to_string());
    let content_html = flatten_tables(&content_html);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(SKIP_TAGS.to_vec())
        .build();

    let raw_markdown = converter
        .convert(&content_html)
        .map_err(|e| QuarryError::Conversion(format!("htmd conversion failed: {e}")))?;

    let markdown = cleanup::run_pipeline(&raw_markdown);

    debug!(
        raw_len = raw_markdown.len(),
        final_len = markdown.len(),
        "page rendered"
    );

    Ok(RenderedPage { markdown, title })
}

/// Whether a response body looks like HTML rather than plain text.
pub fn looks_like_html(body: &str) -> bool {
    let head = body.trim_start();
    let prefix: String = head.chars().take(256).collect::<String>().to_ascii_lowercase();
    prefix.starts_with("<!doctype html") || prefix.starts_with("<html") || prefix.contains("<body")
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Extract the main content HTML from the most specific known container.
fn extract_content_html(doc: &Html) -> Option<String> {
    let selectors = [
        "article",
        "main",
        "[role=\"main\"]",
        "#content",
        ".post-content",
        ".article-content",
        "body",
    ];

    selectors
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .find_map(|selector| doc.select(&selector).next().map(|el| el.inner_html()))
}

/// Page title from `<title>`, falling back to the first `<h1>`.
fn extract_title(doc: &Html) -> Option<String> {
    ["title", "h1"]
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .find_map(|selector| {
            doc.select(&selector)
                .next()
                .map(|el| el.text().collect::<String>().trim().to_string())
                .filter(|t| !t.is_empty())
        })
}

/// Replace each `<table>` with one `<p>` per row, cells joined by ` | `.
///
/// `htmd` 0.1 has no table support; pipe rows keep cell text on one line so a
/// row stays inside a single section.
fn flatten_tables(html: &str) -> String {
    let Ok(table_sel) = Selector::parse("table") else {
        return html.to_string();
    };
    let Ok(row_sel) = Selector::parse("tr") else {
        return html.to_string();
    };
    let Ok(cell_sel) = Selector::parse("th, td") else {
        return html.to_string();
    };

    let fragment = Html::parse_fragment(html);
    let mut result = html.to_string();

    for table in fragment.select(&table_sel) {
        let rows: Vec<String> = table
            .select(&row_sel)
            .map(|row| {
                row.select(&cell_sel)
                    .map(|cell| cell.text().collect::<String>().trim().to_string())
                    .collect::<Vec<_>>()
                    .join(" | ")
            })
            .filter(|row| !row.trim().is_empty())
            .map(|row| format!("<p>{row}</p>"))
            .collect();

        result = result.replacen(&table.html(), &rows.join(""), 1);
    }

    result
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_simple_page() {
        let html = "<html><head><title>Pie</title></head><body><main><h1>Apple Pie</h1><p>Mix apples.</p></main></body></html>";
        let page = render(html).unwrap();

        assert_eq!(page.title.as_deref(), Some("Pie"));
        assert!(page.markdown.contains("# Apple Pie"));
        assert!(page.markdown.contains("Mix apples."));
    }

    #[test]
    fn render_strips_page_chrome() {
        let html = r#"<html><body>
            <header><p>Site banner</p></header>
            <nav><a href="/">Home</a></nav>
            <p>Important text.</p>
            <footer><p>Copyright 2024</p></footer>
            <script>track()</script>
        </body></html>"#;

        let page = render(html).unwrap();
        assert!(page.markdown.contains("Important text."));
        assert!(!page.markdown.contains("Copyright 2024"));
        assert!(!page.markdown.contains("Site banner"));
        assert!(!page.markdown.contains("track()"));
    }

    #[test]
    fn render_prefers_article_container() {
        let html = r#"<html><body>
            <div>Sidebar noise</div>
            <article><p>The story.</p></article>
        </body></html>"#;

        let page = render(html).unwrap();
        assert!(page.markdown.contains("The story."));
        assert!(!page.markdown.contains("Sidebar noise"));
    }

    #[test]
    fn render_flattens_tables_into_rows() {
        let html = r#"<html><body><main>
            <table>
                <tr><th>Name</th><th>Value</th></tr>
                <tr><td>foo</td><td>bar</td></tr>
            </table>
        </main></body></html>"#;

        let page = render(html).unwrap();
        assert!(page.markdown.contains("Name | Value"));
        assert!(page.markdown.contains("foo | bar"));
    }

    #[test]
    fn render_keeps_link_text_only() {
        let html = r#"<html><body><p>See <a href="https://example.com/x">the guide</a>.</p></body></html>"#;
        let page = render(html).unwrap();
        assert!(page.markdown.contains("See the guide."));
        assert!(!page.markdown.contains("https://example.com/x"));
    }

    #[test]
    fn rendered_page_splits_into_sections() {
        let html = "<html><body><p>unrelated text</p><h2>Pie</h2><p>how to make an apple pie</p></body></html>";
        let page = render(html).unwrap();
        let sections = split_sections(&page.markdown);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0], "unrelated text");
        assert!(sections[1].starts_with("## Pie"));
    }

    #[test]
    fn render_empty_body() {
        let page = render("<html><body></body></html>").unwrap();
        assert!(page.markdown.is_empty());
        assert!(page.title.is_none());
    }

    #[test]
    fn html_detection() {
        assert!(looks_like_html("<!DOCTYPE html><html></html>"));
        assert!(looks_like_html("  <html lang=\"en\">"));
        assert!(!looks_like_html("# Plain markdown\n\ntext"));
    }
}
