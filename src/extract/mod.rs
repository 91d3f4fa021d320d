//! HTML metadata extraction.
//!
//! Parsing happens in one synchronous pass; the `scraper` document is never
//! held across an await point.

pub mod categorize;

use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::OnceLock;
use url::Url;

/// Description fallback (first paragraph) is clipped to this many characters.
const MAX_DESCRIPTION_CHARS: usize = 240;

/// Metadata pulled out of one HTML document.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Resolved title: `og:title` → `<title>` → first `<h1>`.
    pub title: Option<String>,
    /// Resolved description: `meta[name=description]` → `og:description` →
    /// first paragraph (clipped).
    pub description: Option<String>,
    /// h1..h3 text in document order, trimmed, deduplicated.
    pub headings: Vec<String>,
    /// `link[rel=canonical]`, resolved against the page URL.
    pub canonical: Option<Url>,
    /// All anchor targets resolved against the page URL.
    pub links: Vec<Url>,
}

fn selector(cell: &'static OnceLock<Selector>, css: &'static str) -> &'static Selector {
    cell.get_or_init(|| Selector::parse(css).expect("static selector parses"))
}

fn first_text(html: &Html, sel: &Selector) -> Option<String> {
    html.select(sel)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn first_attr(html: &Html, sel: &Selector, attr: &str) -> Option<String> {
    html.select(sel)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Parse a document and pull out the metadata tuple plus outbound links.
pub fn extract(html: &str, base: &Url) -> Extraction {
    static TITLE: OnceLock<Selector> = OnceLock::new();
    static H1: OnceLock<Selector> = OnceLock::new();
    static OG_TITLE: OnceLock<Selector> = OnceLock::new();
    static META_DESC: OnceLock<Selector> = OnceLock::new();
    static OG_DESC: OnceLock<Selector> = OnceLock::new();
    static PARAGRAPH: OnceLock<Selector> = OnceLock::new();
    static HEADINGS: OnceLock<Selector> = OnceLock::new();
    static CANONICAL: OnceLock<Selector> = OnceLock::new();
    static ANCHORS: OnceLock<Selector> = OnceLock::new();

    let document = Html::parse_document(html);

    let title = first_attr(
        &document,
        selector(&OG_TITLE, "meta[property='og:title']"),
        "content",
    )
    .or_else(|| first_text(&document, selector(&TITLE, "title")))
    .or_else(|| first_text(&document, selector(&H1, "h1")));

    let description = first_attr(
        &document,
        selector(&META_DESC, "meta[name='description']"),
        "content",
    )
    .or_else(|| {
        first_attr(
            &document,
            selector(&OG_DESC, "meta[property='og:description']"),
            "content",
        )
    })
    .or_else(|| {
        first_text(&document, selector(&PARAGRAPH, "p"))
            .map(|p| p.chars().take(MAX_DESCRIPTION_CHARS).collect::<String>())
    });

    let mut seen = HashSet::new();
    let headings: Vec<String> = document
        .select(selector(&HEADINGS, "h1, h2, h3"))
        .filter_map(|el| {
            let text = el.text().collect::<String>().trim().to_string();
            if text.is_empty() || !seen.insert(text.clone()) {
                return None;
            }
            Some(text)
        })
        .collect();

    let canonical = first_attr(
        &document,
        selector(&CANONICAL, "link[rel='canonical']"),
        "href",
    )
    .and_then(|href| base.join(&href).ok());

    let links: Vec<Url> = document
        .select(selector(&ANCHORS, "a[href]"))
        .filter_map(|el| {
            let href = el.value().attr("href")?.trim();
            if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
                return None;
            }
            base.join(href).ok()
        })
        .collect();

    Extraction {
        title,
        description,
        headings,
        canonical,
        links,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/docs/page").unwrap()
    }

    #[test]
    fn og_title_wins_over_title_tag() {
        let html = r#"<html><head>
            <meta property="og:title" content="OG Title">
            <title>Tag Title</title>
        </head><body><h1>H1 Title</h1></body></html>"#;
        let ex = extract(html, &base());
        assert_eq!(ex.title.as_deref(), Some("OG Title"));
    }

    #[test]
    fn title_tag_beats_h1() {
        let html = "<html><head><title>Tag Title</title></head><body><h1>H1</h1></body></html>";
        let ex = extract(html, &base());
        assert_eq!(ex.title.as_deref(), Some("Tag Title"));
    }

    #[test]
    fn h1_is_title_of_last_resort() {
        let html = "<html><body><h1>Only Heading</h1></body></html>";
        let ex = extract(html, &base());
        assert_eq!(ex.title.as_deref(), Some("Only Heading"));
    }

    #[test]
    fn description_prefers_meta_then_og_then_paragraph() {
        let with_meta = r#"<head><meta name="description" content="meta desc">
            <meta property="og:description" content="og desc"></head><p>para</p>"#;
        assert_eq!(extract(with_meta, &base()).description.as_deref(), Some("meta desc"));

        let with_og = r#"<head><meta property="og:description" content="og desc"></head><p>para</p>"#;
        assert_eq!(extract(with_og, &base()).description.as_deref(), Some("og desc"));

        let with_para = "<body><p>first paragraph</p><p>second</p></body>";
        assert_eq!(extract(with_para, &base()).description.as_deref(), Some("first paragraph"));
    }

    #[test]
    fn paragraph_description_is_clipped() {
        let long = "x".repeat(500);
        let html = format!("<body><p>{long}</p></body>");
        let ex = extract(&html, &base());
        assert_eq!(ex.description.unwrap().chars().count(), MAX_DESCRIPTION_CHARS);
    }

    #[test]
    fn headings_are_ordered_trimmed_and_deduplicated() {
        let html = r#"<body>
            <h1> Intro </h1>
            <h2>Usage</h2>
            <h3>Usage</h3>
            <h2></h2>
            <h3>Details</h3>
            <h4>Too deep</h4>
        </body>"#;
        let ex = extract(html, &base());
        assert_eq!(ex.headings, vec!["Intro", "Usage", "Details"]);
    }

    #[test]
    fn links_resolve_relative_hrefs() {
        let html = r##"<body>
            <a href="/api">api</a>
            <a href="guide">guide</a>
            <a href="#section">frag</a>
            <a href="javascript:void(0)">js</a>
            <a href="https://other.org/x">offsite</a>
        </body>"##;
        let ex = extract(html, &base());
        let links: Vec<String> = ex.links.iter().map(Url::to_string).collect();
        assert_eq!(
            links,
            vec![
                "https://example.com/api",
                "https://example.com/docs/guide",
                "https://other.org/x",
            ]
        );
    }

    #[test]
    fn canonical_is_resolved() {
        let html = r#"<head><link rel="canonical" href="/docs/page"></head>"#;
        let ex = extract(html, &base());
        assert_eq!(ex.canonical.unwrap().as_str(), "https://example.com/docs/page");
    }
}
