//! URL-based page categorization and relevance scoring.

use url::Url;

use crate::crawler::urls::path_segment_count;
use crate::data::models::PageCategory;

/// Path-segment signals per category, checked in priority order. First match
/// wins.
const SIGNALS: &[(PageCategory, &[&str])] = &[
    (PageCategory::ApiReference, &["api", "reference", "api-reference", "apis"]),
    (PageCategory::Documentation, &["docs", "documentation", "doc", "manual"]),
    (PageCategory::Guides, &["guide", "guides", "tutorial", "tutorials", "how-to", "howto"]),
    (PageCategory::Examples, &["example", "examples", "demo", "demos", "showcase"]),
    (PageCategory::Faq, &["faq", "faqs"]),
    (PageCategory::Blog, &["blog", "news", "posts", "articles"]),
    (PageCategory::Changelog, &["changelog", "releases", "release-notes", "whats-new"]),
    (PageCategory::GettingStarted, &["getting-started", "quickstart", "quick-start", "start", "install", "installation", "setup"]),
    (PageCategory::About, &["about", "company", "team", "contact", "careers"]),
];

/// Map a URL to its category.
///
/// Segment signals take precedence; the seed and any path of at most one
/// segment fall back to Core Pages, everything else to Other.
pub fn categorize(url: &Url, is_seed: bool) -> PageCategory {
    let path = url.path().to_ascii_lowercase();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    for (category, signals) in SIGNALS {
        if segments.iter().any(|seg| signals.contains(seg)) {
            return *category;
        }
    }

    if is_seed || segments.len() <= 1 {
        PageCategory::CorePages
    } else {
        PageCategory::Other
    }
}

/// Deterministic relevance score in `[0, 1]`.
pub fn relevance(category: PageCategory, depth: u32, url: &Url, in_sitemap: bool) -> f64 {
    let depth_term = 1.0 - (depth.min(5) as f64) / 5.0;
    let segments = path_segment_count(url).min(6) as f64;
    let path_term = 1.0 - segments / 6.0;
    let sitemap_term = if in_sitemap { 1.0 } else { 0.0 };

    0.40 * category.weight() + 0.20 * depth_term + 0.20 * path_term + 0.20 * sitemap_term
}
