//! Sitemap retrieval for frontier seeding.

use quick_xml::events::Event;
use reqwest::Client;
use tracing::debug;
use url::Url;

const SITEMAP_PATH: &str = "/sitemap.xml";

/// Fetch and parse `<seed>/sitemap.xml`, best-effort. A missing or malformed
/// sitemap yields an empty list, never an error.
pub async fn fetch_sitemap_urls(client: &Client, seed: &Url) -> Vec<Url> {
    let Ok(sitemap_url) = seed.join(SITEMAP_PATH) else {
        return Vec::new();
    };

    let Ok(response) = client.get(sitemap_url.clone()).send().await else {
        debug!(url = %sitemap_url, "sitemap fetch failed");
        return Vec::new();
    };
    if !response.status().is_success() {
        debug!(url = %sitemap_url, status = %response.status(), "no sitemap");
        return Vec::new();
    }
    let Ok(text) = response.text().await else {
        return Vec::new();
    };

    let urls: Vec<Url> = parse_sitemap(&text)
        .iter()
        .filter_map(|raw| Url::parse(raw).ok())
        .collect();
    debug!(count = urls.len(), "sitemap URLs parsed");
    urls
}

/// Extract URL strings from a sitemap body: `<loc>` entries when the body is
/// XML, whitespace-separated URLs otherwise.
pub fn parse_sitemap(text: &str) -> Vec<String> {
    if text.contains("<loc>") {
        extract_from_xml(text)
    } else {
        text.split_whitespace()
            .filter(|token| token.starts_with("http://") || token.starts_with("https://"))
            .map(str::to_owned)
            .collect()
    }
}

fn extract_from_xml(text: &str) -> Vec<String> {
    let mut reader = quick_xml::Reader::from_str(text);
    let mut urls = Vec::new();
    let mut buf = Vec::new();
    let mut in_loc_tag = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"loc" => {
                in_loc_tag = true;
            }
            Ok(Event::Text(e)) if in_loc_tag => {
                if let Ok(text) = e.decode() {
                    urls.push(text.trim().to_string());
                }
                in_loc_tag = false;
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    urls
}
