//! URL normalization and scope rules for the crawl frontier.

use url::Url;

/// File extensions that are never worth fetching; filtered before the URL is
/// admitted to the frontier.
const BINARY_EXTENSIONS: &[&str] = &[
    "pdf", "zip", "gz", "tar", "tgz", "bz2", "7z", "rar", "dmg", "exe", "msi", "jpg", "jpeg",
    "png", "gif", "webp", "svg", "ico", "bmp", "tiff", "mp3", "wav", "ogg", "flac", "mp4", "avi",
    "mov", "mkv", "webm", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "woff", "woff2", "ttf",
    "eot",
];

/// Query parameters that only carry tracking state.
fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || key == "gclid" || key == "fbclid"
}

/// Canonicalize a URL for visited-set identity.
///
/// The parser already lowercases scheme and host and drops default ports; on
/// top of that the fragment is stripped, tracking parameters removed,
/// remaining query keys sorted, and the trailing slash trimmed everywhere but
/// the root path. Idempotent: `normalize(normalize(u)) == normalize(u)`.
pub fn normalize(url: &Url) -> Url {
    let mut out = url.clone();
    out.set_fragment(None);

    let mut pairs: Vec<(String, String)> = out
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();

    if pairs.is_empty() {
        out.set_query(None);
    } else {
        let mut serializer = out.query_pairs_mut();
        serializer.clear();
        for (k, v) in &pairs {
            serializer.append_pair(k, v);
        }
        drop(serializer);
    }

    if out.path().len() > 1 && out.path().ends_with('/') {
        let trimmed = out.path().trim_end_matches('/').to_string();
        if trimmed.is_empty() {
            out.set_path("/");
        } else {
            out.set_path(&trimmed);
        }
    }

    out
}

/// The registrable-domain approximation used for scope checks: the host with
/// a leading `www.` stripped.
pub fn registrable_domain(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

/// Whether a discovered link belongs to the crawl.
///
/// Only http(s) URLs on the seed's registrable domain (or a subdomain of it)
/// qualify; `mailto:`, `tel:` and other schemes fall out of the scheme check.
pub fn in_scope(url: &Url, seed_domain: &str) -> bool {
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }
    match url.host_str() {
        Some(host) => {
            let host = registrable_domain(host);
            host == seed_domain || host.ends_with(&format!(".{seed_domain}"))
        }
        None => false,
    }
}

/// Whether the URL path ends in a known binary extension.
pub fn has_binary_extension(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    match path.rsplit_once('.') {
        Some((_, ext)) => BINARY_EXTENSIONS.contains(&ext),
        None => false,
    }
}

/// Number of non-empty path segments.
pub fn path_segment_count(url: &Url) -> usize {
    url.path_segments()
        .map(|segments| segments.filter(|s| !s.is_empty()).count())
        .unwrap_or(0)
}
