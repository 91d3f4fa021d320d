//! Content-hash change tracking across crawl runs.
//!
//! Hashes cover the canonicalized extraction tuple rather than raw HTML, so
//! boilerplate drift (nav, footers, asset fingerprints) does not register as
//! a change.

use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::data::models::PageStatus;

/// SHA-256 over `(title, description, headings)`.
///
/// Fields are joined with the ASCII unit separator so the encoding is
/// injective: two tuples collide only when they are equal.
pub fn content_hash(title: Option<&str>, description: Option<&str>, headings: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.unwrap_or_default().as_bytes());
    hasher.update([0x1f]);
    hasher.update(description.unwrap_or_default().as_bytes());
    hasher.update([0x1f]);
    hasher.update(headings.join("\n").as_bytes());
    hex(hasher.finalize().as_slice())
}

/// Plain SHA-256 hex digest, used for generated document versions.
pub fn sha256_hex(content: &str) -> String {
    hex(Sha256::digest(content.as_bytes()).as_slice())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(64), |mut out, byte| {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
        out
    })
}

/// Classify a crawled page against the prior successful crawl's
/// `url → content_hash` map.
pub fn classify(prior: &HashMap<String, String>, url: &str, hash: &str) -> PageStatus {
    match prior.get(url) {
        None => PageStatus::Added,
        Some(previous) if previous == hash => PageStatus::Unchanged,
        Some(_) => PageStatus::Updated,
    }
}
