//! Shared BFS frontier, visited set, and progress counters for one crawl.
//!
//! URLs are bucketed by discovery depth so the pop order is exactly
//! `(depth ASC, insertion ASC)` even with concurrent fetchers racing
//! admissions. All methods are synchronous; callers hold the surrounding
//! mutex only across non-await points.

use std::collections::{HashSet, VecDeque};
use url::Url;

use crate::crawler::CrawlCounters;

/// Safety cap on total admitted URLs, far above any max_pages bound.
const MAX_DISCOVERED: usize = 10_000;

/// What a fetcher should do next.
#[derive(Debug)]
pub enum Pop {
    /// Fetch this URL at this depth.
    Item(Url, u32),
    /// Budget or frontier temporarily exhausted while fetches are in flight.
    Wait,
    /// The crawl is over for this fetcher.
    Done,
}

pub struct Frontier {
    buckets: Vec<VecDeque<Url>>,
    visited: HashSet<String>,
    max_pages: usize,
    in_flight: usize,
    found: i32,
    crawled: i32,
    skipped: i32,
}

impl Frontier {
    pub fn new(max_depth: u32, max_pages: usize) -> Self {
        Self {
            buckets: vec![VecDeque::new(); max_depth as usize + 1],
            visited: HashSet::new(),
            max_pages,
            in_flight: 0,
            found: 0,
            crawled: 0,
            skipped: 0,
        }
    }

    /// Admit a normalized URL at the given depth.
    ///
    /// Returns false when the URL is beyond the depth bound, already known,
    /// or the discovery cap is reached. Admission increments `pages_found`.
    pub fn admit(&mut self, url: Url, depth: u32) -> bool {
        if depth as usize >= self.buckets.len() {
            return false;
        }
        if self.visited.len() >= MAX_DISCOVERED {
            return false;
        }
        if !self.visited.insert(url.as_str().to_owned()) {
            return false;
        }
        self.found += 1;
        self.buckets[depth as usize].push_back(url);
        true
    }

    /// Hand out the next URL, shallowest depth first.
    pub fn next(&mut self) -> Pop {
        // The page budget covers both finished and in-flight fetches; an
        // in-flight fetch that ends up skipped returns its budget.
        if self.crawled as usize + self.in_flight >= self.max_pages {
            return if self.in_flight == 0 { Pop::Done } else { Pop::Wait };
        }

        for (depth, bucket) in self.buckets.iter_mut().enumerate() {
            if let Some(url) = bucket.pop_front() {
                self.in_flight += 1;
                return Pop::Item(url, depth as u32);
            }
        }

        if self.in_flight == 0 { Pop::Done } else { Pop::Wait }
    }

    /// A popped URL finished as a crawled page.
    pub fn finish_crawled(&mut self) {
        self.in_flight -= 1;
        self.crawled += 1;
    }

    /// A popped URL finished as a skip (robots, non-HTML, exhausted fetch).
    pub fn finish_skipped(&mut self) {
        self.in_flight -= 1;
        self.skipped += 1;
    }

    /// Lock-free-snapshot-friendly view of the live counters.
    pub fn counters(&self) -> CrawlCounters {
        CrawlCounters {
            found: self.found,
            crawled: self.crawled,
            skipped: self.skipped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn admit_deduplicates() {
        let mut f = Frontier::new(3, 100);
        assert!(f.admit(url("https://a.com/"), 0));
        assert!(!f.admit(url("https://a.com/"), 0));
        assert_eq!(f.counters().found, 1);
    }

    #[test]
    fn admit_rejects_beyond_max_depth() {
        let mut f = Frontier::new(2, 100);
        assert!(f.admit(url("https://a.com/deep"), 2));
        assert!(!f.admit(url("https://a.com/deeper"), 3));
    }

    #[test]
    fn pop_order_is_depth_then_insertion() {
        let mut f = Frontier::new(3, 100);
        f.admit(url("https://a.com/d1-first"), 1);
        f.admit(url("https://a.com/d0"), 0);
        f.admit(url("https://a.com/d1-second"), 1);

        let order: Vec<String> = std::iter::from_fn(|| match f.next() {
            Pop::Item(u, _) => Some(u.to_string()),
            _ => None,
        })
        .collect();

        assert_eq!(
            order,
            vec![
                "https://a.com/d0",
                "https://a.com/d1-first",
                "https://a.com/d1-second",
            ]
        );
    }

    #[test]
    fn budget_counts_in_flight_fetches() {
        let mut f = Frontier::new(1, 2);
        f.admit(url("https://a.com/1"), 0);
        f.admit(url("https://a.com/2"), 0);
        f.admit(url("https://a.com/3"), 0);

        assert!(matches!(f.next(), Pop::Item(..)));
        assert!(matches!(f.next(), Pop::Item(..)));
        // Budget of 2 is fully in flight; third pop must wait.
        assert!(matches!(f.next(), Pop::Wait));

        // A skip frees budget, a crawl consumes it for good.
        f.finish_skipped();
        assert!(matches!(f.next(), Pop::Item(..)));
        f.finish_crawled();
        f.finish_crawled();
        assert!(matches!(f.next(), Pop::Done));
    }

    #[test]
    fn empty_frontier_with_no_in_flight_is_done() {
        let mut f = Frontier::new(1, 10);
        assert!(matches!(f.next(), Pop::Done));
    }
}
