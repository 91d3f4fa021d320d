//! Polite breadth-first site crawler.
//!
//! One [`Crawler`] drives one crawl: `concurrency` fetcher fibers share a
//! depth-ordered frontier, a visited set, a per-host token bucket and a
//! robots.txt cache, and stream [`CrawlEvent`]s to the caller as pages
//! complete extraction.

pub mod frontier;
pub mod robots;
pub mod sitemap;
pub mod urls;

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use std::collections::HashSet;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::Url;

use crate::changes;
use crate::data::models::PageCategory;
use crate::extract::{self, categorize};
use frontier::{Frontier, Pop};
use robots::RobotsCache;

/// Per-fetch read timeout.
const FETCH_TIMEOUT: Duration = Duration::from_secs(20);
/// Tries per URL for 5xx and network errors; delays are 1s, 2s, 4s.
const FETCH_ATTEMPTS: u32 = 3;
/// Redirects followed per fetch.
const MAX_REDIRECTS: usize = 5;
/// Per-host steady request rate.
const PER_HOST_RPS: u32 = 2;
/// Per-host burst allowance.
const PER_HOST_BURST: u32 = 4;
/// Fetcher backoff while the frontier is momentarily empty.
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Crawl failures, split by whether the task should be retried.
#[derive(Debug, thiserror::Error)]
pub enum CrawlError {
    /// Network-shaped failure; the queue retries with backoff.
    #[error("transient crawl failure: {0}")]
    Transient(anyhow::Error),
    /// Policy or input failure; retrying cannot help.
    #[error("permanent crawl failure: {0}")]
    Permanent(anyhow::Error),
}

/// Bounds for one crawl run.
#[derive(Debug, Clone, Copy)]
pub struct CrawlLimits {
    pub max_depth: u32,
    pub max_pages: usize,
    pub concurrency: usize,
}

impl CrawlLimits {
    /// Clamp raw limits into their supported ranges.
    pub fn clamped(max_depth: i32, max_pages: i32, concurrency: usize) -> Self {
        Self {
            max_depth: max_depth.clamp(1, 5) as u32,
            max_pages: max_pages.clamp(50, 500) as usize,
            concurrency: concurrency.max(1),
        }
    }
}

/// Live progress counters, all monotonically non-decreasing within a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlCounters {
    pub found: i32,
    pub crawled: i32,
    pub skipped: i32,
}

/// One fully extracted page.
#[derive(Debug, Clone)]
pub struct CrawledPage {
    pub url: String,
    pub depth: u32,
    pub title: Option<String>,
    pub description: Option<String>,
    pub headings: Vec<String>,
    pub category: PageCategory,
    pub relevance: f64,
    pub content_hash: String,
}

/// Events streamed to the crawl's consumer as work completes.
#[derive(Debug)]
pub enum CrawlEvent {
    Page(CrawledPage),
    Progress(CrawlCounters),
}

/// State shared by all fetcher fibers of one crawl.
struct SharedState {
    frontier: Mutex<Frontier>,
    seed: Url,
    seed_domain: String,
    sitemap_urls: HashSet<String>,
    limiter: DefaultKeyedRateLimiter<String>,
    robots: RobotsCache,
}

pub struct Crawler {
    client: Client,
    user_agent: String,
}

impl Crawler {
    pub fn new(user_agent: &str) -> Result<Self, CrawlError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(FETCH_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| CrawlError::Transient(e.into()))?;

        Ok(Self {
            client,
            user_agent: user_agent.to_owned(),
        })
    }

    /// Run a bounded BFS crawl from `seed`, emitting events until the
    /// frontier drains, the page budget is spent, or `cancel` fires.
    ///
    /// Returns the final counters. Fails permanent when the seed itself is
    /// unusable (no host, robots-denied), transient when nothing could be
    /// fetched at all.
    pub async fn crawl(
        &self,
        seed: &Url,
        limits: CrawlLimits,
        events: mpsc::Sender<CrawlEvent>,
        cancel: CancellationToken,
    ) -> Result<CrawlCounters, CrawlError> {
        let seed = urls::normalize(seed);
        let seed_host = seed
            .host_str()
            .ok_or_else(|| CrawlError::Permanent(anyhow::anyhow!("seed URL has no host: {seed}")))?;
        let seed_domain = urls::registrable_domain(seed_host).to_owned();

        let robots = RobotsCache::new(self.client.clone(), self.user_agent.clone());
        if !robots.is_allowed(&seed).await {
            return Err(CrawlError::Permanent(anyhow::anyhow!(
                "seed disallowed by robots.txt: {seed}"
            )));
        }

        let mut state = Frontier::new(limits.max_depth, limits.max_pages);
        state.admit(seed.clone(), 0);

        // Sitemap URLs seed the frontier at depth 0 and feed relevance.
        let mut sitemap_urls = HashSet::new();
        for discovered in sitemap::fetch_sitemap_urls(&self.client, &seed).await {
            let discovered = urls::normalize(&discovered);
            if urls::in_scope(&discovered, &seed_domain)
                && !urls::has_binary_extension(&discovered)
            {
                sitemap_urls.insert(discovered.as_str().to_owned());
                state.admit(discovered, 0);
            }
        }

        let _ = events.send(CrawlEvent::Progress(state.counters())).await;

        let quota = Quota::per_second(NonZeroU32::new(PER_HOST_RPS).unwrap())
            .allow_burst(NonZeroU32::new(PER_HOST_BURST).unwrap());
        let shared = Arc::new(SharedState {
            frontier: Mutex::new(state),
            seed,
            seed_domain,
            sitemap_urls,
            limiter: RateLimiter::keyed(quota),
            robots,
        });

        let fetchers = (0..limits.concurrency)
            .map(|id| self.fetcher(id, shared.clone(), events.clone(), cancel.clone()));
        futures::future::join_all(fetchers).await;

        let counters = shared.frontier.lock().unwrap().counters();
        let _ = events.send(CrawlEvent::Progress(counters)).await;

        if counters.crawled == 0 && !cancel.is_cancelled() {
            return Err(CrawlError::Transient(anyhow::anyhow!(
                "no pages could be crawled from {}",
                shared.seed
            )));
        }

        Ok(counters)
    }

    /// One fetcher fiber: pop, fetch, extract, emit, repeat.
    async fn fetcher(
        &self,
        id: usize,
        shared: Arc<SharedState>,
        events: mpsc::Sender<CrawlEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            // Cancellation is checked at the start of each fetch; in-flight
            // requests complete on their own.
            if cancel.is_cancelled() {
                trace!(fetcher = id, "crawl cancelled");
                return;
            }

            let next = shared.frontier.lock().unwrap().next();
            match next {
                Pop::Done => return,
                Pop::Wait => sleep(IDLE_POLL).await,
                Pop::Item(url, depth) => {
                    match self.process(&url, depth, &shared).await {
                        Some(page) => {
                            shared.frontier.lock().unwrap().finish_crawled();
                            if events.send(CrawlEvent::Page(page)).await.is_err() {
                                // Consumer is gone; no point continuing.
                                return;
                            }
                        }
                        None => shared.frontier.lock().unwrap().finish_skipped(),
                    }

                    let counters = shared.frontier.lock().unwrap().counters();
                    if events.send(CrawlEvent::Progress(counters)).await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// Fetch and extract one URL. `None` means the URL was skipped (robots,
    /// non-HTML, off-domain redirect, or exhausted retries).
    async fn process(
        &self,
        url: &Url,
        depth: u32,
        shared: &SharedState,
    ) -> Option<CrawledPage> {
        if !shared.robots.is_allowed(url).await {
            debug!(url = %url, "disallowed by robots.txt");
            return None;
        }

        let host = url.host_str().unwrap_or_default().to_owned();
        shared.limiter.until_key_ready(&host).await;

        let (body, final_url) = self.fetch_html(url).await?;
        if !urls::in_scope(&final_url, &shared.seed_domain) {
            debug!(url = %url, redirected_to = %final_url, "redirected off-domain");
            return None;
        }

        let extraction = extract::extract(&body, &final_url);

        {
            let mut frontier = shared.frontier.lock().unwrap();
            for link in extraction.links.iter().chain(extraction.canonical.iter()) {
                let link = urls::normalize(link);
                if urls::in_scope(&link, &shared.seed_domain)
                    && !urls::has_binary_extension(&link)
                {
                    frontier.admit(link, depth + 1);
                }
            }
        }

        let is_seed = depth == 0 && *url == shared.seed;
        let category = categorize::categorize(url, is_seed);
        let in_sitemap = shared.sitemap_urls.contains(url.as_str());
        let relevance = categorize::relevance(category, depth, url, in_sitemap);
        let content_hash = changes::content_hash(
            extraction.title.as_deref(),
            extraction.description.as_deref(),
            &extraction.headings,
        );

        Some(CrawledPage {
            url: url.as_str().to_owned(),
            depth,
            title: extraction.title,
            description: extraction.description,
            headings: extraction.headings,
            category,
            relevance,
            content_hash,
        })
    }

    /// GET a URL with bounded retries.
    ///
    /// 5xx and network errors retry with 1s/2s/4s delays; 4xx and non-HTML
    /// responses skip immediately.
    async fn fetch_html(&self, url: &Url) -> Option<(String, Url)> {
        for attempt in 1..=FETCH_ATTEMPTS {
            match self.client.get(url.clone()).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let content_type = response
                            .headers()
                            .get(CONTENT_TYPE)
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or_default();
                        if !content_type.starts_with("text/html") {
                            debug!(url = %url, content_type, "skipping non-HTML response");
                            return None;
                        }
                        let final_url = response.url().clone();
                        return match response.text().await {
                            Ok(body) => Some((body, final_url)),
                            Err(e) => {
                                debug!(url = %url, error = %e, "failed to read body");
                                None
                            }
                        };
                    }

                    if !status.is_server_error() {
                        debug!(url = %url, status = %status, "skipping after client error");
                        return None;
                    }
                    warn!(url = %url, status = %status, attempt, "server error, will retry");
                }
                Err(e) => {
                    warn!(url = %url, error = %e, attempt, "fetch error, will retry");
                }
            }

            if attempt < FETCH_ATTEMPTS {
                sleep(Duration::from_secs(1u64 << (attempt - 1))).await;
            }
        }

        debug!(url = %url, "retries exhausted");
        None
    }
}
