//! Per-host robots.txt cache for one crawl run.
//!
//! The body is fetched at most once per host authority and cached for the
//! lifetime of the crawl. A missing or unreachable robots.txt is treated as
//! permissive.

use dashmap::DashMap;
use reqwest::Client;
use robotstxt::DefaultMatcher;
use std::sync::Arc;
use tracing::debug;
use url::Url;

pub struct RobotsCache {
    client: Client,
    user_agent: String,
    by_authority: DashMap<String, Arc<Option<String>>>,
}

impl RobotsCache {
    pub fn new(client: Client, user_agent: impl Into<String>) -> Self {
        Self {
            client,
            user_agent: user_agent.into(),
            by_authority: DashMap::new(),
        }
    }

    /// Whether the crawler may fetch this URL.
    pub async fn is_allowed(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let authority = match url.port() {
            Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
            None => format!("{}://{}", url.scheme(), host),
        };

        let body = match self.by_authority.get(&authority) {
            Some(entry) => entry.value().clone(),
            None => {
                let fetched = Arc::new(self.fetch(url).await);
                // A concurrent fetcher may have raced us; keep whichever body
                // landed first.
                self.by_authority
                    .entry(authority)
                    .or_insert(fetched)
                    .value()
                    .clone()
            }
        };

        match body.as_ref() {
            Some(text) => allowed_by(text, &self.user_agent, url.as_str()),
            None => true,
        }
    }

    async fn fetch(&self, url: &Url) -> Option<String> {
        let robots_url = url.join("/robots.txt").ok()?;
        debug!(url = %robots_url, "fetching robots.txt");
        let response = self.client.get(robots_url).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        response.text().await.ok()
    }
}

/// Evaluate one URL against a robots.txt body for the given agent.
pub(crate) fn allowed_by(robots_body: &str, user_agent: &str, url: &str) -> bool {
    DefaultMatcher::default().one_agent_allowed_by_robots(robots_body, user_agent, url)
}
