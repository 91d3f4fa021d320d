//! Application configuration, loaded from environment variables via figment.
//!
//! Duration-valued options accept both bare numbers (seconds) and duration
//! strings with units ("30s", "2m").

use figment::{Figment, providers::Env};
use fundu::{DurationParser, TimeUnit};
use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Main application configuration.
#[derive(Deserialize, Clone)]
pub struct Config {
    /// Log level for this application's target specifically.
    ///
    /// e.g. "debug" behaves like "warn,llmstxt=debug". Valid values:
    /// "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Port for the API server (default: 8080)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Postgres connection URL
    pub database_url: String,
    /// Graceful shutdown timeout
    #[serde(
        default = "default_shutdown_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub shutdown_timeout: Duration,

    /// API key for the external LLM assembler. Empty selects the
    /// deterministic template assembler.
    #[serde(default)]
    pub llm_api_key: String,
    /// Model identifier passed to the LLM assembler
    #[serde(default = "default_llm_model")]
    pub llm_model: String,

    /// Default per-crawl page cap
    #[serde(default = "default_max_crawl_pages")]
    pub max_crawl_pages: i32,
    /// Default BFS depth bound
    #[serde(default = "default_max_crawl_depth")]
    pub max_crawl_depth: i32,
    /// Fetcher fibers per crawl
    #[serde(default = "default_crawl_concurrency")]
    pub crawl_concurrency: usize,
    /// User-Agent header identifying the crawler, stable per deployment
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Lease owner identity for this worker process
    #[serde(default = "default_worker_id")]
    pub worker_id: String,
    /// Whether the cron scheduler loop runs in this process
    #[serde(default)]
    pub run_scheduler: bool,
    /// Task lease duration in seconds
    #[serde(default = "default_task_lease_seconds")]
    pub task_lease_seconds: u64,
    /// Attempts before a task is dead-lettered
    #[serde(default = "default_task_max_attempts")]
    pub task_max_attempts: i32,
}

impl Config {
    /// Load and validate configuration from the process environment.
    pub fn load() -> Result<Self, figment::Error> {
        let config: Config = Figment::new().merge(Env::raw()).extract()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), figment::Error> {
        if !(1..=5).contains(&self.max_crawl_depth) {
            return Err(figment::Error::from(format!(
                "MAX_CRAWL_DEPTH must be within 1..=5, got {}",
                self.max_crawl_depth
            )));
        }
        if !(50..=500).contains(&self.max_crawl_pages) {
            return Err(figment::Error::from(format!(
                "MAX_CRAWL_PAGES must be within 50..=500, got {}",
                self.max_crawl_pages
            )));
        }
        if self.crawl_concurrency == 0 {
            return Err(figment::Error::from(
                "CRAWL_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        if self.task_max_attempts < 1 {
            return Err(figment::Error::from(
                "TASK_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.worker_id.trim().is_empty() {
            return Err(figment::Error::from(
                "WORKER_ID must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Task lease duration as a [`Duration`].
    pub fn task_lease(&self) -> Duration {
        Duration::from_secs(self.task_lease_seconds)
    }
}

/// Default log level of "info"
fn default_log_level() -> String {
    "info".to_string()
}

/// Default port of 8080
fn default_port() -> u16 {
    8080
}

/// Default shutdown timeout of 8 seconds
fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(8)
}

fn default_llm_model() -> String {
    "gpt-5.2".to_string()
}

fn default_max_crawl_pages() -> i32 {
    200
}

fn default_max_crawl_depth() -> i32 {
    3
}

fn default_crawl_concurrency() -> usize {
    20
}

fn default_user_agent() -> String {
    format!(
        "llmstxt-crawler/{} (+https://llmstxt.dev)",
        env!("CARGO_PKG_VERSION")
    )
}

fn default_worker_id() -> String {
    "worker-1".to_string()
}

fn default_task_lease_seconds() -> u64 {
    60
}

fn default_task_max_attempts() -> i32 {
    5
}

/// Duration parser handling seconds (default unit), milliseconds and minutes.
///
/// Allows whitespace between the number and the unit, and multiple summed
/// units ("2m 30s" = 150 seconds).
const DURATION_PARSER: DurationParser<'static> = DurationParser::builder()
    .time_units(&[TimeUnit::Second, TimeUnit::MilliSecond, TimeUnit::Minute])
    .parse_multiple(None)
    .allow_time_unit_delimiter()
    .disable_infinity()
    .disable_fraction()
    .disable_exponent()
    .default_unit(TimeUnit::Second)
    .build();

/// Deserializer for duration fields accepting both numeric and string values.
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Visitor;

    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a duration string or number")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            DURATION_PARSER
                .parse(value)
                .map_err(|e| {
                    serde::de::Error::custom(format!(
                        "Invalid duration format '{}': {}. Examples: '5' (5 seconds), '3500ms', '30s', '2m'",
                        value, e
                    ))
                })?
                .try_into()
                .map_err(|e| serde::de::Error::custom(format!("Duration conversion error: {}", e)))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Duration::from_secs(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if value < 0 {
                return Err(serde::de::Error::custom("Duration cannot be negative"));
            }
            Ok(Duration::from_secs(value as u64))
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}
