//! Row types for the persisted schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle of a crawl job: `pending → running → {completed, failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "crawl_job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CrawlJobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl CrawlJobStatus {
    /// Whether the job has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CrawlJobStatus::Completed | CrawlJobStatus::Failed)
    }
}

/// Lifecycle of a queue task.
///
/// `queued → leased → {succeeded, queued (retry), dead_letter}`, plus
/// `leased → queued` on lease expiry via recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "crawl_task_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Leased,
    Succeeded,
    Failed,
    DeadLetter,
}

/// Claim priority. Postgres orders enum values by declaration, so
/// `ORDER BY priority DESC` hands out `High` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "task_priority", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Normal,
    High,
}

/// Change classification of a page relative to the prior successful crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "page_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    Added,
    Updated,
    Unchanged,
    Removed,
}

/// Fixed category set a page is sorted into, by URL path signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "page_category", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PageCategory {
    GettingStarted,
    Documentation,
    ApiReference,
    Guides,
    Examples,
    Faq,
    Blog,
    Changelog,
    About,
    CorePages,
    Other,
}

impl PageCategory {
    /// Human-readable section label used in assembled documents.
    pub fn label(&self) -> &'static str {
        match self {
            PageCategory::GettingStarted => "Getting Started",
            PageCategory::Documentation => "Documentation",
            PageCategory::ApiReference => "API Reference",
            PageCategory::Guides => "Guides",
            PageCategory::Examples => "Examples",
            PageCategory::Faq => "FAQ",
            PageCategory::Blog => "Blog",
            PageCategory::Changelog => "Changelog",
            PageCategory::About => "About",
            PageCategory::CorePages => "Core Pages",
            PageCategory::Other => "Other",
        }
    }

    /// Relevance weight of the category.
    pub fn weight(&self) -> f64 {
        match self {
            PageCategory::ApiReference => 1.0,
            PageCategory::Documentation => 0.9,
            PageCategory::Guides | PageCategory::GettingStarted => 0.85,
            PageCategory::Examples => 0.75,
            PageCategory::Faq | PageCategory::CorePages => 0.7,
            PageCategory::Changelog => 0.5,
            PageCategory::About | PageCategory::Blog => 0.4,
            PageCategory::Other => 0.2,
        }
    }

    /// Categories in their document/section priority order.
    pub fn ordered() -> [PageCategory; 11] {
        [
            PageCategory::ApiReference,
            PageCategory::Documentation,
            PageCategory::Guides,
            PageCategory::Examples,
            PageCategory::Faq,
            PageCategory::Blog,
            PageCategory::Changelog,
            PageCategory::GettingStarted,
            PageCategory::About,
            PageCategory::CorePages,
            PageCategory::Other,
        ]
    }
}

impl std::fmt::Display for PageCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A registered website. Owns its jobs, pages, documents and schedule.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Site {
    pub id: i64,
    pub url: String,
    pub domain: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One crawl run over a site, with live progress counters.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CrawlJob {
    pub id: i64,
    pub site_id: i64,
    pub status: CrawlJobStatus,
    pub pages_found: i32,
    pub pages_crawled: i32,
    pub pages_changed: i32,
    pub pages_skipped: i32,
    pub max_pages: i32,
    pub max_depth: i32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A queue entry driving one crawl job.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CrawlTask {
    pub id: i64,
    pub job_id: i64,
    pub status: TaskStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub priority: TaskPriority,
    pub available_at: DateTime<Utc>,
    pub leased_until: Option<DateTime<Utc>>,
    pub lease_owner: Option<String>,
    pub idempotency_key: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One extracted page within one crawl job.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Page {
    pub id: i64,
    pub site_id: i64,
    pub crawl_job_id: i64,
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub headings: Vec<String>,
    pub category: PageCategory,
    pub relevance_score: f64,
    pub depth: i32,
    pub content_hash: String,
    pub status: PageStatus,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// A versioned generated llms.txt document; the newest row per site is the
/// current one.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct GeneratedFile {
    pub id: i64,
    pub site_id: i64,
    pub crawl_job_id: Option<i64>,
    pub content: String,
    pub content_hash: String,
    pub is_edited: bool,
    pub created_at: DateTime<Utc>,
}

/// Recurring crawl schedule; at most one per site.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Schedule {
    pub id: i64,
    pub site_id: i64,
    pub cron_expression: String,
    pub is_active: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub timezone: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
