//! Per-crawl page rows and the progress stream cursor queries.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::data::models::{Page, PageCategory, PageStatus};
use crate::error::Result;

/// Insert payload for one page row.
#[derive(Debug, Clone)]
pub struct NewPage<'a> {
    pub site_id: i64,
    pub crawl_job_id: i64,
    pub url: &'a str,
    pub title: Option<&'a str>,
    pub description: Option<&'a str>,
    pub headings: &'a [String],
    pub category: PageCategory,
    pub relevance_score: f64,
    pub depth: i32,
    pub content_hash: &'a str,
    pub status: PageStatus,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// Upsert a page row for a job.
///
/// A retried task revisits the same URLs within the same job; the
/// `(crawl_job_id, url)` conflict path refreshes the row instead of
/// duplicating it.
pub async fn upsert(pool: &PgPool, page: &NewPage<'_>) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO pages (
            site_id, crawl_job_id, url, title, description, headings,
            category, relevance_score, depth, content_hash, status,
            first_seen_at, last_seen_at
         ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
         ON CONFLICT (crawl_job_id, url) DO UPDATE SET
            title = EXCLUDED.title,
            description = EXCLUDED.description,
            headings = EXCLUDED.headings,
            category = EXCLUDED.category,
            relevance_score = EXCLUDED.relevance_score,
            depth = EXCLUDED.depth,
            content_hash = EXCLUDED.content_hash,
            status = EXCLUDED.status,
            last_seen_at = EXCLUDED.last_seen_at
         RETURNING id",
    )
    .bind(page.site_id)
    .bind(page.crawl_job_id)
    .bind(page.url)
    .bind(page.title)
    .bind(page.description)
    .bind(page.headings)
    .bind(page.category)
    .bind(page.relevance_score)
    .bind(page.depth)
    .bind(page.content_hash)
    .bind(page.status)
    .bind(page.first_seen_at)
    .bind(page.last_seen_at)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

/// All pages of one job, in insertion order.
pub async fn for_job(pool: &PgPool, job_id: i64) -> Result<Vec<Page>> {
    let pages =
        sqlx::query_as::<_, Page>("SELECT * FROM pages WHERE crawl_job_id = $1 ORDER BY id ASC")
            .bind(job_id)
            .fetch_all(pool)
            .await?;
    Ok(pages)
}

/// Pages of one job with `id > after_id`, ascending. Drives the
/// monotonic-cursor replay of the progress stream.
pub async fn for_job_after(
    pool: &PgPool,
    job_id: i64,
    after_id: i64,
    limit: i64,
) -> Result<Vec<Page>> {
    let pages = sqlx::query_as::<_, Page>(
        "SELECT * FROM pages
         WHERE crawl_job_id = $1 AND id > $2
         ORDER BY id ASC
         LIMIT $3",
    )
    .bind(job_id)
    .bind(after_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(pages)
}
