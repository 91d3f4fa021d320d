//! Crawl job lifecycle and progress counters.

use crate::data::models::CrawlJob;
use crate::error::Result;
use sqlx::PgPool;

/// Create a pending job for a site with the given limits.
pub async fn create(pool: &PgPool, site_id: i64, max_pages: i32, max_depth: i32) -> Result<CrawlJob> {
    let job = sqlx::query_as::<_, CrawlJob>(
        "INSERT INTO crawl_jobs (site_id, max_pages, max_depth)
         VALUES ($1, $2, $3)
         RETURNING *",
    )
    .bind(site_id)
    .bind(max_pages)
    .bind(max_depth)
    .fetch_one(pool)
    .await?;

    Ok(job)
}

pub async fn get(pool: &PgPool, job_id: i64) -> Result<Option<CrawlJob>> {
    let job = sqlx::query_as::<_, CrawlJob>("SELECT * FROM crawl_jobs WHERE id = $1")
        .bind(job_id)
        .fetch_optional(pool)
        .await?;
    Ok(job)
}

/// Fetch a job scoped to its site, for API lookups.
pub async fn get_for_site(pool: &PgPool, site_id: i64, job_id: i64) -> Result<Option<CrawlJob>> {
    let job =
        sqlx::query_as::<_, CrawlJob>("SELECT * FROM crawl_jobs WHERE id = $1 AND site_id = $2")
            .bind(job_id)
            .bind(site_id)
            .fetch_optional(pool)
            .await?;
    Ok(job)
}

/// Delete a job (scheduler cleanup of an orphan created in a lost enqueue
/// race).
pub async fn delete(pool: &PgPool, job_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM crawl_jobs WHERE id = $1")
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Transition to `running`. `started_at` is only stamped once, so a retried
/// task resumes the same run window.
pub async fn mark_running(pool: &PgPool, job_id: i64) -> Result<()> {
    sqlx::query(
        "UPDATE crawl_jobs
         SET status = 'running',
             started_at = COALESCE(started_at, NOW()),
             updated_at = NOW()
         WHERE id = $1",
    )
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_completed(pool: &PgPool, job_id: i64) -> Result<()> {
    sqlx::query(
        "UPDATE crawl_jobs
         SET status = 'completed', finished_at = NOW(), updated_at = NOW()
         WHERE id = $1",
    )
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_failed(pool: &PgPool, job_id: i64, error: &str) -> Result<()> {
    sqlx::query(
        "UPDATE crawl_jobs
         SET status = 'failed', finished_at = NOW(), error_message = $2, updated_at = NOW()
         WHERE id = $1",
    )
    .bind(job_id)
    .bind(error)
    .execute(pool)
    .await?;
    Ok(())
}

/// Flush progress counters. GREATEST keeps them monotonically non-decreasing
/// even if a retried attempt restarts from zero.
pub async fn update_counters(
    pool: &PgPool,
    job_id: i64,
    found: i32,
    crawled: i32,
    changed: i32,
    skipped: i32,
) -> Result<()> {
    sqlx::query(
        "UPDATE crawl_jobs
         SET pages_found = GREATEST(pages_found, $2),
             pages_crawled = GREATEST(pages_crawled, $3),
             pages_changed = GREATEST(pages_changed, $4),
             pages_skipped = GREATEST(pages_skipped, $5),
             updated_at = NOW()
         WHERE id = $1",
    )
    .bind(job_id)
    .bind(found)
    .bind(crawled)
    .bind(changed)
    .bind(skipped)
    .execute(pool)
    .await?;
    Ok(())
}

/// The most recent completed job for a site before `before_job_id`, used as
/// the change-tracking baseline.
pub async fn latest_completed_before(
    pool: &PgPool,
    site_id: i64,
    before_job_id: i64,
) -> Result<Option<i64>> {
    let id: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM crawl_jobs
         WHERE site_id = $1 AND status = 'completed' AND id < $2
         ORDER BY id DESC
         LIMIT 1",
    )
    .bind(site_id)
    .bind(before_job_id)
    .fetch_optional(pool)
    .await?;
    Ok(id)
}
