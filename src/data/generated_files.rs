//! Versioned generated llms.txt documents (append-only).

use crate::data::models::GeneratedFile;
use crate::error::Result;
use sqlx::PgPool;

pub async fn insert(
    pool: &PgPool,
    site_id: i64,
    crawl_job_id: i64,
    content: &str,
    content_hash: &str,
) -> Result<GeneratedFile> {
    let file = sqlx::query_as::<_, GeneratedFile>(
        "INSERT INTO generated_files (site_id, crawl_job_id, content, content_hash)
         VALUES ($1, $2, $3, $4)
         RETURNING *",
    )
    .bind(site_id)
    .bind(crawl_job_id)
    .bind(content)
    .bind(content_hash)
    .fetch_one(pool)
    .await?;

    Ok(file)
}

/// The current document for a site: the most recent row.
pub async fn latest_for_site(pool: &PgPool, site_id: i64) -> Result<Option<GeneratedFile>> {
    let file = sqlx::query_as::<_, GeneratedFile>(
        "SELECT * FROM generated_files
         WHERE site_id = $1
         ORDER BY id DESC
         LIMIT 1",
    )
    .bind(site_id)
    .fetch_optional(pool)
    .await?;
    Ok(file)
}
