//! Site registration and lookup.

use crate::data::models::Site;
use crate::error::Result;
use sqlx::PgPool;

/// Insert a site for a normalized URL, or return the existing row.
pub async fn create_or_get(pool: &PgPool, url: &str, domain: &str) -> Result<Site> {
    // DO UPDATE (rather than DO NOTHING) so RETURNING yields the row on both
    // paths.
    let site = sqlx::query_as::<_, Site>(
        "INSERT INTO sites (url, domain)
         VALUES ($1, $2)
         ON CONFLICT (url) DO UPDATE SET updated_at = NOW()
         RETURNING *",
    )
    .bind(url)
    .bind(domain)
    .fetch_one(pool)
    .await?;

    Ok(site)
}

pub async fn get(pool: &PgPool, site_id: i64) -> Result<Option<Site>> {
    let site = sqlx::query_as::<_, Site>("SELECT * FROM sites WHERE id = $1")
        .bind(site_id)
        .fetch_optional(pool)
        .await?;
    Ok(site)
}

/// Whether the site still exists. Running crawls poll this to detect
/// mid-crawl deletion.
pub async fn exists(pool: &PgPool, site_id: i64) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar("SELECT id FROM sites WHERE id = $1")
        .bind(site_id)
        .fetch_optional(pool)
        .await?;
    Ok(found.is_some())
}

/// Delete a site; dependent jobs, tasks, pages, documents and schedules
/// cascade. Returns whether a row was deleted.
pub async fn delete(pool: &PgPool, site_id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM sites WHERE id = $1")
        .bind(site_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Refresh the site's display metadata from its seed page extraction.
pub async fn update_meta(
    pool: &PgPool,
    site_id: i64,
    title: Option<&str>,
    description: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "UPDATE sites
         SET title = COALESCE($2, title),
             description = COALESCE($3, description),
             updated_at = NOW()
         WHERE id = $1",
    )
    .bind(site_id)
    .bind(title)
    .bind(description)
    .execute(pool)
    .await?;
    Ok(())
}
