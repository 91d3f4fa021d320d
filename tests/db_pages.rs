#[allow(dead_code)]
mod helpers;

use chrono::Utc;
use llmstxt::data::models::{PageCategory, PageStatus};
use llmstxt::data::pages::{self, NewPage};
use sqlx::PgPool;

fn new_page<'a>(site_id: i64, job_id: i64, url: &'a str, hash: &'a str) -> NewPage<'a> {
    NewPage {
        site_id,
        crawl_job_id: job_id,
        url,
        title: Some("Title"),
        description: Some("Description"),
        headings: &[],
        category: PageCategory::Documentation,
        relevance_score: 0.8,
        depth: 1,
        content_hash: hash,
        status: PageStatus::Added,
        first_seen_at: Utc::now(),
        last_seen_at: Utc::now(),
    }
}

#[sqlx::test]
async fn upsert_inserts_then_updates_same_job_url(pool: PgPool) {
    let (site_id, job_id) = helpers::seed_job(&pool).await;

    let first = pages::upsert(&pool, &new_page(site_id, job_id, "https://example.com/docs", "h1"))
        .await
        .unwrap();

    let mut replay = new_page(site_id, job_id, "https://example.com/docs", "h2");
    replay.status = PageStatus::Updated;
    let second = pages::upsert(&pool, &replay).await.unwrap();

    assert_eq!(first, second, "conflict path must update, not duplicate");

    let rows = pages::for_job(&pool, job_id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].content_hash, "h2");
    assert_eq!(rows[0].status, PageStatus::Updated);
}

#[sqlx::test]
async fn same_url_is_distinct_across_jobs(pool: PgPool) {
    let (site_id, job_a) = helpers::seed_job(&pool).await;
    let (job_b,): (i64,) = sqlx::query_as(
        "INSERT INTO crawl_jobs (site_id, max_pages, max_depth) VALUES ($1, 200, 3) RETURNING id",
    )
    .bind(site_id)
    .fetch_one(&pool)
    .await
    .unwrap();

    pages::upsert(&pool, &new_page(site_id, job_a, "https://example.com/docs", "h1"))
        .await
        .unwrap();
    pages::upsert(&pool, &new_page(site_id, job_b, "https://example.com/docs", "h2"))
        .await
        .unwrap();

    assert_eq!(pages::for_job(&pool, job_a).await.unwrap().len(), 1);
    assert_eq!(pages::for_job(&pool, job_b).await.unwrap().len(), 1);
}

#[sqlx::test]
async fn cursor_pagination_is_ascending_and_resumable(pool: PgPool) {
    let (site_id, job_id) = helpers::seed_job(&pool).await;
    let first = helpers::insert_page(&pool, site_id, job_id, "https://example.com/a", "ha").await;
    helpers::insert_page(&pool, site_id, job_id, "https://example.com/b", "hb").await;
    helpers::insert_page(&pool, site_id, job_id, "https://example.com/c", "hc").await;

    // Full replay from the zero cursor.
    let all = pages::for_job_after(&pool, job_id, 0, 100).await.unwrap();
    assert_eq!(all.len(), 3);
    let ids: Vec<i64> = all.iter().map(|p| p.id).collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted, "replay must be in ascending id order");

    // Resuming after the first id yields exactly the remainder.
    let rest = pages::for_job_after(&pool, job_id, first, 100).await.unwrap();
    assert_eq!(rest.len(), 2);
    assert!(rest.iter().all(|p| p.id > first));

    // Limit caps the batch.
    let batch = pages::for_job_after(&pool, job_id, 0, 2).await.unwrap();
    assert_eq!(batch.len(), 2);
}

#[sqlx::test]
async fn site_deletion_cascades_to_pages(pool: PgPool) {
    let (site_id, job_id) = helpers::seed_job(&pool).await;
    helpers::insert_page(&pool, site_id, job_id, "https://example.com/a", "ha").await;

    sqlx::query("DELETE FROM sites WHERE id = $1")
        .bind(site_id)
        .execute(&pool)
        .await
        .unwrap();

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pages")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0, "pages must cascade with their site");
}
