use sqlx::PgPool;

/// Insert a site row, returning its ID.
pub async fn insert_site(pool: &PgPool, url: &str, domain: &str) -> i64 {
    let (id,): (i64,) =
        sqlx::query_as("INSERT INTO sites (url, domain) VALUES ($1, $2) RETURNING id")
            .bind(url)
            .bind(domain)
            .fetch_one(pool)
            .await
            .expect("insert_site failed");
    id
}

/// Insert a site + pending crawl job pair, returning `(site_id, job_id)`.
pub async fn seed_job(pool: &PgPool) -> (i64, i64) {
    seed_job_for(pool, "https://example.com/").await
}

/// Like [`seed_job`] but for a specific site URL (distinct sites per test
/// fixture).
pub async fn seed_job_for(pool: &PgPool, url: &str) -> (i64, i64) {
    let site_id = insert_site(pool, url, "example.com").await;
    let (job_id,): (i64,) = sqlx::query_as(
        "INSERT INTO crawl_jobs (site_id, max_pages, max_depth) VALUES ($1, 200, 3) RETURNING id",
    )
    .bind(site_id)
    .fetch_one(pool)
    .await
    .expect("seed_job failed");
    (site_id, job_id)
}

/// Insert a task row directly via SQL with full control over queue state.
pub async fn insert_task(
    pool: &PgPool,
    job_id: i64,
    status: &str,
    attempts: i32,
    max_attempts: i32,
    lease_owner: Option<&str>,
    leased_until_offset_secs: Option<i64>,
) -> i64 {
    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO crawl_tasks (job_id, status, attempts, max_attempts, lease_owner, leased_until)
         VALUES ($1, $2::crawl_task_status, $3, $4, $5,
                 CASE WHEN $6::bigint IS NULL THEN NULL
                      ELSE NOW() + make_interval(secs => $6::double precision) END)
         RETURNING id",
    )
    .bind(job_id)
    .bind(status)
    .bind(attempts)
    .bind(max_attempts)
    .bind(lease_owner)
    .bind(leased_until_offset_secs)
    .fetch_one(pool)
    .await
    .expect("insert_task failed");
    id
}

/// Insert a page row for a job.
pub async fn insert_page(pool: &PgPool, site_id: i64, job_id: i64, url: &str, hash: &str) -> i64 {
    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO pages (site_id, crawl_job_id, url, title, category, content_hash, status)
         VALUES ($1, $2, $3, $4, 'documentation', $5, 'added')
         RETURNING id",
    )
    .bind(site_id)
    .bind(job_id)
    .bind(url)
    .bind(format!("Title of {url}"))
    .bind(hash)
    .fetch_one(pool)
    .await
    .expect("insert_page failed");
    id
}
