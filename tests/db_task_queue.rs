#[allow(dead_code)]
mod helpers;

use llmstxt::data::models::{TaskPriority, TaskStatus};
use llmstxt::data::tasks::{self, Enqueued, QueueError};
use sqlx::PgPool;
use std::time::Duration;

const LEASE: Duration = Duration::from_secs(60);

// ── enqueue ─────────────────────────────────────────────────────────

#[sqlx::test]
async fn enqueue_creates_queued_task(pool: PgPool) {
    let (_, job_id) = helpers::seed_job(&pool).await;

    let enqueued = tasks::enqueue(&pool, job_id, TaskPriority::Normal, 5, None)
        .await
        .unwrap();
    assert!(matches!(enqueued, Enqueued::Created(_)));

    let task = tasks::get(&pool, enqueued.task_id()).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
    assert_eq!(task.attempts, 0);
    assert_eq!(task.max_attempts, 5);
    assert!(task.lease_owner.is_none());
}

#[sqlx::test]
async fn enqueue_same_idempotency_key_returns_existing(pool: PgPool) {
    let (_, job_id) = helpers::seed_job(&pool).await;

    let first = tasks::enqueue(&pool, job_id, TaskPriority::Normal, 5, Some("cron-1-12345"))
        .await
        .unwrap();
    let second = tasks::enqueue(&pool, job_id, TaskPriority::Normal, 5, Some("cron-1-12345"))
        .await
        .unwrap();

    assert!(matches!(first, Enqueued::Created(_)));
    assert!(matches!(second, Enqueued::Existing(_)));
    assert_eq!(first.task_id(), second.task_id());

    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM crawl_tasks WHERE idempotency_key = 'cron-1-12345'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(count, 1, "idempotency key must map to exactly one row");
}

#[sqlx::test]
async fn enqueue_distinct_keys_create_distinct_tasks(pool: PgPool) {
    let (_, job_id) = helpers::seed_job(&pool).await;

    let a = tasks::enqueue(&pool, job_id, TaskPriority::Normal, 5, Some("cron-1-100"))
        .await
        .unwrap();
    let b = tasks::enqueue(&pool, job_id, TaskPriority::Normal, 5, Some("cron-1-200"))
        .await
        .unwrap();

    assert!(matches!(b, Enqueued::Created(_)));
    assert_ne!(a.task_id(), b.task_id());
}

// ── claim ───────────────────────────────────────────────────────────

#[sqlx::test]
async fn claim_empty_queue_returns_none(pool: PgPool) {
    let claimed = tasks::claim(&pool, "worker-1", LEASE).await.unwrap();
    assert!(claimed.is_none());
}

#[sqlx::test]
async fn claim_takes_lease_and_counts_attempt(pool: PgPool) {
    let (_, job_id) = helpers::seed_job(&pool).await;
    let enqueued = tasks::enqueue(&pool, job_id, TaskPriority::Normal, 5, None)
        .await
        .unwrap();

    let task = tasks::claim(&pool, "worker-1", LEASE)
        .await
        .unwrap()
        .expect("should claim the queued task");

    assert_eq!(task.id, enqueued.task_id());
    assert_eq!(task.status, TaskStatus::Leased);
    assert_eq!(task.lease_owner.as_deref(), Some("worker-1"));
    assert_eq!(task.attempts, 1);

    // Lease deadline is in the future according to the database clock.
    let (valid,): (bool,) =
        sqlx::query_as("SELECT leased_until > NOW() FROM crawl_tasks WHERE id = $1")
            .bind(task.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(valid, "leased_until should be ahead of now()");
}

#[sqlx::test]
async fn claim_skips_leased_tasks(pool: PgPool) {
    let (_, job_id) = helpers::seed_job(&pool).await;
    helpers::insert_task(&pool, job_id, "leased", 1, 5, Some("other-worker"), Some(60)).await;

    let claimed = tasks::claim(&pool, "worker-1", LEASE).await.unwrap();
    assert!(claimed.is_none(), "held leases must not be claimable");
}

#[sqlx::test]
async fn claim_skips_future_available_at(pool: PgPool) {
    let (_, job_id) = helpers::seed_job(&pool).await;
    sqlx::query(
        "INSERT INTO crawl_tasks (job_id, available_at) VALUES ($1, NOW() + INTERVAL '1 hour')",
    )
    .bind(job_id)
    .execute(&pool)
    .await
    .unwrap();

    let claimed = tasks::claim(&pool, "worker-1", LEASE).await.unwrap();
    assert!(claimed.is_none(), "backoff delay must be honored");
}

#[sqlx::test]
async fn claim_skips_exhausted_tasks(pool: PgPool) {
    let (_, job_id) = helpers::seed_job(&pool).await;
    helpers::insert_task(&pool, job_id, "queued", 5, 5, None, None).await;

    let claimed = tasks::claim(&pool, "worker-1", LEASE).await.unwrap();
    assert!(claimed.is_none(), "tasks out of attempts must not be claimable");
}

#[sqlx::test]
async fn claim_prefers_higher_priority(pool: PgPool) {
    let (_, job_id) = helpers::seed_job(&pool).await;
    let low = tasks::enqueue(&pool, job_id, TaskPriority::Low, 5, None)
        .await
        .unwrap();
    let high = tasks::enqueue(&pool, job_id, TaskPriority::High, 5, None)
        .await
        .unwrap();

    let task = tasks::claim(&pool, "worker-1", LEASE).await.unwrap().unwrap();
    assert_eq!(task.id, high.task_id());
    assert_ne!(task.id, low.task_id());
}

#[sqlx::test]
async fn claim_tie_breaks_on_available_at_then_id(pool: PgPool) {
    let (_, job_id) = helpers::seed_job(&pool).await;
    sqlx::query("INSERT INTO crawl_tasks (job_id, available_at) VALUES ($1, NOW() - INTERVAL '1 minute')")
        .bind(job_id)
        .execute(&pool)
        .await
        .unwrap();
    let (older_id,): (i64,) = sqlx::query_as(
        "INSERT INTO crawl_tasks (job_id, available_at) VALUES ($1, NOW() - INTERVAL '2 minutes') RETURNING id",
    )
    .bind(job_id)
    .fetch_one(&pool)
    .await
    .unwrap();

    let task = tasks::claim(&pool, "worker-1", LEASE).await.unwrap().unwrap();
    assert_eq!(task.id, older_id, "older available_at should win at equal priority");
}

#[sqlx::test]
async fn concurrent_workers_claim_distinct_tasks(pool: PgPool) {
    let (_, job_id) = helpers::seed_job(&pool).await;
    for _ in 0..3 {
        tasks::enqueue(&pool, job_id, TaskPriority::Normal, 5, None)
            .await
            .unwrap();
    }

    let a = tasks::claim(&pool, "worker-a", LEASE).await.unwrap().unwrap();
    let b = tasks::claim(&pool, "worker-b", LEASE).await.unwrap().unwrap();
    let c = tasks::claim(&pool, "worker-c", LEASE).await.unwrap().unwrap();

    let ids: std::collections::HashSet<i64> = [a.id, b.id, c.id].into();
    assert_eq!(ids.len(), 3, "no two workers may receive the same task");

    assert!(tasks::claim(&pool, "worker-d", LEASE).await.unwrap().is_none());
}

// ── heartbeat ───────────────────────────────────────────────────────

#[sqlx::test]
async fn heartbeat_extends_lease_for_owner(pool: PgPool) {
    let (_, job_id) = helpers::seed_job(&pool).await;
    tasks::enqueue(&pool, job_id, TaskPriority::Normal, 5, None)
        .await
        .unwrap();
    let task = tasks::claim(&pool, "worker-1", Duration::from_secs(30))
        .await
        .unwrap()
        .unwrap();
    let before = task.leased_until.unwrap();

    tasks::heartbeat(&pool, task.id, "worker-1", Duration::from_secs(300))
        .await
        .unwrap();

    let after = tasks::get(&pool, task.id).await.unwrap().unwrap();
    assert!(after.leased_until.unwrap() > before, "lease must move forward");
}

#[sqlx::test]
async fn heartbeat_rejects_non_owner(pool: PgPool) {
    let (_, job_id) = helpers::seed_job(&pool).await;
    tasks::enqueue(&pool, job_id, TaskPriority::Normal, 5, None)
        .await
        .unwrap();
    let task = tasks::claim(&pool, "worker-1", LEASE).await.unwrap().unwrap();

    let result = tasks::heartbeat(&pool, task.id, "impostor", LEASE).await;
    assert!(matches!(result, Err(QueueError::NotOwner { .. })));

    // No side effect: still leased by the real owner.
    let unchanged = tasks::get(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(unchanged.lease_owner.as_deref(), Some("worker-1"));
}

// ── complete ────────────────────────────────────────────────────────

#[sqlx::test]
async fn complete_transitions_to_succeeded(pool: PgPool) {
    let (_, job_id) = helpers::seed_job(&pool).await;
    tasks::enqueue(&pool, job_id, TaskPriority::Normal, 5, None)
        .await
        .unwrap();
    let task = tasks::claim(&pool, "worker-1", LEASE).await.unwrap().unwrap();

    tasks::complete(&pool, task.id, "worker-1").await.unwrap();

    let done = tasks::get(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(done.status, TaskStatus::Succeeded);
    assert!(done.leased_until.is_none());
}

#[sqlx::test]
async fn complete_rejects_non_owner(pool: PgPool) {
    let (_, job_id) = helpers::seed_job(&pool).await;
    tasks::enqueue(&pool, job_id, TaskPriority::Normal, 5, None)
        .await
        .unwrap();
    let task = tasks::claim(&pool, "worker-1", LEASE).await.unwrap().unwrap();

    let result = tasks::complete(&pool, task.id, "worker-2").await;
    assert!(matches!(result, Err(QueueError::NotOwner { .. })));

    let unchanged = tasks::get(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(unchanged.status, TaskStatus::Leased);
}

// ── fail ────────────────────────────────────────────────────────────

#[sqlx::test]
async fn fail_requeues_with_backoff(pool: PgPool) {
    let (_, job_id) = helpers::seed_job(&pool).await;
    tasks::enqueue(&pool, job_id, TaskPriority::Normal, 5, None)
        .await
        .unwrap();
    let task = tasks::claim(&pool, "worker-1", LEASE).await.unwrap().unwrap();

    let status = tasks::fail(&pool, task.id, "worker-1", "connect timeout")
        .await
        .unwrap();
    assert_eq!(status, TaskStatus::Queued);

    let requeued = tasks::get(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(requeued.status, TaskStatus::Queued);
    assert_eq!(requeued.last_error.as_deref(), Some("connect timeout"));
    assert!(requeued.lease_owner.is_none());

    // Backoff pushed availability into the future; not claimable yet.
    let (delayed,): (bool,) =
        sqlx::query_as("SELECT available_at > NOW() FROM crawl_tasks WHERE id = $1")
            .bind(task.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(delayed);
    assert!(tasks::claim(&pool, "worker-2", LEASE).await.unwrap().is_none());
}

#[sqlx::test]
async fn fail_dead_letters_when_attempts_exhausted(pool: PgPool) {
    let (_, job_id) = helpers::seed_job(&pool).await;
    tasks::enqueue(&pool, job_id, TaskPriority::Normal, 1, None)
        .await
        .unwrap();
    let task = tasks::claim(&pool, "worker-1", LEASE).await.unwrap().unwrap();
    assert_eq!(task.attempts, 1);

    let status = tasks::fail(&pool, task.id, "worker-1", "still broken")
        .await
        .unwrap();
    assert_eq!(status, TaskStatus::DeadLetter);

    // Dead-lettered work is never handed out again.
    assert!(tasks::claim(&pool, "worker-2", LEASE).await.unwrap().is_none());
}

#[sqlx::test]
async fn fail_rejects_non_owner(pool: PgPool) {
    let (_, job_id) = helpers::seed_job(&pool).await;
    tasks::enqueue(&pool, job_id, TaskPriority::Normal, 5, None)
        .await
        .unwrap();
    let task = tasks::claim(&pool, "worker-1", LEASE).await.unwrap().unwrap();

    let result = tasks::fail(&pool, task.id, "worker-2", "nope").await;
    assert!(matches!(result, Err(QueueError::NotOwner { .. })));
}

#[sqlx::test]
async fn fail_permanent_bypasses_remaining_attempts(pool: PgPool) {
    let (_, job_id) = helpers::seed_job(&pool).await;
    tasks::enqueue(&pool, job_id, TaskPriority::Normal, 5, None)
        .await
        .unwrap();
    let task = tasks::claim(&pool, "worker-1", LEASE).await.unwrap().unwrap();

    tasks::fail_permanent(&pool, task.id, "worker-1", "malformed URL")
        .await
        .unwrap();

    let dead = tasks::get(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(dead.status, TaskStatus::DeadLetter);
    assert_eq!(dead.attempts, 1, "retry budget left untouched");
    assert_eq!(dead.last_error.as_deref(), Some("malformed URL"));
}

// ── recover ─────────────────────────────────────────────────────────

#[sqlx::test]
async fn recover_requeues_expired_leases_without_extra_attempt(pool: PgPool) {
    let (_, job_id) = helpers::seed_job(&pool).await;
    let expired =
        helpers::insert_task(&pool, job_id, "leased", 1, 5, Some("dead-worker"), Some(-30)).await;

    let recovered = tasks::recover(&pool).await.unwrap();
    assert_eq!(recovered, 1);

    let task = tasks::get(&pool, expired).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
    assert_eq!(task.attempts, 1, "claim already counted the attempt");
    assert!(task.lease_owner.is_none());
    assert_eq!(task.last_error.as_deref(), Some("recovered: lease expired"));
}

#[sqlx::test]
async fn recover_leaves_live_leases_alone(pool: PgPool) {
    let (_, job_id) = helpers::seed_job(&pool).await;
    let live =
        helpers::insert_task(&pool, job_id, "leased", 1, 5, Some("busy-worker"), Some(60)).await;

    let recovered = tasks::recover(&pool).await.unwrap();
    assert_eq!(recovered, 0);

    let task = tasks::get(&pool, live).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Leased);
    assert_eq!(task.lease_owner.as_deref(), Some("busy-worker"));
}

#[sqlx::test]
async fn sweep_dead_letters_recovered_tasks_out_of_attempts(pool: PgPool) {
    // A worker died on the task's final attempt; recovery requeues it but no
    // claim may hand it out again.
    let (_, job_id) = helpers::seed_job(&pool).await;
    let task_id =
        helpers::insert_task(&pool, job_id, "leased", 5, 5, Some("dead-worker"), Some(-30)).await;

    tasks::recover(&pool).await.unwrap();
    assert!(tasks::claim(&pool, "worker-1", LEASE).await.unwrap().is_none());

    let swept = tasks::sweep_exhausted(&pool).await.unwrap();
    assert_eq!(swept, vec![job_id]);

    let task = tasks::get(&pool, task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::DeadLetter);
}

#[sqlx::test]
async fn sweep_spares_tasks_with_attempts_remaining(pool: PgPool) {
    let (_, job_id) = helpers::seed_job(&pool).await;
    helpers::insert_task(&pool, job_id, "queued", 2, 5, None, None).await;

    let swept = tasks::sweep_exhausted(&pool).await.unwrap();
    assert!(swept.is_empty());
}

#[sqlx::test]
async fn recovered_task_completes_under_new_worker(pool: PgPool) {
    // Worker A claimed and died; B recovers, reclaims, and completes.
    let (_, job_id) = helpers::seed_job(&pool).await;
    helpers::insert_task(&pool, job_id, "leased", 1, 5, Some("worker-a"), Some(-30)).await;

    tasks::recover(&pool).await.unwrap();
    let task = tasks::claim(&pool, "worker-b", LEASE).await.unwrap().unwrap();
    assert_eq!(task.attempts, 2);

    // The dead worker's stale settle attempts are rejected outright.
    assert!(matches!(
        tasks::complete(&pool, task.id, "worker-a").await,
        Err(QueueError::NotOwner { .. })
    ));

    tasks::complete(&pool, task.id, "worker-b").await.unwrap();
    let done = tasks::get(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(done.status, TaskStatus::Succeeded);
    assert_eq!(done.attempts, 2);
}
