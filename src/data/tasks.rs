//! Durable crawl task queue backed by Postgres row locking.
//!
//! Tasks are claimed with `FOR UPDATE SKIP LOCKED` so concurrent workers hand
//! out distinct rows without serializing on each other. Every mutation of a
//! leased task re-verifies `lease_owner` so a recovered task can never be
//! completed by a stale owner.

use rand::Rng;
use sqlx::PgPool;
use std::time::Duration;

use crate::data::models::{CrawlTask, TaskPriority, TaskStatus};

/// Base delay for the retry backoff schedule.
const BACKOFF_BASE_SECS: f64 = 15.0;
/// Upper bound of the uniform jitter factor applied to backoff delays.
const BACKOFF_JITTER: f64 = 0.2;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The caller no longer holds the lease (expired and reclaimed, or never
    /// owned). Rejected without side effect.
    #[error("task {task_id} is not leased by worker '{worker_id}'")]
    NotOwner { task_id: i64, worker_id: String },
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Outcome of an enqueue: either a fresh row or the surviving row for an
/// already-used idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Created(i64),
    Existing(i64),
}

impl Enqueued {
    pub fn task_id(&self) -> i64 {
        match self {
            Enqueued::Created(id) | Enqueued::Existing(id) => *id,
        }
    }
}

/// Insert a `queued` task available immediately.
///
/// When `idempotency_key` is already present the existing task id is returned
/// and no new row is created.
pub async fn enqueue(
    pool: &PgPool,
    job_id: i64,
    priority: TaskPriority,
    max_attempts: i32,
    idempotency_key: Option<&str>,
) -> Result<Enqueued, QueueError> {
    let inserted: Option<i64> = sqlx::query_scalar(
        "INSERT INTO crawl_tasks (job_id, priority, max_attempts, idempotency_key)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (idempotency_key) WHERE idempotency_key IS NOT NULL DO NOTHING
         RETURNING id",
    )
    .bind(job_id)
    .bind(priority)
    .bind(max_attempts)
    .bind(idempotency_key)
    .fetch_optional(pool)
    .await?;

    if let Some(id) = inserted {
        return Ok(Enqueued::Created(id));
    }

    // Conflict on the idempotency key; hand back the surviving row.
    let existing: i64 = sqlx::query_scalar("SELECT id FROM crawl_tasks WHERE idempotency_key = $1")
        .bind(idempotency_key)
        .fetch_one(pool)
        .await?;

    Ok(Enqueued::Existing(existing))
}

/// Atomically claim the next eligible task for `worker_id`.
///
/// Eligible: `status ∈ {queued, failed}`, `available_at ≤ now()`, and
/// attempts remaining. Claiming takes the lease and counts the attempt in the
/// same transaction; `FOR UPDATE SKIP LOCKED` lets concurrent workers claim
/// distinct rows.
pub async fn claim(
    pool: &PgPool,
    worker_id: &str,
    lease: Duration,
) -> Result<Option<CrawlTask>, QueueError> {
    let mut tx = pool.begin().await?;

    let candidate: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM crawl_tasks
         WHERE status IN ('queued', 'failed')
           AND available_at <= NOW()
           AND attempts < max_attempts
         ORDER BY priority DESC, available_at ASC, id ASC
         LIMIT 1
         FOR UPDATE SKIP LOCKED",
    )
    .fetch_optional(&mut *tx)
    .await?;

    let task = match candidate {
        None => None,
        Some(id) => Some(
            sqlx::query_as::<_, CrawlTask>(
                "UPDATE crawl_tasks
                 SET status = 'leased',
                     lease_owner = $2,
                     leased_until = NOW() + make_interval(secs => $3::double precision),
                     attempts = attempts + 1
                 WHERE id = $1
                 RETURNING *",
            )
            .bind(id)
            .bind(worker_id)
            .bind(lease.as_secs_f64())
            .fetch_one(&mut *tx)
            .await?,
        ),
    };

    tx.commit().await?;

    Ok(task)
}

/// Extend the lease on a running task.
pub async fn heartbeat(
    pool: &PgPool,
    task_id: i64,
    worker_id: &str,
    extension: Duration,
) -> Result<(), QueueError> {
    let result = sqlx::query(
        "UPDATE crawl_tasks
         SET leased_until = NOW() + make_interval(secs => $3::double precision)
         WHERE id = $1 AND lease_owner = $2 AND status = 'leased'",
    )
    .bind(task_id)
    .bind(worker_id)
    .bind(extension.as_secs_f64())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(QueueError::NotOwner {
            task_id,
            worker_id: worker_id.to_string(),
        });
    }
    Ok(())
}

/// Transition a leased task to `succeeded`.
pub async fn complete(pool: &PgPool, task_id: i64, worker_id: &str) -> Result<(), QueueError> {
    let result = sqlx::query(
        "UPDATE crawl_tasks
         SET status = 'succeeded', leased_until = NULL
         WHERE id = $1 AND lease_owner = $2 AND status = 'leased'",
    )
    .bind(task_id)
    .bind(worker_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(QueueError::NotOwner {
            task_id,
            worker_id: worker_id.to_string(),
        });
    }
    Ok(())
}

/// Record a transient failure: requeue with backoff while attempts remain,
/// dead-letter otherwise. Returns the resulting status.
pub async fn fail(
    pool: &PgPool,
    task_id: i64,
    worker_id: &str,
    error: &str,
) -> Result<TaskStatus, QueueError> {
    let mut tx = pool.begin().await?;

    let row: Option<(i32, i32)> = sqlx::query_as(
        "SELECT attempts, max_attempts FROM crawl_tasks
         WHERE id = $1 AND lease_owner = $2 AND status = 'leased'
         FOR UPDATE",
    )
    .bind(task_id)
    .bind(worker_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((attempts, max_attempts)) = row else {
        return Err(QueueError::NotOwner {
            task_id,
            worker_id: worker_id.to_string(),
        });
    };

    let status = if attempts < max_attempts {
        let delay = backoff(attempts.max(1) as u32);
        sqlx::query(
            "UPDATE crawl_tasks
             SET status = 'queued',
                 available_at = NOW() + make_interval(secs => $2::double precision),
                 last_error = $3,
                 lease_owner = NULL,
                 leased_until = NULL
             WHERE id = $1",
        )
        .bind(task_id)
        .bind(delay.as_secs_f64())
        .bind(error)
        .execute(&mut *tx)
        .await?;
        TaskStatus::Queued
    } else {
        sqlx::query(
            "UPDATE crawl_tasks
             SET status = 'dead_letter',
                 last_error = $2,
                 lease_owner = NULL,
                 leased_until = NULL
             WHERE id = $1",
        )
        .bind(task_id)
        .bind(error)
        .execute(&mut *tx)
        .await?;
        TaskStatus::DeadLetter
    };

    tx.commit().await?;
    Ok(status)
}

/// Record a permanent failure: straight to `dead_letter`, bypassing the retry
/// budget.
pub async fn fail_permanent(
    pool: &PgPool,
    task_id: i64,
    worker_id: &str,
    error: &str,
) -> Result<(), QueueError> {
    let result = sqlx::query(
        "UPDATE crawl_tasks
         SET status = 'dead_letter',
             last_error = $3,
             lease_owner = NULL,
             leased_until = NULL
         WHERE id = $1 AND lease_owner = $2 AND status = 'leased'",
    )
    .bind(task_id)
    .bind(worker_id)
    .bind(error)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(QueueError::NotOwner {
            task_id,
            worker_id: worker_id.to_string(),
        });
    }
    Ok(())
}

/// Requeue tasks whose lease expired without a terminal transition.
///
/// The attempt was already counted at claim time, so `attempts` is left
/// untouched. Returns the number of recovered tasks.
pub async fn recover(pool: &PgPool) -> Result<u64, QueueError> {
    let result = sqlx::query(
        "UPDATE crawl_tasks
         SET status = 'queued',
             available_at = NOW(),
             lease_owner = NULL,
             leased_until = NULL,
             last_error = 'recovered: lease expired'
         WHERE status = 'leased' AND leased_until < NOW()",
    )
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Dead-letter requeued tasks whose retry budget is already spent.
///
/// A worker that dies on a task's final attempt leaves it `queued` with
/// `attempts = max_attempts` after recovery; no claim will ever hand it out
/// again, so it is settled here. Returns the affected job ids so the caller
/// can fail their jobs.
pub async fn sweep_exhausted(pool: &PgPool) -> Result<Vec<i64>, QueueError> {
    let job_ids: Vec<i64> = sqlx::query_scalar(
        "UPDATE crawl_tasks
         SET status = 'dead_letter',
             last_error = COALESCE(last_error, 'attempts exhausted')
         WHERE status IN ('queued', 'failed') AND attempts >= max_attempts
         RETURNING job_id",
    )
    .fetch_all(pool)
    .await?;

    Ok(job_ids)
}

/// Fetch a task by id.
pub async fn get(pool: &PgPool, task_id: i64) -> Result<Option<CrawlTask>, QueueError> {
    let task = sqlx::query_as::<_, CrawlTask>("SELECT * FROM crawl_tasks WHERE id = $1")
        .bind(task_id)
        .fetch_optional(pool)
        .await?;
    Ok(task)
}

/// Look up a task by idempotency key, used by the scheduler to skip fire
/// times it has already materialized.
pub async fn find_by_idempotency_key(
    pool: &PgPool,
    key: &str,
) -> Result<Option<CrawlTask>, QueueError> {
    let task =
        sqlx::query_as::<_, CrawlTask>("SELECT * FROM crawl_tasks WHERE idempotency_key = $1")
            .bind(key)
            .fetch_optional(pool)
            .await?;
    Ok(task)
}

/// Retry backoff: `15s * 2^(n-1)` with up to 20% added jitter, where `n` is
/// the attempt that just failed (1-based).
pub fn backoff(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE_SECS * 2f64.powi(attempt.saturating_sub(1) as i32);
    let jitter = 1.0 + rand::rng().random_range(0.0..BACKOFF_JITTER);
    Duration::from_secs_f64(exp * jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_first_attempt_bounds() {
        for _ in 0..50 {
            let d = backoff(1).as_secs_f64();
            assert!((15.0..18.0).contains(&d), "attempt 1 backoff {d} out of range");
        }
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        for _ in 0..50 {
            let d = backoff(3).as_secs_f64();
            // 15 * 2^2 = 60s, plus up to 20% jitter
            assert!((60.0..72.0).contains(&d), "attempt 3 backoff {d} out of range");
        }
    }

    #[test]
    fn backoff_zero_attempt_clamps_to_base() {
        let d = backoff(0).as_secs_f64();
        assert!((15.0..18.0).contains(&d));
    }
}
