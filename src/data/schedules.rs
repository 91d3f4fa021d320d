//! Recurring crawl schedules (at most one per site).

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::data::models::Schedule;
use crate::error::Result;

/// Upsert the schedule for a site. `next_run_at` is the first fire time
/// computed from the expression at upsert time.
pub async fn upsert(
    pool: &PgPool,
    site_id: i64,
    cron_expression: &str,
    timezone: &str,
    is_active: bool,
    next_run_at: DateTime<Utc>,
) -> Result<Schedule> {
    let schedule = sqlx::query_as::<_, Schedule>(
        "INSERT INTO schedules (site_id, cron_expression, timezone, is_active, next_run_at)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (site_id) DO UPDATE SET
            cron_expression = EXCLUDED.cron_expression,
            timezone = EXCLUDED.timezone,
            is_active = EXCLUDED.is_active,
            next_run_at = EXCLUDED.next_run_at,
            updated_at = NOW()
         RETURNING *",
    )
    .bind(site_id)
    .bind(cron_expression)
    .bind(timezone)
    .bind(is_active)
    .bind(next_run_at)
    .fetch_one(pool)
    .await?;

    Ok(schedule)
}

pub async fn get_for_site(pool: &PgPool, site_id: i64) -> Result<Option<Schedule>> {
    let schedule = sqlx::query_as::<_, Schedule>("SELECT * FROM schedules WHERE site_id = $1")
        .bind(site_id)
        .fetch_optional(pool)
        .await?;
    Ok(schedule)
}

/// Active schedules whose fire time has arrived.
pub async fn due(pool: &PgPool) -> Result<Vec<Schedule>> {
    let schedules = sqlx::query_as::<_, Schedule>(
        "SELECT * FROM schedules
         WHERE is_active AND next_run_at IS NOT NULL AND next_run_at <= NOW()
         ORDER BY next_run_at ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(schedules)
}

/// Advance a fired schedule: record the fire time and persist the next one,
/// so a process restart never replays or shifts the cadence.
pub async fn advance(
    pool: &PgPool,
    schedule_id: i64,
    fired_at: DateTime<Utc>,
    next_run_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE schedules
         SET last_run_at = $2, next_run_at = $3, updated_at = NOW()
         WHERE id = $1",
    )
    .bind(schedule_id)
    .bind(fired_at)
    .bind(next_run_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Deactivate a schedule whose expression or timezone turned out invalid.
pub async fn deactivate(pool: &PgPool, schedule_id: i64) -> Result<()> {
    sqlx::query("UPDATE schedules SET is_active = FALSE, updated_at = NOW() WHERE id = $1")
        .bind(schedule_id)
        .execute(pool)
        .await?;
    Ok(())
}
