//! Cron-driven enqueue of recurring crawls.
//!
//! Runs only in worker processes. Every tick it materializes due schedules
//! into crawl jobs + queue tasks, keyed so that overlapping ticks or multiple
//! scheduler replicas enqueue each fire time exactly once. `next_run_at` is
//! persisted after every fire, so a restart neither replays nor shifts the
//! cadence.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use croner::Cron;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::data::models::{Schedule, TaskPriority};
use crate::data::{crawl_jobs, schedules, tasks};
use crate::error::Result;

/// Scheduler tick interval.
const TICK_INTERVAL: Duration = Duration::from_secs(30);

pub struct Scheduler {
    db_pool: PgPool,
    config: Arc<Config>,
}

impl Scheduler {
    pub fn new(db_pool: PgPool, config: Arc<Config>) -> Self {
        Self { db_pool, config }
    }

    /// Run the scheduler loop until a shutdown signal arrives.
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(tick = ?TICK_INTERVAL, "Scheduler started");

        let mut next_tick = time::Instant::now();
        loop {
            tokio::select! {
                _ = time::sleep_until(next_tick) => {
                    if let Err(e) = self.tick().await {
                        error!(error = ?e, "Scheduler tick failed");
                    }
                    next_tick = time::Instant::now() + TICK_INTERVAL;
                }
                _ = shutdown_rx.recv() => {
                    info!("Scheduler exiting gracefully");
                    break;
                }
            }
        }
    }

    /// Materialize every due schedule into a crawl task.
    async fn tick(&self) -> Result<()> {
        let due = schedules::due(&self.db_pool).await?;
        if due.is_empty() {
            return Ok(());
        }

        debug!(count = due.len(), "schedules due");
        for schedule in due {
            if let Err(e) = self.fire(&schedule).await {
                error!(
                    schedule_id = schedule.id,
                    site_id = schedule.site_id,
                    error = ?e,
                    "failed to fire schedule"
                );
            }
        }

        Ok(())
    }

    async fn fire(&self, schedule: &Schedule) -> Result<()> {
        // The due query guarantees next_run_at is set.
        let Some(fire_time) = schedule.next_run_at else {
            return Ok(());
        };

        // An expression or timezone that no longer parses is a permanent
        // fault; deactivate instead of erroring every tick.
        let next = match cron_next(&schedule.cron_expression, &schedule.timezone, Utc::now()) {
            Ok(next) => next,
            Err(e) => {
                warn!(
                    schedule_id = schedule.id,
                    expression = %schedule.cron_expression,
                    error = %e,
                    "deactivating schedule with invalid cron expression"
                );
                schedules::deactivate(&self.db_pool, schedule.id).await?;
                return Ok(());
            }
        };

        // Key on the canonical fire time so sub-daily schedules never collide
        // and replicas firing the same slot enqueue exactly once.
        let key = idempotency_key(schedule.site_id, fire_time);

        if tasks::find_by_idempotency_key(&self.db_pool, &key)
            .await?
            .is_some()
        {
            debug!(key, "fire time already enqueued");
            schedules::advance(&self.db_pool, schedule.id, fire_time, next).await?;
            return Ok(());
        }

        let job = crawl_jobs::create(
            &self.db_pool,
            schedule.site_id,
            self.config.max_crawl_pages,
            self.config.max_crawl_depth,
        )
        .await?;

        match tasks::enqueue(
            &self.db_pool,
            job.id,
            TaskPriority::Normal,
            self.config.task_max_attempts,
            Some(&key),
        )
        .await?
        {
            tasks::Enqueued::Created(task_id) => {
                info!(
                    site_id = schedule.site_id,
                    job_id = job.id,
                    task_id,
                    key,
                    "scheduled crawl enqueued"
                );
            }
            tasks::Enqueued::Existing(task_id) => {
                // A replica beat us between the key check and the insert;
                // the job we just created has no task pointing at it.
                debug!(task_id, key, "lost enqueue race, dropping orphan job");
                crawl_jobs::delete(&self.db_pool, job.id).await?;
            }
        }

        schedules::advance(&self.db_pool, schedule.id, fire_time, next).await?;
        Ok(())
    }
}

/// Idempotency key for one schedule fire.
pub fn idempotency_key(site_id: i64, fire_time: DateTime<Utc>) -> String {
    format!("cron-{}-{}", site_id, fire_time.timestamp())
}

/// Validate a 5-field cron expression and timezone pair.
pub fn validate_schedule(expression: &str, timezone: &str) -> Result<()> {
    timezone
        .parse::<Tz>()
        .map_err(|e| anyhow::anyhow!("invalid timezone '{timezone}': {e}"))?;
    Cron::new(expression)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid cron expression '{expression}': {e}"))?;
    Ok(())
}

/// Next occurrence of a 5-field cron expression after `after`, evaluated in
/// the schedule's zone and returned in UTC.
pub fn cron_next(expression: &str, timezone: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let tz: Tz = timezone
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid timezone '{timezone}': {e}"))?;
    let cron = Cron::new(expression)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid cron expression '{expression}': {e}"))?;

    let next = cron
        .find_next_occurrence(&after.with_timezone(&tz), false)
        .map_err(|e| anyhow::anyhow!("no next occurrence for '{expression}': {e}"))?;

    Ok(next.with_timezone(&Utc))
}
