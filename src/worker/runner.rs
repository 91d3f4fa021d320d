//! Queue claim loop and crawl task execution.
//!
//! One worker claims one task at a time (crawls are concurrent internally),
//! renews its lease from a heartbeat fiber while the crawl runs, and settles
//! the task through the ownership-checked queue transitions.

use chrono::Utc;
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::assemble::Assembler;
use crate::changes;
use crate::config::Config;
use crate::crawler::{CrawlError, CrawlEvent, CrawlLimits, Crawler};
use crate::data::models::{CrawlJob, CrawlTask, Page, Site, TaskStatus};
use crate::data::pages::NewPage;
use crate::data::tasks::QueueError;
use crate::data::{crawl_jobs, generated_files, pages, sites, tasks};
use crate::error::Result;

/// Claim poll cadence while idle.
const POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Lease renewal cadence while a task runs.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
/// Soft wall-clock budget for one crawl; overruns fail the task with retry.
const CRAWL_SOFT_TIMEOUT: Duration = Duration::from_secs(30 * 60);
/// Progress counters are flushed to the job row at most this often.
const COUNTER_FLUSH_INTERVAL: Duration = Duration::from_secs(1);
/// Event channel capacity between crawler and persister.
const EVENT_BUFFER: usize = 256;

pub struct Worker {
    db_pool: PgPool,
    config: Arc<Config>,
    assembler: Arc<dyn Assembler>,
}

/// What the event consumer learned while persisting one crawl.
struct ConsumeOutcome {
    changed: i32,
    seen: HashSet<String>,
    counters: crate::crawler::CrawlCounters,
}

impl Worker {
    pub fn new(db_pool: PgPool, config: Arc<Config>, assembler: Arc<dyn Assembler>) -> Self {
        Self {
            db_pool,
            config,
            assembler,
        }
    }

    /// Claim loop: recover expired leases, claim, run, repeat.
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(worker_id = %self.config.worker_id, "Worker started");

        loop {
            tokio::select! {
                _ = time::sleep(POLL_INTERVAL) => {
                    match tasks::recover(&self.db_pool).await {
                        Ok(0) => {}
                        Ok(count) => warn!(count, "recovered tasks with expired leases"),
                        Err(e) => warn!(error = ?e, "lease recovery failed"),
                    }

                    // A crash on a final attempt leaves an unclaimable queued
                    // task behind; settle it and its job here.
                    match tasks::sweep_exhausted(&self.db_pool).await {
                        Ok(job_ids) => {
                            for job_id in job_ids {
                                warn!(job_id, "task exhausted its retry budget after recovery");
                                if let Err(e) = crawl_jobs::mark_failed(
                                    &self.db_pool,
                                    job_id,
                                    "task exhausted its retry budget",
                                )
                                .await
                                {
                                    warn!(job_id, error = ?e, "failed to fail exhausted job");
                                }
                            }
                        }
                        Err(e) => warn!(error = ?e, "exhausted-task sweep failed"),
                    }

                    match tasks::claim(&self.db_pool, &self.config.worker_id, self.config.task_lease()).await {
                        Ok(Some(task)) => {
                            debug!(task_id = task.id, job_id = task.job_id, attempt = task.attempts, "claimed task");
                            self.run_task(task).await;
                        }
                        Ok(None) => trace!("no tasks available"),
                        Err(e) => warn!(error = ?e, "failed to claim task"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Worker exiting gracefully");
                    break;
                }
            }
        }
    }

    /// Execute one claimed task end to end and settle its queue state.
    async fn run_task(&self, task: CrawlTask) {
        let worker_id = self.config.worker_id.clone();

        let job = match crawl_jobs::get(&self.db_pool, task.job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                // Job row vanished (cascade delete); nothing to crawl.
                self.settle_permanent(&task, "crawl job no longer exists").await;
                return;
            }
            Err(e) => {
                warn!(task_id = task.id, error = ?e, "failed to load job, leaving lease to expire");
                return;
            }
        };

        let site = match sites::get(&self.db_pool, job.site_id).await {
            Ok(Some(site)) => site,
            Ok(None) => {
                self.settle_permanent(&task, "site no longer exists").await;
                return;
            }
            Err(e) => {
                warn!(task_id = task.id, error = ?e, "failed to load site, leaving lease to expire");
                return;
            }
        };

        if let Err(e) = crawl_jobs::mark_running(&self.db_pool, job.id).await {
            warn!(job_id = job.id, error = ?e, "failed to mark job running");
        }

        // The heartbeat fiber renews the lease and watches for site deletion;
        // it is cancelled deterministically on both completion paths.
        let cancel = CancellationToken::new();
        let heartbeat = tokio::spawn(heartbeat_loop(
            self.db_pool.clone(),
            task.id,
            worker_id.clone(),
            self.config.task_lease(),
            job.site_id,
            cancel.clone(),
        ));

        let outcome = time::timeout(CRAWL_SOFT_TIMEOUT, self.execute(&site, &job, cancel.clone())).await;

        // Snapshot before the deterministic cancel that stops the heartbeat.
        let cancelled_mid_run = cancel.is_cancelled();
        cancel.cancel();
        let _ = heartbeat.await;

        // Mid-run cancellation has two sources: the site was deleted, or the
        // lease was lost. Both end the task without a normal settle.
        if cancelled_mid_run {
            match sites::exists(&self.db_pool, job.site_id).await {
                Ok(false) => {
                    info!(task_id = task.id, job_id = job.id, "crawl cancelled: site deleted");
                    // The cascade usually removed these rows already.
                    let _ = crawl_jobs::mark_failed(&self.db_pool, job.id, "cancelled").await;
                    let _ =
                        tasks::fail_permanent(&self.db_pool, task.id, &worker_id, "cancelled").await;
                    return;
                }
                Ok(true) => {}
                Err(e) => {
                    warn!(error = ?e, "could not verify site after cancellation");
                    return;
                }
            }
        }

        match outcome {
            Err(_elapsed) => {
                warn!(task_id = task.id, "crawl exceeded soft timeout");
                self.settle_transient(&task, &job, "crawl exceeded 30 minute budget").await;
            }
            Ok(Ok(())) => {
                if let Err(e) = crawl_jobs::mark_completed(&self.db_pool, job.id).await {
                    warn!(job_id = job.id, error = ?e, "failed to mark job completed");
                }
                match tasks::complete(&self.db_pool, task.id, &worker_id).await {
                    Ok(()) => debug!(task_id = task.id, job_id = job.id, "task completed"),
                    Err(QueueError::NotOwner { .. }) => {
                        // Ownership moved while we were finishing; abandon
                        // without side effect.
                        warn!(task_id = task.id, "lease lost before completion, abandoning");
                    }
                    Err(e) => error!(task_id = task.id, error = ?e, "failed to complete task"),
                }
            }
            Ok(Err(CrawlError::Permanent(e))) => {
                let message = format!("{e:#}");
                warn!(task_id = task.id, error = %message, "permanent crawl failure");
                let _ = crawl_jobs::mark_failed(&self.db_pool, job.id, &message).await;
                match tasks::fail_permanent(&self.db_pool, task.id, &worker_id, &message).await {
                    Ok(()) | Err(QueueError::NotOwner { .. }) => {}
                    Err(e) => error!(task_id = task.id, error = ?e, "failed to dead-letter task"),
                }
            }
            Ok(Err(CrawlError::Transient(e))) => {
                let message = format!("{e:#}");
                warn!(task_id = task.id, error = %message, "transient crawl failure");
                self.settle_transient(&task, &job, &message).await;
            }
        }
    }

    /// Settle a transient failure: requeue with backoff, or fail the job when
    /// the retry budget is spent.
    async fn settle_transient(&self, task: &CrawlTask, job: &CrawlJob, message: &str) {
        match tasks::fail(&self.db_pool, task.id, &self.config.worker_id, message).await {
            Ok(TaskStatus::Queued) => {
                debug!(task_id = task.id, "task requeued with backoff");
            }
            Ok(_) => {
                info!(task_id = task.id, job_id = job.id, "task dead-lettered");
                let _ = crawl_jobs::mark_failed(&self.db_pool, job.id, message).await;
            }
            Err(QueueError::NotOwner { .. }) => {
                warn!(task_id = task.id, "lease lost before failure settle, abandoning");
            }
            Err(e) => error!(task_id = task.id, error = ?e, "failed to settle task failure"),
        }
    }

    /// Dead-letter a task for a permanent fault outside the crawl itself.
    async fn settle_permanent(&self, task: &CrawlTask, message: &str) {
        match tasks::fail_permanent(&self.db_pool, task.id, &self.config.worker_id, message).await {
            Ok(()) | Err(QueueError::NotOwner { .. }) => {}
            Err(e) => error!(task_id = task.id, error = ?e, "failed to dead-letter task"),
        }
    }

    /// Run the crawl for a job: stream pages into storage, classify changes,
    /// materialize removals, and regenerate the document when warranted.
    async fn execute(&self, site: &Site, job: &CrawlJob, cancel: CancellationToken) -> Result<(), CrawlError> {
        let seed = Url::parse(&site.url)
            .map_err(|e| CrawlError::Permanent(anyhow::anyhow!("malformed site URL '{}': {e}", site.url)))?;
        let limits = CrawlLimits::clamped(job.max_depth, job.max_pages, self.config.crawl_concurrency);

        // Baseline for change tracking: the previous completed crawl.
        let prior_pages = self
            .load_prior_pages(site.id, job.id)
            .await
            .map_err(CrawlError::Transient)?;
        let prior_hashes: HashMap<String, String> = prior_pages
            .iter()
            .map(|(url, page)| (url.clone(), page.content_hash.clone()))
            .collect();

        let crawler = Crawler::new(&self.config.user_agent)?;
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);

        let crawl = crawler.crawl(&seed, limits, events_tx, cancel.clone());
        let consume = self.consume_events(events_rx, site, job, &prior_pages, &prior_hashes);
        let (crawl_result, consume_result) = tokio::join!(crawl, consume);

        let outcome = consume_result.map_err(CrawlError::Transient)?;
        crawl_result?;

        if cancel.is_cancelled() {
            return Err(CrawlError::Transient(anyhow::anyhow!("crawl interrupted")));
        }

        // Pages present last run but absent now become `removed` rows in
        // this job, carrying their prior metadata.
        let mut changed = outcome.changed;
        for (url, prior) in &prior_pages {
            if outcome.seen.contains(url) {
                continue;
            }
            let removed = NewPage {
                site_id: site.id,
                crawl_job_id: job.id,
                url,
                title: prior.title.as_deref(),
                description: prior.description.as_deref(),
                headings: &prior.headings,
                category: prior.category,
                relevance_score: prior.relevance_score,
                depth: prior.depth,
                content_hash: &prior.content_hash,
                status: crate::data::models::PageStatus::Removed,
                first_seen_at: prior.first_seen_at,
                last_seen_at: prior.last_seen_at,
            };
            pages::upsert(&self.db_pool, &removed)
                .await
                .map_err(CrawlError::Transient)?;
            changed += 1;
        }

        crawl_jobs::update_counters(
            &self.db_pool,
            job.id,
            outcome.counters.found,
            outcome.counters.crawled,
            changed,
            outcome.counters.skipped,
        )
        .await
        .map_err(CrawlError::Transient)?;

        self.maybe_assemble(site, job, changed)
            .await
            .map_err(CrawlError::Transient)?;

        Ok(())
    }

    /// Drain crawl events into page rows and throttled counter flushes.
    async fn consume_events(
        &self,
        mut events_rx: mpsc::Receiver<CrawlEvent>,
        site: &Site,
        job: &CrawlJob,
        prior_pages: &HashMap<String, Page>,
        prior_hashes: &HashMap<String, String>,
    ) -> Result<ConsumeOutcome> {
        let mut changed = 0;
        let mut seen = HashSet::new();
        let mut counters = crate::crawler::CrawlCounters::default();
        let mut last_flush = Instant::now();
        let mut site_meta_updated = false;

        while let Some(event) = events_rx.recv().await {
            match event {
                CrawlEvent::Page(page) => {
                    let status = changes::classify(prior_hashes, &page.url, &page.content_hash);
                    if status != crate::data::models::PageStatus::Unchanged {
                        changed += 1;
                    }

                    let now = Utc::now();
                    let first_seen_at = prior_pages
                        .get(&page.url)
                        .map(|p| p.first_seen_at)
                        .unwrap_or(now);

                    let row = NewPage {
                        site_id: site.id,
                        crawl_job_id: job.id,
                        url: &page.url,
                        title: page.title.as_deref(),
                        description: page.description.as_deref(),
                        headings: &page.headings,
                        category: page.category,
                        relevance_score: page.relevance,
                        depth: page.depth as i32,
                        content_hash: &page.content_hash,
                        status,
                        first_seen_at,
                        last_seen_at: now,
                    };
                    pages::upsert(&self.db_pool, &row).await?;
                    seen.insert(page.url.clone());

                    if !site_meta_updated && page.depth == 0 && page.url == site.url {
                        if let Err(e) = sites::update_meta(
                            &self.db_pool,
                            site.id,
                            page.title.as_deref(),
                            page.description.as_deref(),
                        )
                        .await
                        {
                            warn!(site_id = site.id, error = ?e, "failed to update site metadata");
                        }
                        site_meta_updated = true;
                    }
                }
                CrawlEvent::Progress(progress) => {
                    counters = progress;
                    if last_flush.elapsed() >= COUNTER_FLUSH_INTERVAL {
                        crawl_jobs::update_counters(
                            &self.db_pool,
                            job.id,
                            counters.found,
                            counters.crawled,
                            changed,
                            counters.skipped,
                        )
                        .await?;
                        last_flush = Instant::now();
                    }
                }
            }
        }

        Ok(ConsumeOutcome {
            changed,
            seen,
            counters,
        })
    }

    /// Regenerate the document when content changed or none exists yet. The
    /// assembler runs at most once per job: a retried attempt that already
    /// produced this job's document skips straight through.
    async fn maybe_assemble(&self, site: &Site, job: &CrawlJob, changed: i32) -> Result<()> {
        let latest = generated_files::latest_for_site(&self.db_pool, site.id).await?;
        if latest.as_ref().is_some_and(|f| f.crawl_job_id == Some(job.id)) {
            debug!(job_id = job.id, "document already generated for this job");
            return Ok(());
        }
        if changed == 0 && latest.is_some() {
            debug!(job_id = job.id, "no content changes, keeping current document");
            return Ok(());
        }

        // Re-read the site row: the crawl refreshed its title/description.
        let site = sites::get(&self.db_pool, site.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("site {} disappeared before assembly", site.id))?;

        let current = pages::for_job(&self.db_pool, job.id).await?;
        let content = self.assembler.summarize(&site, &current).await?;
        let content_hash = changes::sha256_hex(&content);

        let file =
            generated_files::insert(&self.db_pool, site.id, job.id, &content, &content_hash).await?;
        info!(
            site_id = site.id,
            job_id = job.id,
            file_id = file.id,
            assembler = self.assembler.name(),
            bytes = content.len(),
            "document generated"
        );

        Ok(())
    }

    async fn load_prior_pages(
        &self,
        site_id: i64,
        before_job_id: i64,
    ) -> Result<HashMap<String, Page>> {
        let Some(prior_job_id) =
            crawl_jobs::latest_completed_before(&self.db_pool, site_id, before_job_id).await?
        else {
            return Ok(HashMap::new());
        };

        let rows = pages::for_job(&self.db_pool, prior_job_id).await?;
        Ok(rows
            .into_iter()
            .filter(|p| p.status != crate::data::models::PageStatus::Removed)
            .map(|p| (p.url.clone(), p))
            .collect())
    }
}

/// Renew the task lease every 10 seconds while the crawl runs, and cancel the
/// crawl when the lease is lost or the site disappears.
async fn heartbeat_loop(
    db_pool: PgPool,
    task_id: i64,
    worker_id: String,
    lease: Duration,
    site_id: i64,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = time::sleep(HEARTBEAT_INTERVAL) => {
                match tasks::heartbeat(&db_pool, task_id, &worker_id, lease).await {
                    Ok(()) => trace!(task_id, "lease renewed"),
                    Err(QueueError::NotOwner { .. }) => {
                        warn!(task_id, "lease no longer owned, cancelling crawl");
                        cancel.cancel();
                        return;
                    }
                    Err(e) => warn!(task_id, error = ?e, "heartbeat failed"),
                }

                match sites::exists(&db_pool, site_id).await {
                    Ok(true) => {}
                    Ok(false) => {
                        info!(task_id, site_id, "site deleted mid-crawl, cancelling");
                        cancel.cancel();
                        return;
                    }
                    Err(e) => warn!(site_id, error = ?e, "site existence check failed"),
                }
            }
        }
    }
}
