//! Server-sent crawl progress, replayed from persisted rows.
//!
//! Workers and the API run in separate processes, so the stream reads from
//! storage rather than an in-memory bus: every observer first replays the
//! job's page rows in id order, then follows new rows through a 1s polling
//! cursor until the job reaches a terminal status. Reconnect replay is free
//! because everything is derivable from the rows.

use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use futures::Stream;
use serde::Serialize;
use sqlx::PgPool;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::time::Duration;
use tracing::warn;

use crate::data::models::{CrawlJob, CrawlJobStatus, Page, PageCategory};
use crate::data::{crawl_jobs, pages};
use crate::state::AppState;
use crate::web::error::{ApiError, db_error};

/// Storage poll cadence.
const POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Page rows fetched per poll.
const PAGE_BATCH: i64 = 256;
/// Idle polls before a keepalive frame (≈15s at 1s polls).
const HEARTBEAT_AFTER_POLLS: u32 = 15;

/// Wire frames, discriminated by `type`.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    PageCrawled {
        url: String,
        title: Option<String>,
        description: Option<String>,
        category: PageCategory,
        relevance: f64,
        depth: i32,
    },
    Progress {
        found: i32,
        crawled: i32,
        changed: i32,
        skipped: i32,
        max_pages: i32,
    },
    Completed,
    Failed {
        error: String,
    },
    Heartbeat,
}

impl StreamEvent {
    fn page(page: &Page) -> Self {
        StreamEvent::PageCrawled {
            url: page.url.clone(),
            title: page.title.clone(),
            description: page.description.clone(),
            category: page.category,
            relevance: page.relevance_score,
            depth: page.depth,
        }
    }

    fn progress(job: &CrawlJob) -> Self {
        StreamEvent::Progress {
            found: job.pages_found,
            crawled: job.pages_crawled,
            changed: job.pages_changed,
            skipped: job.pages_skipped,
            max_pages: job.max_pages,
        }
    }
}

/// `GET /sites/{id}/crawl/{job_id}/stream`
pub async fn crawl_stream(
    State(state): State<AppState>,
    Path((site_id, job_id)): Path<(i64, i64)>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let job = crawl_jobs::get_for_site(&state.db_pool, site_id, job_id)
        .await
        .map_err(|e| db_error("Crawl job lookup", e.into()))?
        .ok_or_else(|| ApiError::not_found("Crawl job not found"))?;

    let cursor = StreamCursor::new(state.db_pool.clone(), job.id);
    let stream = futures::stream::unfold(cursor, |mut cursor| async move {
        let event = cursor.next_event().await?;
        Some((Ok::<_, Infallible>(event), cursor))
    });

    Ok(Sse::new(stream))
}

/// Monotonic `pages.id` cursor plus terminal-status detection for one
/// observer.
struct StreamCursor {
    db_pool: PgPool,
    job_id: i64,
    last_page_id: i64,
    last_progress: Option<(i32, i32, i32, i32)>,
    pending: VecDeque<StreamEvent>,
    idle_polls: u32,
    done: bool,
}

impl StreamCursor {
    fn new(db_pool: PgPool, job_id: i64) -> Self {
        Self {
            db_pool,
            job_id,
            last_page_id: 0,
            last_progress: None,
            pending: VecDeque::new(),
            idle_polls: 0,
            done: false,
        }
    }

    /// Produce the next frame, polling storage as needed. `None` closes the
    /// stream.
    async fn next_event(&mut self) -> Option<Event> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(to_sse(&event));
            }
            if self.done {
                return None;
            }

            if let Err(e) = self.poll().await {
                // Transient storage hiccups should not tear the stream down.
                warn!(job_id = self.job_id, error = ?e, "stream poll failed");
            }

            if self.pending.is_empty() {
                self.idle_polls += 1;
                if self.idle_polls >= HEARTBEAT_AFTER_POLLS {
                    self.idle_polls = 0;
                    self.pending.push_back(StreamEvent::Heartbeat);
                    continue;
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            } else {
                self.idle_polls = 0;
            }
        }
    }

    /// One storage poll: new pages (ascending id), a progress frame when the
    /// counters moved, and the terminal frame once the job settles.
    async fn poll(&mut self) -> crate::error::Result<()> {
        let Some(job) = crawl_jobs::get(&self.db_pool, self.job_id).await? else {
            // Site deletion cascaded the job away mid-stream.
            self.pending.push_back(StreamEvent::Failed {
                error: "crawl job deleted".to_string(),
            });
            self.done = true;
            return Ok(());
        };

        // Status is read before the page query: a terminal status therefore
        // implies every page row is already visible to the cursor.
        let status = job.status;

        let new_pages =
            pages::for_job_after(&self.db_pool, self.job_id, self.last_page_id, PAGE_BATCH).await?;
        let drained = (new_pages.len() as i64) < PAGE_BATCH;
        for page in &new_pages {
            self.last_page_id = page.id;
            self.pending.push_back(StreamEvent::page(page));
        }

        let progress = (
            job.pages_found,
            job.pages_crawled,
            job.pages_changed,
            job.pages_skipped,
        );
        if self.last_progress != Some(progress) {
            self.last_progress = Some(progress);
            self.pending.push_back(StreamEvent::progress(&job));
        }

        if status.is_terminal() && drained {
            match status {
                CrawlJobStatus::Failed => self.pending.push_back(StreamEvent::Failed {
                    error: job
                        .error_message
                        .unwrap_or_else(|| "crawl failed".to_string()),
                }),
                _ => self.pending.push_back(StreamEvent::Completed),
            }
            self.done = true;
        }

        Ok(())
    }
}

fn to_sse(event: &StreamEvent) -> Event {
    match serde_json::to_string(event) {
        Ok(json) => Event::default().event("message").data(json),
        Err(e) => {
            warn!(error = %e, "failed to serialize stream event");
            Event::default()
                .event("message")
                .data(r#"{"type":"heartbeat"}"#)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_are_tagged_by_type() {
        let event = StreamEvent::PageCrawled {
            url: "https://example.com/docs".to_string(),
            title: Some("Docs".to_string()),
            description: None,
            category: PageCategory::Documentation,
            relevance: 0.9,
            depth: 1,
        };
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "page_crawled");
        assert_eq!(json["category"], "documentation");
        assert_eq!(json["depth"], 1);
    }

    #[test]
    fn progress_frame_carries_all_counters() {
        let event = StreamEvent::Progress {
            found: 10,
            crawled: 7,
            changed: 3,
            skipped: 1,
            max_pages: 200,
        };
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["found"], 10);
        assert_eq!(json["max_pages"], 200);
    }

    #[test]
    fn terminal_and_heartbeat_frames_serialize() {
        assert_eq!(
            serde_json::to_value(StreamEvent::Completed).unwrap()["type"],
            "completed"
        );
        assert_eq!(
            serde_json::to_value(StreamEvent::Heartbeat).unwrap()["type"],
            "heartbeat"
        );
        let failed = serde_json::to_value(StreamEvent::Failed {
            error: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(failed["type"], "failed");
        assert_eq!(failed["error"], "boom");
    }
}
