//! REST endpoints for site registration, crawl control, documents and
//! schedules.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::header,
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::trace;
use url::Url;

use crate::crawler::urls;
use crate::data::models::{CrawlJob, CrawlTask, Schedule, Site, TaskPriority};
use crate::data::{crawl_jobs, generated_files, schedules, sites, tasks};
use crate::state::AppState;
use crate::web::error::{ApiError, db_error};
use crate::web::stream;
use crate::worker::scheduler::{cron_next, validate_schedule};

/// Creates the API router.
pub fn create_router(state: AppState) -> Router {
    let api_router = Router::new()
        .route("/health", get(health))
        .route("/sites", post(create_site))
        .route("/sites/{id}", delete(delete_site))
        .route("/sites/{id}/crawl", post(start_crawl))
        .route("/sites/{id}/crawl/{job_id}", get(get_job))
        .route("/sites/{id}/llms-txt", get(get_llms_txt))
        .route("/sites/{id}/schedule", put(put_schedule))
        .layer(TimeoutLayer::new(Duration::from_secs(10)))
        .with_state(state.clone());

    // The event stream outlives any sane request timeout, so it lives on an
    // un-timed sibling router.
    let stream_router = Router::new()
        .route("/sites/{id}/crawl/{job_id}/stream", get(stream::crawl_stream))
        .with_state(state);

    Router::new().merge(api_router).merge(stream_router).layer((
        TraceLayer::new_for_http(),
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    ))
}

/// Health check endpoint
async fn health(State(state): State<AppState>) -> Json<Value> {
    trace!("health check requested");
    let mut services = BTreeMap::new();
    for (name, status) in state.service_statuses.all() {
        services.insert(name, status);
    }
    Json(json!({
        "status": "healthy",
        "services": services,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreateSiteRequest {
    pub url: String,
    pub max_depth: Option<i32>,
    pub max_pages: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CrawlRequest {
    pub max_depth: Option<i32>,
    pub max_pages: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct CrawlStartedResponse {
    pub site: Site,
    pub job: CrawlJob,
    pub task_id: i64,
}

/// Parse and validate a submitted site URL into its normalized form plus
/// registrable domain.
fn validate_site_url(raw: &str) -> Result<(Url, String), ApiError> {
    let parsed = Url::parse(raw.trim())
        .map_err(|e| ApiError::invalid_url(format!("invalid URL '{raw}': {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ApiError::invalid_url(format!(
            "unsupported scheme '{}': only http and https are crawlable",
            parsed.scheme()
        )));
    }
    let normalized = urls::normalize(&parsed);
    let host = normalized
        .host_str()
        .ok_or_else(|| ApiError::invalid_url(format!("URL '{raw}' has no host")))?;
    let domain = urls::registrable_domain(host).to_owned();
    Ok((normalized, domain))
}

/// Create a job + queued task pair for a site.
async fn enqueue_crawl(
    state: &AppState,
    site_id: i64,
    max_depth: Option<i32>,
    max_pages: Option<i32>,
) -> Result<(CrawlJob, CrawlTask), ApiError> {
    let max_depth = max_depth.unwrap_or(state.config.max_crawl_depth).clamp(1, 5);
    let max_pages = max_pages
        .unwrap_or(state.config.max_crawl_pages)
        .clamp(50, 500);

    let job = crawl_jobs::create(&state.db_pool, site_id, max_pages, max_depth)
        .await
        .map_err(|e| db_error("Crawl job creation", e))?;

    // User-initiated crawls outrank scheduled ones in the queue.
    let enqueued = tasks::enqueue(
        &state.db_pool,
        job.id,
        TaskPriority::High,
        state.config.task_max_attempts,
        None,
    )
    .await
    .map_err(|e| db_error("Task enqueue", e.into()))?;

    let task = tasks::get(&state.db_pool, enqueued.task_id())
        .await
        .map_err(|e| db_error("Task lookup", e.into()))?
        .ok_or_else(|| ApiError::internal_error("enqueued task vanished"))?;

    Ok((job, task))
}

/// `POST /sites` — register a site and enqueue its initial crawl.
async fn create_site(
    State(state): State<AppState>,
    Json(request): Json<CreateSiteRequest>,
) -> Result<Json<CrawlStartedResponse>, ApiError> {
    let (normalized, domain) = validate_site_url(&request.url)?;

    let site = sites::create_or_get(&state.db_pool, normalized.as_str(), &domain)
        .await
        .map_err(|e| db_error("Site registration", e))?;

    let (job, task) = enqueue_crawl(&state, site.id, request.max_depth, request.max_pages).await?;

    Ok(Json(CrawlStartedResponse {
        site,
        job,
        task_id: task.id,
    }))
}

/// `DELETE /sites/{id}` — remove a site and everything it owns. A running
/// crawl notices the deletion and cancels itself.
async fn delete_site(
    State(state): State<AppState>,
    Path(site_id): Path<i64>,
) -> Result<axum::http::StatusCode, ApiError> {
    let deleted = sites::delete(&state.db_pool, site_id)
        .await
        .map_err(|e| db_error("Site deletion", e))?;
    if !deleted {
        return Err(ApiError::not_found("Site not found"));
    }
    Ok(axum::http::StatusCode::NO_CONTENT)
}

/// `POST /sites/{id}/crawl` — enqueue a new crawl with optional limit
/// overrides.
async fn start_crawl(
    State(state): State<AppState>,
    Path(site_id): Path<i64>,
    body: Option<Json<CrawlRequest>>,
) -> Result<Json<CrawlStartedResponse>, ApiError> {
    let site = sites::get(&state.db_pool, site_id)
        .await
        .map_err(|e| db_error("Site lookup", e))?
        .ok_or_else(|| ApiError::not_found("Site not found"))?;

    let request = body.map(|Json(r)| r).unwrap_or_default();
    let (job, task) = enqueue_crawl(&state, site.id, request.max_depth, request.max_pages).await?;

    Ok(Json(CrawlStartedResponse {
        site,
        job,
        task_id: task.id,
    }))
}

/// `GET /sites/{id}/crawl/{job_id}` — job snapshot.
async fn get_job(
    State(state): State<AppState>,
    Path((site_id, job_id)): Path<(i64, i64)>,
) -> Result<Json<CrawlJob>, ApiError> {
    let job = crawl_jobs::get_for_site(&state.db_pool, site_id, job_id)
        .await
        .map_err(|e| db_error("Crawl job lookup", e))?
        .ok_or_else(|| ApiError::not_found("Crawl job not found"))?;
    Ok(Json(job))
}

/// `GET /sites/{id}/llms-txt` — the current generated document.
async fn get_llms_txt(
    State(state): State<AppState>,
    Path(site_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    if sites::get(&state.db_pool, site_id)
        .await
        .map_err(|e| db_error("Site lookup", e))?
        .is_none()
    {
        return Err(ApiError::not_found("Site not found"));
    }

    let file = generated_files::latest_for_site(&state.db_pool, site_id)
        .await
        .map_err(|e| db_error("Document lookup", e))?
        .ok_or_else(|| ApiError::not_found("No document generated yet"))?;

    Ok((
        [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
        file.content,
    ))
}

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub cron_expression: String,
    pub timezone: Option<String>,
    pub is_active: Option<bool>,
}

/// `PUT /sites/{id}/schedule` — upsert the site's recurring crawl.
async fn put_schedule(
    State(state): State<AppState>,
    Path(site_id): Path<i64>,
    Json(request): Json<ScheduleRequest>,
) -> Result<Json<Schedule>, ApiError> {
    if sites::get(&state.db_pool, site_id)
        .await
        .map_err(|e| db_error("Site lookup", e))?
        .is_none()
    {
        return Err(ApiError::not_found("Site not found"));
    }

    let timezone = request.timezone.unwrap_or_else(|| "UTC".to_string());
    let is_active = request.is_active.unwrap_or(true);

    validate_schedule(&request.cron_expression, &timezone)
        .map_err(|e| ApiError::invalid_cron(e.to_string()))?;
    let next_run_at = cron_next(&request.cron_expression, &timezone, Utc::now())
        .map_err(|e| ApiError::invalid_cron(e.to_string()))?;

    let schedule = schedules::upsert(
        &state.db_pool,
        site_id,
        &request.cron_expression,
        &timezone,
        is_active,
        next_run_at,
    )
    .await
    .map_err(|e| db_error("Schedule upsert", e))?;

    Ok(Json(schedule))
}
