// crates/server/src/routes/jobs.rs
//! Job routes.
//!
//! - POST /execute - Submit a pipeline job
//! - GET /status/{id} - Snapshot of one job
//! - GET /jobs - Recent jobs
//! - POST /cancel/{id} - Cancel a running job
//! - GET /jobs/stream - SSE stream of job events

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use reelrun_server_jobs::{Job, JobId, JobParams, JobStatus};
use serde::{Deserialize, Serialize};

use crate::auth::RequireAuth;
use crate::error::ApiResult;
use crate::state::AppState;

const DEFAULT_LIST_LIMIT: usize = 20;

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct ExecuteResponse {
    pub success: bool,
    pub job_id: JobId,
    pub message: String,
    pub status_url: String,
}

/// Full job snapshot returned by `/status/{id}`.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct JobStatusResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    pub mode: String,
    pub theme: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub output_path: String,
    /// Most recent output lines, oldest first.
    pub logs: Vec<String>,
    pub videos_generated: usize,
    pub error: Option<String>,
}

impl JobStatusResponse {
    fn from_job(job: Job, log_tail: usize) -> Self {
        Self {
            logs: job.logs.tail(log_tail),
            output_path: job.output_path.display().to_string(),
            job_id: job.id,
            status: job.status,
            progress: job.progress,
            mode: job.mode,
            theme: job.theme,
            started_at: job.started_at,
            completed_at: job.completed_at,
            videos_generated: job.videos_generated,
            error: job.error,
        }
    }
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct JobSummary {
    pub job_id: JobId,
    pub status: JobStatus,
    pub mode: String,
    pub theme: Option<String>,
    pub progress: u8,
    pub started_at: DateTime<Utc>,
    pub videos_generated: usize,
}

impl From<Job> for JobSummary {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            mode: job.mode,
            theme: job.theme,
            progress: job.progress,
            started_at: job.started_at,
            videos_generated: job.videos_generated,
        }
    }
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct JobListResponse {
    pub total: usize,
    pub jobs: Vec<JobSummary>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct CancelResponse {
    pub success: bool,
    pub message: String,
}

/// POST /execute - Submit a pipeline job.
async fn execute(
    _auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Json(params): Json<JobParams>,
) -> ApiResult<Json<ExecuteResponse>> {
    let mode = params.mode.clone();
    let job_id = state.controller.submit(params)?;
    Ok(Json(ExecuteResponse {
        success: true,
        status_url: format!("/status/{job_id}"),
        message: format!("Job started in {mode} mode"),
        job_id,
    }))
}

/// GET /status/{id} - Snapshot of one job.
async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobStatusResponse>> {
    let job = state.controller.status(&id)?;
    let tail = state.controller.config().status_log_tail;
    Ok(Json(JobStatusResponse::from_job(job, tail)))
}

/// GET /jobs - The most recent jobs, most recent last.
async fn list_jobs(
    _auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Json<JobListResponse> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    Json(JobListResponse {
        total: state.controller.total(),
        jobs: state
            .controller
            .list(limit)
            .into_iter()
            .map(JobSummary::from)
            .collect(),
    })
}

/// POST /cancel/{id} - Cancel a running job.
async fn cancel_job(
    _auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<CancelResponse>> {
    let outcome = state.controller.cancel(&id).await?;
    Ok(Json(CancelResponse {
        success: outcome.cancelled,
        message: outcome.message,
    }))
}

/// GET /jobs/stream - SSE stream of job events.
async fn stream_jobs(
    _auth: RequireAuth,
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let sub = state.controller.subscribe();

    let stream = async_stream::stream! {
        let mut sub = sub;
        while let Some(event) = sub.recv().await {
            let json = serde_json::to_string(&event).unwrap_or_default();
            yield Ok(Event::default().event(event.kind()).data(json));
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Build the jobs router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/execute", post(execute))
        .route("/status/{id}", get(job_status))
        .route("/jobs", get(list_jobs))
        .route("/cancel/{id}", post(cancel_job))
        .route("/jobs/stream", get(stream_jobs))
}
