//! # Status API
//!
//! JSON handlers for submission and read-only job inspection. Downstream
//! pipeline errors never surface here: after admission the POST handler has
//! returned, and later failures are only visible via `GET /jobs/{id}`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use pagesmith_core::controller::AdmitError;
use pagesmith_core::job::{Brief, JobStats, JobStatus};
use pagesmith_core::{JobIndex, Metrics, PipelineController};

use crate::rate_limit::RateLimiter;

/// Application state shared across handlers.
pub struct AppState {
    pub index: Arc<JobIndex>,
    pub controller: Arc<PipelineController>,
    pub metrics: Arc<Metrics>,
    pub limiter: RateLimiter,
}

pub type SharedState = Arc<AppState>;

// === API Types ===

/// Body of `POST /jobs`. Fields are optional so validation errors are ours
/// (400 with a reason) rather than the extractor's.
#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default)]
    pub tone: Option<String>,
    #[serde(default)]
    pub job_id: Option<String>,
}

#[derive(Serialize)]
struct SubmitJobResponse {
    job_id: String,
    status: &'static str,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
pub struct JobsOverview {
    stats: JobStats,
    timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct TaskProjection {
    task_id: String,
    job_id: String,
    status: JobStatus,
    created_at: DateTime<Utc>,
    progress: u8,
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    timestamp: DateTime<Utc>,
    version: &'static str,
    jobs: JobStats,
}

// === Handlers ===

/// `POST /jobs` - validate, throttle, admit, dispatch research.
pub async fn submit_job(
    State(state): State<SharedState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<SubmitJobRequest>,
) -> Response {
    let brief = Brief {
        product: req.product.unwrap_or_default(),
        audience: req.audience.unwrap_or_default(),
        tone: req.tone,
    };
    if let Err(reason) = brief.validate() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse { error: reason }),
        )
            .into_response();
    }

    // Duplicate ids are rejected ahead of the throttle so a duplicate is
    // reported as such even inside the rate window. A record whose first
    // dispatch never succeeded is not a duplicate - the retried POST is
    // what resumes it. Admission re-checks under the index lock; this is
    // just the fast path.
    if let Some(id) = &req.job_id {
        if state.index.lookup(id).is_some() && !state.index.admission_pending(id) {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: format!("job '{id}' already exists"),
                }),
            )
                .into_response();
        }
    }

    let ip = addr.ip();
    if !state.limiter.allow(ip) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [(
                header::RETRY_AFTER,
                state.limiter.retry_after_secs().to_string(),
            )],
            Json(ErrorResponse {
                error: "rate limit exceeded".to_string(),
            }),
        )
            .into_response();
    }

    let job_id = req
        .job_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    match state.controller.admit(&job_id, brief).await {
        Ok(()) => {
            state.limiter.record(ip);
            (
                StatusCode::CREATED,
                Json(SubmitJobResponse {
                    job_id,
                    status: "queued",
                }),
            )
                .into_response()
        }
        Err(AdmitError::Duplicate(id)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: format!("job '{id}' already exists"),
            }),
        )
            .into_response(),
        Err(AdmitError::Dispatch(e)) => {
            error!(job_id = %job_id, error = %e, "admission dispatch failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "failed to dispatch job".to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// `GET /jobs/{id}`
pub async fn get_job(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Response {
    match state.index.lookup(&id) {
        Some(job) => Json(job).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("job '{id}' not found"),
            }),
        )
            .into_response(),
    }
}

/// `GET /jobs` - aggregate stats.
pub async fn list_jobs(State(state): State<SharedState>) -> Json<JobsOverview> {
    Json(JobsOverview {
        stats: state.index.stats(),
        timestamp: Utc::now(),
    })
}

/// `GET /tasks` - per-job task projections.
pub async fn list_tasks(State(state): State<SharedState>) -> Json<Vec<TaskProjection>> {
    let tasks: Vec<TaskProjection> = state
        .index
        .snapshot()
        .into_iter()
        .map(|job| TaskProjection {
            task_id: job.id.clone(),
            progress: job.progress(),
            job_id: job.id,
            status: job.status,
            created_at: job.started_at,
        })
        .collect();
    Json(tasks)
}

/// `GET /health`
pub async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION"),
        jobs: state.index.stats(),
    })
}

/// `GET /metrics` - plain-text counter exposition.
pub async fn metrics_text(State(state): State<SharedState>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.metrics.snapshot().render(),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagesmith_core::store::{BlobStore, PipelineDb, QueueClient};
    use std::time::Duration;

    fn state() -> SharedState {
        let db = PipelineDb::open_in_memory().unwrap();
        let index = Arc::new(JobIndex::new());
        let metrics = Arc::new(Metrics::new());
        let controller = Arc::new(PipelineController::new(
            Arc::clone(&index),
            BlobStore::new(db.clone()),
            QueueClient::new(db, Duration::from_secs(300)),
            Arc::clone(&metrics),
            true,
        ));
        Arc::new(AppState {
            index,
            controller,
            metrics,
            limiter: RateLimiter::new(Duration::from_secs(60)),
        })
    }

    fn addr(last: u8) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, last], 51234))
    }

    fn request(body: &str) -> SubmitJobRequest {
        serde_json::from_str(body).unwrap()
    }

    #[tokio::test]
    async fn test_post_without_product_is_rejected() {
        let state = state();
        let response = submit_job(
            State(Arc::clone(&state)),
            ConnectInfo(addr(1)),
            Json(request(r#"{"audience":"Developers"}"#)),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        // No state change
        assert_eq!(state.index.stats().total, 0);
    }

    #[tokio::test]
    async fn test_successful_post_returns_created() {
        let state = state();
        let response = submit_job(
            State(Arc::clone(&state)),
            ConnectInfo(addr(1)),
            Json(request(
                r#"{"product":"Acme Widget","audience":"Developers","tone":"technical"}"#,
            )),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(state.index.stats().in_progress, 1);
    }

    #[tokio::test]
    async fn test_second_post_from_same_ip_is_throttled() {
        let state = state();
        let body = r#"{"product":"Acme Widget","audience":"Developers"}"#;

        let first = submit_job(
            State(Arc::clone(&state)),
            ConnectInfo(addr(1)),
            Json(request(body)),
        )
        .await;
        assert_eq!(first.status(), StatusCode::CREATED);

        let second = submit_job(
            State(Arc::clone(&state)),
            ConnectInfo(addr(1)),
            Json(request(body)),
        )
        .await;
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            second
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
            Some("60")
        );
        // The index still holds exactly the first job
        assert_eq!(state.index.stats().total, 1);
    }

    #[tokio::test]
    async fn test_duplicate_job_id_returns_server_error() {
        let state = state();
        let body = r#"{"job_id":"J2","product":"Acme Widget","audience":"Developers"}"#;

        let first = submit_job(
            State(Arc::clone(&state)),
            ConnectInfo(addr(1)),
            Json(request(body)),
        )
        .await;
        assert_eq!(first.status(), StatusCode::CREATED);

        // A duplicate reads as a duplicate even inside the rate window
        let second = submit_job(
            State(Arc::clone(&state)),
            ConnectInfo(addr(1)),
            Json(request(body)),
        )
        .await;
        assert_eq!(second.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(state.index.stats().total, 1);
    }

    #[tokio::test]
    async fn test_retried_post_resumes_stalled_admission() {
        let state = state();
        // Record exists but research was never enqueued (admission died
        // between create and dispatch)
        state
            .index
            .create(
                "J3",
                Brief {
                    product: "Acme Widget".to_string(),
                    audience: "Developers".to_string(),
                    tone: None,
                },
            )
            .unwrap();

        let response = submit_job(
            State(Arc::clone(&state)),
            ConnectInfo(addr(1)),
            Json(request(
                r#"{"job_id":"J3","product":"Acme Widget","audience":"Developers"}"#,
            )),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(state.index.stats().in_progress, 1);
    }

    #[tokio::test]
    async fn test_get_unknown_job_is_not_found() {
        let state = state();
        let response = get_job(State(state), Path("ghost".to_string())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_metrics_exposition_is_text() {
        let state = state();
        let response = metrics_text(State(state)).await;
        assert_eq!(
            response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            Some("text/plain; charset=utf-8")
        );
    }
}
