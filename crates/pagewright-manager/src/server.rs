//! Manager HTTP surface.
//!
//! ```text
//! POST /jobs                 → Job    201 | 409 | 422 | 500
//! GET  /jobs/:job_id         → Job    200 | 404
//! POST /jobs/:job_id/status  → Job    200 | 404 | 409
//! POST /jobs/:job_id/result  → Job    200 | 404 | 409
//! GET  /health                        200
//! ```
//!
//! The status/result routes are the worker callback surface; both refuse
//! to touch terminal records (409).

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use tower_http::trace::TraceLayer;

use pagewright_core::api::{ApiError, ApiResult};
use pagewright_core::id::JobId;
use pagewright_core::job::{Job, JobRequest, StatusUpdate, WorkerReport};

use crate::service::JobService;

/// Shared state for manager request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The job service.
    pub service: Arc<JobService>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

fn parse_job_id(raw: &str) -> ApiResult<JobId> {
    JobId::new(raw).map_err(ApiError::from)
}

async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<JobRequest>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    let job = state.service.create_job(request).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Job>> {
    let job_id = parse_job_id(&job_id)?;
    let job = state.service.get_job(&job_id).await?;
    Ok(Json(job))
}

async fn update_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Json(update): Json<StatusUpdate>,
) -> ApiResult<Json<Job>> {
    let job_id = parse_job_id(&job_id)?;
    let job = state.service.on_status(&job_id, update).await?;
    Ok(Json(job))
}

async fn post_result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Json(report): Json<WorkerReport>,
) -> ApiResult<Json<Job>> {
    let job_id = parse_job_id(&job_id)?;
    let job = state.service.on_result(&job_id, report).await?;
    Ok(Json(job))
}

/// Creates the manager router with all routes and middleware.
pub fn create_router(service: Arc<JobService>) -> Router {
    let state = AppState { service };
    Router::new()
        .route("/health", get(health))
        .route("/jobs", post(create_job))
        .route("/jobs/:job_id", get(get_job))
        .route("/jobs/:job_id/status", post(update_status))
        .route("/jobs/:job_id/result", post(post_result))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
