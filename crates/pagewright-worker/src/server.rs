//! Worker control surface.
//!
//! ```text
//! GET  /health   200
//! GET  /status   200  {state, current_step, executor_running, error?}
//! POST /kill     200 | 409
//! ```
//!
//! `/kill` hard-terminates the code generator; the pipeline then reports
//! `Failed` to the manager through its normal path.

use std::sync::{Arc, Mutex};

use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use tower_http::trace::TraceLayer;

use pagewright_core::api::{ApiError, ApiResult};

use crate::executor::Executor;

/// Coarse worker lifecycle state, exposed on `/status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Waiting to start.
    Idle,
    /// Pipeline in progress.
    Working,
    /// Pipeline finished successfully.
    Completed,
    /// Pipeline failed or was cancelled.
    Failed,
}

#[derive(Debug, Clone, Serialize)]
struct StatusSnapshot {
    state: WorkerState,
    current_step: String,
    executor_running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Shared progress board written by the pipeline, read by `/status`.
#[derive(Debug)]
pub struct StatusBoard {
    inner: Mutex<(WorkerState, String, Option<String>)>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self {
            inner: Mutex::new((WorkerState::Idle, "waiting".to_string(), None)),
        }
    }
}

impl StatusBoard {
    /// Creates a board in the idle state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the current pipeline step.
    pub fn update(&self, state: WorkerState, step: impl Into<String>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.0 = state;
            inner.1 = step.into();
        }
    }

    /// Records a failure message.
    pub fn set_error(&self, message: impl Into<String>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.0 = WorkerState::Failed;
            inner.2 = Some(message.into());
        }
    }

    fn snapshot(&self, executor_running: bool) -> StatusSnapshot {
        let (state, step, error) = self
            .inner
            .lock()
            .map(|inner| inner.clone())
            .unwrap_or((WorkerState::Failed, "poisoned".to_string(), None));
        StatusSnapshot {
            state,
            current_step: step,
            executor_running,
            error,
        }
    }
}

/// Shared state for worker control handlers.
#[derive(Clone)]
pub struct AppState {
    executor: Arc<Executor>,
    status: Arc<StatusBoard>,
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

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.status.snapshot(state.executor.is_running()))
}

async fn kill(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    state.executor.kill().map_err(ApiError::from)?;
    state.status.set_error("execution cancelled by manager");
    Ok(Json(serde_json::json!({
        "message": "code generator terminated"
    })))
}

/// Creates the worker control router.
pub fn create_router(executor: Arc<Executor>, status_board: Arc<StatusBoard>) -> Router {
    let state = AppState {
        executor,
        status: status_board,
    };
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/kill", post(kill))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
