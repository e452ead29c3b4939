//! Artifact store HTTP surface.
//!
//! ```text
//! PUT  /sites/:site_id/artifacts/:build_id    (archive bytes)   201|409|500
//! GET  /sites/:site_id/artifacts/:build_id    (archive bytes)   200|404
//! POST /sites/:site_id/logs                   (log entry)       201
//! GET  /sites/:site_id/versions               → [LogEntry]      200
//! GET  /health                                                  200
//! ```

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, put};
use axum::Router;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use pagewright_core::api::{ApiError, ApiResult};
use pagewright_core::id::{BuildId, SiteId};

use crate::backend::{ArtifactStore, LogEntry, VersionAction};

/// Largest accepted artifact upload.
const MAX_ARTIFACT_BYTES: usize = 256 * 1024 * 1024;

/// Shared state for store request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn ArtifactStore>,
}

/// Health check response.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
}

/// Body of `POST /sites/:site_id/logs`; the timestamp is stamped by the
/// store when the client omits it.
#[derive(Debug, Deserialize)]
struct LogEntryRequest {
    build_id: String,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    action: VersionAction,
    status: String,
    #[serde(default)]
    metadata: serde_json::Map<String, serde_json::Value>,
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

fn parse_key(site_id: &str, build_id: &str) -> ApiResult<(SiteId, BuildId)> {
    let site_id = SiteId::new(site_id).map_err(ApiError::from)?;
    let build_id = BuildId::new(build_id).map_err(ApiError::from)?;
    Ok((site_id, build_id))
}

async fn put_artifact(
    State(state): State<AppState>,
    Path((site_id, build_id)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let (site_id, build_id) = parse_key(&site_id, &build_id)?;
    state
        .store
        .store_artifact(&site_id, &build_id, body)
        .await?;
    tracing::info!(site_id = %site_id, build_id = %build_id, "artifact stored");
    Ok(StatusCode::CREATED)
}

async fn get_artifact(
    State(state): State<AppState>,
    Path((site_id, build_id)): Path<(String, String)>,
) -> ApiResult<Bytes> {
    let (site_id, build_id) = parse_key(&site_id, &build_id)?;
    let data = state.store.fetch_artifact(&site_id, &build_id).await?;
    Ok(data)
}

async fn post_log(
    State(state): State<AppState>,
    Path(site_id): Path<String>,
    Json(request): Json<LogEntryRequest>,
) -> ApiResult<StatusCode> {
    let site_id = SiteId::new(site_id).map_err(ApiError::from)?;
    let entry = LogEntry {
        build_id: request.build_id,
        timestamp: request.timestamp.unwrap_or_else(Utc::now),
        action: request.action,
        status: request.status,
        metadata: request.metadata,
    };
    state.store.append_log(&site_id, entry).await?;
    Ok(StatusCode::CREATED)
}

async fn list_versions(
    State(state): State<AppState>,
    Path(site_id): Path<String>,
) -> ApiResult<Json<Vec<LogEntry>>> {
    let site_id = SiteId::new(site_id).map_err(ApiError::from)?;
    let versions = state.store.list_versions(&site_id).await?;
    Ok(Json(versions))
}

/// Creates the store router with all routes and middleware.
pub fn create_router(store: Arc<dyn ArtifactStore>) -> Router {
    let state = AppState { store };
    Router::new()
        .route("/health", get(health))
        .route(
            "/sites/:site_id/artifacts/:build_id",
            put(put_artifact).get(get_artifact),
        )
        .route("/sites/:site_id/logs", axum::routing::post(post_log))
        .route("/sites/:site_id/versions", get(list_versions))
        .layer(DefaultBodyLimit::max(MAX_ARTIFACT_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryArtifactStore;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn router() -> Router {
        create_router(Arc::new(MemoryArtifactStore::new()))
    }

    #[tokio::test]
    async fn put_then_get_artifact() {
        let app = router();

        let put = Request::builder()
            .method("PUT")
            .uri("/sites/S/artifacts/V1")
            .body(Body::from("archive bytes"))
            .expect("request");
        let response = app.clone().oneshot(put).await.expect("response");
        assert_eq!(response.status(), StatusCode::CREATED);

        let get = Request::builder()
            .uri("/sites/S/artifacts/V1")
            .body(Body::empty())
            .expect("request");
        let response = app.oneshot(get).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .expect("body");
        assert_eq!(&body[..], b"archive bytes");
    }

    #[tokio::test]
    async fn duplicate_put_conflicts() {
        let app = router();
        for expected in [StatusCode::CREATED, StatusCode::CONFLICT] {
            let put = Request::builder()
                .method("PUT")
                .uri("/sites/S/artifacts/V1")
                .body(Body::from("archive"))
                .expect("request");
            let response = app.clone().oneshot(put).await.expect("response");
            assert_eq!(response.status(), expected);
        }
    }

    #[tokio::test]
    async fn missing_artifact_is_404() {
        let response = router()
            .oneshot(
                Request::builder()
                    .uri("/sites/S/artifacts/missing")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn log_then_list_versions() {
        let app = router();

        let post = Request::builder()
            .method("POST")
            .uri("/sites/S/logs")
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"build_id":"V1","action":"build","status":"completed"}"#,
            ))
            .expect("request");
        let response = app.clone().oneshot(post).await.expect("response");
        assert_eq!(response.status(), StatusCode::CREATED);

        let list = Request::builder()
            .uri("/sites/S/versions")
            .body(Body::empty())
            .expect("request");
        let response = app.oneshot(list).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 4096)
            .await
            .expect("body");
        let versions: Vec<LogEntry> = serde_json::from_slice(&body).expect("parse");
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].build_id, "V1");
    }

    #[tokio::test]
    async fn health_is_open() {
        let response = router()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }
}
