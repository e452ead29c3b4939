//! Intake HTTP façade.
//!
//! ```text
//! POST /sites/:site/builds          {prompt, conversation_id?, source_version?}
//!        → 202 {job} | 200 {question, conversation_id} | 409 | 422
//! GET  /sites/:site/builds/:job_id  → Job    200 | 404
//! POST /sites/:site/deploy          {job_id, preview?}   200 | 404 | 412 | 422
//! POST /sites/:site/aliases         {aliases: [string]}  200
//! GET  /health                      200
//! ```
//!
//! The `:site` segment is the site id on the build routes and the FQDN on
//! the deploy/alias routes (those address the edge, not the record).

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use pagewright_core::api::{ApiError, ApiResult};
use pagewright_core::id::JobId;

use crate::service::{IntakeService, Submission, SubmitOutcome};

/// Shared state for intake request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The intake service.
    pub service: Arc<IntakeService>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct BuildRequest {
    prompt: String,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    source_version: Option<String>,
}

#[derive(Debug, Serialize)]
struct QuestionResponse {
    conversation_id: String,
    question: String,
}

#[derive(Debug, Deserialize)]
struct DeployRequest {
    job_id: String,
    #[serde(default)]
    preview: bool,
}

#[derive(Debug, Deserialize)]
struct AliasesRequest {
    aliases: Vec<String>,
}

#[derive(Debug, Serialize)]
struct OkResponse {
    message: String,
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn submit_build(
    State(state): State<AppState>,
    Path(site_id): Path<String>,
    Json(request): Json<BuildRequest>,
) -> ApiResult<Response> {
    let outcome = state
        .service
        .submit(Submission {
            site_id,
            prompt: request.prompt,
            conversation_id: request.conversation_id,
            source_version: request.source_version,
        })
        .await?;

    Ok(match outcome {
        SubmitOutcome::Job(job) => (StatusCode::ACCEPTED, Json(*job)).into_response(),
        SubmitOutcome::Question {
            conversation_id,
            question,
        } => (
            StatusCode::OK,
            Json(QuestionResponse {
                conversation_id,
                question,
            }),
        )
            .into_response(),
    })
}

async fn get_build(
    State(state): State<AppState>,
    Path((site_id, job_id)): Path<(String, String)>,
) -> ApiResult<Response> {
    let job_id = JobId::new(job_id).map_err(ApiError::from)?;
    let job = state.service.job(&job_id).await?;
    if job.site_id.as_str() != site_id {
        return Err(ApiError::not_found(format!(
            "job {job_id} does not belong to site {site_id}"
        )));
    }
    Ok(Json(job).into_response())
}

async fn deploy(
    State(state): State<AppState>,
    Path(fqdn): Path<String>,
    Json(request): Json<DeployRequest>,
) -> ApiResult<Json<OkResponse>> {
    let job_id = JobId::new(request.job_id).map_err(ApiError::from)?;
    state
        .service
        .deploy_job(&fqdn, &job_id, request.preview)
        .await?;
    Ok(Json(OkResponse {
        message: format!("job {job_id} deployed to {fqdn}"),
    }))
}

async fn update_aliases(
    State(state): State<AppState>,
    Path(fqdn): Path<String>,
    Json(request): Json<AliasesRequest>,
) -> ApiResult<Json<OkResponse>> {
    state.service.update_aliases(&fqdn, &request.aliases).await?;
    Ok(Json(OkResponse {
        message: format!("aliases updated for {fqdn}"),
    }))
}

/// Creates the intake router with all routes and middleware.
pub fn create_router(service: Arc<IntakeService>) -> Router {
    let state = AppState { service };
    Router::new()
        .route("/health", get(health))
        .route("/sites/:site/builds", post(submit_build))
        .route("/sites/:site/builds/:job_id", get(get_build))
        .route("/sites/:site/deploy", post(deploy))
        .route("/sites/:site/aliases", post(update_aliases))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clarify::{ConversationMap, PassthroughClassifier};
    use crate::clients::{ManagerApi, ServingApi};
    use axum::body::Body;
    use axum::http::Request;
    use pagewright_core::id::{BuildId, SiteId};
    use pagewright_core::job::{Job, JobRequest};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tower::ServiceExt;

    async fn spawn_manager() -> (String, oneshot::Sender<()>) {
        let app = Router::new().route(
            "/jobs",
            post(|Json(request): Json<JobRequest>| async move {
                let job = Job::new(
                    SiteId::new(request.site_id).expect("site id"),
                    request.prompt,
                    None,
                    BuildId::new("V1").expect("build id"),
                );
                (StatusCode::CREATED, Json(job))
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
                .expect("serve test app");
        });
        (format!("http://{addr}"), shutdown_tx)
    }

    #[tokio::test]
    async fn build_submission_returns_202_with_the_job() {
        let (manager_url, shutdown) = spawn_manager().await;
        let service = Arc::new(IntakeService::new(
            Arc::new(PassthroughClassifier),
            Arc::new(ConversationMap::new(Duration::from_secs(60))),
            ManagerApi::new(manager_url),
            ServingApi::new("http://serving.invalid"),
        ));
        let app = create_router(service);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sites/S/builds")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"prompt":"add about page"}"#))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .expect("body");
        let job: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(job["site_id"], "S");
        let _ = shutdown.send(());
    }

    #[tokio::test]
    async fn health_is_open() {
        let service = Arc::new(IntakeService::new(
            Arc::new(PassthroughClassifier),
            Arc::new(ConversationMap::new(Duration::from_secs(60))),
            ManagerApi::new("http://manager.invalid"),
            ServingApi::new("http://serving.invalid"),
        ));
        let app = create_router(service);
        let response = app
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
