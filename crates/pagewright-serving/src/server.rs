//! Serving runner HTTP surface.
//!
//! ```text
//! POST   /sites/:fqdn/artifacts    {site_id, version}          200
//! POST   /sites/:fqdn/activate     {version, fencing_token?}   200|404|412
//! POST   /sites/:fqdn/preview      {version, fencing_token?}   200|404|412
//! POST   /sites/:fqdn/aliases      {aliases: [string]}         200
//! POST   /sites/:fqdn/enable                                   200
//! POST   /sites/:fqdn/disable                                  200
//! DELETE /sites/:fqdn                                          200
//! POST   /maintenance/enable | /maintenance/disable            200
//! GET    /health                                               200
//! ```

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use pagewright_core::api::{ApiError, ApiResult};
use pagewright_core::id::{BuildId, SiteId};

use crate::deploy::DeployManager;
use crate::edge::EdgeManager;
use crate::layout::Channel;

/// Shared state for serving request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Artifact deployment and activation.
    pub deploy: Arc<DeployManager>,
    /// Edge config management.
    pub edge: Arc<EdgeManager>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    maintenance: bool,
}

#[derive(Debug, Deserialize)]
struct DeployRequest {
    site_id: String,
    version: String,
}

#[derive(Debug, Deserialize)]
struct ActivateRequest {
    version: String,
    #[serde(default)]
    fencing_token: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct AliasesRequest {
    aliases: Vec<String>,
}

#[derive(Debug, Serialize)]
struct OkResponse {
    message: String,
}

fn ok(message: impl Into<String>) -> Json<OkResponse> {
    Json(OkResponse {
        message: message.into(),
    })
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        maintenance: state.edge.is_maintenance(),
    })
}

async fn deploy_artifact(
    State(state): State<AppState>,
    Path(fqdn): Path<String>,
    Json(request): Json<DeployRequest>,
) -> ApiResult<Json<OkResponse>> {
    let site_id = SiteId::new(request.site_id).map_err(ApiError::from)?;
    let version = BuildId::new(request.version).map_err(ApiError::from)?;
    state.deploy.deploy(&fqdn, &site_id, &version).await?;
    Ok(ok(format!("version {version} deployed to {fqdn}")))
}

async fn activate_channel(
    state: &AppState,
    fqdn: &str,
    request: ActivateRequest,
    channel: Channel,
) -> ApiResult<Json<OkResponse>> {
    state
        .deploy
        .activate(fqdn, &request.version, channel, request.fencing_token)?;

    // Make sure the edge knows about the site (first activation).
    let meta = state.edge.load_meta(fqdn);
    state.edge.apply_site(fqdn, &meta).await?;
    Ok(ok(format!(
        "version {} active on {channel} for {fqdn}",
        request.version
    )))
}

async fn activate_public(
    State(state): State<AppState>,
    Path(fqdn): Path<String>,
    Json(request): Json<ActivateRequest>,
) -> ApiResult<Json<OkResponse>> {
    activate_channel(&state, &fqdn, request, Channel::Public).await
}

async fn activate_preview(
    State(state): State<AppState>,
    Path(fqdn): Path<String>,
    Json(request): Json<ActivateRequest>,
) -> ApiResult<Json<OkResponse>> {
    activate_channel(&state, &fqdn, request, Channel::Preview).await
}

async fn update_aliases(
    State(state): State<AppState>,
    Path(fqdn): Path<String>,
    Json(request): Json<AliasesRequest>,
) -> ApiResult<Json<OkResponse>> {
    let mut meta = state.edge.load_meta(&fqdn);
    meta.aliases = request.aliases;
    state.edge.apply_site(&fqdn, &meta).await?;
    Ok(ok(format!("aliases updated for {fqdn}")))
}

async fn set_enabled(state: &AppState, fqdn: &str, enabled: bool) -> ApiResult<Json<OkResponse>> {
    let mut meta = state.edge.load_meta(fqdn);
    meta.enabled = enabled;
    state.edge.apply_site(fqdn, &meta).await?;
    Ok(ok(format!(
        "site {fqdn} {}",
        if enabled { "enabled" } else { "disabled" }
    )))
}

async fn enable_site(
    State(state): State<AppState>,
    Path(fqdn): Path<String>,
) -> ApiResult<Json<OkResponse>> {
    set_enabled(&state, &fqdn, true).await
}

async fn disable_site(
    State(state): State<AppState>,
    Path(fqdn): Path<String>,
) -> ApiResult<Json<OkResponse>> {
    set_enabled(&state, &fqdn, false).await
}

async fn remove_site(
    State(state): State<AppState>,
    Path(fqdn): Path<String>,
) -> ApiResult<Json<OkResponse>> {
    // Config first (stop serving), then the tree.
    state.edge.remove_site(&fqdn).await?;
    state.deploy.remove_site(&fqdn)?;
    Ok(ok(format!("site {fqdn} removed")))
}

async fn enable_maintenance(State(state): State<AppState>) -> ApiResult<Json<OkResponse>> {
    state.edge.set_maintenance(true).await?;
    Ok(ok("maintenance mode enabled"))
}

async fn disable_maintenance(State(state): State<AppState>) -> ApiResult<Json<OkResponse>> {
    state.edge.set_maintenance(false).await?;
    Ok(ok("maintenance mode disabled"))
}

/// Creates the serving router with all routes and middleware.
pub fn create_router(deploy: Arc<DeployManager>, edge: Arc<EdgeManager>) -> Router {
    let state = AppState { deploy, edge };
    Router::new()
        .route("/health", get(health))
        .route("/sites/:fqdn/artifacts", post(deploy_artifact))
        .route("/sites/:fqdn/activate", post(activate_public))
        .route("/sites/:fqdn/preview", post(activate_preview))
        .route("/sites/:fqdn/aliases", post(update_aliases))
        .route("/sites/:fqdn/enable", post(enable_site))
        .route("/sites/:fqdn/disable", post(disable_site))
        .route("/sites/:fqdn", delete(remove_site))
        .route("/maintenance/enable", post(enable_maintenance))
        .route("/maintenance/disable", post(disable_maintenance))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::SiteLayout;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use pagewright_store::client::StoreClient;
    use tower::ServiceExt;

    struct Fixture {
        app: Router,
        deploy: Arc<DeployManager>,
        _root: tempfile::TempDir,
        _sites: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let root = tempfile::tempdir().expect("root");
        let sites = tempfile::tempdir().expect("sites");
        let layout = SiteLayout::new(root.path());
        let deploy = Arc::new(DeployManager::new(
            layout.clone(),
            StoreClient::new("http://store.invalid"),
            10,
        ));
        let edge = Arc::new(EdgeManager::new(
            layout,
            sites.path(),
            None,
            "/var/www/maintenance",
        ));
        Fixture {
            app: create_router(Arc::clone(&deploy), edge),
            deploy,
            _root: root,
            _sites: sites,
        }
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    fn site_archive() -> Vec<u8> {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("public")).expect("mkdir");
        std::fs::write(dir.path().join("public/index.html"), "<h1>hi</h1>").expect("write");
        pagewright_store::archive::pack(dir.path())
            .expect("pack")
            .to_vec()
    }

    const FQDN: &str = "a.example.com";

    #[tokio::test]
    async fn activation_of_deployed_version_succeeds() {
        let fx = fixture();
        fx.deploy
            .deploy_bytes(FQDN, "V1", &site_archive())
            .expect("deploy");

        let response = fx
            .app
            .oneshot(post_json(
                &format!("/sites/{FQDN}/activate"),
                r#"{"version":"V1","fencing_token":1}"#,
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            fx.deploy.active_version(FQDN, Channel::Public).as_deref(),
            Some("V1")
        );
    }

    #[tokio::test]
    async fn stale_activation_returns_412() {
        let fx = fixture();
        fx.deploy
            .deploy_bytes(FQDN, "V1", &site_archive())
            .expect("deploy");
        fx.deploy
            .deploy_bytes(FQDN, "V2", &site_archive())
            .expect("deploy");
        fx.deploy
            .activate(FQDN, "V2", Channel::Public, Some(2))
            .expect("activate v2");

        let response = fx
            .app
            .oneshot(post_json(
                &format!("/sites/{FQDN}/activate"),
                r#"{"version":"V1","fencing_token":1}"#,
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
    }

    #[tokio::test]
    async fn activation_of_unknown_version_returns_404() {
        let fx = fixture();
        let response = fx
            .app
            .oneshot(post_json(
                &format!("/sites/{FQDN}/activate"),
                r#"{"version":"ghost"}"#,
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn preview_route_drives_the_preview_channel() {
        let fx = fixture();
        fx.deploy
            .deploy_bytes(FQDN, "V1", &site_archive())
            .expect("deploy");

        let response = fx
            .app
            .oneshot(post_json(
                &format!("/sites/{FQDN}/preview"),
                r#"{"version":"V1","fencing_token":1}"#,
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            fx.deploy.active_version(FQDN, Channel::Preview).as_deref(),
            Some("V1")
        );
        assert!(fx.deploy.active_version(FQDN, Channel::Public).is_none());
    }

    #[tokio::test]
    async fn alias_update_and_maintenance_round_trip() {
        let fx = fixture();

        let response = fx
            .app
            .clone()
            .oneshot(post_json(
                &format!("/sites/{FQDN}/aliases"),
                r#"{"aliases":["b.example.com","c.example.com"]}"#,
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let response = fx
            .app
            .clone()
            .oneshot(post_json("/maintenance/enable", "{}"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let health = fx
            .app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        let body = axum::body::to_bytes(health.into_body(), 4096)
            .await
            .expect("body");
        let health: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(health["maintenance"], true);
    }

    #[tokio::test]
    async fn delete_removes_the_site_tree() {
        let fx = fixture();
        fx.deploy
            .deploy_bytes(FQDN, "V1", &site_archive())
            .expect("deploy");

        let response = fx
            .app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/sites/{FQDN}"))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!fx.deploy.layout().site_dir(FQDN).exists());
    }
}
