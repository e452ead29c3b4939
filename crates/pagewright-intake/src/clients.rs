//! HTTP clients for the manager and the serving runner.
//!
//! Status codes map back onto the shared error taxonomy, so a lock
//! conflict from the manager or a stale-fence refusal from the serving
//! runner surfaces to intake callers with its original meaning.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;

use pagewright_core::error::{Error, Result};
use pagewright_core::id::JobId;
use pagewright_core::job::{Job, JobRequest};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

fn map_status(status: StatusCode, context: &str) -> Error {
    match status {
        StatusCode::CONFLICT => Error::conflict(context.to_string()),
        StatusCode::NOT_FOUND => Error::NotFound(context.to_string()),
        StatusCode::PRECONDITION_FAILED => Error::precondition_failed(context.to_string()),
        StatusCode::UNPROCESSABLE_ENTITY | StatusCode::BAD_REQUEST => {
            Error::InvalidInput(context.to_string())
        }
        s if s.is_server_error() => Error::unavailable(format!("{context}: upstream returned {s}")),
        s => Error::internal(format!("{context}: unexpected status {s}")),
    }
}

fn build_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(DEFAULT_REQUEST_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Client for the manager's job API.
#[derive(Debug, Clone)]
pub struct ManagerApi {
    base_url: String,
    client: reqwest::Client,
}

impl ManagerApi {
    /// Creates a client targeting the manager base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: build_client(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }

    /// Creates a job.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` when the site lock is held, `InvalidInput` for a
    /// refused request, `Unavailable` on transport failure.
    pub async fn create_job(&self, request: &JobRequest) -> Result<Job> {
        let response = self
            .client
            .post(self.url("/jobs"))
            .json(request)
            .send()
            .await
            .map_err(|e| Error::unavailable_with_source("manager unreachable", e))?;

        if response.status().is_success() {
            response.json().await.map_err(|e| Error::Serialization {
                message: format!("invalid job response: {e}"),
            })
        } else {
            let status = response.status();
            let detail = response
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|body| body["message"].as_str().map(str::to_string))
                .unwrap_or_else(|| "create job failed".to_string());
            Err(map_status(status, &detail))
        }
    }

    /// Fetches a job record.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown or expired jobs.
    pub async fn get_job(&self, job_id: &JobId) -> Result<Job> {
        let response = self
            .client
            .get(self.url(&format!("/jobs/{job_id}")))
            .send()
            .await
            .map_err(|e| Error::unavailable_with_source("manager unreachable", e))?;

        if response.status().is_success() {
            response.json().await.map_err(|e| Error::Serialization {
                message: format!("invalid job response: {e}"),
            })
        } else {
            Err(map_status(
                response.status(),
                &format!("get job {job_id}"),
            ))
        }
    }
}

/// Client for the serving runner.
#[derive(Debug, Clone)]
pub struct ServingApi {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct DeployBody<'a> {
    site_id: &'a str,
    version: &'a str,
}

#[derive(Debug, Serialize)]
struct ActivateBody<'a> {
    version: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    fencing_token: Option<u64>,
}

#[derive(Debug, Serialize)]
struct AliasesBody<'a> {
    aliases: &'a [String],
}

impl ServingApi {
    /// Creates a client targeting the serving runner base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: build_client(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }

    async fn post<T: Serialize>(&self, path: &str, body: &T, context: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| Error::unavailable_with_source("serving runner unreachable", e))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(map_status(response.status(), context))
        }
    }

    /// Deploys `(site_id, version)` to the site tree of `fqdn`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the artifact is missing, `Unavailable` on
    /// transport failure.
    pub async fn deploy(&self, fqdn: &str, site_id: &str, version: &str) -> Result<()> {
        self.post(
            &format!("/sites/{fqdn}/artifacts"),
            &DeployBody { site_id, version },
            &format!("deploy {version} to {fqdn}"),
        )
        .await
    }

    /// Activates a deployed version on the public or preview channel.
    ///
    /// # Errors
    ///
    /// Returns `PreconditionFailed` for stale fencing tokens, `NotFound`
    /// for undeployed versions.
    pub async fn activate(
        &self,
        fqdn: &str,
        version: &str,
        preview: bool,
        fencing_token: Option<u64>,
    ) -> Result<()> {
        let path = if preview {
            format!("/sites/{fqdn}/preview")
        } else {
            format!("/sites/{fqdn}/activate")
        };
        self.post(
            &path,
            &ActivateBody {
                version,
                fencing_token,
            },
            &format!("activate {version} on {fqdn}"),
        )
        .await
    }

    /// Replaces the alias set of `fqdn`.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` on transport failure.
    pub async fn update_aliases(&self, fqdn: &str, aliases: &[String]) -> Result<()> {
        self.post(
            &format!("/sites/{fqdn}/aliases"),
            &AliasesBody { aliases },
            &format!("update aliases for {fqdn}"),
        )
        .await
    }

    /// Enables or disables serving for `fqdn`.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` on transport failure.
    pub async fn set_enabled(&self, fqdn: &str, enabled: bool) -> Result<()> {
        let action = if enabled { "enable" } else { "disable" };
        self.post(
            &format!("/sites/{fqdn}/{action}"),
            &serde_json::json!({}),
            &format!("{action} {fqdn}"),
        )
        .await
    }

    /// Removes a site from the edge entirely.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` on transport failure.
    pub async fn remove_site(&self, fqdn: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("/sites/{fqdn}")))
            .send()
            .await
            .map_err(|e| Error::unavailable_with_source("serving runner unreachable", e))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(map_status(response.status(), &format!("remove {fqdn}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::post;
    use axum::{Json, Router};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    async fn spawn(app: Router) -> (String, oneshot::Sender<()>) {
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
    async fn create_job_decodes_the_job_record() {
        use pagewright_core::id::{BuildId, SiteId};
        let app = Router::new().route(
            "/jobs",
            post(|Json(request): Json<JobRequest>| async move {
                let job = Job::new(
                    SiteId::new(request.site_id).expect("site id"),
                    request.prompt,
                    None,
                    BuildId::new("V1").expect("build id"),
                );
                (AxumStatus::CREATED, Json(job))
            }),
        );
        let (base_url, shutdown) = spawn(app).await;

        let api = ManagerApi::new(base_url);
        let job = api
            .create_job(&JobRequest {
                site_id: "S".to_string(),
                prompt: "add about page".to_string(),
                source_version: None,
                target_version: None,
            })
            .await
            .expect("create");
        assert_eq!(job.site_id.as_str(), "S");
        let _ = shutdown.send(());
    }

    #[tokio::test]
    async fn manager_conflict_maps_to_conflict() {
        let app = Router::new().route(
            "/jobs",
            post(|| async {
                (
                    AxumStatus::CONFLICT,
                    Json(serde_json::json!({"code": "CONFLICT", "message": "lock held"})),
                )
            }),
        );
        let (base_url, shutdown) = spawn(app).await;

        let api = ManagerApi::new(base_url);
        let err = api
            .create_job(&JobRequest {
                site_id: "S".to_string(),
                prompt: "x".to_string(),
                source_version: None,
                target_version: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
        let _ = shutdown.send(());
    }

    #[tokio::test]
    async fn serving_412_maps_to_precondition_failed() {
        let app = Router::new().route(
            "/sites/:fqdn/activate",
            post(|| async { AxumStatus::PRECONDITION_FAILED }),
        );
        let (base_url, shutdown) = spawn(app).await;

        let api = ServingApi::new(base_url);
        let err = api
            .activate("a.example.com", "V1", false, Some(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PreconditionFailed { .. }));
        let _ = shutdown.send(());
    }
}
