//! HTTP client for the manager callback surface.
//!
//! Workers report progress to `POST /jobs/:id/status` and their final
//! outcome to `POST /jobs/:id/result`. A 409 means the record is already
//! terminal (the manager timed the job out, or this is a duplicate); the
//! worker treats that as final and does not retry.

use std::time::Duration;

use reqwest::StatusCode;

use pagewright_core::error::{Error, Result};
use pagewright_core::id::JobId;
use pagewright_core::job::{StatusUpdate, WorkerReport};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for the manager's worker-callback endpoints.
#[derive(Debug, Clone)]
pub struct ManagerClient {
    base_url: String,
    client: reqwest::Client,
}

impl ManagerClient {
    /// Creates a new client targeting the manager base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }

    async fn post_json<T: serde::Serialize>(&self, path: &str, body: &T) -> Result<()> {
        let url = self.url(path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::unavailable_with_source("manager callback failed", e))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::CONFLICT => Err(Error::conflict(format!(
                "manager refused callback to {path}: record is terminal"
            ))),
            StatusCode::NOT_FOUND => Err(Error::NotFound(format!("manager has no record for {path}"))),
            status => Err(Error::unavailable(format!(
                "manager callback to {path} returned {status}"
            ))),
        }
    }

    /// Posts an intermediate status update.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` for terminal records, `Unavailable` on transport
    /// failure.
    pub async fn post_status(&self, job_id: &JobId, update: &StatusUpdate) -> Result<()> {
        self.post_json(&format!("/jobs/{job_id}/status"), update)
            .await
    }

    /// Posts the final worker report.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` for terminal records, `Unavailable` on transport
    /// failure.
    pub async fn post_result(&self, job_id: &JobId, report: &WorkerReport) -> Result<()> {
        self.post_json(&format!("/jobs/{job_id}/result"), report)
            .await
    }
}
