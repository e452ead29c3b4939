//! HTTP client for the artifact store.
//!
//! Used by the worker (fetch base / upload result), the serving runner
//! (fetch for deploy), and intake (version listings). Transport failures
//! map to `Unavailable`; HTTP statuses map back onto the error taxonomy.

use std::time::Duration;

use bytes::Bytes;
use reqwest::StatusCode;

use pagewright_core::error::{Error, Result};
use pagewright_core::id::{BuildId, SiteId};

use crate::backend::LogEntry;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// HTTP client for the artifact store service.
#[derive(Debug, Clone)]
pub struct StoreClient {
    base_url: String,
    client: reqwest::Client,
}

impl StoreClient {
    /// Creates a new client targeting the given base URL.
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

    fn map_status(status: StatusCode, context: &str) -> Error {
        match status {
            StatusCode::NOT_FOUND => Error::NotFound(context.to_string()),
            StatusCode::CONFLICT => Error::conflict(context.to_string()),
            s if s.is_server_error() => {
                Error::unavailable(format!("{context}: store returned {s}"))
            }
            s => Error::internal(format!("{context}: unexpected status {s}")),
        }
    }

    /// Uploads an artifact under `(site_id, build_id)`.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the key exists, `Unavailable` on transport or
    /// server failure.
    pub async fn put_artifact(
        &self,
        site_id: &SiteId,
        build_id: &BuildId,
        data: Bytes,
    ) -> Result<()> {
        let url = self.url(&format!("/sites/{site_id}/artifacts/{build_id}"));
        let response = self
            .client
            .put(&url)
            .body(data)
            .send()
            .await
            .map_err(|e| Error::unavailable_with_source("artifact upload failed", e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::map_status(
                response.status(),
                &format!("upload artifact {site_id}/{build_id}"),
            ))
        }
    }

    /// Fetches the artifact stored under `(site_id, build_id)`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if absent, `Unavailable` on transport failure.
    pub async fn get_artifact(&self, site_id: &SiteId, build_id: &BuildId) -> Result<Bytes> {
        let url = self.url(&format!("/sites/{site_id}/artifacts/{build_id}"));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::unavailable_with_source("artifact fetch failed", e))?;

        if response.status().is_success() {
            response
                .bytes()
                .await
                .map_err(|e| Error::unavailable_with_source("artifact body read failed", e))
        } else {
            Err(Self::map_status(
                response.status(),
                &format!("fetch artifact {site_id}/{build_id}"),
            ))
        }
    }

    /// Appends an entry to the site's version log.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` on transport or server failure.
    pub async fn append_log(&self, site_id: &SiteId, entry: &LogEntry) -> Result<()> {
        let url = self.url(&format!("/sites/{site_id}/logs"));
        let response = self
            .client
            .post(&url)
            .json(entry)
            .send()
            .await
            .map_err(|e| Error::unavailable_with_source("log append failed", e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::map_status(
                response.status(),
                &format!("append log for site {site_id}"),
            ))
        }
    }

    /// Lists the site's version log, newest first.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` on transport or server failure.
    pub async fn list_versions(&self, site_id: &SiteId) -> Result<Vec<LogEntry>> {
        let url = self.url(&format!("/sites/{site_id}/versions"));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::unavailable_with_source("version listing failed", e))?;

        if response.status().is_success() {
            response.json().await.map_err(|e| Error::Serialization {
                message: format!("invalid version listing: {e}"),
            })
        } else {
            Err(Self::map_status(
                response.status(),
                &format!("list versions for site {site_id}"),
            ))
        }
    }
}
