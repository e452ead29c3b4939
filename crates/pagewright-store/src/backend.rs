//! Artifact storage backends.
//!
//! The contract all backends implement:
//!
//! - Writes are atomic (temp file, fsync, rename) and write-once: an
//!   artifact key is never overwritten.
//! - Reads are ordinary byte loads; a missing key is `NotFound`.
//! - The version log is append-only, one JSON file per entry, listed in
//!   descending timestamp order with unreadable entries skipped.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pagewright_core::error::{Error, Result};
use pagewright_core::id::{BuildId, SiteId};

/// What a version-log entry records about a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionAction {
    /// A worker produced and uploaded this version.
    Build,
    /// The version was deployed to the serving runner.
    Deploy,
    /// The version was activated on a channel.
    Activate,
}

/// One entry in a site's append-only version log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// The artifact version this entry describes.
    pub build_id: String,
    /// When the action happened.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub action: VersionAction,
    /// Outcome, e.g. `completed` or `failed`.
    pub status: String,
    /// Free-form metadata (summary, files changed, channel, ...).
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Content-addressed storage of opaque build outputs.
#[async_trait]
pub trait ArtifactStore: Send + Sync + 'static {
    /// Stores an artifact under `(site_id, build_id)`.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the key already exists (artifacts are
    /// immutable), `Unavailable` on I/O failure.
    async fn store_artifact(&self, site_id: &SiteId, build_id: &BuildId, data: Bytes)
    -> Result<()>;

    /// Fetches the artifact stored under `(site_id, build_id)`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if absent.
    async fn fetch_artifact(&self, site_id: &SiteId, build_id: &BuildId) -> Result<Bytes>;

    /// Appends an entry to the site's version log.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` on I/O failure.
    async fn append_log(&self, site_id: &SiteId, entry: LogEntry) -> Result<()>;

    /// Lists the site's version log, newest first.
    ///
    /// Unreadable or malformed entries are skipped.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` on I/O failure.
    async fn list_versions(&self, site_id: &SiteId) -> Result<Vec<LogEntry>>;
}

/// Filesystem-backed artifact store.
///
/// Layout under the base path:
///
/// ```text
/// sites/<site_id>/artifacts/<build_id>.tar.gz
/// sites/<site_id>/logs/<utc-timestamp>-<build_id>.json
/// ```
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    base: PathBuf,
}

impl FsArtifactStore {
    /// Creates a store rooted at `base`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the base directory cannot be created.
    pub fn new(base: impl Into<PathBuf>) -> Result<Self> {
        let base = base.into();
        std::fs::create_dir_all(&base)
            .map_err(|e| Error::unavailable_with_source("create store base directory", e))?;
        Ok(Self { base })
    }

    fn artifact_path(&self, site_id: &SiteId, build_id: &BuildId) -> PathBuf {
        self.base
            .join("sites")
            .join(site_id.as_str())
            .join("artifacts")
            .join(format!("{build_id}.tar.gz"))
    }

    fn log_dir(&self, site_id: &SiteId) -> PathBuf {
        self.base.join("sites").join(site_id.as_str()).join("logs")
    }
}

/// Writes `data` to `path` atomically: temp file in the same directory,
/// fsync, rename.
async fn atomic_write(path: &Path, data: Bytes) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let write = || async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        tokio::io::AsyncWriteExt::write_all(&mut file, &data).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await
    };
    if let Err(e) = write().await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(Error::unavailable_with_source(
            format!("atomic write to {}", path.display()),
            e,
        ));
    }
    Ok(())
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn store_artifact(
        &self,
        site_id: &SiteId,
        build_id: &BuildId,
        data: Bytes,
    ) -> Result<()> {
        let path = self.artifact_path(site_id, build_id);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(Error::conflict(format!(
                "artifact {site_id}/{build_id} already exists"
            )));
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::unavailable_with_source("create artifact directory", e))?;
        }
        atomic_write(&path, data).await
    }

    async fn fetch_artifact(&self, site_id: &SiteId, build_id: &BuildId) -> Result<Bytes> {
        let path = self.artifact_path(site_id, build_id);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::NotFound(format!(
                "artifact not found: {site_id}/{build_id}"
            ))),
            Err(e) => Err(Error::unavailable_with_source("read artifact", e)),
        }
    }

    async fn append_log(&self, site_id: &SiteId, entry: LogEntry) -> Result<()> {
        let dir = self.log_dir(site_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::unavailable_with_source("create log directory", e))?;

        // Timestamp prefix keeps filenames unique and sortable.
        let name = format!(
            "{}-{}.json",
            entry.timestamp.format("%Y%m%d-%H%M%S%.6f"),
            entry.build_id
        );
        let data = Bytes::from(serde_json::to_vec_pretty(&entry)?);
        atomic_write(&dir.join(name), data).await
    }

    async fn list_versions(&self, site_id: &SiteId) -> Result<Vec<LogEntry>> {
        let dir = self.log_dir(site_id);
        let mut reader = match tokio::fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::unavailable_with_source("read log directory", e)),
        };

        let mut entries = Vec::new();
        while let Some(dirent) = reader
            .next_entry()
            .await
            .map_err(|e| Error::unavailable_with_source("read log directory", e))?
        {
            let path = dirent.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let Ok(data) = tokio::fs::read(&path).await else {
                continue;
            };
            match serde_json::from_slice::<LogEntry>(&data) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping malformed log entry");
                }
            }
        }

        // Sort by the embedded timestamp, not the filename: newest first.
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(entries)
    }
}

#[derive(Debug, Default)]
struct MemoryStoreState {
    artifacts: HashMap<(String, String), Bytes>,
    logs: HashMap<String, Vec<LogEntry>>,
}

/// In-memory artifact store for tests.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    state: Mutex<MemoryStoreState>,
}

impl MemoryArtifactStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn store_artifact(
        &self,
        site_id: &SiteId,
        build_id: &BuildId,
        data: Bytes,
    ) -> Result<()> {
        let key = (site_id.as_str().to_string(), build_id.as_str().to_string());
        let mut state = self.state.lock().map_err(|_| Error::Internal {
            message: "store state poisoned".into(),
        })?;
        if state.artifacts.contains_key(&key) {
            return Err(Error::conflict(format!(
                "artifact {site_id}/{build_id} already exists"
            )));
        }
        state.artifacts.insert(key, data);
        Ok(())
    }

    async fn fetch_artifact(&self, site_id: &SiteId, build_id: &BuildId) -> Result<Bytes> {
        let key = (site_id.as_str().to_string(), build_id.as_str().to_string());
        let state = self.state.lock().map_err(|_| Error::Internal {
            message: "store state poisoned".into(),
        })?;
        state
            .artifacts
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("artifact not found: {site_id}/{build_id}")))
    }

    async fn append_log(&self, site_id: &SiteId, entry: LogEntry) -> Result<()> {
        let mut state = self.state.lock().map_err(|_| Error::Internal {
            message: "store state poisoned".into(),
        })?;
        state
            .logs
            .entry(site_id.as_str().to_string())
            .or_default()
            .push(entry);
        Ok(())
    }

    async fn list_versions(&self, site_id: &SiteId) -> Result<Vec<LogEntry>> {
        let state = self.state.lock().map_err(|_| Error::Internal {
            message: "store state poisoned".into(),
        })?;
        let mut entries = state.logs.get(site_id.as_str()).cloned().unwrap_or_default();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn site() -> SiteId {
        SiteId::new("S").expect("site id")
    }

    fn build(id: &str) -> BuildId {
        BuildId::new(id).expect("build id")
    }

    fn entry(build_id: &str, ts: DateTime<Utc>) -> LogEntry {
        LogEntry {
            build_id: build_id.to_string(),
            timestamp: ts,
            action: VersionAction::Build,
            status: "completed".to_string(),
            metadata: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn store_and_fetch_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::new(dir.path()).expect("store");

        store
            .store_artifact(&site(), &build("V1"), Bytes::from_static(b"archive"))
            .await
            .expect("store");
        let data = store
            .fetch_artifact(&site(), &build("V1"))
            .await
            .expect("fetch");
        assert_eq!(&data[..], b"archive");
    }

    #[tokio::test]
    async fn artifacts_are_immutable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::new(dir.path()).expect("store");

        store
            .store_artifact(&site(), &build("V1"), Bytes::from_static(b"first"))
            .await
            .expect("store");
        let err = store
            .store_artifact(&site(), &build("V1"), Bytes::from_static(b"second"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));

        let data = store
            .fetch_artifact(&site(), &build("V1"))
            .await
            .expect("fetch");
        assert_eq!(&data[..], b"first");
    }

    #[tokio::test]
    async fn missing_artifact_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::new(dir.path()).expect("store");
        let err = store
            .fetch_artifact(&site(), &build("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn no_temp_files_survive_a_write() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::new(dir.path()).expect("store");
        store
            .store_artifact(&site(), &build("V1"), Bytes::from_static(b"archive"))
            .await
            .expect("store");

        let artifacts = dir.path().join("sites").join("S").join("artifacts");
        let names: Vec<_> = std::fs::read_dir(artifacts)
            .expect("read dir")
            .map(|e| e.expect("entry").file_name().into_string().expect("name"))
            .collect();
        assert_eq!(names, vec!["V1.tar.gz".to_string()]);
    }

    #[tokio::test]
    async fn versions_list_newest_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::new(dir.path()).expect("store");
        let base = Utc::now();

        for (i, id) in ["V1", "V2", "V3"].iter().enumerate() {
            store
                .append_log(&site(), entry(id, base + Duration::seconds(i as i64)))
                .await
                .expect("append");
        }

        let versions = store.list_versions(&site()).await.expect("list");
        let ids: Vec<_> = versions.iter().map(|v| v.build_id.as_str()).collect();
        assert_eq!(ids, vec!["V3", "V2", "V1"]);
    }

    #[tokio::test]
    async fn malformed_log_entries_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::new(dir.path()).expect("store");
        store
            .append_log(&site(), entry("V1", Utc::now()))
            .await
            .expect("append");

        let logs = dir.path().join("sites").join("S").join("logs");
        std::fs::write(logs.join("zz-broken.json"), b"{not json").expect("write");

        let versions = store.list_versions(&site()).await.expect("list");
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].build_id, "V1");
    }

    #[tokio::test]
    async fn empty_site_lists_no_versions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsArtifactStore::new(dir.path()).expect("store");
        assert!(store.list_versions(&site()).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn memory_store_matches_contract() {
        let store = MemoryArtifactStore::new();
        store
            .store_artifact(&site(), &build("V1"), Bytes::from_static(b"a"))
            .await
            .expect("store");
        assert!(matches!(
            store
                .store_artifact(&site(), &build("V1"), Bytes::from_static(b"b"))
                .await,
            Err(Error::Conflict { .. })
        ));
        assert!(matches!(
            store.fetch_artifact(&site(), &build("V2")).await,
            Err(Error::NotFound(_))
        ));
    }
}
