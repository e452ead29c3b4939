//! The worker pipeline: fetch → unpack → instruct → generate → pack →
//! upload → report.
//!
//! Every failure along the way collapses into a single `Failed` report;
//! the worker never retries (a retry is a new job). The upload side is
//! immutable and atomic, so even a worker that already lost its lease can
//! safely store its artifact — activation is where staleness is enforced.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;

use pagewright_core::error::{Error, Result};
use pagewright_core::job::{Job, JobStatus, WorkerReport};
use pagewright_core::observability::job_span;
use pagewright_store::archive;
use pagewright_store::backend::{LogEntry, VersionAction};
use pagewright_store::client::StoreClient;

use crate::callback::ManagerClient;
use crate::executor::Executor;
use crate::server::{StatusBoard, WorkerState};

/// Fixed path of the instructions file inside the working tree.
const INSTRUCTIONS_PATH: &str = ".codex/instructions.md";

/// Runs one job end to end.
pub struct JobRunner {
    job: Job,
    store: StoreClient,
    manager: ManagerClient,
    executor: Arc<Executor>,
    status: Arc<StatusBoard>,
}

impl JobRunner {
    /// Creates a runner for the given job.
    #[must_use]
    pub fn new(
        job: Job,
        store: StoreClient,
        manager: ManagerClient,
        executor: Arc<Executor>,
        status: Arc<StatusBoard>,
    ) -> Self {
        Self {
            job,
            store,
            manager,
            executor,
            status,
        }
    }

    /// Executes the pipeline and posts the final report.
    ///
    /// # Errors
    ///
    /// Returns an error only when the final callback cannot be delivered;
    /// pipeline failures are folded into a `Failed` report.
    pub async fn run(self) -> Result<()> {
        let span = job_span("run", self.job.site_id.as_str(), self.job.job_id.as_str());
        let _guard = span.enter();

        let report = match self.build().await {
            Ok(report) => {
                self.status.update(WorkerState::Completed, "done");
                report
            }
            Err(e) => {
                tracing::error!(error = %e, "build pipeline failed");
                self.status.set_error(e.to_string());
                WorkerReport {
                    status: JobStatus::Failed,
                    target_version: self.job.target_version.as_str().to_string(),
                    summary: String::new(),
                    files_changed: Vec::new(),
                    error_message: Some(e.to_string()),
                }
            }
        };

        self.manager.post_result(&self.job.job_id, &report).await
    }

    async fn build(&self) -> Result<WorkerReport> {
        let scratch = tempfile::tempdir()
            .map_err(|e| Error::internal(format!("create scratch directory: {e}")))?;
        let work = scratch.path().join("site");

        self.status.update(WorkerState::Working, "fetching base artifact");
        self.prepare_tree(&work).await?;

        self.status.update(WorkerState::Working, "writing instructions");
        write_instructions(&work, &self.job.prompt)?;

        self.status.update(WorkerState::Working, "running code generator");
        self.executor.execute(&self.job.prompt, &work).await?;
        let (files_changed, summary) = self.executor.parse_output();

        self.status.update(WorkerState::Working, "uploading artifact");
        let packed = archive::pack(&work)?;
        self.store
            .put_artifact(&self.job.site_id, &self.job.target_version, packed)
            .await?;

        // The version log is observability, not correctness; a failed
        // append must not fail a finished build.
        let mut metadata = serde_json::Map::new();
        metadata.insert("summary".to_string(), summary.clone().into());
        metadata.insert(
            "files_changed".to_string(),
            serde_json::to_value(&files_changed)?,
        );
        let entry = LogEntry {
            build_id: self.job.target_version.as_str().to_string(),
            timestamp: Utc::now(),
            action: VersionAction::Build,
            status: "completed".to_string(),
            metadata,
        };
        if let Err(e) = self.store.append_log(&self.job.site_id, &entry).await {
            tracing::warn!(error = %e, "version log append failed");
        }

        Ok(WorkerReport {
            status: JobStatus::Completed,
            target_version: self.job.target_version.as_str().to_string(),
            summary,
            files_changed,
            error_message: None,
        })
    }

    /// Materializes the base tree: the source artifact if one exists,
    /// otherwise a blank working tree.
    async fn prepare_tree(&self, work: &Path) -> Result<()> {
        std::fs::create_dir_all(work)
            .map_err(|e| Error::internal(format!("create working tree: {e}")))?;
        let Some(source) = &self.job.source_version else {
            return Ok(());
        };
        let data = self.store.get_artifact(&self.job.site_id, source).await?;
        archive::unpack(&data, work)
    }
}

fn write_instructions(work: &Path, prompt: &str) -> Result<()> {
    let path: PathBuf = work.join(INSTRUCTIONS_PATH);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::internal(format!("create instructions directory: {e}")))?;
    }
    std::fs::write(&path, prompt)
        .map_err(|e| Error::internal(format!("write instructions: {e}")))
}
