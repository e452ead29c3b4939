//! The job service: owner of the job state machine.
//!
//! All job records are written here and only here. Workers influence
//! records exclusively through the status/result callbacks, and the lock
//! backend serializes mutations per site.

use std::sync::Arc;
use std::time::Duration;

use pagewright_core::error::{Error, Result};
use pagewright_core::id::{BuildId, JobId, SiteId};
use pagewright_core::job::{Job, JobRequest, JobStatus, StatusUpdate, WorkerReport};
use pagewright_core::lock::LockBackend;
use pagewright_core::observability::job_span;

use crate::queue::JobQueue;
use crate::spawner::Spawner;

/// Orchestrates intake → lock → enqueue → spawn → callback → release.
pub struct JobService {
    lock: Arc<dyn LockBackend>,
    queue: Arc<dyn JobQueue>,
    spawner: Arc<dyn Spawner>,
    lock_ttl: Duration,
}

impl JobService {
    /// Creates a job service over the given backends.
    #[must_use]
    pub fn new(
        lock: Arc<dyn LockBackend>,
        queue: Arc<dyn JobQueue>,
        spawner: Arc<dyn Spawner>,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            lock,
            queue,
            spawner,
            lock_ttl,
        }
    }

    /// Returns the lock backend (shared with the timeout sweeper).
    #[must_use]
    pub fn lock(&self) -> Arc<dyn LockBackend> {
        Arc::clone(&self.lock)
    }

    /// Returns the queue backend (shared with the timeout sweeper).
    #[must_use]
    pub fn queue(&self) -> Arc<dyn JobQueue> {
        Arc::clone(&self.queue)
    }

    /// Creates a job: validates, locks the site, enqueues, and spawns a
    /// worker.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for an empty `site_id` or `prompt` (nothing mutated)
    /// - `Conflict` when the site lock is held (nothing mutated)
    /// - `Internal`/`Unavailable` when enqueue or spawn fails; the job
    ///   record is terminal-`Failed` and the lock released before returning
    pub async fn create_job(&self, request: JobRequest) -> Result<Job> {
        if request.site_id.trim().is_empty() || request.prompt.trim().is_empty() {
            return Err(Error::InvalidInput(
                "site_id and prompt are required".to_string(),
            ));
        }

        let site_id = SiteId::new(request.site_id)?;
        let source_version = request
            .source_version
            .filter(|v| !v.trim().is_empty())
            .map(BuildId::new)
            .transpose()?;
        let target_version = match request.target_version.filter(|v| !v.trim().is_empty()) {
            Some(version) => BuildId::new(version)?,
            None => BuildId::generate(),
        };

        let mut job = Job::new(site_id.clone(), request.prompt, source_version, target_version);
        let span = job_span("create", site_id.as_str(), job.job_id.as_str());
        let _guard = span.enter();

        // Single serialization point per site. A refused acquire leaves no
        // trace of this request.
        let grant = self.lock.acquire(&site_id, self.lock_ttl).await?;
        job.lock_token = Some(grant.token);
        job.fencing_token = grant.fencing_token;

        if let Err(e) = self.queue.push(&job).await {
            self.release_lock(&job).await;
            return Err(Error::internal(format!("failed to enqueue job: {e}")));
        }

        job.start()?;
        self.queue.update(&job).await?;

        match self.spawner.spawn(&job).await {
            Ok(worker_id) => {
                job.worker_id = Some(worker_id);
                self.queue.update(&job).await?;
                tracing::info!(
                    fencing_token = job.fencing_token,
                    target_version = %job.target_version,
                    "job created"
                );
                Ok(job)
            }
            Err(e) => {
                job.fail(format!("failed to spawn worker: {e}"))?;
                self.queue.update(&job).await?;
                self.release_lock(&job).await;
                Err(Error::internal(format!("failed to spawn worker: {e}")))
            }
        }
    }

    /// Loads a job record.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the record is absent or past its TTL.
    pub async fn get_job(&self, job_id: &JobId) -> Result<Job> {
        self.queue.get(job_id).await
    }

    /// Applies a worker status callback.
    ///
    /// Terminal records reject the callback with `Conflict` (no state
    /// rewinding). Non-terminal updates with a non-terminal status only
    /// refresh the record's liveness.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown jobs, `Conflict` for terminal
    /// records or illegal transitions.
    pub async fn on_status(&self, job_id: &JobId, update: StatusUpdate) -> Result<Job> {
        let mut job = self.queue.get(job_id).await?;
        if job.status.is_terminal() {
            return Err(Error::conflict(format!(
                "job {job_id} is already {}; callback discarded",
                job.status
            )));
        }

        match update.status {
            JobStatus::Completed => {
                job.complete(update.result.unwrap_or_default())?;
            }
            JobStatus::Failed => {
                job.fail(
                    update
                        .error_message
                        .unwrap_or_else(|| "worker reported failure".to_string()),
                )?;
            }
            // Intermediate heartbeat: refresh liveness for the sweeper.
            JobStatus::Pending | JobStatus::Running => job.touch(),
        }

        self.queue.update(&job).await?;
        if job.status.is_terminal() {
            self.release_lock(&job).await;
        }
        Ok(job)
    }

    /// Applies the final worker report carrying the artifact pointer.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown jobs, `Conflict` for terminal
    /// records.
    pub async fn on_result(&self, job_id: &JobId, report: WorkerReport) -> Result<Job> {
        let mut job = self.queue.get(job_id).await?;
        if job.status.is_terminal() {
            return Err(Error::conflict(format!(
                "job {job_id} is already {}; result discarded",
                job.status
            )));
        }

        match report.status {
            JobStatus::Completed => {
                job.complete(report.summary)?;
                tracing::info!(
                    job_id = %job.job_id,
                    site_id = %job.site_id,
                    target_version = %report.target_version,
                    files_changed = report.files_changed.len(),
                    "job completed"
                );
            }
            _ => {
                job.fail(
                    report
                        .error_message
                        .unwrap_or_else(|| "worker reported failure".to_string()),
                )?;
            }
        }

        self.queue.update(&job).await?;
        self.release_lock(&job).await;
        Ok(job)
    }

    /// Fails a running job that exceeded the worker timeout.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the job reached a terminal state concurrently.
    pub async fn timeout_job(&self, job_id: &JobId) -> Result<()> {
        let mut job = self.queue.get(job_id).await?;
        if job.status.is_terminal() {
            return Err(Error::conflict(format!("job {job_id} already terminal")));
        }
        job.fail("worker timed out")?;
        self.queue.update(&job).await?;
        self.release_lock(&job).await;
        Ok(())
    }

    /// Best-effort lock release after a terminal transition.
    ///
    /// A mismatch means the lease already expired and someone else may
    /// hold the lock now; the fencing token decides whether this job's
    /// output is still activatable, so the mismatch is only a warning.
    async fn release_lock(&self, job: &Job) {
        let Some(token) = job.lock_token.as_deref() else {
            return;
        };
        if let Err(e) = self.lock.release(&job.site_id, token).await {
            tracing::warn!(
                site_id = %job.site_id,
                job_id = %job.job_id,
                error = %e,
                "lock release failed after terminal transition"
            );
        }
    }
}
