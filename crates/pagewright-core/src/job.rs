//! The job record and its state machine.
//!
//! A job is one mutation of one site: it transforms `source_version` into
//! `target_version` under the site's lock. The manager is the only writer of
//! job records; workers influence them solely through callbacks.
//!
//! The state machine is `Pending → Running → {Completed, Failed}`, with a
//! direct `Pending → Failed` edge for spawn failures. Terminal states never
//! transition again: a late worker callback against a terminal record is a
//! conflict, not a rewind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::{BuildId, JobId, SiteId, WorkerId};

/// The state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created and lock-holding, not yet handed to a worker.
    Pending,
    /// A worker has been spawned for this job.
    Running,
    /// The worker reported success; the target artifact is stored.
    Completed,
    /// The worker reported failure, spawning failed, or the job timed out.
    Failed,
}

impl JobStatus {
    /// Returns true for `Completed` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns whether the state machine permits moving to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Failed)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A single mutation request transforming one source version into one
/// target version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier.
    pub job_id: JobId,
    /// The site this job mutates.
    pub site_id: SiteId,
    /// User instruction text, already normalized by intake.
    pub prompt: String,
    /// Base artifact; `None` for the first build of a site.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_version: Option<BuildId>,
    /// Pre-allocated id for the output artifact. Chosen before any worker
    /// runs; abandoned (never reused) if the worker fails.
    pub target_version: BuildId,
    /// Current state.
    pub status: JobStatus,
    /// Opaque lock handle, present while the job holds the site lock.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_token: Option<String>,
    /// Fencing token from lock acquisition; strictly increasing per site.
    pub fencing_token: u64,
    /// Worker bound to this job, set once spawned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<WorkerId>,
    /// Worker-reported result summary on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Final failure message, surfaced verbatim to the owning user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time; refreshed on every record update.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Creates a pending job with fresh timestamps.
    #[must_use]
    pub fn new(
        site_id: SiteId,
        prompt: impl Into<String>,
        source_version: Option<BuildId>,
        target_version: BuildId,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id: JobId::generate(),
            site_id,
            prompt: prompt.into(),
            source_version,
            target_version,
            status: JobStatus::Pending,
            lock_token: None,
            fencing_token: 0,
            worker_id: None,
            result: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Refreshes `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Transitions `Pending → Running`.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the job is not pending.
    pub fn start(&mut self) -> Result<()> {
        self.transition(JobStatus::Running)
    }

    /// Transitions to `Completed` with the worker-reported summary.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the job is not running.
    pub fn complete(&mut self, result: impl Into<String>) -> Result<()> {
        self.transition(JobStatus::Completed)?;
        self.result = Some(result.into());
        Ok(())
    }

    /// Transitions to `Failed` with a failure message.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the job is already terminal.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        self.transition(JobStatus::Failed)?;
        self.error_message = Some(message.into());
        Ok(())
    }

    fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::conflict(format!(
                "job {} cannot transition from {} to {next}",
                self.job_id, self.status
            )));
        }
        self.status = next;
        self.touch();
        Ok(())
    }
}

/// An incoming create-job request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    /// The site to mutate.
    pub site_id: String,
    /// User instruction text.
    pub prompt: String,
    /// Base artifact for the build; absent for a first build.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_version: Option<String>,
    /// Caller-chosen output version; the manager allocates one if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_version: Option<String>,
}

/// An intermediate status update from a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// Reported state; terminal values release the lock.
    pub status: JobStatus,
    /// Result summary, if completing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Failure message, if failing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// The final worker report, carrying the artifact pointer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerReport {
    /// Terminal state the worker is reporting.
    pub status: JobStatus,
    /// Version uploaded to the artifact store.
    pub target_version: String,
    /// Human-readable summary of the mutation.
    #[serde(default)]
    pub summary: String,
    /// Paths the code generator reported as changed.
    #[serde(default)]
    pub files_changed: Vec<String>,
    /// Failure message when `status` is `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}
