//! Worker spawning.
//!
//! A spawner creates one ephemeral worker bound to one job. The worker
//! receives its entire context through the environment (`JOB`,
//! `MANAGER_URL`, `WORKER_ID`, `LLM_KEY`, `LLM_BASE_URL`, `STORAGE_URL`);
//! its exit code is ignored — results arrive via the manager callback.
//! The manager never retries a spawn: a failed spawn is a terminal job
//! failure, preserving per-site ordering.

use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;

use pagewright_core::error::{Error, Result};
use pagewright_core::id::WorkerId;
use pagewright_core::job::Job;

/// Creates an ephemeral worker bound to one job.
#[async_trait]
pub trait Spawner: Send + Sync + 'static {
    /// Spawns a worker for `job`, returning its id.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` when the worker cannot be launched.
    async fn spawn(&self, job: &Job) -> Result<WorkerId>;
}

/// Environment handed to every spawned worker.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    /// Manager callback base URL.
    pub manager_url: String,
    /// Artifact store base URL.
    pub storage_url: String,
    /// LLM credential.
    pub llm_key: Option<String>,
    /// LLM endpoint override.
    pub llm_base_url: Option<String>,
}

/// Launches the configured worker command as a detached child process.
///
/// The command is split on whitespace; the first token is the program.
/// Typical values are a worker binary path or a `docker run ...`
/// invocation ending in the worker image.
#[derive(Debug)]
pub struct CommandSpawner {
    program: String,
    args: Vec<String>,
    context: WorkerContext,
}

impl CommandSpawner {
    /// Creates a spawner for the given command line.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the command is empty.
    pub fn new(command: &str, context: WorkerContext) -> Result<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| Error::InvalidInput("worker command must not be empty".to_string()))?;
        Ok(Self {
            program,
            args: parts.collect(),
            context,
        })
    }
}

#[async_trait]
impl Spawner for CommandSpawner {
    async fn spawn(&self, job: &Job) -> Result<WorkerId> {
        let worker_id = WorkerId::generate();
        let job_json = serde_json::to_string(job)?;

        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(&self.args)
            .env("JOB", job_json)
            .env("MANAGER_URL", &self.context.manager_url)
            .env("WORKER_ID", worker_id.as_str())
            .env("STORAGE_URL", &self.context.storage_url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(key) = &self.context.llm_key {
            command.env("LLM_KEY", key);
        }
        if let Some(url) = &self.context.llm_base_url {
            command.env("LLM_BASE_URL", url);
        }

        // Detached on purpose: the child outlives this call and reports
        // back over HTTP. Dropping the handle leaves the process running.
        let child = command
            .spawn()
            .map_err(|e| Error::unavailable_with_source("failed to spawn worker", e))?;

        tracing::info!(
            job_id = %job.job_id,
            worker_id = %worker_id,
            pid = child.id(),
            "worker spawned"
        );
        Ok(worker_id)
    }
}

/// Test spawner: records spawn requests without launching anything, and
/// can be configured to fail.
#[derive(Debug, Default)]
pub struct NoopSpawner {
    fail: bool,
    spawned: Mutex<Vec<(String, WorkerId)>>,
}

impl NoopSpawner {
    /// Creates a spawner that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a spawner that fails every spawn.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            spawned: Mutex::new(Vec::new()),
        }
    }

    /// Returns the job ids spawned so far.
    #[must_use]
    pub fn spawned_jobs(&self) -> Vec<String> {
        self.spawned
            .lock()
            .map(|s| s.iter().map(|(job, _)| job.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Spawner for NoopSpawner {
    async fn spawn(&self, job: &Job) -> Result<WorkerId> {
        if self.fail {
            return Err(Error::unavailable("spawner configured to fail"));
        }
        let worker_id = WorkerId::generate();
        if let Ok(mut spawned) = self.spawned.lock() {
            spawned.push((job.job_id.as_str().to_string(), worker_id.clone()));
        }
        Ok(worker_id)
    }
}
