//! Background timeout sweeper.
//!
//! Every tick, any `Running` job whose record has not been touched within
//! the worker timeout *and* whose site lock has expired is failed. The
//! orphaned worker may still upload its artifact (uploads are immutable and
//! harmless); the activation monotonicity check prevents it from ever being
//! served if a newer job completed meanwhile.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::service::JobService;

/// Default scan interval.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Periodic scan failing timed-out jobs.
pub struct TimeoutSweeper {
    service: Arc<JobService>,
    worker_timeout: Duration,
    interval: Duration,
}

impl TimeoutSweeper {
    /// Creates a sweeper with the default interval.
    #[must_use]
    pub fn new(service: Arc<JobService>, worker_timeout: Duration) -> Self {
        Self {
            service,
            worker_timeout,
            interval: SWEEP_INTERVAL,
        }
    }

    /// Overrides the scan interval (tests).
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Runs the sweeper until `shutdown` is cancelled. Shutdown completes
    /// within one tick.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            // The first tick fires immediately; skip it so a fresh start
            // does not race job creation.
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => {
                        tracing::info!("timeout sweeper stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        self.sweep().await;
                    }
                }
            }
        })
    }

    /// One scan pass. Public for tests.
    pub async fn sweep(&self) {
        let jobs = match self.service.queue().running_jobs().await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::warn!(error = %e, "timeout sweep could not scan records");
                return;
            }
        };

        let now = Utc::now();
        for job in jobs {
            let age = now - job.updated_at;
            if age.to_std().map_or(true, |age| age < self.worker_timeout) {
                continue;
            }

            // Only reap once the lease is actually gone; a live lock means
            // the worker may still be making progress within its lease.
            match self.service.lock().is_locked(&job.site_id).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(site_id = %job.site_id, error = %e, "lock check failed during sweep");
                    continue;
                }
            }

            tracing::warn!(
                job_id = %job.job_id,
                site_id = %job.site_id,
                updated_at = %job.updated_at,
                "failing timed-out job"
            );
            if let Err(e) = self.service.timeout_job(&job.job_id).await {
                // A callback beat us to the terminal state; nothing to do.
                tracing::debug!(job_id = %job.job_id, error = %e, "timeout skipped");
            }
        }
    }
}
