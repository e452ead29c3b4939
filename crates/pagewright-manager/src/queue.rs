//! Durable job queue: a FIFO of job ids plus a keyed record store.
//!
//! Two abstractions sharing one backend. `push` writes the record first and
//! only then appends the id to the FIFO, so a consumer that sees an id
//! always finds the record. `pop` removes the id from the FIFO but leaves
//! the record in place; records expire 24 hours after their last update.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;

use pagewright_core::error::{Error, Result};
use pagewright_core::id::JobId;
use pagewright_core::job::{Job, JobStatus};

/// Minimum record retention after the last update.
pub const RECORD_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Durable FIFO of pending jobs plus a keyed store of job records.
#[async_trait]
pub trait JobQueue: Send + Sync + 'static {
    /// Writes the job record, then appends its id to the FIFO.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if a record with this id already exists,
    /// `Unavailable` on backend failure.
    async fn push(&self, job: &Job) -> Result<()>;

    /// Pops the next job id off the FIFO, blocking up to `timeout`, and
    /// resolves it to its record. Returns `None` on timeout. Does not
    /// delete the record.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` on backend failure.
    async fn pop(&self, timeout: Duration) -> Result<Option<Job>>;

    /// Loads a job record.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if absent or expired.
    async fn get(&self, job_id: &JobId) -> Result<Job>;

    /// Replaces a job record and refreshes its retention TTL.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no record exists for the job id.
    async fn update(&self, job: &Job) -> Result<()>;

    /// Returns all live records currently in `Running` (sweeper scan).
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` on backend failure.
    async fn running_jobs(&self) -> Result<Vec<Job>>;
}

#[derive(Debug)]
struct StoredJob {
    job: Job,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct QueueState {
    fifo: VecDeque<String>,
    records: HashMap<String, StoredJob>,
}

/// In-process queue backend.
///
/// Suitable for tests and single-node deployments; the [`JobQueue`] trait
/// is the seam for an external store. Record expiry is evaluated lazily on
/// read.
#[derive(Debug, Default)]
pub struct MemoryJobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl MemoryJobQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut QueueState) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock().map_err(|_| Error::Internal {
            message: "queue state poisoned".into(),
        })?;
        f(&mut state)
    }

    fn try_pop(&self) -> Result<Option<Job>> {
        self.with_state(|state| {
            while let Some(id) = state.fifo.pop_front() {
                match state.records.get(&id) {
                    Some(stored) if stored.expires_at > Instant::now() => {
                        return Ok(Some(stored.job.clone()));
                    }
                    // Record expired or missing between push and pop; the
                    // id alone is not actionable.
                    _ => continue,
                }
            }
            Ok(None)
        })
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn push(&self, job: &Job) -> Result<()> {
        self.with_state(|state| {
            let key = job.job_id.as_str().to_string();
            if state
                .records
                .get(&key)
                .is_some_and(|stored| stored.expires_at > Instant::now())
            {
                return Err(Error::conflict(format!("job {key} already exists")));
            }
            // Record first, then the FIFO entry.
            state.records.insert(
                key.clone(),
                StoredJob {
                    job: job.clone(),
                    expires_at: Instant::now() + RECORD_TTL,
                },
            );
            state.fifo.push_back(key);
            Ok(())
        })?;
        self.notify.notify_one();
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<Job>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(job) = self.try_pop()? {
                return Ok(Some(job));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            if tokio::time::timeout(deadline - now, self.notify.notified())
                .await
                .is_err()
            {
                return self.try_pop();
            }
        }
    }

    async fn get(&self, job_id: &JobId) -> Result<Job> {
        self.with_state(|state| {
            let key = job_id.as_str();
            match state.records.get(key) {
                Some(stored) if stored.expires_at > Instant::now() => Ok(stored.job.clone()),
                Some(_) => {
                    state.records.remove(key);
                    Err(Error::NotFound(format!("job not found: {job_id}")))
                }
                None => Err(Error::NotFound(format!("job not found: {job_id}"))),
            }
        })
    }

    async fn update(&self, job: &Job) -> Result<()> {
        self.with_state(|state| {
            let key = job.job_id.as_str().to_string();
            if !state.records.contains_key(&key) {
                return Err(Error::NotFound(format!("job not found: {}", job.job_id)));
            }
            state.records.insert(
                key,
                StoredJob {
                    job: job.clone(),
                    expires_at: Instant::now() + RECORD_TTL,
                },
            );
            Ok(())
        })
    }

    async fn running_jobs(&self) -> Result<Vec<Job>> {
        self.with_state(|state| {
            Ok(state
                .records
                .values()
                .filter(|stored| {
                    stored.expires_at > Instant::now() && stored.job.status == JobStatus::Running
                })
                .map(|stored| stored.job.clone())
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagewright_core::id::{BuildId, SiteId};

    fn job(site: &str) -> Job {
        Job::new(
            SiteId::new(site).expect("site id"),
            "prompt",
            None,
            BuildId::generate(),
        )
    }

    #[tokio::test]
    async fn push_then_pop_preserves_fifo_order() {
        let queue = MemoryJobQueue::new();
        let first = job("a");
        let second = job("b");
        queue.push(&first).await.expect("push first");
        queue.push(&second).await.expect("push second");

        let popped = queue
            .pop(Duration::from_millis(10))
            .await
            .expect("pop")
            .expect("job");
        assert_eq!(popped.job_id, first.job_id);
        let popped = queue
            .pop(Duration::from_millis(10))
            .await
            .expect("pop")
            .expect("job");
        assert_eq!(popped.job_id, second.job_id);
    }

    #[tokio::test]
    async fn pop_times_out_on_empty_queue() {
        let queue = MemoryJobQueue::new();
        let popped = queue.pop(Duration::from_millis(20)).await.expect("pop");
        assert!(popped.is_none());
    }

    #[tokio::test]
    async fn pop_wakes_on_concurrent_push() {
        let queue = std::sync::Arc::new(MemoryJobQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(&job("a")).await.expect("push");

        let popped = consumer.await.expect("join").expect("pop");
        assert!(popped.is_some());
    }

    #[tokio::test]
    async fn pop_leaves_the_record_in_place() {
        let queue = MemoryJobQueue::new();
        let pushed = job("a");
        queue.push(&pushed).await.expect("push");
        queue.pop(Duration::from_millis(10)).await.expect("pop");

        let record = queue.get(&pushed.job_id).await.expect("get");
        assert_eq!(record.job_id, pushed.job_id);
    }

    #[tokio::test]
    async fn duplicate_push_conflicts() {
        let queue = MemoryJobQueue::new();
        let j = job("a");
        queue.push(&j).await.expect("push");
        assert!(matches!(
            queue.push(&j).await,
            Err(Error::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn update_requires_existing_record() {
        let queue = MemoryJobQueue::new();
        let j = job("a");
        assert!(matches!(queue.update(&j).await, Err(Error::NotFound(_))));

        queue.push(&j).await.expect("push");
        let mut updated = j.clone();
        updated.start().expect("start");
        queue.update(&updated).await.expect("update");
        let record = queue.get(&j.job_id).await.expect("get");
        assert_eq!(record.status, JobStatus::Running);
    }

    #[tokio::test]
    async fn running_jobs_scan_filters_by_status() {
        let queue = MemoryJobQueue::new();
        let mut running = job("a");
        queue.push(&running).await.expect("push");
        running.start().expect("start");
        queue.update(&running).await.expect("update");

        let pending = job("b");
        queue.push(&pending).await.expect("push");

        let scan = queue.running_jobs().await.expect("scan");
        assert_eq!(scan.len(), 1);
        assert_eq!(scan[0].job_id, running.job_id);
    }
}
