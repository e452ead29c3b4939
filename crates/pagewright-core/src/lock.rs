//! Per-site mutual exclusion with TTL and monotonic fencing tokens.
//!
//! The lock is the serialization point for all mutations of a site: at most
//! one job per site can hold it, and every acquisition returns a fencing
//! token drawn from a counter that only ever increases. TTL expiry tolerates
//! crashed holders; the fencing token lets downstream consumers reject a
//! holder that stalled, lost its lease, and woke up later.
//!
//! The fencing counter is **not** reset on release — it is persisted with
//! the same durability as the lock itself and totally orders acquisitions
//! across the backend's lifetime.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ulid::Ulid;

use crate::error::{Error, Result};
use crate::id::SiteId;

/// The outcome of a successful lock acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockGrant {
    /// Opaque holder token; required for renew and release.
    pub token: String,
    /// Monotonic fencing token for this acquisition.
    pub fencing_token: u64,
}

/// Per-key mutual exclusion backend.
///
/// Implementations must make `acquire` an atomic set-if-absent and scope
/// `renew`/`release` to the holder token (compare-then-act). Backend
/// connectivity failures surface as `Unavailable` and fail the current
/// operation; the manager treats them like a refused acquire.
#[async_trait]
pub trait LockBackend: Send + Sync + 'static {
    /// Acquires the lock for `site_id` with the given lease.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the lock is already held, `Unavailable` on
    /// backend failure.
    async fn acquire(&self, site_id: &SiteId, ttl: Duration) -> Result<LockGrant>;

    /// Extends the lease, only if `token` still holds the lock.
    ///
    /// # Errors
    ///
    /// Returns `PreconditionFailed` on token mismatch or absent lock.
    async fn renew(&self, site_id: &SiteId, token: &str, ttl: Duration) -> Result<()>;

    /// Releases the lock, only if `token` still holds it.
    ///
    /// Releasing a lock that no longer exists is `PreconditionFailed`,
    /// never silent success.
    ///
    /// # Errors
    ///
    /// Returns `PreconditionFailed` on token mismatch or absent lock.
    async fn release(&self, site_id: &SiteId, token: &str) -> Result<()>;

    /// Returns whether a live (unexpired) lock exists for `site_id`.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` on backend failure.
    async fn is_locked(&self, site_id: &SiteId) -> Result<bool>;
}

#[derive(Debug)]
struct LockEntry {
    token: String,
    expires_at: Instant,
}

impl LockEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

#[derive(Debug, Default)]
struct LockState {
    locks: HashMap<String, LockEntry>,
    fences: HashMap<String, u64>,
}

/// In-process lock backend.
///
/// Suitable for tests and single-node deployments; the [`LockBackend`]
/// trait is the seam for an external store. Expiry is evaluated lazily:
/// an expired entry behaves as absent for `acquire`/`is_locked`, and as a
/// token mismatch for `renew`/`release`.
#[derive(Debug, Default)]
pub struct MemoryLockBackend {
    state: Mutex<LockState>,
}

impl MemoryLockBackend {
    /// Creates an empty lock backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut LockState) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock().map_err(|_| Error::Internal {
            message: "lock state poisoned".into(),
        })?;
        f(&mut state)
    }
}

#[async_trait]
impl LockBackend for MemoryLockBackend {
    async fn acquire(&self, site_id: &SiteId, ttl: Duration) -> Result<LockGrant> {
        let key = site_id.as_str().to_string();
        self.with_state(|state| {
            if let Some(entry) = state.locks.get(&key) {
                if !entry.is_expired() {
                    return Err(Error::conflict(format!(
                        "lock already held for site {site_id}"
                    )));
                }
            }

            let token = Ulid::new().to_string();
            state.locks.insert(
                key.clone(),
                LockEntry {
                    token: token.clone(),
                    expires_at: Instant::now() + ttl,
                },
            );

            // The fence counter survives release and expiry; it totally
            // orders acquisitions for this site.
            let fence = state.fences.entry(key).or_insert(0);
            *fence += 1;

            Ok(LockGrant {
                token,
                fencing_token: *fence,
            })
        })
    }

    async fn renew(&self, site_id: &SiteId, token: &str, ttl: Duration) -> Result<()> {
        self.with_state(|state| match state.locks.get_mut(site_id.as_str()) {
            Some(entry) if !entry.is_expired() && entry.token == token => {
                entry.expires_at = Instant::now() + ttl;
                Ok(())
            }
            _ => Err(Error::precondition_failed(format!(
                "lock token mismatch or lock not held for site {site_id}"
            ))),
        })
    }

    async fn release(&self, site_id: &SiteId, token: &str) -> Result<()> {
        self.with_state(|state| {
            let live_holder = state
                .locks
                .get(site_id.as_str())
                .is_some_and(|entry| !entry.is_expired() && entry.token == token);
            if live_holder {
                state.locks.remove(site_id.as_str());
                Ok(())
            } else {
                Err(Error::precondition_failed(format!(
                    "lock token mismatch or lock not held for site {site_id}"
                )))
            }
        })
    }

    async fn is_locked(&self, site_id: &SiteId) -> Result<bool> {
        self.with_state(|state| {
            Ok(state
                .locks
                .get(site_id.as_str())
                .is_some_and(|entry| !entry.is_expired()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(name: &str) -> SiteId {
        SiteId::new(name).expect("site id")
    }

    const TTL: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn acquire_then_release() {
        let lock = MemoryLockBackend::new();
        let grant = lock.acquire(&site("S"), TTL).await.expect("acquire");
        assert_eq!(grant.fencing_token, 1);
        assert!(lock.is_locked(&site("S")).await.expect("check"));

        lock.release(&site("S"), &grant.token)
            .await
            .expect("release");
        assert!(!lock.is_locked(&site("S")).await.expect("check"));
    }

    #[tokio::test]
    async fn second_acquire_conflicts() {
        let lock = MemoryLockBackend::new();
        let _grant = lock.acquire(&site("S"), TTL).await.expect("acquire");
        let err = lock.acquire(&site("S"), TTL).await.unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[tokio::test]
    async fn unrelated_sites_do_not_contend() {
        let lock = MemoryLockBackend::new();
        lock.acquire(&site("a"), TTL).await.expect("acquire a");
        lock.acquire(&site("b"), TTL).await.expect("acquire b");
    }

    #[tokio::test]
    async fn fencing_tokens_increase_across_release() {
        let lock = MemoryLockBackend::new();
        let g1 = lock.acquire(&site("S"), TTL).await.expect("acquire 1");
        lock.release(&site("S"), &g1.token).await.expect("release");
        let g2 = lock.acquire(&site("S"), TTL).await.expect("acquire 2");
        assert_eq!(g1.fencing_token, 1);
        assert_eq!(g2.fencing_token, 2);
    }

    #[tokio::test]
    async fn expired_lock_can_be_taken_over_with_higher_fence() {
        let lock = MemoryLockBackend::new();
        let g1 = lock
            .acquire(&site("S"), Duration::from_millis(1))
            .await
            .expect("acquire 1");
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(!lock.is_locked(&site("S")).await.expect("check"));
        let g2 = lock.acquire(&site("S"), TTL).await.expect("takeover");
        assert!(g2.fencing_token > g1.fencing_token);

        // The stalled first holder cannot release the new holder's lock.
        let err = lock.release(&site("S"), &g1.token).await.unwrap_err();
        assert!(matches!(err, Error::PreconditionFailed { .. }));
        assert!(lock.is_locked(&site("S")).await.expect("check"));
    }

    #[tokio::test]
    async fn release_with_stale_token_rejected() {
        let lock = MemoryLockBackend::new();
        let _grant = lock.acquire(&site("S"), TTL).await.expect("acquire");
        let err = lock.release(&site("S"), "not-the-token").await.unwrap_err();
        assert!(matches!(err, Error::PreconditionFailed { .. }));
        // Active holder unaffected.
        assert!(lock.is_locked(&site("S")).await.expect("check"));
    }

    #[tokio::test]
    async fn release_of_absent_lock_is_not_silent() {
        let lock = MemoryLockBackend::new();
        let err = lock.release(&site("S"), "tok").await.unwrap_err();
        assert!(matches!(err, Error::PreconditionFailed { .. }));
    }

    #[tokio::test]
    async fn renew_extends_only_for_holder() {
        let lock = MemoryLockBackend::new();
        let grant = lock
            .acquire(&site("S"), Duration::from_millis(50))
            .await
            .expect("acquire");

        lock.renew(&site("S"), &grant.token, TTL)
            .await
            .expect("renew");
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(lock.is_locked(&site("S")).await.expect("still held"));

        let err = lock.renew(&site("S"), "stale", TTL).await.unwrap_err();
        assert!(matches!(err, Error::PreconditionFailed { .. }));
    }

    #[tokio::test]
    async fn renew_after_expiry_rejected() {
        let lock = MemoryLockBackend::new();
        let grant = lock
            .acquire(&site("S"), Duration::from_millis(1))
            .await
            .expect("acquire");
        tokio::time::sleep(Duration::from_millis(10)).await;
        let err = lock.renew(&site("S"), &grant.token, TTL).await.unwrap_err();
        assert!(matches!(err, Error::PreconditionFailed { .. }));
    }
}
