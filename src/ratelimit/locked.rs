//! Fixed-window rate limiter with per-key locking.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

use super::key::RateKey;
use super::limiter::{LimitConfig, RateLimiter};
use super::state::Quota;
use crate::clock::Clock;
use crate::error::Result;
use crate::storage::Storage;

/// Fixed-window rate limiter safe to share between concurrent tasks.
///
/// Checks on the same key are serialized behind a per-key async mutex, so
/// each one sees the fully applied effect of the checks before it. Checks on
/// different keys never wait on each other.
///
/// The guarantee covers one limiter instance. Two instances sharing a storage
/// do not coordinate.
pub struct LockedRateLimiter {
    inner: RateLimiter,
    /// One lock per key ever checked or reset. Entries are never evicted.
    locks: DashMap<RateKey, Arc<Mutex<()>>>,
}

impl LockedRateLimiter {
    /// Create a rate limiter admitting `max_requests` per `time_window` for every key.
    pub fn new(storage: Arc<dyn Storage>, max_requests: u64, time_window: Duration) -> Result<Self> {
        Ok(Self::from_limiter(RateLimiter::new(
            storage,
            max_requests,
            time_window,
        )?))
    }

    /// Create a rate limiter from an already validated configuration.
    pub fn with_config(storage: Arc<dyn Storage>, config: LimitConfig) -> Self {
        Self::from_limiter(RateLimiter::with_config(storage, config))
    }

    fn from_limiter(inner: RateLimiter) -> Self {
        Self {
            inner,
            locks: DashMap::new(),
        }
    }

    /// Replace the wall clock, mainly for tests.
    pub fn with_clock(self, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: self.inner.with_clock(clock),
            locks: self.locks,
        }
    }

    /// Get the lock for `key`, creating it if this is the first access.
    ///
    /// Two callers racing on a new key get the same lock. The map guard is
    /// released before returning, so it is never held across an await.
    fn lock_for(&self, key: &RateKey) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.clone())
            .or_insert_with(|| {
                debug!(key = %key, "Creating rate limit lock");
                Arc::new(Mutex::new(()))
            })
            .clone()
    }

    /// Decide whether the next request for `key` is admitted, recording it if so.
    ///
    /// Waits for any in-flight check or reset of the same key. Dropping the
    /// returned future while it waits leaves storage untouched; dropping it
    /// after the lock is taken releases the lock.
    pub async fn check_limit(&self, key: impl Into<RateKey>) -> Result<bool> {
        self.check_key(&key.into()).await
    }

    /// Shorthand for [`check_limit`](Self::check_limit).
    pub async fn call(&self, key: impl Into<RateKey>) -> Result<bool> {
        self.check_key(&key.into()).await
    }

    pub(crate) async fn check_key(&self, key: &RateKey) -> Result<bool> {
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;
        self.inner.check_key(key).await
    }

    /// Forget `key`, serialized against concurrent checks of the same key.
    pub async fn reset(&self, key: impl Into<RateKey>) -> Result<()> {
        self.reset_key(&key.into()).await
    }

    pub(crate) async fn reset_key(&self, key: &RateKey) -> Result<()> {
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;
        self.inner.reset_key(key).await
    }

    /// Forget every key in the underlying storage.
    ///
    /// Not serialized against in-flight checks; a check racing with this may
    /// write its state back after the clear.
    pub async fn reset_all(&self) -> Result<()> {
        self.inner.reset_all().await
    }

    /// Current budget of `key`, without recording a request.
    pub async fn quota(&self, key: impl Into<RateKey>) -> Result<Quota> {
        self.inner.quota(key).await
    }

    /// Number of keys that have a lock.
    pub fn tracked_locks(&self) -> usize {
        self.locks.len()
    }

    pub fn config(&self) -> &LimitConfig {
        self.inner.config()
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        self.inner.storage()
    }
}

impl std::fmt::Debug for LockedRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockedRateLimiter")
            .field("inner", &self.inner)
            .field("tracked_locks", &self.locks.len())
            .finish()
    }
}
