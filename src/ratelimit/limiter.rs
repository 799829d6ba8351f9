//! Non-locking fixed-window rate limiter.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use super::key::RateKey;
use super::state::{self, Admission, Quota};
use crate::clock::{Clock, SystemClock};
use crate::error::{RatewardenError, Result};
use crate::storage::Storage;

/// Quota applied by a limiter: `max_requests` per `time_window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitConfig {
    /// Maximum requests admitted in one window
    pub max_requests: u64,
    /// Length of a window
    pub time_window: Duration,
}

impl LimitConfig {
    /// Validate and build a limit configuration.
    ///
    /// Both values must be positive.
    pub fn new(max_requests: u64, time_window: Duration) -> Result<Self> {
        if max_requests == 0 {
            return Err(RatewardenError::Config(
                "max_requests must be positive".to_string(),
            ));
        }
        if time_window.is_zero() {
            return Err(RatewardenError::Config(
                "time_window must be positive".to_string(),
            ));
        }

        Ok(Self {
            max_requests,
            time_window,
        })
    }

    /// Build a configuration from a window given in (possibly fractional) seconds.
    pub fn from_secs_f64(max_requests: u64, time_window_secs: f64) -> Result<Self> {
        let time_window = Duration::try_from_secs_f64(time_window_secs).map_err(|e| {
            RatewardenError::Config(format!("invalid time_window {time_window_secs}: {e}"))
        })?;
        Self::new(max_requests, time_window)
    }
}

/// Fixed-window rate limiter without synchronization of its own.
///
/// Each check reads the key's state, decides, and writes the new state back.
/// Nothing makes that sequence atomic, so two concurrent checks on the same
/// key may both be admitted past the limit. Use it when access per key is
/// already serialized, and [`LockedRateLimiter`](super::LockedRateLimiter)
/// otherwise.
pub struct RateLimiter {
    storage: Arc<dyn Storage>,
    config: LimitConfig,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a rate limiter admitting `max_requests` per `time_window` for every key.
    pub fn new(storage: Arc<dyn Storage>, max_requests: u64, time_window: Duration) -> Result<Self> {
        Ok(Self::with_config(
            storage,
            LimitConfig::new(max_requests, time_window)?,
        ))
    }

    /// Create a rate limiter from an already validated configuration.
    pub fn with_config(storage: Arc<dyn Storage>, config: LimitConfig) -> Self {
        Self {
            storage,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the wall clock, mainly for tests.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Decide whether the next request for `key` is admitted, recording it if so.
    ///
    /// Returns `Ok(false)` on denial. Errors only come from storage and abort
    /// the check without a decision.
    pub async fn check_limit(&self, key: impl Into<RateKey>) -> Result<bool> {
        self.check_key(&key.into()).await
    }

    /// Shorthand for [`check_limit`](Self::check_limit).
    pub async fn call(&self, key: impl Into<RateKey>) -> Result<bool> {
        self.check_key(&key.into()).await
    }

    pub(crate) async fn check_key(&self, key: &RateKey) -> Result<bool> {
        let now = self.clock.now();
        let previous = self.storage.get(key).await?;

        trace!(
            key = %key,
            now = now,
            state = ?previous,
            "Checking rate limit"
        );

        match state::admit(previous, now, &self.config) {
            Admission::Allowed(next) => {
                if next.num_requests == 1 && previous.is_some() {
                    debug!(key = %key, "Rate limit window elapsed, starting new window");
                }
                self.storage.set(key, next).await?;
                Ok(true)
            }
            Admission::Denied => {
                debug!(
                    key = %key,
                    limit = self.config.max_requests,
                    "Rate limit exceeded"
                );
                Ok(false)
            }
        }
    }

    /// Forget `key`, so its next check starts a fresh window.
    pub async fn reset(&self, key: impl Into<RateKey>) -> Result<()> {
        self.reset_key(&key.into()).await
    }

    pub(crate) async fn reset_key(&self, key: &RateKey) -> Result<()> {
        debug!(key = %key, "Resetting rate limit");
        self.storage.remove(key).await
    }

    /// Forget every key in the underlying storage.
    ///
    /// This also affects other limiters sharing the storage.
    pub async fn reset_all(&self) -> Result<()> {
        debug!("Resetting all rate limits");
        self.storage.clear().await
    }

    /// Current budget of `key`, without recording a request.
    pub async fn quota(&self, key: impl Into<RateKey>) -> Result<Quota> {
        let key = key.into();
        let current = self.storage.get(&key).await?;
        Ok(state::quota(current, self.clock.now(), &self.config))
    }

    /// The limit this rate limiter enforces.
    pub fn config(&self) -> &LimitConfig {
        &self.config
    }

    /// The storage this rate limiter reads and writes.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ratelimit::RateState;
    use crate::storage::{MemoryStorage, SqliteStorage};
    use async_trait::async_trait;
    use tokio_test::{assert_err, assert_ok};

    /// Reads succeed, every write fails.
    struct FailingSet(MemoryStorage);

    #[async_trait]
    impl Storage for FailingSet {
        async fn get(&self, key: &RateKey) -> Result<Option<RateState>> {
            self.0.get(key).await
        }

        async fn set(&self, _key: &RateKey, _state: RateState) -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full").into())
        }

        async fn remove(&self, key: &RateKey) -> Result<()> {
            self.0.remove(key).await
        }

        async fn clear(&self) -> Result<()> {
            self.0.clear().await
        }

        async fn keys(&self) -> Result<Vec<RateKey>> {
            self.0.keys().await
        }
    }

    fn limiter(max_requests: u64, secs: u64) -> (RateLimiter, ManualClock, MemoryStorage) {
        let storage = MemoryStorage::new();
        let clock = ManualClock::default();
        let limiter = RateLimiter::new(
            Arc::new(storage.clone()),
            max_requests,
            Duration::from_secs(secs),
        )
        .unwrap()
        .with_clock(Arc::new(clock.clone()));
        (limiter, clock, storage)
    }

    #[test]
    fn test_rejects_misconfiguration() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        assert_err!(RateLimiter::new(storage.clone(), 0, Duration::from_secs(1)));
        assert_err!(RateLimiter::new(storage, 3, Duration::ZERO));
        assert_err!(LimitConfig::from_secs_f64(3, -1.0));
        assert_err!(LimitConfig::from_secs_f64(3, f64::NAN));
        assert_ok!(LimitConfig::from_secs_f64(3, 0.5));
    }

    #[tokio::test]
    async fn test_admits_up_to_limit_then_denies() {
        for (max_requests, secs) in [(3, 3), (10, 5), (5, 4)] {
            let (limiter, clock, _) = limiter(max_requests, secs);

            for _ in 0..max_requests {
                assert!(limiter.check_limit("key").await.unwrap());
                clock.advance(Duration::from_millis(10));
            }
            assert!(!limiter.check_limit("key").await.unwrap());
            assert!(!limiter.call("key").await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_window_elapses() {
        // m=3, w=3s: calls 1-3 pass, call 4 is denied, call 5 after 3s passes.
        let (limiter, clock, storage) = limiter(3, 3);
        let start = clock.now();

        for _ in 0..3 {
            assert!(limiter.check_limit("key").await.unwrap());
        }
        assert!(!limiter.check_limit("key").await.unwrap());

        clock.set(start + 3.0);
        assert!(limiter.check_limit("key").await.unwrap());
        assert_eq!(
            storage.get(&"key".into()).await.unwrap(),
            Some(RateState::new(start + 3.0, 1))
        );
    }

    #[tokio::test]
    async fn test_just_before_boundary_is_denied() {
        let (limiter, clock, _) = limiter(1, 3);
        let start = clock.now();

        assert!(limiter.check_limit("key").await.unwrap());
        clock.set(start + 2.999);
        assert!(!limiter.check_limit("key").await.unwrap());
        clock.set(start + 3.0);
        assert!(limiter.check_limit("key").await.unwrap());
    }

    #[tokio::test]
    async fn test_denial_does_not_mutate_storage() {
        let (limiter, clock, storage) = limiter(2, 10);
        let start = clock.now();

        limiter.check_limit("key").await.unwrap();
        limiter.check_limit("key").await.unwrap();
        let before = storage.get(&"key".into()).await.unwrap();

        clock.advance(Duration::from_secs(1));
        assert!(!limiter.check_limit("key").await.unwrap());
        assert_eq!(storage.get(&"key".into()).await.unwrap(), before);
        assert_eq!(before, Some(RateState::new(start, 2)));
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let cases: &[(u64, &[&str], &str, bool)] = &[
            (5, &["1", "1", "2", "1", "1", "2", "1"], "1", false),
            (5, &["1", "1", "2", "1", "1", "2", "1"], "2", true),
            (3, &["a", "b", "a", "b", "c", "a", "b"], "a", false),
            (3, &["a", "b", "a", "b", "c", "a", "b"], "c", true),
            (4, &["a", "b", "a", "b", "c", "a", "b", "a", "c"], "b", true),
        ];

        for (max_requests, sequence, key, expected) in cases {
            let (limiter, _, _) = limiter(*max_requests, 10);
            for k in *sequence {
                assert!(limiter.check_limit(*k).await.unwrap());
            }
            assert_eq!(limiter.check_limit(*key).await.unwrap(), *expected);
        }
    }

    #[tokio::test]
    async fn test_integer_keys() {
        let (limiter, _, storage) = limiter(1, 10);
        assert!(limiter.check_limit(7).await.unwrap());
        assert!(!limiter.check_limit("7").await.unwrap());
        assert!(limiter.check_limit(8u64).await.unwrap());
        assert_eq!(storage.len(), 2);
    }

    #[tokio::test]
    async fn test_reset_restores_fresh_key() {
        let (limiter, _, storage) = limiter(3, 10);
        for _ in 0..3 {
            limiter.check_limit("key").await.unwrap();
        }
        assert!(!limiter.check_limit("key").await.unwrap());

        limiter.reset("key").await.unwrap();
        assert!(storage.is_empty());
        assert!(limiter.check_limit("key").await.unwrap());

        // Resetting an unknown key is fine.
        limiter.reset("unknown").await.unwrap();
    }

    #[tokio::test]
    async fn test_reset_all() {
        let (limiter, _, storage) = limiter(1, 10);
        limiter.check_limit("a").await.unwrap();
        limiter.check_limit("b").await.unwrap();

        limiter.reset_all().await.unwrap();
        assert!(storage.is_empty());
        assert!(limiter.check_limit("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_quota_does_not_record() {
        let (limiter, clock, _) = limiter(4, 10);
        limiter.check_limit("key").await.unwrap();
        clock.advance(Duration::from_secs(4));

        let quota = limiter.quota("key").await.unwrap();
        assert_eq!(quota.limit, 4);
        assert_eq!(quota.remaining, 3);
        assert_eq!(quota.reset_after, Duration::from_secs(6));

        assert_eq!(limiter.quota("key").await.unwrap().remaining, 3);
    }

    #[tokio::test]
    async fn test_limiters_share_storage() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let first = RateLimiter::new(storage.clone(), 2, Duration::from_secs(60)).unwrap();
        let second = RateLimiter::new(storage.clone(), 2, Duration::from_secs(60)).unwrap();

        assert!(first.check_limit("shared").await.unwrap());
        assert!(second.check_limit("shared").await.unwrap());
        assert!(!first.check_limit("shared").await.unwrap());
        assert!(Arc::ptr_eq(first.storage(), &storage));
    }

    #[tokio::test]
    async fn test_with_sqlite_storage() {
        let storage = Arc::new(SqliteStorage::open_in_memory("storage").await.unwrap());
        let clock = ManualClock::default();
        let limiter = RateLimiter::new(storage.clone(), 10, Duration::from_secs(1))
            .unwrap()
            .with_clock(Arc::new(clock.clone()));

        let results: Vec<bool> = {
            let mut results = Vec::new();
            for _ in 0..12 {
                results.push(limiter.check_limit("client-key").await.unwrap());
            }
            results
        };
        assert_eq!(results.iter().filter(|allowed| **allowed).count(), 10);
        assert!(!results[10] && !results[11]);

        clock.advance(Duration::from_secs(1));
        assert!(limiter.check_limit("client-key").await.unwrap());
    }

    #[tokio::test]
    async fn test_storage_errors_propagate() {
        let storage = Arc::new(SqliteStorage::open_in_memory("storage").await.unwrap());
        let limiter = RateLimiter::new(storage.clone(), 1, Duration::from_secs(1)).unwrap();

        storage.close().await;
        let err = limiter.check_limit("key").await.unwrap_err();
        assert!(matches!(err, RatewardenError::Storage(_)));
    }

    #[tokio::test]
    async fn test_failed_write_aborts_check() {
        let storage = MemoryStorage::new();
        let limiter = RateLimiter::new(
            Arc::new(FailingSet(storage.clone())),
            3,
            Duration::from_secs(60),
        )
        .unwrap();

        for _ in 0..2 {
            let err = limiter.check_limit("key").await.unwrap_err();
            match err {
                RatewardenError::Io(e) => assert_eq!(e.to_string(), "disk full"),
                other => panic!("unexpected error: {other}"),
            }
        }
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_quota_with_far_future_record() {
        let (limiter, _, storage) = limiter(5, 10);
        storage
            .set(&"k".into(), RateState::new(1e300, 1))
            .await
            .unwrap();

        let quota = limiter.quota("k").await.unwrap();
        assert_eq!(quota.remaining, 4);
        assert_eq!(quota.reset_after, Duration::MAX);
    }

    #[tokio::test]
    async fn test_real_time_window() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let limiter = RateLimiter::new(storage, 2, Duration::from_millis(200)).unwrap();

        assert!(limiter.check_limit("key").await.unwrap());
        assert!(limiter.check_limit("key").await.unwrap());
        assert!(!limiter.check_limit("key").await.unwrap());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(limiter.check_limit("key").await.unwrap());
    }

    #[test]
    fn test_blocking_caller() {
        let (limiter, _, _) = limiter(1, 10);
        assert!(tokio_test::block_on(limiter.check_limit("sync")).unwrap());
        assert!(!tokio_test::block_on(limiter.check_limit("sync")).unwrap());
    }
}
