//! Limiter trait for abstracting the locking and non-locking engines.

use async_trait::async_trait;

use super::key::RateKey;
use super::limiter::{LimitConfig, RateLimiter};
use super::locked::LockedRateLimiter;
use crate::error::Result;

/// Trait for rate limiter implementations.
///
/// This trait abstracts over both [`RateLimiter`] and [`LockedRateLimiter`]
/// so that guards and embedders can work with either.
#[async_trait]
pub trait Limiter: Send + Sync {
    /// Decide whether the next request for `key` is admitted, recording it if so.
    async fn check_limit(&self, key: &RateKey) -> Result<bool>;

    /// Forget `key`, so its next check starts a fresh window.
    async fn reset(&self, key: &RateKey) -> Result<()>;

    /// The limit being enforced.
    fn config(&self) -> &LimitConfig;
}

#[async_trait]
impl Limiter for RateLimiter {
    async fn check_limit(&self, key: &RateKey) -> Result<bool> {
        self.check_key(key).await
    }

    async fn reset(&self, key: &RateKey) -> Result<()> {
        self.reset_key(key).await
    }

    fn config(&self) -> &LimitConfig {
        RateLimiter::config(self)
    }
}

#[async_trait]
impl Limiter for LockedRateLimiter {
    async fn check_limit(&self, key: &RateKey) -> Result<bool> {
        self.check_key(key).await
    }

    async fn reset(&self, key: &RateKey) -> Result<()> {
        self.reset_key(key).await
    }

    fn config(&self) -> &LimitConfig {
        LockedRateLimiter::config(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use std::sync::Arc;
    use std::time::Duration;

    fn engines() -> Vec<Arc<dyn Limiter>> {
        let config = LimitConfig::new(2, Duration::from_secs(60)).unwrap();
        vec![
            Arc::new(RateLimiter::with_config(Arc::new(MemoryStorage::new()), config)),
            Arc::new(LockedRateLimiter::with_config(Arc::new(MemoryStorage::new()), config)),
        ]
    }

    #[tokio::test]
    async fn test_engines_agree_through_trait() {
        for limiter in engines() {
            let key = RateKey::from("key");
            assert_eq!(limiter.config().max_requests, 2);

            assert!(limiter.check_limit(&key).await.unwrap());
            assert!(limiter.check_limit(&key).await.unwrap());
            assert!(!limiter.check_limit(&key).await.unwrap());

            limiter.reset(&key).await.unwrap();
            assert!(limiter.check_limit(&key).await.unwrap());
        }
    }
}
