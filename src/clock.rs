//! Wall-clock abstraction so window timing can be faked in tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

/// Source of the current time as fractional seconds since the Unix epoch.
///
/// Rate state is persisted, so the clock must be a wall clock rather than
/// a monotonic one: a window opened before a restart is still honored after.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> f64;
}

/// Wall clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        Utc::now().timestamp_micros() as f64 / 1_000_000.0
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same instant, so a test can hold one handle and give
/// another to a limiter.
#[derive(Debug, Clone)]
pub struct ManualClock {
    bits: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock frozen at `start` epoch seconds.
    pub fn new(start: f64) -> Self {
        Self {
            bits: Arc::new(AtomicU64::new(start.to_bits())),
        }
    }

    /// Jump to an absolute time.
    pub fn set(&self, now: f64) {
        self.bits.store(now.to_bits(), Ordering::SeqCst);
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut current = self.bits.load(Ordering::SeqCst);
        loop {
            let next = (f64::from_bits(current) + by.as_secs_f64()).to_bits();
            match self
                .bits
                .compare_exchange_weak(current, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(1_000_000.0)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}
