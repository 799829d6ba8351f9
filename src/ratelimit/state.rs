//! Per-key rate state and the fixed-window transition.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::limiter::LimitConfig;

/// The record kept for every key that has been checked.
///
/// Serialized field names are part of the persisted layout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateState {
    /// Epoch seconds at which the current window began
    pub start_time: f64,
    /// Requests admitted in the current window
    pub num_requests: u64,
}

/// Outcome of applying one check to a key's state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    /// The request is admitted and the key moves to the contained state.
    Allowed(RateState),
    /// The request is denied. Stored state stays as it was.
    Denied,
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed(_))
    }
}

/// Read-only view of a key's budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quota {
    /// Maximum requests per window
    pub limit: u64,
    /// Requests still admissible in the current window
    pub remaining: u64,
    /// Time until the current window ends; zero when no window is open
    pub reset_after: Duration,
}

impl RateState {
    pub fn new(start_time: f64, num_requests: u64) -> Self {
        Self {
            start_time,
            num_requests,
        }
    }

    /// The state of a window opened by a single request at `now`.
    pub fn fresh(now: f64) -> Self {
        Self::new(now, 1)
    }

    /// Whether the window has elapsed at `now`.
    ///
    /// A check landing exactly on the boundary opens a new window.
    pub fn is_expired(&self, now: f64, window: Duration) -> bool {
        now - self.start_time >= window.as_secs_f64()
    }

    /// Requests still admissible under `limit`.
    pub fn remaining(&self, limit: u64) -> u64 {
        limit.saturating_sub(self.num_requests)
    }

    /// Time left in the window at `now`.
    pub fn reset_after(&self, now: f64, window: Duration) -> Duration {
        let left = self.start_time + window.as_secs_f64() - now;
        if left > 0.0 {
            Duration::try_from_secs_f64(left).unwrap_or(Duration::MAX)
        } else {
            Duration::ZERO
        }
    }
}

/// Apply one check at `now` to the previous state of a key.
pub fn admit(previous: Option<RateState>, now: f64, config: &LimitConfig) -> Admission {
    match previous {
        None => Admission::Allowed(RateState::fresh(now)),
        Some(state) if state.is_expired(now, config.time_window) => {
            Admission::Allowed(RateState::fresh(now))
        }
        Some(state) if state.num_requests < config.max_requests => {
            Admission::Allowed(RateState::new(state.start_time, state.num_requests + 1))
        }
        Some(_) => Admission::Denied,
    }
}

/// Summarize a key's budget at `now` without changing it.
pub fn quota(state: Option<RateState>, now: f64, config: &LimitConfig) -> Quota {
    match state {
        Some(state) if !state.is_expired(now, config.time_window) => Quota {
            limit: config.max_requests,
            remaining: state.remaining(config.max_requests),
            reset_after: state.reset_after(now, config.time_window),
        },
        _ => Quota {
            limit: config.max_requests,
            remaining: config.max_requests,
            reset_after: Duration::ZERO,
        },
    }
}
