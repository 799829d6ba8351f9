//! Ratewarden - Fixed-Window Rate Limiting
//!
//! This crate decides whether the next action for a key (a client, a route,
//! any identity) fits a fixed quota within a time window, and records it if
//! so. State lives behind a pluggable [`storage::Storage`] so it can be kept
//! in memory or persisted in SQLite, and the
//! [`ratelimit::LockedRateLimiter`] keeps check-and-record atomic per key
//! for concurrent callers.

pub mod clock;
pub mod config;
pub mod error;
pub mod guard;
pub mod ratelimit;
pub mod storage;

pub use error::{RatewardenError, Result};
pub use guard::{GuardBuilder, Guarded, KeyedArgs};
pub use ratelimit::{LimitConfig, Limiter, LockedRateLimiter, RateKey, RateLimiter, RateState};
