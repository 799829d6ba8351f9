//! Rate limiting logic and state management.
//!
//! Both engines implement the same fixed-window counter: a key's first
//! request opens a window, up to `max_requests` requests are admitted within
//! it, and the first request at or after `start + time_window` opens the next
//! one.

mod backend;
mod key;
mod limiter;
mod locked;
mod state;

pub use backend::Limiter;
pub use key::RateKey;
pub use limiter::{LimitConfig, RateLimiter};
pub use locked::LockedRateLimiter;
pub use state::{admit, Admission, Quota, RateState};
