//! Error types for Ratewarden.

use thiserror::Error;

use crate::ratelimit::RateKey;

/// Main error type for Ratewarden operations.
#[derive(Error, Debug)]
pub enum RatewardenError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A guarded call was denied by its rate limiter.
    ///
    /// This is the only error raised for a denial. The engines themselves
    /// report denial as `Ok(false)`.
    #[error("Rate limit exceeded for `{name}` (key: {key})")]
    RateLimitExceeded {
        /// Identity of the guarded callable
        name: String,
        /// The key whose quota is exhausted
        key: RateKey,
    },

    /// Backing store errors
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Rate state (de)serialization errors
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RatewardenError {
    /// Whether this error is a rate limit denial rather than a failure.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RatewardenError::RateLimitExceeded { .. })
    }

    /// The denied key, if this error is a rate limit denial.
    pub fn denied_key(&self) -> Option<&RateKey> {
        match self {
            RatewardenError::RateLimitExceeded { key, .. } => Some(key),
            _ => None,
        }
    }
}

/// Result type alias for Ratewarden operations.
pub type Result<T> = std::result::Result<T, RatewardenError>;
