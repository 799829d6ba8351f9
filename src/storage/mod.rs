//! Storage backends for rate state.
//!
//! The limiters treat storage as an opaque key/value service and never
//! cache records themselves. Two backends are provided:
//! - [`MemoryStorage`]: a process-local table, lost on restart.
//! - [`SqliteStorage`]: a named table inside a SQLite file.

mod memory;
mod sqlite;

use async_trait::async_trait;

use crate::error::Result;
use crate::ratelimit::{RateKey, RateState};

pub use memory::MemoryStorage;
pub use sqlite::{SqliteOptions, SqliteStorage, DEFAULT_TABLE};

/// Trait for rate state persistence.
///
/// Implementations need not make a `get` followed by a `set` atomic; the
/// [`LockedRateLimiter`](crate::ratelimit::LockedRateLimiter) serializes
/// that sequence per key when it matters.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Fetch the state for a key, or `None` if the key is not tracked.
    async fn get(&self, key: &RateKey) -> Result<Option<RateState>>;

    /// Insert or overwrite the state for a key.
    ///
    /// The write is visible to every subsequent `get` once this returns.
    async fn set(&self, key: &RateKey, state: RateState) -> Result<()>;

    /// Drop the state for a key. Removing an unknown key is not an error.
    async fn remove(&self, key: &RateKey) -> Result<()>;

    /// Drop every tracked key.
    async fn clear(&self) -> Result<()>;

    /// All tracked keys, in no particular order.
    async fn keys(&self) -> Result<Vec<RateKey>>;
}
