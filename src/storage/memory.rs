//! In-process rate state table.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::Storage;
use crate::error::Result;
use crate::ratelimit::{RateKey, RateState};

/// Rate state held in a process-local hash map.
///
/// Clones share the same table.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    states: Arc<RwLock<HashMap<RateKey, RateState>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.read().is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &RateKey) -> Result<Option<RateState>> {
        Ok(self.states.read().get(key).copied())
    }

    async fn set(&self, key: &RateKey, state: RateState) -> Result<()> {
        self.states.write().insert(key.clone(), state);
        Ok(())
    }

    async fn remove(&self, key: &RateKey) -> Result<()> {
        self.states.write().remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.states.write().clear();
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<RateKey>> {
        Ok(self.states.read().keys().cloned().collect())
    }
}
