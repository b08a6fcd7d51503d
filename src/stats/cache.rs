//! Key-value cache collaborator for precomputed aggregates.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error_handling::types::StatsError;

/// Key under which the latest snapshot is stored.
pub const SNAPSHOT_KEY: &str = "stats:snapshot";

#[async_trait]
pub trait StatsCache: Send + Sync {
    /// `Ok(None)` on a miss or an expired entry.
    async fn get(&self, key: &str) -> Result<Option<String>, StatsError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), StatsError>;
}

/// Process-local cache with per-entry expiry.
#[derive(Default)]
pub struct InMemoryStatsCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl InMemoryStatsCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatsCache for InMemoryStatsCache {
    async fn get(&self, key: &str) -> Result<Option<String>, StatsError> {
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            Some((value, expires)) if *expires > Instant::now() => {
                return Ok(Some(value.clone()))
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), StatsError> {
        self.entries
            .lock()
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }
}
