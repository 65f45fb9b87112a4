use crate::client::PlanCache;
use crate::error::Result;
use crate::plan::Plan;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// A serialized plan ready to be written to the cache.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: Vec<u8>,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn for_plan(key: impl Into<String>, plan: &Plan, ttl: Duration) -> Result<Self> {
        Ok(Self {
            key: key.into(),
            value: serde_json::to_vec(plan)?,
            ttl,
        })
    }
}

struct CachedValue {
    value: Vec<u8>,
    stored_at: Instant,
    ttl: Duration,
}

impl CachedValue {
    fn is_fresh(&self) -> bool {
        self.stored_at.elapsed() < self.ttl
    }
}

/// Process-local TTL cache. Used when no cache service is configured.
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CachedValue>>,
    max_entries: usize,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn invalidate(&self, key: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Remove expired entries, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, v| v.is_fresh());
        before - entries.len()
    }
}

#[async_trait]
impl PlanCache for MemoryCache {
    async fn get(&self, key: &str, _timeout: Duration) -> Result<Option<Vec<u8>>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            Some(cached) if cached.is_fresh() => Ok(Some(cached.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration, _timeout: Duration) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if !entries.contains_key(key) && entries.len() >= self.max_entries {
            entries.retain(|_, v| v.is_fresh());
            if entries.len() >= self.max_entries {
                // Evict the oldest entry
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, v)| v.stored_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }
        entries.insert(
            key.to_string(),
            CachedValue {
                value,
                stored_at: Instant::now(),
                ttl,
            },
        );
        Ok(())
    }
}
