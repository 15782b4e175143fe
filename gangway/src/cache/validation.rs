//! Package validation cache

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::validator::ValidationResult;

/// Cache key: runtime name plus the trimmed identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub runtime: String,
    pub identifier: String,
}

impl CacheKey {
    pub fn new(runtime: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            runtime: runtime.into(),
            identifier: identifier.into(),
        }
    }
}

/// Storage for definitive validation results
pub trait ValidationCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<ValidationResult>;

    fn put(&self, key: CacheKey, result: ValidationResult);

    /// Drop one entry; true if it was present
    fn invalidate(&self, key: &CacheKey) -> bool;

    fn clear(&self);
}

#[derive(Debug, Clone)]
struct CacheEntry {
    result: ValidationResult,
    cached_at: Instant,
}

/// In-memory validation cache with a TTL and a capacity bound
pub struct InMemoryValidationCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    capacity: usize,
    ttl: Duration,
}

impl InMemoryValidationCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryValidationCache {
    fn default() -> Self {
        Self::new(1000, Duration::from_secs(3600))
    }
}

impl ValidationCache for InMemoryValidationCache {
    fn get(&self, key: &CacheKey) -> Option<ValidationResult> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(key)
            .filter(|entry| entry.cached_at.elapsed() < self.ttl)
            .map(|entry| entry.result.clone())
    }

    fn put(&self, key: CacheKey, result: ValidationResult) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());

        // Evict oldest if at capacity
        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, e)| e.cached_at)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key,
            CacheEntry {
                result,
                cached_at: Instant::now(),
            },
        );
    }

    fn invalidate(&self, key: &CacheKey) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(key).is_some()
    }

    fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.clear();
    }
}
