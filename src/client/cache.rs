use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use dashmap::DashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub data: T,
    pub timestamp: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Shared response cache keyed by request target. Writes are last-write-wins.
#[derive(Debug, Clone)]
pub struct ResponseCache<T> {
    entries: Arc<DashMap<String, CacheEntry<T>>>,
}

impl<T: Clone> Default for ResponseCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> ResponseCache<T> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    pub fn insert(&self, key: impl Into<String>, data: T, ttl: Duration) {
        let timestamp = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| timestamp.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        self.entries.insert(
            key.into(),
            CacheEntry {
                data,
                timestamp,
                expires_at,
            },
        );
    }

    pub fn get_fresh(&self, key: &str) -> Option<CacheEntry<T>> {
        let now = Utc::now();
        self.entries
            .get(key)
            .filter(|entry| entry.is_fresh_at(now))
            .map(|entry| entry.value().clone())
    }

    /// Returns the stored entry whether or not it has expired.
    pub fn get_any(&self, key: &str) -> Option<CacheEntry<T>> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
