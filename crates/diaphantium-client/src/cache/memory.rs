use dashmap::DashMap;
use time::{Duration, OffsetDateTime};

use super::stats::CacheStats;
use crate::types::CacheEntry;

/// TTL-bounded in-process cache keyed by script URL.
#[derive(Debug)]
pub struct MemoryCache<T> {
    entries: DashMap<String, CacheEntry<T>>,
    ttl: Duration,
    stats: CacheStats,
}

impl<T: Clone> MemoryCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            stats: CacheStats::new(),
        }
    }

    pub fn get(&self, url: &str) -> Option<T> {
        self.get_with_size(url, |_| 0)
    }

    /// Same as [`MemoryCache::get`], also counting the bytes handed out.
    /// An expired entry is dropped on the spot; bundles are large.
    pub fn get_with_size(&self, url: &str, size_of: impl FnOnce(&T) -> usize) -> Option<T> {
        let now = OffsetDateTime::now_utc();
        let lookup = self.entries.get(url).map(|entry| {
            (now - entry.stored_at <= self.ttl)
                .then(|| (entry.value.clone(), size_of(&entry.value)))
        });

        match lookup {
            Some(Some((value, size))) => {
                self.stats.record_hit();
                self.stats.record_bytes(size as u64);
                Some(value)
            }
            Some(None) => {
                self.remove(url);
                self.stats.record_miss();
                None
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    pub fn insert(&self, url: impl Into<String>, value: T) {
        let entry = CacheEntry {
            value,
            stored_at: OffsetDateTime::now_utc(),
        };
        self.entries.insert(url.into(), entry);
        self.stats.set_entry_count(self.entries.len());
    }

    pub fn remove(&self, url: &str) {
        self.entries.remove(url);
        self.stats.set_entry_count(self.entries.len());
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.stats.set_entry_count(0);
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}
