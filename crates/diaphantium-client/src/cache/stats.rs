use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Lock-free counters describing how a script cache tier is performing.
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Lookups answered from this tier
    pub hits: AtomicUsize,
    /// Lookups that fell through to the next tier or the network
    pub misses: AtomicUsize,
    /// Script bytes returned from this tier
    pub bytes_served: AtomicU64,
    pub entry_count: AtomicUsize,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_bytes(&self, bytes: u64) {
        self.bytes_served.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_entry_count(&self, count: usize) {
        self.entry_count.store(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            bytes_served: self.bytes_served.load(Ordering::Relaxed),
            entry_count: self.entry_count.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: usize,
    pub misses: usize,
    pub bytes_served: u64,
    pub entry_count: usize,
}

impl CacheStatsSnapshot {
    /// Hit rate as a percentage (0.0 - 100.0)
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        (self.hits as f64 / total as f64) * 100.0
    }
}

/// Statistics for both tiers of the script cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CombinedCacheStats {
    pub memory: CacheStatsSnapshot,
    pub disk: CacheStatsSnapshot,
}

impl CombinedCacheStats {
    pub fn total(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.memory.hits + self.disk.hits,
            misses: self.memory.misses + self.disk.misses,
            bytes_served: self.memory.bytes_served + self.disk.bytes_served,
            entry_count: self.memory.entry_count + self.disk.entry_count,
        }
    }
}
