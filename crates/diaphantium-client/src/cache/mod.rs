pub mod disk;
pub mod memory;
pub mod stats;

pub use disk::DiskCache;
pub use memory::MemoryCache;
pub use stats::{CacheStats, CacheStatsSnapshot, CombinedCacheStats};
