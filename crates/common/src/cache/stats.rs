//! Cache statistics
//!
//! Snapshot type describing how a memoization cache has been used since it
//! was created: hit/miss counts, evictions and queue compactions.

/// Point-in-time statistics for a [`MemoCache`](super::MemoCache)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Current number of entries
    pub size: usize,

    /// Maximum number of entries
    pub capacity: usize,

    /// Current length of the access queue
    pub queue_len: usize,

    /// Calls answered from the cache
    pub hits: u64,

    /// Calls that ran the wrapped computation
    pub misses: u64,

    /// Entries removed to respect the capacity
    pub evictions: u64,

    /// Access-queue compaction passes performed
    pub compactions: u64,
}

impl CacheStats {
    /// Calculate hit rate (hits / total accesses)
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_accesses();
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Calculate miss rate (misses / total accesses)
    pub fn miss_rate(&self) -> f64 {
        if self.total_accesses() == 0 {
            0.0
        } else {
            1.0 - self.hit_rate()
        }
    }

    /// Calculate fill percentage (size / capacity)
    pub fn fill_percentage(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.size as f64 / self.capacity as f64
        }
    }

    /// Total number of calls (hits + misses)
    pub fn total_accesses(&self) -> u64 {
        self.hits + self.misses
    }
}
