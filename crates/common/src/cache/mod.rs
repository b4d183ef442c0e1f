//! Memoization caches
//!
//! This module provides a bounded least-recently-used cache for memoizing
//! expensive calls, keyed by the call's arguments.
//!
//! # Features
//!
//! - **Bounded**: never holds more than `capacity` results
//! - **Amortized O(1) eviction**: lazily compacted access queue with per-key
//!   reference counts instead of a linked list
//! - **Error-transparent**: failed computations are returned unchanged and
//!   never cached
//! - **Observable**: cumulative hit/miss/eviction counters via [`CacheStats`]
//!
//! # Examples
//!
//! ## Wrapping a function
//! ```
//! use ec2utils_common::cache::lru_cache;
//!
//! let mut describe = lru_cache(64, |instance_id: &String| format!("state of {instance_id}"))
//!     .expect("capacity must be > 0");
//!
//! describe.call("i-0abc".to_string());
//! describe.call("i-0abc".to_string());
//! assert_eq!(describe.hits(), 1);
//! ```
//!
//! ## Using the cache directly
//! ```
//! use ec2utils_common::cache::MemoCache;
//!
//! let mut cache: MemoCache<(u32, u32), u32> =
//!     MemoCache::with_capacity(20).expect("capacity must be > 0");
//! let value = cache.call((2, 1), || 3 * 2 + 1);
//! assert_eq!(value, 7);
//! assert_eq!(cache.stats().misses, 1);
//! ```

pub mod memo;
pub mod stats;

pub use memo::{lru_cache, try_lru_cache, MemoCache, Memoized, TryMemoized, COMPACTION_FACTOR};
pub use stats::CacheStats;
