//! Bounded LRU memoization with a lazily compacted access queue.
//!
//! Instead of a linked list, recency is tracked with an append-only queue of
//! keys plus a per-key count of how many times each key currently appears in
//! that queue. Every call appends; eviction pops from the front and only
//! drops an entry once none of its occurrences remain; and when the queue
//! grows past `4 × capacity` it is rewritten to keep just the latest
//! occurrence of every key.
//!
//! # Complexity
//! - `call`, `try_call`: `O(1)` amortized (compaction is `O(capacity)` and
//!   runs at most once per `3 × capacity` calls).
//! - `peek`, `contains`, `len`, `stats`: `O(1)`.
//!
//! # Thread Safety
//! - Keys are shared through `Rc`, so the cache is neither `Send` nor `Sync`.
//!   Wrap it in a lock of your own to share it.
//!
//! # Errors
//! - A failing computation in `try_call` leaves entries, queue and counters
//!   exactly as they were.

use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::fmt;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::rc::Rc;

use tracing::{debug, trace};

use super::stats::CacheStats;
use crate::error::{ConfigResult, ConfigurationError};

/// Queue length, as a multiple of capacity, that triggers compaction
pub const COMPACTION_FACTOR: usize = 4;

/// Memoization cache bounded by entry count
///
/// # Examples
///
/// ```
/// use ec2utils_common::cache::MemoCache;
///
/// let mut cache = MemoCache::with_capacity(2).expect("capacity must be > 0");
/// assert_eq!(cache.call(1, || 1 * 2), 2);
/// assert_eq!(cache.call(2, || 2 * 2), 4);
/// assert_eq!(cache.call(1, || unreachable!()), 2); // hit
/// cache.call(3, || 3 * 2); // evicts 2
///
/// assert!(cache.contains(&1));
/// assert!(!cache.contains(&2));
/// assert_eq!((cache.hits(), cache.misses()), (1, 3));
/// ```
pub struct MemoCache<K, V>
where
    K: Eq + Hash,
{
    capacity: NonZeroUsize,
    entries: HashMap<Rc<K>, V>,
    refcount: HashMap<Rc<K>, usize>,
    queue: VecDeque<Rc<K>>,
    hits: u64,
    misses: u64,
    evictions: u64,
    compactions: u64,
}

impl<K, V> MemoCache<K, V>
where
    K: Eq + Hash,
{
    /// Creates a cache with the provided non-zero capacity.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            refcount: HashMap::new(),
            queue: VecDeque::new(),
            hits: 0,
            misses: 0,
            evictions: 0,
            compactions: 0,
        }
    }

    /// Creates a cache, rejecting a zero `capacity`.
    pub fn with_capacity(capacity: usize) -> ConfigResult<Self> {
        NonZeroUsize::new(capacity)
            .map(Self::new)
            .ok_or_else(|| ConfigurationError::out_of_range("capacity", "must be greater than 0"))
    }

    /// Returns the maximum number of entries kept.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Returns the number of entries currently cached.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the current length of the access queue.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Calls answered from the cache so far.
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Calls that ran the computation so far.
    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Snapshot of the cumulative statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.len(),
            capacity: self.capacity.get(),
            queue_len: self.queue.len(),
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            compactions: self.compactions,
        }
    }

    /// Returns `true` when a value for `key` is cached.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Reads a cached value without recording an access.
    #[must_use]
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Drops every entry and the access queue. Counters are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.refcount.clear();
        self.queue.clear();
    }

    /// Returns the cached value for `key`, computing and storing it on a miss.
    pub fn call<F>(&mut self, key: K, compute: F) -> V
    where
        V: Clone,
        F: FnOnce() -> V,
    {
        self.call_with(key, |_| compute())
    }

    /// Like [`call`](Self::call), with the key handed to the computation.
    pub fn call_with<F>(&mut self, key: K, compute: F) -> V
    where
        V: Clone,
        F: FnOnce(&K) -> V,
    {
        match self.try_call_with(key, |key| Ok::<V, Infallible>(compute(key))) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Returns the cached value for `key`, or runs a fallible computation.
    ///
    /// An error is returned unchanged and nothing is recorded.
    pub fn try_call<E, F>(&mut self, key: K, compute: F) -> Result<V, E>
    where
        V: Clone,
        F: FnOnce() -> Result<V, E>,
    {
        self.try_call_with(key, |_| compute())
    }

    /// Like [`try_call`](Self::try_call), with the key handed to the
    /// computation.
    pub fn try_call_with<E, F>(&mut self, key: K, compute: F) -> Result<V, E>
    where
        V: Clone,
        F: FnOnce(&K) -> Result<V, E>,
    {
        let (key, value) = match self.entries.get_key_value(&key) {
            Some((stored, value)) => {
                self.hits += 1;
                (Rc::clone(stored), value.clone())
            }
            None => {
                let value = compute(&key)?;
                let key = Rc::new(key);
                self.entries.insert(Rc::clone(&key), value.clone());
                self.misses += 1;
                (key, value)
            }
        };

        self.record_access(key);
        self.evict_overflow();
        if self.queue.len() > self.capacity.get().saturating_mul(COMPACTION_FACTOR) {
            self.compact();
        }

        Ok(value)
    }

    fn record_access(&mut self, key: Rc<K>) {
        *self.refcount.entry(Rc::clone(&key)).or_insert(0) += 1;
        self.queue.push_back(key);
    }

    fn evict_overflow(&mut self) {
        while self.entries.len() > self.capacity.get() {
            let Some(oldest) = self.queue.pop_front() else {
                break;
            };
            let remaining = match self.refcount.get_mut(&oldest) {
                Some(count) => {
                    *count -= 1;
                    *count
                }
                None => 0,
            };
            if remaining == 0 {
                self.refcount.remove(&oldest);
                self.entries.remove(&oldest);
                self.evictions += 1;
                trace!(evictions = self.evictions, "Evicted least recently used entry");
            }
        }
    }

    /// Rewrite the queue keeping only the latest occurrence of every key.
    fn compact(&mut self) {
        let before = self.queue.len();
        for _ in 0..before {
            let Some(key) = self.queue.pop_front() else {
                break;
            };
            match self.refcount.get_mut(&key) {
                Some(count) if *count == 1 => self.queue.push_back(key),
                Some(count) => *count -= 1,
                None => {}
            }
        }
        self.compactions += 1;
        debug!(before, after = self.queue.len(), "Compacted access queue");

        debug_assert_eq!(self.queue.len(), self.entries.len());
        debug_assert_eq!(self.refcount.len(), self.entries.len());
        debug_assert_eq!(self.refcount.values().sum::<usize>(), self.queue.len());
    }
}

impl<K, V> fmt::Debug for MemoCache<K, V>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoCache")
            .field("capacity", &self.capacity)
            .field("len", &self.entries.len())
            .field("queue_len", &self.queue.len())
            .field("hits", &self.hits)
            .field("misses", &self.misses)
            .finish()
    }
}

/// A function wrapped with a [`MemoCache`]
///
/// Created by [`lru_cache`]. The wrapped function receives the key by
/// reference; use a tuple key for multi-argument functions.
pub struct Memoized<F, K, V>
where
    K: Eq + Hash,
{
    function: F,
    cache: MemoCache<K, V>,
}

impl<F, K, V> Memoized<F, K, V>
where
    F: FnMut(&K) -> V,
    K: Eq + Hash,
    V: Clone,
{
    /// Call the wrapped function through the cache
    pub fn call(&mut self, key: K) -> V {
        let function = &mut self.function;
        self.cache.call_with(key, |key| function(key))
    }
}

impl<F, K, V> Memoized<F, K, V>
where
    K: Eq + Hash,
{
    /// Calls answered from the cache
    pub fn hits(&self) -> u64 {
        self.cache.hits()
    }

    /// Calls that ran the wrapped function
    pub fn misses(&self) -> u64 {
        self.cache.misses()
    }

    /// Statistics snapshot
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// The underlying cache
    pub fn cache(&self) -> &MemoCache<K, V> {
        &self.cache
    }
}

/// A fallible function wrapped with a [`MemoCache`]
///
/// Created by [`try_lru_cache`]. Errors are returned unchanged and never
/// cached.
pub struct TryMemoized<F, K, V>
where
    K: Eq + Hash,
{
    function: F,
    cache: MemoCache<K, V>,
}

impl<F, K, V> TryMemoized<F, K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    /// Call the wrapped function through the cache
    pub fn try_call<E>(&mut self, key: K) -> Result<V, E>
    where
        F: FnMut(&K) -> Result<V, E>,
    {
        let function = &mut self.function;
        self.cache.try_call_with(key, |key| function(key))
    }

    /// Calls answered from the cache
    pub fn hits(&self) -> u64 {
        self.cache.hits()
    }

    /// Calls that ran the wrapped function successfully
    pub fn misses(&self) -> u64 {
        self.cache.misses()
    }

    /// Statistics snapshot
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// The underlying cache
    pub fn cache(&self) -> &MemoCache<K, V> {
        &self.cache
    }
}

/// Wrap `function` in an LRU cache holding at most `capacity` results
///
/// ```
/// use ec2utils_common::cache::lru_cache;
///
/// let mut double = lru_cache(2, |x: &u32| x * 2).expect("capacity must be > 0");
/// for x in [1, 2, 1, 3] {
///     double.call(x);
/// }
/// assert_eq!((double.hits(), double.misses()), (1, 3));
/// ```
pub fn lru_cache<F, K, V>(capacity: usize, function: F) -> ConfigResult<Memoized<F, K, V>>
where
    F: FnMut(&K) -> V,
    K: Eq + Hash,
    V: Clone,
{
    Ok(Memoized { function, cache: MemoCache::with_capacity(capacity)? })
}

/// Wrap a fallible `function` in an LRU cache holding at most `capacity`
/// results
pub fn try_lru_cache<F, K, V, E>(capacity: usize, function: F) -> ConfigResult<TryMemoized<F, K, V>>
where
    F: FnMut(&K) -> Result<V, E>,
    K: Eq + Hash,
    V: Clone,
{
    Ok(TryMemoized { function, cache: MemoCache::with_capacity(capacity)? })
}
