//! Memcached-style slab allocator cache with per-class LRU eviction.
//!
//! This crate provides the storage core of a memcached-like cache: a slab
//! allocator that carves a memory budget into fixed-size chunk classes, a
//! chained hash index that grows incrementally, and an item store that ties
//! them together with per-class LRU queues, reference counting and lazy
//! expiration.
//!
//! # Architecture
//!
//! ```text
//! +-------------------------------------------+
//! |              SlabCache                    |
//! |   (one coarse lock around the Store)      |
//! |                                           |
//! |  +-------------------------------------+  |
//! |  | HashIndex                           |  |
//! |  | - key -> chunk, chained buckets     |  |
//! |  | - incremental 2x resize             |  |
//! |  +-------------------------------------+  |
//! |        |                                  |
//! |        v                                  |
//! |  +-------------------------------------+  |
//! |  | SlabAllocator                       |  |
//! |  | +--------------------------------+  |  |
//! |  | | SlabClass 0 (96B chunks)       |  |  |
//! |  | | - free list                    |  |  |
//! |  | | - LRU head/tail                |  |  |
//! |  | +--------------------------------+  |  |
//! |  | | SlabClass 1 (120B chunks)      |  |  |
//! |  | +--------------------------------+  |  |
//! |  | | ...                            |  |  |
//! |  | +--------------------------------+  |  |
//! |  | | SlabClass N (1 page chunk)     |  |  |
//! |  | +--------------------------------+  |  |
//! |  +-------------------------------------+  |
//! +-------------------------------------------+
//! ```
//!
//! # Advantages
//!
//! - O(1) allocation/deallocation (pop/push from free list)
//! - No per-object system allocation; pages are never returned
//! - Hash index resizes one bucket at a time, never stop-the-world
//!
//! # Trade-offs
//!
//! - Internal fragmentation (items smaller than their chunk waste space)
//! - Memory assigned to one class is never moved to another
//! - A single lock serializes all operations
//!
//! # Example
//!
//! ```
//! use slab_engine::SlabCacheBuilder;
//!
//! let cache = SlabCacheBuilder::new()
//!     .memory_limit(16 * 1024 * 1024)
//!     .build()
//!     .unwrap();
//!
//! cache.set(b"key", b"value", 0, 0).unwrap();
//! assert_eq!(cache.get_value(b"key").as_deref(), Some(&b"value"[..]));
//!
//! // Lower level: allocate, fill, publish, release.
//! let item = cache.allocate(b"other", 0, 0, 3).unwrap();
//! cache.write_value(&item, b"abc");
//! cache.link(&item);
//! cache.remove(item);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod allocator;
mod class;
mod clock;
mod config;
mod error;
mod hashtable;
mod item;
mod location;
mod metrics;
mod stats;
mod store;
mod verifier;

use std::time::Duration;

use parking_lot::Mutex;

pub use allocator::{ClassStats, SlabAllocator};
pub use class::SlabClass;
pub use clock::Clock;
pub use config::{
    CHUNK_ALIGN_BYTES, ClassInfo, DEFAULT_GROWTH_FACTOR, DEFAULT_HASHPOWER,
    DEFAULT_ITEM_UPDATE_INTERVAL, DEFAULT_MEMORY_LIMIT, DEFAULT_MIN_CHUNK_SIZE, DEFAULT_PAGE_SIZE,
    EVICTION_SEARCH_DEPTH, HEADER_SIZE, MAX_HASHPOWER, MAX_KEY_LEN, MAX_SLAB_CLASSES,
    MIN_HASHPOWER, MemorySource, SlabCacheConfig, SlabClasses, parse_size,
};
pub use error::{CacheError, CacheResult};
pub use hashtable::{ChainLinks, HashIndex, InsertOutcome};
pub use item::{ItemRef, ItemState, ItemView, item_size, make_suffix};
pub use location::ChunkId;
pub use stats::StatsSnapshot;
pub use store::{LinkOutcome, Store};

/// Thread-safe slab cache.
///
/// Every operation runs entirely under one lock around a [`Store`]. Item
/// handles returned here must be given back to the same cache with
/// [`SlabCache::remove`].
pub struct SlabCache {
    store: Mutex<Store>,
}

impl SlabCache {
    /// Create a new builder for SlabCache.
    pub fn builder() -> SlabCacheBuilder {
        SlabCacheBuilder::new()
    }

    /// Create a cache from a configuration using the system clock.
    pub fn new(config: &SlabCacheConfig) -> CacheResult<Self> {
        Self::with_clock(config, Clock::system())
    }

    /// Create a cache from a configuration and a clock.
    pub fn with_clock(config: &SlabCacheConfig, clock: Clock) -> CacheResult<Self> {
        Ok(Self {
            store: Mutex::new(Store::new(config, clock)?),
        })
    }

    /// Allocate an unlinked item. See [`Store::allocate`].
    pub fn allocate(
        &self,
        key: &[u8],
        flags: u32,
        exptime: u32,
        value_len: usize,
    ) -> CacheResult<ItemRef> {
        self.store.lock().allocate(key, flags, exptime, value_len)
    }

    /// Copy `value` into an allocated item.
    ///
    /// # Panics
    ///
    /// Panics if `value` is not exactly the length given to allocate.
    pub fn write_value(&self, item: &ItemRef, value: &[u8]) {
        self.store.lock().value_mut(item).copy_from_slice(value);
    }

    /// Publish an item. See [`Store::link`].
    pub fn link(&self, item: &ItemRef) -> LinkOutcome {
        self.store.lock().link(item)
    }

    /// Unlink an item. See [`Store::unlink`].
    pub fn unlink(&self, item: &ItemRef) {
        self.store.lock().unlink(item)
    }

    /// Release a handle. See [`Store::remove`].
    pub fn remove(&self, item: ItemRef) {
        self.store.lock().remove(item)
    }

    /// Look up a live item. See [`Store::get`].
    pub fn get(&self, key: &[u8]) -> Option<ItemRef> {
        self.store.lock().get(key)
    }

    /// Look up a live item and set its expiration. See [`Store::touch`].
    pub fn touch(&self, key: &[u8], exptime: u32) -> Option<ItemRef> {
        self.store.lock().touch(key, exptime)
    }

    /// Refresh an item's LRU position. See [`Store::update_recency`].
    pub fn update_recency(&self, item: &ItemRef) {
        self.store.lock().update_recency(item)
    }

    /// Swap one item for another with the same key. See [`Store::replace`].
    pub fn replace(&self, old: &ItemRef, new: &ItemRef) -> CacheResult<LinkOutcome> {
        self.store.lock().replace(old, new)
    }

    /// Delete a key. See [`Store::delete`].
    pub fn delete(&self, key: &[u8]) -> CacheResult<()> {
        self.store.lock().delete(key)
    }

    /// Whether an item of these dimensions can be stored at all.
    pub fn fits(&self, key_len: usize, flags: u32, value_len: usize) -> bool {
        self.store.lock().fits(key_len, flags, value_len)
    }

    /// Advance a hash index resize. See [`Store::maintain`].
    pub fn maintain(&self, max_steps: usize) -> bool {
        self.store.lock().maintain(max_steps)
    }

    /// Store a value under `key`, replacing any existing item.
    pub fn set(&self, key: &[u8], value: &[u8], flags: u32, exptime: u32) -> CacheResult<LinkOutcome> {
        let mut store = self.store.lock();
        let item = store.allocate(key, flags, exptime, value.len())?;
        store.value_mut(&item).copy_from_slice(value);

        let outcome = match store.peek(key) {
            Some(old) => {
                let outcome = store.replace(&old, &item);
                store.remove(old);
                outcome
            }
            None => Ok(store.link(&item)),
        };
        store.remove(item);
        outcome
    }

    /// Copy out the value stored under `key`, refreshing its LRU position.
    pub fn get_value(&self, key: &[u8]) -> Option<Vec<u8>> {
        let mut store = self.store.lock();
        let item = store.get(key)?;
        store.update_recency(&item);
        let value = store.item(&item).value().to_vec();
        store.remove(item);
        Some(value)
    }

    /// Run `f` against a read view of an item while holding the lock.
    pub fn with_item<R>(&self, item: &ItemRef, f: impl FnOnce(ItemView<'_>) -> R) -> R {
        let store = self.store.lock();
        f(store.item(item))
    }

    /// Current engine time in relative seconds.
    pub fn current_time(&self) -> u32 {
        self.store.lock().current_time()
    }

    /// Copy of the engine counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.store.lock().stats()
    }

    /// Statistics for one slab class.
    pub fn class_stats(&self, class_id: u8) -> Option<ClassStats> {
        self.store.lock().class_stats(class_id)
    }

    /// Number of slab classes.
    pub fn num_classes(&self) -> usize {
        self.store.lock().num_classes()
    }

    /// Number of linked items.
    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    /// Whether no items are linked.
    pub fn is_empty(&self) -> bool {
        self.store.lock().is_empty()
    }

    /// Verify structural invariants. See [`Store::check_invariants`].
    pub fn check_invariants(&self) -> Result<(), String> {
        self.store.lock().check_invariants()
    }
}

/// Builder for [`SlabCache`].
#[derive(Debug, Default)]
pub struct SlabCacheBuilder {
    config: SlabCacheConfig,
    clock: Option<Clock>,
}

impl SlabCacheBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn config(mut self, config: SlabCacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the memory budget in bytes (0 = unlimited).
    pub fn memory_limit(mut self, bytes: usize) -> Self {
        self.config.memory_limit = bytes;
        self
    }

    /// Set the page size in bytes.
    ///
    /// This also determines the maximum item size (items cannot be larger
    /// than a page). Classes will be generated up to this size.
    pub fn page_size(mut self, bytes: usize) -> Self {
        self.config.page_size = bytes;
        self
    }

    /// Set the growth factor between slab classes.
    ///
    /// Default is 1.25. Higher values mean fewer classes but more
    /// fragmentation. Must be > 1.0.
    pub fn growth_factor(mut self, factor: f64) -> Self {
        self.config.growth_factor = factor;
        self
    }

    /// Set the chunk size of the smallest class.
    pub fn min_chunk_size(mut self, bytes: usize) -> Self {
        self.config.min_chunk_size = bytes;
        self
    }

    /// Reserve one page per class when building.
    pub fn preallocate(mut self, preallocate: bool) -> Self {
        self.config.preallocate = preallocate;
        self
    }

    /// Choose where pages come from.
    pub fn memory_source(mut self, source: MemorySource) -> Self {
        self.config.memory_source = source;
        self
    }

    /// Set the initial hash index power (2^power buckets).
    pub fn hashpower(mut self, power: u8) -> Self {
        self.config.hashpower = power;
        self
    }

    /// Set the minimum age before a read refreshes LRU position.
    pub fn item_update_interval(mut self, interval: Duration) -> Self {
        self.config.item_update_interval = interval;
        self
    }

    /// Use a specific clock (for example [`Clock::manual`] in tests).
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the cache.
    pub fn build(self) -> CacheResult<SlabCache> {
        SlabCache::with_clock(&self.config, self.clock.unwrap_or_default())
    }

    /// Build a bare store for single-threaded use.
    pub fn build_store(self) -> CacheResult<Store> {
        Store::new(&self.config, self.clock.unwrap_or_default())
    }
}
