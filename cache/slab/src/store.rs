//! Item store: allocation, linking, LRU, reference counts and expiration.
//!
//! # Item lifecycle
//!
//! ```text
//!            allocate             link
//!   Free  ------------>  Allocated  ------->  Linked
//!    ^                     |   ^                |
//!    |     remove (rc=0)   |   |     unlink     |
//!    +---------------------+   +----------------+
//! ```
//!
//! A linked item holds one reference for the index. Each [`ItemRef`]
//! handed to a caller holds one more. The chunk goes back to the free list
//! only when the item is unlinked and the count drops to zero.

use tracing::trace;

use crate::allocator::{ClassStats, SlabAllocator};
use crate::clock::Clock;
use crate::config::{EVICTION_SEARCH_DEPTH, HEADER_SIZE, MAX_KEY_LEN, SlabCacheConfig};
use crate::error::{CacheError, CacheResult};
use crate::hashtable::{ChainLinks, HashIndex, InsertOutcome};
use crate::item::{ItemRef, ItemState, ItemView, VALUE_TERMINATOR, item_size, make_suffix};
use crate::location::ChunkId;
use crate::metrics;
use crate::stats::{self, Stats, StatsSnapshot};

/// Result of linking an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// The item is linked.
    Linked,
    /// The item is linked and the link started a hash index resize.
    ResizeStarted,
}

impl From<InsertOutcome> for LinkOutcome {
    fn from(outcome: InsertOutcome) -> Self {
        match outcome {
            InsertOutcome::Inserted => LinkOutcome::Linked,
            InsertOutcome::ResizeStarted => LinkOutcome::ResizeStarted,
        }
    }
}

/// Single-threaded item store.
///
/// All operations take `&mut self`; wrap the store in a lock to share it.
pub struct Store {
    allocator: SlabAllocator,
    index: HashIndex,
    clock: Clock,
    stats: Stats,
    item_update_interval: u32,
}

impl Store {
    /// Create a store from a configuration.
    pub fn new(config: &SlabCacheConfig, clock: Clock) -> CacheResult<Self> {
        config.validate()?;
        let allocator = SlabAllocator::new(config)?;
        let index = HashIndex::new(config.hashpower);
        metrics::MEMORY.add(allocator.memory_used() as i64);

        Ok(Self {
            allocator,
            index,
            clock,
            stats: Stats::default(),
            item_update_interval: config.item_update_interval.as_secs().min(u32::MAX as u64)
                as u32,
        })
    }

    /// The engine clock.
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Current engine time in relative seconds.
    pub fn current_time(&self) -> u32 {
        self.clock.now()
    }

    /// Allocate an unlinked item with room for a `value_len` byte value.
    ///
    /// The key, flags and expiration are written; the value is left for the
    /// caller to fill through [`Store::value_mut`]. When the class has no
    /// free chunk, up to five items at the tail of the class LRU are
    /// inspected: an expired one is reclaimed, otherwise the first one not
    /// held by a caller is evicted.
    pub fn allocate(
        &mut self,
        key: &[u8],
        flags: u32,
        exptime: u32,
        value_len: usize,
    ) -> CacheResult<ItemRef> {
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Err(CacheError::InvalidKey);
        }

        stats::incr(&self.stats.put_cmds);
        metrics::PUT.increment();

        let Some((class_id, ntotal)) = self.size_class(key.len(), flags, value_len) else {
            self.put_miss();
            return Err(CacheError::TooLarge);
        };
        let suffix = make_suffix(flags, value_len);

        let now = self.clock.now();
        let memory_before = self.allocator.memory_used();

        let id = match self.reclaim_expired(class_id, now, ntotal) {
            Some(id) => id,
            None => match self.allocator.acquire(class_id, ntotal) {
                Some(id) => id,
                None => match self.evict(class_id, now, ntotal) {
                    Some(id) => id,
                    None => {
                        self.put_miss();
                        return Err(CacheError::OutOfMemory);
                    }
                },
            },
        };

        let grown = self.allocator.memory_used() - memory_before;
        if grown > 0 {
            metrics::MEMORY.add(grown as i64);
        }

        let header = self.allocator.header_mut(id);
        header.init(
            key.len() as u8,
            suffix.len() as u8,
            (value_len + VALUE_TERMINATOR.len()) as u32,
            flags,
            exptime,
        );
        header.time = now;

        let chunk = self.allocator.chunk_mut(id);
        let mut pos = HEADER_SIZE;
        chunk[pos..pos + key.len()].copy_from_slice(key);
        pos += key.len();
        chunk[pos] = 0;
        pos += 1;
        chunk[pos..pos + suffix.len()].copy_from_slice(suffix.as_bytes());
        pos += suffix.len() + value_len;
        chunk[pos..pos + VALUE_TERMINATOR.len()].copy_from_slice(VALUE_TERMINATOR);

        stats::incr(&self.stats.put_hits);
        Ok(ItemRef::new(id))
    }

    /// Class and total size for an item, `None` if no class can hold it.
    fn size_class(&self, key_len: usize, flags: u32, value_len: usize) -> Option<(u8, usize)> {
        if value_len > self.allocator.classes().max_chunk_size() {
            return None;
        }
        let ntotal = item_size(key_len, flags, value_len)?;
        Some((self.allocator.class_for(ntotal)?, ntotal))
    }

    fn put_miss(&self) {
        stats::incr(&self.stats.put_misses);
        metrics::PUT_MISS.increment();
    }

    /// Tail candidates not held by any caller (only the index reference).
    fn unheld_tail(&self, class_id: u8) -> impl Iterator<Item = ChunkId> + '_ {
        self.allocator
            .class(class_id)
            .into_iter()
            .flat_map(|class| {
                class
                    .lru_tail_iter(EVICTION_SEARCH_DEPTH)
                    .map(move |index| class.chunk_id(index))
            })
            .filter(|id| self.allocator.header(*id).refcount() == 1)
    }

    /// Reuse the chunk of an expired item near the LRU tail.
    fn reclaim_expired(&mut self, class_id: u8, now: u32, ntotal: usize) -> Option<ChunkId> {
        let id = self
            .unheld_tail(class_id)
            .find(|id| self.allocator.header(*id).is_expired(now))?;

        self.take_chunk(id, ntotal);
        stats::incr(&self.stats.reclaimed);
        metrics::RECLAIM.increment();
        Some(id)
    }

    /// Evict the first unheld item near the LRU tail and reuse its chunk.
    fn evict(&mut self, class_id: u8, now: u32, ntotal: usize) -> Option<ChunkId> {
        let id = self.unheld_tail(class_id).next()?;

        if self.allocator.header(id).is_expired(now) {
            stats::incr(&self.stats.reclaimed);
            metrics::RECLAIM.increment();
        } else {
            stats::incr(&self.stats.evictions);
            metrics::EVICT.increment();
            trace!(chunk = %id, class_id, "evicted item");
        }

        self.take_chunk(id, ntotal);
        Some(id)
    }

    /// Unlink an unheld item and keep its chunk for a new item.
    fn take_chunk(&mut self, id: ChunkId, ntotal: usize) {
        let old_size = self.allocator.header(id).total_size();
        if self.unlink_id(id) {
            let remaining = self.allocator.header(id).refcount_decr();
            debug_assert_eq!(remaining, 0, "reused chunk still referenced");
        }
        self.allocator
            .adjust_requested(id.class_id(), old_size, ntotal);
    }

    /// Publish an allocated item: insert it into the index and at the head
    /// of its class LRU.
    ///
    /// # Panics
    ///
    /// Panics if the item is already linked or has been freed.
    pub fn link(&mut self, item: &ItemRef) -> LinkOutcome {
        let id = item.id();
        let now = self.clock.now();

        let header = self.allocator.header_mut(id);
        assert_eq!(
            header.state,
            ItemState::Allocated,
            "link of an item that is not allocated"
        );
        header.state = ItemState::Linked;
        header.time = now;
        header.refcount_incr();
        let size = header.total_size() as u64;

        stats::incr(&self.stats.curr_items);
        stats::incr(&self.stats.total_items);
        stats::add(&self.stats.curr_bytes, size);
        metrics::ITEMS.increment();
        metrics::ITEM_BYTES.add(size as i64);

        let hv = self.index.hash(self.allocator.key(id));
        let outcome = self.index.insert(id, hv, &mut self.allocator);
        if outcome == InsertOutcome::ResizeStarted {
            metrics::HASH_EXPAND.increment();
        }

        if let Some(class) = self.allocator.class_mut(id.class_id()) {
            class.lru_insert_head(id.index());
        }

        outcome.into()
    }

    /// Remove an item from the index and LRU and drop the index reference.
    ///
    /// No effect if the item is not linked. The caller's handle stays valid
    /// until passed to [`Store::remove`].
    pub fn unlink(&mut self, item: &ItemRef) {
        if self.unlink_id(item.id()) {
            self.release(item.id());
        }
    }

    /// Give back a handle. The chunk is freed when this was the last
    /// reference.
    pub fn remove(&mut self, item: ItemRef) {
        self.release(item.id());
    }

    /// Detach a linked item from the index and LRU. Returns false if it was
    /// not linked. The index reference is not released.
    fn unlink_id(&mut self, id: ChunkId) -> bool {
        let header = self.allocator.header(id);
        if !header.is_linked() {
            return false;
        }
        let size = header.total_size() as u64;

        let hv = self.index.hash(self.allocator.key(id));
        let removed = self.index.remove_item(id, hv, &mut self.allocator);
        debug_assert!(removed, "linked item missing from index");

        if let Some(class) = self.allocator.class_mut(id.class_id()) {
            class.lru_remove(id.index());
        }
        self.allocator.header_mut(id).state = ItemState::Allocated;

        stats::sub(&self.stats.curr_items, 1);
        stats::sub(&self.stats.curr_bytes, size);
        metrics::ITEMS.decrement();
        metrics::ITEM_BYTES.sub(size as i64);
        true
    }

    /// Drop one reference, freeing the chunk at zero.
    fn release(&mut self, id: ChunkId) {
        let header = self.allocator.header(id);
        if header.refcount_decr() == 0 {
            debug_assert!(!header.is_linked(), "freeing a linked item");
            let size = header.total_size();
            self.allocator.release(id, size);
        }
    }

    /// Look up a live item.
    ///
    /// An expired item is unlinked on the spot and reported as absent.
    /// A hit marks the item fetched and returns a new handle.
    pub fn get(&mut self, key: &[u8]) -> Option<ItemRef> {
        stats::incr(&self.stats.get_cmds);
        metrics::GET.increment();

        let hv = self.index.hash(key);
        let Some(id) = self.index.find(key, hv, &self.allocator) else {
            self.get_miss();
            return None;
        };

        let header = self.allocator.header(id);
        header.refcount_incr();
        let item = ItemRef::new(id);

        if header.is_expired(self.clock.now()) {
            self.expire(item);
            self.get_miss();
            return None;
        }

        self.allocator.header_mut(id).fetched = true;
        stats::incr(&self.stats.get_hits);
        metrics::GET_HIT.increment();
        Some(item)
    }

    fn get_miss(&self) {
        stats::incr(&self.stats.get_misses);
        metrics::GET_MISS.increment();
    }

    fn expire(&mut self, item: ItemRef) {
        trace!(chunk = %item.id(), "expired item removed on access");
        self.unlink(&item);
        self.remove(item);
        stats::incr(&self.stats.expired);
        metrics::EXPIRE.increment();
    }

    /// Look up an item without touching statistics, the fetched bit or
    /// expiration. Expired items are returned too.
    pub fn peek(&mut self, key: &[u8]) -> Option<ItemRef> {
        let hv = self.index.hash(key);
        let id = self.index.find(key, hv, &self.allocator)?;
        self.allocator.header(id).refcount_incr();
        Some(ItemRef::new(id))
    }

    /// Look up a live item and replace its expiration time.
    pub fn touch(&mut self, key: &[u8], exptime: u32) -> Option<ItemRef> {
        let item = self.get(key)?;
        self.allocator.header_mut(item.id()).exptime = exptime;
        Some(item)
    }

    /// Move a linked item to the head of its LRU, at most once per update
    /// interval.
    pub fn update_recency(&mut self, item: &ItemRef) {
        let id = item.id();
        let now = self.clock.now();
        let header = self.allocator.header(id);
        if header.time >= now.saturating_sub(self.item_update_interval) || !header.is_linked() {
            return;
        }

        if let Some(class) = self.allocator.class_mut(id.class_id()) {
            class.lru_touch(id.index());
        }
        self.allocator.header_mut(id).time = now;
    }

    /// Swap `new` in for `old` under the same key.
    pub fn replace(&mut self, old: &ItemRef, new: &ItemRef) -> CacheResult<LinkOutcome> {
        if self.allocator.key(old.id()) != self.allocator.key(new.id()) {
            return Err(CacheError::KeyMismatch);
        }
        self.unlink(old);
        Ok(self.link(new))
    }

    /// Unlink the item stored under `key`.
    ///
    /// Expired items count as absent.
    pub fn delete(&mut self, key: &[u8]) -> CacheResult<()> {
        stats::incr(&self.stats.delete_cmds);
        metrics::DELETE.increment();

        let hv = self.index.hash(key);
        let Some(id) = self.index.find(key, hv, &self.allocator) else {
            self.delete_miss();
            return Err(CacheError::NotFound);
        };

        let header = self.allocator.header(id);
        header.refcount_incr();
        let item = ItemRef::new(id);

        if header.is_expired(self.clock.now()) {
            self.expire(item);
            self.delete_miss();
            return Err(CacheError::NotFound);
        }

        self.unlink(&item);
        self.remove(item);
        stats::incr(&self.stats.delete_hits);
        Ok(())
    }

    fn delete_miss(&self) {
        stats::incr(&self.stats.delete_misses);
        metrics::DELETE_MISS.increment();
    }

    /// Whether an item with these dimensions fits in some slab class.
    pub fn fits(&self, key_len: usize, flags: u32, value_len: usize) -> bool {
        self.size_class(key_len, flags, value_len).is_some()
    }

    /// Run up to `max_steps` hash index migration steps. Returns whether a
    /// resize is still in progress.
    pub fn maintain(&mut self, max_steps: usize) -> bool {
        for _ in 0..max_steps {
            if !self.index.resize_step(&mut self.allocator) {
                break;
            }
        }
        self.index.is_expanding()
    }

    /// Read view of an item.
    pub fn item(&self, item: &ItemRef) -> ItemView<'_> {
        self.allocator.view(item.id())
    }

    /// The value bytes of an item, for the caller to fill after allocate.
    pub fn value_mut(&mut self, item: &ItemRef) -> &mut [u8] {
        let range = self.allocator.header(item.id()).value_range();
        &mut self.allocator.chunk_mut(item.id())[range]
    }

    /// Copy of the engine counters.
    pub fn stats(&self) -> StatsSnapshot {
        let mut snapshot = self.stats.snapshot();
        snapshot.hash_power = self.index.hashpower();
        snapshot.hash_is_expanding = self.index.is_expanding();
        snapshot.memory_used = self.allocator.memory_used() as u64;
        snapshot.memory_limit = self.allocator.memory_limit() as u64;
        snapshot
    }

    /// Statistics for one slab class.
    pub fn class_stats(&self, class_id: u8) -> Option<ClassStats> {
        self.allocator.class_stats(class_id)
    }

    /// Keys in a class LRU, most recently used first.
    ///
    /// Walks the whole list; intended for tests and debugging.
    pub fn lru_keys(&self, class_id: u8) -> Vec<Vec<u8>> {
        let Some(class) = self.allocator.class(class_id) else {
            return Vec::new();
        };
        let mut keys = Vec::with_capacity(class.lru_count());
        let mut cursor = class.lru_head();
        while let Some(index) = cursor {
            keys.push(self.allocator.key(class.chunk_id(index)).to_vec());
            cursor = class.header(index).next;
        }
        keys
    }

    /// Number of slab classes.
    pub fn num_classes(&self) -> usize {
        self.allocator.num_classes()
    }

    /// Slab class an item of `size` total bytes would be stored in.
    pub fn class_for(&self, size: usize) -> Option<u8> {
        self.allocator.class_for(size)
    }

    /// Number of items in the index.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the store holds no linked items.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Verify the structural invariants of the allocator, LRUs and index.
    ///
    /// Walks everything; intended for tests and debugging.
    pub fn check_invariants(&self) -> Result<(), String> {
        self.allocator.check_classes()?;
        self.index.check(&self.allocator)?;

        let mut linked = 0usize;
        let mut bytes = 0u64;
        for class_id in 0..self.allocator.num_classes() as u8 {
            let Some(class) = self.allocator.class(class_id) else {
                continue;
            };
            for index in 0..class.total_chunks() as u32 {
                let id = class.chunk_id(index);
                let header = class.header(index);
                match header.state {
                    ItemState::Linked => {
                        linked += 1;
                        bytes += header.total_size() as u64;
                        if header.refcount() == 0 {
                            return Err(format!("linked chunk {id} has refcount 0"));
                        }
                        let key = self.allocator.key(id);
                        if self.index.find(key, self.index.hash(key), &self.allocator) != Some(id) {
                            return Err(format!("linked chunk {id} not reachable in index"));
                        }
                        if header.total_size() > class.chunk_size() {
                            return Err(format!("chunk {id} overflows its class"));
                        }
                    }
                    ItemState::Allocated => {
                        if header.refcount() == 0 {
                            return Err(format!("allocated chunk {id} has no references"));
                        }
                    }
                    ItemState::Free => {}
                }
            }
        }

        let mut err = None;
        self.index.for_each(&self.allocator, |id, _, _| {
            if err.is_none() && self.allocator.header(id).state != ItemState::Linked {
                err = Some(format!("indexed chunk {id} is not linked"));
            }
        });
        if let Some(err) = err {
            return Err(err);
        }

        if linked != self.index.len() {
            return Err(format!(
                "{} linked items but index holds {}",
                linked,
                self.index.len()
            ));
        }
        let snapshot = self.stats.snapshot();
        if snapshot.curr_items != linked as u64 || snapshot.curr_bytes != bytes {
            return Err(format!(
                "stats report {} items / {} bytes, found {} / {}",
                snapshot.curr_items, snapshot.curr_bytes, linked, bytes
            ));
        }
        Ok(())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        let snapshot = self.stats.snapshot();
        metrics::ITEMS.sub(snapshot.curr_items as i64);
        metrics::ITEM_BYTES.sub(snapshot.curr_bytes as i64);
        metrics::MEMORY.sub(self.allocator.memory_used() as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_store() -> (Store, Clock) {
        let clock = Clock::manual();
        let config = SlabCacheConfig {
            memory_limit: 1024 * 1024,
            page_size: 64 * 1024,
            hashpower: 4,
            ..Default::default()
        };
        (Store::new(&config, clock.clone()).unwrap(), clock)
    }

    fn store_value(store: &mut Store, key: &[u8], value: &[u8], exptime: u32) {
        let item = store.allocate(key, 0, exptime, value.len()).unwrap();
        store.value_mut(&item).copy_from_slice(value);
        store.link(&item);
        store.remove(item);
    }

    #[test]
    fn test_allocate_layout() {
        let (mut store, _clock) = create_test_store();
        let item = store.allocate(b"key", 42, 0, 5).unwrap();
        store.value_mut(&item).copy_from_slice(b"hello");

        let view = store.item(&item);
        assert_eq!(view.key(), b"key");
        assert_eq!(view.value(), b"hello");
        assert_eq!(view.data(), b"hello\r\n");
        assert_eq!(view.suffix(), b" 42 5\r\n");
        assert_eq!(view.flags(), 42);
        assert_eq!(view.refcount(), 1);
        assert_eq!(view.state(), ItemState::Allocated);
        assert_eq!(Some(view.total_size()), item_size(3, 42, 5));

        store.remove(item);
        assert!(store.check_invariants().is_ok());
    }

    #[test]
    fn test_link_and_get() {
        let (mut store, _clock) = create_test_store();
        store_value(&mut store, b"key", b"value", 0);

        let item = store.get(b"key").unwrap();
        let view = store.item(&item);
        assert_eq!(view.value(), b"value");
        assert!(view.is_linked());
        assert!(view.is_fetched());
        assert_eq!(view.refcount(), 2);
        store.remove(item);

        assert!(store.get(b"missing").is_none());
        let stats = store.stats();
        assert_eq!(stats.get_cmds, 2);
        assert_eq!(stats.get_hits, 1);
        assert_eq!(stats.get_misses, 1);
        assert_eq!(stats.curr_items, 1);
        assert!(store.check_invariants().is_ok());
    }

    #[test]
    fn test_invalid_key() {
        let (mut store, _clock) = create_test_store();
        assert_eq!(
            store.allocate(b"", 0, 0, 1).unwrap_err(),
            CacheError::InvalidKey
        );
        let long = vec![b'k'; MAX_KEY_LEN + 1];
        assert_eq!(
            store.allocate(&long, 0, 0, 1).unwrap_err(),
            CacheError::InvalidKey
        );
        let max = vec![b'k'; MAX_KEY_LEN];
        let item = store.allocate(&max, 0, 0, 1).unwrap();
        store.remove(item);
    }

    #[test]
    fn test_too_large() {
        let (mut store, _clock) = create_test_store();
        assert_eq!(
            store.allocate(b"big", 0, 0, 64 * 1024).unwrap_err(),
            CacheError::TooLarge
        );
        assert!(!store.fits(3, 0, 64 * 1024));
        assert!(store.fits(3, 0, 1024));
        assert_eq!(store.stats().put_misses, 1);
    }

    #[test]
    fn test_huge_value_len_is_too_large() {
        let (mut store, _clock) = create_test_store();
        for value_len in [usize::MAX, usize::MAX - 60, u32::MAX as usize] {
            assert!(!store.fits(3, 0, value_len));
            assert_eq!(
                store.allocate(b"key", 0, 0, value_len).unwrap_err(),
                CacheError::TooLarge
            );
        }
        assert_eq!(store.stats().put_misses, 3);
        assert_eq!(store.stats().memory_used, 0);
        assert!(store.check_invariants().is_ok());
    }

    #[test]
    fn test_unlink_is_idempotent() {
        let (mut store, _clock) = create_test_store();
        let item = store.allocate(b"key", 0, 0, 1).unwrap();

        // not linked yet
        store.unlink(&item);
        assert_eq!(store.item(&item).refcount(), 1);

        store.link(&item);
        store.unlink(&item);
        store.unlink(&item);
        assert_eq!(store.item(&item).refcount(), 1);
        assert!(store.get(b"key").is_none());

        store.remove(item);
        assert_eq!(store.class_stats(0).unwrap().used_chunks, 0);
        assert!(store.check_invariants().is_ok());
    }

    #[test]
    fn test_held_item_survives_unlink() {
        let (mut store, _clock) = create_test_store();
        store_value(&mut store, b"key", b"value", 0);

        let held = store.get(b"key").unwrap();
        store.delete(b"key").unwrap();

        // the handle still reads the old value
        assert_eq!(store.item(&held).value(), b"value");
        assert_eq!(store.item(&held).state(), ItemState::Allocated);
        assert!(store.check_invariants().is_ok());

        store.remove(held);
        assert!(store.check_invariants().is_ok());
        let class = store.item_class(b"key", 5);
        assert_eq!(store.class_stats(class).unwrap().used_chunks, 0);
    }

    #[test]
    fn test_delete() {
        let (mut store, _clock) = create_test_store();
        store_value(&mut store, b"key", b"value", 0);

        assert_eq!(store.delete(b"key"), Ok(()));
        assert_eq!(store.delete(b"key"), Err(CacheError::NotFound));
        let stats = store.stats();
        assert_eq!(stats.delete_cmds, 2);
        assert_eq!(stats.delete_hits, 1);
        assert_eq!(stats.delete_misses, 1);
        assert_eq!(stats.get_cmds, 0);
        assert_eq!(stats.curr_items, 0);
    }

    #[test]
    fn test_lazy_expiration() {
        let (mut store, clock) = create_test_store();
        store_value(&mut store, b"key", b"value", 10);

        clock.set(9);
        let item = store.get(b"key").unwrap();
        store.remove(item);

        clock.set(10);
        assert!(store.get(b"key").is_none());
        let stats = store.stats();
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.curr_items, 0);
        assert!(store.check_invariants().is_ok());
    }

    #[test]
    fn test_touch() {
        let (mut store, clock) = create_test_store();
        store_value(&mut store, b"key", b"value", 10);

        let item = store.touch(b"key", 100).unwrap();
        assert_eq!(store.item(&item).exptime(), 100);
        store.remove(item);

        clock.set(50);
        let item = store.get(b"key").unwrap();
        store.remove(item);
        assert!(store.touch(b"missing", 100).is_none());
    }

    #[test]
    fn test_replace() {
        let (mut store, _clock) = create_test_store();
        store_value(&mut store, b"key", b"one", 0);

        let old = store.get(b"key").unwrap();
        let new = store.allocate(b"key", 0, 0, 3).unwrap();
        store.value_mut(&new).copy_from_slice(b"two");
        assert_eq!(store.replace(&old, &new), Ok(LinkOutcome::Linked));
        store.remove(old);
        store.remove(new);

        let item = store.get(b"key").unwrap();
        assert_eq!(store.item(&item).value(), b"two");
        store.remove(item);
        assert_eq!(store.len(), 1);
        assert!(store.check_invariants().is_ok());
    }

    #[test]
    fn test_replace_key_mismatch() {
        let (mut store, _clock) = create_test_store();
        store_value(&mut store, b"a", b"one", 0);

        let old = store.get(b"a").unwrap();
        let new = store.allocate(b"b", 0, 0, 3).unwrap();
        assert_eq!(store.replace(&old, &new), Err(CacheError::KeyMismatch));
        assert!(store.item(&old).is_linked());
        store.remove(old);
        store.remove(new);
        assert!(store.check_invariants().is_ok());
    }

    #[test]
    fn test_update_recency() {
        let (mut store, clock) = create_test_store();
        store_value(&mut store, b"a", b"1", 0);
        store_value(&mut store, b"b", b"1", 0);
        let class = store.item_class(b"a", 1);

        let a = store.get(b"a").unwrap();

        // too soon: nothing moves
        clock.set(30);
        store.update_recency(&a);
        assert_eq!(store.item(&a).time(), 0);
        assert_eq!(store.lru_tail_key(class), b"a");

        clock.set(61);
        store.update_recency(&a);
        assert_eq!(store.item(&a).time(), 61);
        assert_eq!(store.lru_tail_key(class), b"b");
        store.remove(a);
        assert!(store.check_invariants().is_ok());
    }

    #[test]
    #[should_panic(expected = "link of an item that is not allocated")]
    fn test_double_link_panics() {
        let (mut store, _clock) = create_test_store();
        let item = store.allocate(b"key", 0, 0, 1).unwrap();
        store.link(&item);
        store.link(&item);
    }

    #[test]
    fn test_maintain_finishes_resize() {
        let (mut store, _clock) = create_test_store();
        let mut started = false;
        for i in 0..25 {
            let key = format!("key:{i}");
            let item = store.allocate(key.as_bytes(), 0, 0, 1).unwrap();
            started |= store.link(&item) == LinkOutcome::ResizeStarted;
            store.remove(item);
        }
        assert!(started);
        assert!(store.stats().hash_is_expanding);
        assert!(store.maintain(4));
        assert!(!store.maintain(100));
        assert_eq!(store.stats().hash_power, 5);
        assert!(store.check_invariants().is_ok());
    }

    impl Store {
        fn item_class(&self, key: &[u8], value_len: usize) -> u8 {
            self.size_class(key.len(), 0, value_len).unwrap().0
        }

        fn lru_tail_key(&self, class_id: u8) -> Vec<u8> {
            let class = self.allocator.class(class_id).unwrap();
            let tail = class.lru_tail().unwrap();
            self.allocator.key(class.chunk_id(tail)).to_vec()
        }
    }
}
