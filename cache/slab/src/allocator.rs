//! Slab allocator managing memory pages and slab classes.
//!
//! The allocator hands out fixed-size chunks from per-class free lists,
//! adding a page to a class when its free list runs dry. Pages come either
//! from the global allocator or from an arena reserved up front, and are
//! never returned until the allocator is dropped.

use tracing::{debug, info, warn};

use crate::class::{Page, SlabClass};
use crate::config::{CHUNK_ALIGN_BYTES, MemorySource, SlabCacheConfig, SlabClasses};
use crate::error::{CacheError, CacheResult};
use crate::item::{ItemHeader, ItemView};
use crate::location::ChunkId;

/// A preallocated memory region that pages are carved from.
struct Arena {
    buf: Box<[u8]>,
    used: usize,
}

impl Arena {
    fn empty() -> Self {
        Self {
            buf: Box::default(),
            used: 0,
        }
    }

    fn reserve(len: usize) -> Option<Self> {
        Some(Self {
            buf: zeroed(len)?,
            used: 0,
        })
    }

    /// Carve `len` bytes, returning the offset.
    fn carve(&mut self, len: usize) -> Option<usize> {
        let rem = self.used % CHUNK_ALIGN_BYTES;
        let offset = if rem == 0 {
            self.used
        } else {
            self.used + CHUNK_ALIGN_BYTES - rem
        };
        if offset.checked_add(len)? > self.buf.len() {
            return None;
        }
        self.used = offset + len;
        Some(offset)
    }

    fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.used)
    }
}

/// Allocate a zeroed buffer without aborting on failure.
fn zeroed(len: usize) -> Option<Box<[u8]>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).ok()?;
    buf.resize(len, 0);
    Some(buf.into_boxed_slice())
}

/// Statistics for a single slab class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassStats {
    /// Class ID.
    pub class_id: u8,
    /// Chunk size in bytes.
    pub chunk_size: usize,
    /// Chunks per page.
    pub per_page: usize,
    /// Pages owned by the class.
    pub pages: usize,
    /// Chunks across all pages.
    pub total_chunks: usize,
    /// Chunks on the free list.
    pub free_chunks: usize,
    /// Chunks handed out (linked or held).
    pub used_chunks: usize,
    /// Items in the class LRU.
    pub lru_items: usize,
    /// Bytes requested by items occupying chunks.
    pub requested_bytes: usize,
}

/// The slab allocator.
pub struct SlabAllocator {
    /// Slab classes (indexed by class_id).
    classes: Vec<SlabClass>,
    /// Class table the classes were built from.
    table: SlabClasses,
    /// Arena backing store. Empty when pages come from the heap.
    arena: Arena,
    /// Memory budget in bytes. 0 means unlimited.
    memory_limit: usize,
    /// Bytes handed to classes as pages.
    memory_malloced: usize,
}

impl SlabAllocator {
    /// Create a new slab allocator.
    ///
    /// The configuration must already be validated. With `preallocate` set,
    /// every class gets one page immediately and failure to supply one is
    /// returned as [`CacheError::Preallocation`].
    pub fn new(config: &SlabCacheConfig) -> CacheResult<Self> {
        let table = SlabClasses::new(config);

        let classes: Vec<SlabClass> = table
            .iter()
            .map(|info| {
                debug!(
                    class_id = info.class_id,
                    chunk_size = info.chunk_size,
                    per_page = info.per_page,
                    "slab class"
                );
                SlabClass::new(*info)
            })
            .collect();

        let arena = match config.memory_source {
            MemorySource::Heap => Arena::empty(),
            MemorySource::Arena => match Arena::reserve(config.memory_limit) {
                Some(arena) => arena,
                None => {
                    warn!(
                        bytes = config.memory_limit,
                        "unable to reserve slab arena, falling back to heap pages"
                    );
                    Arena::empty()
                }
            },
        };

        let mut allocator = Self {
            classes,
            table,
            arena,
            memory_limit: config.memory_limit,
            memory_malloced: 0,
        };

        if config.preallocate {
            for class_id in 0..allocator.classes.len() as u8 {
                if !allocator.grow(class_id) {
                    return Err(CacheError::Preallocation { class_id });
                }
            }
            info!(
                classes = allocator.classes.len(),
                bytes = allocator.memory_malloced,
                "preallocated one page per slab class"
            );
        }

        Ok(allocator)
    }

    /// Select the smallest class that fits an item of `size` total bytes.
    #[inline]
    pub fn class_for(&self, size: usize) -> Option<u8> {
        self.table.select_class(size)
    }

    /// Get a reference to a slab class.
    #[inline]
    pub fn class(&self, class_id: u8) -> Option<&SlabClass> {
        self.classes.get(class_id as usize)
    }

    #[inline]
    pub(crate) fn class_mut(&mut self, class_id: u8) -> Option<&mut SlabClass> {
        self.classes.get_mut(class_id as usize)
    }

    /// Number of slab classes.
    #[inline]
    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    /// The class table.
    pub fn classes(&self) -> &SlabClasses {
        &self.table
    }

    /// Hand out a chunk of the given class, adding a page if needed.
    ///
    /// `requested` is the number of bytes the caller will use and is added
    /// to the class accounting. Returns `None` when the class has no free
    /// chunk and no page can be added.
    pub fn acquire(&mut self, class_id: u8, requested: usize) -> Option<ChunkId> {
        let class = self.classes.get(class_id as usize)?;
        if class.free_count() == 0 && !self.grow(class_id) {
            return None;
        }

        let class = &mut self.classes[class_id as usize];
        let index = class.free_pop()?;
        class.add_requested(requested);
        Some(class.chunk_id(index))
    }

    /// Return a chunk to its class free list.
    ///
    /// The chunk must not be linked and must not already be free.
    pub fn release(&mut self, id: ChunkId, requested: usize) {
        if let Some(class) = self.classes.get_mut(id.class_id() as usize) {
            class.sub_requested(requested);
            class.free_push(id.index());
        }
    }

    /// Update accounting for a chunk reused in place for a different size.
    pub fn adjust_requested(&mut self, class_id: u8, old: usize, new: usize) {
        if let Some(class) = self.classes.get_mut(class_id as usize) {
            class.sub_requested(old);
            class.add_requested(new);
        }
    }

    /// Add one page to a class.
    ///
    /// Refused when the budget is exhausted and the class already owns a
    /// page, or when no memory can be obtained.
    fn grow(&mut self, class_id: u8) -> bool {
        let Some(class) = self.classes.get_mut(class_id as usize) else {
            return false;
        };
        let len = class.chunk_size() * class.per_page();

        if self.memory_limit != 0
            && self.memory_malloced + len > self.memory_limit
            && class.page_count() > 0
        {
            return false;
        }

        if !class.reserve_page() {
            return false;
        }

        let page = if self.arena.buf.is_empty() {
            match zeroed(len) {
                Some(buf) => Page::Heap(buf),
                None => return false,
            }
        } else {
            match self.arena.carve(len) {
                Some(offset) => Page::Arena { offset },
                None => return false,
            }
        };

        class.add_page(page);
        self.memory_malloced += len;
        true
    }

    /// Metadata for a chunk.
    #[inline]
    pub(crate) fn header(&self, id: ChunkId) -> &ItemHeader {
        self.classes[id.class_id() as usize].header(id.index())
    }

    /// Mutable metadata for a chunk.
    #[inline]
    pub(crate) fn header_mut(&mut self, id: ChunkId) -> &mut ItemHeader {
        self.classes[id.class_id() as usize].header_mut(id.index())
    }

    /// Bytes of a chunk.
    pub(crate) fn chunk(&self, id: ChunkId) -> &[u8] {
        let class = &self.classes[id.class_id() as usize];
        let size = class.chunk_size();
        let (page, slot) = id.page_and_slot(class.per_page());
        let start = slot * size;
        match &class.pages[page] {
            Page::Heap(buf) => &buf[start..start + size],
            Page::Arena { offset } => &self.arena.buf[offset + start..offset + start + size],
        }
    }

    /// Mutable bytes of a chunk.
    pub(crate) fn chunk_mut(&mut self, id: ChunkId) -> &mut [u8] {
        let class = &mut self.classes[id.class_id() as usize];
        let size = class.chunk_size();
        let (page, slot) = id.page_and_slot(class.per_page());
        let start = slot * size;
        match &mut class.pages[page] {
            Page::Heap(buf) => &mut buf[start..start + size],
            Page::Arena { offset } => {
                let offset = *offset;
                &mut self.arena.buf[offset + start..offset + start + size]
            }
        }
    }

    /// Read view of the item in a chunk.
    pub(crate) fn view(&self, id: ChunkId) -> ItemView<'_> {
        ItemView::new(id, self.header(id), self.chunk(id))
    }

    /// Bytes handed to classes as pages.
    pub fn memory_used(&self) -> usize {
        self.memory_malloced
    }

    /// Memory budget (0 = unlimited).
    pub fn memory_limit(&self) -> usize {
        self.memory_limit
    }

    /// Bytes left in the arena (0 when pages come from the heap).
    pub fn arena_remaining(&self) -> usize {
        self.arena.remaining()
    }

    /// Statistics for one class.
    pub fn class_stats(&self, class_id: u8) -> Option<ClassStats> {
        let class = self.classes.get(class_id as usize)?;
        Some(ClassStats {
            class_id,
            chunk_size: class.chunk_size(),
            per_page: class.per_page(),
            pages: class.page_count(),
            total_chunks: class.total_chunks(),
            free_chunks: class.free_count(),
            used_chunks: class.total_chunks() - class.free_count(),
            lru_items: class.lru_count(),
            requested_bytes: class.requested(),
        })
    }

    /// Walk every class and check list and state invariants.
    pub(crate) fn check_classes(&self) -> Result<(), String> {
        for class in &self.classes {
            class.check_lists()?;
        }
        let pages: usize = self
            .classes
            .iter()
            .map(|c| c.page_count() * c.chunk_size() * c.per_page())
            .sum();
        if pages != self.memory_malloced {
            return Err(format!(
                "page bytes {} differ from malloced {}",
                pages, self.memory_malloced
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemState;

    fn small_config() -> SlabCacheConfig {
        SlabCacheConfig {
            memory_limit: 4096,
            page_size: 1024,
            ..Default::default()
        }
    }

    #[test]
    fn test_acquire_release() {
        let mut allocator = SlabAllocator::new(&small_config()).unwrap();
        assert_eq!(allocator.memory_used(), 0);

        let id = allocator.acquire(0, 80).unwrap();
        assert_eq!(id.class_id(), 0);
        assert_eq!(allocator.header(id).state, ItemState::Allocated);
        let stats = allocator.class_stats(0).unwrap();
        assert_eq!(stats.pages, 1);
        assert_eq!(stats.requested_bytes, 80);
        assert_eq!(stats.used_chunks, 1);
        assert_eq!(allocator.memory_used(), 96 * (1024 / 96));

        allocator.release(id, 80);
        let stats = allocator.class_stats(0).unwrap();
        assert_eq!(stats.requested_bytes, 0);
        assert_eq!(stats.used_chunks, 0);
        assert_eq!(allocator.header(id).state, ItemState::Free);
        assert!(allocator.check_classes().is_ok());
    }

    #[test]
    fn test_first_page_ignores_budget() {
        let mut allocator = SlabAllocator::new(&small_config()).unwrap();
        let last = allocator.num_classes() as u8 - 1;

        // the four largest classes take most of the 4KB budget
        for class_id in (last - 3)..=last {
            assert!(allocator.acquire(class_id, 10).is_some());
        }
        let used = allocator.memory_used();

        // a class without a page still gets its first one
        assert!(allocator.acquire(0, 10).is_some());
        assert!(allocator.memory_used() > used);

        // but a second page is refused
        let per_page = allocator.class(last).unwrap().per_page();
        assert_eq!(per_page, 1);
        assert!(allocator.acquire(last, 10).is_none());
    }

    #[test]
    fn test_budget_refuses_new_page() {
        let config = SlabCacheConfig {
            memory_limit: 1024,
            page_size: 1024,
            ..Default::default()
        };
        let mut allocator = SlabAllocator::new(&config).unwrap();
        let last = allocator.num_classes() as u8 - 1;

        let id = allocator.acquire(last, 1000).unwrap();
        assert!(allocator.acquire(last, 1000).is_none());

        // freed chunks are reused without a new page
        allocator.release(id, 1000);
        assert_eq!(allocator.acquire(last, 500), Some(id));
        assert_eq!(allocator.memory_used(), 1024);
    }

    #[test]
    fn test_unlimited_budget() {
        let config = SlabCacheConfig {
            memory_limit: 0,
            page_size: 1024,
            ..Default::default()
        };
        let mut allocator = SlabAllocator::new(&config).unwrap();
        let last = allocator.num_classes() as u8 - 1;
        for _ in 0..16 {
            assert!(allocator.acquire(last, 1024).is_some());
        }
        assert_eq!(allocator.class_stats(last).unwrap().pages, 16);
    }

    #[test]
    fn test_adjust_requested() {
        let mut allocator = SlabAllocator::new(&small_config()).unwrap();
        let _id = allocator.acquire(1, 100).unwrap();
        allocator.adjust_requested(1, 100, 110);
        assert_eq!(allocator.class_stats(1).unwrap().requested_bytes, 110);
    }

    #[test]
    fn test_arena_source() {
        let config = SlabCacheConfig {
            memory_limit: 2048,
            page_size: 1024,
            memory_source: MemorySource::Arena,
            ..Default::default()
        };
        let mut allocator = SlabAllocator::new(&config).unwrap();
        assert_eq!(allocator.arena_remaining(), 2048);

        let last = allocator.num_classes() as u8 - 1;
        let a = allocator.acquire(last, 1024).unwrap();
        let b = allocator.acquire(0, 96).unwrap();
        assert!(allocator.arena_remaining() < 1024);

        // arena pages are distinct, writable memory
        allocator.chunk_mut(a).fill(0xAA);
        allocator.chunk_mut(b).fill(0x55);
        assert!(allocator.chunk(a).iter().all(|&x| x == 0xAA));
        assert!(allocator.chunk(b).iter().all(|&x| x == 0x55));

        // arena exhausted: a third class cannot get its first page
        let c = allocator.class_for(200).unwrap();
        assert!(allocator.acquire(c, 200).is_none());
    }

    #[test]
    fn test_preallocate() {
        let config = SlabCacheConfig {
            memory_limit: 0,
            page_size: 1024,
            preallocate: true,
            ..Default::default()
        };
        let allocator = SlabAllocator::new(&config).unwrap();
        for class_id in 0..allocator.num_classes() as u8 {
            assert_eq!(allocator.class_stats(class_id).unwrap().pages, 1);
        }
    }

    #[test]
    fn test_preallocate_failure() {
        let config = SlabCacheConfig {
            memory_limit: 1024,
            page_size: 1024,
            preallocate: true,
            memory_source: MemorySource::Arena,
            ..Default::default()
        };
        assert!(matches!(
            SlabAllocator::new(&config),
            Err(CacheError::Preallocation { class_id: 1 })
        ));
    }

    #[test]
    fn test_chunks_do_not_overlap() {
        let mut allocator = SlabAllocator::new(&small_config()).unwrap();
        let a = allocator.acquire(0, 96).unwrap();
        let b = allocator.acquire(0, 96).unwrap();
        allocator.chunk_mut(a).fill(1);
        allocator.chunk_mut(b).fill(2);
        assert!(allocator.chunk(a).iter().all(|&x| x == 1));
        assert_eq!(allocator.chunk(b).len(), 96);
    }
}
