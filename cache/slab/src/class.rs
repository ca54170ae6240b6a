//! Slab class management with free list and LRU tracking.
//!
//! Each slab class manages chunks of a fixed size. Pages are added to a
//! class on demand and split into equal-sized chunks. Every chunk has an
//! [`ItemHeader`] in the class metadata table; the free list and the LRU
//! queue are both threaded through the headers' `prev`/`next` links.

use crate::config::ClassInfo;
use crate::item::{ItemHeader, ItemState};
use crate::location::ChunkId;

/// Backing storage for one page.
pub(crate) enum Page {
    /// A page allocated on its own.
    Heap(Box<[u8]>),
    /// A page carved from the allocator's arena, starting at `offset`.
    Arena { offset: usize },
}

/// A slab class manages all pages of a particular chunk size.
pub struct SlabClass {
    /// Class ID (index in the class table).
    class_id: u8,
    /// Chunk size for this class.
    chunk_size: usize,
    /// Chunks per page (page_size / chunk_size).
    per_page: usize,
    /// Pages owned by this class. Never released.
    pub(crate) pages: Vec<Page>,
    /// One header per chunk across all pages.
    pub(crate) meta: Vec<ItemHeader>,
    /// Head of the free list.
    free_head: Option<u32>,
    /// Number of chunks on the free list.
    free_count: usize,
    /// LRU head (most recently used).
    lru_head: Option<u32>,
    /// LRU tail (least recently used).
    lru_tail: Option<u32>,
    /// Number of items in the LRU.
    lru_count: usize,
    /// Bytes requested by items currently holding chunks.
    requested: usize,
}

impl SlabClass {
    /// Create an empty slab class.
    pub fn new(info: ClassInfo) -> Self {
        Self {
            class_id: info.class_id,
            chunk_size: info.chunk_size,
            per_page: info.per_page,
            pages: Vec::new(),
            meta: Vec::new(),
            free_head: None,
            free_count: 0,
            lru_head: None,
            lru_tail: None,
            lru_count: 0,
            requested: 0,
        }
    }

    /// Get the class ID.
    #[inline]
    pub fn class_id(&self) -> u8 {
        self.class_id
    }

    /// Get the chunk size for this class.
    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Get the number of chunks per page.
    #[inline]
    pub fn per_page(&self) -> usize {
        self.per_page
    }

    /// Get the number of pages.
    #[inline]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Total chunks across all pages.
    #[inline]
    pub fn total_chunks(&self) -> usize {
        self.meta.len()
    }

    /// Chunks currently on the free list.
    #[inline]
    pub fn free_count(&self) -> usize {
        self.free_count
    }

    /// Items currently in the LRU.
    #[inline]
    pub fn lru_count(&self) -> usize {
        self.lru_count
    }

    /// Bytes requested by items holding chunks of this class.
    #[inline]
    pub fn requested(&self) -> usize {
        self.requested
    }

    /// Least recently used item, if any.
    #[inline]
    pub fn lru_tail(&self) -> Option<u32> {
        self.lru_tail
    }

    /// Most recently used item, if any.
    #[inline]
    pub fn lru_head(&self) -> Option<u32> {
        self.lru_head
    }

    /// Chunk id for a class-local index.
    #[inline]
    pub fn chunk_id(&self, index: u32) -> ChunkId {
        ChunkId::new(self.class_id, index)
    }

    /// Reserve room for one more page and its headers.
    ///
    /// Returns false if either table cannot grow.
    pub(crate) fn reserve_page(&mut self) -> bool {
        self.pages.try_reserve(1).is_ok() && self.meta.try_reserve(self.per_page).is_ok()
    }

    /// Add a page and push all its chunks onto the free list.
    ///
    /// [`SlabClass::reserve_page`] must have succeeded first.
    pub(crate) fn add_page(&mut self, page: Page) -> usize {
        let page_id = self.pages.len();
        self.pages.push(page);

        let first = self.meta.len();
        self.meta
            .extend((0..self.per_page).map(|_| ItemHeader::free()));

        // push in reverse so the lowest chunk is handed out first
        for index in (first..first + self.per_page).rev() {
            self.free_link(index as u32);
        }

        page_id
    }

    /// Header of a chunk.
    #[inline]
    pub(crate) fn header(&self, index: u32) -> &ItemHeader {
        &self.meta[index as usize]
    }

    /// Mutable header of a chunk.
    #[inline]
    pub(crate) fn header_mut(&mut self, index: u32) -> &mut ItemHeader {
        &mut self.meta[index as usize]
    }

    /// Pop a chunk from the free list.
    pub(crate) fn free_pop(&mut self) -> Option<u32> {
        let index = self.free_head?;
        let next = self.meta[index as usize].next;
        self.free_head = next;
        if let Some(next) = next {
            self.meta[next as usize].prev = None;
        }
        self.free_count -= 1;

        let header = &mut self.meta[index as usize];
        header.next = None;
        header.prev = None;
        header.state = ItemState::Allocated;
        Some(index)
    }

    /// Push a chunk that was handed out back onto the free list.
    pub(crate) fn free_push(&mut self, index: u32) {
        let header = &self.meta[index as usize];
        debug_assert_ne!(header.state, ItemState::Free, "double free of chunk");
        debug_assert_ne!(header.state, ItemState::Linked, "freeing linked chunk");
        self.free_link(index);
    }

    fn free_link(&mut self, index: u32) {
        let old_head = self.free_head;
        {
            let header = &mut self.meta[index as usize];
            header.state = ItemState::Free;
            header.fetched = false;
            header.prev = None;
            header.next = old_head;
            header.h_next = None;
        }
        if let Some(old_head) = old_head {
            self.meta[old_head as usize].prev = Some(index);
        }
        self.free_head = Some(index);
        self.free_count += 1;
    }

    /// Insert an item at the LRU head (most recently used).
    pub(crate) fn lru_insert_head(&mut self, index: u32) {
        let old_head = self.lru_head;
        {
            let header = &mut self.meta[index as usize];
            header.prev = None;
            header.next = old_head;
        }

        match old_head {
            Some(old) => self.meta[old as usize].prev = Some(index),
            // List was empty, this is also the tail
            None => self.lru_tail = Some(index),
        }

        self.lru_head = Some(index);
        self.lru_count += 1;
    }

    /// Remove an item from the LRU.
    pub(crate) fn lru_remove(&mut self, index: u32) {
        let (prev, next) = {
            let header = &self.meta[index as usize];
            (header.prev, header.next)
        };

        match prev {
            Some(prev) => self.meta[prev as usize].next = next,
            None => {
                debug_assert_eq!(self.lru_head, Some(index));
                self.lru_head = next;
            }
        }

        match next {
            Some(next) => self.meta[next as usize].prev = prev,
            None => {
                debug_assert_eq!(self.lru_tail, Some(index));
                self.lru_tail = prev;
            }
        }

        let header = &mut self.meta[index as usize];
        header.prev = None;
        header.next = None;
        self.lru_count -= 1;
    }

    /// Move an item to the LRU head.
    pub(crate) fn lru_touch(&mut self, index: u32) {
        if self.lru_head == Some(index) {
            return;
        }
        self.lru_remove(index);
        self.lru_insert_head(index);
    }

    /// Iterate over up to `limit` items starting at the LRU tail.
    pub(crate) fn lru_tail_iter(&self, limit: usize) -> LruTailIter<'_> {
        LruTailIter {
            class: self,
            cursor: self.lru_tail,
            remaining: limit,
        }
    }

    #[inline]
    pub(crate) fn add_requested(&mut self, bytes: usize) {
        self.requested += bytes;
    }

    #[inline]
    pub(crate) fn sub_requested(&mut self, bytes: usize) {
        debug_assert!(self.requested >= bytes, "requested bytes underflow");
        self.requested = self.requested.saturating_sub(bytes);
    }

    /// Walk the LRU and free list and check their link and state invariants.
    pub(crate) fn check_lists(&self) -> Result<(), String> {
        let mut count = 0;
        let mut prev = None;
        let mut cursor = self.lru_head;
        while let Some(index) = cursor {
            let header = self.meta.get(index as usize).ok_or_else(|| {
                format!("class {}: lru link {} out of range", self.class_id, index)
            })?;
            if header.state != ItemState::Linked {
                return Err(format!(
                    "class {}: chunk {} in lru but {:?}",
                    self.class_id, index, header.state
                ));
            }
            if header.prev != prev {
                return Err(format!(
                    "class {}: chunk {} has prev {:?}, expected {:?}",
                    self.class_id, index, header.prev, prev
                ));
            }
            count += 1;
            if count > self.meta.len() {
                return Err(format!("class {}: lru cycle", self.class_id));
            }
            prev = Some(index);
            cursor = header.next;
        }
        if prev != self.lru_tail {
            return Err(format!(
                "class {}: lru tail {:?}, walk ended at {:?}",
                self.class_id, self.lru_tail, prev
            ));
        }
        if count != self.lru_count {
            return Err(format!(
                "class {}: lru count {} but {} reachable",
                self.class_id, self.lru_count, count
            ));
        }

        let mut free = 0;
        let mut cursor = self.free_head;
        while let Some(index) = cursor {
            let header = &self.meta[index as usize];
            if header.state != ItemState::Free {
                return Err(format!(
                    "class {}: chunk {} on free list but {:?}",
                    self.class_id, index, header.state
                ));
            }
            if header.refcount() != 0 {
                return Err(format!(
                    "class {}: free chunk {} has refcount {}",
                    self.class_id,
                    index,
                    header.refcount()
                ));
            }
            free += 1;
            if free > self.meta.len() {
                return Err(format!("class {}: free list cycle", self.class_id));
            }
            cursor = header.next;
        }
        if free != self.free_count {
            return Err(format!(
                "class {}: free count {} but {} reachable",
                self.class_id, self.free_count, free
            ));
        }

        let linked = self
            .meta
            .iter()
            .filter(|h| h.state == ItemState::Linked)
            .count();
        if linked != self.lru_count {
            return Err(format!(
                "class {}: {} linked items but lru holds {}",
                self.class_id, linked, self.lru_count
            ));
        }
        let slabbed = self
            .meta
            .iter()
            .filter(|h| h.state == ItemState::Free)
            .count();
        if slabbed != self.free_count {
            return Err(format!(
                "class {}: {} free chunks but free list holds {}",
                self.class_id, slabbed, self.free_count
            ));
        }
        Ok(())
    }
}

/// Iterator from the LRU tail towards the head.
pub(crate) struct LruTailIter<'a> {
    class: &'a SlabClass,
    cursor: Option<u32>,
    remaining: usize,
}

impl Iterator for LruTailIter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.remaining == 0 {
            return None;
        }
        let index = self.cursor?;
        self.remaining -= 1;
        self.cursor = self.class.meta[index as usize].prev;
        Some(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_class(per_page: usize) -> SlabClass {
        let mut class = SlabClass::new(ClassInfo {
            class_id: 0,
            chunk_size: 64,
            per_page,
        });
        assert!(class.reserve_page());
        class.add_page(Page::Heap(vec![0u8; 64 * per_page].into_boxed_slice()));
        class
    }

    fn link(class: &mut SlabClass, index: u32) {
        class.header_mut(index).init(1, 6, 3, 0, 0);
        class.header_mut(index).state = ItemState::Linked;
        class.lru_insert_head(index);
    }

    #[test]
    fn test_slab_class_creation() {
        let class = SlabClass::new(ClassInfo {
            class_id: 3,
            chunk_size: 128,
            per_page: 8192,
        });
        assert_eq!(class.class_id(), 3);
        assert_eq!(class.chunk_size(), 128);
        assert_eq!(class.per_page(), 8192);
        assert_eq!(class.page_count(), 0);
        assert_eq!(class.free_count(), 0);
    }

    #[test]
    fn test_slab_class_add_page() {
        let mut class = test_class(16);
        assert_eq!(class.page_count(), 1);
        assert_eq!(class.total_chunks(), 16);
        assert_eq!(class.free_count(), 16);
        assert!(class.check_lists().is_ok());

        // lowest chunk comes out first
        assert_eq!(class.free_pop(), Some(0));
        assert_eq!(class.free_pop(), Some(1));
        assert_eq!(class.free_count(), 14);
    }

    #[test]
    fn test_free_list_exhaustion() {
        let mut class = test_class(2);
        let a = class.free_pop().unwrap();
        let b = class.free_pop().unwrap();
        assert_ne!(a, b);
        assert_eq!(class.free_pop(), None);

        class.header_mut(a).init(1, 6, 3, 0, 0);
        class.free_push(a);
        assert_eq!(class.free_count(), 1);
        assert_eq!(class.free_pop(), Some(a));
    }

    #[test]
    fn test_slab_class_lru() {
        let mut class = test_class(4);
        let a = class.free_pop().unwrap();
        let b = class.free_pop().unwrap();
        let c = class.free_pop().unwrap();

        link(&mut class, a);
        link(&mut class, b);
        link(&mut class, c);

        assert_eq!(class.lru_count(), 3);
        assert_eq!(class.lru_head(), Some(c));
        assert_eq!(class.lru_tail(), Some(a));
        assert!(class.check_lists().is_ok());

        let order: Vec<u32> = class.lru_tail_iter(10).collect();
        assert_eq!(order, vec![a, b, c]);
        let limited: Vec<u32> = class.lru_tail_iter(2).collect();
        assert_eq!(limited, vec![a, b]);

        class.lru_remove(b);
        class.header_mut(b).state = ItemState::Allocated;
        assert_eq!(class.lru_count(), 2);
        let order: Vec<u32> = class.lru_tail_iter(10).collect();
        assert_eq!(order, vec![a, c]);

        class.lru_remove(a);
        class.header_mut(a).state = ItemState::Allocated;
        class.lru_remove(c);
        class.header_mut(c).state = ItemState::Allocated;
        assert_eq!(class.lru_count(), 0);
        assert_eq!(class.lru_head(), None);
        assert_eq!(class.lru_tail(), None);
        assert!(class.check_lists().is_ok());
    }

    #[test]
    fn test_slab_class_lru_touch() {
        let mut class = test_class(4);
        let a = class.free_pop().unwrap();
        let b = class.free_pop().unwrap();

        // Insert a, then b (head is b)
        link(&mut class, a);
        link(&mut class, b);

        // Touch a (move to head)
        class.lru_touch(a);
        assert_eq!(class.lru_head(), Some(a));
        assert_eq!(class.lru_tail(), Some(b));

        // touching the head is a no-op
        class.lru_touch(a);
        assert_eq!(class.lru_head(), Some(a));
        assert!(class.check_lists().is_ok());
    }

    #[test]
    fn test_requested_accounting() {
        let mut class = test_class(4);
        class.add_requested(100);
        class.add_requested(50);
        assert_eq!(class.requested(), 150);
        class.sub_requested(100);
        assert_eq!(class.requested(), 50);
    }

    #[test]
    fn test_check_lists_detects_bad_state() {
        let mut class = test_class(4);
        let a = class.free_pop().unwrap();
        link(&mut class, a);
        class.header_mut(a).state = ItemState::Allocated;
        assert!(class.check_lists().is_err());
    }
}
