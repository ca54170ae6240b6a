//! Item metadata, handles and read views.
//!
//! Each chunk holding an item is laid out as:
//!
//! ```text
//! +-------------+-----------+------+---------------------------+-----------+------+
//! | header area |    key    | \0   | " <flags> <value_len>\r\n" |   value   | \r\n |
//! | HEADER_SIZE |   nkey    |  1   |          nsuffix          | value_len |  2   |
//! +-------------+-----------+------+---------------------------+-----------+------+
//! ```
//!
//! The header area is reserved; the metadata itself lives in a per-class
//! side table of [`ItemHeader`]s indexed by chunk index. Links between items
//! (LRU, free list, hash chains) are indices, not pointers.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::config::HEADER_SIZE;
use crate::location::ChunkId;

/// Bytes appended after the value.
pub const VALUE_TERMINATOR: &[u8] = b"\r\n";

/// Which structure an item currently belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemState {
    /// On its class free list. Never linked and never referenced.
    Free,
    /// Handed out by the allocator but not (or no longer) linked.
    Allocated,
    /// Present in the hash index and in its class LRU.
    Linked,
}

/// Per-chunk item metadata.
pub struct ItemHeader {
    /// Previous entry in the LRU or free list (class-local chunk index).
    pub(crate) prev: Option<u32>,
    /// Next entry in the LRU or free list (class-local chunk index).
    pub(crate) next: Option<u32>,
    /// Next item in the hash chain.
    pub(crate) h_next: Option<ChunkId>,
    refcount: AtomicU32,
    pub(crate) state: ItemState,
    pub(crate) fetched: bool,
    /// Last access time (relative seconds).
    pub(crate) time: u32,
    /// Expiration time (relative seconds, 0 = never).
    pub(crate) exptime: u32,
    pub(crate) flags: u32,
    pub(crate) nkey: u8,
    pub(crate) nsuffix: u8,
    /// Value length including the trailing CRLF.
    pub(crate) nbytes: u32,
}

impl ItemHeader {
    /// Metadata for a chunk that has never held an item.
    pub(crate) fn free() -> Self {
        Self {
            prev: None,
            next: None,
            h_next: None,
            refcount: AtomicU32::new(0),
            state: ItemState::Free,
            fetched: false,
            time: 0,
            exptime: 0,
            flags: 0,
            nkey: 0,
            nsuffix: 0,
            nbytes: 0,
        }
    }

    /// Reset the metadata for a freshly allocated item holding one reference.
    pub(crate) fn init(&mut self, nkey: u8, nsuffix: u8, nbytes: u32, flags: u32, exptime: u32) {
        self.prev = None;
        self.next = None;
        self.h_next = None;
        self.refcount.store(1, Ordering::Relaxed);
        self.state = ItemState::Allocated;
        self.fetched = false;
        self.time = 0;
        self.exptime = exptime;
        self.flags = flags;
        self.nkey = nkey;
        self.nsuffix = nsuffix;
        self.nbytes = nbytes;
    }

    #[inline]
    pub(crate) fn refcount(&self) -> u32 {
        self.refcount.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn refcount_incr(&self) -> u32 {
        self.refcount.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Decrement and return the new count.
    #[inline]
    pub(crate) fn refcount_decr(&self) -> u32 {
        let prev = self.refcount.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(prev > 0, "refcount underflow");
        prev - 1
    }

    #[inline]
    pub(crate) fn is_linked(&self) -> bool {
        self.state == ItemState::Linked
    }

    /// Whether the item has an expiration time that is at or before `now`.
    #[inline]
    pub(crate) fn is_expired(&self, now: u32) -> bool {
        self.exptime != 0 && self.exptime <= now
    }

    #[inline]
    pub(crate) fn key_len(&self) -> usize {
        self.nkey as usize
    }

    /// Value length without the CRLF terminator.
    #[inline]
    pub(crate) fn value_len(&self) -> usize {
        self.nbytes as usize - VALUE_TERMINATOR.len()
    }

    #[inline]
    pub(crate) fn key_range(&self) -> std::ops::Range<usize> {
        HEADER_SIZE..HEADER_SIZE + self.key_len()
    }

    #[inline]
    pub(crate) fn suffix_range(&self) -> std::ops::Range<usize> {
        let start = HEADER_SIZE + self.key_len() + 1;
        start..start + self.nsuffix as usize
    }

    /// Value range without the CRLF terminator.
    #[inline]
    pub(crate) fn value_range(&self) -> std::ops::Range<usize> {
        let start = self.suffix_range().end;
        start..start + self.value_len()
    }

    /// Value range including the CRLF terminator.
    #[inline]
    pub(crate) fn data_range(&self) -> std::ops::Range<usize> {
        let start = self.suffix_range().end;
        start..start + self.nbytes as usize
    }

    /// Bytes of the chunk the item occupies.
    #[inline]
    pub(crate) fn total_size(&self) -> usize {
        HEADER_SIZE + self.key_len() + 1 + self.nsuffix as usize + self.nbytes as usize
    }
}

/// The metadata suffix stored between key and value.
pub fn make_suffix(flags: u32, value_len: usize) -> String {
    format!(" {} {}\r\n", flags, value_len)
}

/// Total chunk bytes needed for an item, or `None` if the size overflows.
pub fn item_size(key_len: usize, flags: u32, value_len: usize) -> Option<usize> {
    (HEADER_SIZE + 1 + make_suffix(flags, value_len).len() + VALUE_TERMINATOR.len())
        .checked_add(key_len)?
        .checked_add(value_len)
}

/// A counted reference to an item.
///
/// Every handle returned by the store holds one reference count on the
/// item, keeping its chunk from being reused. The handle cannot be cloned;
/// give it back with `remove` exactly once.
#[must_use = "an item handle holds a reference and must be released with remove()"]
#[derive(Debug, PartialEq, Eq)]
pub struct ItemRef {
    id: ChunkId,
}

impl ItemRef {
    #[inline]
    pub(crate) fn new(id: ChunkId) -> Self {
        Self { id }
    }

    /// The chunk holding the item.
    #[inline]
    pub fn id(&self) -> ChunkId {
        self.id
    }
}

/// Read-only view of an item.
#[derive(Clone, Copy)]
pub struct ItemView<'a> {
    header: &'a ItemHeader,
    chunk: &'a [u8],
    id: ChunkId,
}

impl<'a> ItemView<'a> {
    pub(crate) fn new(id: ChunkId, header: &'a ItemHeader, chunk: &'a [u8]) -> Self {
        Self { header, chunk, id }
    }

    /// The chunk holding the item.
    pub fn id(&self) -> ChunkId {
        self.id
    }

    /// Size class of the item.
    pub fn class_id(&self) -> u8 {
        self.id.class_id()
    }

    /// Key bytes.
    pub fn key(&self) -> &'a [u8] {
        &self.chunk[self.header.key_range()]
    }

    /// Value bytes without the CRLF terminator.
    pub fn value(&self) -> &'a [u8] {
        &self.chunk[self.header.value_range()]
    }

    /// Value bytes followed by CRLF, ready for a text response.
    pub fn data(&self) -> &'a [u8] {
        &self.chunk[self.header.data_range()]
    }

    /// The `" <flags> <value_len>\r\n"` suffix.
    pub fn suffix(&self) -> &'a [u8] {
        &self.chunk[self.header.suffix_range()]
    }

    /// Client flags.
    pub fn flags(&self) -> u32 {
        self.header.flags
    }

    /// Expiration time (relative seconds, 0 = never).
    pub fn exptime(&self) -> u32 {
        self.header.exptime
    }

    /// Last access time (relative seconds).
    pub fn time(&self) -> u32 {
        self.header.time
    }

    /// Current reference count, including the index's own reference.
    pub fn refcount(&self) -> u32 {
        self.header.refcount()
    }

    /// Current state.
    pub fn state(&self) -> ItemState {
        self.header.state
    }

    /// Whether the item is in the index and LRU.
    pub fn is_linked(&self) -> bool {
        self.header.is_linked()
    }

    /// Whether the item has been read since it was linked.
    pub fn is_fetched(&self) -> bool {
        self.header.fetched
    }

    /// Chunk bytes occupied by the item.
    pub fn total_size(&self) -> usize {
        self.header.total_size()
    }
}

impl std::fmt::Debug for ItemView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemView")
            .field("id", &self.id)
            .field("key", &String::from_utf8_lossy(self.key()))
            .field("value_len", &self.header.value_len())
            .field("flags", &self.header.flags)
            .field("exptime", &self.header.exptime)
            .field("refcount", &self.refcount())
            .field("state", &self.header.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_suffix() {
        assert_eq!(make_suffix(0, 5), " 0 5\r\n");
        assert_eq!(make_suffix(42, 1024), " 42 1024\r\n");
        assert_eq!(make_suffix(u32::MAX, 0), " 4294967295 0\r\n");
    }

    #[test]
    fn test_item_size() {
        // 48 + 3 + 1 + " 0 5\r\n"(6) + 5 + 2
        assert_eq!(item_size(3, 0, 5), Some(65));
        assert_eq!(item_size(3, 10, 5), Some(66));
    }

    #[test]
    fn test_item_size_overflow() {
        assert_eq!(item_size(3, 0, usize::MAX), None);
        assert_eq!(item_size(3, 0, usize::MAX - 60), None);
        assert_eq!(item_size(usize::MAX, 0, 0), None);
    }

    #[test]
    fn test_header_ranges() {
        let mut header = ItemHeader::free();
        let suffix = make_suffix(7, 4);
        header.init(3, suffix.len() as u8, 4 + 2, 7, 0);

        assert_eq!(header.key_range(), HEADER_SIZE..HEADER_SIZE + 3);
        assert_eq!(header.suffix_range().start, HEADER_SIZE + 4);
        assert_eq!(header.suffix_range().len(), suffix.len());
        assert_eq!(header.value_range().len(), 4);
        assert_eq!(header.data_range().len(), 6);
        assert_eq!(Some(header.total_size()), item_size(3, 7, 4));
    }

    #[test]
    fn test_refcount() {
        let mut header = ItemHeader::free();
        assert_eq!(header.refcount(), 0);
        header.init(1, 6, 3, 0, 0);
        assert_eq!(header.refcount(), 1);
        assert_eq!(header.refcount_incr(), 2);
        assert_eq!(header.refcount_decr(), 1);
        assert_eq!(header.refcount_decr(), 0);
        assert_eq!(header.state, ItemState::Allocated);
    }

    #[test]
    fn test_is_expired() {
        let mut header = ItemHeader::free();
        header.init(1, 6, 3, 0, 0);
        assert!(!header.is_expired(u32::MAX));

        header.exptime = 10;
        assert!(!header.is_expired(9));
        assert!(header.is_expired(10));
        assert!(header.is_expired(11));
    }
}
