//! Hash chain access backed by slab item metadata.
//!
//! The index stores only bucket heads; chains and keys live in the slab
//! allocator. This lets [`HashIndex`](crate::hashtable::HashIndex) walk and
//! relink chains without owning any item memory.

use crate::allocator::SlabAllocator;
use crate::hashtable::ChainLinks;
use crate::location::ChunkId;

impl ChainLinks for SlabAllocator {
    #[inline]
    fn key(&self, id: ChunkId) -> &[u8] {
        let header = self.header(id);
        &self.chunk(id)[header.key_range()]
    }

    #[inline]
    fn key_matches(&self, id: ChunkId, key: &[u8]) -> bool {
        let header = self.header(id);
        header.key_len() == key.len() && &self.chunk(id)[header.key_range()] == key
    }

    #[inline]
    fn chain_next(&self, id: ChunkId) -> Option<ChunkId> {
        self.header(id).h_next
    }

    #[inline]
    fn set_chain_next(&mut self, id: ChunkId, next: Option<ChunkId>) {
        self.header_mut(id).h_next = next;
    }
}
