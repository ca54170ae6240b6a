//! Chunk addressing.
//!
//! A chunk is identified by its size class and its index within that class.
//! The index counts chunks across all pages of the class in page order, so
//! `page = index / per_page` and `slot = index % per_page`.

/// Identifies one chunk in the slab allocator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId {
    class_id: u8,
    index: u32,
}

impl ChunkId {
    /// Create a chunk id.
    #[inline]
    pub fn new(class_id: u8, index: u32) -> Self {
        Self { class_id, index }
    }

    /// The size class this chunk belongs to.
    #[inline]
    pub fn class_id(&self) -> u8 {
        self.class_id
    }

    /// The chunk index within its class.
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Split the index into (page, slot) for a class with `per_page` chunks
    /// per page.
    #[inline]
    pub fn page_and_slot(&self, per_page: usize) -> (usize, usize) {
        let index = self.index as usize;
        (index / per_page, index % per_page)
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.class_id, self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_fields() {
        let id = ChunkId::new(5, 1000);
        assert_eq!(id.class_id(), 5);
        assert_eq!(id.index(), 1000);
        assert_eq!(id.to_string(), "5:1000");
    }

    #[test]
    fn test_page_and_slot() {
        let id = ChunkId::new(0, 10);
        assert_eq!(id.page_and_slot(4), (2, 2));
        assert_eq!(id.page_and_slot(1), (10, 0));
        assert_eq!(id.page_and_slot(16), (0, 10));
    }
}
