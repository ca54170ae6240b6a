//! Chained hash index with incremental resizing.
//!
//! The index maps keys to chunks. Buckets hold the head of a singly linked
//! chain threaded through each item's `h_next` link, so the index itself
//! stores one slot per bucket and never owns item memory.
//!
//! When the number of items exceeds 1.5x the number of buckets, a table of
//! twice the size is allocated and the old table is migrated one bucket at
//! a time. While a resize is in progress the resize cursor decides which
//! table is authoritative for a given hash:
//!
//! ```text
//! old_bucket = hash & old_mask
//! old_bucket >= cursor  ->  old[old_bucket]      (not migrated yet)
//! old_bucket <  cursor  ->  primary[hash & mask] (already migrated)
//! ```

use ahash::RandomState;
use tracing::{info, warn};

use crate::config::MAX_HASHPOWER;
use crate::location::ChunkId;

/// Access to the chain links and keys of items referenced by the index.
///
/// The slab allocator implements this so the index can walk and rewrite
/// chains that live in item metadata.
pub trait ChainLinks {
    /// The key stored in a chunk.
    fn key(&self, id: ChunkId) -> &[u8];

    /// Whether the chunk holds `key`. Length is compared before bytes.
    fn key_matches(&self, id: ChunkId, key: &[u8]) -> bool {
        let stored = self.key(id);
        stored.len() == key.len() && stored == key
    }

    /// Next item in the chain.
    fn chain_next(&self, id: ChunkId) -> Option<ChunkId>;

    /// Rewrite the chain link of an item.
    fn set_chain_next(&mut self, id: ChunkId, next: Option<ChunkId>);
}

/// Result of inserting into the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The item was inserted.
    Inserted,
    /// The item was inserted and the insert started a resize.
    ResizeStarted,
}

#[derive(Clone, Copy)]
enum Slot {
    Primary(usize),
    Old(usize),
}

/// Chained hash index.
pub struct HashIndex {
    hash_builder: RandomState,
    /// Current table, 2^hashpower buckets.
    primary: Vec<Option<ChunkId>>,
    /// Table being migrated from. Empty unless expanding.
    old: Vec<Option<ChunkId>>,
    hashpower: u8,
    expanding: bool,
    /// Next old bucket to migrate.
    expand_bucket: usize,
    items: usize,
}

impl HashIndex {
    /// Create an index with 2^`hashpower` buckets.
    ///
    /// # Panics
    ///
    /// Panics if `hashpower` exceeds [`MAX_HASHPOWER`].
    pub fn new(hashpower: u8) -> Self {
        assert!(
            hashpower <= MAX_HASHPOWER,
            "hashpower must be at most {MAX_HASHPOWER}"
        );

        // Use fixed seeds in tests for deterministic behavior
        #[cfg(test)]
        let hash_builder = RandomState::with_seeds(
            0xbb8c484891ec6c86,
            0x0522a25ae9c769f9,
            0xeed2797b9571bc75,
            0x4feb29c1fbbd59d0,
        );
        #[cfg(not(test))]
        let hash_builder = RandomState::new();

        Self {
            hash_builder,
            primary: vec![None; 1 << hashpower],
            old: Vec::new(),
            hashpower,
            expanding: false,
            expand_bucket: 0,
            items: 0,
        }
    }

    /// Hash a key.
    #[inline]
    pub fn hash(&self, key: &[u8]) -> u64 {
        self.hash_builder.hash_one(key)
    }

    /// Current power (2^power buckets in the primary table).
    #[inline]
    pub fn hashpower(&self) -> u8 {
        self.hashpower
    }

    /// Buckets in the primary table.
    #[inline]
    pub fn buckets(&self) -> usize {
        self.primary.len()
    }

    /// Number of items in the index.
    #[inline]
    pub fn len(&self) -> usize {
        self.items
    }

    /// Whether the index is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items == 0
    }

    /// Whether a resize is in progress.
    #[inline]
    pub fn is_expanding(&self) -> bool {
        self.expanding
    }

    #[inline]
    fn mask(power: u8) -> u64 {
        (1u64 << power) - 1
    }

    fn slot(&self, hv: u64) -> Slot {
        if self.expanding {
            let old_bucket = (hv & Self::mask(self.hashpower - 1)) as usize;
            if old_bucket >= self.expand_bucket {
                return Slot::Old(old_bucket);
            }
        }
        Slot::Primary((hv & Self::mask(self.hashpower)) as usize)
    }

    #[inline]
    fn head(&self, slot: Slot) -> Option<ChunkId> {
        match slot {
            Slot::Primary(b) => self.primary[b],
            Slot::Old(b) => self.old[b],
        }
    }

    #[inline]
    fn head_mut(&mut self, slot: Slot) -> &mut Option<ChunkId> {
        match slot {
            Slot::Primary(b) => &mut self.primary[b],
            Slot::Old(b) => &mut self.old[b],
        }
    }

    /// Look up a key with its precomputed hash.
    pub fn find(&self, key: &[u8], hv: u64, items: &impl ChainLinks) -> Option<ChunkId> {
        let mut cursor = self.head(self.slot(hv));
        while let Some(id) = cursor {
            if items.key_matches(id, key) {
                return Some(id);
            }
            cursor = items.chain_next(id);
        }
        None
    }

    /// Insert an item whose key is not already present.
    ///
    /// While a resize is in progress, one old bucket is migrated first.
    pub fn insert(&mut self, id: ChunkId, hv: u64, items: &mut impl ChainLinks) -> InsertOutcome {
        debug_assert!(
            self.find(items.key(id), hv, &*items).is_none(),
            "inserting a key that is already indexed"
        );

        if self.expanding {
            self.resize_step(items);
        }

        let slot = self.slot(hv);
        let head = self.head(slot);
        items.set_chain_next(id, head);
        *self.head_mut(slot) = Some(id);
        self.items += 1;

        if !self.expanding && self.items > self.primary.len() * 3 / 2 && self.start_resize() {
            return InsertOutcome::ResizeStarted;
        }
        InsertOutcome::Inserted
    }

    /// Remove a key, returning the chunk that held it.
    pub fn remove(&mut self, key: &[u8], hv: u64, items: &mut impl ChainLinks) -> Option<ChunkId> {
        let slot = self.slot(hv);
        let head = self.head(slot)?;

        if items.key_matches(head, key) {
            *self.head_mut(slot) = items.chain_next(head);
            items.set_chain_next(head, None);
            self.items -= 1;
            return Some(head);
        }

        let mut prev = head;
        while let Some(id) = items.chain_next(prev) {
            if items.key_matches(id, key) {
                let next = items.chain_next(id);
                items.set_chain_next(prev, next);
                items.set_chain_next(id, None);
                self.items -= 1;
                return Some(id);
            }
            prev = id;
        }

        if cfg!(debug_assertions) {
            panic!("removing a key that is not indexed");
        }
        None
    }

    /// Remove a specific chunk from the chain its hash resolves to.
    ///
    /// Returns false if the chunk is not in that chain.
    pub fn remove_item(&mut self, id: ChunkId, hv: u64, items: &mut impl ChainLinks) -> bool {
        let slot = self.slot(hv);
        let Some(head) = self.head(slot) else {
            return false;
        };

        if head == id {
            *self.head_mut(slot) = items.chain_next(id);
            items.set_chain_next(id, None);
            self.items -= 1;
            return true;
        }

        let mut prev = head;
        while let Some(next) = items.chain_next(prev) {
            if next == id {
                let after = items.chain_next(id);
                items.set_chain_next(prev, after);
                items.set_chain_next(id, None);
                self.items -= 1;
                return true;
            }
            prev = next;
        }
        false
    }

    /// Double the table and begin migrating.
    ///
    /// Returns false (and keeps the current table) if the new table cannot
    /// be allocated or the power is already at its maximum.
    fn start_resize(&mut self) -> bool {
        if self.hashpower >= MAX_HASHPOWER {
            return false;
        }

        let size = 1usize << (self.hashpower + 1);
        let mut table = Vec::new();
        if table.try_reserve_exact(size).is_err() {
            warn!(
                hashpower = self.hashpower + 1,
                "unable to allocate hash table for resize"
            );
            return false;
        }
        table.resize(size, None);

        self.old = std::mem::replace(&mut self.primary, table);
        self.hashpower += 1;
        self.expanding = true;
        self.expand_bucket = 0;

        info!(
            hashpower = self.hashpower,
            items = self.items,
            "hash table expansion starting"
        );
        true
    }

    /// Migrate one old bucket. Returns whether a resize is still in progress.
    pub fn resize_step(&mut self, items: &mut impl ChainLinks) -> bool {
        if !self.expanding {
            return false;
        }

        let mask = Self::mask(self.hashpower);
        let mut cursor = self.old[self.expand_bucket].take();
        while let Some(id) = cursor {
            cursor = items.chain_next(id);
            let bucket = (self.hash(items.key(id)) & mask) as usize;
            items.set_chain_next(id, self.primary[bucket]);
            self.primary[bucket] = Some(id);
        }

        self.expand_bucket += 1;
        if self.expand_bucket == self.old.len() {
            self.expanding = false;
            self.expand_bucket = 0;
            self.old = Vec::new();
            info!(
                hashpower = self.hashpower,
                items = self.items,
                "hash table expansion done"
            );
        }
        self.expanding
    }

    /// Run migration steps until the resize is complete.
    pub fn finish_resize(&mut self, items: &mut impl ChainLinks) {
        while self.resize_step(items) {}
    }

    /// Visit every indexed chunk together with the bucket it was found in.
    ///
    /// The bucket is reported as `(in_old_table, bucket_index)`.
    pub(crate) fn for_each(&self, items: &impl ChainLinks, mut f: impl FnMut(ChunkId, bool, usize)) {
        for (table, old) in [(&self.primary, false), (&self.old, true)] {
            for (bucket, head) in table.iter().enumerate() {
                let mut cursor = *head;
                while let Some(id) = cursor {
                    f(id, old, bucket);
                    cursor = items.chain_next(id);
                }
            }
        }
    }

    /// Check that every indexed item is reachable through [`HashIndex::find`]
    /// and that the item count matches the chains.
    pub(crate) fn check(&self, items: &impl ChainLinks) -> Result<(), String> {
        let mut count = 0usize;
        let mut err = None;
        self.for_each(items, |id, old, bucket| {
            count += 1;
            if err.is_some() {
                return;
            }
            let key = items.key(id);
            let hv = self.hash(key);
            let expected = match self.slot(hv) {
                Slot::Primary(b) => (false, b),
                Slot::Old(b) => (true, b),
            };
            if expected != (old, bucket) {
                err = Some(format!(
                    "chunk {id} found in bucket {bucket} (old: {old}), expected {expected:?}"
                ));
            }
        });
        if let Some(err) = err {
            return Err(err);
        }
        if count != self.items {
            return Err(format!(
                "index counts {} items but chains hold {}",
                self.items, count
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Keys and chain links held in plain vectors.
    #[derive(Default)]
    struct TestItems {
        keys: Vec<Vec<u8>>,
        next: Vec<Option<ChunkId>>,
    }

    impl TestItems {
        fn add(&mut self, key: &[u8]) -> ChunkId {
            self.keys.push(key.to_vec());
            self.next.push(None);
            ChunkId::new(0, (self.keys.len() - 1) as u32)
        }
    }

    impl ChainLinks for TestItems {
        fn key(&self, id: ChunkId) -> &[u8] {
            &self.keys[id.index() as usize]
        }

        fn chain_next(&self, id: ChunkId) -> Option<ChunkId> {
            self.next[id.index() as usize]
        }

        fn set_chain_next(&mut self, id: ChunkId, next: Option<ChunkId>) {
            self.next[id.index() as usize] = next;
        }
    }

    fn make_key(i: usize) -> Vec<u8> {
        format!("key:{:016x}", i).into_bytes()
    }

    #[test]
    fn test_insert_find_remove() {
        let mut index = HashIndex::new(4);
        let mut items = TestItems::default();

        let a = items.add(b"alpha");
        let b = items.add(b"beta");
        assert_eq!(
            index.insert(a, index.hash(b"alpha"), &mut items),
            InsertOutcome::Inserted
        );
        index.insert(b, index.hash(b"beta"), &mut items);
        assert_eq!(index.len(), 2);

        assert_eq!(index.find(b"alpha", index.hash(b"alpha"), &items), Some(a));
        assert_eq!(index.find(b"beta", index.hash(b"beta"), &items), Some(b));
        assert_eq!(index.find(b"gamma", index.hash(b"gamma"), &items), None);

        assert_eq!(index.remove(b"alpha", index.hash(b"alpha"), &mut items), Some(a));
        assert_eq!(index.find(b"alpha", index.hash(b"alpha"), &items), None);
        assert_eq!(index.len(), 1);
        assert!(index.check(&items).is_ok());
    }

    #[test]
    fn test_chain_collisions() {
        let mut index = HashIndex::new(4);
        let mut items = TestItems::default();

        // with 16 buckets and 20 keys at least one chain has several entries
        let ids: Vec<ChunkId> = (0..20)
            .map(|i| {
                let key = make_key(i);
                let id = items.add(&key);
                let hv = index.hash(&key);
                index.insert(id, hv, &mut items);
                id
            })
            .collect();

        // remove from the middle of chains
        for i in (0..20).step_by(3) {
            let key = make_key(i);
            let hv = index.hash(&key);
            assert_eq!(index.remove(&key, hv, &mut items), Some(ids[i]));
        }
        for i in 0..20 {
            let key = make_key(i);
            let found = index.find(&key, index.hash(&key), &items);
            if i % 3 == 0 {
                assert_eq!(found, None);
            } else {
                assert_eq!(found, Some(ids[i]));
            }
        }
        assert!(index.check(&items).is_ok());
    }

    #[test]
    fn test_resize_starts_on_threshold() {
        let mut index = HashIndex::new(4);
        let mut items = TestItems::default();

        for i in 0..24 {
            let key = make_key(i);
            let id = items.add(&key);
            let hv = index.hash(&key);
            assert_eq!(index.insert(id, hv, &mut items), InsertOutcome::Inserted);
        }
        assert!(!index.is_expanding());

        let key = make_key(24);
        let id = items.add(&key);
        let hv = index.hash(&key);
        assert_eq!(
            index.insert(id, hv, &mut items),
            InsertOutcome::ResizeStarted
        );
        assert!(index.is_expanding());
        assert_eq!(index.hashpower(), 5);
        assert_eq!(index.buckets(), 32);

        // every key is reachable mid-resize
        for i in 0..25 {
            let key = make_key(i);
            assert!(index.find(&key, index.hash(&key), &items).is_some());
        }
        assert!(index.check(&items).is_ok());

        index.finish_resize(&mut items);
        assert!(!index.is_expanding());
        for i in 0..25 {
            let key = make_key(i);
            let id = index.find(&key, index.hash(&key), &items).unwrap();
            assert_eq!(items.key(id), key.as_slice());
        }
        assert!(index.check(&items).is_ok());
    }

    #[test]
    fn test_insert_migrates_one_bucket() {
        let mut index = HashIndex::new(4);
        let mut items = TestItems::default();

        for i in 0..25 {
            let key = make_key(i);
            let id = items.add(&key);
            let hv = index.hash(&key);
            index.insert(id, hv, &mut items);
        }
        assert_eq!(index.expand_bucket, 0);

        let key = make_key(25);
        let id = items.add(&key);
        let hv = index.hash(&key);
        index.insert(id, hv, &mut items);
        assert_eq!(index.expand_bucket, 1);

        // remove works against both tables mid-resize
        for i in 0..26 {
            let key = make_key(i);
            let hv = index.hash(&key);
            assert!(index.remove(&key, hv, &mut items).is_some());
        }
        assert!(index.is_empty());
        assert!(index.check(&items).is_ok());
    }

    #[test]
    fn test_remove_item_by_identity() {
        let mut index = HashIndex::new(4);
        let mut items = TestItems::default();

        let ids: Vec<ChunkId> = (0..40)
            .map(|i| {
                let key = make_key(i);
                let id = items.add(&key);
                let hv = index.hash(&key);
                index.insert(id, hv, &mut items);
                id
            })
            .collect();
        assert!(index.is_expanding());

        for (i, id) in ids.iter().enumerate() {
            let hv = index.hash(&make_key(i));
            assert!(index.remove_item(*id, hv, &mut items));
            assert!(!index.remove_item(*id, hv, &mut items));
        }
        assert!(index.is_empty());
        assert!(index.check(&items).is_ok());
    }

    #[test]
    fn test_resize_step_when_idle() {
        let mut index = HashIndex::new(4);
        let mut items = TestItems::default();
        assert!(!index.resize_step(&mut items));
        assert_eq!(index.hashpower(), 4);
    }

    #[test]
    fn test_many_resizes() {
        let mut index = HashIndex::new(4);
        let mut items = TestItems::default();

        for i in 0..2000 {
            let key = make_key(i);
            let id = items.add(&key);
            let hv = index.hash(&key);
            index.insert(id, hv, &mut items);
        }
        index.finish_resize(&mut items);
        assert!(index.hashpower() > 4);
        assert!(index.len() <= index.buckets() * 3 / 2);
        for i in 0..2000 {
            let key = make_key(i);
            assert!(index.find(&key, index.hash(&key), &items).is_some());
        }
        assert!(index.check(&items).is_ok());
    }
}
