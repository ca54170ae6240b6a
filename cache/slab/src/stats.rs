//! Per-engine statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one engine.
///
/// Item and byte counts move with link/unlink; the command counters move
/// with the operations named after them.
#[derive(Default)]
pub struct Stats {
    pub(crate) curr_items: AtomicU64,
    pub(crate) total_items: AtomicU64,
    pub(crate) curr_bytes: AtomicU64,
    pub(crate) put_cmds: AtomicU64,
    pub(crate) put_hits: AtomicU64,
    pub(crate) put_misses: AtomicU64,
    pub(crate) get_cmds: AtomicU64,
    pub(crate) get_hits: AtomicU64,
    pub(crate) get_misses: AtomicU64,
    pub(crate) delete_cmds: AtomicU64,
    pub(crate) delete_hits: AtomicU64,
    pub(crate) delete_misses: AtomicU64,
    pub(crate) evictions: AtomicU64,
    pub(crate) reclaimed: AtomicU64,
    pub(crate) expired: AtomicU64,
}

#[inline]
pub(crate) fn incr(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub(crate) fn add(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

#[inline]
pub(crate) fn sub(counter: &AtomicU64, n: u64) {
    counter.fetch_sub(n, Ordering::Relaxed);
}

impl Stats {
    /// Copy the counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            curr_items: load(&self.curr_items),
            total_items: load(&self.total_items),
            curr_bytes: load(&self.curr_bytes),
            put_cmds: load(&self.put_cmds),
            put_hits: load(&self.put_hits),
            put_misses: load(&self.put_misses),
            get_cmds: load(&self.get_cmds),
            get_hits: load(&self.get_hits),
            get_misses: load(&self.get_misses),
            delete_cmds: load(&self.delete_cmds),
            delete_hits: load(&self.delete_hits),
            delete_misses: load(&self.delete_misses),
            evictions: load(&self.evictions),
            reclaimed: load(&self.reclaimed),
            expired: load(&self.expired),
            hash_power: 0,
            hash_is_expanding: false,
            memory_used: 0,
            memory_limit: 0,
        }
    }
}

/// Point-in-time copy of the engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Items currently linked.
    pub curr_items: u64,
    /// Items ever linked.
    pub total_items: u64,
    /// Chunk bytes used by linked items.
    pub curr_bytes: u64,
    /// Allocation attempts.
    pub put_cmds: u64,
    /// Allocations that produced a chunk.
    pub put_hits: u64,
    /// Allocations that failed.
    pub put_misses: u64,
    /// Get lookups.
    pub get_cmds: u64,
    /// Gets that returned a live item.
    pub get_hits: u64,
    /// Gets that found nothing or an expired item.
    pub get_misses: u64,
    /// Delete attempts.
    pub delete_cmds: u64,
    /// Deletes that removed an item.
    pub delete_hits: u64,
    /// Deletes of absent keys.
    pub delete_misses: u64,
    /// Live items evicted to make room.
    pub evictions: u64,
    /// Expired items whose chunk was reused by an allocation.
    pub reclaimed: u64,
    /// Expired items removed when accessed.
    pub expired: u64,
    /// Current hash index power.
    pub hash_power: u8,
    /// Whether the hash index is resizing.
    pub hash_is_expanding: bool,
    /// Bytes of slab pages allocated.
    pub memory_used: u64,
    /// Memory budget (0 = unlimited).
    pub memory_limit: u64,
}

impl StatsSnapshot {
    /// Fraction of gets that hit, or 0 with no gets.
    pub fn hit_ratio(&self) -> f64 {
        if self.get_cmds == 0 {
            0.0
        } else {
            self.get_hits as f64 / self.get_cmds as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let stats = Stats::default();
        incr(&stats.get_cmds);
        incr(&stats.get_cmds);
        incr(&stats.get_hits);
        add(&stats.curr_bytes, 100);
        sub(&stats.curr_bytes, 40);

        let snap = stats.snapshot();
        assert_eq!(snap.get_cmds, 2);
        assert_eq!(snap.get_hits, 1);
        assert_eq!(snap.curr_bytes, 60);
        assert_eq!(snap.hit_ratio(), 0.5);
    }

    #[test]
    fn test_hit_ratio_empty() {
        assert_eq!(StatsSnapshot::default().hit_ratio(), 0.0);
    }
}
