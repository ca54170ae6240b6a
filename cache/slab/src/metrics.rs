//! Process-wide slab engine metrics.
//!
//! These aggregate across every engine in the process. Per-engine numbers
//! are in [`Stats`](crate::stats::Stats).

use metriken::{Counter, Gauge, metric};

// Commands
#[metric(name = "slab_get", description = "Total get lookups")]
pub static GET: Counter = Counter::new();

#[metric(name = "slab_get_hit", description = "Get lookups that found a live item")]
pub static GET_HIT: Counter = Counter::new();

#[metric(name = "slab_get_miss", description = "Get lookups that found nothing")]
pub static GET_MISS: Counter = Counter::new();

#[metric(name = "slab_put", description = "Total item allocations")]
pub static PUT: Counter = Counter::new();

#[metric(name = "slab_put_miss", description = "Item allocations that failed")]
pub static PUT_MISS: Counter = Counter::new();

#[metric(name = "slab_delete", description = "Total deletes")]
pub static DELETE: Counter = Counter::new();

#[metric(name = "slab_delete_miss", description = "Deletes of absent keys")]
pub static DELETE_MISS: Counter = Counter::new();

// Reclaim
#[metric(name = "slab_evict", description = "Live items evicted to make room")]
pub static EVICT: Counter = Counter::new();

#[metric(
    name = "slab_reclaim",
    description = "Expired items whose chunk was reused by an allocation"
)]
pub static RECLAIM: Counter = Counter::new();

#[metric(name = "slab_expire", description = "Expired items removed on access")]
pub static EXPIRE: Counter = Counter::new();

// Occupancy
#[metric(name = "slab_items", description = "Items currently linked")]
pub static ITEMS: Gauge = Gauge::new();

#[metric(name = "slab_item_bytes", description = "Bytes of linked items")]
pub static ITEM_BYTES: Gauge = Gauge::new();

#[metric(name = "slab_memory", description = "Bytes of slab pages allocated")]
pub static MEMORY: Gauge = Gauge::new();

#[metric(name = "slab_hash_expand", description = "Hash index resizes started")]
pub static HASH_EXPAND: Counter = Counter::new();
