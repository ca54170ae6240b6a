//! Benchmark metrics.

use metriken::{AtomicHistogram, Counter, metric};

// Operation counters
#[metric(name = "get_count", description = "Total GET operations")]
pub static GET_COUNT: Counter = Counter::new();

#[metric(name = "set_count", description = "Total SET operations")]
pub static SET_COUNT: Counter = Counter::new();

#[metric(name = "delete_count", description = "Total DELETE operations")]
pub static DELETE_COUNT: Counter = Counter::new();

#[metric(name = "completed_count", description = "Total completed operations")]
pub static COMPLETED_COUNT: Counter = Counter::new();

#[metric(name = "set_errors", description = "Total SET errors")]
pub static SET_ERRORS: Counter = Counter::new();

// Cache counters
#[metric(name = "cache_hits", description = "Total cache hits")]
pub static CACHE_HITS: Counter = Counter::new();

#[metric(name = "cache_misses", description = "Total cache misses")]
pub static CACHE_MISSES: Counter = Counter::new();

// Latency histograms
#[metric(
    name = "response_latency",
    description = "Response latency histogram (nanoseconds)"
)]
pub static RESPONSE_LATENCY: AtomicHistogram = AtomicHistogram::new(7, 64);

#[metric(
    name = "get_latency",
    description = "GET latency histogram (nanoseconds)"
)]
pub static GET_LATENCY: AtomicHistogram = AtomicHistogram::new(7, 64);

#[metric(
    name = "set_latency",
    description = "SET latency histogram (nanoseconds)"
)]
pub static SET_LATENCY: AtomicHistogram = AtomicHistogram::new(7, 64);

#[metric(
    name = "delete_latency",
    description = "DELETE latency histogram (nanoseconds)"
)]
pub static DELETE_LATENCY: AtomicHistogram = AtomicHistogram::new(7, 64);
