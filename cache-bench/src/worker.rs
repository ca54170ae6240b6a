//! Worker thread driving the slab engine.

use crate::config::Config;
use crate::metrics;

use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use slab_engine::{Clock, SlabCache};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::time::Instant;

/// Test phase, controlled by main thread and read by workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    /// Write each key exactly once.
    Prefill = 0,
    /// Run the workload without recording metrics.
    Warmup = 1,
    /// Run the workload and record metrics.
    Running = 2,
    /// Workers should exit.
    Stop = 3,
}

impl Phase {
    #[inline]
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Phase::Prefill,
            1 => Phase::Warmup,
            2 => Phase::Running,
            _ => Phase::Stop,
        }
    }
}

/// Shared state between main thread and workers.
pub struct SharedState {
    phase: AtomicU8,
    prefill_complete: AtomicUsize,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(Phase::Prefill as u8),
            prefill_complete: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn set_phase(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    pub fn mark_prefill_complete(&self) {
        self.prefill_complete.fetch_add(1, Ordering::Release);
    }

    pub fn prefill_complete_count(&self) -> usize {
        self.prefill_complete.load(Ordering::Acquire)
    }
}

/// Run a single worker thread.
pub fn run_worker(
    id: usize,
    config: &Config,
    cache: &SlabCache,
    clock: &Clock,
    shared: &SharedState,
    prefill_range: Option<std::ops::Range<usize>>,
) {
    let key_len = config.workload.keyspace.length;
    let key_count = config.workload.keyspace.count;
    let value_len = config.workload.values.length;
    let ttl = config.ttl_secs();
    let get_threshold = config.workload.commands.get;
    let set_threshold = get_threshold + config.workload.commands.set;

    // Pre-allocate buffers
    let mut key_buf = vec![0u8; key_len];
    let mut value_buf = vec![0u8; value_len];

    // Initialize RNG
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(42 + id as u64);

    // Fill value buffer with random data
    rng.fill_bytes(&mut value_buf);

    let exptime = |clock: &Clock| if ttl == 0 { 0 } else { clock.now() + ttl };

    // Prefill phase
    if let Some(range) = prefill_range {
        for key_id in range {
            write_key(&mut key_buf, key_id);
            let _ = cache.set(&key_buf, &value_buf, 0, exptime(clock));
        }
    }
    shared.mark_prefill_complete();

    // Main loop
    loop {
        let phase = shared.phase();
        match phase {
            Phase::Prefill => {
                // Wait for all workers to finish prefill
                std::hint::spin_loop();
                continue;
            }
            Phase::Stop => break,
            Phase::Warmup | Phase::Running => {}
        }

        // Generate random key
        let key_id = rng.random_range(0..key_count);
        write_key(&mut key_buf, key_id);

        // Roll command
        let roll: u8 = rng.random_range(0..100);
        let recording = phase == Phase::Running;

        if roll < get_threshold {
            // GET
            let start = Instant::now();
            let hit = cache.get_value(&key_buf).is_some();
            let elapsed_ns = start.elapsed().as_nanos() as u64;

            if recording {
                metrics::GET_COUNT.increment();
                metrics::COMPLETED_COUNT.increment();
                if hit {
                    metrics::CACHE_HITS.increment();
                } else {
                    metrics::CACHE_MISSES.increment();
                }
                let _ = metrics::RESPONSE_LATENCY.increment(elapsed_ns);
                let _ = metrics::GET_LATENCY.increment(elapsed_ns);
            }
        } else if roll < set_threshold {
            // SET, with a fresh value each time
            rng.fill_bytes(&mut value_buf);
            let start = Instant::now();
            let result = cache.set(&key_buf, &value_buf, key_id as u32, exptime(clock));
            let elapsed_ns = start.elapsed().as_nanos() as u64;

            if recording {
                metrics::SET_COUNT.increment();
                metrics::COMPLETED_COUNT.increment();
                if result.is_err() {
                    metrics::SET_ERRORS.increment();
                }
                let _ = metrics::RESPONSE_LATENCY.increment(elapsed_ns);
                let _ = metrics::SET_LATENCY.increment(elapsed_ns);
            }
        } else {
            // DELETE
            let start = Instant::now();
            let _ = cache.delete(&key_buf);
            let elapsed_ns = start.elapsed().as_nanos() as u64;

            if recording {
                metrics::DELETE_COUNT.increment();
                metrics::COMPLETED_COUNT.increment();
                let _ = metrics::RESPONSE_LATENCY.increment(elapsed_ns);
                let _ = metrics::DELETE_LATENCY.increment(elapsed_ns);
            }
        }
    }
}

/// Write a numeric key ID into the buffer as hex.
fn write_key(buf: &mut [u8], id: usize) {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut n = id;
    for byte in buf.iter_mut().rev() {
        *byte = HEX[n & 0xf];
        n >>= 4;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_key() {
        let mut buf = [0u8; 6];
        write_key(&mut buf, 0xbeef);
        assert_eq!(&buf, b"00beef");
    }

    #[test]
    fn test_phase_round_trip() {
        let shared = SharedState::new();
        assert_eq!(shared.phase(), Phase::Prefill);
        shared.set_phase(Phase::Running);
        assert_eq!(shared.phase(), Phase::Running);
        assert_eq!(Phase::from_u8(200), Phase::Stop);
    }
}
