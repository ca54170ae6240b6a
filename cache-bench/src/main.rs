//! In-process slab engine benchmark. Drives a `SlabCache` directly from
//! worker threads without network, protocol, or I/O overhead.

mod config;
mod logging;
mod metrics;
mod worker;

use crate::config::Config;
use crate::worker::{Phase, SharedState};

use clap::Parser;
use metriken::{AtomicHistogram, histogram::Histogram};
use slab_engine::{Clock, SlabCache};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Hash index migration steps run by the reporting thread per tick.
const MAINTENANCE_STEPS: usize = 1024;

#[derive(Parser)]
#[command(name = "slab-bench")]
#[command(about = "In-process slab engine benchmark")]
struct Args {
    /// Path to configuration file
    config: PathBuf,

    /// Print the parsed configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn main() {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            std::process::exit(1);
        }
    };

    if args.print_config {
        println!("{config:#?}");
        return;
    }

    logging::init(&config.logging);

    if let Err(e) = run(config) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    print_config(&config);

    let clock = Clock::system();
    let cache = Arc::new(
        SlabCache::builder()
            .config(config.cache.clone())
            .clock(clock.clone())
            .build()?,
    );
    info!(
        classes = cache.num_classes(),
        memory_limit = config.cache.memory_limit,
        "slab engine ready"
    );

    let num_threads = config.general.threads;
    let warmup = config.general.warmup;
    let duration = config.general.duration;

    // Shared state
    let shared = Arc::new(SharedState::new());

    // Calculate prefill ranges
    let prefill_ranges: Vec<Option<std::ops::Range<usize>>> = if config.workload.prefill {
        let key_count = config.workload.keyspace.count;
        let keys_per_worker = key_count / num_threads;
        let remainder = key_count % num_threads;
        (0..num_threads)
            .map(|id| {
                let start = if id < remainder {
                    id * (keys_per_worker + 1)
                } else {
                    remainder * (keys_per_worker + 1) + (id - remainder) * keys_per_worker
                };
                let count = if id < remainder {
                    keys_per_worker + 1
                } else {
                    keys_per_worker
                };
                Some(start..start + count)
            })
            .collect()
    } else {
        vec![None; num_threads]
    };

    // Signal handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    // Set initial phase
    if config.workload.prefill {
        info!(
            keys = config.workload.keyspace.count,
            threads = num_threads,
            "prefilling"
        );
        shared.set_phase(Phase::Prefill);
    } else {
        shared.set_phase(Phase::Warmup);
    }

    // Spawn workers
    let config = Arc::new(config);
    let mut handles = Vec::with_capacity(num_threads);

    for (id, prefill_range) in prefill_ranges.into_iter().enumerate() {
        let cache = Arc::clone(&cache);
        let shared = Arc::clone(&shared);
        let config = Arc::clone(&config);
        let clock = clock.clone();

        let handle = thread::Builder::new()
            .name(format!("worker-{id}"))
            .spawn(move || {
                worker::run_worker(id, &config, &cache, &clock, &shared, prefill_range);
            })?;

        handles.push(handle);
    }

    // Main thread: reporting loop
    let start = Instant::now();
    let report_interval = Duration::from_secs(1);
    let mut last_report = Instant::now();
    let mut last_completed = 0u64;
    let mut last_hits = 0u64;
    let mut last_misses = 0u64;
    let mut last_evictions = 0u64;
    let mut last_histogram: Option<Histogram> = None;
    let mut current_phase = if config.workload.prefill {
        Phase::Prefill
    } else {
        Phase::Warmup
    };
    let mut warmup_start: Option<Instant> = if config.workload.prefill {
        None
    } else {
        Some(start)
    };

    loop {
        thread::sleep(Duration::from_millis(100));

        // Check signal
        if !running.load(Ordering::SeqCst) {
            shared.set_phase(Phase::Stop);
            break;
        }

        // Migrate hash index buckets
        if cache.maintain(MAINTENANCE_STEPS) {
            debug!("hash index resize in progress");
        }

        // Handle prefill -> warmup transition
        if current_phase == Phase::Prefill {
            let done = shared.prefill_complete_count();
            if done >= num_threads {
                shared.set_phase(Phase::Warmup);
                current_phase = Phase::Warmup;
                warmup_start = Some(Instant::now());
                info!(items = cache.len(), warmup = ?warmup, "prefill complete, warming up");
            }
            continue;
        }

        let elapsed = warmup_start.unwrap_or(start).elapsed();

        // Check if done
        if elapsed >= warmup + duration {
            shared.set_phase(Phase::Stop);
            break;
        }

        // Transition from warmup to running
        if current_phase == Phase::Warmup && elapsed >= warmup {
            shared.set_phase(Phase::Running);
            current_phase = Phase::Running;
            info!(duration = ?duration, "running");
            print_header();
            last_report = Instant::now();
            last_completed = metrics::COMPLETED_COUNT.value();
            last_hits = metrics::CACHE_HITS.value();
            last_misses = metrics::CACHE_MISSES.value();
            last_evictions = cache.stats().evictions;
            last_histogram = metrics::RESPONSE_LATENCY.load();
        }

        // Skip reporting during warmup
        if current_phase != Phase::Running {
            continue;
        }

        // Periodic reporting
        if last_report.elapsed() >= report_interval {
            let completed = metrics::COMPLETED_COUNT.value();
            let hits = metrics::CACHE_HITS.value();
            let misses = metrics::CACHE_MISSES.value();
            let evictions = cache.stats().evictions;

            let elapsed_secs = last_report.elapsed().as_secs_f64();

            let rate = (completed - last_completed) as f64 / elapsed_secs;
            last_completed = completed;

            let delta_hits = hits - last_hits;
            let delta_gets = delta_hits + (misses - last_misses);
            let hit_pct = if delta_gets > 0 {
                (delta_hits as f64 / delta_gets as f64) * 100.0
            } else {
                0.0
            };
            last_hits = hits;
            last_misses = misses;

            let evict_rate = (evictions - last_evictions) as f64 / elapsed_secs;
            last_evictions = evictions;

            // Interval percentiles via wrapping_sub
            let current_histogram = metrics::RESPONSE_LATENCY.load();
            let (p50, p90, p99, p999, max) = match (&current_histogram, &last_histogram) {
                (Some(current), Some(previous)) => match current.wrapping_sub(previous) {
                    Ok(delta) => latency_row(&delta),
                    Err(_) => (0.0, 0.0, 0.0, 0.0, 0.0),
                },
                (Some(current), None) => latency_row(current),
                _ => (0.0, 0.0, 0.0, 0.0, 0.0),
            };
            last_histogram = current_histogram;

            println!(
                "{:>12.0} {:>7.1}% {:>10.0} {:>10.1} {:>10.1} {:>10.1} {:>10.1} {:>10.1}",
                rate, hit_pct, evict_rate, p50, p90, p99, p999, max,
            );

            last_report = Instant::now();
        }
    }

    // Wait for workers
    for handle in handles {
        let _ = handle.join();
    }

    // Final summary
    print_summary(&config, &cache);

    Ok(())
}

fn print_config(config: &Config) {
    eprintln!("slab-bench configuration:");
    eprintln!("  memory:     {} bytes", config.cache.memory_limit);
    eprintln!("  page_size:  {} bytes", config.cache.page_size);
    eprintln!("  factor:     {}", config.cache.growth_factor);
    eprintln!("  source:     {:?}", config.cache.memory_source);
    eprintln!("  hashpower:  {}", config.cache.hashpower);
    eprintln!("  threads:    {}", config.general.threads);
    eprintln!("  duration:   {:?}", config.general.duration);
    eprintln!("  warmup:     {:?}", config.general.warmup);
    eprintln!(
        "  commands:   get={} set={} delete={}",
        config.workload.commands.get, config.workload.commands.set, config.workload.commands.delete,
    );
    eprintln!(
        "  keyspace:   {} keys x {} bytes",
        config.workload.keyspace.count, config.workload.keyspace.length,
    );
    eprintln!("  values:     {} bytes", config.workload.values.length);
    eprintln!("  ttl:        {:?}", config.workload.ttl);
    eprintln!();
}

fn print_header() {
    println!(
        "{:>12} {:>8} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10}",
        "ops/sec", "hit%", "evict/s", "p50(us)", "p90(us)", "p99(us)", "p999(us)", "max(us)",
    );
    println!("{}", "-".repeat(93));
}

fn print_summary(config: &Config, cache: &SlabCache) {
    let gets = metrics::GET_COUNT.value();
    let sets = metrics::SET_COUNT.value();
    let deletes = metrics::DELETE_COUNT.value();
    let completed = metrics::COMPLETED_COUNT.value();
    let set_errors = metrics::SET_ERRORS.value();
    let hits = metrics::CACHE_HITS.value();
    let misses = metrics::CACHE_MISSES.value();

    let total_gets = hits + misses;
    let hit_pct = if total_gets > 0 {
        (hits as f64 / total_gets as f64) * 100.0
    } else {
        0.0
    };

    let elapsed = config.general.duration.as_secs_f64();
    let avg_rate = if elapsed > 0.0 {
        completed as f64 / elapsed
    } else {
        0.0
    };

    let stats = cache.stats();

    eprintln!();
    eprintln!("=== Final Summary ===");
    eprintln!("  total ops:    {completed}");
    eprintln!("  avg ops/sec:  {avg_rate:.0}");
    eprintln!("  gets:         {gets}");
    eprintln!("  sets:         {sets} (errors: {set_errors})");
    eprintln!("  deletes:      {deletes}");
    eprintln!("  hit rate:     {hit_pct:.1}%");
    eprintln!();
    eprintln!("  items:        {}", stats.curr_items);
    eprintln!("  item bytes:   {}", stats.curr_bytes);
    eprintln!(
        "  memory:       {} / {} bytes",
        stats.memory_used, stats.memory_limit
    );
    eprintln!("  evictions:    {}", stats.evictions);
    eprintln!("  reclaimed:    {}", stats.reclaimed);
    eprintln!("  expired:      {}", stats.expired);
    eprintln!("  hashpower:    {}", stats.hash_power);
    eprintln!();

    // Per-class occupancy
    for class_id in 0..cache.num_classes() as u8 {
        if let Some(class) = cache.class_stats(class_id)
            && class.pages > 0
        {
            eprintln!(
                "  class {:>3}: chunk={:>8} pages={:>5} used={:>9} free={:>9}",
                class.class_id, class.chunk_size, class.pages, class.used_chunks, class.free_chunks,
            );
        }
    }
    eprintln!();

    // Per-operation latency breakdown
    print_latency_summary("GET", &metrics::GET_LATENCY);
    print_latency_summary("SET", &metrics::SET_LATENCY);
    if deletes > 0 {
        print_latency_summary("DELETE", &metrics::DELETE_LATENCY);
    }
    print_latency_summary("ALL", &metrics::RESPONSE_LATENCY);
}

fn print_latency_summary(label: &str, hist: &AtomicHistogram) {
    let (p50, p90, p99, p999, max) = match hist.load() {
        Some(snapshot) => latency_row(&snapshot),
        None => (0.0, 0.0, 0.0, 0.0, 0.0),
    };

    eprintln!(
        "  {label:<6} latency (us): p50={p50:.1}  p90={p90:.1}  p99={p99:.1}  p999={p999:.1}  max={max:.1}",
    );
}

// --- Histogram helpers ---

/// p50, p90, p99, p99.9 and max in microseconds.
fn latency_row(hist: &Histogram) -> (f64, f64, f64, f64, f64) {
    (
        percentile_from_histogram(hist, 50.0) / 1000.0,
        percentile_from_histogram(hist, 90.0) / 1000.0,
        percentile_from_histogram(hist, 99.0) / 1000.0,
        percentile_from_histogram(hist, 99.9) / 1000.0,
        percentile_from_histogram(hist, 100.0) / 1000.0,
    )
}

fn percentile_from_histogram(hist: &Histogram, p: f64) -> f64 {
    if let Ok(Some(results)) = hist.percentiles(&[p])
        && let Some((_pct, bucket)) = results.first()
    {
        return bucket.end() as f64;
    }
    0.0
}
