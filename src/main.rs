/*!
 * Adaptive Mutex - Contention Driver
 *
 * Hammers one mutex-protected counter from several threads and reports how
 * the contention was resolved (spins, parks, wakes, skipped wakes).
 *
 * Usage: contend [THREADS] [ITERATIONS] [futex|condvar]
 *
 * Mutex tuning comes from the `ADAPTIVE_MUTEX_*` environment variables.
 */

use adaptive_mutex::monitoring::WorkloadSpan;
use adaptive_mutex::{init_tracing, CondvarPark, FutexPark, MutexConfig, ParkWake, RawAdaptiveMutex};
use anyhow::{bail, Context, Result};
use std::cell::UnsafeCell;
use std::sync::Arc;
use std::thread;
use tracing::info;

const DEFAULT_THREADS: usize = 4;
const DEFAULT_ITERATIONS: u64 = 100_000;

/// Counter guarded by the raw mutex under test
struct Guarded<P> {
    mutex: RawAdaptiveMutex<P>,
    value: UnsafeCell<u64>,
}

// SAFETY: `value` is only touched while `mutex` is held
unsafe impl<P: ParkWake> Sync for Guarded<P> {}

fn main() -> Result<()> {
    init_tracing();

    let mut args = std::env::args().skip(1);
    let threads = match args.next() {
        Some(raw) => raw.parse().context("THREADS must be a positive integer")?,
        None => DEFAULT_THREADS,
    };
    let iterations = match args.next() {
        Some(raw) => raw.parse().context("ITERATIONS must be a positive integer")?,
        None => DEFAULT_ITERATIONS,
    };
    let strategy = args.next().unwrap_or_else(|| "futex".to_string());
    if threads == 0 {
        bail!("THREADS must be at least 1");
    }

    let config = MutexConfig::from_env()?;
    info!(threads, iterations, %strategy, ?config, "Starting contention run");

    match strategy.as_str() {
        "futex" => run(config, FutexPark::with_wake_any(config.wake_any), threads, iterations),
        "condvar" => run(config, CondvarPark::new(), threads, iterations),
        other => bail!("unknown park strategy {other:?} (expected futex or condvar)"),
    }
}

fn run<P>(config: MutexConfig, park: P, threads: usize, iterations: u64) -> Result<()>
where
    P: ParkWake + 'static,
{
    let shared = Arc::new(Guarded {
        mutex: RawAdaptiveMutex::with_park(config, park),
        value: UnsafeCell::new(0),
    });

    let workload = WorkloadSpan::new(shared.mutex.park_service().name(), threads, iterations);
    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let shared = shared.clone();
            thread::Builder::new()
                .name(format!("contender-{i}"))
                .spawn(move || {
                    for _ in 0..iterations {
                        // SAFETY: exclusive access while the lock is held
                        shared.mutex.with_lock(|| unsafe { *shared.value.get() += 1 });
                    }
                })
                .context("failed to spawn contender thread")
        })
        .collect::<Result<_>>()?;

    for handle in handles {
        if handle.join().is_err() {
            bail!("contender thread panicked");
        }
    }
    let elapsed = workload.finish();

    let total = shared.mutex.with_lock(|| unsafe { *shared.value.get() });
    let expected = threads as u64 * iterations;
    if total != expected {
        bail!("mutual exclusion violated: counted {total}, expected {expected}");
    }

    let stats = shared.mutex.stats();
    info!(
        total,
        elapsed_ms = elapsed.as_millis() as u64,
        stats = %serde_json::to_string(&stats)?,
        "Contention run complete"
    );
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
