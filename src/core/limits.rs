/*!
 * Mutex Limits and Constants
 *
 * Centralized location for the tuning constants of the adaptive mutex.
 * Performance-critical constants are marked with [PERF].
 */

use std::time::Duration;

// =============================================================================
// SPIN PHASE
// =============================================================================

/// Default bound on the spin-privilege holder's reload loop
/// [PERF] Roughly the cost of one futex round trip on commodity hardware
pub const DEFAULT_SPIN_ITERATIONS: u32 = 100;

/// Upper bound accepted by config validation
/// Beyond this the spinner burns more CPU than a park/unpark pair costs
pub const MAX_SPIN_ITERATIONS: u32 = 100_000;

/// `spin_loop` hints issued between two reloads of the lock word
/// [PERF] Keeps the cache line from ping-ponging while the owner runs
pub const DEFAULT_SPIN_YIELD_BURST: u32 = 4;

/// Upper bound for the per-iteration hint burst
pub const MAX_SPIN_YIELD_BURST: u32 = 1_024;

/// Spin bound used by `MutexConfig::low_latency`
pub const LOW_LATENCY_SPIN_ITERATIONS: u32 = 1_000;

/// Spin bound used by `MutexConfig::long_wait`
pub const LONG_WAIT_SPIN_ITERATIONS: u32 = 10;

// =============================================================================
// PARKING
// =============================================================================

/// Number of condvar parking slots (power of 2 for fast modulo via bitwise AND)
pub const PARKING_SLOTS: usize = 512;

/// Smallest park timeout accepted for periodic re-validation
pub const MIN_PARK_TIMEOUT: Duration = Duration::from_micros(1);

/// Largest park timeout accepted; longer re-validation periods are
/// indistinguishable from none
pub const MAX_PARK_TIMEOUT: Duration = Duration::from_secs(3_600);
