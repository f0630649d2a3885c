/*!
 * Synchronization Primitives
 *
 * An adaptive mutex built from:
 * - A bit-packed atomic lock word (locked, sleeping, spinning)
 * - A single shared spin privilege with bounded busy-polling
 * - Futex-style parking for the slow path
 *
 * # Architecture
 *
 * `RawAdaptiveMutex` drives the acquire state machine against the `LockWord`
 * and, when spinning does not pay off, a `ParkWake` service. Unlock flips the
 * word and wakes one sleeper only when no spinner is around to notice.
 *
 * # Performance
 *
 * - Uncontended lock and unlock are one atomic operation each
 * - At most one contender burns CPU at a time
 * - No thundering herd: at most one OS wake per unlock
 */

mod config;
mod mutex;
mod stats;

pub mod model;
pub mod park;
pub mod word;

pub use config::MutexConfig;
pub use mutex::{mutex_with_config, Mutex, MutexGuard, RawAdaptiveMutex};
pub use park::{CondvarPark, FutexPark, ParkOutcome, ParkWake, WakeResult};
pub use stats::{MutexStats, StatsSnapshot};
pub use word::{LockWord, WordState};
