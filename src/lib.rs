/*!
 * Adaptive Mutex Library
 * Spin-then-park mutual exclusion with a single shared spin privilege
 */

pub mod core;
pub mod monitoring;

// Re-exports
pub use crate::core::errors::{MutexError, MutexResult, ParkError};
pub use crate::core::sync::{
    mutex_with_config, CondvarPark, FutexPark, Mutex, MutexConfig, MutexGuard, ParkOutcome,
    ParkWake, RawAdaptiveMutex, StatsSnapshot, WakeResult,
};
pub use monitoring::init_tracing;
