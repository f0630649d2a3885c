/*!
 * Park/Wake Services
 *
 * The OS-level sleep set the mutex falls back to once spinning is over:
 * - Futex-based (parking_lot_core, direct futex on Linux)
 * - Condvar-based (portable emulation over sharded slots)
 */

mod condvar;
mod futex;
mod traits;

pub use condvar::CondvarPark;
pub use futex::FutexPark;
pub use traits::{ParkOutcome, ParkWake, WakeResult};
