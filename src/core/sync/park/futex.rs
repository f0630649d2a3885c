/*!
 * Futex-Based Park/Wake
 *
 * Uses parking_lot_core for futex-like operations on all platforms.
 * The parking address is the lock word itself, and the validate callback
 * re-reads the word under the parking queue lock, which gives the same
 * compare-then-block atomicity as `FUTEX_WAIT`.
 *
 * # Wake Policy
 *
 * - `wake_any = true`: delegate to the native "wake one of N" primitive
 *   (`unpark_one`). No ordering guarantee is needed or provided.
 * - `wake_any = false`: the mutex picks a specific thread, the one holding the
 *   oldest park ticket, through `unpark_filter`.
 */

use super::traits::{ParkOutcome, ParkWake, WakeResult};
use crate::core::errors::ParkError;
use parking_lot_core::{
    park, unpark_all, unpark_filter, unpark_one, FilterOp, ParkResult, ParkToken, UnparkToken,
};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Token handed to threads unparked by `wake`
const TOKEN_WAKE: UnparkToken = UnparkToken(1);

/// Futex-based park/wake service
///
/// # Performance
///
/// - Zero allocations
/// - Direct futex syscalls on Linux
/// - O(1) lookup via parking_lot_core's address-hashed buckets
#[derive(Debug)]
pub struct FutexPark {
    wake_any: bool,
    /// Monotonic park tickets, used to find the oldest waiter
    tickets: AtomicUsize,
    /// Threads currently between entering and leaving `wait`
    parked: AtomicUsize,
}

impl FutexPark {
    /// Create a service that lets the OS pick which waiter to wake
    pub const fn new() -> Self {
        Self::with_wake_any(true)
    }

    pub const fn with_wake_any(wake_any: bool) -> Self {
        Self {
            wake_any,
            tickets: AtomicUsize::new(0),
            parked: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn wake_any(&self) -> bool {
        self.wake_any
    }

    #[inline(always)]
    fn key(word: &AtomicU32) -> usize {
        word as *const AtomicU32 as usize
    }

    /// Wake the waiter with the lowest park ticket
    fn wake_oldest(&self, key: usize) -> usize {
        let mut oldest: Option<usize> = None;
        // First pass only observes the queue
        unsafe {
            unpark_filter(
                key,
                |ParkToken(ticket)| {
                    oldest = Some(oldest.map_or(ticket, |t| t.min(ticket)));
                    FilterOp::Skip
                },
                |_| TOKEN_WAKE,
            );
        }

        let Some(target) = oldest else {
            return 0;
        };

        let result = unsafe {
            unpark_filter(
                key,
                |ParkToken(ticket)| {
                    if ticket == target {
                        FilterOp::Unpark
                    } else {
                        FilterOp::Skip
                    }
                },
                |_| TOKEN_WAKE,
            )
        };
        if result.unparked_threads > 0 {
            return result.unparked_threads;
        }

        // The target left the queue between passes (timeout); someone else
        // still owns the wake obligation
        unsafe { unpark_one(key, |_| TOKEN_WAKE) }.unparked_threads
    }
}

impl Default for FutexPark {
    fn default() -> Self {
        Self::new()
    }
}

impl ParkWake for FutexPark {
    fn wait(
        &self,
        word: &AtomicU32,
        expected: u32,
        timeout: Option<Duration>,
    ) -> Result<ParkOutcome, ParkError> {
        let key = Self::key(word);
        let ticket = self.tickets.fetch_add(1, Ordering::Relaxed);
        // A timeout past the end of the clock is no timeout at all
        let deadline = timeout.and_then(|d| Instant::now().checked_add(d));

        self.parked.fetch_add(1, Ordering::Relaxed);
        let result = unsafe {
            park(
                key,
                || word.load(Ordering::Relaxed) == expected,
                || {},
                |_key, _was_last| {},
                ParkToken(ticket),
                deadline,
            )
        };
        self.parked.fetch_sub(1, Ordering::Relaxed);

        Ok(match result {
            ParkResult::Unparked(token) if token == TOKEN_WAKE => ParkOutcome::Woken,
            ParkResult::Unparked(_) => ParkOutcome::Spurious,
            ParkResult::Invalid => ParkOutcome::Mismatch,
            ParkResult::TimedOut => ParkOutcome::TimedOut,
        })
    }

    fn wake(&self, word: &AtomicU32, count: usize) -> Result<WakeResult, ParkError> {
        let key = Self::key(word);

        if count == usize::MAX {
            let woken = unsafe { unpark_all(key, TOKEN_WAKE) };
            return Ok(WakeResult::from_count(woken));
        }

        let mut woken = 0;
        while woken < count {
            let n = if self.wake_any {
                unsafe { unpark_one(key, |_| TOKEN_WAKE) }.unparked_threads
            } else {
                self.wake_oldest(key)
            };
            if n == 0 {
                break;
            }
            woken += n;
        }

        Ok(WakeResult::from_count(woken))
    }

    fn waiter_count(&self, _word: &AtomicU32) -> usize {
        self.parked.load(Ordering::Relaxed)
    }

    fn name(&self) -> &'static str {
        "futex"
    }
}
