/*!
 * Park/Wake Traits
 *
 * The OS service the mutex consumes for its slow path: block a thread on the
 * value of a memory word, and signal blocked threads awake.
 *
 * # Design: Trait Seam for the Sleep Set
 *
 * The set of parked threads is owned and serialized entirely by the
 * implementation. The mutex only ever issues `wait` and `wake` calls, which
 * keeps the lock algorithm testable against doubles that count or script
 * those calls.
 */

use crate::core::errors::ParkError;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use std::time::Duration;

/// Why a `wait` call returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParkOutcome {
    /// Removed from the sleep set by a `wake` call
    Woken,
    /// Returned without a matching `wake`
    Spurious,
    /// The word no longer held the expected value; never blocked
    Mismatch,
    /// The timeout elapsed before any wake
    TimedOut,
}

/// Result of a wake operation
///
/// Compact representation (single usize) for efficient returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeResult {
    /// Successfully woke N waiters (N >= 1)
    Woken(usize),
    /// No waiters were parked on the word
    NoWaiters,
}

impl WakeResult {
    /// Check if any waiters were woken
    #[inline(always)]
    pub fn is_woken(&self) -> bool {
        matches!(self, WakeResult::Woken(_))
    }

    /// Get number of woken waiters (0 if none)
    #[inline(always)]
    pub fn count(&self) -> usize {
        match self {
            WakeResult::Woken(n) => *n,
            WakeResult::NoWaiters => 0,
        }
    }

    pub(crate) fn from_count(n: usize) -> Self {
        if n == 0 {
            WakeResult::NoWaiters
        } else {
            WakeResult::Woken(n)
        }
    }
}

/// Futex-style park/wake service keyed by word address
///
/// Implementations must be:
/// - **Atomic on entry**: `wait` compares the word against `expected` and
///   enqueues the caller as one step with respect to `wake` on the same word,
///   so a wake issued after the word changed can never be missed
/// - **Thread-safe**: Safe to call from multiple threads
///
/// Errors are reserved for the service itself failing. The mutex treats them
/// as fatal.
pub trait ParkWake: Send + Sync {
    /// Block while `word == expected`, for at most `timeout`
    fn wait(
        &self,
        word: &AtomicU32,
        expected: u32,
        timeout: Option<Duration>,
    ) -> Result<ParkOutcome, ParkError>;

    /// Wake up to `count` threads parked on `word`
    fn wake(&self, word: &AtomicU32, count: usize) -> Result<WakeResult, ParkError>;

    /// Get approximate count of parked threads for a word (for diagnostics)
    fn waiter_count(&self, word: &AtomicU32) -> usize {
        let _ = word;
        0 // Default: unknown
    }

    /// Get strategy name for debugging
    fn name(&self) -> &'static str;
}

impl<P: ParkWake + ?Sized> ParkWake for Arc<P> {
    #[inline]
    fn wait(
        &self,
        word: &AtomicU32,
        expected: u32,
        timeout: Option<Duration>,
    ) -> Result<ParkOutcome, ParkError> {
        (**self).wait(word, expected, timeout)
    }

    #[inline]
    fn wake(&self, word: &AtomicU32, count: usize) -> Result<WakeResult, ParkError> {
        (**self).wake(word, count)
    }

    fn waiter_count(&self, word: &AtomicU32) -> usize {
        (**self).waiter_count(word)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

impl<P: ParkWake + ?Sized> ParkWake for Box<P> {
    #[inline]
    fn wait(
        &self,
        word: &AtomicU32,
        expected: u32,
        timeout: Option<Duration>,
    ) -> Result<ParkOutcome, ParkError> {
        (**self).wait(word, expected, timeout)
    }

    #[inline]
    fn wake(&self, word: &AtomicU32, count: usize) -> Result<WakeResult, ParkError> {
        (**self).wake(word, count)
    }

    fn waiter_count(&self, word: &AtomicU32) -> usize {
        (**self).waiter_count(word)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}
