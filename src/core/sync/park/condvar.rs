/*!
 * Condvar-Based Park/Wake with Sharded Architecture
 *
 * Portable emulation of futex semantics using parking_lot::Condvar.
 *
 * # Design: Fixed Sharded Array with Per-Waiter Flags
 *
 * Words are hashed onto a fixed array of slots, like the kernel's futex
 * hash table:
 * - Zero slot allocations after initialization
 * - Stable memory addresses (required for condvar)
 * - O(1) lookup via simple hash modulo
 *
 * Several words may share a slot. A plain `notify_one` could then hand the
 * only wake to a thread parked on a different word, and the intended sleeper
 * would stay parked forever. Each waiter therefore carries its own
 * `notified` flag: `wake` flips the flags of waiters on the target word and
 * broadcasts, and everyone else goes straight back to sleep.
 *
 * # Wake Policy
 *
 * Always first-in first-out: `wake` notifies the longest-parked waiters on the
 * word. There is no `wake_any` switch, since FIFO already satisfies both
 * settings of `MutexConfig::wake_any`.
 */

use super::traits::{ParkOutcome, ParkWake, WakeResult};
use crate::core::errors::ParkError;
use crate::core::limits::PARKING_SLOTS;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

const SLOT_MASK: usize = PARKING_SLOTS - 1;

#[derive(Debug)]
struct Waiter {
    addr: usize,
    ticket: u64,
    notified: bool,
}

/// A single condvar slot with its FIFO of waiters
#[repr(C, align(64))] // Cache-line aligned to prevent false sharing
struct CondvarSlot {
    condvar: Condvar,
    queue: Mutex<VecDeque<Waiter>>,
}

impl CondvarSlot {
    const fn new() -> Self {
        Self {
            condvar: Condvar::new(),
            queue: Mutex::new(VecDeque::new()),
        }
    }
}

/// Condvar-based park/wake service with fixed sharded architecture
///
/// # Performance
///
/// - Works on all platforms
/// - Predictable memory footprint
/// - Slower than `FutexPark` under heavy sharing of a slot (broadcast wake)
pub struct CondvarPark {
    /// Fixed array of condvar slots (never resizes, stable addresses)
    slots: Box<[CondvarSlot; PARKING_SLOTS]>,
    tickets: AtomicU64,
}

impl CondvarPark {
    /// Create a new condvar-based park/wake service
    pub fn new() -> Self {
        Self {
            slots: Box::new([const { CondvarSlot::new() }; PARKING_SLOTS]),
            tickets: AtomicU64::new(0),
        }
    }

    #[inline]
    fn addr(word: &AtomicU32) -> usize {
        word as *const AtomicU32 as usize
    }

    /// Hash word address to slot
    #[inline]
    fn slot(&self, addr: usize) -> &CondvarSlot {
        let mut hasher = ahash::AHasher::default();
        addr.hash(&mut hasher);
        &self.slots[(hasher.finish() as usize) & SLOT_MASK]
    }

    /// Remove our entry, reporting whether it had been notified
    fn dequeue(queue: &mut VecDeque<Waiter>, ticket: u64) -> Result<bool, ParkError> {
        let pos = queue
            .iter()
            .position(|w| w.ticket == ticket)
            .ok_or(ParkError::Corrupted)?;
        let waiter = queue.remove(pos).ok_or(ParkError::Corrupted)?;
        Ok(waiter.notified)
    }
}

impl Default for CondvarPark {
    fn default() -> Self {
        Self::new()
    }
}

impl ParkWake for CondvarPark {
    fn wait(
        &self,
        word: &AtomicU32,
        expected: u32,
        timeout: Option<Duration>,
    ) -> Result<ParkOutcome, ParkError> {
        let addr = Self::addr(word);
        let slot = self.slot(addr);
        let deadline = timeout.and_then(|d| Instant::now().checked_add(d));

        let mut queue = slot.queue.lock();
        // Compared under the slot lock; wakers take the same lock after
        // changing the word
        if word.load(Ordering::Relaxed) != expected {
            return Ok(ParkOutcome::Mismatch);
        }

        let ticket = self.tickets.fetch_add(1, Ordering::Relaxed);
        queue.push_back(Waiter {
            addr,
            ticket,
            notified: false,
        });

        loop {
            let notified = queue
                .iter()
                .find(|w| w.ticket == ticket)
                .map(|w| w.notified)
                .ok_or(ParkError::Corrupted)?;
            if notified {
                Self::dequeue(&mut queue, ticket)?;
                return Ok(ParkOutcome::Woken);
            }

            match deadline {
                Some(deadline) => {
                    if slot.condvar.wait_until(&mut queue, deadline).timed_out() {
                        // A wake that raced with the timeout still counts
                        return Ok(if Self::dequeue(&mut queue, ticket)? {
                            ParkOutcome::Woken
                        } else {
                            ParkOutcome::TimedOut
                        });
                    }
                }
                None => slot.condvar.wait(&mut queue),
            }
        }
    }

    /// Notify the `count` oldest waiters on `word`, in park order
    fn wake(&self, word: &AtomicU32, count: usize) -> Result<WakeResult, ParkError> {
        let addr = Self::addr(word);
        let slot = self.slot(addr);

        let mut queue = slot.queue.lock();
        let mut woken = 0;
        for waiter in queue
            .iter_mut()
            .filter(|w| w.addr == addr && !w.notified)
            .take(count)
        {
            waiter.notified = true;
            woken += 1;
        }
        drop(queue);

        if woken > 0 {
            slot.condvar.notify_all();
        }
        Ok(WakeResult::from_count(woken))
    }

    fn waiter_count(&self, word: &AtomicU32) -> usize {
        let addr = Self::addr(word);
        self.slot(addr)
            .queue
            .lock()
            .iter()
            .filter(|w| w.addr == addr && !w.notified)
            .count()
    }

    fn name(&self) -> &'static str {
        "condvar"
    }
}
