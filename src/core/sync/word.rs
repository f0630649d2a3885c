/*!
 * Lock Word
 *
 * The single shared state of the adaptive mutex: one `AtomicU32` holding
 * three flags.
 *
 * ```text
 *  31       24 23                 8 7        2   1         0
 * +----------+--------------------+----------+----------+--------+
 * | SPINNING |      reserved      | reserved | SLEEPING | LOCKED |
 * +----------+--------------------+----------+----------+--------+
 *   high byte                       low byte
 * ```
 *
 * # Design: Whole-Word Atomics Over Mixed-Size Access
 *
 * The flags live in separate bytes so that the low byte (locked + sleeping)
 * and the spinning byte can be updated independently. Rust has no sound way
 * to mix `AtomicU8` and `AtomicU32` accesses to the same memory, so byte-level
 * updates are expressed as bit-masked RMW operations on the whole word:
 *
 * - Spinning byte exchange: `fetch_or` / `fetch_and` (one instruction)
 * - Release: `fetch_and(!LOW_MASK)` (one instruction)
 * - Low byte exchange: `fetch_update` (a CAS loop; one instruction when
 *   uncontended)
 */

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Lock is held
pub const LOCKED: u32 = 1 << 0;
/// At least one thread may be parked (or about to park) on the word
pub const SLEEPING: u32 = 1 << 1;
/// Some thread holds the spin privilege
pub const SPINNING: u32 = 1 << 31;

/// Bits owned by the low byte
pub const LOW_MASK: u32 = 0xff;

/// Snapshot of the lock word
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct WordState(u32);

impl WordState {
    pub const UNLOCKED: Self = Self(0);

    #[inline(always)]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[inline(always)]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline(always)]
    pub const fn is_locked(self) -> bool {
        self.0 & LOCKED != 0
    }

    #[inline(always)]
    pub const fn is_sleeping(self) -> bool {
        self.0 & SLEEPING != 0
    }

    #[inline(always)]
    pub const fn is_spinning(self) -> bool {
        self.0 & SPINNING != 0
    }
}

impl fmt::Debug for WordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WordState")
            .field("locked", &self.is_locked())
            .field("sleeping", &self.is_sleeping())
            .field("spinning", &self.is_spinning())
            .finish()
    }
}

/// Atomically accessed, bit-packed lock state
#[repr(transparent)]
pub struct LockWord(AtomicU32);

impl LockWord {
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    /// Address handed to the park/wake service
    #[inline(always)]
    pub fn as_atomic(&self) -> &AtomicU32 {
        &self.0
    }

    #[inline(always)]
    pub fn load(&self) -> WordState {
        WordState(self.0.load(Ordering::Acquire))
    }

    /// Exchange the low byte to `LOCKED` (sleeping cleared), keeping `SPINNING`
    #[inline(always)]
    pub fn speculative_grab(&self) -> WordState {
        self.exchange_low(LOCKED)
    }

    /// Set `LOCKED` leaving every other bit alone; a no-op when already held
    #[inline(always)]
    pub fn try_grab(&self) -> WordState {
        WordState(self.0.fetch_or(LOCKED, Ordering::Acquire))
    }

    /// Exchange the low byte to `new_low`, keeping the spinning byte
    #[inline(always)]
    pub fn exchange_low(&self, new_low: u32) -> WordState {
        debug_assert_eq!(new_low & !LOW_MASK, 0);
        let prev = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Relaxed, |w| {
                Some((w & !LOW_MASK) | new_low)
            })
            // The closure never declines, so both arms carry the previous value
            .unwrap_or_else(|w| w);
        WordState(prev)
    }

    /// Whole-word compare-and-swap
    #[inline(always)]
    pub fn compare_exchange(
        &self,
        expected: WordState,
        new: WordState,
    ) -> Result<WordState, WordState> {
        self.0
            .compare_exchange(expected.0, new.0, Ordering::AcqRel, Ordering::Acquire)
            .map(WordState)
            .map_err(WordState)
    }

    /// Set the sleeping flag; idempotent and leaves every other bit alone
    #[inline(always)]
    pub fn or_sleeping(&self) {
        self.0.fetch_or(SLEEPING, Ordering::AcqRel);
    }

    /// Exchange the spinning byte, returning whether it was set before
    #[inline(always)]
    pub fn exchange_spinning(&self, spinning: bool) -> bool {
        let prev = if spinning {
            self.0.fetch_or(SPINNING, Ordering::AcqRel)
        } else {
            self.0.fetch_and(!SPINNING, Ordering::AcqRel)
        };
        prev & SPINNING != 0
    }

    /// Exchange the low byte to zero (unlocked, no sleepers)
    #[inline(always)]
    pub fn release(&self) -> WordState {
        WordState(self.0.fetch_and(!LOW_MASK, Ordering::Release))
    }
}

impl Default for LockWord {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LockWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LockWord").field(&self.load()).finish()
    }
}
