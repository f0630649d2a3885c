/*!
 * Adaptive Mutex
 *
 * A mutual-exclusion lock that escalates through three phases:
 *
 * 1. **Speculative grab**: one atomic exchange; the whole uncontended
 *    acquisition
 * 2. **Bounded spin**: a single contender at a time (the holder of the spin
 *    privilege) busy-polls the lock word for a bounded number of reloads
 * 3. **Park**: everyone else blocks in the OS sleep set until woken
 *
 * Unlock is one atomic exchange unless the sleeping flag was set. Even then
 * the OS wake is skipped when a spinner is live, since that spinner will
 * observe the release on its next reload.
 *
 * # Fairness
 *
 * None. New arrivals, the spinner and woken sleepers race symmetrically for
 * each release, trading FIFO order for throughput.
 */

use super::config::MutexConfig;
use super::park::{FutexPark, ParkOutcome, ParkWake};
use super::stats::{MutexStats, StatsSnapshot};
use super::word::{LockWord, WordState, LOCKED, SLEEPING};
use crate::core::errors::MutexError;
use parking_lot::lock_api;
use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{error, trace};

/// Raw adaptive mutex, generic over the park/wake service
pub struct RawAdaptiveMutex<P = FutexPark> {
    word: LockWord,
    /// Last thread to acquire; diagnostics only
    owner: AtomicU64,
    config: MutexConfig,
    stats: MutexStats,
    park: P,
}

/// Data-guarding mutex backed by the futex park service
pub type Mutex<T> = lock_api::Mutex<RawAdaptiveMutex, T>;
/// RAII guard for [`Mutex`]
pub type MutexGuard<'a, T> = lock_api::MutexGuard<'a, RawAdaptiveMutex, T>;

/// Create a [`Mutex`] with a non-default configuration
pub const fn mutex_with_config<T>(config: MutexConfig, value: T) -> Mutex<T> {
    Mutex::from_raw(RawAdaptiveMutex::with_config(config), value)
}

impl RawAdaptiveMutex<FutexPark> {
    pub const fn new() -> Self {
        Self::with_config(MutexConfig::DEFAULT)
    }

    /// Create a mutex with `config`
    ///
    /// The configuration is only checked in debug builds; run
    /// [`MutexConfig::validate`] first for a recoverable error.
    pub const fn with_config(config: MutexConfig) -> Self {
        debug_assert!(config.is_valid(), "invalid mutex configuration");
        Self {
            word: LockWord::new(),
            owner: AtomicU64::new(0),
            park: FutexPark::with_wake_any(config.wake_any),
            stats: MutexStats::new(),
            config,
        }
    }
}

impl Default for RawAdaptiveMutex<FutexPark> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: ParkWake> RawAdaptiveMutex<P> {
    /// Create a mutex parking through a custom service
    ///
    /// Like [`with_config`](RawAdaptiveMutex::with_config), `config` is only
    /// checked in debug builds.
    pub fn with_park(config: MutexConfig, park: P) -> Self {
        #[cfg(debug_assertions)]
        if let Err(err) = config.validate() {
            panic!("{err}");
        }
        Self {
            word: LockWord::new(),
            owner: AtomicU64::new(0),
            config,
            stats: MutexStats::new(),
            park,
        }
    }

    /// Block until exclusive ownership is held
    #[inline]
    pub fn lock(&self) {
        let prev = self.word.speculative_grab();
        if !prev.is_locked() {
            if prev.is_sleeping() {
                // The grab cleared a pending wake obligation; put it back
                self.word.or_sleeping();
            }
            self.record_owner();
            return;
        }
        self.lock_slow(None);
    }

    /// Acquire only if the lock is free right now; never spins or parks
    #[inline]
    pub fn try_lock(&self) -> bool {
        // Sets LOCKED without clearing SLEEPING, so a failed attempt leaves no
        // wake obligation behind
        let acquired = !self.word.try_grab().is_locked();
        if acquired {
            self.record_owner();
        }
        acquired
    }

    /// Like [`lock`](Self::lock), giving up once `deadline` passes
    #[inline]
    pub fn try_lock_until(&self, deadline: Instant) -> bool {
        self.try_lock() || self.lock_slow(Some(deadline))
    }

    #[inline]
    pub fn try_lock_for(&self, timeout: Duration) -> bool {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.try_lock_until(deadline),
            None => {
                self.lock();
                true
            }
        }
    }

    /// Release ownership
    ///
    /// # Safety
    ///
    /// The calling context must hold the lock. Unlocking a free mutex panics
    /// in debug builds; in release builds it may silently break mutual
    /// exclusion.
    #[inline]
    pub unsafe fn unlock(&self) {
        let prev = self.word.release();
        debug_assert!(prev.is_locked(), "{}", MutexError::UnlockOfUnlocked);
        if prev.is_sleeping() {
            self.wake_one_sleeper();
        }
    }

    /// Run `f` while holding the lock, releasing it even if `f` unwinds
    pub fn with_lock<R>(&self, f: impl FnOnce() -> R) -> R {
        struct Release<'a, P: ParkWake>(&'a RawAdaptiveMutex<P>);

        impl<P: ParkWake> Drop for Release<'_, P> {
            fn drop(&mut self) {
                // SAFETY: constructed right after `lock` returned
                unsafe { self.0.unlock() }
            }
        }

        self.lock();
        let _release = Release(self);
        f()
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.word.load().is_locked()
    }

    /// Current lock word, for diagnostics
    pub fn word_state(&self) -> WordState {
        self.word.load()
    }

    /// Id of the last thread to acquire the lock, if any ever did
    ///
    /// Stale as soon as it is read; never use it to decide ownership.
    pub fn owner_hint(&self) -> Option<NonZeroU64> {
        NonZeroU64::new(self.owner.load(Ordering::Relaxed))
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn config(&self) -> &MutexConfig {
        &self.config
    }

    pub fn park_service(&self) -> &P {
        &self.park
    }

    #[inline]
    fn record_owner(&self) {
        self.owner.store(current_thread_id(), Ordering::Relaxed);
    }

    /// Contended acquisition, entered after the speculative grab lost
    ///
    /// Returns `false` only when `deadline` passed before the lock was won.
    #[cold]
    fn lock_slow(&self, deadline: Option<Instant>) -> bool {
        let spin_iterations = self.config.spin_iterations;
        let spin_yield_burst = self.config.spin_yield_burst;

        // The failed grab saw the lock held
        let mut snapshot = WordState::from_bits(LOCKED);
        let mut we_spin = false;
        let mut iteration = 0u32;

        loop {
            // Try to acquire from the last observed state
            if !snapshot.is_locked() {
                if we_spin {
                    // Taking the lock also hands back the spin privilege
                    match self
                        .word
                        .compare_exchange(snapshot, WordState::from_bits(LOCKED | SLEEPING))
                    {
                        Ok(_) => {
                            self.stats.record_spins(iteration);
                            trace!(iteration, "Spinner acquired lock");
                            break;
                        }
                        Err(actual) => {
                            snapshot = actual;
                            continue;
                        }
                    }
                }

                let prev = self.word.exchange_low(LOCKED | SLEEPING);
                if !prev.is_locked() {
                    break;
                }
                snapshot = prev;
                continue;
            }

            // Announce a (potential) sleeper before deciding to spin or park
            self.word.or_sleeping();

            if !we_spin && !self.word.exchange_spinning(true) {
                we_spin = true;
                self.stats.record_spin_privilege();
                trace!("Won spin privilege");
            }

            if we_spin {
                if iteration < spin_iterations {
                    for _ in 0..spin_yield_burst {
                        std::hint::spin_loop();
                    }
                    snapshot = self.word.load();
                    iteration += 1;
                    continue;
                }

                self.word.exchange_spinning(false);
                we_spin = false;
                self.stats.record_spins(iteration);
                trace!(iteration, "Spin budget exhausted, dropping privilege");
            }

            // Never park on a stale view
            let current = self.word.load();
            if !current.is_locked() || !current.is_sleeping() {
                snapshot = current;
                continue;
            }

            let timeout = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        self.stats.record_timeout();
                        trace!("Timed lock gave up");
                        return false;
                    }
                    let remaining = deadline - now;
                    Some(self.config.park_timeout.map_or(remaining, |t| t.min(remaining)))
                }
                None => self.config.park_timeout,
            };

            trace!(state = ?current, ?timeout, "Parking");
            let outcome = match self.park.wait(self.word.as_atomic(), current.bits(), timeout) {
                Ok(outcome) => outcome,
                Err(err) => fatal(MutexError::ParkFailed(err)),
            };
            match outcome {
                ParkOutcome::Mismatch => self.stats.record_park_mismatch(),
                ParkOutcome::Woken | ParkOutcome::Spurious | ParkOutcome::TimedOut => {
                    self.stats.record_park()
                }
            }
            trace!(?outcome, "Returned from park");

            // A wake is only a hint; re-validate from scratch
            iteration = 0;
            snapshot = self.word.load();
        }

        self.stats.record_slow_acquire();
        self.record_owner();
        true
    }

    /// Wake dispatch for an unlock that saw the sleeping flag
    #[cold]
    fn wake_one_sleeper(&self) {
        if self.word.load().is_spinning() {
            // The spinner will see the release on its next reload
            self.stats.record_wake_skipped();
            trace!("Wake skipped, spinner active");
            return;
        }

        match self.park.wake(self.word.as_atomic(), 1) {
            Ok(result) => {
                self.stats.record_wake(result.count());
                trace!(woken = result.count(), "Woke sleeper");
            }
            Err(err) => fatal(MutexError::WakeFailed(err)),
        }
    }
}

impl<P: ParkWake> fmt::Debug for RawAdaptiveMutex<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawAdaptiveMutex")
            .field("word", &self.word)
            .field("owner", &self.owner_hint())
            .field("park", &self.park.name())
            .finish()
    }
}

unsafe impl lock_api::RawMutex for RawAdaptiveMutex<FutexPark> {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self::new();

    type GuardMarker = lock_api::GuardSend;

    #[inline]
    fn lock(&self) {
        RawAdaptiveMutex::lock(self)
    }

    #[inline]
    fn try_lock(&self) -> bool {
        RawAdaptiveMutex::try_lock(self)
    }

    #[inline]
    unsafe fn unlock(&self) {
        RawAdaptiveMutex::unlock(self)
    }

    #[inline]
    fn is_locked(&self) -> bool {
        RawAdaptiveMutex::is_locked(self)
    }
}

unsafe impl lock_api::RawMutexTimed for RawAdaptiveMutex<FutexPark> {
    type Duration = Duration;
    type Instant = Instant;

    #[inline]
    fn try_lock_for(&self, timeout: Duration) -> bool {
        RawAdaptiveMutex::try_lock_for(self, timeout)
    }

    #[inline]
    fn try_lock_until(&self, timeout: Instant) -> bool {
        RawAdaptiveMutex::try_lock_until(self, timeout)
    }
}

/// A mutex that cannot park cannot guarantee progress
#[cold]
fn fatal(err: MutexError) -> ! {
    error!(error = %err, "Adaptive mutex park/wake service failed, aborting");
    std::process::abort()
}

/// Small process-unique thread id for the owner hint
fn current_thread_id() -> u64 {
    static NEXT_ID: AtomicU64 = AtomicU64::new(1);
    thread_local! {
        static THREAD_ID: u64 = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    }
    THREAD_ID.with(|id| *id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sync::word::SPINNING;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_uncontended_lock_unlock() {
        let mutex = RawAdaptiveMutex::new();
        mutex.lock();
        assert!(mutex.is_locked());
        unsafe { mutex.unlock() };
        assert!(!mutex.is_locked());
        assert_eq!(mutex.word_state(), WordState::UNLOCKED);
        assert_eq!(mutex.stats(), StatsSnapshot::default());
    }

    #[test]
    fn test_try_lock_fails_while_held() {
        let mutex = RawAdaptiveMutex::new();
        assert!(mutex.try_lock());
        assert!(!mutex.try_lock());
        unsafe { mutex.unlock() };
        assert!(mutex.try_lock());
        unsafe { mutex.unlock() };
    }

    #[test]
    fn test_failed_try_lock_keeps_sleeping_flag() {
        let mutex = RawAdaptiveMutex::new();
        mutex.lock();
        mutex.word.or_sleeping();

        assert!(!mutex.try_lock());
        assert!(mutex.word_state().is_sleeping());

        unsafe { mutex.unlock() };
    }

    #[test]
    fn test_fast_path_restores_sleeping_flag() {
        let mutex = RawAdaptiveMutex::new();
        // Unlocked, but a sleeper is still registered
        mutex.word.or_sleeping();

        mutex.lock();
        let state = mutex.word_state();
        assert!(state.is_locked());
        assert!(state.is_sleeping());
        unsafe { mutex.unlock() };
    }

    #[test]
    fn test_owner_hint_tracks_last_acquirer() {
        let mutex = Arc::new(RawAdaptiveMutex::new());
        assert_eq!(mutex.owner_hint(), None);

        mutex.with_lock(|| ());
        let main_owner = mutex.owner_hint();
        assert!(main_owner.is_some());

        let other = {
            let mutex = mutex.clone();
            thread::spawn(move || {
                mutex.with_lock(|| ());
                mutex.owner_hint()
            })
            .join()
            .unwrap()
        };
        assert_ne!(other, main_owner);
    }

    #[test]
    fn test_with_lock_releases_on_panic() {
        let mutex = Arc::new(RawAdaptiveMutex::new());
        let result = {
            let mutex = mutex.clone();
            thread::spawn(move || mutex.with_lock(|| panic!("boom"))).join()
        };
        assert!(result.is_err());
        assert!(!mutex.is_locked());
    }

    #[test]
    fn test_unlock_skips_wake_when_spinner_present() {
        let mutex = RawAdaptiveMutex::new();
        mutex.lock();
        mutex.word.or_sleeping();
        mutex.word.exchange_spinning(true);

        unsafe { mutex.unlock() };

        let stats = mutex.stats();
        assert_eq!(stats.wakes_skipped, 1);
        assert_eq!(stats.wakes_issued, 0);
        assert_eq!(mutex.word_state(), WordState::from_bits(SPINNING));
    }

    #[test]
    fn test_try_lock_for_times_out() {
        let mutex = Arc::new(RawAdaptiveMutex::with_config(
            MutexConfig::DEFAULT.with_spin_iterations(10),
        ));
        mutex.lock();

        let waiter = {
            let mutex = mutex.clone();
            thread::spawn(move || {
                let start = Instant::now();
                let acquired = mutex.try_lock_for(Duration::from_millis(50));
                (acquired, start.elapsed())
            })
        };

        let (acquired, elapsed) = waiter.join().unwrap();
        assert!(!acquired);
        assert!(elapsed >= Duration::from_millis(50));
        assert_eq!(mutex.stats().timeouts, 1);
        // The abandoned waiter leaves its sleeper announcement behind
        assert!(mutex.word_state().is_sleeping());
        unsafe { mutex.unlock() };
        assert!(!mutex.is_locked());
    }

    #[test]
    fn test_try_lock_for_succeeds_after_release() {
        let mutex = Arc::new(RawAdaptiveMutex::new());
        mutex.lock();

        let waiter = {
            let mutex = mutex.clone();
            thread::spawn(move || {
                let acquired = mutex.try_lock_for(Duration::from_secs(5));
                if acquired {
                    unsafe { mutex.unlock() };
                }
                acquired
            })
        };

        thread::sleep(Duration::from_millis(20));
        unsafe { mutex.unlock() };
        assert!(waiter.join().unwrap());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "spin_yield_burst")]
    fn test_with_park_rejects_invalid_config() {
        let config = MutexConfig {
            spin_yield_burst: 0,
            ..MutexConfig::DEFAULT
        };
        let _ = RawAdaptiveMutex::with_park(config, FutexPark::new());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "invalid mutex configuration")]
    fn test_with_config_rejects_invalid_config() {
        let config = MutexConfig::DEFAULT.with_park_timeout(Some(Duration::MAX));
        let _ = RawAdaptiveMutex::with_config(config);
    }

    #[test]
    fn test_guarded_mutex_counter() {
        let counter = Arc::new(Mutex::new(0u64));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = counter.clone();
                thread::spawn(move || {
                    for _ in 0..1_000 {
                        *counter.lock() += 1;
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*counter.lock(), 8_000);
    }

    #[test]
    fn test_guarded_mutex_timed() {
        let mutex = mutex_with_config(MutexConfig::long_wait(), vec![1, 2, 3]);
        let guard = mutex.lock();
        assert!(mutex.try_lock_for(Duration::from_millis(10)).is_none());
        drop(guard);
        assert_eq!(mutex.try_lock_for(Duration::from_millis(10)).map(|g| g.len()), Some(3));
    }
}
