/*!
 * Adaptive Mutex Scenario Tests
 *
 * Uncontended fast path, spin-then-park escalation, wake suppression by a
 * live spinner, and multi-thread contention over every park service.
 */

use adaptive_mutex::{
    CondvarPark, FutexPark, MutexConfig, ParkError, ParkOutcome, ParkWake, RawAdaptiveMutex,
    StatsSnapshot, WakeResult,
};
use mockall::mock;
use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

mock! {
    pub Park {}

    impl ParkWake for Park {
        fn wait(
            &self,
            word: &AtomicU32,
            expected: u32,
            timeout: Option<Duration>,
        ) -> Result<ParkOutcome, ParkError>;
        fn wake(&self, word: &AtomicU32, count: usize) -> Result<WakeResult, ParkError>;
        fn waiter_count(&self, word: &AtomicU32) -> usize;
        fn name(&self) -> &'static str;
    }
}

/// Futex park service that counts the calls made into it
#[derive(Default)]
struct CountingPark {
    inner: FutexPark,
    waits: AtomicUsize,
    wakes: AtomicUsize,
}

impl CountingPark {
    fn waits(&self) -> usize {
        self.waits.load(Ordering::SeqCst)
    }

    fn wakes(&self) -> usize {
        self.wakes.load(Ordering::SeqCst)
    }
}

impl ParkWake for CountingPark {
    fn wait(
        &self,
        word: &AtomicU32,
        expected: u32,
        timeout: Option<Duration>,
    ) -> Result<ParkOutcome, ParkError> {
        self.waits.fetch_add(1, Ordering::SeqCst);
        self.inner.wait(word, expected, timeout)
    }

    fn wake(&self, word: &AtomicU32, count: usize) -> Result<WakeResult, ParkError> {
        self.wakes.fetch_add(1, Ordering::SeqCst);
        self.inner.wake(word, count)
    }

    fn waiter_count(&self, word: &AtomicU32) -> usize {
        self.inner.waiter_count(word)
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}

fn spin_until(mut condition: impl FnMut() -> bool) {
    while !condition() {
        thread::yield_now();
    }
}

#[test]
fn test_uncontended_never_touches_park_service() {
    let mut park = MockPark::new();
    park.expect_wait().never();
    park.expect_wake().never();
    park.expect_name().return_const("mock");

    let mutex = RawAdaptiveMutex::with_park(MutexConfig::default(), park);
    for _ in 0..3 {
        mutex.lock();
        assert!(mutex.is_locked());
        unsafe { mutex.unlock() };
    }

    assert!(!mutex.is_locked());
    assert_eq!(mutex.stats(), StatsSnapshot::default());
    assert_eq!(mutex.word_state().bits(), 0);
}

#[test]
fn test_spurious_wakeups_are_revalidated() {
    let calls = Arc::new(AtomicUsize::new(0));

    let mut park = MockPark::new();
    {
        let calls = calls.clone();
        park.expect_wait().returning(move |_, _, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(1));
            Ok(ParkOutcome::Spurious)
        });
    }
    park.expect_wake().returning(|_, _| Ok(WakeResult::NoWaiters));
    park.expect_name().return_const("mock");

    let mutex = Arc::new(RawAdaptiveMutex::with_park(
        MutexConfig::default().with_spin_iterations(0),
        park,
    ));
    mutex.lock();

    let waiter = {
        let mutex = mutex.clone();
        thread::spawn(move || {
            mutex.lock();
            unsafe { mutex.unlock() };
        })
    };

    // Several spurious returns must not hand out the lock
    spin_until(|| calls.load(Ordering::SeqCst) >= 3);
    assert!(mutex.is_locked());
    assert!(!waiter.is_finished());

    unsafe { mutex.unlock() };
    waiter.join().unwrap();

    let stats = mutex.stats();
    assert!(stats.parks >= 3);
    assert_eq!(stats.slow_acquires, 1);
}

#[test]
fn test_contended_spin_then_park_then_wake() {
    const SPINS: u32 = 50;

    let mutex = Arc::new(RawAdaptiveMutex::with_park(
        MutexConfig::default().with_spin_iterations(SPINS),
        CountingPark::default(),
    ));
    mutex.lock();

    let contender = {
        let mutex = mutex.clone();
        thread::spawn(move || {
            mutex.lock();
            unsafe { mutex.unlock() };
        })
    };

    // Contender spins its whole budget, then parks
    spin_until(|| mutex.park_service().waits() == 1);
    let word = mutex.word_state();
    assert!(word.is_locked());
    assert!(word.is_sleeping());
    assert!(!word.is_spinning());
    thread::sleep(Duration::from_millis(50));

    let before = mutex.stats();
    assert_eq!(before.spin_privilege_wins, 1);
    assert_eq!(before.spin_iterations, u64::from(SPINS));

    unsafe { mutex.unlock() };
    contender.join().unwrap();

    let after = mutex.stats();
    assert_eq!(after.slow_acquires, 1);
    assert_eq!(after.parks, 1);
    assert_eq!(after.park_mismatches, 0);
    assert_eq!(after.threads_woken, 1);
    assert_eq!(after.wakes_skipped, 0);
    // FutexPark counts parked threads per service, so any word will do
    assert_eq!(mutex.park_service().waiter_count(&AtomicU32::new(0)), 0);
}

#[test]
fn test_live_spinner_suppresses_wake() {
    let config = MutexConfig {
        spin_iterations: 100_000,
        spin_yield_burst: 1_024,
        ..MutexConfig::default()
    };
    let mutex = Arc::new(RawAdaptiveMutex::with_park(config, CountingPark::default()));
    let acquired = Arc::new(AtomicBool::new(false));
    let release = Arc::new(AtomicBool::new(false));

    mutex.lock();

    let spinner = {
        let mutex = mutex.clone();
        let acquired = acquired.clone();
        let release = release.clone();
        thread::spawn(move || {
            mutex.lock();
            acquired.store(true, Ordering::SeqCst);
            spin_until(|| release.load(Ordering::SeqCst));
            unsafe { mutex.unlock() };
        })
    };

    spin_until(|| mutex.word_state().is_spinning());
    assert!(mutex.word_state().is_sleeping());
    unsafe { mutex.unlock() };

    spin_until(|| acquired.load(Ordering::SeqCst));

    let stats = mutex.stats();
    assert_eq!(stats.wakes_skipped, 1);
    assert_eq!(stats.wakes_issued, 0);
    assert_eq!(stats.parks, 0);
    assert!(stats.spin_iterations <= u64::from(config.spin_iterations));
    assert_eq!(mutex.park_service().waits(), 0);
    assert_eq!(mutex.park_service().wakes(), 0);

    release.store(true, Ordering::SeqCst);
    spinner.join().unwrap();
}

/// N threads x K cycles, asserting nobody overlaps inside the critical section
fn hammer<P: ParkWake + 'static>(
    mutex: Arc<RawAdaptiveMutex<P>>,
    threads: usize,
    cycles: usize,
    max_hold_spins: u32,
) -> usize {
    let inside = Arc::new(AtomicBool::new(false));
    let acquisitions = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..threads)
        .map(|seed| {
            let mutex = mutex.clone();
            let inside = inside.clone();
            let acquisitions = acquisitions.clone();
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed as u64);
                for _ in 0..cycles {
                    let hold = if max_hold_spins == 0 {
                        0
                    } else {
                        rng.gen_range(0..max_hold_spins)
                    };
                    mutex.with_lock(|| {
                        assert!(
                            !inside.swap(true, Ordering::SeqCst),
                            "two threads in critical section"
                        );
                        for _ in 0..hold {
                            std::hint::spin_loop();
                        }
                        acquisitions.fetch_add(1, Ordering::Relaxed);
                        inside.store(false, Ordering::SeqCst);
                    });
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    acquisitions.load(Ordering::SeqCst)
}

#[test]
fn test_three_way_contention() {
    let mutex = Arc::new(RawAdaptiveMutex::new());
    assert_eq!(hammer(mutex.clone(), 3, 10, 64), 30);
    assert!(!mutex.is_locked());
    assert!(!mutex.word_state().is_spinning());
    assert_eq!(mutex.park_service().waiter_count(&AtomicU32::new(0)), 0);
}

#[test]
fn test_heavy_contention_futex() {
    let mutex = Arc::new(RawAdaptiveMutex::new());
    assert_eq!(hammer(mutex.clone(), 8, 2_000, 256), 16_000);
    assert!(!mutex.is_locked());
}

#[test]
fn test_heavy_contention_targeted_wake() {
    let mutex = Arc::new(RawAdaptiveMutex::with_config(
        MutexConfig::default().with_wake_any(false),
    ));
    assert_eq!(hammer(mutex.clone(), 8, 1_000, 256), 8_000);
    assert!(!mutex.is_locked());
}

#[test]
fn test_heavy_contention_without_spinning() {
    let mutex = Arc::new(RawAdaptiveMutex::with_config(
        MutexConfig::default().with_spin_iterations(0),
    ));
    assert_eq!(hammer(mutex.clone(), 6, 1_000, 128), 6_000);
    assert_eq!(mutex.stats().spin_iterations, 0);
}

#[test]
fn test_heavy_contention_condvar() {
    let mutex = Arc::new(RawAdaptiveMutex::with_park(
        MutexConfig::default(),
        CondvarPark::new(),
    ));
    assert_eq!(hammer(mutex.clone(), 6, 1_000, 128), 6_000);
    assert!(!mutex.is_locked());
}

#[test]
fn test_periodic_revalidation_while_parked() {
    let mutex = Arc::new(RawAdaptiveMutex::with_config(
        MutexConfig::long_wait().with_park_timeout(Some(Duration::from_micros(200))),
    ));
    assert_eq!(hammer(mutex.clone(), 4, 500, 512), 2_000);
    assert!(!mutex.is_locked());
}

#[test]
fn test_timed_and_blocking_lockers_mix() {
    let mutex = Arc::new(RawAdaptiveMutex::new());
    let timed_wins = Arc::new(AtomicUsize::new(0));

    let blocking: Vec<_> = (0..3)
        .map(|_| {
            let mutex = mutex.clone();
            thread::spawn(move || {
                for _ in 0..500 {
                    mutex.with_lock(|| thread::yield_now());
                }
            })
        })
        .collect();

    let timed: Vec<_> = (0..3)
        .map(|_| {
            let mutex = mutex.clone();
            let timed_wins = timed_wins.clone();
            thread::spawn(move || {
                for _ in 0..500 {
                    if mutex.try_lock_for(Duration::from_micros(50)) {
                        timed_wins.fetch_add(1, Ordering::Relaxed);
                        unsafe { mutex.unlock() };
                    }
                }
            })
        })
        .collect();

    for handle in blocking.into_iter().chain(timed) {
        handle.join().unwrap();
    }

    // Abandoned timed waits must not strand anybody
    assert!(!mutex.is_locked());
    assert!(timed_wins.load(Ordering::Relaxed) <= 1_500);
    assert!(mutex.try_lock());
    unsafe { mutex.unlock() };
}
