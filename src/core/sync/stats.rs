/*!
 * Mutex Statistics
 *
 * Relaxed counters describing how contended acquisitions were resolved.
 * Only the slow path and the wake dispatch touch them, so the uncontended
 * lock/unlock pair stays at one atomic operation each.
 */

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters owned by one mutex
#[derive(Debug, Default)]
pub struct MutexStats {
    slow_acquires: AtomicU64,
    spin_privilege_wins: AtomicU64,
    spin_iterations: AtomicU64,
    parks: AtomicU64,
    park_mismatches: AtomicU64,
    wakes_issued: AtomicU64,
    threads_woken: AtomicU64,
    wakes_skipped: AtomicU64,
    timeouts: AtomicU64,
}

/// Point-in-time copy of [`MutexStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Acquisitions that missed the speculative grab
    pub slow_acquires: u64,
    /// Times a contender won the spin privilege
    pub spin_privilege_wins: u64,
    /// Reloads performed by spin-privilege holders
    pub spin_iterations: u64,
    /// Calls into the park service that actually blocked or timed out
    pub parks: u64,
    /// Park calls rejected because the word had changed
    pub park_mismatches: u64,
    /// Wake calls issued by unlock
    pub wakes_issued: u64,
    /// Threads those wake calls removed from the sleep set
    pub threads_woken: u64,
    /// Unlocks that found a sleeper flag but left the release to a spinner
    pub wakes_skipped: u64,
    /// Timed acquisitions that gave up
    pub timeouts: u64,
}

impl MutexStats {
    pub const fn new() -> Self {
        Self {
            slow_acquires: AtomicU64::new(0),
            spin_privilege_wins: AtomicU64::new(0),
            spin_iterations: AtomicU64::new(0),
            parks: AtomicU64::new(0),
            park_mismatches: AtomicU64::new(0),
            wakes_issued: AtomicU64::new(0),
            threads_woken: AtomicU64::new(0),
            wakes_skipped: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn record_slow_acquire(&self) {
        self.slow_acquires.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_spin_privilege(&self) {
        self.spin_privilege_wins.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_spins(&self, iterations: u32) {
        if iterations > 0 {
            self.spin_iterations
                .fetch_add(u64::from(iterations), Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_park(&self) {
        self.parks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_park_mismatch(&self) {
        self.park_mismatches.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_wake(&self, woken: usize) {
        self.wakes_issued.fetch_add(1, Ordering::Relaxed);
        self.threads_woken
            .fetch_add(woken as u64, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_wake_skipped(&self) {
        self.wakes_skipped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            slow_acquires: self.slow_acquires.load(Ordering::Relaxed),
            spin_privilege_wins: self.spin_privilege_wins.load(Ordering::Relaxed),
            spin_iterations: self.spin_iterations.load(Ordering::Relaxed),
            parks: self.parks.load(Ordering::Relaxed),
            park_mismatches: self.park_mismatches.load(Ordering::Relaxed),
            wakes_issued: self.wakes_issued.load(Ordering::Relaxed),
            threads_woken: self.threads_woken.load(Ordering::Relaxed),
            wakes_skipped: self.wakes_skipped.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_records() {
        let stats = MutexStats::new();
        stats.record_slow_acquire();
        stats.record_spins(0);
        stats.record_spins(5);
        stats.record_wake(1);
        stats.record_wake(0);

        let snap = stats.snapshot();
        assert_eq!(snap.slow_acquires, 1);
        assert_eq!(snap.spin_iterations, 5);
        assert_eq!(snap.wakes_issued, 2);
        assert_eq!(snap.threads_woken, 1);
        assert_eq!(snap.parks, 0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let snap = StatsSnapshot {
            parks: 3,
            ..Default::default()
        };
        let json = serde_json::to_value(snap).unwrap();
        assert_eq!(json["parks"], 3);
        assert_eq!(json["wakes_skipped"], 0);
    }
}
