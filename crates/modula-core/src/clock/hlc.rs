//! Hybrid logical clock
//!
//! One `HybridClock` is constructed at process start and shared (behind an
//! `Arc`) by every recorder and repository. All state sits behind a single
//! mutex, so concurrent callers observe one strictly increasing sequence.

use super::timestamp::{MAX_PHYSICAL, Timestamp};
use crate::config::ClockConfig;
use chrono::Utc;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::warn;

/// Sleep between retries while the logical counter is exhausted
const OVERFLOW_BACKOFF: Duration = Duration::from_millis(1);

/// Source of wall-clock time in milliseconds since the Unix epoch
pub trait WallClock: Send + Sync + fmt::Debug {
    fn now_ms(&self) -> u64;
}

/// Wall clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemWallClock;

impl WallClock for SystemWallClock {
    fn now_ms(&self) -> u64 {
        Utc::now().timestamp_millis().max(0) as u64
    }
}

#[derive(Debug, Default)]
struct ClockState {
    physical: u64,
    logical: u16,
}

impl ClockState {
    fn current(&self) -> Timestamp {
        Timestamp::from_parts(self.physical, self.logical)
    }

    /// Move past an exhausted counter at `physical` without waiting, which is
    /// only possible while `physical` is already ahead of wall time.
    fn carry(&mut self, physical: u64, wall: u64) -> Option<Timestamp> {
        if physical <= wall || physical >= MAX_PHYSICAL {
            return None;
        }
        self.physical = physical + 1;
        self.logical = 0;
        Some(self.current())
    }
}

/// Process-wide causal clock
#[derive(Debug)]
pub struct HybridClock {
    state: Mutex<ClockState>,
    source: Arc<dyn WallClock>,
    max_drift_ms: u64,
}

impl Default for HybridClock {
    fn default() -> Self {
        Self::new()
    }
}

impl HybridClock {
    /// Create a clock reading the system time
    pub fn new() -> Self {
        Self::with_source(Arc::new(SystemWallClock))
    }

    /// Create a clock reading an injected wall-clock source
    pub fn with_source(source: Arc<dyn WallClock>) -> Self {
        Self {
            state: Mutex::new(ClockState::default()),
            source,
            max_drift_ms: ClockConfig::default().max_drift_ms,
        }
    }

    pub fn from_config(config: &ClockConfig) -> Self {
        Self::new().with_max_drift(config.max_drift_ms)
    }

    /// Set how far ahead of local wall time a received timestamp may be
    /// before it is reported
    pub fn with_max_drift(mut self, max_drift_ms: u64) -> Self {
        self.max_drift_ms = max_drift_ms;
        self
    }

    /// Issue a timestamp strictly greater than every one issued before.
    ///
    /// When the logical counter is exhausted and the clock is already ahead
    /// of wall time, the physical part is carried forward by one millisecond.
    /// Otherwise this blocks until the wall clock moves on.
    pub fn now(&self) -> Timestamp {
        loop {
            let wall = self.wall_ms();
            {
                let mut state = self.lock();
                if wall > state.physical {
                    state.physical = wall;
                    state.logical = 0;
                    return state.current();
                }
                if let Some(next) = state.logical.checked_add(1) {
                    state.logical = next;
                    return state.current();
                }
                let physical = state.physical;
                if let Some(carried) = state.carry(physical, wall) {
                    return carried;
                }
                warn!(physical = state.physical, "Logical counter exhausted, waiting for wall clock");
            }
            std::thread::sleep(OVERFLOW_BACKOFF);
        }
    }

    /// Merge a timestamp observed from another node into local state and
    /// return a timestamp after both.
    pub fn update(&self, received: Timestamp) -> Timestamp {
        loop {
            let wall = self.wall_ms();
            let remote_physical = received.physical();
            if remote_physical > wall.saturating_add(self.max_drift_ms) {
                warn!(
                    remote_physical,
                    wall,
                    max_drift_ms = self.max_drift_ms,
                    "Received timestamp is ahead of local wall clock"
                );
            }

            {
                let mut state = self.lock();
                let physical = state.physical.max(remote_physical).max(wall);

                let logical = if physical == state.physical && physical == remote_physical {
                    state.logical.max(received.logical()).checked_add(1)
                } else if physical == state.physical {
                    state.logical.checked_add(1)
                } else if physical == remote_physical {
                    received.logical().checked_add(1)
                } else {
                    Some(0)
                };

                if let Some(logical) = logical {
                    state.physical = physical;
                    state.logical = logical;
                    return state.current();
                }
                if let Some(carried) = state.carry(physical, wall) {
                    return carried;
                }
                warn!(physical, "Logical counter exhausted during merge, waiting for wall clock");
            }
            std::thread::sleep(OVERFLOW_BACKOFF);
        }
    }

    /// Last issued timestamp, without advancing the clock
    pub fn last(&self) -> Timestamp {
        self.lock().current()
    }

    fn wall_ms(&self) -> u64 {
        self.source.now_ms().min(MAX_PHYSICAL)
    }

    fn lock(&self) -> MutexGuard<'_, ClockState> {
        // The state is two integers updated together; a panic elsewhere
        // cannot leave it half-written.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::thread;

    #[derive(Debug)]
    struct ManualClock(AtomicU64);

    impl ManualClock {
        fn new(ms: u64) -> Arc<Self> {
            Arc::new(Self(AtomicU64::new(ms)))
        }

        fn set(&self, ms: u64) {
            self.0.store(ms, Ordering::SeqCst);
        }
    }

    impl WallClock for ManualClock {
        fn now_ms(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_now_is_strictly_increasing() {
        let clock = HybridClock::new();
        let mut previous = clock.now();
        for _ in 0..10_000 {
            let next = clock.now();
            assert!(next.after(&previous));
            assert!(previous.before(&next));
            previous = next;
        }
    }

    #[test]
    fn test_frozen_wall_clock_advances_logical_counter() {
        let wall = ManualClock::new(5_000);
        let clock = HybridClock::with_source(wall.clone());

        let a = clock.now();
        let b = clock.now();
        assert_eq!(a.physical(), 5_000);
        assert_eq!(a.logical(), 0);
        assert_eq!(b.physical(), 5_000);
        assert_eq!(b.logical(), 1);

        wall.set(5_001);
        let c = clock.now();
        assert_eq!(c.physical(), 5_001);
        assert_eq!(c.logical(), 0);
    }

    #[test]
    fn test_wall_clock_going_backwards_keeps_order() {
        let wall = ManualClock::new(9_000);
        let clock = HybridClock::with_source(wall.clone());
        let a = clock.now();

        wall.set(8_000);
        let b = clock.now();
        assert!(b.after(&a));
        assert_eq!(b.physical(), 9_000);
    }

    #[test]
    fn test_counter_overflow_blocks_until_wall_clock_advances() {
        let wall = ManualClock::new(1_000);
        let clock = Arc::new(HybridClock::with_source(wall.clone()));
        let first = clock.now();
        {
            let mut state = clock.lock();
            state.logical = u16::MAX;
        }
        let exhausted = clock.last();

        let advancer = {
            let wall = wall.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                wall.set(1_001);
            })
        };

        let next = clock.now();
        advancer.join().unwrap();

        assert!(next.after(&exhausted));
        assert!(next.after(&first));
        assert_eq!(next.physical(), 1_001);
        assert_eq!(next.logical(), 0);
    }

    fn within_two_seconds<F>(f: F) -> Timestamp
    where
        F: FnOnce() -> Timestamp + Send + 'static,
    {
        let (tx, rx) = std::sync::mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(f());
        });
        rx.recv_timeout(Duration::from_secs(2))
            .expect("clock blocked waiting for wall time")
    }

    #[test]
    fn test_update_far_ahead_with_exhausted_counter_does_not_block() {
        let wall = ManualClock::new(1_000);
        let clock = Arc::new(HybridClock::with_source(wall));
        let remote = Timestamp::from_parts(1_000 + 3_600_000, u16::MAX);

        let merged = {
            let clock = Arc::clone(&clock);
            within_two_seconds(move || clock.update(remote))
        };
        assert!(merged.after(&remote));
        assert_eq!(merged.physical(), 3_601_001);
        assert_eq!(merged.logical(), 0);

        let next = {
            let clock = Arc::clone(&clock);
            within_two_seconds(move || clock.now())
        };
        assert!(next.after(&merged));
        assert_eq!(next.physical(), 3_601_001);
        assert_eq!(next.logical(), 1);
    }

    #[test]
    fn test_now_ahead_of_wall_with_exhausted_counter_carries() {
        let wall = ManualClock::new(1_000);
        let clock = Arc::new(HybridClock::with_source(wall));
        {
            let mut state = clock.lock();
            state.physical = 5_000;
            state.logical = u16::MAX;
        }
        let exhausted = clock.last();

        let next = {
            let clock = Arc::clone(&clock);
            within_two_seconds(move || clock.now())
        };
        assert!(next.after(&exhausted));
        assert_eq!(next.physical(), 5_001);
        assert_eq!(next.logical(), 0);
    }

    #[test]
    fn test_update_is_after_received_and_local() {
        let clock = HybridClock::new();
        let local = clock.now();
        let remote = Timestamp::from_parts(local.physical() + 10_000, 9);

        let merged = clock.update(remote);
        assert!(merged.after(&remote));
        assert!(merged.after(&local));
        assert_eq!(merged.physical(), remote.physical());
        assert_eq!(merged.logical(), 10);

        let next = clock.now();
        assert!(next.after(&merged));
    }

    #[test]
    fn test_update_with_stale_timestamp_still_advances() {
        let wall = ManualClock::new(50_000);
        let clock = HybridClock::with_source(wall);
        let local = clock.now();

        let merged = clock.update(Timestamp::from_parts(10, 0));
        assert!(merged.after(&local));
        assert_eq!(merged.physical(), 50_000);
        assert_eq!(merged.logical(), 1);
    }

    #[test]
    fn test_update_takes_max_logical_on_tie() {
        let wall = ManualClock::new(7_000);
        let clock = HybridClock::with_source(wall);
        clock.now();
        clock.now();

        let merged = clock.update(Timestamp::from_parts(7_000, 40));
        assert_eq!(merged.physical(), 7_000);
        assert_eq!(merged.logical(), 41);
    }

    #[test]
    fn test_concurrent_callers_get_distinct_values() {
        let clock = Arc::new(HybridClock::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let clock = Arc::clone(&clock);
                thread::spawn(move || {
                    let mut seen = Vec::with_capacity(2_000);
                    for _ in 0..2_000 {
                        seen.push(clock.now());
                    }
                    seen
                })
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            let seen = handle.join().unwrap();
            assert!(seen.windows(2).all(|w| w[0].before(&w[1])));
            for ts in seen {
                assert!(all.insert(ts), "duplicate timestamp {}", ts);
            }
        }
        assert_eq!(all.len(), 16_000);
    }
}
