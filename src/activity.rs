//! Shared connection activity counters.
//!
//! Tracks how many connection handlers are live and when the most recent
//! one started. All updates are lock-free; the count never goes below zero.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tracing::error;

/// Process-wide activity state shared by the listener, every connection
/// handler and the activity monitor.
#[derive(Debug)]
pub struct ActivityState {
    active: AtomicUsize,
    /// Reference point for `last_connect_nanos`.
    epoch: Instant,
    /// Nanoseconds since `epoch` of the latest connection start.
    last_connect_nanos: AtomicU64,
}

/// Point-in-time view of [`ActivityState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivitySnapshot {
    pub active: usize,
    pub last_connect: Instant,
}

impl ActivitySnapshot {
    /// Time since the last connection started (or since startup).
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_connect)
    }
}

impl Default for ActivityState {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityState {
    /// Create state with no connections; the startup time counts as the
    /// last connection time.
    pub fn new() -> Self {
        ActivityState {
            active: AtomicUsize::new(0),
            epoch: Instant::now(),
            last_connect_nanos: AtomicU64::new(0),
        }
    }

    /// Record a connection start. The returned guard records its end when
    /// dropped.
    pub fn connection_started(self: &Arc<Self>) -> ActivityGuard {
        let since_epoch = Instant::now().saturating_duration_since(self.epoch);
        let nanos = u64::try_from(since_epoch.as_nanos()).unwrap_or(u64::MAX);
        self.last_connect_nanos.fetch_max(nanos, Ordering::SeqCst);
        self.active.fetch_add(1, Ordering::SeqCst);
        ActivityGuard {
            state: Arc::clone(self),
        }
    }

    /// Record a connection end. Returns `false`, and leaves the count at
    /// zero, if there was no live connection to end.
    fn connection_finished(&self) -> bool {
        let mut current = self.active.load(Ordering::SeqCst);
        loop {
            if current == 0 {
                error!("Attempted to decrement connection count below zero");
                return false;
            }
            match self.active.compare_exchange_weak(
                current,
                current - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> ActivitySnapshot {
        let active = self.active.load(Ordering::SeqCst);
        let nanos = self.last_connect_nanos.load(Ordering::SeqCst);
        ActivitySnapshot {
            active,
            last_connect: self.epoch + Duration::from_nanos(nanos),
        }
    }
}

/// Marks one live connection; decrements the count on drop.
#[derive(Debug)]
pub struct ActivityGuard {
    state: Arc<ActivityState>,
}

impl ActivityGuard {
    pub fn state(&self) -> &ActivityState {
        &self.state
    }
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.state.connection_finished();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_counts() {
        let state = Arc::new(ActivityState::new());
        let a = state.connection_started();
        let b = state.connection_started();
        assert_eq!(state.active(), 2);
        drop(a);
        assert_eq!(state.active(), 1);
        drop(b);
        assert_eq!(state.active(), 0);
    }

    #[test]
    fn test_decrement_floors_at_zero() {
        let state = ActivityState::new();
        assert!(!state.connection_finished());
        assert_eq!(state.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_connect_tracks_latest_start() {
        let state = Arc::new(ActivityState::new());
        let start = state.snapshot().last_connect;

        tokio::time::advance(Duration::from_millis(1500)).await;
        let _guard = state.connection_started();

        let snapshot = state.snapshot();
        assert_eq!(snapshot.active, 1);
        assert_eq!(snapshot.last_connect - start, Duration::from_millis(1500));
        assert_eq!(snapshot.idle_for(Instant::now()), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sub_millisecond_start_is_not_rounded_down() {
        let state = Arc::new(ActivityState::new());
        let start = state.snapshot().last_connect;

        tokio::time::advance(Duration::from_micros(1900)).await;
        drop(state.connection_started());
        tokio::time::advance(Duration::from_micros(9500)).await;

        let snapshot = state.snapshot();
        assert_eq!(snapshot.last_connect - start, Duration::from_micros(1900));
        assert_eq!(snapshot.idle_for(Instant::now()), Duration::from_micros(9500));
        assert!(snapshot.idle_for(Instant::now()) < Duration::from_millis(10));
    }

    #[test]
    fn test_concurrent_starts_and_finishes_return_to_zero() {
        let state = Arc::new(ActivityState::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let state = Arc::clone(&state);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let guard = state.connection_started();
                        assert!(guard.state().active() >= 1);
                        drop(guard);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(state.active(), 0);
    }
}
