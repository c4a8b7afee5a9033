//! Shared per-process state for sync cycles
//!
//! A single [`SyncContext`] is created per process and injected into the
//! [`SyncEngine`](crate::sync::SyncEngine). It owns the two pieces of mutable
//! shared state: the repository classification cache and the cycle state
//! (the single-flight flag plus the active cancellation handle).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::discovery::RepoClassifier;

/// Cooperative cancellation flag shared between a cycle and its tasks
///
/// Cancelling never interrupts a running git process; checkpoints observe the
/// flag and stop advancing.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Single-flight state: whether a cycle is running and its cancel handle
#[derive(Debug, Default)]
pub struct CycleState {
    in_progress: AtomicBool,
    active: Mutex<Option<CancelToken>>,
}

impl CycleState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim the single-flight flag
    ///
    /// Returns `None` when another cycle already holds it. The returned guard
    /// releases the flag and discards the cancel handle when dropped.
    pub fn try_begin(&self) -> Option<CycleGuard<'_>> {
        // Flag and token change together under the slot lock, so a cancel
        // that sees the flag set always finds the token
        let mut active = self.lock_active();

        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }

        let token = CancelToken::new();
        *active = Some(token.clone());

        Some(CycleGuard { state: self, token })
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Cancel the running cycle, if any
    ///
    /// Returns `true` when a running cycle was signalled.
    pub fn cancel(&self) -> bool {
        let active = self.lock_active();

        match active.as_ref() {
            Some(token) if self.is_in_progress() => {
                token.cancel();
                true
            }
            _ => false,
        }
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<CancelToken>> {
        // The slot only ever holds a token, a poisoned lock leaves it usable
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Ownership of the running cycle; dropping it ends the cycle
#[derive(Debug)]
pub struct CycleGuard<'a> {
    state: &'a CycleState,
    token: CancelToken,
}

impl CycleGuard<'_> {
    /// Cancel handle for this cycle
    pub fn token(&self) -> &CancelToken {
        &self.token
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        let mut active = self.state.lock_active();
        active.take();
        self.state.in_progress.store(false, Ordering::SeqCst);
        drop(active);
        debug!("Sync cycle state released");
    }
}

/// Process-wide context handed to every component of a cycle
#[derive(Debug, Default)]
pub struct SyncContext {
    pub classifier: RepoClassifier,
    pub cycle: CycleState,
}

impl SyncContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Cancel command: signal the running cycle, no-op when idle
    pub fn cancel(&self) -> bool {
        self.cycle.cancel()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_flight_claim() {
        let state = CycleState::new();

        let guard = state.try_begin().expect("first claim succeeds");
        assert!(state.is_in_progress());
        assert!(state.try_begin().is_none());

        drop(guard);
        assert!(!state.is_in_progress());
        assert!(state.try_begin().is_some());
    }

    #[test]
    fn test_cancel_when_idle_is_noop() {
        let state = CycleState::new();
        assert!(!state.cancel());
    }

    #[test]
    fn test_cancel_reaches_active_token() {
        let state = CycleState::new();
        let guard = state.try_begin().unwrap();
        let token = guard.token().clone();

        assert!(!token.is_cancelled());
        assert!(state.cancel());
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancel_is_not_lost_right_after_claim() {
        for _ in 0..200 {
            let state = CycleState::new();
            let (release, released) = std::sync::mpsc::channel::<()>();

            std::thread::scope(|scope| {
                let state = &state;
                scope.spawn(move || {
                    let guard = state.try_begin().unwrap();
                    released.recv().unwrap();
                    assert!(guard.token().is_cancelled());
                });

                while !state.is_in_progress() {
                    std::hint::spin_loop();
                }
                assert!(state.cancel());
                release.send(()).unwrap();
            });
        }
    }

    #[test]
    fn test_each_cycle_gets_fresh_token() {
        let state = CycleState::new();

        let first = state.try_begin().unwrap();
        let first_token = first.token().clone();
        state.cancel();
        drop(first);

        let second = state.try_begin().unwrap();
        assert!(first_token.is_cancelled());
        assert!(!second.token().is_cancelled());
    }

    #[test]
    fn test_guard_released_on_panic() {
        let state = CycleState::new();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = state.try_begin().unwrap();
            panic!("cycle blew up");
        }));

        assert!(result.is_err());
        assert!(!state.is_in_progress());
    }
}
