//! Cooperative run control primitives.
//!
//! A sequence run is driven by a single worker; the embedding frontend
//! (CLI, GUI, remote console) only ever flips shared flags. Two
//! primitives cover every suspension point:
//!
//! - [`CancellationToken`]: a sticky abort request, polled by the
//!   player between actions and inside every wait loop.
//! - [`HoldGate`]: an operator acknowledgement latch used by hold
//!   actions ("touch the probe, then continue").
//!
//! Neither primitive preempts anything. A long instrument transaction
//! finishes before the abort is observed; only the waits themselves
//! (delays, stabilization polls, holds) wake early.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Granularity of interruptible sleeps. Small enough that an abort
/// lands within a UI frame, large enough to stay off the scheduler.
const WAKE_SLICE: Duration = Duration::from_millis(25);

/// Shared abort flag for a sequence run.
///
/// Clones share the same flag, so a frontend can keep one clone and
/// hand another to the worker. The flag is sticky until [`reset`]
/// is called at the start of the next run.
///
/// [`reset`]: CancellationToken::reset
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that the current run stop at the next suspension point.
    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clear a stale request before starting a new run.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// Sleep for `duration`, waking early on cancellation.
    ///
    /// Returns `true` if the sleep was cut short by a cancellation
    /// request, `false` if the full duration elapsed.
    pub fn sleep_interruptibly(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep((deadline - now).min(WAKE_SLICE));
        }
    }
}

/// Operator acknowledgement latch for hold actions.
///
/// The player arms the gate before parking on it; the frontend calls
/// [`acknowledge`] when the operator confirms. Waiting also watches a
/// [`CancellationToken`] so an abort releases a parked run.
///
/// [`acknowledge`]: HoldGate::acknowledge
#[derive(Debug, Clone, Default)]
pub struct HoldGate {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl HoldGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Release a run parked on [`wait`]. Safe to call when nothing is
    /// waiting; the acknowledgement is consumed by the next `arm`.
    ///
    /// [`wait`]: HoldGate::wait
    pub fn acknowledge(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    /// Discard any pending acknowledgement so the next [`wait`] blocks.
    ///
    /// [`wait`]: HoldGate::wait
    pub fn arm(&self) {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }

    /// Park until acknowledged or cancelled.
    ///
    /// Returns `true` when the operator acknowledged, `false` when the
    /// wait ended because `cancel` fired. Checks the token before
    /// blocking, so a pre-cancelled run never parks.
    pub fn wait(&self, cancel: &CancellationToken) -> bool {
        let (lock, cvar) = &*self.inner;
        let mut acknowledged = lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            if *acknowledged {
                return true;
            }
            // Timed wait keeps the cancellation flag observable even if
            // no acknowledgement ever arrives.
            let (guard, _) = cvar
                .wait_timeout(acknowledged, WAKE_SLICE)
                .unwrap_or_else(PoisonError::into_inner);
            acknowledged = guard;
        }
    }
}
