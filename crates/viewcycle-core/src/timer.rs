#![forbid(unsafe_code)]

//! Cancellable one-shot rerun timer.
//!
//! When a staged progress candidate is not yet displayable, the cycle arms
//! a timer for the remaining delay; on expiry the timer requests another
//! host invocation so the earlier too-early display query is re-evaluated.
//! Cancellation is condvar-notified so a parked timer wakes immediately
//! instead of sleeping out its deadline.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::trace;

type CancelPair = Arc<(Mutex<bool>, Condvar)>;

/// One-shot deadline on a background thread.
///
/// Dropping the timer cancels it without joining the thread.
pub(crate) struct RerunTimer {
    cancel: CancelPair,
    thread: Option<JoinHandle<()>>,
}

impl RerunTimer {
    /// Arm a timer that invokes `on_fire` after `delay` unless cancelled.
    pub(crate) fn arm(delay: Duration, on_fire: impl FnOnce() + Send + 'static) -> Self {
        let cancel: CancelPair = Arc::new((Mutex::new(false), Condvar::new()));
        let parked = cancel.clone();
        let thread = thread::spawn(move || {
            if !wait_cancelled(&parked, delay) {
                trace!(delay_ms = delay.as_millis() as u64, "rerun timer fired");
                on_fire();
            }
        });
        Self {
            cancel,
            thread: Some(thread),
        }
    }

    /// Cancel the timer. Idempotent; a timer that already fired is unaffected.
    pub(crate) fn cancel(&self) {
        let (lock, cvar) = &*self.cancel;
        let mut cancelled = lock.lock().unwrap();
        *cancelled = true;
        cvar.notify_all();
    }
}

impl Drop for RerunTimer {
    fn drop(&mut self) {
        self.cancel();
        // Don't join: dropping from a cycle operation must not block.
        drop(self.thread.take());
    }
}

/// Park until cancelled or until `delay` expires.
///
/// Returns `true` if cancelled. Loops on the condvar to absorb spurious
/// wakeups; the guard is fully released before the caller runs `on_fire`.
fn wait_cancelled(pair: &CancelPair, delay: Duration) -> bool {
    let (lock, cvar) = &**pair;
    let mut cancelled = lock.lock().unwrap();
    let start = Instant::now();
    loop {
        if *cancelled {
            return true;
        }
        let elapsed = start.elapsed();
        if elapsed >= delay {
            return false;
        }
        let (guard, _) = cvar.wait_timeout(cancelled, delay - elapsed).unwrap();
        cancelled = guard;
    }
}
