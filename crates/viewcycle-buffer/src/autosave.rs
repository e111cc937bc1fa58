#![forbid(unsafe_code)]

//! Debounced persistence for edit buffers.
//!
//! [`Autosave`] owns a worker thread parked on a condvar. Each
//! [`Autosave::schedule`] replaces the pending value and pushes the save
//! deadline out by the configured delay (latest value wins); the worker
//! saves once the deadline passes. [`Autosave::flush`] saves synchronously,
//! and dropping the handle flushes any pending value before the worker
//! exits — teardown never loses an edit.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, trace};

struct AutosaveState {
    pending: Option<Value>,
    deadline: Option<Instant>,
    shutdown: bool,
    saves: u64,
}

struct AutosaveShared {
    state: Mutex<AutosaveState>,
    cvar: Condvar,
}

/// Debounced save scheduler with flush-on-drop.
pub struct Autosave {
    shared: Arc<AutosaveShared>,
    delay: Duration,
    worker: Option<JoinHandle<()>>,
}

impl Autosave {
    /// Start an autosave worker that calls `save` with each value due for
    /// persistence.
    #[must_use]
    pub fn new(delay: Duration, mut save: impl FnMut(Value) + Send + 'static) -> Self {
        let shared = Arc::new(AutosaveShared {
            state: Mutex::new(AutosaveState {
                pending: None,
                deadline: None,
                shutdown: false,
                saves: 0,
            }),
            cvar: Condvar::new(),
        });
        let worker_shared = shared.clone();
        let worker = thread::spawn(move || {
            let mut state = worker_shared.state.lock().unwrap();
            loop {
                let now = Instant::now();
                let due = match state.deadline {
                    Some(deadline) => now >= deadline,
                    None => false,
                };
                if due {
                    let value = state.pending.take();
                    state.deadline = None;
                    if let Some(value) = value {
                        drop(state);
                        trace!("autosave writing pending value");
                        save(value);
                        state = worker_shared.state.lock().unwrap();
                        state.saves += 1;
                        worker_shared.cvar.notify_all();
                    }
                    continue;
                }
                if state.shutdown && state.pending.is_none() {
                    return;
                }
                state = match state.deadline {
                    Some(deadline) => {
                        let wait = deadline.saturating_duration_since(now);
                        worker_shared.cvar.wait_timeout(state, wait).unwrap().0
                    }
                    None => worker_shared.cvar.wait(state).unwrap(),
                };
            }
        });
        Self {
            shared,
            delay,
            worker: Some(worker),
        }
    }

    /// Schedule `value` for persistence after the debounce delay,
    /// replacing any not-yet-saved value.
    pub fn schedule(&self, value: Value) {
        let mut state = self.shared.state.lock().unwrap();
        if state.shutdown {
            return;
        }
        state.pending = Some(value);
        state.deadline = Some(Instant::now() + self.delay);
        self.shared.cvar.notify_all();
    }

    /// Whether a value is awaiting persistence.
    #[must_use]
    pub fn pending(&self) -> bool {
        self.shared.state.lock().unwrap().pending.is_some()
    }

    /// Persist any pending value now, blocking until the save completes.
    pub fn flush(&self) {
        let mut state = self.shared.state.lock().unwrap();
        if state.pending.is_none() {
            return;
        }
        let target = state.saves + 1;
        state.deadline = Some(Instant::now());
        self.shared.cvar.notify_all();
        while state.saves < target {
            state = self.shared.cvar.wait(state).unwrap();
        }
    }
}

impl Drop for Autosave {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.shutdown = true;
            if state.pending.is_some() {
                debug!("autosave flushing on teardown");
                state.deadline = Some(Instant::now());
            }
            self.shared.cvar.notify_all();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl std::fmt::Debug for Autosave {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Autosave")
            .field("delay", &self.delay)
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sink() -> (Arc<Mutex<Vec<Value>>>, impl FnMut(Value) + Send + 'static) {
        let saves = Arc::new(Mutex::new(Vec::new()));
        let writer = saves.clone();
        (saves, move |value| writer.lock().unwrap().push(value))
    }

    #[test]
    fn debounce_keeps_only_the_latest_value() {
        let (saves, save) = sink();
        let autosave = Autosave::new(Duration::from_millis(40), save);
        autosave.schedule(json!({"rev": 1}));
        autosave.schedule(json!({"rev": 2}));
        autosave.schedule(json!({"rev": 3}));
        thread::sleep(Duration::from_millis(150));
        assert_eq!(*saves.lock().unwrap(), vec![json!({"rev": 3})]);
        assert!(!autosave.pending());
    }

    #[test]
    fn each_schedule_pushes_the_deadline_out() {
        let (saves, save) = sink();
        let autosave = Autosave::new(Duration::from_millis(100), save);
        autosave.schedule(json!({"rev": 1}));
        thread::sleep(Duration::from_millis(40));
        autosave.schedule(json!({"rev": 2}));
        thread::sleep(Duration::from_millis(40));
        // Still inside the (restarted) debounce window.
        assert!(saves.lock().unwrap().is_empty());
        thread::sleep(Duration::from_millis(160));
        assert_eq!(*saves.lock().unwrap(), vec![json!({"rev": 2})]);
    }

    #[test]
    fn flush_saves_synchronously() {
        let (saves, save) = sink();
        let autosave = Autosave::new(Duration::from_secs(3600), save);
        autosave.schedule(json!({"rev": 1}));
        autosave.flush();
        assert_eq!(*saves.lock().unwrap(), vec![json!({"rev": 1})]);
        // Nothing pending: flush is a no-op.
        autosave.flush();
        assert_eq!(saves.lock().unwrap().len(), 1);
    }

    #[test]
    fn drop_flushes_pending_value() {
        let (saves, save) = sink();
        {
            let autosave = Autosave::new(Duration::from_secs(3600), save);
            autosave.schedule(json!({"rev": 7}));
        }
        assert_eq!(*saves.lock().unwrap(), vec![json!({"rev": 7})]);
    }

    #[test]
    fn schedule_after_drop_is_impossible_but_shutdown_is_clean() {
        let (saves, save) = sink();
        let autosave = Autosave::new(Duration::from_millis(10), save);
        drop(autosave);
        assert!(saves.lock().unwrap().is_empty());
    }
}
