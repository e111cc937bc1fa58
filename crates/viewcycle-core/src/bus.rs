#![forbid(unsafe_code)]

//! Per-cycle event bus.
//!
//! Each render cycle owns one bus. Dispatch is synchronous and in
//! subscription order on the calling thread; there is no queue. `progress`
//! fires for every staged candidate, `complete` exactly once when the cycle
//! reaches a settled terminal state. A cancelled cycle never dispatches
//! again.
//!
//! The cycle dispatches with its internal lock released: listener lists are
//! taken out with [`EventBus::take`], invoked, and spliced back with
//! [`EventBus::restore`], so a listener may re-enter the cycle or subscribe
//! further listeners mid-dispatch without deadlocking.

use std::fmt;
use std::time::Duration;

use crate::props::BodyId;

/// Named events a cycle can emit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A progress candidate was staged.
    Progress,
    /// The cycle reached `Resolved` or `Rejected`.
    Complete,
}

/// Payload delivered to listeners.
#[derive(Clone, Debug)]
pub struct RenderEvent {
    /// Identity of the body the cycle is running.
    pub target: BodyId,
    /// Time since cycle creation.
    pub elapsed: Duration,
}

/// A registered listener.
pub type EventListener = Box<dyn FnMut(&RenderEvent) + Send>;

/// Ordered listener registry for one cycle.
#[derive(Default)]
pub struct EventBus {
    listeners: Vec<(EventKind, EventListener)>,
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for `kind`.
    pub fn subscribe(&mut self, kind: EventKind, listener: impl FnMut(&RenderEvent) + Send + 'static) {
        self.listeners.push((kind, Box::new(listener)));
    }

    /// Number of listeners registered for `kind`.
    #[must_use]
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.iter().filter(|(k, _)| *k == kind).count()
    }

    /// Dispatch `event` to every listener of `kind`, in subscription order.
    pub fn emit(&mut self, kind: EventKind, event: &RenderEvent) {
        for (k, listener) in &mut self.listeners {
            if *k == kind {
                listener(event);
            }
        }
    }

    /// Remove all listeners for out-of-lock dispatch.
    pub(crate) fn take(&mut self) -> Vec<(EventKind, EventListener)> {
        std::mem::take(&mut self.listeners)
    }

    /// Splice back listeners removed by [`EventBus::take`].
    ///
    /// Listeners subscribed while dispatch was running were appended to the
    /// emptied list; they are kept, after the restored ones, preserving
    /// overall subscription order.
    pub(crate) fn restore(&mut self, taken: Vec<(EventKind, EventListener)>) {
        let appended = std::mem::replace(&mut self.listeners, taken);
        self.listeners.extend(appended);
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("progress", &self.listener_count(EventKind::Progress))
            .field("complete", &self.listener_count(EventKind::Complete))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn event(ms: u64) -> RenderEvent {
        RenderEvent {
            target: BodyId::new("test"),
            elapsed: Duration::from_millis(ms),
        }
    }

    #[test]
    fn dispatches_in_subscription_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();
        for tag in ["first", "second", "third"] {
            let seen = seen.clone();
            bus.subscribe(EventKind::Progress, move |_| {
                seen.lock().unwrap().push(tag);
            });
        }
        bus.emit(EventKind::Progress, &event(5));
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn kinds_are_independent() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();
        let s = seen.clone();
        bus.subscribe(EventKind::Progress, move |e| {
            s.lock().unwrap().push(("progress", e.elapsed));
        });
        let s = seen.clone();
        bus.subscribe(EventKind::Complete, move |e| {
            s.lock().unwrap().push(("complete", e.elapsed));
        });

        bus.emit(EventKind::Progress, &event(10));
        bus.emit(EventKind::Complete, &event(40));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ("progress", Duration::from_millis(10)),
                ("complete", Duration::from_millis(40)),
            ]
        );
    }

    #[test]
    fn restore_keeps_mid_dispatch_subscriptions() {
        let mut bus = EventBus::new();
        bus.subscribe(EventKind::Progress, |_| {});

        let mut taken = bus.take();
        assert_eq!(bus.listener_count(EventKind::Progress), 0);

        // A listener re-entering the cycle subscribes while dispatch runs.
        bus.subscribe(EventKind::Complete, |_| {});
        for (kind, listener) in &mut taken {
            if *kind == EventKind::Progress {
                listener(&event(1));
            }
        }
        bus.restore(taken);

        assert_eq!(bus.listener_count(EventKind::Progress), 1);
        assert_eq!(bus.listener_count(EventKind::Complete), 1);
    }
}
