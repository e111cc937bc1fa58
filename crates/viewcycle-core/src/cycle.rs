#![forbid(unsafe_code)]

//! The render cycle state machine.
//!
//! A [`RenderCycle`] is one asynchronous rendering attempt bound to one view
//! instance. The host runs the caller-supplied body synchronously up to its
//! first suspension point, then reads back the best currently displayable
//! output; settlement of the pending work and progress-delay timers later
//! mutate the cycle and request another host invocation through the slot's
//! rerun trigger.
//!
//! States: `Initial`/`Rerendering → Running → Suspended → Resolved/Rejected`,
//! with `Cancelled` reachable from any non-terminal state. Transitions are
//! monotonic; `Resolved`, `Rejected`, and `Cancelled` are terminal.
//!
//! # Invariants
//!
//! - Final output and deferred error are write-once and mutually exclusive.
//! - A cancelled cycle never mutates state, fires events, or triggers reruns
//!   again; late settlements and timer firings are discarded.
//! - `progress` events fire in staging order; `complete` fires exactly once,
//!   after every `progress` event, before the cycle can be replaced.
//! - No user code (bodies, listeners, triggers) runs under the cycle lock.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::bus::{EventBus, EventKind, RenderEvent};
use crate::error::{BodyError, CycleError};
use crate::props::{BodyId, Props};
use crate::scheduler::{DelayPolicy, ProgressDecision, ProgressScheduler};
use crate::timer::RerunTimer;

/// Capability to request another synchronous invocation of the instance.
pub type RerunTrigger = Arc<dyn Fn() + Send + Sync>;

/// Lifecycle state of a cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleState {
    /// First-ever cycle for the slot; body not yet started.
    Initial,
    /// Replacement cycle after a changed render generation.
    Rerendering,
    /// Body executing before its first suspension point.
    Running,
    /// Body yielded a pending result that has not settled.
    Suspended,
    /// Settled successfully. Terminal.
    Resolved,
    /// Settled with a captured failure. Terminal.
    Rejected,
    /// Superseded or unmounted before settling. Terminal.
    Cancelled,
}

impl CycleState {
    /// Whether the state is terminal.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CycleState::Resolved | CycleState::Rejected | CycleState::Cancelled
        )
    }
}

/// Per-invocation options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CycleOptions {
    /// Disable progress display entirely (the settle-to-final path).
    /// Staged candidates are still recorded as the empty-resolution
    /// fallback, but `current_output` never selects them.
    pub suppress_progress: bool,
    /// Disable the required-progress check on suspension.
    pub skip_progress_check: bool,
    /// Override the registry's default delay policy for this cycle.
    pub delays: Option<DelayPolicy>,
}

impl CycleOptions {
    /// Options with progress display suppressed.
    #[must_use]
    pub fn without_progress(mut self) -> Self {
        self.suppress_progress = true;
        self
    }

    /// Options with the required-progress check disabled.
    #[must_use]
    pub fn without_progress_check(mut self) -> Self {
        self.skip_progress_check = true;
        self
    }

    /// Options with an explicit delay policy.
    #[must_use]
    pub fn with_delays(mut self, delays: DelayPolicy) -> Self {
        self.delays = Some(delays);
        self
    }
}

/// What the body's synchronous execution produced.
pub enum RunOutcome<T> {
    /// The body finished without suspending. `None` means "retain the last
    /// staged progress candidate as the final output".
    Completed(Option<T>),
    /// The body has pending work; a [`Settlement`] will finish the cycle.
    Suspended,
}

struct ProgressEntry<T> {
    value: T,
    label: Option<String>,
    at: Instant,
}

struct CycleInner<T> {
    state: CycleState,
    final_output: Option<T>,
    /// Prior generation's final output, shown during a rerender until the
    /// new output (or an eligible placeholder) replaces it.
    interim: Option<T>,
    progress: Vec<ProgressEntry<T>>,
    deferred_error: Option<Arc<CycleError>>,
    scheduler: ProgressScheduler,
    bus: EventBus,
    mounted: bool,
    timer: Option<RerunTimer>,
}

struct CycleShared<T> {
    identity: BodyId,
    props: Props,
    prev_props: Option<Props>,
    options: CycleOptions,
    started_at: Instant,
    trigger: RerunTrigger,
    inner: Mutex<CycleInner<T>>,
}

/// Handle to one asynchronous rendering attempt.
///
/// Cloneable; all clones observe the same state. The handle given to the
/// body is the same one the host reads output from.
pub struct RenderCycle<T> {
    shared: Arc<CycleShared<T>>,
}

impl<T> Clone for RenderCycle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for RenderCycle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderCycle")
            .field("identity", &self.shared.identity)
            .field("state", &self.state())
            .finish()
    }
}

/// Deferred actions collected under the lock, performed after release.
enum Post {
    Nothing,
    Trigger,
    ArmTimer(Duration),
}

impl<T> RenderCycle<T> {
    fn lock(&self) -> MutexGuard<'_, CycleInner<T>> {
        self.shared.inner.lock().unwrap()
    }

    /// Identity of the async body this cycle runs.
    #[must_use]
    pub fn identity(&self) -> &BodyId {
        &self.shared.identity
    }

    /// Props snapshot for this attempt.
    #[must_use]
    pub fn props(&self) -> &Props {
        &self.shared.props
    }

    /// Props of the last completed cycle for the same instance, if any.
    #[must_use]
    pub fn prev_props(&self) -> Option<&Props> {
        self.shared.prev_props.as_ref()
    }

    /// When this cycle was created.
    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.shared.started_at
    }

    /// Time since cycle creation.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.shared.started_at.elapsed()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> CycleState {
        self.lock().state
    }

    /// Whether the cycle settled (`Resolved` or `Rejected`).
    ///
    /// Cancelled cycles have not "ended": they were abandoned, and the host
    /// teardown path distinguishes the two.
    #[must_use]
    pub fn has_ended(&self) -> bool {
        matches!(self.state(), CycleState::Resolved | CycleState::Rejected)
    }

    /// Cooperative cancellation check for body code.
    #[must_use]
    pub fn query_cancelled(&self) -> bool {
        self.state() == CycleState::Cancelled
    }

    /// Whether the owning instance confirmed its mount.
    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.lock().mounted
    }

    pub(crate) fn confirm_mounted(&self) {
        self.lock().mounted = true;
    }

    /// The captured failure, if any, for the host to re-raise.
    #[must_use]
    pub fn current_error(&self) -> Option<Arc<CycleError>> {
        self.lock().deferred_error.clone()
    }

    /// Number of staged progress candidates.
    #[must_use]
    pub fn progress_count(&self) -> usize {
        self.lock().progress.len()
    }

    /// Replace the delay policy. Ignored (returns `false`) once a progress
    /// candidate has been displayed this cycle.
    pub fn set_delays(&self, policy: DelayPolicy) -> bool {
        self.lock().scheduler.set_policy(policy)
    }

    /// Register a listener on this cycle's event bus.
    ///
    /// `Progress` fires for each staged candidate, `Complete` exactly once
    /// on settlement. Listeners subscribed after settlement never fire.
    pub fn subscribe(&self, kind: EventKind, listener: impl FnMut(&RenderEvent) + Send + 'static) {
        self.lock().bus.subscribe(kind, listener);
    }

    /// Idempotent cooperative cancellation.
    ///
    /// Clears any pending timer and suppresses all future event dispatch,
    /// state mutation, and rerun triggering from this cycle. A body that
    /// never polls [`RenderCycle::query_cancelled`] runs to completion, but
    /// its settlement is discarded.
    pub fn cancel(&self) {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            return;
        }
        if let Some(timer) = inner.timer.take() {
            timer.cancel();
        }
        debug!(identity = %self.shared.identity, from = ?inner.state, "cycle cancelled");
        inner.state = CycleState::Cancelled;
    }

    /// Pointer identity of the underlying cycle (same attempt, not equal
    /// state).
    #[must_use]
    pub fn same_cycle(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    fn elapsed_at(&self, now: Instant) -> Duration {
        now.checked_duration_since(self.shared.started_at)
            .unwrap_or_default()
    }

    /// Dispatch `kind` to listeners with the lock released, then optionally
    /// fire the rerun trigger. Listener order is preserved and listeners
    /// subscribed mid-dispatch are kept for future events.
    fn dispatch(&self, kind: EventKind, event: RenderEvent, trigger_rerun: bool) {
        let mut taken = {
            let mut inner = self.lock();
            inner.bus.take()
        };
        for (k, listener) in &mut taken {
            if *k == kind {
                listener(&event);
            }
        }
        {
            let mut inner = self.lock();
            inner.bus.restore(taken);
        }
        if trigger_rerun {
            (self.shared.trigger)();
        }
    }
}

impl<T: Clone + Send + 'static> RenderCycle<T> {
    pub(crate) fn new(
        identity: BodyId,
        props: Props,
        prev_props: Option<Props>,
        interim: Option<T>,
        state: CycleState,
        default_delays: DelayPolicy,
        options: CycleOptions,
        trigger: RerunTrigger,
        now: Instant,
    ) -> Self {
        debug_assert!(matches!(
            state,
            CycleState::Initial | CycleState::Rerendering
        ));
        let delays = options.delays.unwrap_or(default_delays);
        Self {
            shared: Arc::new(CycleShared {
                identity,
                props,
                prev_props,
                options,
                started_at: now,
                trigger,
                inner: Mutex::new(CycleInner {
                    state,
                    final_output: None,
                    interim,
                    progress: Vec::new(),
                    deferred_error: None,
                    scheduler: ProgressScheduler::new(delays),
                    bus: EventBus::new(),
                    mounted: false,
                    timer: None,
                }),
            }),
        }
    }

    /// A cycle created directly in `Resolved` from a seed match; the body
    /// never runs.
    pub(crate) fn from_seed(
        identity: BodyId,
        props: Props,
        result: T,
        default_delays: DelayPolicy,
        options: CycleOptions,
        trigger: RerunTrigger,
        now: Instant,
    ) -> Self {
        let cycle = Self::new(
            identity,
            props,
            None,
            None,
            CycleState::Initial,
            default_delays,
            options,
            trigger,
            now,
        );
        {
            let mut inner = cycle.lock();
            inner.final_output = Some(result);
            inner.state = CycleState::Resolved;
        }
        cycle
    }

    /// Execute the async body's synchronous bracket.
    ///
    /// Runs `body` only when the cycle is `Initial` or `Rerendering` —
    /// reused and seeded cycles make this a no-op, so hosts may call it
    /// unconditionally each invocation. Any error returned before the first
    /// suspension is captured exactly like an asynchronous rejection; a body
    /// that suspends without staging a candidate is rejected with a
    /// missing-progress error unless the check is disabled.
    pub fn run<F>(&self, body: F)
    where
        F: FnOnce(RenderCycle<T>) -> Result<RunOutcome<T>, BodyError>,
    {
        {
            let mut inner = self.lock();
            match inner.state {
                CycleState::Initial | CycleState::Rerendering => {
                    inner.state = CycleState::Running;
                }
                _ => return,
            }
        }
        trace!(identity = %self.shared.identity, "entering synchronous bracket");
        let outcome = body(self.clone());
        match outcome {
            Err(err) => self.settle_rejected(CycleError::SynchronousFailure(err), false),
            Ok(RunOutcome::Completed(value)) => self.settle_resolved(value, false),
            Ok(RunOutcome::Suspended) => {
                let missing = {
                    let mut inner = self.lock();
                    if inner.state != CycleState::Running {
                        // Settled or cancelled from within the bracket.
                        false
                    } else if inner.progress.is_empty()
                        && !self.shared.options.suppress_progress
                        && !self.shared.options.skip_progress_check
                    {
                        true
                    } else {
                        inner.state = CycleState::Suspended;
                        trace!(identity = %self.shared.identity, "exiting synchronous bracket, suspended");
                        false
                    }
                };
                if missing {
                    self.settle_rejected(
                        CycleError::MissingProgress {
                            identity: self.shared.identity.clone(),
                        },
                        false,
                    );
                }
            }
        }
    }

    /// Obtain the settlement capability for this cycle's pending result.
    ///
    /// Moved into whatever finishes the asynchronous work; resolving or
    /// rejecting after cancellation (or after another settlement) is
    /// silently discarded.
    #[must_use]
    pub fn settlement(&self) -> Settlement<T> {
        Settlement {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Stage a progress candidate.
    pub fn stage(&self, value: T) {
        self.stage_at(value, None, Instant::now());
    }

    /// Stage a labelled progress candidate.
    pub fn stage_labeled(&self, value: T, label: impl Into<String>) {
        self.stage_at(value, Some(label.into()), Instant::now());
    }

    /// Stage a candidate with an explicit timestamp (test harnesses drive
    /// this directly with synthetic schedules).
    pub fn stage_at(&self, value: T, label: Option<String>, now: Instant) {
        let elapsed = self.elapsed_at(now);
        let post = {
            let mut inner = self.lock();
            if inner.state.is_terminal() {
                return;
            }
            inner.progress.push(ProgressEntry {
                value,
                label,
                at: now,
            });
            trace!(
                identity = %self.shared.identity,
                elapsed_ms = elapsed.as_millis() as u64,
                staged = inner.progress.len(),
                "progress candidate staged"
            );
            if self.shared.options.suppress_progress {
                Post::Nothing
            } else {
                let has_prior = inner.interim.is_some();
                match inner.scheduler.decide(has_prior, elapsed) {
                    ProgressDecision::Show => {
                        inner.scheduler.mark_displayed();
                        if let Some(timer) = inner.timer.take() {
                            timer.cancel();
                        }
                        Post::Trigger
                    }
                    ProgressDecision::Defer { remaining } if inner.timer.is_none() => {
                        Post::ArmTimer(remaining)
                    }
                    ProgressDecision::Defer { .. } | ProgressDecision::Hold => Post::Nothing,
                }
            }
        };
        if let Post::ArmTimer(remaining) = post {
            self.arm_timer(remaining);
        }
        let event = RenderEvent {
            target: self.shared.identity.clone(),
            elapsed,
        };
        self.dispatch(EventKind::Progress, event, matches!(post, Post::Trigger));
    }

    /// The latest staged progress candidate, regardless of display
    /// eligibility.
    #[must_use]
    pub fn latest_progress(&self) -> Option<T> {
        self.lock().progress.last().map(|entry| entry.value.clone())
    }

    /// The most recent candidate staged under `label`.
    #[must_use]
    pub fn progress_label(&self, label: &str) -> Option<T> {
        self.lock()
            .progress
            .iter()
            .rev()
            .find(|entry| entry.label.as_deref() == Some(label))
            .map(|entry| entry.value.clone())
    }

    /// The best currently displayable output.
    ///
    /// Priority: the final output once `Resolved`; otherwise the latest
    /// progress candidate if the delay policy deems it eligible (latching
    /// eligibility monotonically); otherwise the carried prior output
    /// (stale-while-revalidate); otherwise nothing.
    #[must_use]
    pub fn current_output(&self) -> Option<T> {
        self.current_output_at(Instant::now())
    }

    /// [`RenderCycle::current_output`] evaluated at an explicit instant.
    pub fn current_output_at(&self, now: Instant) -> Option<T> {
        let elapsed = self.elapsed_at(now);
        let (output, rearm) = {
            let mut inner = self.lock();
            if inner.state == CycleState::Resolved {
                (inner.final_output.clone(), None)
            } else if !self.shared.options.suppress_progress && !inner.progress.is_empty() {
                let has_prior = inner.interim.is_some();
                match inner.scheduler.decide(has_prior, elapsed) {
                    ProgressDecision::Show => {
                        inner.scheduler.mark_displayed();
                        if let Some(timer) = inner.timer.take() {
                            timer.cancel();
                        }
                        (inner.progress.last().map(|e| e.value.clone()), None)
                    }
                    ProgressDecision::Defer { remaining } => {
                        // Re-arm if a delay change outran the armed timer.
                        let rearm = (!inner.state.is_terminal() && inner.timer.is_none())
                            .then_some(remaining);
                        (inner.interim.clone(), rearm)
                    }
                    ProgressDecision::Hold => (inner.interim.clone(), None),
                }
            } else {
                (inner.interim.clone(), None)
            }
        };
        if let Some(remaining) = rearm {
            self.arm_timer(remaining);
        }
        output
    }

    /// The final output of a resolved cycle, if any.
    #[must_use]
    pub fn final_output(&self) -> Option<T> {
        let inner = self.lock();
        if inner.state == CycleState::Resolved {
            inner.final_output.clone()
        } else {
            None
        }
    }

    fn arm_timer(&self, remaining: Duration) {
        let weak: Weak<CycleShared<T>> = Arc::downgrade(&self.shared);
        let timer = RerunTimer::arm(remaining, move || {
            if let Some(shared) = weak.upgrade() {
                let live = {
                    let mut inner = shared.inner.lock().unwrap();
                    inner.timer = None;
                    !inner.state.is_terminal()
                };
                if live {
                    trace!(identity = %shared.identity, "progress delay elapsed, requesting rerun");
                    (shared.trigger)();
                }
            }
        });
        let mut inner = self.lock();
        if inner.state.is_terminal() || inner.timer.is_some() {
            timer.cancel();
        } else {
            inner.timer = Some(timer);
        }
    }

    fn settle_resolved(&self, value: Option<T>, trigger_rerun: bool) {
        let event = {
            let mut inner = self.lock();
            if inner.state.is_terminal() {
                return;
            }
            let retained = value.is_none();
            inner.final_output = match value {
                Some(value) => Some(value),
                // Absence of an explicit final value means "keep showing
                // what was last shown", not "show nothing".
                None => inner.progress.last().map(|entry| entry.value.clone()),
            };
            inner.state = CycleState::Resolved;
            if let Some(timer) = inner.timer.take() {
                timer.cancel();
            }
            debug!(identity = %self.shared.identity, retained, "cycle resolved");
            RenderEvent {
                target: self.shared.identity.clone(),
                elapsed: self.shared.started_at.elapsed(),
            }
        };
        self.dispatch(EventKind::Complete, event, trigger_rerun);
    }

    fn settle_rejected(&self, error: CycleError, trigger_rerun: bool) {
        let event = {
            let mut inner = self.lock();
            if inner.state.is_terminal() {
                return;
            }
            debug!(identity = %self.shared.identity, %error, "cycle rejected");
            inner.deferred_error = Some(Arc::new(error));
            inner.state = CycleState::Rejected;
            if let Some(timer) = inner.timer.take() {
                timer.cancel();
            }
            RenderEvent {
                target: self.shared.identity.clone(),
                elapsed: self.shared.started_at.elapsed(),
            }
        };
        self.dispatch(EventKind::Complete, event, trigger_rerun);
    }
}

/// Capability to settle a suspended cycle's pending result.
///
/// Obtained from [`RenderCycle::settlement`] and moved into the code that
/// finishes the asynchronous work. Settling a cycle that was cancelled,
/// already settled, or dropped is a silent no-op.
pub struct Settlement<T> {
    shared: Weak<CycleShared<T>>,
}

impl<T: Clone + Send + 'static> Settlement<T> {
    /// Settle successfully. `None` retains the last staged progress
    /// candidate as the final output.
    pub fn resolve(self, value: Option<T>) {
        if let Some(shared) = self.shared.upgrade() {
            RenderCycle { shared }.settle_resolved(value, true);
        }
    }

    /// Settle with a failure, captured as the cycle's deferred error.
    pub fn reject(self, error: BodyError) {
        if let Some(shared) = self.shared.upgrade() {
            RenderCycle { shared }.settle_rejected(CycleError::AsyncRejection(error), true);
        }
    }

    /// Cooperative cancellation check for worker code holding only the
    /// settlement. Also true when the cycle no longer exists.
    #[must_use]
    pub fn cancelled(&self) -> bool {
        match self.shared.upgrade() {
            Some(shared) => RenderCycle { shared }.query_cancelled(),
            None => true,
        }
    }
}

impl<T> fmt::Debug for Settlement<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settlement")
            .field("live", &(self.shared.strong_count() > 0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    fn noop_trigger() -> RerunTrigger {
        Arc::new(|| {})
    }

    fn counting_trigger() -> (RerunTrigger, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let trigger: RerunTrigger = Arc::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (trigger, count)
    }

    fn fresh(options: CycleOptions, trigger: RerunTrigger) -> RenderCycle<String> {
        RenderCycle::new(
            BodyId::new("test_body"),
            Props::new(),
            None,
            None,
            CycleState::Initial,
            DelayPolicy::default(),
            options,
            trigger,
            Instant::now(),
        )
    }

    fn rerendering(interim: &str, trigger: RerunTrigger) -> RenderCycle<String> {
        RenderCycle::new(
            BodyId::new("test_body"),
            Props::new().with("gen", 2),
            Some(Props::new().with("gen", 1)),
            Some(interim.to_string()),
            CycleState::Rerendering,
            DelayPolicy::default(),
            CycleOptions::default(),
            trigger,
            Instant::now(),
        )
    }

    #[test]
    fn synchronous_completion_resolves_without_suspending() {
        let cycle = fresh(CycleOptions::default(), noop_trigger());
        cycle.run(|_| Ok(RunOutcome::Completed(Some("done".into()))));
        assert_eq!(cycle.state(), CycleState::Resolved);
        assert_eq!(cycle.current_output(), Some("done".into()));
        assert!(cycle.current_error().is_none());
    }

    #[test]
    fn synchronous_error_is_captured_not_thrown() {
        let cycle = fresh(CycleOptions::default(), noop_trigger());
        cycle.run(|_| Err("boom".into()));
        assert_eq!(cycle.state(), CycleState::Rejected);
        let error = cycle.current_error().expect("deferred error");
        assert!(matches!(*error, CycleError::SynchronousFailure(_)));
        assert_eq!(cycle.current_output(), None);
    }

    #[test]
    fn completed_none_retains_last_staged_candidate() {
        let cycle = fresh(CycleOptions::default(), noop_trigger());
        cycle.run(|c| {
            c.stage("first".to_string());
            c.stage("last".to_string());
            Ok(RunOutcome::Completed(None))
        });
        assert_eq!(cycle.state(), CycleState::Resolved);
        assert_eq!(cycle.current_output(), Some("last".into()));
    }

    #[test]
    fn suspension_without_progress_is_rejected() {
        let cycle = fresh(CycleOptions::default(), noop_trigger());
        cycle.run(|_| Ok(RunOutcome::Suspended));
        assert_eq!(cycle.state(), CycleState::Rejected);
        let error = cycle.current_error().expect("deferred error");
        assert!(matches!(*error, CycleError::MissingProgress { .. }));
    }

    #[test]
    fn progress_check_can_be_disabled() {
        let cycle = fresh(
            CycleOptions::default().without_progress_check(),
            noop_trigger(),
        );
        cycle.run(|_| Ok(RunOutcome::Suspended));
        assert_eq!(cycle.state(), CycleState::Suspended);
        assert!(cycle.current_error().is_none());
    }

    #[test]
    fn settlement_resolves_a_suspended_cycle() {
        let (trigger, reruns) = counting_trigger();
        let cycle = fresh(CycleOptions::default(), trigger);
        let settlement = StdMutex::new(None);
        cycle.run(|c| {
            c.stage_labeled("loading".to_string(), "initial");
            *settlement.lock().unwrap() = Some(c.settlement());
            Ok(RunOutcome::Suspended)
        });
        assert_eq!(cycle.state(), CycleState::Suspended);

        let settlement = settlement.lock().unwrap().take().unwrap();
        assert!(!settlement.cancelled());
        settlement.resolve(Some("done".into()));

        assert_eq!(cycle.state(), CycleState::Resolved);
        assert_eq!(cycle.current_output(), Some("done".into()));
        assert_eq!(reruns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn settlement_rejection_is_captured() {
        let cycle = fresh(CycleOptions::default(), noop_trigger());
        cycle.run(|c| {
            c.stage("loading".to_string());
            Ok(RunOutcome::Suspended)
        });
        cycle.settlement().reject("fetch failed".into());
        assert_eq!(cycle.state(), CycleState::Rejected);
        let error = cycle.current_error().expect("deferred error");
        assert!(matches!(*error, CycleError::AsyncRejection(_)));
        assert!(error.to_string().contains("fetch failed"));
    }

    #[test]
    fn output_and_error_are_mutually_exclusive() {
        let cycle = fresh(CycleOptions::default(), noop_trigger());
        cycle.run(|c| {
            c.stage("loading".to_string());
            Ok(RunOutcome::Suspended)
        });
        cycle.settlement().reject("late failure".into());
        // A second settlement of either kind is discarded.
        cycle.settlement().resolve(Some("too late".into()));
        assert_eq!(cycle.state(), CycleState::Rejected);
        assert_eq!(cycle.final_output(), None);
        assert!(cycle.current_error().is_some());
    }

    #[test]
    fn cancellation_discards_late_settlement() {
        let (trigger, reruns) = counting_trigger();
        let cycle = fresh(CycleOptions::default(), trigger);
        let completes = Arc::new(AtomicUsize::new(0));
        let c = completes.clone();
        cycle.subscribe(EventKind::Complete, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        cycle.run(|c| {
            c.stage("loading".to_string());
            Ok(RunOutcome::Suspended)
        });
        let settlement = cycle.settlement();
        cycle.cancel();
        let reruns_before = reruns.load(Ordering::SeqCst);

        settlement.resolve(Some("late".into()));

        assert_eq!(cycle.state(), CycleState::Cancelled);
        assert_eq!(cycle.final_output(), None);
        assert!(cycle.current_error().is_none());
        assert_eq!(completes.load(Ordering::SeqCst), 0);
        assert_eq!(reruns.load(Ordering::SeqCst), reruns_before);
    }

    #[test]
    fn cancel_is_idempotent_and_query_observable() {
        let cycle = fresh(CycleOptions::default(), noop_trigger());
        assert!(!cycle.query_cancelled());
        cycle.cancel();
        cycle.cancel();
        assert!(cycle.query_cancelled());
        assert_eq!(cycle.state(), CycleState::Cancelled);
    }

    #[test]
    fn cancelled_cycle_ignores_staging() {
        let cycle = fresh(CycleOptions::default(), noop_trigger());
        cycle.cancel();
        cycle.stage("ignored".to_string());
        assert_eq!(cycle.progress_count(), 0);
        assert_eq!(cycle.current_output(), None);
    }

    #[test]
    fn progress_events_fire_in_order_then_complete() {
        let events = Arc::new(StdMutex::new(Vec::new()));
        let cycle = fresh(
            CycleOptions::default().with_delays(DelayPolicy::new(Duration::ZERO, None)),
            noop_trigger(),
        );
        let log = events.clone();
        cycle.subscribe(EventKind::Progress, move |e| {
            log.lock().unwrap().push(("progress", e.elapsed));
        });
        let log = events.clone();
        cycle.subscribe(EventKind::Complete, move |e| {
            log.lock().unwrap().push(("complete", e.elapsed));
        });

        cycle.run(|c| {
            c.stage("one".to_string());
            c.stage("two".to_string());
            Ok(RunOutcome::Suspended)
        });
        cycle.settlement().resolve(Some("done".into()));

        let events = events.lock().unwrap();
        let kinds: Vec<&str> = events.iter().map(|(k, _)| *k).collect();
        assert_eq!(kinds, vec!["progress", "progress", "complete"]);
    }

    #[test]
    fn complete_event_reports_elapsed_time() {
        let cycle = fresh(CycleOptions::default(), noop_trigger());
        let observed = Arc::new(StdMutex::new(None));
        let slot = observed.clone();
        cycle.subscribe(EventKind::Complete, move |e| {
            *slot.lock().unwrap() = Some(e.elapsed);
        });
        cycle.run(|c| {
            c.stage("loading".to_string());
            Ok(RunOutcome::Suspended)
        });
        std::thread::sleep(Duration::from_millis(20));
        cycle.settlement().resolve(Some("done".into()));
        let elapsed = observed.lock().unwrap().expect("complete fired");
        assert!(elapsed >= Duration::from_millis(20));
    }

    #[test]
    fn listener_may_reenter_the_cycle() {
        let cycle = fresh(CycleOptions::default(), noop_trigger());
        let seen = Arc::new(StdMutex::new(None));
        let slot = seen.clone();
        let probe = cycle.clone();
        cycle.subscribe(EventKind::Complete, move |_| {
            *slot.lock().unwrap() = Some(probe.state());
        });
        cycle.run(|_| Ok(RunOutcome::Completed(Some("done".into()))));
        assert_eq!(*seen.lock().unwrap(), Some(CycleState::Resolved));
    }

    #[test]
    fn delayed_progress_is_not_displayed_early() {
        let cycle = fresh(CycleOptions::default(), noop_trigger());
        cycle.run(|c| {
            let t0 = c.started_at();
            c.stage_at("initial".to_string(), None, t0);
            Ok(RunOutcome::Suspended)
        });
        let t0 = cycle.started_at();
        assert_eq!(cycle.current_output_at(t0 + Duration::from_millis(10)), None);
        assert_eq!(
            cycle.current_output_at(t0 + Duration::from_millis(50)),
            Some("initial".into())
        );
        // Monotonic: an earlier query instant still shows after the latch.
        assert_eq!(
            cycle.current_output_at(t0 + Duration::from_millis(10)),
            Some("initial".into())
        );
    }

    #[test]
    fn latest_candidate_wins_display() {
        let cycle = fresh(CycleOptions::default(), noop_trigger());
        let t0 = cycle.started_at();
        cycle.run(|c| {
            let t0 = c.started_at();
            c.stage_at("initial".to_string(), Some("initial".into()), t0);
            c.stage_at("progress".to_string(), None, t0 + Duration::from_millis(25));
            Ok(RunOutcome::Suspended)
        });
        assert_eq!(
            cycle.current_output_at(t0 + Duration::from_millis(60)),
            Some("progress".into())
        );
        // Earlier labelled entries stay queryable.
        assert_eq!(cycle.progress_label("initial"), Some("initial".into()));
    }

    #[test]
    fn rerender_keeps_prior_output_until_resolution() {
        let cycle = rerendering("previous", noop_trigger());
        cycle.run(|c| {
            c.stage("placeholder".to_string());
            Ok(RunOutcome::Suspended)
        });
        let t0 = cycle.started_at();
        // delay_rendered defaults to "never": prior output holds.
        assert_eq!(
            cycle.current_output_at(t0 + Duration::from_secs(3600)),
            Some("previous".into())
        );
        cycle.settlement().resolve(Some("fresh".into()));
        assert_eq!(cycle.current_output(), Some("fresh".into()));
        assert_eq!(
            cycle.prev_props(),
            Some(&Props::new().with("gen", 1))
        );
    }

    #[test]
    fn finite_rendered_delay_lets_placeholder_preempt() {
        let trigger = noop_trigger();
        let cycle = RenderCycle::new(
            BodyId::new("test_body"),
            Props::new(),
            None,
            Some("previous".to_string()),
            CycleState::Rerendering,
            DelayPolicy::default(),
            CycleOptions::default()
                .with_delays(DelayPolicy::new(Duration::from_millis(50), Some(Duration::from_millis(100)))),
            trigger,
            Instant::now(),
        );
        cycle.run(|c| {
            c.stage("placeholder".to_string());
            Ok(RunOutcome::Suspended)
        });
        let t0 = cycle.started_at();
        assert_eq!(
            cycle.current_output_at(t0 + Duration::from_millis(60)),
            Some("previous".into())
        );
        assert_eq!(
            cycle.current_output_at(t0 + Duration::from_millis(100)),
            Some("placeholder".into())
        );
    }

    #[test]
    fn suppressed_progress_never_displays_but_still_falls_back() {
        let cycle = fresh(CycleOptions::default().without_progress(), noop_trigger());
        cycle.run(|c| {
            c.stage_at("staged".to_string(), None, c.started_at());
            Ok(RunOutcome::Suspended)
        });
        let t0 = cycle.started_at();
        assert_eq!(cycle.current_output_at(t0 + Duration::from_secs(10)), None);
        cycle.settlement().resolve(None);
        assert_eq!(cycle.current_output(), Some("staged".into()));
    }

    #[test]
    fn set_delays_is_ignored_after_first_display() {
        let cycle = fresh(CycleOptions::default(), noop_trigger());
        assert!(cycle.set_delays(DelayPolicy::new(Duration::ZERO, None)));
        cycle.run(|c| {
            c.stage("shown".to_string());
            Ok(RunOutcome::Suspended)
        });
        // Zero delay displayed the candidate at staging time.
        assert_eq!(cycle.current_output(), Some("shown".into()));
        assert!(!cycle.set_delays(DelayPolicy::default()));
    }

    #[test]
    fn run_is_idempotent_once_started() {
        let runs = Arc::new(AtomicUsize::new(0));
        let cycle = fresh(CycleOptions::default(), noop_trigger());
        let r = runs.clone();
        cycle.run(move |_| {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(RunOutcome::Completed(Some("done".into())))
        });
        let r = runs.clone();
        cycle.run(move |_| {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(RunOutcome::Completed(Some("again".into())))
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(cycle.current_output(), Some("done".into()));
    }

    #[test]
    fn deferred_staging_arms_a_rerun_timer() {
        let (trigger, reruns) = counting_trigger();
        let cycle = fresh(
            CycleOptions::default().with_delays(DelayPolicy::new(Duration::from_millis(20), None)),
            trigger,
        );
        cycle.run(|c| {
            c.stage("loading".to_string());
            Ok(RunOutcome::Suspended)
        });
        assert_eq!(reruns.load(Ordering::SeqCst), 0);
        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(reruns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn resolution_before_delay_cancels_the_timer() {
        let (trigger, reruns) = counting_trigger();
        let cycle = fresh(
            CycleOptions::default().with_delays(DelayPolicy::new(Duration::from_millis(60), None)),
            trigger,
        );
        cycle.run(|c| {
            c.stage("loading".to_string());
            Ok(RunOutcome::Suspended)
        });
        cycle.settlement().resolve(Some("done".into()));
        let after_resolve = reruns.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(150));
        // Only the settlement rerun, never the timer's.
        assert_eq!(reruns.load(Ordering::SeqCst), after_resolve);
        assert_eq!(cycle.current_output(), Some("done".into()));
    }

    #[test]
    fn seeded_cycle_starts_resolved() {
        let cycle: RenderCycle<String> = RenderCycle::from_seed(
            BodyId::new("test_body"),
            Props::new().with("a", 1),
            "seeded".to_string(),
            DelayPolicy::default(),
            CycleOptions::default(),
            noop_trigger(),
            Instant::now(),
        );
        assert_eq!(cycle.state(), CycleState::Resolved);
        assert_eq!(cycle.current_output(), Some("seeded".into()));
        // The body never runs on a seeded cycle.
        cycle.run(|_| panic!("body must not run"));
    }
}
