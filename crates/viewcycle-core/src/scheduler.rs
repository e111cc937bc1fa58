#![forbid(unsafe_code)]

//! Progress-delay policy.
//!
//! Decides whether the latest staged progress candidate may be displayed
//! yet. The intent is progressive disclosure without flicker: a fast body
//! resolves before the delay expires and its placeholder is never shown,
//! while a slow body gets its placeholder on screen once the threshold
//! passes. Two thresholds apply:
//!
//! - `delay_empty` when the instance has nothing on screen yet (first cycle,
//!   or the previous cycle ended in error),
//! - `delay_rendered` when a previous final output is still visible (a
//!   rerender). The default is to never preempt rendered content with a
//!   placeholder; callers opt into a finite value.
//!
//! # Invariants
//!
//! - **Monotonic**: once a candidate becomes displayable it stays
//!   displayable for the remainder of the cycle.
//! - **Frozen policy**: delays are mutable only until the first candidate is
//!   displayed.

use std::time::Duration;

/// Default delay before a placeholder may replace emptiness.
pub const DEFAULT_DELAY_EMPTY: Duration = Duration::from_millis(50);

/// Display-delay thresholds for one cycle.
///
/// `delay_rendered: None` means "never" (the documented default); callers
/// that want a rerender to fall back to a placeholder opt into a finite
/// value. Zero delays are legal and mean "immediately displayable".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DelayPolicy {
    /// Threshold when no prior final output exists.
    pub delay_empty: Duration,
    /// Threshold when a prior final output is visible; `None` = never.
    pub delay_rendered: Option<Duration>,
}

impl Default for DelayPolicy {
    fn default() -> Self {
        Self {
            delay_empty: DEFAULT_DELAY_EMPTY,
            delay_rendered: None,
        }
    }
}

impl DelayPolicy {
    /// Create a policy from explicit thresholds.
    #[must_use]
    pub fn new(delay_empty: Duration, delay_rendered: Option<Duration>) -> Self {
        Self {
            delay_empty,
            delay_rendered,
        }
    }

    /// The threshold applicable to the given display situation.
    #[must_use]
    pub fn applicable(&self, has_prior_output: bool) -> Option<Duration> {
        if has_prior_output {
            self.delay_rendered
        } else {
            Some(self.delay_empty)
        }
    }
}

/// Outcome of a display-eligibility query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgressDecision {
    /// Display the candidate now.
    Show,
    /// Not yet; re-evaluate after `remaining`.
    Defer {
        /// Time left until the threshold.
        remaining: Duration,
    },
    /// Never display a candidate this cycle.
    Hold,
}

/// Per-cycle eligibility state: the policy plus the monotonic display latch.
#[derive(Clone, Debug)]
pub struct ProgressScheduler {
    policy: DelayPolicy,
    displayed: bool,
}

impl ProgressScheduler {
    /// Create a scheduler with the given policy.
    #[must_use]
    pub fn new(policy: DelayPolicy) -> Self {
        Self {
            policy,
            displayed: false,
        }
    }

    /// Decide whether the latest candidate is displayable after `elapsed`.
    #[must_use]
    pub fn decide(&self, has_prior_output: bool, elapsed: Duration) -> ProgressDecision {
        if self.displayed {
            return ProgressDecision::Show;
        }
        match self.policy.applicable(has_prior_output) {
            None => ProgressDecision::Hold,
            Some(threshold) if elapsed >= threshold => ProgressDecision::Show,
            Some(threshold) => ProgressDecision::Defer {
                remaining: threshold - elapsed,
            },
        }
    }

    /// Latch the monotonic displayed flag.
    pub fn mark_displayed(&mut self) {
        self.displayed = true;
    }

    /// Whether a candidate has been displayed this cycle.
    #[must_use]
    pub fn displayed(&self) -> bool {
        self.displayed
    }

    /// Replace the policy. Returns `false` (ignored) once a candidate has
    /// been displayed: a cycle's delay policy is fixed before first use.
    pub fn set_policy(&mut self, policy: DelayPolicy) -> bool {
        if self.displayed {
            return false;
        }
        self.policy = policy;
        true
    }

    /// The active policy.
    #[must_use]
    pub fn policy(&self) -> DelayPolicy {
        self.policy
    }
}

impl Default for ProgressScheduler {
    fn default() -> Self {
        Self::new(DelayPolicy::default())
    }
}
