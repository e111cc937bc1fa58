#![forbid(unsafe_code)]

//! Error types for the rendering core.
//!
//! Failures inside an asynchronous body are never thrown past the host:
//! they are captured into the owning cycle as a [`CycleError`] and read back
//! through `RenderCycle::current_error`, so the host can re-raise them
//! through its own reporting path during a synchronous invocation. Only seed
//! planting and registry misuse report errors at the call site.

use std::fmt;

use crate::props::BodyId;
use crate::registry::SlotId;

/// Boxed error produced by an asynchronous body.
pub type BodyError = Box<dyn std::error::Error + Send + Sync>;

/// A failure captured by a render cycle.
///
/// Stored write-once in the cycle and surfaced via `current_error`; a new
/// cycle for the same slot always starts with no error.
#[derive(Debug)]
pub enum CycleError {
    /// The body failed before its first suspension point.
    SynchronousFailure(BodyError),
    /// The body's pending result settled with a failure.
    AsyncRejection(BodyError),
    /// The body suspended without staging any interim output first.
    MissingProgress {
        /// Identity of the offending body.
        identity: BodyId,
    },
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleError::SynchronousFailure(err) => {
                write!(f, "synchronous failure before suspension: {err}")
            }
            CycleError::AsyncRejection(err) => write!(f, "asynchronous rejection: {err}"),
            CycleError::MissingProgress { identity } => {
                write!(f, "{identity}: no interim output declared before suspension")
            }
        }
    }
}

impl std::error::Error for CycleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CycleError::SynchronousFailure(err) | CycleError::AsyncRejection(err) => {
                Some(err.as_ref())
            }
            CycleError::MissingProgress { .. } => None,
        }
    }
}

/// Errors raised synchronously by `plant_records`.
#[derive(Debug)]
pub enum SeedError {
    /// The planted value is not a collection of records.
    NotACollection,
    /// One record in the collection is malformed.
    MalformedEntry {
        /// Index of the record within the collection.
        index: usize,
        /// What was wrong with it.
        reason: String,
    },
}

impl fmt::Display for SeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeedError::NotACollection => write!(f, "seed collection is not an array of records"),
            SeedError::MalformedEntry { index, reason } => {
                write!(f, "malformed seed record at index {index}: {reason}")
            }
        }
    }
}

impl std::error::Error for SeedError {}

/// Result type for seed planting.
pub type SeedResult<T> = Result<T, SeedError>;

/// Registry misuse conditions, reported as values rather than panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// An acquisition is already open for a different slot this turn.
    NestedAcquire {
        /// The slot whose acquisition is still open.
        open: SlotId,
        /// The slot that was requested.
        requested: SlotId,
    },
    /// The slot was never created or has been released.
    UnknownSlot(SlotId),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::NestedAcquire { open, requested } => write!(
                f,
                "slot {requested} acquired while slot {open} is still open in this turn"
            ),
            RegistryError::UnknownSlot(slot) => write!(f, "unknown slot {slot}"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;
