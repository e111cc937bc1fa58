#![forbid(unsafe_code)]

//! viewcycle core
//!
//! Asynchronous render cycles for view instances: a host rendering
//! framework keeps producing synchronous output on each invocation while a
//! caller-supplied async body runs; this crate decides **which** output
//! (final, progress placeholder, or nothing) is current at each query
//! point, and when that decision changes.
//!
//! # Key Components
//!
//! - [`RenderCycle`] - State machine for one asynchronous attempt bound to
//!   one view instance
//! - [`InstanceRegistry`] - Per-instance slot table deciding reuse vs
//!   cancel-and-replace on every invocation
//! - [`ProgressScheduler`] / [`DelayPolicy`] - Progress-delay policy that
//!   avoids flashing placeholders for fast operations
//! - [`EventBus`] - Per-cycle `progress`/`complete` subscription
//! - [`SeedStore`] - Precomputed results planted for warm-start hydration
//! - [`Settlement`] - Capability that settles a suspended cycle's pending
//!   result
//!
//! # How it fits together
//!
//! The registry is the host's single entry point: `create_slot` at instance
//! creation, `acquire` + `run` each invocation, `confirm_mounted` after the
//! first lifecycle confirmation, `release` at teardown. Cycles drive
//! re-invocation through the slot's rerun trigger when settlement or a
//! progress-delay timer changes what should be displayed.

pub mod bus;
pub mod cycle;
pub mod error;
pub mod props;
pub mod registry;
pub mod scheduler;
pub mod seed;
mod timer;

pub use bus::{EventBus, EventKind, EventListener, RenderEvent};
pub use cycle::{CycleOptions, CycleState, RenderCycle, RerunTrigger, RunOutcome, Settlement};
pub use error::{
    BodyError, CycleError, RegistryError, RegistryResult, SeedError, SeedResult,
};
pub use props::{BodyId, Props};
pub use registry::{
    Acquisition, Freshness, InstanceRegistry, RegistryConfig, Settling, SlotId,
};
pub use scheduler::{DEFAULT_DELAY_EMPTY, DelayPolicy, ProgressDecision, ProgressScheduler};
pub use seed::{Seed, SeedStore};
