#![forbid(unsafe_code)]

//! viewcycle public facade crate.
//!
//! This crate provides the stable, ergonomic surface area for users. It
//! re-exports common types from the internal crates and offers a
//! lightweight prelude for day-to-day usage.

// --- Core re-exports -------------------------------------------------------

pub use viewcycle_core::bus::{EventBus, EventKind, RenderEvent};
pub use viewcycle_core::cycle::{
    CycleOptions, CycleState, RenderCycle, RerunTrigger, RunOutcome, Settlement,
};
pub use viewcycle_core::error::{
    BodyError, CycleError, RegistryError, RegistryResult, SeedError, SeedResult,
};
pub use viewcycle_core::props::{BodyId, Props};
pub use viewcycle_core::registry::{
    Acquisition, Freshness, InstanceRegistry, RegistryConfig, Settling, SlotId,
};
pub use viewcycle_core::scheduler::{DelayPolicy, ProgressDecision, ProgressScheduler};
pub use viewcycle_core::seed::{Seed, SeedStore};

// --- Buffer re-exports -----------------------------------------------------

#[cfg(feature = "buffer")]
pub use viewcycle_buffer::{Autosave, EditBuffer};

// --- Prelude --------------------------------------------------------------

pub mod prelude {
    pub use crate::{
        Acquisition, BodyId, CycleError, CycleOptions, CycleState, DelayPolicy, EventKind,
        Freshness, InstanceRegistry, Props, RenderCycle, RenderEvent, RunOutcome, Settlement,
        SlotId,
    };

    #[cfg(feature = "buffer")]
    pub use crate::{Autosave, EditBuffer};
}

pub use viewcycle_core as core;

#[cfg(feature = "buffer")]
pub use viewcycle_buffer as buffer;
