#![forbid(unsafe_code)]

//! Per-instance cycle registry.
//!
//! The registry is the explicit process-wide context object: it maps each
//! view instance's slot to its current [`RenderCycle`], decides on every
//! invocation whether to reuse, cancel-and-replace, or create a cycle, and
//! owns the [`SeedStore`] consulted when a slot renders for the first time.
//! Hosts construct one registry and call it from their instance hooks:
//! [`InstanceRegistry::create_slot`] at creation,
//! [`InstanceRegistry::acquire`] (plus `run` on the returned cycle) each
//! invocation, [`InstanceRegistry::confirm_mounted`] after the first
//! lifecycle confirmation, and [`InstanceRegistry::release`] on permanent
//! removal.
//!
//! # Invariants
//!
//! - At most one non-terminal cycle per slot: a superseded live cycle is
//!   cancelled before its replacement is installed.
//! - At most one acquisition is open at a time; re-entrant acquisition of
//!   the same slot within a turn observes the cycle created by the first.
//! - A slot's seed match is consulted at most once, for its first cycle.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace};

use crate::cycle::{CycleOptions, CycleState, RenderCycle, RerunTrigger, RunOutcome};
use crate::error::{BodyError, CycleError, RegistryError, RegistryResult, SeedResult};
use crate::props::{BodyId, Props};
use crate::scheduler::DelayPolicy;
use crate::seed::{Seed, SeedStore};

/// Opaque per-instance storage location.
pub type SlotId = u64;

/// Registry-wide defaults.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Delay policy applied to cycles that don't override it.
    pub delays: DelayPolicy,
}

/// How `acquire` satisfied the request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Freshness {
    /// A first cycle for this slot (`Initial`, possibly seeded).
    Fresh,
    /// A replacement cycle for a changed render generation (`Rerendering`).
    Rerender,
    /// The existing cycle, continuing.
    Reused,
}

/// Result of an acquisition: the cycle plus how it was obtained.
///
/// Hosts call `cycle.run(body)` unconditionally — it is a no-op on reused
/// and seeded cycles.
#[derive(Debug)]
pub struct Acquisition<T> {
    /// The live cycle bound to the slot.
    pub cycle: RenderCycle<T>,
    /// Whether the cycle is fresh, a rerender, or reused.
    pub freshness: Freshness,
}

struct Slot<T> {
    cycle: Option<RenderCycle<T>>,
    trigger: RerunTrigger,
    /// Final output of the most recent resolved generation; the next
    /// cycle's stale-while-revalidate candidate. Cleared by a rejected
    /// generation (errors reset the display baseline).
    last_output: Option<T>,
    last_props: Option<Props>,
    seed_consulted: bool,
}

/// Process-wide slot table. See the module docs for the host protocol.
pub struct InstanceRegistry<T> {
    slots: HashMap<SlotId, Slot<T>>,
    seeds: SeedStore<T>,
    config: RegistryConfig,
    next_slot: SlotId,
    open: Option<SlotId>,
}

impl<T: Clone + Send + 'static> InstanceRegistry<T> {
    /// Create a registry with the given defaults.
    #[must_use]
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            slots: HashMap::new(),
            seeds: SeedStore::new(),
            config,
            next_slot: 1,
            open: None,
        }
    }

    /// Allocate a slot for a view instance.
    ///
    /// `trigger` is the capability the cycle uses to request another
    /// synchronous invocation of the instance; it must be safe to call from
    /// timer threads and should schedule rather than recurse.
    pub fn create_slot(&mut self, trigger: RerunTrigger) -> SlotId {
        let slot = self.next_slot;
        self.next_slot += 1;
        self.slots.insert(
            slot,
            Slot {
                cycle: None,
                trigger,
                last_output: None,
                last_props: None,
                seed_consulted: false,
            },
        );
        trace!(slot, "slot created");
        slot
    }

    /// Obtain the cycle for this invocation, reusing the live one when the
    /// render generation is unchanged and cancel-and-replacing otherwise.
    pub fn acquire(
        &mut self,
        slot: SlotId,
        identity: BodyId,
        props: Props,
        options: CycleOptions,
    ) -> RegistryResult<Acquisition<T>> {
        if let Some(open) = self.open {
            if open != slot {
                return Err(RegistryError::NestedAcquire {
                    open,
                    requested: slot,
                });
            }
            // Re-entrant acquisition within one turn observes the cycle
            // created by the first call.
            let entry = self.slots.get(&slot).ok_or(RegistryError::UnknownSlot(slot))?;
            if let Some(cycle) = entry.cycle.clone() {
                return Ok(Acquisition {
                    cycle,
                    freshness: Freshness::Reused,
                });
            }
        }
        let Self {
            slots,
            seeds,
            config,
            open,
            ..
        } = self;
        let entry = slots.get_mut(&slot).ok_or(RegistryError::UnknownSlot(slot))?;
        *open = Some(slot);

        let mut carried_identity = false;
        if let Some(current) = entry.cycle.clone() {
            if *current.identity() == identity && *current.props() == props {
                trace!(slot, %identity, "reusing current cycle");
                return Ok(Acquisition {
                    cycle: current,
                    freshness: Freshness::Reused,
                });
            }
            // A distinct render generation supersedes the old cycle.
            carried_identity = *current.identity() == identity;
            match current.state() {
                CycleState::Resolved => {
                    entry.last_output = current.final_output();
                    entry.last_props = Some(current.props().clone());
                }
                CycleState::Rejected => {
                    entry.last_output = None;
                    entry.last_props = None;
                }
                _ => {
                    debug!(slot, %identity, "cancelling superseded cycle");
                    current.cancel();
                }
            }
        }

        let first_ever = !entry.seed_consulted && entry.cycle.is_none();
        if first_ever {
            entry.seed_consulted = true;
            if let Some(result) = seeds.take(&identity, &props) {
                debug!(slot, %identity, "slot hydrated from seed");
                let cycle = RenderCycle::from_seed(
                    identity,
                    props,
                    result,
                    config.delays,
                    options,
                    entry.trigger.clone(),
                    Instant::now(),
                );
                entry.cycle = Some(cycle.clone());
                return Ok(Acquisition {
                    cycle,
                    freshness: Freshness::Fresh,
                });
            }
        }

        // Stale-while-revalidate carry-over applies only when the same body
        // refetches; a different producer must not show this one's output.
        let (state, freshness, prev_props, interim) = if entry.cycle.is_some() && carried_identity {
            (
                CycleState::Rerendering,
                Freshness::Rerender,
                entry.last_props.clone(),
                entry.last_output.clone(),
            )
        } else {
            (CycleState::Initial, Freshness::Fresh, None, None)
        };
        debug!(slot, %identity, ?freshness, "starting cycle");
        let cycle = RenderCycle::new(
            identity,
            props,
            prev_props,
            interim,
            state,
            config.delays,
            options,
            entry.trigger.clone(),
            Instant::now(),
        );
        entry.cycle = Some(cycle.clone());
        Ok(Acquisition { cycle, freshness })
    }

    /// Close the current invocation turn, clearing the transient
    /// open-acquisition state. Must be called after each invocation
    /// completes.
    pub fn release_turn(&mut self) {
        self.open = None;
    }

    /// The cycle of the currently open acquisition, if any.
    #[must_use]
    pub fn current(&self) -> Option<RenderCycle<T>> {
        self.open
            .and_then(|slot| self.slots.get(&slot))
            .and_then(|entry| entry.cycle.clone())
    }

    /// Mark the slot's current cycle as mounted. Called once after the
    /// owning instance's first post-creation lifecycle confirmation.
    pub fn confirm_mounted(&mut self, slot: SlotId) -> RegistryResult<()> {
        let entry = self.slots.get(&slot).ok_or(RegistryError::UnknownSlot(slot))?;
        if let Some(cycle) = &entry.cycle {
            cycle.confirm_mounted();
        }
        Ok(())
    }

    /// Permanently remove the instance: cancel any live cycle and detach
    /// the slot.
    pub fn release(&mut self, slot: SlotId) -> RegistryResult<()> {
        let entry = self.slots.remove(&slot).ok_or(RegistryError::UnknownSlot(slot))?;
        if let Some(cycle) = entry.cycle {
            if !cycle.state().is_terminal() {
                debug!(slot, "cancelling live cycle on release");
                cycle.cancel();
            }
        }
        if self.open == Some(slot) {
            self.open = None;
        }
        trace!(slot, "slot released");
        Ok(())
    }

    /// Request another invocation of the instance (caller-driven retry).
    pub fn trigger_rerun(&self, slot: SlotId) -> RegistryResult<()> {
        let entry = self.slots.get(&slot).ok_or(RegistryError::UnknownSlot(slot))?;
        (entry.trigger)();
        Ok(())
    }

    /// The live cycle bound to a slot, if any.
    #[must_use]
    pub fn live_cycle(&self, slot: SlotId) -> Option<RenderCycle<T>> {
        self.slots.get(&slot).and_then(|entry| entry.cycle.clone())
    }

    /// Number of attached slots.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Plant a seed collection (replaces the pool).
    pub fn plant(&mut self, seeds: Vec<Seed<T>>) {
        self.seeds.plant(seeds);
    }

    /// The seed pool.
    #[must_use]
    pub fn seeds(&self) -> &SeedStore<T> {
        &self.seeds
    }

    /// Evaluate a body to its final value without progress display (the
    /// settle-to-final invocation style).
    ///
    /// Acquires with progress suppressed, runs the body, and closes the
    /// turn; the returned handle observes the eventual outcome.
    pub fn settle<F>(
        &mut self,
        slot: SlotId,
        identity: BodyId,
        props: Props,
        body: F,
    ) -> RegistryResult<Settling<T>>
    where
        F: FnOnce(RenderCycle<T>) -> Result<RunOutcome<T>, BodyError>,
    {
        let acquisition = self.acquire(
            slot,
            identity,
            props,
            CycleOptions::default().without_progress(),
        )?;
        acquisition.cycle.run(body);
        self.release_turn();
        Ok(Settling {
            cycle: acquisition.cycle,
        })
    }
}

impl<T: Clone + Send + 'static + DeserializeOwned> InstanceRegistry<T> {
    /// Validate and plant a seed collection in the interchange format.
    pub fn plant_records(&mut self, records: &Value) -> SeedResult<usize> {
        self.seeds.plant_records(records)
    }
}

impl<T: Clone + Send + 'static> Default for InstanceRegistry<T> {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl<T> fmt::Debug for InstanceRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceRegistry")
            .field("slots", &self.slots.len())
            .field("seeds", &self.seeds.len())
            .field("open", &self.open)
            .finish()
    }
}

/// Handle to a settle-to-final evaluation.
#[derive(Debug)]
pub struct Settling<T> {
    cycle: RenderCycle<T>,
}

impl<T: Clone + Send + 'static> Settling<T> {
    /// The outcome, if the body has settled: `Ok` with the final value (the
    /// last staged candidate when the body resolved empty), or the captured
    /// error.
    #[must_use]
    pub fn outcome(&self) -> Option<Result<Option<T>, Arc<CycleError>>> {
        match self.cycle.state() {
            CycleState::Resolved => Some(Ok(self.cycle.final_output())),
            CycleState::Rejected => self.cycle.current_error().map(Err),
            _ => None,
        }
    }

    /// The underlying cycle (for subscribing to `complete`).
    #[must_use]
    pub fn cycle(&self) -> &RenderCycle<T> {
        &self.cycle
    }
}
