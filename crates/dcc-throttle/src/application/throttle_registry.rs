//! ThrottleRegistry: the roster plus the runtime state of every locomotive
//! that has been touched since start-up.
//!
//! The roster (name, address, decoder) comes from the config file and rarely
//! changes.  The runtime state (speed, direction, functions) changes on every
//! throttle command and is never persisted.
//!
//! # One lock per locomotive (for beginners)
//!
//! A single lock around the whole map would make every throttle wait for
//! every other throttle.  Instead the map only hands out
//! `Arc<Mutex<ThrottleState>>` slots; a command locks just its own
//! locomotive's slot, so two commands for the same engine run one after the
//! other while commands for different engines run in parallel.
//!
//! The map lock itself is held only long enough to look up or insert a slot.

use std::collections::HashMap;
use std::sync::Arc;

use dcc_core::{
    Address, DecoderDefinition, Direction, FunctionAction, FunctionIndex, FunctionStates, Speed,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Identifier of a rostered locomotive or consist.
pub type LocomotiveId = Uuid;

/// A rostered locomotive (or consist) as the throttle needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub id: LocomotiveId,
    pub name: String,
    pub address: Address,
    /// `None` means "unknown decoder": every function toggles.
    pub decoder: Option<DecoderDefinition>,
}

impl RosterEntry {
    pub fn function_action(&self, index: FunctionIndex) -> FunctionAction {
        self.decoder
            .as_ref()
            .map(|d| d.action_for(index))
            .unwrap_or_default()
    }
}

/// Runtime throttle state of one locomotive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThrottleState {
    pub speed: Speed,
    pub direction: Direction,
    pub functions: FunctionStates,
}

/// One function button as shown on a throttle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSlot {
    pub index: u8,
    pub name: Option<String>,
    pub action: FunctionAction,
    pub on: bool,
}

/// Throttle state merged with roster metadata, ready for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleSnapshot {
    pub id: LocomotiveId,
    pub name: String,
    pub address: u16,
    pub speed: u8,
    pub direction: Direction,
    pub functions: Vec<FunctionSlot>,
}

impl ThrottleSnapshot {
    pub fn build(entry: &RosterEntry, state: &ThrottleState) -> Self {
        let functions = (0u8..)
            .zip(state.functions.as_array().iter())
            .filter_map(|(i, &on)| {
                let index = FunctionIndex::new(i).ok()?;
                Some(FunctionSlot {
                    index: i,
                    name: entry
                        .decoder
                        .as_ref()
                        .and_then(|d| d.name_for(index))
                        .map(str::to_string),
                    action: entry.function_action(index),
                    on,
                })
            })
            .collect();

        Self {
            id: entry.id,
            name: entry.name.clone(),
            address: entry.address.value(),
            speed: state.speed.value(),
            direction: state.direction,
            functions,
        }
    }
}

/// Shared handle to one locomotive's state.
pub type ThrottleSlot = Arc<Mutex<ThrottleState>>;

/// Roster plus per-locomotive runtime state.
#[derive(Default)]
pub struct ThrottleRegistry {
    roster: RwLock<HashMap<LocomotiveId, RosterEntry>>,
    states: Mutex<HashMap<LocomotiveId, ThrottleSlot>>,
}

impl ThrottleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_roster(entries: impl IntoIterator<Item = RosterEntry>) -> Self {
        let roster = entries.into_iter().map(|e| (e.id, e)).collect();
        Self {
            roster: RwLock::new(roster),
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Removes a locomotive and forgets its runtime state.
    pub async fn remove(&self, id: LocomotiveId) {
        self.roster.write().await.remove(&id);
        self.states.lock().await.remove(&id);
    }

    pub async fn entry(&self, id: LocomotiveId) -> Option<RosterEntry> {
        self.roster.read().await.get(&id).cloned()
    }

    /// All roster entries, sorted by name.
    pub async fn roster(&self) -> Vec<RosterEntry> {
        let mut entries: Vec<RosterEntry> = self.roster.read().await.values().cloned().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    /// Returns the state slot for `id`, creating a default one on first
    /// access.  `None` if `id` is not rostered.
    pub async fn slot(&self, id: LocomotiveId) -> Option<ThrottleSlot> {
        if !self.roster.read().await.contains_key(&id) {
            return None;
        }
        let mut states = self.states.lock().await;
        Some(Arc::clone(states.entry(id).or_default()))
    }

    /// Ids of every locomotive with in-memory state.
    pub async fn active_ids(&self) -> Vec<LocomotiveId> {
        self.states.lock().await.keys().copied().collect()
    }
}
