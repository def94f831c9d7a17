use std::collections::{BTreeMap, BTreeSet};
mod commands;
mod init;
mod snapshot;
mod step;

use contracts::messages::{
    ControlPayload, CrewNotice, RepairResult, SimulationUpdate, StationResult, VesselAlert,
    VesselUpdatePayload,
};
use contracts::{
    ChargeReason, ConnectionId, Controls, EconomyAdjustment, EconomyCharge, Environment,
    EnvironmentPatch, Position, RuleContext, ScheduleEventRequest, ScheduledEnvironmentEvent,
    ServerMessage, SimulationConfig, Station, StationAction, Tuning, Vessel, VesselMode,
    VesselSnapshot, WeatherOverride,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;
use thiserror::Error;

use crate::arbiter;
use crate::cooldown::CooldownTracker;
use crate::effects::{Audience, Effect, Effects};
use crate::environment::{self as env_model, EnvironmentError, EventTransition};
use crate::rules::Incident;

pub use commands::{Assignment, REPAIR_MAX_SPEED};
pub use init::SpaceSeed;
pub use step::{SpaceTickFailure, TickReport};

/// A command that the world refused. Nothing was mutated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandRejection {
    #[error("space {0} is not active")]
    SpaceNotActive(String),
    #[error("you are not crew on any vessel in this space")]
    NoVessel,
    #[error("vessel {0} not found")]
    VesselNotFound(String),
    #[error("{0}")]
    NotPermitted(String),
    #[error("vessel must be stopped to repair (speed {speed:.2} m/s)")]
    MovingRepair { speed: f64 },
    #[error("event {0} is already scheduled")]
    DuplicateEvent(String),
    #[error(transparent)]
    Environment(#[from] EnvironmentError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TickError {
    #[error("environment step failed: {0}")]
    Environment(#[from] EnvironmentError),
}

/// Everything the server knows about one space. Owned by the world and only
/// mutated under the world's exclusive borrow.
#[derive(Debug)]
pub struct SpaceState {
    space_id: String,
    tuning: Tuning,
    rules: RuleContext,
    vessels: BTreeMap<String, Vessel>,
    crew_index: BTreeMap<String, String>,
    last_vessel_by_user: BTreeMap<String, String>,
    environment: Environment,
    events: Vec<ScheduledEnvironmentEvent>,
    cooldowns: CooldownTracker,
    rng: StdRng,
    sockets: BTreeMap<ConnectionId, String>,
    pending_full: BTreeSet<ConnectionId>,
    changed: BTreeSet<String>,
    environment_dirty: bool,
    last_tick_at: Option<u64>,
    last_weather_rotation_at: u64,
    tick_count: u64,
}

/// Authoritative state for every active space.
#[derive(Debug)]
pub struct WorldState {
    config: SimulationConfig,
    spaces: BTreeMap<String, SpaceState>,
    id_sequence: u64,
    tick_worker_threads: usize,
    tick_pool: Option<rayon::ThreadPool>,
}

impl SpaceState {
    pub fn space_id(&self) -> &str {
        &self.space_id
    }

    pub fn tuning(&self) -> &Tuning {
        &self.tuning
    }

    pub fn rules(&self) -> &RuleContext {
        &self.rules
    }

    pub fn vessels(&self) -> &BTreeMap<String, Vessel> {
        &self.vessels
    }

    pub fn vessel(&self, vessel_id: &str) -> Option<&Vessel> {
        self.vessels.get(vessel_id)
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn events(&self) -> &[ScheduledEnvironmentEvent] {
        &self.events
    }

    pub fn vessel_for_user(&self, user_id: &str) -> Option<&Vessel> {
        self.crew_index
            .get(user_id)
            .and_then(|vessel_id| self.vessels.get(vessel_id))
    }

    pub fn socket_count(&self) -> usize {
        self.sockets.len()
    }

    pub fn has_socket(&self, connection_id: ConnectionId) -> bool {
        self.sockets.contains_key(&connection_id)
    }

    /// Connections currently bound to any of `user_ids`.
    pub fn connections_for(&self, user_ids: &[String]) -> Vec<ConnectionId> {
        self.sockets
            .iter()
            .filter(|(_, user_id)| user_ids.contains(user_id))
            .map(|(connection_id, _)| *connection_id)
            .collect()
    }

    pub fn connections(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.sockets.keys().copied()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn cooldown_entries(&self) -> usize {
        self.cooldowns.len()
    }

    pub fn crew_index(&self) -> &BTreeMap<String, String> {
        &self.crew_index
    }

    fn mark_changed(&mut self, vessel_id: &str) {
        self.changed.insert(vessel_id.to_string());
    }

    /// Vessel the user is crewing, resolved mutably.
    fn crewed_vessel_mut(&mut self, user_id: &str) -> Result<&mut Vessel, CommandRejection> {
        let vessel_id = self
            .crew_index
            .get(user_id)
            .ok_or(CommandRejection::NoVessel)?;
        self.vessels
            .get_mut(vessel_id)
            .ok_or_else(|| CommandRejection::VesselNotFound(vessel_id.clone()))
    }
}

impl WorldState {
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn tick_worker_threads(&self) -> usize {
        self.tick_worker_threads
    }

    pub fn space(&self, space_id: &str) -> Option<&SpaceState> {
        self.spaces.get(space_id)
    }

    pub fn spaces(&self) -> impl Iterator<Item = &SpaceState> {
        self.spaces.values()
    }

    pub fn is_space_active(&self, space_id: &str) -> bool {
        self.spaces.contains_key(space_id)
    }

    fn space_mut(&mut self, space_id: &str) -> Result<&mut SpaceState, CommandRejection> {
        self.spaces
            .get_mut(space_id)
            .ok_or_else(|| CommandRejection::SpaceNotActive(space_id.to_string()))
    }
}
