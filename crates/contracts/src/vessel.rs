use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

pub const MPS_TO_KNOTS: f64 = 1.943_84;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Station {
    Helm,
    Engine,
    Radio,
}

impl Station {
    pub const ALL: [Station; 3] = [Station::Helm, Station::Engine, Station::Radio];
}

impl fmt::Display for Station {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Helm => "helm",
            Self::Engine => "engine",
            Self::Radio => "radio",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StationAction {
    Claim,
    Release,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StationHolder {
    pub user_id: String,
    pub username: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StationAssignments {
    pub helm: Option<StationHolder>,
    pub engine: Option<StationHolder>,
    pub radio: Option<StationHolder>,
}

impl StationAssignments {
    pub fn get(&self, station: Station) -> Option<&StationHolder> {
        match station {
            Station::Helm => self.helm.as_ref(),
            Station::Engine => self.engine.as_ref(),
            Station::Radio => self.radio.as_ref(),
        }
    }

    pub fn slot_mut(&mut self, station: Station) -> &mut Option<StationHolder> {
        match station {
            Station::Helm => &mut self.helm,
            Station::Engine => &mut self.engine,
            Station::Radio => &mut self.radio,
        }
    }

    pub fn holder_id(&self, station: Station) -> Option<&str> {
        self.get(station).map(|holder| holder.user_id.as_str())
    }

    pub fn is_held_by(&self, station: Station, user_id: &str) -> bool {
        self.holder_id(station) == Some(user_id)
    }

    /// Clears every station held by `user_id`, returning the stations released.
    pub fn release_all(&mut self, user_id: &str) -> Vec<Station> {
        let mut released = Vec::new();
        for station in Station::ALL {
            let slot = self.slot_mut(station);
            if slot.as_ref().is_some_and(|holder| holder.user_id == user_id) {
                *slot = None;
                released.push(station);
            }
        }
        released
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VesselMode {
    Player,
    Ai,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VesselStatus {
    #[default]
    Active,
    Stored,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Orientation {
    pub heading: f64,
    #[serde(default)]
    pub roll: f64,
    #[serde(default)]
    pub pitch: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Velocity {
    pub surge: f64,
    #[serde(default)]
    pub sway: f64,
    #[serde(default)]
    pub heave: f64,
}

impl Velocity {
    pub fn speed(&self) -> f64 {
        self.surge.hypot(self.sway)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Controls {
    pub throttle: f64,
    pub rudder_angle: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VesselProperties {
    pub name: String,
    pub mass: f64,
    pub length: f64,
    pub beam: f64,
    pub draft: f64,
}

impl Default for VesselProperties {
    fn default() -> Self {
        Self {
            name: "Unnamed vessel".to_string(),
            mass: 1_200_000.0,
            length: 150.0,
            beam: 24.0,
            draft: 7.0,
        }
    }
}

/// Health fractions in `[0, 1]`; `1.0` is undamaged.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DamageState {
    pub hull_integrity: f64,
    pub engine_health: f64,
    pub steering_health: f64,
    pub electrical_health: f64,
    pub flooding_damage: f64,
}

impl Default for DamageState {
    fn default() -> Self {
        Self {
            hull_integrity: 1.0,
            engine_health: 1.0,
            steering_health: 1.0,
            electrical_health: 1.0,
            flooding_damage: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct FailureState {
    pub engine_failed: bool,
    pub steering_failed: bool,
    pub flooding_level: f64,
    pub engine_failed_at: Option<u64>,
    pub steering_failed_at: Option<u64>,
    /// Rudder angle held while steering is jammed.
    pub jammed_rudder: Option<f64>,
}

impl FailureState {
    pub fn any_active(&self) -> bool {
        self.engine_failed || self.steering_failed || self.flooding_level > 0.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vessel {
    pub id: String,
    pub space_id: String,
    pub owner_id: Option<String>,
    #[serde(default)]
    pub status: VesselStatus,
    #[serde(default)]
    pub crew_ids: BTreeSet<String>,
    #[serde(default)]
    pub crew_names: BTreeMap<String, String>,
    #[serde(default)]
    pub stations: StationAssignments,
    pub mode: VesselMode,
    pub desired_mode: VesselMode,
    pub position: Position,
    pub orientation: Orientation,
    pub velocity: Velocity,
    pub controls: Controls,
    #[serde(default)]
    pub properties: VesselProperties,
    #[serde(default)]
    pub damage: DamageState,
    #[serde(default)]
    pub failure: FailureState,
    pub last_crew_at: u64,
    pub last_update: u64,
}

impl Vessel {
    /// A crewless, AI-controlled vessel at `position`.
    pub fn new(id: impl Into<String>, space_id: impl Into<String>, position: Position, now_ms: u64) -> Self {
        Self {
            id: id.into(),
            space_id: space_id.into(),
            owner_id: None,
            status: VesselStatus::Active,
            crew_ids: BTreeSet::new(),
            crew_names: BTreeMap::new(),
            stations: StationAssignments::default(),
            mode: VesselMode::Ai,
            desired_mode: VesselMode::Ai,
            position,
            orientation: Orientation::default(),
            velocity: Velocity::default(),
            controls: Controls::default(),
            properties: VesselProperties::default(),
            damage: DamageState::default(),
            failure: FailureState::default(),
            last_crew_at: now_ms,
            last_update: now_ms,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == VesselStatus::Active
    }

    pub fn has_crew_member(&self, user_id: &str) -> bool {
        self.crew_ids.contains(user_id)
    }

    pub fn speed(&self) -> f64 {
        self.velocity.speed()
    }

    pub fn speed_knots(&self) -> f64 {
        self.speed() * MPS_TO_KNOTS
    }

    pub fn username_for(&self, user_id: &str) -> String {
        self.crew_names
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| user_id.to_string())
    }
}

/// Per-vessel state as sent to clients in `simulation:update`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VesselSnapshot {
    pub id: String,
    pub owner_id: Option<String>,
    pub mode: VesselMode,
    pub position: Position,
    pub orientation: Orientation,
    pub velocity: Velocity,
    pub controls: Controls,
    pub properties: VesselProperties,
    pub damage: DamageState,
    pub failure: FailureState,
    pub crew_ids: Vec<String>,
    pub crew_count: usize,
    pub stations: StationAssignments,
    pub last_update: u64,
}

impl From<&Vessel> for VesselSnapshot {
    fn from(vessel: &Vessel) -> Self {
        Self {
            id: vessel.id.clone(),
            owner_id: vessel.owner_id.clone(),
            mode: vessel.mode,
            position: vessel.position,
            orientation: vessel.orientation,
            velocity: vessel.velocity,
            controls: vessel.controls,
            properties: vessel.properties.clone(),
            damage: vessel.damage,
            failure: vessel.failure,
            crew_ids: vessel.crew_ids.iter().cloned().collect(),
            crew_count: vessel.crew_ids.len(),
            stations: vessel.stations.clone(),
            last_update: vessel.last_update,
        }
    }
}
