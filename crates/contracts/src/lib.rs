//! v1 cross-boundary contracts for the authority core, realtime API, and persistence.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub mod access;
pub mod environment;
pub mod messages;
pub mod rules;
pub mod serde_u64_string;
pub mod vessel;

pub use access::{expand_roles, has_permission, permissions_for_roles, Permission, Role};
pub use environment::{
    Current, CurrentPatch, Environment, EnvironmentPatch, Precipitation,
    ScheduleEventRequest, ScheduledEnvironmentEvent, Tide, TideTrend, WeatherOverride, Wind,
    WindPatch,
};
pub use messages::{ClientMessage, FailureTransition, MessageError, ServerMessage};
pub use rules::{
    ChargeReason, EconomyAdjustment, EconomyCharge, EconomyProfile, RealismFlags, RuleContext,
};
pub use vessel::{
    Controls, DamageState, FailureState, Orientation, Position, Station, StationAction,
    StationAssignments, StationHolder, Velocity, Vessel, VesselMode, VesselProperties,
    VesselSnapshot, VesselStatus,
};

pub const SCHEMA_VERSION_V1: &str = "1.0";
pub const DEFAULT_SPACE_ID: &str = "global";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0)
    }
}

/// Per-space overrides; unset fields fall back to [`SimulationConfig`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpaceTuning {
    pub tick_interval_ms: Option<u64>,
    pub ai_grace_ms: Option<u64>,
    pub collision_distance_m: Option<f64>,
    pub near_miss_distance_m: Option<f64>,
    pub collision_cooldown_ms: Option<u64>,
    pub near_miss_cooldown_ms: Option<u64>,
    pub speed_violation_cooldown_ms: Option<u64>,
    pub collision_penalty: Option<i64>,
    pub near_miss_penalty: Option<i64>,
}

/// Fully resolved tuning for one space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tuning {
    pub tick_interval_ms: u64,
    pub ai_grace_ms: u64,
    pub collision_distance_m: f64,
    pub near_miss_distance_m: f64,
    pub collision_cooldown_ms: u64,
    pub near_miss_cooldown_ms: u64,
    pub speed_violation_cooldown_ms: u64,
    pub collision_penalty: i64,
    pub near_miss_penalty: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    pub schema_version: String,
    #[serde(with = "serde_u64_string")]
    pub seed: u64,
    pub tick_interval_ms: u64,
    pub ai_grace_ms: u64,
    pub persist_throttle_ms: u64,
    pub environment_persist_throttle_ms: u64,
    pub collision_distance_m: f64,
    pub near_miss_distance_m: f64,
    pub collision_cooldown_ms: u64,
    pub near_miss_cooldown_ms: u64,
    pub speed_violation_cooldown_ms: u64,
    pub default_collision_penalty: i64,
    pub default_near_miss_penalty: i64,
    pub max_crew: usize,
    pub spawn_spacing_m: f64,
    pub tick_worker_threads: u16,
    /// `0` disables automatic weather rotation.
    pub auto_weather_interval_ms: u64,
    pub space_overrides: BTreeMap<String, SpaceTuning>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            seed: 1337,
            tick_interval_ms: 200,
            ai_grace_ms: 30_000,
            persist_throttle_ms: 1_000,
            environment_persist_throttle_ms: 30_000,
            collision_distance_m: 50.0,
            near_miss_distance_m: 200.0,
            collision_cooldown_ms: 30_000,
            near_miss_cooldown_ms: 15_000,
            speed_violation_cooldown_ms: 20_000,
            default_collision_penalty: 500,
            default_near_miss_penalty: 150,
            max_crew: 4,
            spawn_spacing_m: 600.0,
            tick_worker_threads: 1,
            auto_weather_interval_ms: 0,
            space_overrides: BTreeMap::new(),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero (scope={scope})")]
    NonPositive { scope: String, field: &'static str },
    #[error("near_miss_distance_m must not be below collision_distance_m (scope={scope})")]
    ThresholdOrder { scope: String },
    #[error("{field} must be a finite number (scope={scope})")]
    NonFinite { scope: String, field: &'static str },
}

impl SimulationConfig {
    pub fn tuning_for(&self, space_id: &str) -> Tuning {
        let base = Tuning {
            tick_interval_ms: self.tick_interval_ms,
            ai_grace_ms: self.ai_grace_ms,
            collision_distance_m: self.collision_distance_m,
            near_miss_distance_m: self.near_miss_distance_m,
            collision_cooldown_ms: self.collision_cooldown_ms,
            near_miss_cooldown_ms: self.near_miss_cooldown_ms,
            speed_violation_cooldown_ms: self.speed_violation_cooldown_ms,
            collision_penalty: self.default_collision_penalty,
            near_miss_penalty: self.default_near_miss_penalty,
        };
        let Some(overrides) = self.space_overrides.get(space_id) else {
            return base;
        };
        Tuning {
            tick_interval_ms: overrides.tick_interval_ms.unwrap_or(base.tick_interval_ms),
            ai_grace_ms: overrides.ai_grace_ms.unwrap_or(base.ai_grace_ms),
            collision_distance_m: overrides
                .collision_distance_m
                .unwrap_or(base.collision_distance_m),
            near_miss_distance_m: overrides
                .near_miss_distance_m
                .unwrap_or(base.near_miss_distance_m),
            collision_cooldown_ms: overrides
                .collision_cooldown_ms
                .unwrap_or(base.collision_cooldown_ms),
            near_miss_cooldown_ms: overrides
                .near_miss_cooldown_ms
                .unwrap_or(base.near_miss_cooldown_ms),
            speed_violation_cooldown_ms: overrides
                .speed_violation_cooldown_ms
                .unwrap_or(base.speed_violation_cooldown_ms),
            collision_penalty: overrides.collision_penalty.unwrap_or(base.collision_penalty),
            near_miss_penalty: overrides.near_miss_penalty.unwrap_or(base.near_miss_penalty),
        }
    }

    /// Shortest cadence across the global value and every space override.
    pub fn driver_interval_ms(&self) -> u64 {
        self.space_overrides
            .values()
            .filter_map(|tuning| tuning.tick_interval_ms)
            .fold(self.tick_interval_ms, u64::min)
            .max(1)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_tuning("global", &self.tuning_for(""))?;
        if self.persist_throttle_ms == 0 {
            return Err(ConfigError::NonPositive {
                scope: "global".to_string(),
                field: "persist_throttle_ms",
            });
        }
        if self.max_crew == 0 {
            return Err(ConfigError::NonPositive {
                scope: "global".to_string(),
                field: "max_crew",
            });
        }
        for space_id in self.space_overrides.keys() {
            validate_tuning(space_id, &self.tuning_for(space_id))?;
        }
        Ok(())
    }
}

fn validate_tuning(scope: &str, tuning: &Tuning) -> Result<(), ConfigError> {
    if tuning.tick_interval_ms == 0 {
        return Err(ConfigError::NonPositive {
            scope: scope.to_string(),
            field: "tick_interval_ms",
        });
    }
    for (field, value) in [
        ("collision_distance_m", tuning.collision_distance_m),
        ("near_miss_distance_m", tuning.near_miss_distance_m),
    ] {
        if !value.is_finite() {
            return Err(ConfigError::NonFinite {
                scope: scope.to_string(),
                field,
            });
        }
        if value <= 0.0 {
            return Err(ConfigError::NonPositive {
                scope: scope.to_string(),
                field,
            });
        }
    }
    if tuning.near_miss_distance_m < tuning.collision_distance_m {
        return Err(ConfigError::ThresholdOrder {
            scope: scope.to_string(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    Banned,
    SpaceNotFound,
    InvalidMessage,
    InvalidCommand,
    Conflict,
    InternalError,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiError {
    pub schema_version: String,
    pub error_code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(error_code: ErrorCode, message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            error_code,
            message: message.into(),
            details,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.error_code, self.message)
    }
}
