use std::f64::consts::FRAC_PI_4;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Wind {
    /// Metres per second.
    pub speed: f64,
    /// Radians, direction the wind blows from.
    pub direction: f64,
    pub gusting: bool,
    pub gust_factor: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Current {
    pub speed: f64,
    pub direction: f64,
    pub variability: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TideTrend {
    #[default]
    Rising,
    Falling,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Tide {
    pub height: f64,
    pub range: f64,
    pub phase: f64,
    pub trend: TideTrend,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Precipitation {
    #[default]
    None,
    Rain,
    Snow,
    Fog,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Environment {
    pub wind: Wind,
    pub current: Current,
    pub sea_state: u8,
    pub tide: Tide,
    /// Scales the harmonic tide when set.
    #[serde(default)]
    pub tide_range_override: Option<f64>,
    /// Hours, `[0, 24)`.
    pub time_of_day: f64,
    pub precipitation: Precipitation,
    pub precipitation_intensity: f64,
    /// Nautical miles.
    pub visibility: f64,
    pub water_depth: f64,
    #[serde(default)]
    pub name: Option<String>,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            wind: Wind {
                speed: 5.0,
                direction: 0.0,
                gusting: false,
                gust_factor: 1.5,
            },
            current: Current {
                speed: 0.5,
                direction: FRAC_PI_4,
                variability: 0.0,
            },
            sea_state: 3,
            tide: Tide::default(),
            tide_range_override: None,
            time_of_day: 12.0,
            precipitation: Precipitation::None,
            precipitation_intensity: 0.0,
            visibility: 10.0,
            water_depth: 100.0,
            name: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct WindPatch {
    pub speed: Option<f64>,
    pub direction: Option<f64>,
    pub gusting: Option<bool>,
    pub gust_factor: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CurrentPatch {
    pub speed: Option<f64>,
    pub direction: Option<f64>,
    pub variability: Option<f64>,
}

/// Deep-partial environment; unset fields are left untouched when applied.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wind: Option<WindPatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<CurrentPatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sea_state: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tide_range: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_of_day: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precipitation: Option<Precipitation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precipitation_intensity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub water_depth: Option<f64>,
    /// An empty name clears the environment's name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl EnvironmentPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Admin override: a named preset, an explicit patch, or both (preset first).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WeatherOverride {
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub patch: Option<EnvironmentPatch>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduledEnvironmentEvent {
    pub id: String,
    pub space_id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Weather preset applied before `payload`.
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub payload: Option<EnvironmentPatch>,
    pub run_at: u64,
    #[serde(default)]
    pub end_at: Option<u64>,
    #[serde(default)]
    pub end_payload: Option<EnvironmentPatch>,
    /// Pre-event values recorded at apply time when no `end_payload` was given.
    #[serde(default)]
    pub captured_restore: Option<EnvironmentPatch>,
    #[serde(default)]
    pub executed_at: Option<u64>,
    #[serde(default)]
    pub ended_at: Option<u64>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl ScheduledEnvironmentEvent {
    pub fn is_pending(&self) -> bool {
        self.enabled && self.executed_at.is_none()
    }

    pub fn is_finished(&self) -> bool {
        self.ended_at.is_some() || (self.executed_at.is_some() && self.end_at.is_none())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleEventRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub payload: Option<EnvironmentPatch>,
    pub run_at: u64,
    #[serde(default)]
    pub end_at: Option<u64>,
    #[serde(default)]
    pub end_payload: Option<EnvironmentPatch>,
}
