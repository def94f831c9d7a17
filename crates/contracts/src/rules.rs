use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RealismFlags {
    pub damage: bool,
    pub failures: bool,
}

impl Default for RealismFlags {
    fn default() -> Self {
        Self {
            damage: true,
            failures: false,
        }
    }
}

/// Per-space rules, sourced from space metadata and cached until refreshed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RuleContext {
    #[serde(default)]
    pub colregs_enabled: bool,
    #[serde(default)]
    pub max_speed_knots: Option<f64>,
    #[serde(default)]
    pub collision_penalty: Option<i64>,
    #[serde(default)]
    pub near_miss_penalty: Option<i64>,
    #[serde(default)]
    pub realism: RealismFlags,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChargeReason {
    Collision,
    NearMiss,
    SpeedViolation,
    Repair,
}

impl fmt::Display for ChargeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Collision => "collision",
            Self::NearMiss => "near_miss",
            Self::SpeedViolation => "speed_violation",
            Self::Repair => "repair",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EconomyAdjustment {
    pub delta_credits: i64,
    pub delta_safety_score: f64,
    pub reason: ChargeReason,
    #[serde(default)]
    pub vessel_id: Option<String>,
    #[serde(default)]
    pub meta: Option<Value>,
}

/// A ledger adjustment the authority has decided on for one user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EconomyCharge {
    pub user_id: String,
    pub space_id: String,
    pub adjustment: EconomyAdjustment,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EconomyProfile {
    pub user_id: String,
    pub credits: i64,
    pub safety_score: f64,
    pub rank: u32,
    pub experience: u64,
}

impl EconomyProfile {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            credits: 0,
            safety_score: 1.0,
            rank: 1,
            experience: 0,
        }
    }

    /// Applies `adjustment` with the safety score clamped to `[0, 2]`.
    pub fn apply(&mut self, adjustment: &EconomyAdjustment) {
        self.credits += adjustment.delta_credits;
        self.safety_score = (self.safety_score + adjustment.delta_safety_score).clamp(0.0, 2.0);
    }
}
