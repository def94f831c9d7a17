//! Per-tick proximity rules: collision and near-miss detection, COLREGS fault
//! assignment, collision damage and speed-limit enforcement.

use std::collections::{BTreeMap, BTreeSet};
use std::f64::consts::PI;

use contracts::{
    ChargeReason, EconomyAdjustment, EconomyCharge, RuleContext, Tuning, Vessel, VesselMode,
};
use serde::Serialize;
use serde_json::json;

use crate::cooldown::{CooldownKey, CooldownKind, CooldownTracker};
use crate::damage::{apply_collision_damage, collision_severity};
use crate::geometry::{closing_speed, distance, heading_difference, relative_bearing, relative_speed};

pub const COLLISION_SAFETY_DELTA: f64 = -0.15;
pub const NEAR_MISS_SAFETY_DELTA: f64 = -0.05;
pub const SPEED_VIOLATION_SAFETY_DELTA: f64 = -0.05;

const HEAD_ON_SECTOR: f64 = 10.0 * PI / 180.0;
const RECIPROCAL_TOLERANCE: f64 = 15.0 * PI / 180.0;
const STERN_SECTOR_START: f64 = 112.5 * PI / 180.0;
const STERN_SECTOR_END: f64 = 247.5 * PI / 180.0;
const UNDERWAY_SPEED: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Encounter {
    HeadOn,
    Crossing { give_way: Vec<String> },
    Overtaking { overtaking: String },
    Undetermined,
}

fn in_stern_sector(bearing: f64) -> bool {
    bearing > STERN_SECTOR_START && bearing < STERN_SECTOR_END
}

fn on_starboard_bow(bearing: f64) -> bool {
    bearing > 0.0 && bearing < STERN_SECTOR_START
}

fn ahead(bearing: f64) -> bool {
    bearing < HEAD_ON_SECTOR || bearing > 2.0 * PI - HEAD_ON_SECTOR
}

/// Rule 13 (overtaking) before rule 14 (head-on) before rule 15 (crossing).
/// A vessel that is not underway stands on against one that is.
pub fn classify_encounter(a: &Vessel, b: &Vessel) -> Encounter {
    let a_underway = a.speed() >= UNDERWAY_SPEED;
    let b_underway = b.speed() >= UNDERWAY_SPEED;
    match (a_underway, b_underway) {
        (true, false) => {
            return Encounter::Crossing {
                give_way: vec![a.id.clone()],
            }
        }
        (false, true) => {
            return Encounter::Crossing {
                give_way: vec![b.id.clone()],
            }
        }
        (false, false) => return Encounter::Undetermined,
        (true, true) => {}
    }

    let bearing_ab = relative_bearing(a, b);
    let bearing_ba = relative_bearing(b, a);

    if in_stern_sector(bearing_ba) && !in_stern_sector(bearing_ab) {
        return Encounter::Overtaking {
            overtaking: a.id.clone(),
        };
    }
    if in_stern_sector(bearing_ab) && !in_stern_sector(bearing_ba) {
        return Encounter::Overtaking {
            overtaking: b.id.clone(),
        };
    }

    let reciprocal =
        heading_difference(a.orientation.heading, b.orientation.heading) > PI - RECIPROCAL_TOLERANCE;
    if ahead(bearing_ab) && ahead(bearing_ba) && reciprocal {
        return Encounter::HeadOn;
    }

    let mut give_way = Vec::new();
    if on_starboard_bow(bearing_ab) {
        give_way.push(a.id.clone());
    }
    if on_starboard_bow(bearing_ba) {
        give_way.push(b.id.clone());
    }
    if give_way.is_empty() {
        Encounter::Undetermined
    } else {
        Encounter::Crossing { give_way }
    }
}

/// Vessels held responsible for the encounter. Head-on and undetermined
/// encounters blame both.
pub fn at_fault(encounter: &Encounter, a: &Vessel, b: &Vessel) -> Vec<String> {
    match encounter {
        Encounter::HeadOn | Encounter::Undetermined => vec![a.id.clone(), b.id.clone()],
        Encounter::Crossing { give_way } => give_way.clone(),
        Encounter::Overtaking { overtaking } => vec![overtaking.clone()],
    }
}

pub fn collision_threshold(a: &Vessel, b: &Vessel, tuning: &Tuning) -> f64 {
    let hull = (a.properties.length + b.properties.length) / 4.0;
    tuning.collision_distance_m.max(hull)
}

pub fn near_miss_threshold(a: &Vessel, b: &Vessel, tuning: &Tuning) -> f64 {
    tuning
        .near_miss_distance_m
        .max(collision_threshold(a, b, tuning) * 2.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    Collision,
    NearMiss,
    SpeedViolation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Incident {
    pub kind: IncidentKind,
    pub space_id: String,
    pub vessel_ids: Vec<String>,
    pub distance_m: Option<f64>,
    pub closing_speed: Option<f64>,
    pub speed_knots: Option<f64>,
    pub encounter: Option<Encounter>,
    pub charged_users: Vec<String>,
    pub severity: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleOutcome {
    pub incidents: Vec<Incident>,
    pub charges: Vec<EconomyCharge>,
    pub damaged: BTreeSet<String>,
}

fn penalty(explicit: Option<i64>, fallback: i64) -> i64 {
    explicit.filter(|value| *value > 0).unwrap_or(fallback)
}

/// Ledger owner for a vessel: only crewed player vessels with an owner are charged.
fn charge_user(vessel: &Vessel) -> Option<&str> {
    if vessel.mode != VesselMode::Player {
        return None;
    }
    vessel.owner_id.as_deref()
}

struct PairFinding {
    a: String,
    b: String,
    kind: IncidentKind,
    distance_m: f64,
    closing_speed: f64,
    relative_speed: f64,
    encounter: Encounter,
    at_fault: Vec<String>,
}

fn assess_pair(a: &Vessel, b: &Vessel, tuning: &Tuning) -> Option<PairFinding> {
    let separation = distance(&a.position, &b.position);
    let closing = closing_speed(a, b);
    let kind = if separation < collision_threshold(a, b, tuning) {
        IncidentKind::Collision
    } else if separation < near_miss_threshold(a, b, tuning) && closing > 0.0 {
        IncidentKind::NearMiss
    } else {
        return None;
    };
    let encounter = classify_encounter(a, b);
    Some(PairFinding {
        a: a.id.clone(),
        b: b.id.clone(),
        kind,
        distance_m: separation,
        closing_speed: closing,
        relative_speed: relative_speed(a, b),
        at_fault: at_fault(&encounter, a, b),
        encounter,
    })
}

/// Evaluates every pair of active vessels, then speed limits. A pair (or a
/// vessel, for speed) produces consequences at most once per cooldown window.
pub fn evaluate(
    space_id: &str,
    vessels: &mut BTreeMap<String, Vessel>,
    rules: &RuleContext,
    tuning: &Tuning,
    cooldowns: &mut CooldownTracker,
    now_ms: u64,
) -> RuleOutcome {
    let mut outcome = RuleOutcome::default();

    let active: Vec<&Vessel> = vessels.values().filter(|vessel| vessel.is_active()).collect();
    let mut findings = Vec::new();
    for (index, a) in active.iter().enumerate() {
        for b in &active[index + 1..] {
            if let Some(finding) = assess_pair(a, b, tuning) {
                findings.push(finding);
            }
        }
    }

    for finding in findings {
        let (cooldown_kind, window_ms) = match finding.kind {
            IncidentKind::Collision => (CooldownKind::Collision, tuning.collision_cooldown_ms),
            _ => (CooldownKind::NearMiss, tuning.near_miss_cooldown_ms),
        };
        let key = CooldownKey::pair(cooldown_kind, &finding.a, &finding.b);
        if !cooldowns.try_trigger(key, now_ms, window_ms) {
            continue;
        }

        let severity = (finding.kind == IncidentKind::Collision && rules.realism.damage)
            .then(|| collision_severity(finding.relative_speed));
        if let Some(severity) = severity {
            for vessel_id in [&finding.a, &finding.b] {
                if let Some(vessel) = vessels.get_mut(vessel_id) {
                    vessel.damage = apply_collision_damage(&vessel.damage, severity);
                    vessel.last_update = now_ms;
                    outcome.damaged.insert(vessel_id.clone());
                }
            }
        }

        let mut charged_users = Vec::new();
        if rules.colregs_enabled {
            let (reason, amount, safety_delta) = match finding.kind {
                IncidentKind::Collision => (
                    ChargeReason::Collision,
                    penalty(rules.collision_penalty, tuning.collision_penalty),
                    COLLISION_SAFETY_DELTA,
                ),
                _ => (
                    ChargeReason::NearMiss,
                    penalty(rules.near_miss_penalty, tuning.near_miss_penalty),
                    NEAR_MISS_SAFETY_DELTA,
                ),
            };
            for vessel_id in &finding.at_fault {
                let other = if *vessel_id == finding.a { &finding.b } else { &finding.a };
                let Some(user_id) = vessels.get(vessel_id).and_then(charge_user) else {
                    continue;
                };
                charged_users.push(user_id.to_string());
                outcome.charges.push(EconomyCharge {
                    user_id: user_id.to_string(),
                    space_id: space_id.to_string(),
                    adjustment: EconomyAdjustment {
                        delta_credits: -amount,
                        delta_safety_score: safety_delta,
                        reason,
                        vessel_id: Some(vessel_id.clone()),
                        meta: Some(json!({
                            "other_vessel": other,
                            "distance_m": finding.distance_m,
                            "encounter": finding.encounter,
                        })),
                    },
                });
            }
        }

        outcome.incidents.push(Incident {
            kind: finding.kind,
            space_id: space_id.to_string(),
            vessel_ids: vec![finding.a, finding.b],
            distance_m: Some(finding.distance_m),
            closing_speed: Some(finding.closing_speed),
            speed_knots: None,
            encounter: Some(finding.encounter),
            charged_users,
            severity,
        });
    }

    if rules.colregs_enabled {
        if let Some(limit) = rules.max_speed_knots.filter(|limit| *limit > 0.0) {
            enforce_speed_limit(space_id, vessels, rules, tuning, cooldowns, limit, now_ms, &mut outcome);
        }
    }

    outcome
}

#[allow(clippy::too_many_arguments)]
fn enforce_speed_limit(
    space_id: &str,
    vessels: &BTreeMap<String, Vessel>,
    rules: &RuleContext,
    tuning: &Tuning,
    cooldowns: &mut CooldownTracker,
    limit_knots: f64,
    now_ms: u64,
    outcome: &mut RuleOutcome,
) {
    let amount = penalty(rules.near_miss_penalty, tuning.near_miss_penalty);
    for vessel in vessels.values().filter(|vessel| vessel.is_active()) {
        let speed_knots = vessel.speed_knots();
        if speed_knots <= limit_knots {
            continue;
        }
        let Some(user_id) = charge_user(vessel) else {
            continue;
        };
        let key = CooldownKey::vessel(CooldownKind::SpeedViolation, &vessel.id);
        if !cooldowns.try_trigger(key, now_ms, tuning.speed_violation_cooldown_ms) {
            continue;
        }
        outcome.charges.push(EconomyCharge {
            user_id: user_id.to_string(),
            space_id: space_id.to_string(),
            adjustment: EconomyAdjustment {
                delta_credits: -amount,
                delta_safety_score: SPEED_VIOLATION_SAFETY_DELTA,
                reason: ChargeReason::SpeedViolation,
                vessel_id: Some(vessel.id.clone()),
                meta: Some(json!({ "speed_knots": speed_knots, "max_speed_knots": limit_knots })),
            },
        });
        outcome.incidents.push(Incident {
            kind: IncidentKind::SpeedViolation,
            space_id: space_id.to_string(),
            vessel_ids: vec![vessel.id.clone()],
            distance_m: None,
            closing_speed: None,
            speed_knots: Some(speed_knots),
            encounter: None,
            charged_users: vec![user_id.to_string()],
            severity: None,
        });
    }
}
