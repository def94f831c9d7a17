use contracts::DamageState;

/// Hull integrity at or below this leaves the vessel disabled.
pub const DISABLED_HULL_INTEGRITY: f64 = 0.0;
/// Subsystems at or above this health recover from failures on their own.
pub const SELF_REPAIR_THRESHOLD: f64 = 0.5;
pub const HULL_BREACH_THRESHOLD: f64 = 0.6;
pub const MIN_COLLISION_SEVERITY: f64 = 0.1;
pub const COLLISION_SEVERITY_SPEED: f64 = 6.0;

const COLLISION_HULL_LOSS: f64 = 0.35;
const COLLISION_ENGINE_LOSS: f64 = 0.10;
const COLLISION_STEERING_LOSS: f64 = 0.15;
const COLLISION_ELECTRICAL_LOSS: f64 = 0.05;
const FAILURE_WEAR_PER_S: f64 = 0.000_5;
const FLOODING_HULL_LOSS_PER_S: f64 = 0.002;

const REPAIR_COST_HULL: f64 = 2_000.0;
const REPAIR_COST_ENGINE: f64 = 1_500.0;
const REPAIR_COST_STEERING: f64 = 1_000.0;
const REPAIR_COST_ELECTRICAL: f64 = 500.0;
const REPAIR_COST_FLOODING: f64 = 800.0;

pub fn collision_severity(relative_speed: f64) -> f64 {
    (relative_speed / COLLISION_SEVERITY_SPEED).clamp(MIN_COLLISION_SEVERITY, 1.0)
}

fn degrade(value: f64, loss: f64) -> f64 {
    (value - loss.max(0.0)).clamp(0.0, 1.0).min(value)
}

/// Damage only accumulates: every field moves toward disabled, never back.
pub fn apply_collision_damage(state: &DamageState, severity: f64) -> DamageState {
    let severity = severity.clamp(0.0, 1.0);
    DamageState {
        hull_integrity: degrade(state.hull_integrity, COLLISION_HULL_LOSS * severity),
        engine_health: degrade(state.engine_health, COLLISION_ENGINE_LOSS * severity),
        steering_health: degrade(state.steering_health, COLLISION_STEERING_LOSS * severity),
        electrical_health: degrade(
            state.electrical_health,
            COLLISION_ELECTRICAL_LOSS * severity,
        ),
        flooding_damage: state.flooding_damage,
    }
}

/// Wear from running with failed subsystems and from water ingress.
pub fn apply_operational_wear(
    state: &DamageState,
    engine_failed: bool,
    steering_failed: bool,
    flooding_level: f64,
    dt_s: f64,
) -> DamageState {
    let dt_s = dt_s.max(0.0);
    let mut next = *state;
    if engine_failed {
        next.engine_health = degrade(next.engine_health, FAILURE_WEAR_PER_S * dt_s);
    }
    if steering_failed {
        next.steering_health = degrade(next.steering_health, FAILURE_WEAR_PER_S * dt_s);
    }
    if flooding_level > 0.0 {
        next.hull_integrity = degrade(
            next.hull_integrity,
            FLOODING_HULL_LOSS_PER_S * flooding_level * dt_s,
        );
        next.flooding_damage = (next.flooding_damage.max(flooding_level)).clamp(0.0, 1.0);
    }
    next
}

pub fn is_disabled(state: &DamageState) -> bool {
    state.hull_integrity <= DISABLED_HULL_INTEGRITY
}

pub fn hull_breached(state: &DamageState) -> bool {
    state.hull_integrity < HULL_BREACH_THRESHOLD
}

pub fn is_damaged(state: &DamageState) -> bool {
    *state != DamageState::default()
}

pub fn repair_cost(state: &DamageState) -> i64 {
    let cost = (1.0 - state.hull_integrity) * REPAIR_COST_HULL
        + (1.0 - state.engine_health) * REPAIR_COST_ENGINE
        + (1.0 - state.steering_health) * REPAIR_COST_STEERING
        + (1.0 - state.electrical_health) * REPAIR_COST_ELECTRICAL
        + state.flooding_damage * REPAIR_COST_FLOODING;
    cost.max(0.0).round() as i64
}
