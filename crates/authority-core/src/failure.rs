use contracts::{Controls, DamageState, FailureState, FailureTransition};
use rand::Rng;

use crate::damage::{hull_breached, is_disabled, HULL_BREACH_THRESHOLD, SELF_REPAIR_THRESHOLD};

pub const ENGINE_FAILURE_RATE_PER_S: f64 = 1.0 / (8.0 * 3600.0);
pub const STEERING_FAILURE_RATE_PER_S: f64 = 1.0 / (12.0 * 3600.0);
pub const FLOODING_RATE_PER_S: f64 = 0.02;
pub const FLOODING_DRAIN_PER_S: f64 = 0.005;
pub const MIN_REPAIR_DELAY_MS: u64 = 120_000;
pub const ENGINE_RECOVERY_MEAN_S: f64 = 20.0 * 60.0;
pub const STEERING_RECOVERY_MEAN_S: f64 = 25.0 * 60.0;
pub const MAX_THROTTLE: f64 = 1.0;
pub const MAX_RUDDER_ANGLE: f64 = 0.6;

const DAMAGE_RISK_FACTOR: f64 = 4.0;
const MIN_DAMAGED_THROTTLE: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FailureInputs {
    pub dt_s: f64,
    pub now_ms: u64,
    pub throttle: f64,
    pub rudder_angle: f64,
    pub speed: f64,
}

fn engine_stress(throttle: f64) -> f64 {
    let throttle = throttle.abs();
    if throttle > 0.1 {
        0.2 + throttle * throttle * 1.2
    } else {
        0.0
    }
}

fn steering_stress(rudder_angle: f64, speed: f64) -> f64 {
    let rudder = rudder_angle.abs();
    if speed > 0.5 && rudder > 0.4 {
        rudder * (0.6 + (speed / 6.0).min(1.0))
    } else {
        0.0
    }
}

fn damage_risk(health: f64) -> f64 {
    (1.0 - health).clamp(0.0, 1.0) * DAMAGE_RISK_FACTOR
}

fn recovery_due(failed_at: Option<u64>, now_ms: u64) -> bool {
    failed_at.map_or(true, |at| now_ms.saturating_sub(at) >= MIN_REPAIR_DELAY_MS)
}

fn recovery_chance(dt_s: f64, mean_s: f64) -> f64 {
    1.0 - (-dt_s / mean_s).exp()
}

/// Advances failure flags by one step. Only flips are reported, so a failure
/// that persists across ticks yields exactly one transition.
pub fn evolve_failures<R: Rng + ?Sized>(
    state: &mut FailureState,
    damage: &DamageState,
    inputs: &FailureInputs,
    rng: &mut R,
) -> Vec<FailureTransition> {
    let mut transitions = Vec::new();
    let dt_s = inputs.dt_s.max(0.0);
    if dt_s == 0.0 {
        return transitions;
    }

    if state.engine_failed {
        if damage.engine_health >= SELF_REPAIR_THRESHOLD
            && recovery_due(state.engine_failed_at, inputs.now_ms)
            && rng.gen::<f64>() < recovery_chance(dt_s, ENGINE_RECOVERY_MEAN_S)
        {
            state.engine_failed = false;
            state.engine_failed_at = None;
            transitions.push(FailureTransition::EngineRestored);
        }
    } else {
        let stress = engine_stress(inputs.throttle) + damage_risk(damage.engine_health);
        if stress > 0.0 && rng.gen::<f64>() < ENGINE_FAILURE_RATE_PER_S * dt_s * stress {
            state.engine_failed = true;
            state.engine_failed_at = Some(inputs.now_ms);
            transitions.push(FailureTransition::EngineFailed);
        }
    }

    if state.steering_failed {
        if damage.steering_health >= SELF_REPAIR_THRESHOLD
            && recovery_due(state.steering_failed_at, inputs.now_ms)
            && rng.gen::<f64>() < recovery_chance(dt_s, STEERING_RECOVERY_MEAN_S)
        {
            state.steering_failed = false;
            state.steering_failed_at = None;
            state.jammed_rudder = None;
            transitions.push(FailureTransition::SteeringRestored);
        }
    } else {
        let stress = steering_stress(inputs.rudder_angle, inputs.speed)
            + damage_risk(damage.steering_health);
        if stress > 0.0 && rng.gen::<f64>() < STEERING_FAILURE_RATE_PER_S * dt_s * stress {
            state.steering_failed = true;
            state.steering_failed_at = Some(inputs.now_ms);
            state.jammed_rudder = Some(inputs.rudder_angle);
            transitions.push(FailureTransition::SteeringFailed);
        }
    }

    let was_flooding = state.flooding_level > 0.0;
    if hull_breached(damage) {
        let breach = ((HULL_BREACH_THRESHOLD - damage.hull_integrity) / HULL_BREACH_THRESHOLD)
            .clamp(0.0, 1.0);
        state.flooding_level =
            (state.flooding_level + FLOODING_RATE_PER_S * breach.max(0.05) * dt_s).min(1.0);
    } else if was_flooding {
        state.flooding_level = (state.flooding_level - FLOODING_DRAIN_PER_S * dt_s).max(0.0);
    }
    let is_flooding = state.flooding_level > 0.0;
    if !was_flooding && is_flooding {
        transitions.push(FailureTransition::FloodingStarted);
    } else if was_flooding && !is_flooding {
        transitions.push(FailureTransition::FloodingCleared);
    }

    transitions
}

/// Clamps requested controls and applies the limits imposed by failures and damage.
pub fn limit_controls(requested: Controls, failure: &FailureState, damage: &DamageState) -> Controls {
    let mut throttle = requested.throttle.clamp(-MAX_THROTTLE, MAX_THROTTLE);
    let mut rudder_angle = requested
        .rudder_angle
        .clamp(-MAX_RUDDER_ANGLE, MAX_RUDDER_ANGLE);

    if failure.engine_failed || is_disabled(damage) {
        throttle = 0.0;
    } else {
        let ceiling = damage.engine_health.max(MIN_DAMAGED_THROTTLE);
        throttle = throttle.clamp(-ceiling, ceiling);
    }
    if failure.steering_failed {
        rudder_angle = failure.jammed_rudder.unwrap_or(rudder_angle);
    }

    Controls {
        throttle,
        rudder_angle,
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::mock::StepRng;

    use super::*;

    fn always() -> StepRng {
        StepRng::new(0, 0)
    }

    fn never() -> StepRng {
        StepRng::new(u64::MAX, 0)
    }

    fn inputs(now_ms: u64) -> FailureInputs {
        FailureInputs {
            dt_s: 0.2,
            now_ms,
            throttle: 0.9,
            rudder_angle: 0.5,
            speed: 4.0,
        }
    }

    #[test]
    fn failure_transition_fires_once_while_condition_persists() {
        let mut state = FailureState::default();
        let damage = DamageState::default();
        let first = evolve_failures(&mut state, &damage, &inputs(0), &mut always());
        assert!(first.contains(&FailureTransition::EngineFailed));
        assert!(first.contains(&FailureTransition::SteeringFailed));
        assert_eq!(state.jammed_rudder, Some(0.5));

        let second = evolve_failures(&mut state, &damage, &inputs(200), &mut never());
        assert!(second.is_empty());
        assert!(state.engine_failed);
    }

    #[test]
    fn undamaged_vessel_recovers_only_after_delay() {
        let mut state = FailureState {
            engine_failed: true,
            engine_failed_at: Some(0),
            ..FailureState::default()
        };
        let damage = DamageState::default();
        let early = evolve_failures(&mut state, &damage, &inputs(1_000), &mut always());
        assert!(!early.contains(&FailureTransition::EngineRestored));

        let late = evolve_failures(
            &mut state,
            &damage,
            &inputs(MIN_REPAIR_DELAY_MS),
            &mut always(),
        );
        assert!(late.contains(&FailureTransition::EngineRestored));
        assert!(!state.engine_failed);
    }

    #[test]
    fn heavily_damaged_engine_does_not_recover() {
        let mut state = FailureState {
            engine_failed: true,
            engine_failed_at: Some(0),
            ..FailureState::default()
        };
        let damage = DamageState {
            engine_health: 0.2,
            ..DamageState::default()
        };
        let transitions = evolve_failures(&mut state, &damage, &inputs(10_000_000), &mut always());
        assert!(!transitions.contains(&FailureTransition::EngineRestored));
    }

    #[test]
    fn breached_hull_floods_then_drains_after_repair() {
        let mut state = FailureState::default();
        let breached = DamageState {
            hull_integrity: 0.3,
            ..DamageState::default()
        };
        let started = evolve_failures(&mut state, &breached, &inputs(0), &mut never());
        assert_eq!(started, vec![FailureTransition::FloodingStarted]);

        let sound = DamageState::default();
        let mut cleared = Vec::new();
        for step in 1..1_000 {
            cleared = evolve_failures(&mut state, &sound, &inputs(step * 200), &mut never());
            if !cleared.is_empty() {
                break;
            }
        }
        assert_eq!(cleared, vec![FailureTransition::FloodingCleared]);
        assert_eq!(state.flooding_level, 0.0);
    }

    #[test]
    fn limits_follow_failures() {
        let failure = FailureState {
            engine_failed: true,
            steering_failed: true,
            jammed_rudder: Some(0.2),
            ..FailureState::default()
        };
        let limited = limit_controls(
            Controls {
                throttle: 2.0,
                rudder_angle: -1.0,
            },
            &failure,
            &DamageState::default(),
        );
        assert_eq!(limited.throttle, 0.0);
        assert_eq!(limited.rudder_angle, 0.2);

        let free = limit_controls(
            Controls {
                throttle: 2.0,
                rudder_angle: -1.0,
            },
            &FailureState::default(),
            &DamageState::default(),
        );
        assert_eq!(free.throttle, 1.0);
        assert_eq!(free.rudder_angle, -MAX_RUDDER_ANGLE);
    }
}
