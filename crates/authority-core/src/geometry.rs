//! Planar kinematics in local metres. Headings are radians counter-clockwise
//! from +x; relative bearings are clockwise from the bow, in `[0, 2π)`.

use std::f64::consts::TAU;

use contracts::{Position, Vessel};

const AI_VELOCITY_DAMPING: f64 = 0.6;
const AI_SUBSTEP_S: f64 = 1.0 / 60.0;
const AI_REST_SPEED: f64 = 1e-3;

pub fn normalize_angle(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(TAU);
    if wrapped >= TAU {
        0.0
    } else {
        wrapped
    }
}

/// Body-frame surge/sway rotated into world coordinates.
pub fn world_velocity(vessel: &Vessel) -> (f64, f64) {
    let (sin_h, cos_h) = vessel.orientation.heading.sin_cos();
    let surge = vessel.velocity.surge;
    let sway = vessel.velocity.sway;
    (surge * cos_h - sway * sin_h, surge * sin_h + sway * cos_h)
}

pub fn distance(a: &Position, b: &Position) -> f64 {
    (b.x - a.x).hypot(b.y - a.y)
}

/// Rate at which the separation shrinks; positive while approaching.
pub fn closing_speed(a: &Vessel, b: &Vessel) -> f64 {
    let dx = b.position.x - a.position.x;
    let dy = b.position.y - a.position.y;
    let separation = dx.hypot(dy);
    if separation <= f64::EPSILON {
        return relative_speed(a, b);
    }
    let (avx, avy) = world_velocity(a);
    let (bvx, bvy) = world_velocity(b);
    let rvx = bvx - avx;
    let rvy = bvy - avy;
    -(dx * rvx + dy * rvy) / separation
}

pub fn relative_speed(a: &Vessel, b: &Vessel) -> f64 {
    let (avx, avy) = world_velocity(a);
    let (bvx, bvy) = world_velocity(b);
    (bvx - avx).hypot(bvy - avy)
}

/// Bearing of `target` as seen from `observer`, clockwise from the observer's bow.
pub fn relative_bearing(observer: &Vessel, target: &Vessel) -> f64 {
    let dx = target.position.x - observer.position.x;
    let dy = target.position.y - observer.position.y;
    let absolute = dy.atan2(dx);
    normalize_angle(observer.orientation.heading - absolute)
}

/// Smallest absolute difference between two headings, in `[0, π]`.
pub fn heading_difference(a: f64, b: f64) -> f64 {
    let diff = normalize_angle(a - b);
    if diff > std::f64::consts::PI {
        TAU - diff
    } else {
        diff
    }
}

/// Coasts an AI vessel for `dt_s`; returns whether its position changed.
pub fn coast(vessel: &mut Vessel, dt_s: f64) -> bool {
    if dt_s <= 0.0 {
        return false;
    }
    if vessel.velocity.speed() < AI_REST_SPEED {
        vessel.velocity.surge = 0.0;
        vessel.velocity.sway = 0.0;
        return false;
    }

    let steps = (dt_s / AI_SUBSTEP_S).ceil().max(1.0) as u32;
    let h = dt_s / f64::from(steps);
    let decay = (-AI_VELOCITY_DAMPING * h).exp();
    for _ in 0..steps {
        vessel.velocity.surge *= decay;
        vessel.velocity.sway *= decay;
        let (vx, vy) = world_velocity(vessel);
        vessel.position.x += vx * h;
        vessel.position.y += vy * h;
    }
    true
}

#[cfg(test)]
mod tests {
    use std::f64::consts::{FRAC_PI_2, PI};

    use super::*;

    fn vessel_at(x: f64, y: f64, heading: f64, surge: f64) -> Vessel {
        let mut vessel = Vessel::new("v", "s", Position { x, y, z: 0.0 }, 0);
        vessel.orientation.heading = heading;
        vessel.velocity.surge = surge;
        vessel
    }

    #[test]
    fn head_on_vessels_close_at_combined_speed() {
        let a = vessel_at(0.0, 0.0, 0.0, 5.0);
        let b = vessel_at(100.0, 0.0, PI, 5.0);
        assert!((closing_speed(&a, &b) - 10.0).abs() < 1e-9);
        assert!(relative_bearing(&a, &b).abs() < 1e-9);
    }

    #[test]
    fn starboard_target_has_quarter_turn_bearing() {
        let observer = vessel_at(0.0, 0.0, FRAC_PI_2, 1.0);
        let target = vessel_at(100.0, 0.0, PI, 1.0);
        assert!((relative_bearing(&observer, &target) - FRAC_PI_2).abs() < 1e-9);
    }

    #[test]
    fn diverging_vessels_have_negative_closing_speed() {
        let a = vessel_at(0.0, 0.0, PI, 3.0);
        let b = vessel_at(50.0, 0.0, 0.0, 3.0);
        assert!(closing_speed(&a, &b) < 0.0);
    }

    #[test]
    fn coast_decays_speed_and_moves_forward() {
        let mut vessel = vessel_at(0.0, 0.0, 0.0, 4.0);
        assert!(coast(&mut vessel, 1.0));
        assert!(vessel.position.x > 0.0 && vessel.position.x < 4.0);
        assert!((vessel.velocity.surge - 4.0 * (-0.6_f64).exp()).abs() < 1e-6);
        assert!(vessel.position.y.abs() < 1e-9);
    }
}
