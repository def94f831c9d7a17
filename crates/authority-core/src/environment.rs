//! Per-space weather: drift, harmonic tides, presets, admin patches and the
//! scheduled-event lifecycle (pending, applied, ended).

use std::f64::consts::{PI, TAU};

use contracts::{
    CurrentPatch, Environment, EnvironmentPatch, Precipitation, ScheduledEnvironmentEvent, Tide,
    TideTrend, WindPatch,
};
use rand::Rng;

use crate::geometry::normalize_angle;

const MS_PER_HOUR: f64 = 3_600_000.0;
const MAX_SEA_STATE: u8 = 12;
const WIND_DIRECTION_DRIFT: f64 = 0.02;
const CURRENT_DRIFT: f64 = 0.05;
const CHANGE_EPSILON: f64 = 1e-4;

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum EnvironmentError {
    #[error("invalid {field}: {reason}")]
    InvalidPatch { field: &'static str, reason: String },
    #[error("unknown weather preset {0:?}")]
    UnknownPreset(String),
    #[error("scheduled event {event_id} is invalid: {reason}")]
    InvalidEvent { event_id: String, reason: String },
    #[error("scheduled event {0} already exists")]
    DuplicateEvent(String),
}

struct Constituent {
    period_hours: f64,
    amplitude_m: f64,
    phase_offset: f64,
}

const TIDE_CONSTITUENTS: [Constituent; 4] = [
    Constituent {
        period_hours: 12.4206,
        amplitude_m: 0.6,
        phase_offset: 0.0,
    },
    Constituent {
        period_hours: 12.0,
        amplitude_m: 0.35,
        phase_offset: 0.3,
    },
    Constituent {
        period_hours: 23.9345,
        amplitude_m: 0.25,
        phase_offset: 1.1,
    },
    Constituent {
        period_hours: 25.8193,
        amplitude_m: 0.18,
        phase_offset: 2.2,
    },
];

/// FNV-1a over the space id; seeds the per-space tide phase and amplitude.
pub fn space_hash(space_id: &str) -> u32 {
    space_id.bytes().fold(0x811c_9dc5_u32, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(0x0100_0193)
    })
}

fn tide_height_at(hours: f64, phase: f64, amplitude_scale: f64) -> f64 {
    TIDE_CONSTITUENTS
        .iter()
        .enumerate()
        .map(|(index, constituent)| {
            let offset = (phase + constituent.phase_offset + index as f64 * 0.17) * TAU;
            constituent.amplitude_m
                * amplitude_scale
                * (TAU * hours / constituent.period_hours + offset).sin()
        })
        .sum()
}

pub fn compute_tide(timestamp_ms: u64, space_id: &str, range_override: Option<f64>) -> Tide {
    let seed = space_hash(space_id);
    let phase = f64::from(seed % 10_000) / 10_000.0;
    let amplitude_scale = 0.6 + f64::from((seed >> 8) % 1_000) / 1_000.0;
    let hours = timestamp_ms as f64 / MS_PER_HOUR;

    let natural_range: f64 = 2.0
        * TIDE_CONSTITUENTS
            .iter()
            .map(|constituent| constituent.amplitude_m * amplitude_scale)
            .sum::<f64>();
    let scale = match range_override {
        Some(range) if range > 0.0 && natural_range > 0.0 => range / natural_range,
        _ => 1.0,
    };

    let height = tide_height_at(hours, phase, amplitude_scale) * scale;
    let ahead = tide_height_at(hours + 0.25, phase, amplitude_scale) * scale;
    let m2_period = TIDE_CONSTITUENTS[0].period_hours;

    Tide {
        height,
        range: natural_range * scale,
        phase: (hours / m2_period).rem_euclid(1.0),
        trend: if ahead - height >= 0.0 {
            TideTrend::Rising
        } else {
            TideTrend::Falling
        },
    }
}

pub const PRESET_NAMES: [&str; 7] = [
    "calm", "moderate", "stormy", "hurricane", "night", "foggy", "winter",
];

#[allow(clippy::too_many_arguments)]
fn weather(
    name: &str,
    wind: (f64, f64, bool, f64),
    current: (f64, f64, f64),
    sea_state: u8,
    visibility: f64,
    time_of_day: f64,
    precipitation: Precipitation,
    precipitation_intensity: f64,
) -> EnvironmentPatch {
    EnvironmentPatch {
        wind: Some(WindPatch {
            speed: Some(wind.0),
            direction: Some(wind.1),
            gusting: Some(wind.2),
            gust_factor: Some(wind.3),
        }),
        current: Some(CurrentPatch {
            speed: Some(current.0),
            direction: Some(current.1),
            variability: Some(current.2),
        }),
        sea_state: Some(sea_state),
        tide_range: None,
        time_of_day: Some(time_of_day),
        precipitation: Some(precipitation),
        precipitation_intensity: Some(precipitation_intensity),
        visibility: Some(visibility),
        water_depth: Some(100.0),
        name: Some(name.to_string()),
    }
}

pub fn weather_preset(name: &str) -> Option<EnvironmentPatch> {
    let patch = match name.trim().to_ascii_lowercase().as_str() {
        "calm" => weather("Calm", (2.0, 0.0, false, 1.2), (0.2, PI / 4.0, 0.1), 1, 10.0, 12.0, Precipitation::None, 0.0),
        "moderate" => weather("Moderate", (8.0, PI / 6.0, true, 1.5), (0.8, PI / 3.0, 0.2), 3, 8.0, 14.0, Precipitation::None, 0.0),
        "stormy" => weather("Stormy", (15.0, PI / 2.0, true, 2.0), (1.5, PI / 2.0, 0.4), 6, 3.0, 16.0, Precipitation::Rain, 0.6),
        "hurricane" => weather("Hurricane", (25.0, PI * 0.7, true, 2.5), (2.5, PI * 0.7, 0.6), 8, 1.0, 15.0, Precipitation::Rain, 0.9),
        "night" => weather("Night", (5.0, 0.0, false, 1.3), (0.5, PI / 6.0, 0.1), 2, 6.0, 23.0, Precipitation::None, 0.0),
        "foggy" => weather("Foggy", (3.0, 0.0, false, 1.2), (0.3, 0.0, 0.1), 1, 0.5, 10.0, Precipitation::Fog, 0.8),
        "winter" => weather("Winter", (10.0, PI * 1.5, true, 1.8), (1.0, PI * 1.5, 0.3), 4, 2.0, 14.0, Precipitation::Snow, 0.7),
        _ => return None,
    };
    Some(patch)
}

pub fn random_weather<R: Rng + ?Sized>(rng: &mut R) -> EnvironmentPatch {
    let wind_speed = rng.gen::<f64>() * 25.0;
    let precipitation_roll = rng.gen::<f64>();
    let precipitation = if precipitation_roll > 0.9 {
        Precipitation::Fog
    } else if precipitation_roll > 0.75 {
        Precipitation::Snow
    } else if precipitation_roll > 0.6 {
        Precipitation::Rain
    } else {
        Precipitation::None
    };
    let intensity = if precipitation == Precipitation::None {
        0.0
    } else {
        rng.gen::<f64>()
    };
    EnvironmentPatch {
        wind: Some(WindPatch {
            speed: Some(wind_speed),
            direction: Some(rng.gen::<f64>() * TAU),
            gusting: Some(wind_speed > 5.0 && rng.gen_bool(0.5)),
            gust_factor: Some(1.2 + rng.gen::<f64>() * 0.8),
        }),
        current: Some(CurrentPatch {
            speed: Some(rng.gen::<f64>() * 2.5),
            direction: Some(rng.gen::<f64>() * TAU),
            variability: Some(rng.gen::<f64>() * 0.5),
        }),
        sea_state: Some(rng.gen_range(0..=9)),
        precipitation: Some(precipitation),
        precipitation_intensity: Some(intensity),
        visibility: Some((rng.gen::<f64>() * 10.0).max(0.1)),
        name: Some("Random Weather".to_string()),
        ..EnvironmentPatch::default()
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> EnvironmentError {
    EnvironmentError::InvalidPatch {
        field,
        reason: reason.into(),
    }
}

fn check_number(field: &'static str, value: Option<f64>, min: f64, max: f64) -> Result<(), EnvironmentError> {
    match value {
        Some(value) if !value.is_finite() => Err(invalid(field, "must be finite")),
        Some(value) if value < min || value > max => {
            Err(invalid(field, format!("{value} outside [{min}, {max}]")))
        }
        _ => Ok(()),
    }
}

pub fn validate_patch(patch: &EnvironmentPatch) -> Result<(), EnvironmentError> {
    if let Some(wind) = &patch.wind {
        check_number("wind.speed", wind.speed, 0.0, 100.0)?;
        check_number("wind.direction", wind.direction, -TAU * 4.0, TAU * 4.0)?;
        check_number("wind.gust_factor", wind.gust_factor, 1.0, 5.0)?;
    }
    if let Some(current) = &patch.current {
        check_number("current.speed", current.speed, 0.0, 20.0)?;
        check_number("current.direction", current.direction, -TAU * 4.0, TAU * 4.0)?;
        check_number("current.variability", current.variability, 0.0, 1.0)?;
    }
    if let Some(sea_state) = patch.sea_state {
        if sea_state > MAX_SEA_STATE {
            return Err(invalid("sea_state", format!("{sea_state} above {MAX_SEA_STATE}")));
        }
    }
    check_number("tide_range", patch.tide_range, 0.0, 30.0)?;
    check_number("time_of_day", patch.time_of_day, 0.0, 24.0)?;
    check_number("precipitation_intensity", patch.precipitation_intensity, 0.0, 1.0)?;
    check_number("visibility", patch.visibility, 0.0, 100.0)?;
    check_number("water_depth", patch.water_depth, 0.1, 12_000.0)?;
    Ok(())
}

/// Validates then applies `patch`; on error `env` is untouched.
pub fn apply_patch(env: &mut Environment, patch: &EnvironmentPatch) -> Result<(), EnvironmentError> {
    validate_patch(patch)?;
    if let Some(wind) = &patch.wind {
        if let Some(speed) = wind.speed {
            env.wind.speed = speed;
        }
        if let Some(direction) = wind.direction {
            env.wind.direction = normalize_angle(direction);
        }
        if let Some(gusting) = wind.gusting {
            env.wind.gusting = gusting;
        }
        if let Some(gust_factor) = wind.gust_factor {
            env.wind.gust_factor = gust_factor;
        }
    }
    if let Some(current) = &patch.current {
        if let Some(speed) = current.speed {
            env.current.speed = speed;
        }
        if let Some(direction) = current.direction {
            env.current.direction = normalize_angle(direction);
        }
        if let Some(variability) = current.variability {
            env.current.variability = variability;
        }
    }
    if let Some(sea_state) = patch.sea_state {
        env.sea_state = sea_state;
    }
    if let Some(range) = patch.tide_range {
        env.tide_range_override = (range > 0.0).then_some(range);
    }
    if let Some(time_of_day) = patch.time_of_day {
        env.time_of_day = time_of_day.rem_euclid(24.0);
    }
    if let Some(precipitation) = patch.precipitation {
        env.precipitation = precipitation;
    }
    if let Some(intensity) = patch.precipitation_intensity {
        env.precipitation_intensity = intensity;
    }
    if let Some(visibility) = patch.visibility {
        env.visibility = visibility;
    }
    if let Some(water_depth) = patch.water_depth {
        env.water_depth = water_depth;
    }
    if let Some(name) = &patch.name {
        env.name = (!name.is_empty()).then(|| name.clone());
    }
    Ok(())
}

/// Overlay wins field by field.
pub fn merge_patches(base: &EnvironmentPatch, overlay: &EnvironmentPatch) -> EnvironmentPatch {
    let wind = match (base.wind, overlay.wind) {
        (Some(base), Some(overlay)) => Some(WindPatch {
            speed: overlay.speed.or(base.speed),
            direction: overlay.direction.or(base.direction),
            gusting: overlay.gusting.or(base.gusting),
            gust_factor: overlay.gust_factor.or(base.gust_factor),
        }),
        (base, overlay) => overlay.or(base),
    };
    let current = match (base.current, overlay.current) {
        (Some(base), Some(overlay)) => Some(CurrentPatch {
            speed: overlay.speed.or(base.speed),
            direction: overlay.direction.or(base.direction),
            variability: overlay.variability.or(base.variability),
        }),
        (base, overlay) => overlay.or(base),
    };
    EnvironmentPatch {
        wind,
        current,
        sea_state: overlay.sea_state.or(base.sea_state),
        tide_range: overlay.tide_range.or(base.tide_range),
        time_of_day: overlay.time_of_day.or(base.time_of_day),
        precipitation: overlay.precipitation.or(base.precipitation),
        precipitation_intensity: overlay
            .precipitation_intensity
            .or(base.precipitation_intensity),
        visibility: overlay.visibility.or(base.visibility),
        water_depth: overlay.water_depth.or(base.water_depth),
        name: overlay.name.clone().or_else(|| base.name.clone()),
    }
}

/// Current values of exactly the fields `patch` would overwrite.
pub fn capture_restore(env: &Environment, patch: &EnvironmentPatch) -> EnvironmentPatch {
    EnvironmentPatch {
        wind: patch.wind.map(|wind| WindPatch {
            speed: wind.speed.map(|_| env.wind.speed),
            direction: wind.direction.map(|_| env.wind.direction),
            gusting: wind.gusting.map(|_| env.wind.gusting),
            gust_factor: wind.gust_factor.map(|_| env.wind.gust_factor),
        }),
        current: patch.current.map(|current| CurrentPatch {
            speed: current.speed.map(|_| env.current.speed),
            direction: current.direction.map(|_| env.current.direction),
            variability: current.variability.map(|_| env.current.variability),
        }),
        sea_state: patch.sea_state.map(|_| env.sea_state),
        tide_range: patch
            .tide_range
            .map(|_| env.tide_range_override.unwrap_or(0.0)),
        time_of_day: patch.time_of_day.map(|_| env.time_of_day),
        precipitation: patch.precipitation.map(|_| env.precipitation),
        precipitation_intensity: patch
            .precipitation_intensity
            .map(|_| env.precipitation_intensity),
        visibility: patch.visibility.map(|_| env.visibility),
        water_depth: patch.water_depth.map(|_| env.water_depth),
        name: patch
            .name
            .as_ref()
            .map(|_| env.name.clone().unwrap_or_default()),
    }
}

/// Drifts wind and current and recomputes the tide. Returns whether anything
/// moved enough to be worth broadcasting.
pub fn advance<R: Rng + ?Sized>(
    env: &mut Environment,
    dt_s: f64,
    now_ms: u64,
    space_id: &str,
    rng: &mut R,
) -> bool {
    let before = env.clone();
    let dt_s = dt_s.max(0.0);

    if dt_s > 0.0 {
        let gust_span = if env.wind.gusting {
            env.wind.gust_factor.max(1.0)
        } else {
            1.0
        };
        let wind_step = rng.gen_range(-1.0..=1.0) * WIND_DIRECTION_DRIFT * gust_span * dt_s.sqrt();
        env.wind.direction = normalize_angle(env.wind.direction + wind_step);

        if env.current.variability > 0.0 {
            let spread = env.current.variability * CURRENT_DRIFT * dt_s.sqrt();
            env.current.direction =
                normalize_angle(env.current.direction + rng.gen_range(-1.0..=1.0) * spread);
            env.current.speed = (env.current.speed + rng.gen_range(-1.0..=1.0) * spread).max(0.0);
        }

        env.time_of_day = (env.time_of_day + dt_s / 3_600.0).rem_euclid(24.0);
    }

    env.tide = compute_tide(now_ms, space_id, env.tide_range_override);
    environment_changed(&before, env)
}

fn environment_changed(before: &Environment, after: &Environment) -> bool {
    let moved = |a: f64, b: f64| (a - b).abs() > CHANGE_EPSILON;
    moved(before.wind.direction, after.wind.direction)
        || moved(before.wind.speed, after.wind.speed)
        || moved(before.current.direction, after.current.direction)
        || moved(before.current.speed, after.current.speed)
        || moved(before.tide.height, after.tide.height)
        || before.tide.trend != after.tide.trend
        || before.sea_state != after.sea_state
        || before.precipitation != after.precipitation
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventTransition {
    Applied { event_id: String },
    Ended { event_id: String },
}

fn event_error(event: &ScheduledEnvironmentEvent, reason: impl Into<String>) -> EnvironmentError {
    EnvironmentError::InvalidEvent {
        event_id: event.id.clone(),
        reason: reason.into(),
    }
}

/// Preset (without its time of day) overlaid by the explicit payload.
fn event_patch(event: &ScheduledEnvironmentEvent) -> Result<EnvironmentPatch, EnvironmentError> {
    let mut patch = match &event.pattern {
        Some(name) => {
            let mut preset =
                weather_preset(name).ok_or_else(|| event_error(event, format!("unknown preset {name:?}")))?;
            preset.time_of_day = None;
            preset
        }
        None => EnvironmentPatch::default(),
    };
    if let Some(payload) = &event.payload {
        patch = merge_patches(&patch, payload);
    }
    if let Some(name) = &event.name {
        patch.name = Some(name.clone());
    }
    Ok(patch)
}

pub fn validate_event(event: &ScheduledEnvironmentEvent) -> Result<(), EnvironmentError> {
    let patch = event_patch(event)?;
    validate_patch(&patch).map_err(|err| event_error(event, err.to_string()))?;
    if let Some(end_payload) = &event.end_payload {
        validate_patch(end_payload).map_err(|err| event_error(event, err.to_string()))?;
    }
    if let Some(end_at) = event.end_at {
        if end_at <= event.run_at {
            return Err(event_error(event, "end_at must be after run_at"));
        }
    }
    Ok(())
}

fn due_to_apply(event: &ScheduledEnvironmentEvent, now_ms: u64) -> bool {
    event.is_pending() && event.run_at <= now_ms
}

fn due_to_end(event: &ScheduledEnvironmentEvent, now_ms: u64) -> bool {
    event.enabled
        && event.executed_at.is_some()
        && event.ended_at.is_none()
        && event.end_at.is_some_and(|end_at| end_at <= now_ms)
}

fn restore_patch(event: &ScheduledEnvironmentEvent) -> Option<&EnvironmentPatch> {
    event.end_payload.as_ref().or(event.captured_restore.as_ref())
}

/// Applies due events then ends expired ones. Events already marked executed
/// or ended are skipped, so replaying this is a no-op. The pass is all or
/// nothing: on error neither `env` nor `events` has changed.
pub fn process_due_events(
    env: &mut Environment,
    events: &mut [ScheduledEnvironmentEvent],
    now_ms: u64,
) -> Result<Vec<EventTransition>, EnvironmentError> {
    for event in events.iter() {
        if due_to_apply(event, now_ms) {
            validate_event(event)?;
        } else if due_to_end(event, now_ms) {
            if let Some(restore) = restore_patch(event) {
                validate_patch(restore).map_err(|err| event_error(event, err.to_string()))?;
            }
        }
    }

    let mut staged_env = env.clone();
    let mut staged = events.to_vec();
    let transitions = run_due_events(&mut staged_env, &mut staged, now_ms)?;
    *env = staged_env;
    events.clone_from_slice(&staged);
    Ok(transitions)
}

fn run_due_events(
    env: &mut Environment,
    events: &mut [ScheduledEnvironmentEvent],
    now_ms: u64,
) -> Result<Vec<EventTransition>, EnvironmentError> {
    let mut transitions = Vec::new();

    let mut applying: Vec<usize> = (0..events.len())
        .filter(|index| due_to_apply(&events[*index], now_ms))
        .collect();
    applying.sort_by_key(|index| (events[*index].run_at, events[*index].id.clone()));
    for index in applying {
        let event = &mut events[index];
        let patch = event_patch(event)?;
        let restore = (event.end_at.is_some() && event.end_payload.is_none())
            .then(|| capture_restore(env, &patch));
        apply_patch(env, &patch)?;
        event.captured_restore = restore;
        event.executed_at = Some(now_ms);
        transitions.push(EventTransition::Applied {
            event_id: event.id.clone(),
        });
    }

    let mut ending: Vec<usize> = (0..events.len())
        .filter(|index| due_to_end(&events[*index], now_ms))
        .collect();
    ending.sort_by_key(|index| (events[*index].end_at, events[*index].id.clone()));
    for index in ending {
        let event = &mut events[index];
        if let Some(restore) = restore_patch(event) {
            apply_patch(env, restore).map_err(|err| event_error(event, err.to_string()))?;
        }
        event.ended_at = Some(now_ms);
        event.enabled = false;
        transitions.push(EventTransition::Ended {
            event_id: event.id.clone(),
        });
    }

    Ok(transitions)
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn event(id: &str, run_at: u64, end_at: Option<u64>, payload: EnvironmentPatch) -> ScheduledEnvironmentEvent {
        ScheduledEnvironmentEvent {
            id: id.to_string(),
            space_id: "harbor".to_string(),
            name: None,
            pattern: None,
            payload: Some(payload),
            run_at,
            end_at,
            end_payload: None,
            captured_restore: None,
            executed_at: None,
            ended_at: None,
            enabled: true,
        }
    }

    fn wind_speed(speed: f64) -> EnvironmentPatch {
        EnvironmentPatch {
            wind: Some(WindPatch {
                speed: Some(speed),
                ..WindPatch::default()
            }),
            ..EnvironmentPatch::default()
        }
    }

    #[test]
    fn tide_is_deterministic_and_bounded() {
        let a = compute_tide(3_600_000, "harbor", None);
        let b = compute_tide(3_600_000, "harbor", None);
        assert_eq!(a, b);
        assert!(a.height.abs() <= a.range / 2.0 + 1e-9);
        assert!((0.0..1.0).contains(&a.phase));

        let scaled = compute_tide(3_600_000, "harbor", Some(a.range * 2.0));
        assert!((scaled.height - a.height * 2.0).abs() < 1e-9);
    }

    #[test]
    fn space_hash_matches_fnv1a() {
        assert_eq!(space_hash(""), 0x811c_9dc5);
        assert_eq!(space_hash("a"), 0xe40c_292c);
    }

    #[test]
    fn presets_are_known_and_valid() {
        for name in PRESET_NAMES {
            let preset = weather_preset(name).expect("preset");
            assert!(validate_patch(&preset).is_ok(), "{name}");
        }
        assert!(weather_preset("tornado").is_none());
    }

    #[test]
    fn invalid_patch_leaves_environment_untouched() {
        let mut env = Environment::default();
        let patch = EnvironmentPatch {
            sea_state: Some(4),
            visibility: Some(-1.0),
            ..EnvironmentPatch::default()
        };
        assert!(apply_patch(&mut env, &patch).is_err());
        assert_eq!(env, Environment::default());
    }

    #[test]
    fn scheduled_event_restores_captured_values() {
        let mut env = Environment::default();
        let mut events = vec![event("e1", 1_000, Some(5_000), wind_speed(12.0))];

        let applied = process_due_events(&mut env, &mut events, 1_000).expect("apply");
        assert_eq!(applied, vec![EventTransition::Applied { event_id: "e1".to_string() }]);
        assert_eq!(env.wind.speed, 12.0);
        assert_eq!(events[0].captured_restore, Some(wind_speed(5.0)));

        let ended = process_due_events(&mut env, &mut events, 5_000).expect("end");
        assert_eq!(ended, vec![EventTransition::Ended { event_id: "e1".to_string() }]);
        assert_eq!(env.wind.speed, 5.0);
        assert!(!events[0].enabled);

        let replay = process_due_events(&mut env, &mut events, 9_000).expect("replay");
        assert!(replay.is_empty());
        assert_eq!(env.wind.speed, 5.0);
    }

    #[test]
    fn explicit_end_payload_wins_and_nothing_is_captured() {
        let mut env = Environment::default();
        let mut scheduled = event("e2", 0, Some(10), wind_speed(20.0));
        scheduled.end_payload = Some(wind_speed(7.0));
        let mut events = vec![scheduled];

        process_due_events(&mut env, &mut events, 10).expect("apply and end");
        assert_eq!(events[0].captured_restore, None);
        assert_eq!(env.wind.speed, 7.0);
        assert!(events[0].ended_at.is_some());
    }

    #[test]
    fn malformed_event_aborts_without_mutation() {
        let mut env = Environment::default();
        let mut bad = event("bad", 0, None, wind_speed(1.0));
        bad.pattern = Some("tornado".to_string());
        let mut events = vec![event("good", 0, None, wind_speed(9.0)), bad];

        let err = process_due_events(&mut env, &mut events, 10).expect_err("invalid preset");
        assert!(matches!(err, EnvironmentError::InvalidEvent { ref event_id, .. } if event_id == "bad"));
        assert_eq!(env, Environment::default());
        assert!(events.iter().all(|event| event.executed_at.is_none()));
    }

    #[test]
    fn broken_restore_blocks_the_whole_pass() {
        let mut env = Environment::default();
        let mut stale = event("stale", 0, Some(100), wind_speed(3.0));
        stale.executed_at = Some(0);
        stale.end_payload = Some(EnvironmentPatch {
            visibility: Some(-1.0),
            ..EnvironmentPatch::default()
        });
        let mut events = vec![event("good", 150, None, wind_speed(9.0)), stale];

        let err = process_due_events(&mut env, &mut events, 200).expect_err("bad restore");
        assert!(matches!(err, EnvironmentError::InvalidEvent { ref event_id, .. } if event_id == "stale"));
        assert_eq!(env, Environment::default());
        assert!(events[0].executed_at.is_none());
        assert!(events[1].ended_at.is_none());
    }

    #[test]
    fn ending_an_event_clears_a_name_that_was_unset() {
        let mut env = Environment::default();
        let mut named = event("fog", 0, Some(50), wind_speed(2.0));
        named.name = Some("Fog bank".to_string());
        let mut events = vec![named];

        process_due_events(&mut env, &mut events, 0).expect("apply");
        assert_eq!(env.name.as_deref(), Some("Fog bank"));
        assert_eq!(
            events[0].captured_restore.as_ref().and_then(|restore| restore.name.clone()),
            Some(String::new())
        );

        process_due_events(&mut env, &mut events, 50).expect("end");
        assert_eq!(env.name, None);
    }

    #[test]
    fn advance_drifts_wind_and_updates_tide() {
        let mut env = Environment::default();
        let mut rng = StdRng::seed_from_u64(7);
        advance(&mut env, 0.2, 3_600_000, "harbor", &mut rng);
        assert_eq!(env.tide, compute_tide(3_600_000, "harbor", None));
        assert!(env.wind.direction >= 0.0 && env.wind.direction < TAU);
        assert_eq!(env.wind.speed, 5.0);
    }
}
