use super::*;
use rayon::prelude::*;

use crate::damage::apply_operational_wear;
use crate::failure::{evolve_failures, limit_controls, FailureInputs};
use crate::geometry::coast;
use crate::rules;

#[derive(Debug, Clone, PartialEq)]
pub struct SpaceTickFailure {
    pub space_id: String,
    pub error: TickError,
}

/// Result of one driver pass over every space.
#[derive(Debug, Default)]
pub struct TickReport {
    pub ticked: Vec<String>,
    pub demoted: Vec<(String, String)>,
    pub incidents: Vec<Incident>,
    pub event_transitions: Vec<(String, EventTransition)>,
    pub failures: Vec<SpaceTickFailure>,
    pub effects: Effects,
}

#[derive(Debug, Default)]
struct SpaceOutput {
    demoted: Vec<String>,
    incidents: Vec<Incident>,
    event_transitions: Vec<EventTransition>,
    effects: Effects,
}

impl WorldState {
    /// Steps every space whose cadence has elapsed. Spaces without sockets are
    /// not simulated but still hand crewless vessels back to AI. A failing
    /// space is reported and skipped; the others proceed.
    pub fn tick(&mut self, now_ms: u64) -> TickReport {
        let auto_weather_ms = self.config.auto_weather_interval_ms;
        let pool = &self.tick_pool;
        let due = self
            .spaces
            .values_mut()
            .filter(|space| space.is_due(now_ms))
            .collect::<Vec<_>>();

        let mut outputs = match pool {
            Some(pool) if due.len() > 1 => pool.install(|| {
                due.into_par_iter()
                    .map(|space| (space.space_id.clone(), space.step(now_ms, auto_weather_ms)))
                    .collect::<Vec<_>>()
            }),
            _ => due
                .into_iter()
                .map(|space| (space.space_id.clone(), space.step(now_ms, auto_weather_ms)))
                .collect::<Vec<_>>(),
        };
        outputs.sort_by(|a, b| a.0.cmp(&b.0));

        let mut report = TickReport::default();
        for (space_id, result) in outputs {
            match result {
                Ok(output) => {
                    report.demoted.extend(
                        output
                            .demoted
                            .into_iter()
                            .map(|vessel_id| (space_id.clone(), vessel_id)),
                    );
                    report.incidents.extend(output.incidents);
                    report.event_transitions.extend(
                        output
                            .event_transitions
                            .into_iter()
                            .map(|transition| (space_id.clone(), transition)),
                    );
                    report.effects.extend(output.effects);
                    report.ticked.push(space_id);
                }
                Err(error) => {
                    if let TickError::Environment(EnvironmentError::InvalidEvent { event_id, .. }) =
                        &error
                    {
                        if let Some(effect) = self
                            .spaces
                            .get_mut(&space_id)
                            .and_then(|space| space.quarantine_event(event_id))
                        {
                            report.effects.push(effect);
                        }
                    }
                    report.failures.push(SpaceTickFailure { space_id, error });
                }
            }
        }

        for space in self.spaces.values_mut().filter(|space| space.sockets.is_empty()) {
            let mut effects = Effects::new();
            let demoted = space.demote_expired(now_ms, &mut effects);
            report.demoted.extend(
                demoted
                    .into_iter()
                    .map(|vessel_id| (space.space_id.clone(), vessel_id)),
            );
            report.effects.extend(effects);
            space.changed.clear();
        }

        report
    }
}

impl SpaceState {
    pub fn is_due(&self, now_ms: u64) -> bool {
        !self.sockets.is_empty()
            && self.last_tick_at.map_or(true, |last| {
                now_ms.saturating_sub(last) >= self.tuning.tick_interval_ms
            })
    }

    fn step(&mut self, now_ms: u64, auto_weather_ms: u64) -> Result<SpaceOutput, TickError> {
        let dt_s = self
            .last_tick_at
            .map_or(0.0, |last| now_ms.saturating_sub(last) as f64 / 1_000.0);
        self.last_tick_at = Some(now_ms);
        let mut output = SpaceOutput::default();

        self.step_environment(now_ms, dt_s, auto_weather_ms, &mut output)?;

        for vessel in self
            .vessels
            .values_mut()
            .filter(|vessel| vessel.is_active() && vessel.mode == VesselMode::Ai)
        {
            if coast(vessel, dt_s) {
                vessel.last_update = now_ms;
                self.changed.insert(vessel.id.clone());
            }
        }

        output.demoted = self.demote_expired(now_ms, &mut output.effects);

        if self.rules.realism.failures && dt_s > 0.0 {
            self.step_failures(now_ms, dt_s, &mut output.effects);
        }

        let outcome = rules::evaluate(
            &self.space_id,
            &mut self.vessels,
            &self.rules,
            &self.tuning,
            &mut self.cooldowns,
            now_ms,
        );
        for vessel_id in &outcome.damaged {
            if let Some(vessel) = self.vessels.get(vessel_id) {
                output.effects.persist_vessel(vessel, false);
            }
            self.changed.insert(vessel_id.clone());
        }
        for charge in outcome.charges {
            output.effects.charge(charge);
        }
        output.incidents = outcome.incidents;

        let longest_window = self
            .tuning
            .collision_cooldown_ms
            .max(self.tuning.near_miss_cooldown_ms)
            .max(self.tuning.speed_violation_cooldown_ms);
        self.cooldowns.prune(now_ms, longest_window);

        self.flush_snapshots(now_ms, &mut output.effects);
        self.tick_count += 1;
        Ok(output)
    }

    fn step_environment(
        &mut self,
        now_ms: u64,
        dt_s: f64,
        auto_weather_ms: u64,
        output: &mut SpaceOutput,
    ) -> Result<(), TickError> {
        if env_model::advance(&mut self.environment, dt_s, now_ms, &self.space_id, &mut self.rng) {
            self.environment_dirty = true;
        }

        // Validated before any scheduled event touches the environment.
        let rotation = if auto_weather_ms > 0
            && now_ms.saturating_sub(self.last_weather_rotation_at) >= auto_weather_ms
        {
            let patch = env_model::random_weather(&mut self.rng);
            env_model::validate_patch(&patch)?;
            Some(patch)
        } else {
            None
        };

        let transitions =
            env_model::process_due_events(&mut self.environment, &mut self.events, now_ms)?;
        let rotated = rotation.is_some();
        if let Some(patch) = rotation {
            env_model::apply_patch(&mut self.environment, &patch)?;
            self.last_weather_rotation_at = now_ms;
        }

        if transitions.is_empty() && !rotated {
            return Ok(());
        }
        self.environment_dirty = true;
        output.effects.to_space(
            &self.space_id,
            ServerMessage::EnvironmentUpdate(self.environment.clone()),
        );
        output.effects.push(self.environment_write(true));
        for transition in &transitions {
            let (EventTransition::Applied { event_id } | EventTransition::Ended { event_id }) =
                transition;
            if let Some(event) = self.events.iter().find(|event| &event.id == event_id) {
                output
                    .effects
                    .push(Effect::PersistEvent(Box::new(event.clone())));
            }
        }
        output.event_transitions = transitions;
        Ok(())
    }

    fn step_failures(&mut self, now_ms: u64, dt_s: f64, effects: &mut Effects) {
        let wear = self.rules.realism.damage;
        for vessel in self.vessels.values_mut().filter(|vessel| vessel.is_active()) {
            let inputs = FailureInputs {
                dt_s,
                now_ms,
                throttle: vessel.controls.throttle,
                rudder_angle: vessel.controls.rudder_angle,
                speed: vessel.speed(),
            };
            let transitions =
                evolve_failures(&mut vessel.failure, &vessel.damage, &inputs, &mut self.rng);

            let mut touched = !transitions.is_empty();
            if wear && vessel.failure.any_active() {
                vessel.damage = apply_operational_wear(
                    &vessel.damage,
                    vessel.failure.engine_failed,
                    vessel.failure.steering_failed,
                    vessel.failure.flooding_level,
                    dt_s,
                );
                touched = true;
            }
            let limited = limit_controls(vessel.controls, &vessel.failure, &vessel.damage);
            if limited != vessel.controls {
                vessel.controls = limited;
                touched = true;
            }
            if !touched {
                continue;
            }
            vessel.last_update = now_ms;
            self.changed.insert(vessel.id.clone());

            if transitions.is_empty() {
                continue;
            }
            effects.persist_vessel(vessel, false);
            if vessel.crew_ids.is_empty() {
                continue;
            }
            let crew: Vec<String> = vessel.crew_ids.iter().cloned().collect();
            for transition in transitions {
                effects.send(
                    Audience::Users {
                        space_id: Some(self.space_id.clone()),
                        user_ids: crew.clone(),
                    },
                    ServerMessage::VesselAlert(VesselAlert {
                        vessel_id: vessel.id.clone(),
                        transition,
                        message: transition.message().to_string(),
                    }),
                );
            }
        }
    }

    /// Hands crewless player vessels past their grace period back to AI,
    /// each with one forced write.
    fn demote_expired(&mut self, now_ms: u64, effects: &mut Effects) -> Vec<String> {
        let grace_ms = self.tuning.ai_grace_ms;
        let mut demoted = Vec::new();
        for vessel in self.vessels.values_mut() {
            if !arbiter::due_for_demotion(vessel, now_ms, grace_ms) {
                continue;
            }
            arbiter::demote_to_ai(vessel, now_ms);
            effects.persist_vessel(vessel, true);
            self.changed.insert(vessel.id.clone());
            demoted.push(vessel.id.clone());
        }
        demoted
    }

    /// Disables a malformed event so the space can tick again.
    fn quarantine_event(&mut self, event_id: &str) -> Option<Effect> {
        let event = self.events.iter_mut().find(|event| event.id == event_id)?;
        event.enabled = false;
        Some(Effect::PersistEvent(Box::new(event.clone())))
    }
}
