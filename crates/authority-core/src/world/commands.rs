use super::*;
use crate::damage;
use crate::failure::limit_controls;

/// Vessels at or below this speed (m/s) count as stopped for repairs.
pub const REPAIR_MAX_SPEED: f64 = 0.2;
const SPAWN_COLUMNS: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub vessel_id: String,
    pub choice: arbiter::VesselChoice,
    pub claimed: Vec<Station>,
    pub effects: Effects,
}

impl WorldState {
    /// Places the user on a vessel: last-known, existing crew, idle AI, or a
    /// freshly spawned one. A user crews at most one vessel per space.
    pub fn assign_vessel(
        &mut self,
        space_id: &str,
        user_id: &str,
        username: &str,
        now_ms: u64,
    ) -> Result<Assignment, CommandRejection> {
        let max_crew = self.config.max_crew;
        let spacing = self.config.spawn_spacing_m;
        let sequence = &mut self.id_sequence;
        let space = self
            .spaces
            .get_mut(space_id)
            .ok_or_else(|| CommandRejection::SpaceNotActive(space_id.to_string()))?;

        let choice = arbiter::choose_vessel(
            &space.vessels,
            space.last_vessel_by_user.get(user_id).map(String::as_str),
            user_id,
            max_crew,
        );
        let mut effects = Effects::new();

        let vessel_id = match choice.vessel_id() {
            Some(id) => id.to_string(),
            None => {
                let mut id = format!("{user_id}_{now_ms}");
                if space.vessels.contains_key(&id) {
                    *sequence += 1;
                    id = format!("{user_id}_{now_ms}_{sequence}");
                }
                let index = space.vessels.len();
                let position = Position {
                    x: (index % SPAWN_COLUMNS) as f64 * spacing,
                    y: (index / SPAWN_COLUMNS) as f64 * spacing,
                    z: 0.0,
                };
                let mut vessel = Vessel::new(id.clone(), space_id, position, now_ms);
                vessel.owner_id = Some(user_id.to_string());
                vessel.properties.name = format!("{username}'s vessel");
                space.vessels.insert(id.clone(), vessel);
                id
            }
        };

        if matches!(choice, arbiter::VesselChoice::IdleAi(_)) {
            if let Some(vessel) = space.vessels.get_mut(&vessel_id) {
                vessel.owner_id.get_or_insert_with(|| user_id.to_string());
            }
        }
        let claimed = space.board_vessel(user_id, username, &vessel_id, false, now_ms, &mut effects)?;

        Ok(Assignment {
            vessel_id,
            choice,
            claimed,
            effects,
        })
    }

    /// `vessel:join`: moves the user onto the named vessel, or onto a shared
    /// vessel with room when none is named. Never spawns a vessel.
    pub fn join_vessel(
        &mut self,
        space_id: &str,
        user_id: &str,
        username: &str,
        vessel_id: Option<&str>,
        now_ms: u64,
    ) -> Result<Assignment, CommandRejection> {
        let max_crew = self.config.max_crew;
        let space = self.space_mut(space_id)?;
        let choice = match vessel_id {
            Some(requested) => {
                let vessel = space
                    .vessels
                    .get(requested)
                    .ok_or_else(|| CommandRejection::VesselNotFound(requested.to_string()))?;
                if let Some(reason) = arbiter::join_refusal(vessel, user_id, max_crew) {
                    return Err(CommandRejection::NotPermitted(reason.to_string()));
                }
                arbiter::VesselChoice::Requested(requested.to_string())
            }
            None => match arbiter::find_joinable(&space.vessels, user_id, max_crew) {
                Some(vessel) => arbiter::VesselChoice::Requested(vessel.id.clone()),
                None => {
                    return Err(CommandRejection::NotPermitted(
                        "No joinable vessels available".to_string(),
                    ))
                }
            },
        };
        let vessel_id = choice.vessel_id().unwrap_or_default().to_string();

        let mut effects = Effects::new();
        let claimed = space.board_vessel(user_id, username, &vessel_id, true, now_ms, &mut effects)?;
        Ok(Assignment {
            vessel_id,
            choice,
            claimed,
            effects,
        })
    }

    /// Admin mode switch. `Ai` empties the crew and hands the vessel to AI on
    /// the next tick; `Player` holds it in player mode for a fresh grace period.
    pub fn set_vessel_mode(
        &mut self,
        space_id: &str,
        vessel_id: &str,
        mode: VesselMode,
        now_ms: u64,
    ) -> Result<Effects, CommandRejection> {
        let space = self.space_mut(space_id)?;
        let crew: Vec<String> = space
            .vessels
            .get(vessel_id)
            .ok_or_else(|| CommandRejection::VesselNotFound(vessel_id.to_string()))?
            .crew_ids
            .iter()
            .cloned()
            .collect();

        let mut effects = Effects::new();
        if mode == VesselMode::Ai {
            for user_id in &crew {
                effects.extend(space.remove_from_crew(user_id, vessel_id, now_ms));
            }
        }
        let Some(vessel) = space.vessels.get_mut(vessel_id) else {
            return Err(CommandRejection::VesselNotFound(vessel_id.to_string()));
        };
        vessel.desired_mode = mode;
        if mode == VesselMode::Player && vessel.mode == VesselMode::Ai {
            vessel.mode = VesselMode::Player;
            vessel.last_crew_at = now_ms;
        }
        vessel.last_update = now_ms;
        effects.persist_vessel(vessel, true);
        space.mark_changed(vessel_id);
        Ok(effects)
    }

    /// Takes the user off their vessel (explicit leave or last socket gone).
    /// The vessel stays under player control until the AI grace period ends.
    pub fn depart_crew(&mut self, space_id: &str, user_id: &str, now_ms: u64) -> Effects {
        let Some(space) = self.spaces.get_mut(space_id) else {
            return Effects::new();
        };
        let Some(vessel_id) = space.crew_index.get(user_id).cloned() else {
            return Effects::new();
        };
        space.remove_from_crew(user_id, &vessel_id, now_ms)
    }

    pub fn set_station(
        &mut self,
        space_id: &str,
        user_id: &str,
        station: Station,
        action: StationAction,
        is_admin: bool,
    ) -> Result<(StationResult, Effects), CommandRejection> {
        let space = self.space_mut(space_id)?;
        let vessel = space.crewed_vessel_mut(user_id)?;
        let username = vessel.username_for(user_id);
        let result = arbiter::set_station(vessel, station, action, user_id, &username, is_admin);

        let mut effects = Effects::new();
        if result.ok {
            effects.persist_vessel(vessel, false);
            let vessel_id = vessel.id.clone();
            space.mark_changed(&vessel_id);
        }
        Ok((result, effects))
    }

    /// Client-reported kinematics. Needs the helm, like the rudder.
    pub fn apply_vessel_update(
        &mut self,
        space_id: &str,
        user_id: &str,
        is_admin: bool,
        update: &VesselUpdatePayload,
        now_ms: u64,
    ) -> Result<Effects, CommandRejection> {
        let space = self.space_mut(space_id)?;
        let vessel = space.crewed_vessel_mut(user_id)?;
        if !arbiter::may_operate(vessel, Station::Helm, user_id, is_admin) {
            return Err(CommandRejection::NotPermitted(
                "You do not hold the helm station".to_string(),
            ));
        }

        if let Some(position) = update.position {
            vessel.position = position;
        }
        if let Some(orientation) = update.orientation {
            vessel.orientation = orientation;
        }
        if let Some(velocity) = update.velocity {
            vessel.velocity = velocity;
        }
        vessel.last_update = now_ms;

        let mut effects = Effects::new();
        effects.persist_vessel(vessel, false);
        let vessel_id = vessel.id.clone();
        space.mark_changed(&vessel_id);
        Ok(effects)
    }

    /// Throttle needs the engine station and rudder the helm. The whole
    /// command is rejected if either requested field is not permitted.
    pub fn apply_control(
        &mut self,
        space_id: &str,
        user_id: &str,
        is_admin: bool,
        control: &ControlPayload,
        now_ms: u64,
    ) -> Result<Effects, CommandRejection> {
        let space = self.space_mut(space_id)?;
        let vessel = space.crewed_vessel_mut(user_id)?;

        if control.throttle.is_some()
            && !arbiter::may_operate(vessel, Station::Engine, user_id, is_admin)
        {
            return Err(CommandRejection::NotPermitted(
                "You do not hold the engine station".to_string(),
            ));
        }
        if control.rudder_angle.is_some()
            && !arbiter::may_operate(vessel, Station::Helm, user_id, is_admin)
        {
            return Err(CommandRejection::NotPermitted(
                "You do not hold the helm station".to_string(),
            ));
        }

        let requested = Controls {
            throttle: control.throttle.unwrap_or(vessel.controls.throttle),
            rudder_angle: control.rudder_angle.unwrap_or(vessel.controls.rudder_angle),
        };
        vessel.controls = limit_controls(requested, &vessel.failure, &vessel.damage);
        vessel.last_update = now_ms;

        let mut effects = Effects::new();
        effects.persist_vessel(vessel, false);
        let vessel_id = vessel.id.clone();
        space.mark_changed(&vessel_id);
        Ok(effects)
    }

    /// Restores a stopped vessel to full health and charges the requester the
    /// repair cost.
    pub fn repair_vessel(
        &mut self,
        space_id: &str,
        user_id: &str,
        is_admin: bool,
        vessel_id: Option<&str>,
        now_ms: u64,
    ) -> Result<(RepairResult, Effects), CommandRejection> {
        let space = self.space_mut(space_id)?;
        let target = match vessel_id {
            Some(id) => id.to_string(),
            None => space
                .crew_index
                .get(user_id)
                .cloned()
                .ok_or(CommandRejection::NoVessel)?,
        };
        let vessel = space
            .vessels
            .get_mut(&target)
            .ok_or_else(|| CommandRejection::VesselNotFound(target.clone()))?;
        if !is_admin && !vessel.has_crew_member(user_id) {
            return Err(CommandRejection::NotPermitted(
                "You are not crew on this vessel".to_string(),
            ));
        }
        let speed = vessel.speed();
        if speed > REPAIR_MAX_SPEED {
            return Err(CommandRejection::MovingRepair { speed });
        }

        let cost = damage::repair_cost(&vessel.damage);
        vessel.damage = Default::default();
        vessel.failure = Default::default();
        vessel.last_update = now_ms;

        let mut effects = Effects::new();
        effects.persist_vessel(vessel, true);
        effects.to_space(
            space_id,
            ServerMessage::SimulationUpdate(SimulationUpdate {
                space_id: space_id.to_string(),
                vessels: BTreeMap::from([(target.clone(), VesselSnapshot::from(&*vessel))]),
                environment: None,
                partial: true,
                timestamp: now_ms,
            }),
        );
        if cost > 0 {
            effects.charge(EconomyCharge {
                user_id: user_id.to_string(),
                space_id: space_id.to_string(),
                adjustment: EconomyAdjustment {
                    delta_credits: -cost,
                    delta_safety_score: 0.0,
                    reason: ChargeReason::Repair,
                    vessel_id: Some(target.clone()),
                    meta: Some(json!({ "cost": cost })),
                },
            });
        }

        Ok((
            RepairResult {
                vessel_id: target,
                cost,
            },
            effects,
        ))
    }

    /// Applies a preset and/or patch immediately. Validation happens before
    /// any field changes.
    pub fn apply_weather_override(
        &mut self,
        space_id: &str,
        weather: &WeatherOverride,
        now_ms: u64,
    ) -> Result<Effects, CommandRejection> {
        let space = self.space_mut(space_id)?;
        let mut patch = match &weather.preset {
            Some(name) => env_model::weather_preset(name)
                .ok_or_else(|| EnvironmentError::UnknownPreset(name.clone()))?,
            None => EnvironmentPatch::default(),
        };
        if let Some(extra) = &weather.patch {
            patch = env_model::merge_patches(&patch, extra);
        }
        if patch.is_empty() {
            return Err(EnvironmentError::InvalidPatch {
                field: "patch",
                reason: "override changes nothing".to_string(),
            }
            .into());
        }

        env_model::apply_patch(&mut space.environment, &patch)?;
        space.environment.tide =
            env_model::compute_tide(now_ms, space_id, space.environment.tide_range_override);
        space.environment_dirty = true;

        let mut effects = Effects::new();
        effects.to_space(
            space_id,
            ServerMessage::EnvironmentUpdate(space.environment.clone()),
        );
        effects.push(space.environment_write(true));
        Ok(effects)
    }

    /// Adds a validated event to the space schedule.
    pub fn schedule_event(
        &mut self,
        space_id: &str,
        request: ScheduleEventRequest,
        now_ms: u64,
    ) -> Result<(ScheduledEnvironmentEvent, Effects), CommandRejection> {
        self.id_sequence += 1;
        let generated = format!("evt_{space_id}_{now_ms}_{}", self.id_sequence);
        let space = self.space_mut(space_id)?;
        let event = ScheduledEnvironmentEvent {
            id: request.id.unwrap_or(generated),
            space_id: space_id.to_string(),
            name: request.name,
            pattern: request.pattern,
            payload: request.payload,
            run_at: request.run_at,
            end_at: request.end_at,
            end_payload: request.end_payload,
            captured_restore: None,
            executed_at: None,
            ended_at: None,
            enabled: true,
        };
        env_model::validate_event(&event)?;
        if space.events.iter().any(|existing| existing.id == event.id) {
            return Err(CommandRejection::DuplicateEvent(event.id));
        }

        space.events.push(event.clone());
        space
            .events
            .sort_by(|a, b| a.run_at.cmp(&b.run_at).then_with(|| a.id.cmp(&b.id)));

        let mut effects = Effects::new();
        effects.push(Effect::PersistEvent(Box::new(event.clone())));
        Ok((event, effects))
    }
}

impl SpaceState {
    /// Takes the user off any other vessel, then adds them to `vessel_id` and
    /// records it as their last vessel. Returns the stations claimed.
    fn board_vessel(
        &mut self,
        user_id: &str,
        username: &str,
        vessel_id: &str,
        force: bool,
        now_ms: u64,
        effects: &mut Effects,
    ) -> Result<Vec<Station>, CommandRejection> {
        if !self.vessels.contains_key(vessel_id) {
            return Err(CommandRejection::VesselNotFound(vessel_id.to_string()));
        }
        if let Some(previous) = self.crew_index.get(user_id).cloned() {
            if previous != vessel_id {
                effects.extend(self.remove_from_crew(user_id, &previous, now_ms));
            }
        }

        let Some(vessel) = self.vessels.get_mut(vessel_id) else {
            return Err(CommandRejection::VesselNotFound(vessel_id.to_string()));
        };
        let claimed = arbiter::join_crew(vessel, user_id, username, now_ms);
        effects.persist_vessel(vessel, force);
        effects.to_space(
            &self.space_id,
            ServerMessage::VesselJoined(CrewNotice {
                user_id: user_id.to_string(),
                username: username.to_string(),
                vessel_id: Some(vessel_id.to_string()),
            }),
        );

        self.crew_index
            .insert(user_id.to_string(), vessel_id.to_string());
        self.last_vessel_by_user
            .insert(user_id.to_string(), vessel_id.to_string());
        self.mark_changed(vessel_id);
        Ok(claimed)
    }

    fn remove_from_crew(&mut self, user_id: &str, vessel_id: &str, now_ms: u64) -> Effects {
        let mut effects = Effects::new();
        self.crew_index.remove(user_id);
        let Some(vessel) = self.vessels.get_mut(vessel_id) else {
            return effects;
        };
        let username = vessel.username_for(user_id);
        if !arbiter::leave_crew(vessel, user_id, now_ms) {
            return effects;
        }
        effects.persist_vessel(vessel, true);
        effects.to_space(
            &self.space_id,
            ServerMessage::VesselLeft(CrewNotice {
                user_id: user_id.to_string(),
                username,
                vessel_id: Some(vessel_id.to_string()),
            }),
        );
        self.mark_changed(vessel_id);
        effects
    }

    pub(super) fn environment_write(&self, force: bool) -> Effect {
        Effect::PersistEnvironment {
            space_id: self.space_id.clone(),
            environment: Box::new(self.environment.clone()),
            force,
        }
    }
}
