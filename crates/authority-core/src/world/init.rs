use super::*;

/// What a space needs from storage and the rules source when it first
/// becomes active.
#[derive(Debug, Clone, Default)]
pub struct SpaceSeed {
    pub rules: RuleContext,
    pub vessels: Vec<Vessel>,
    pub environment: Option<Environment>,
    pub events: Vec<ScheduledEnvironmentEvent>,
}

impl WorldState {
    pub fn new(config: SimulationConfig) -> Self {
        let tick_worker_threads = usize::from(config.tick_worker_threads.max(1));
        let tick_pool = if tick_worker_threads > 1 {
            rayon::ThreadPoolBuilder::new()
                .num_threads(tick_worker_threads)
                .build()
                .ok()
        } else {
            None
        };
        Self {
            config,
            spaces: BTreeMap::new(),
            id_sequence: 0,
            tick_worker_threads,
            tick_pool,
        }
    }

    /// Loads a space on first use. Returns false when it was already active,
    /// in which case `seed` is ignored.
    pub fn activate_space(&mut self, space_id: &str, seed: SpaceSeed, now_ms: u64) -> bool {
        if self.spaces.contains_key(space_id) {
            return false;
        }

        let mut vessels = BTreeMap::new();
        let mut last_vessel_by_user = BTreeMap::new();
        for mut vessel in seed.vessels {
            if vessel.space_id != space_id {
                continue;
            }
            // Nobody is connected yet, so restored vessels start crewless under AI.
            vessel.crew_ids.clear();
            vessel.crew_names.clear();
            vessel.stations.clear();
            vessel.mode = VesselMode::Ai;
            vessel.desired_mode = VesselMode::Ai;
            if vessel.is_active() {
                if let Some(owner) = &vessel.owner_id {
                    last_vessel_by_user
                        .entry(owner.clone())
                        .or_insert_with(|| vessel.id.clone());
                }
            }
            vessels.insert(vessel.id.clone(), vessel);
        }

        let mut environment = seed.environment.unwrap_or_default();
        environment.tide = env_model::compute_tide(now_ms, space_id, environment.tide_range_override);
        let mut events: Vec<ScheduledEnvironmentEvent> = seed
            .events
            .into_iter()
            .filter(|event| event.space_id == space_id)
            .collect();
        events.sort_by(|a, b| a.run_at.cmp(&b.run_at).then_with(|| a.id.cmp(&b.id)));

        let rng_seed = self.config.seed ^ u64::from(env_model::space_hash(space_id));
        self.spaces.insert(
            space_id.to_string(),
            SpaceState {
                space_id: space_id.to_string(),
                tuning: self.config.tuning_for(space_id),
                rules: seed.rules,
                vessels,
                crew_index: BTreeMap::new(),
                last_vessel_by_user,
                environment,
                events,
                cooldowns: CooldownTracker::new(),
                rng: StdRng::seed_from_u64(rng_seed),
                sockets: BTreeMap::new(),
                pending_full: BTreeSet::new(),
                changed: BTreeSet::new(),
                environment_dirty: false,
                last_tick_at: None,
                last_weather_rotation_at: now_ms,
                tick_count: 0,
            },
        );
        true
    }

    /// Replaces the cached rule context. Returns false for an inactive space.
    pub fn set_rules(&mut self, space_id: &str, rules: RuleContext) -> bool {
        match self.spaces.get_mut(space_id) {
            Some(space) => {
                space.rules = rules;
                true
            }
            None => false,
        }
    }

    /// Joins the connection to the space room. It receives a full snapshot on
    /// the next tick.
    pub fn attach_socket(
        &mut self,
        space_id: &str,
        connection_id: ConnectionId,
        user_id: &str,
    ) -> Result<(), CommandRejection> {
        let space = self.space_mut(space_id)?;
        space.sockets.insert(connection_id, user_id.to_string());
        space.pending_full.insert(connection_id);
        Ok(())
    }

    /// Rebinds a connection to a new identity after `user:auth`.
    pub fn rebind_socket(
        &mut self,
        space_id: &str,
        connection_id: ConnectionId,
        user_id: &str,
    ) -> Result<(), CommandRejection> {
        let space = self.space_mut(space_id)?;
        if let Some(bound) = space.sockets.get_mut(&connection_id) {
            *bound = user_id.to_string();
        }
        space.pending_full.insert(connection_id);
        Ok(())
    }

    pub fn detach_socket(&mut self, space_id: &str, connection_id: ConnectionId) -> bool {
        let Some(space) = self.spaces.get_mut(space_id) else {
            return false;
        };
        space.pending_full.remove(&connection_id);
        space.sockets.remove(&connection_id).is_some()
    }
}
