//! Realtime facade over the authority core: session admission, command
//! dispatch, the tick driver, background workers and SQLite collaborators.

mod collaborators;
mod metrics;
mod persistence;
mod router;
mod server;
mod session;
mod settings;
mod workers;

use authority_core::world::{SpaceSeed, WorldState};
use authority_core::{Audience, CommandRejection, Effects, TickReport};
use contracts::messages::{SessionInfo, UserMode};
use contracts::{
    ClientMessage, ConnectionId, Environment, RuleContext, ScheduleEventRequest,
    ScheduledEnvironmentEvent, ServerMessage, SimulationConfig, StationAction, VesselSnapshot,
    WeatherOverride,
};
use serde::Serialize;

pub use collaborators::{
    BanList, BanRecord, CollaboratorError, Collaborators, EconomyLedger, MemoryCollaborators,
    RuleContextSource, VesselStore,
};
pub use metrics::{DriverTimings, ServerMetrics, SpaceMetrics, TimingBucket};
pub use persistence::{PersistenceError, SqliteStore};
pub use router::{ConnectionDirectory, EffectRouter, Outbound, RoomFrame};
pub use server::{serve, ServerError};
pub use session::{
    resolve_identity, AdmissionError, Claims, Identity, Session, SessionRegistry, TokenError,
    TokenSigner,
};
pub use settings::{load_config_file, token_secret, ServerSettings, SettingsError};
pub use workers::{
    spawn_economy_worker, spawn_persist_worker, EconomyJob, EconomyStats, PersistJob,
    PersistStats, PersistThrottle,
};

pub const EVICTION_NOTICE: &str = "You were signed in elsewhere";

/// Result of admitting or re-identifying a connection.
#[derive(Debug)]
pub struct Admission {
    pub connection_id: ConnectionId,
    pub session: SessionInfo,
    /// Older connection of the same user in the same space, now closed.
    pub evicted: Option<ConnectionId>,
    pub effects: Effects,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpaceStatus {
    pub space_id: String,
    pub connected_sockets: usize,
    pub sessions: usize,
    pub tick_count: u64,
    pub rules: RuleContext,
    pub environment: Environment,
    pub vessels: Vec<VesselSnapshot>,
    pub pending_events: usize,
    pub metrics: SpaceMetrics,
    pub timings: DriverTimings,
}

/// Single-writer owner of the world and the live sessions. Every method runs
/// to completion without I/O; the returned effects are routed by the caller.
#[derive(Debug)]
pub struct AuthorityRuntime {
    world: WorldState,
    sessions: SessionRegistry,
    next_connection: u64,
    timings: DriverTimings,
}

impl AuthorityRuntime {
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            world: WorldState::new(config),
            sessions: SessionRegistry::new(),
            next_connection: 1,
            timings: DriverTimings::default(),
        }
    }

    pub fn world(&self) -> &WorldState {
        &self.world
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn activate_space(&mut self, space_id: &str, seed: SpaceSeed, now_ms: u64) -> bool {
        self.world.activate_space(space_id, seed, now_ms)
    }

    pub fn set_rules(&mut self, space_id: &str, rules: RuleContext) -> bool {
        self.world.set_rules(space_id, rules)
    }

    /// Registers a new connection for `identity` in an active space and, for
    /// crew-capable identities, puts the user on a vessel.
    pub fn admit(
        &mut self,
        identity: Identity,
        space_id: &str,
        now_ms: u64,
    ) -> Result<Admission, CommandRejection> {
        if !self.world.is_space_active(space_id) {
            return Err(CommandRejection::SpaceNotActive(space_id.to_string()));
        }
        let connection_id = ConnectionId(self.next_connection);
        self.next_connection += 1;

        // The previous connection is gone before the new one is registered.
        let evicted = self
            .sessions
            .active_for(space_id, &identity.user_id)
            .and_then(|previous| self.sessions.remove(previous))
            .map(|previous| previous.connection_id);
        if let Some(previous) = evicted {
            self.world.detach_socket(space_id, previous);
        }
        self.sessions.admit(Session {
            connection_id,
            identity: identity.clone(),
            space_id: space_id.to_string(),
            vessel_id: None,
        });
        self.world
            .attach_socket(space_id, connection_id, &identity.user_id)?;

        let assignment_effects = self.board(connection_id, &identity, space_id, now_ms);
        Ok(self.admission(connection_id, evicted, assignment_effects))
    }

    /// Swaps the identity behind an existing connection after `user:auth`.
    /// Returns `None` for an unknown connection.
    pub fn reauthenticate(
        &mut self,
        connection_id: ConnectionId,
        identity: Identity,
        now_ms: u64,
    ) -> Option<Admission> {
        let session = self.sessions.get(connection_id)?;
        let space_id = session.space_id.clone();
        let previous_user = session.identity.user_id.clone();

        let mut effects = Effects::new();
        let mut evicted = None;
        if previous_user == identity.user_id {
            if let Some(session) = self.sessions.get_mut(connection_id) {
                session.identity = identity.clone();
            }
        } else {
            effects.extend(self.world.depart_crew(&space_id, &previous_user, now_ms));
            evicted = self
                .sessions
                .reidentify(connection_id, identity.clone())
                .map(|session| session.connection_id);
            if let Some(previous) = evicted {
                self.world.detach_socket(&space_id, previous);
            }
            if let Err(rejection) =
                self.world
                    .rebind_socket(&space_id, connection_id, &identity.user_id)
            {
                effects.send(
                    Audience::Connection(connection_id),
                    ServerMessage::error(rejection.to_string()),
                );
            }
        }

        effects.extend(self.board(connection_id, &identity, &space_id, now_ms));
        Some(self.admission(connection_id, evicted, effects))
    }

    /// Tears down a connection. The user leaves their vessel only when this
    /// was their live session; evicted connections leave nothing behind.
    pub fn disconnect(&mut self, connection_id: ConnectionId, now_ms: u64) -> Effects {
        let Some(session) = self.sessions.remove(connection_id) else {
            return Effects::new();
        };
        self.world.detach_socket(&session.space_id, connection_id);
        self.world
            .depart_crew(&session.space_id, &session.identity.user_id, now_ms)
    }

    /// Applies one inbound socket event. Guests are ignored on every
    /// mutating event; `user:auth` is resolved by the transport and passed to
    /// [`AuthorityRuntime::reauthenticate`].
    pub fn handle(
        &mut self,
        connection_id: ConnectionId,
        message: ClientMessage,
        now_ms: u64,
    ) -> Effects {
        let Some(session) = self.sessions.get(connection_id) else {
            return Effects::new();
        };
        let identity = session.identity.clone();
        if message.is_mutating() && identity.is_guest() {
            return Effects::new();
        }
        if let Some((resource, action)) = required_permission(&message) {
            if !identity.can(resource, action) {
                return reply(connection_id, ServerMessage::error("Not permitted"));
            }
        }
        let space_id = session.space_id.clone();
        let user_id = identity.user_id.clone();
        let is_admin = identity.is_admin();

        let outcome = match message {
            ClientMessage::VesselUpdate(update) => {
                self.world
                    .apply_vessel_update(&space_id, &user_id, is_admin, &update, now_ms)
            }
            ClientMessage::VesselControl(control) => {
                self.world
                    .apply_control(&space_id, &user_id, is_admin, &control, now_ms)
            }
            ClientMessage::StationClaim(payload) => self
                .world
                .set_station(&space_id, &user_id, payload.station, StationAction::Claim, is_admin)
                .map(|(result, effects)| with_reply(effects, connection_id, ServerMessage::StationResult(result))),
            ClientMessage::StationRelease(payload) => self
                .world
                .set_station(&space_id, &user_id, payload.station, StationAction::Release, is_admin)
                .map(|(result, effects)| with_reply(effects, connection_id, ServerMessage::StationResult(result))),
            ClientMessage::VesselRepair(payload) => self
                .world
                .repair_vessel(&space_id, &user_id, is_admin, payload.vessel_id.as_deref(), now_ms)
                .map(|(result, effects)| with_reply(effects, connection_id, ServerMessage::RepairResult(result))),
            ClientMessage::VesselLeave => Ok(self.world.depart_crew(&space_id, &user_id, now_ms)),
            ClientMessage::VesselJoin(payload) => self
                .world
                .join_vessel(
                    &space_id,
                    &user_id,
                    &identity.username,
                    payload.vessel_id.as_deref(),
                    now_ms,
                )
                .map(|assignment| assignment.effects),
            ClientMessage::UserMode(payload) => match payload.mode {
                UserMode::Spectator => Ok(self.world.depart_crew(&space_id, &user_id, now_ms)),
                UserMode::Player if !identity.can_crew() => Err(CommandRejection::NotPermitted(
                    "Your role does not permit player mode".to_string(),
                )),
                UserMode::Player => Ok(self.board(connection_id, &identity, &space_id, now_ms)),
            },
            ClientMessage::AdminWeather(weather) => {
                self.world.apply_weather_override(&space_id, &weather, now_ms)
            }
            ClientMessage::AdminVesselMode(payload) => {
                self.world
                    .set_vessel_mode(&space_id, &payload.vessel_id, payload.mode, now_ms)
            }
            ClientMessage::UserAuth(_) => Ok(Effects::new()),
        };

        self.sync_vessel(connection_id);
        match outcome {
            Ok(effects) => effects,
            Err(rejection) => reply(connection_id, ServerMessage::error(rejection.to_string())),
        }
    }

    pub fn tick(&mut self, now_ms: u64) -> TickReport {
        self.world.tick(now_ms)
    }

    pub fn schedule_event(
        &mut self,
        space_id: &str,
        request: ScheduleEventRequest,
        now_ms: u64,
    ) -> Result<(ScheduledEnvironmentEvent, Effects), CommandRejection> {
        self.world.schedule_event(space_id, request, now_ms)
    }

    pub fn override_weather(
        &mut self,
        space_id: &str,
        weather: &WeatherOverride,
        now_ms: u64,
    ) -> Result<(Environment, Effects), CommandRejection> {
        let effects = self.world.apply_weather_override(space_id, weather, now_ms)?;
        let environment = self
            .world
            .space(space_id)
            .map(|space| space.environment().clone())
            .unwrap_or_default();
        Ok((environment, effects))
    }

    pub fn status(&self, space_id: &str) -> Option<SpaceStatus> {
        let space = self.world.space(space_id)?;
        Some(SpaceStatus {
            space_id: space.space_id().to_string(),
            connected_sockets: space.socket_count(),
            sessions: self
                .sessions
                .iter()
                .filter(|session| session.space_id == space_id)
                .count(),
            tick_count: space.tick_count(),
            rules: space.rules().clone(),
            environment: space.environment().clone(),
            vessels: space
                .vessels()
                .values()
                .filter(|vessel| vessel.is_active())
                .map(VesselSnapshot::from)
                .collect(),
            pending_events: space.events().iter().filter(|event| event.is_pending()).count(),
            metrics: SpaceMetrics::of(space),
            timings: self.timings,
        })
    }

    pub fn record_tick_duration(&mut self, ms: f64, now_ms: u64) {
        self.timings.tick.record(ms);
        self.timings.updated_at = now_ms;
    }

    pub fn record_broadcast_duration(&mut self, ms: f64, now_ms: u64) {
        self.timings.broadcast.record(ms);
        self.timings.updated_at = now_ms;
    }

    pub fn metrics(&self) -> ServerMetrics {
        ServerMetrics {
            connected: self.sessions.len(),
            timings: self.timings,
            spaces: self.world.spaces().map(SpaceMetrics::of).collect(),
        }
    }

    fn board(
        &mut self,
        connection_id: ConnectionId,
        identity: &Identity,
        space_id: &str,
        now_ms: u64,
    ) -> Effects {
        if !identity.can_crew() {
            return Effects::new();
        }
        let already_aboard = self
            .world
            .space(space_id)
            .and_then(|space| space.vessel_for_user(&identity.user_id))
            .is_some();
        if already_aboard {
            self.sync_vessel(connection_id);
            return Effects::new();
        }
        match self
            .world
            .assign_vessel(space_id, &identity.user_id, &identity.username, now_ms)
        {
            Ok(assignment) => {
                self.sync_vessel(connection_id);
                assignment.effects
            }
            Err(rejection) => reply(connection_id, ServerMessage::error(rejection.to_string())),
        }
    }

    fn admission(
        &self,
        connection_id: ConnectionId,
        evicted: Option<ConnectionId>,
        effects: Effects,
    ) -> Admission {
        let session = self
            .sessions
            .get(connection_id)
            .map(Session::info)
            .unwrap_or_else(|| SessionInfo {
                connection_id: connection_id.0,
                user_id: String::new(),
                username: String::new(),
                roles: Vec::new(),
                permissions: Vec::new(),
                space_id: String::new(),
                vessel_id: None,
            });
        let mut ordered = reply(connection_id, ServerMessage::SessionReady(session.clone()));
        ordered.extend(effects);
        Admission {
            connection_id,
            session,
            evicted,
            effects: ordered,
        }
    }

    fn sync_vessel(&mut self, connection_id: ConnectionId) {
        let Some(session) = self.sessions.get(connection_id) else {
            return;
        };
        let vessel_id = self
            .world
            .space(&session.space_id)
            .and_then(|space| space.vessel_for_user(&session.identity.user_id))
            .map(|vessel| vessel.id.clone());
        if let Some(session) = self.sessions.get_mut(connection_id) {
            session.vessel_id = vessel_id;
        }
    }
}

fn required_permission(message: &ClientMessage) -> Option<(&'static str, &'static str)> {
    match message {
        ClientMessage::VesselUpdate(_) | ClientMessage::VesselLeave => Some(("vessel", "update")),
        ClientMessage::VesselControl(_) => Some(("vessel", "control")),
        ClientMessage::StationClaim(_) | ClientMessage::StationRelease(_) => {
            Some(("station", "claim"))
        }
        ClientMessage::VesselRepair(_) => Some(("vessel", "repair")),
        ClientMessage::VesselJoin(_) => Some(("vessel", "join")),
        ClientMessage::UserMode(_) => Some(("user", "mode")),
        ClientMessage::AdminWeather(_) => Some(("environment", "admin")),
        ClientMessage::AdminVesselMode(_) => Some(("vessel", "mode")),
        ClientMessage::UserAuth(_) => None,
    }
}

fn reply(connection_id: ConnectionId, message: ServerMessage) -> Effects {
    let mut effects = Effects::new();
    effects.send(Audience::Connection(connection_id), message);
    effects
}

fn with_reply(mut effects: Effects, connection_id: ConnectionId, message: ServerMessage) -> Effects {
    effects.send(Audience::Connection(connection_id), message);
    effects
}

#[cfg(test)]
mod tests {
    use authority_core::Effect;
    use contracts::messages::{
        ControlPayload, JoinPayload, StationPayload, UserModePayload, VesselModePayload,
    };
    use contracts::{Role, Station, VesselMode};

    use super::*;

    fn player(user_id: &str) -> Identity {
        Identity::from_claims(Claims {
            sub: user_id.to_string(),
            name: user_id.to_string(),
            roles: vec![Role::Player],
            exp: None,
        })
    }

    fn with_role(user_id: &str, role: Role) -> Identity {
        Identity::from_claims(Claims {
            sub: user_id.to_string(),
            name: user_id.to_string(),
            roles: vec![role],
            exp: None,
        })
    }

    fn guest() -> Identity {
        Identity {
            user_id: "guest_abc1234".to_string(),
            username: "Guest".to_string(),
            roles: vec![Role::Guest],
            permissions: Vec::new(),
        }
    }

    fn runtime() -> AuthorityRuntime {
        let mut runtime = AuthorityRuntime::new(SimulationConfig::default());
        runtime.activate_space("bay", SpaceSeed::default(), 0);
        runtime
    }

    fn direct_errors(effects: &Effects, connection_id: ConnectionId) -> Vec<String> {
        effects
            .messages()
            .filter_map(|(audience, message)| match (audience, message) {
                (Audience::Connection(target), ServerMessage::Error(text))
                    if *target == connection_id =>
                {
                    Some(text.clone())
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn admitting_a_player_boards_a_vessel_and_announces_session() {
        let mut runtime = runtime();
        let admission = runtime.admit(player("alice"), "bay", 0).expect("admitted");

        let vessel_id = admission.session.vessel_id.clone().expect("boarded");
        assert!(admission.evicted.is_none());
        assert!(matches!(
            admission.effects.messages().next(),
            Some((Audience::Connection(_), ServerMessage::SessionReady(_)))
        ));
        assert!(admission
            .effects
            .messages()
            .any(|(_, message)| matches!(message, ServerMessage::VesselJoined(_))));
        let space = runtime.world().space("bay").expect("space");
        assert_eq!(
            space.vessel(&vessel_id).map(|vessel| vessel.mode),
            Some(VesselMode::Player)
        );
    }

    #[test]
    fn guests_and_spectators_watch_without_a_vessel() {
        let mut runtime = runtime();
        let guest = runtime.admit(guest(), "bay", 0).expect("guest");
        let spectator = runtime
            .admit(with_role("sam", Role::Spectator), "bay", 0)
            .expect("spectator");

        assert!(guest.session.vessel_id.is_none());
        assert!(spectator.session.vessel_id.is_none());
        assert_eq!(runtime.world().space("bay").map(|space| space.socket_count()), Some(2));
    }

    #[test]
    fn guest_mutations_are_silently_dropped() {
        let mut runtime = runtime();
        let connection = runtime.admit(guest(), "bay", 0).expect("guest").connection_id;

        let effects = runtime.handle(
            connection,
            ClientMessage::VesselControl(ControlPayload {
                throttle: Some(1.0),
                rudder_angle: None,
            }),
            10,
        );
        assert!(effects.is_empty());
    }

    #[test]
    fn spectator_mutation_is_refused_with_error() {
        let mut runtime = runtime();
        let connection = runtime
            .admit(with_role("sam", Role::Spectator), "bay", 0)
            .expect("spectator")
            .connection_id;

        let effects = runtime.handle(connection, ClientMessage::VesselLeave, 10);
        assert_eq!(direct_errors(&effects, connection), vec!["Not permitted"]);
    }

    #[test]
    fn reconnect_evicts_previous_connection_and_keeps_the_vessel() {
        let mut runtime = runtime();
        let first = runtime.admit(player("alice"), "bay", 0).expect("first");
        let second = runtime.admit(player("alice"), "bay", 500).expect("second");

        assert_eq!(second.evicted, Some(first.connection_id));
        assert_eq!(second.session.vessel_id, first.session.vessel_id);
        assert_eq!(runtime.sessions().len(), 1);

        // The evicted socket closing later must not pull alice off her vessel.
        assert!(runtime.disconnect(first.connection_id, 600).is_empty());
        let space = runtime.world().space("bay").expect("space");
        assert_eq!(space.socket_count(), 1);
        assert!(space.vessel_for_user("alice").is_some());
    }

    #[test]
    fn disconnect_departs_crew_with_forced_write() {
        let mut runtime = runtime();
        let admission = runtime.admit(player("alice"), "bay", 0).expect("admitted");

        let effects = runtime.disconnect(admission.connection_id, 100);
        assert_eq!(effects.forced_vessel_writes(), 1);
        assert!(effects
            .messages()
            .any(|(_, message)| matches!(message, ServerMessage::VesselLeft(_))));
        assert!(runtime.sessions().is_empty());
    }

    #[test]
    fn station_claim_result_goes_to_the_caller() {
        let mut runtime = runtime();
        let alice = runtime.admit(player("alice"), "bay", 0).expect("alice");
        let vessel_id = alice.session.vessel_id.clone().expect("vessel");

        let claim = ClientMessage::StationClaim(StationPayload {
            station: Station::Helm,
        });
        let effects = runtime.handle(alice.connection_id, claim, 10);
        let results: Vec<_> = effects
            .messages()
            .filter_map(|(_, message)| match message {
                ServerMessage::StationResult(result) => Some(result.ok),
                _ => None,
            })
            .collect();
        assert_eq!(results, vec![true]);
        let helm = runtime
            .world()
            .space("bay")
            .and_then(|space| space.vessel(&vessel_id))
            .and_then(|vessel| vessel.stations.holder_id(Station::Helm).map(str::to_string));
        assert_eq!(helm.as_deref(), Some("alice"));
    }

    #[test]
    fn user_auth_upgrades_guest_to_player_with_vessel() {
        let mut runtime = runtime();
        let connection = runtime.admit(guest(), "bay", 0).expect("guest").connection_id;

        let upgraded = runtime
            .reauthenticate(connection, player("alice"), 50)
            .expect("known connection");
        assert_eq!(upgraded.connection_id, connection);
        assert_eq!(upgraded.session.user_id, "alice");
        assert!(upgraded.session.vessel_id.is_some());
        assert_eq!(runtime.sessions().active_for("bay", "alice"), Some(connection));
        assert!(runtime.sessions().active_for("bay", "guest_abc1234").is_none());
    }

    #[test]
    fn admin_weather_requires_environment_permission() {
        let mut runtime = runtime();
        let alice = runtime.admit(player("alice"), "bay", 0).expect("alice").connection_id;
        let root = runtime
            .admit(with_role("root", Role::Admin), "bay", 0)
            .expect("admin")
            .connection_id;
        let calm = ClientMessage::AdminWeather(WeatherOverride {
            preset: Some("calm".to_string()),
            patch: None,
        });

        let refused = runtime.handle(alice, calm.clone(), 10);
        assert_eq!(direct_errors(&refused, alice), vec!["Not permitted"]);

        let applied = runtime.handle(root, calm, 10);
        assert!(applied.iter().any(|effect| matches!(
            effect,
            Effect::PersistEnvironment { force: true, .. }
        )));
    }

    #[test]
    fn reconnect_unbinds_the_old_connection_before_the_new_one_is_live() {
        let mut runtime = runtime();
        let first = runtime.admit(player("alice"), "bay", 0).expect("first");
        let second = runtime.admit(player("alice"), "bay", 10).expect("second");

        let space = runtime.world().space("bay").expect("space");
        assert!(!space.has_socket(first.connection_id));
        assert!(space.has_socket(second.connection_id));
        assert!(runtime.sessions().get(first.connection_id).is_none());
        assert_eq!(
            runtime.sessions().active_for("bay", "alice"),
            Some(second.connection_id)
        );
    }

    #[test]
    fn user_mode_switches_between_spectating_and_crewing() {
        let mut runtime = runtime();
        let alice = runtime.admit(player("alice"), "bay", 0).expect("alice");
        let vessel_id = alice.session.vessel_id.clone().expect("boarded");
        let mode = |mode| ClientMessage::UserMode(UserModePayload { mode });

        let watching = runtime.handle(alice.connection_id, mode(UserMode::Spectator), 10);
        assert!(watching
            .messages()
            .any(|(_, message)| matches!(message, ServerMessage::VesselLeft(_))));
        assert!(runtime
            .sessions()
            .get(alice.connection_id)
            .is_some_and(|session| session.vessel_id.is_none()));

        let crewing = runtime.handle(alice.connection_id, mode(UserMode::Player), 20);
        assert!(direct_errors(&crewing, alice.connection_id).is_empty());
        assert_eq!(
            runtime
                .sessions()
                .get(alice.connection_id)
                .and_then(|session| session.vessel_id.clone()),
            Some(vessel_id)
        );

        let sam = runtime
            .admit(with_role("sam", Role::Spectator), "bay", 0)
            .expect("spectator")
            .connection_id;
        let refused = runtime.handle(sam, mode(UserMode::Player), 30);
        assert_eq!(
            direct_errors(&refused, sam),
            vec!["Your role does not permit player mode"]
        );
        assert!(runtime.handle(sam, mode(UserMode::Spectator), 30).is_empty());
    }

    #[test]
    fn vessel_join_moves_the_caller_onto_the_named_vessel() {
        let mut runtime = runtime();
        let alice = runtime.admit(player("alice"), "bay", 0).expect("alice");
        let bob = runtime.admit(player("bob"), "bay", 0).expect("bob");
        let target = alice.session.vessel_id.clone().expect("alice boarded");

        runtime.handle(
            bob.connection_id,
            ClientMessage::VesselJoin(JoinPayload {
                vessel_id: Some(target.clone()),
            }),
            10,
        );
        assert_eq!(
            runtime
                .sessions()
                .get(bob.connection_id)
                .and_then(|session| session.vessel_id.clone()),
            Some(target)
        );

        let missing = runtime.handle(
            bob.connection_id,
            ClientMessage::VesselJoin(JoinPayload {
                vessel_id: Some("nope".to_string()),
            }),
            20,
        );
        assert_eq!(
            direct_errors(&missing, bob.connection_id),
            vec!["vessel nope not found"]
        );
    }

    #[test]
    fn admin_vessel_mode_is_admin_only_and_hands_off_next_tick() {
        let mut runtime = runtime();
        let alice = runtime.admit(player("alice"), "bay", 0).expect("alice");
        let vessel_id = alice.session.vessel_id.clone().expect("boarded");
        let root = runtime
            .admit(with_role("root", Role::Admin), "bay", 0)
            .expect("admin")
            .connection_id;
        let to_ai = ClientMessage::AdminVesselMode(VesselModePayload {
            vessel_id: vessel_id.clone(),
            mode: VesselMode::Ai,
        });

        let refused = runtime.handle(alice.connection_id, to_ai.clone(), 10);
        assert_eq!(direct_errors(&refused, alice.connection_id), vec!["Not permitted"]);

        let applied = runtime.handle(root, to_ai, 1_000);
        assert!(applied.forced_vessel_writes() >= 1);
        assert!(runtime.tick(1_000).demoted.is_empty());
        let report = runtime.tick(1_200);
        assert_eq!(report.demoted, vec![("bay".to_string(), vessel_id)]);
    }

    #[test]
    fn status_reports_population_and_timings() {
        let mut runtime = runtime();
        runtime.admit(player("alice"), "bay", 0).expect("alice");
        runtime
            .admit(with_role("sam", Role::Spectator), "bay", 0)
            .expect("sam");
        runtime.record_tick_duration(2.5, 100);

        let status = runtime.status("bay").expect("active");
        assert_eq!(status.metrics.connected, 2);
        assert_eq!(status.metrics.player_vessels, 1);
        assert_eq!(status.metrics.ai_vessels, 0);
        assert_eq!(status.timings.tick.count, 1);

        let payload = serde_json::to_value(&status).expect("encode");
        assert_eq!(payload["metrics"]["player_vessels"], 1);
        assert_eq!(payload["timings"]["tick"]["last_ms"], 2.5);

        let metrics = runtime.metrics();
        assert_eq!(metrics.connected, 2);
        assert_eq!(metrics.spaces.len(), 1);
    }

    #[test]
    fn unknown_space_is_not_admitted_until_activated() {
        let mut runtime = AuthorityRuntime::new(SimulationConfig::default());
        assert_eq!(
            runtime.admit(player("alice"), "nowhere", 0).map(|admission| admission.connection_id),
            Err(CommandRejection::SpaceNotActive("nowhere".to_string()))
        );
        assert!(runtime.status("nowhere").is_none());
        runtime.activate_space("nowhere", SpaceSeed::default(), 0);
        let status = runtime.status("nowhere").expect("active");
        assert_eq!(status.connected_sockets, 0);
    }
}
