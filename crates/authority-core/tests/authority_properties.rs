use authority_core::arbiter::stations_reference_crew;
use authority_core::cooldown::{CooldownKey, CooldownKind, CooldownTracker};
use authority_core::environment::process_due_events;
use authority_core::world::{SpaceSeed, WorldState};
use contracts::{
    ConnectionId, Environment, EnvironmentPatch, ScheduledEnvironmentEvent, SimulationConfig,
    SpaceTuning, Station, StationAction, VesselMode, WindPatch,
};
use proptest::prelude::*;

const USERS: [&str; 3] = ["alice", "bob", "carol"];
const GRACE_MS: u64 = 1_000;

#[derive(Debug, Clone)]
enum CrewOp {
    Join(usize),
    Leave(usize),
    Claim(usize, usize),
    Release(usize, usize),
    Advance(u64),
}

fn crew_op() -> impl Strategy<Value = CrewOp> {
    prop_oneof![
        (0..USERS.len()).prop_map(CrewOp::Join),
        (0..USERS.len()).prop_map(CrewOp::Leave),
        (0..USERS.len(), 0..3_usize).prop_map(|(user, station)| CrewOp::Claim(user, station)),
        (0..USERS.len(), 0..3_usize).prop_map(|(user, station)| CrewOp::Release(user, station)),
        (1_u64..800).prop_map(CrewOp::Advance),
    ]
}

fn grace_world() -> WorldState {
    let mut config = SimulationConfig::default();
    config.space_overrides.insert(
        "bay".to_string(),
        SpaceTuning {
            ai_grace_ms: Some(GRACE_MS),
            ..SpaceTuning::default()
        },
    );
    let mut world = WorldState::new(config);
    world.activate_space("bay", SpaceSeed::default(), 0);
    world
        .attach_socket("bay", ConnectionId(0), "observer")
        .expect("attached");
    world
}

fn squall(run_at: u64, end_at: Option<u64>) -> ScheduledEnvironmentEvent {
    ScheduledEnvironmentEvent {
        id: format!("squall-{run_at}"),
        space_id: "bay".to_string(),
        name: None,
        pattern: None,
        payload: Some(EnvironmentPatch {
            wind: Some(WindPatch {
                speed: Some(20.0),
                ..WindPatch::default()
            }),
            ..EnvironmentPatch::default()
        }),
        run_at,
        end_at,
        end_payload: None,
        captured_restore: None,
        executed_at: None,
        ended_at: None,
        enabled: true,
    }
}

proptest! {
    #[test]
    fn crew_membership_and_modes_stay_consistent(ops in prop::collection::vec(crew_op(), 1..60)) {
        let mut world = grace_world();
        let mut now = 0_u64;
        for op in ops {
            match op {
                CrewOp::Join(user) => {
                    world.assign_vessel("bay", USERS[user], USERS[user], now).expect("assign");
                }
                CrewOp::Leave(user) => {
                    world.depart_crew("bay", USERS[user], now);
                }
                CrewOp::Claim(user, station) => {
                    let _ = world.set_station("bay", USERS[user], Station::ALL[station], StationAction::Claim, false);
                }
                CrewOp::Release(user, station) => {
                    let _ = world.set_station("bay", USERS[user], Station::ALL[station], StationAction::Release, false);
                }
                CrewOp::Advance(ms) => {
                    now += ms;
                    world.tick(now);
                }
            }

            let space = world.space("bay").expect("space");
            for user in USERS {
                let crewing = space
                    .vessels()
                    .values()
                    .filter(|vessel| vessel.has_crew_member(user))
                    .count();
                prop_assert!(crewing <= 1, "{user} crews {crewing} vessels");
                prop_assert_eq!(crewing == 1, space.crew_index().contains_key(user));
            }
            for vessel in space.vessels().values() {
                prop_assert!(stations_reference_crew(vessel));
                if !vessel.crew_ids.is_empty() {
                    prop_assert_eq!(vessel.mode, VesselMode::Player);
                }
            }
        }

        now += GRACE_MS + 1;
        world.tick(now);
        let space = world.space("bay").expect("space");
        for vessel in space.vessels().values() {
            if vessel.crew_ids.is_empty() {
                prop_assert_eq!(vessel.mode, VesselMode::Ai);
            }
        }
    }

    #[test]
    fn pair_cooldown_fires_at_most_once_per_window(
        window in 1_u64..5_000,
        attempts in prop::collection::vec((0_u64..20_000, any::<bool>()), 1..80),
    ) {
        let mut tracker = CooldownTracker::new();
        let mut times: Vec<(u64, bool)> = attempts;
        times.sort_by_key(|(at, _)| *at);

        let mut fired = Vec::new();
        for (at, swapped) in times {
            let (a, b) = if swapped { ("v2", "v1") } else { ("v1", "v2") };
            if tracker.try_trigger(CooldownKey::pair(CooldownKind::Collision, a, b), at, window) {
                fired.push(at);
            }
        }
        prop_assert!(!fired.is_empty());
        for pair in fired.windows(2) {
            prop_assert!(pair[1] - pair[0] >= window);
        }
        prop_assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn replaying_due_events_is_a_no_op(
        run_at in 0_u64..5_000,
        duration in prop::option::of(1_u64..5_000),
        now in 0_u64..12_000,
    ) {
        let mut env = Environment::default();
        let mut events = vec![squall(run_at, duration.map(|d| run_at + d))];

        let first = process_due_events(&mut env, &mut events, now).expect("valid event");
        let after_first = (env.clone(), events.clone());
        let second = process_due_events(&mut env, &mut events, now).expect("valid event");

        prop_assert!(second.is_empty());
        prop_assert_eq!((env, events), after_first);
        prop_assert_eq!(first.is_empty(), now < run_at);
    }
}
