//! Crew membership, vessel selection and station arbitration. Every function
//! here leaves station holders referencing current crew members only.

use std::collections::BTreeMap;

use contracts::messages::StationResult;
use contracts::{Station, StationAction, StationHolder, Vessel, VesselMode, VesselStatus};

/// Outcome of the vessel resolution order for a connecting user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VesselChoice {
    Requested(String),
    LastKnown(String),
    ExistingCrew(String),
    IdleAi(String),
    CreateNew,
}

impl VesselChoice {
    pub fn vessel_id(&self) -> Option<&str> {
        match self {
            Self::Requested(id)
            | Self::LastKnown(id)
            | Self::ExistingCrew(id)
            | Self::IdleAi(id) => Some(id),
            Self::CreateNew => None,
        }
    }
}

fn has_room(vessel: &Vessel, user_id: &str, max_crew: usize) -> bool {
    vessel.has_crew_member(user_id) || vessel.crew_ids.len() < max_crew
}

/// Resolution order: last-known vessel (unless stored), a vessel already
/// listing the user as crew, a crewless AI vessel (the user's own first, then
/// lowest id), and finally a new vessel.
pub fn choose_vessel(
    vessels: &BTreeMap<String, Vessel>,
    last_known: Option<&str>,
    user_id: &str,
    max_crew: usize,
) -> VesselChoice {
    if let Some(vessel) = last_known.and_then(|id| vessels.get(id)) {
        if vessel.status != VesselStatus::Stored && has_room(vessel, user_id, max_crew) {
            return VesselChoice::LastKnown(vessel.id.clone());
        }
    }

    if let Some(vessel) = vessels
        .values()
        .find(|vessel| vessel.is_active() && vessel.has_crew_member(user_id))
    {
        return VesselChoice::ExistingCrew(vessel.id.clone());
    }

    let mut idle = vessels.values().filter(|vessel| {
        vessel.is_active() && vessel.mode == VesselMode::Ai && vessel.crew_ids.is_empty()
    });
    let own = idle
        .clone()
        .find(|vessel| vessel.owner_id.as_deref() == Some(user_id));
    if let Some(vessel) = own.or_else(|| idle.next()) {
        return VesselChoice::IdleAi(vessel.id.clone());
    }

    VesselChoice::CreateNew
}

/// A crewed player vessel with room that the user is not already on; the
/// least crewed wins, then the lowest id.
pub fn find_joinable<'a>(
    vessels: &'a BTreeMap<String, Vessel>,
    user_id: &str,
    max_crew: usize,
) -> Option<&'a Vessel> {
    vessels
        .values()
        .filter(|vessel| {
            vessel.is_active()
                && vessel.mode == VesselMode::Player
                && !vessel.crew_ids.is_empty()
                && vessel.crew_ids.len() < max_crew
                && !vessel.has_crew_member(user_id)
        })
        .min_by_key(|vessel| vessel.crew_ids.len())
}

/// Why an explicitly requested vessel cannot take the user, if it cannot.
pub fn join_refusal(vessel: &Vessel, user_id: &str, max_crew: usize) -> Option<&'static str> {
    if !vessel.is_active() {
        Some("Vessel is stored")
    } else if !has_room(vessel, user_id, max_crew) {
        Some("Selected vessel is at max crew")
    } else {
        None
    }
}

/// Adds the user to the crew, promotes the vessel to player mode and hands the
/// user every free station. Returns the stations claimed.
pub fn join_crew(vessel: &mut Vessel, user_id: &str, username: &str, now_ms: u64) -> Vec<Station> {
    vessel.crew_ids.insert(user_id.to_string());
    vessel
        .crew_names
        .insert(user_id.to_string(), username.to_string());
    vessel.mode = VesselMode::Player;
    vessel.desired_mode = VesselMode::Player;
    vessel.last_crew_at = now_ms;
    vessel.last_update = now_ms;

    let mut claimed = Vec::new();
    for station in Station::ALL {
        let slot = vessel.stations.slot_mut(station);
        if slot.is_none() {
            *slot = Some(StationHolder {
                user_id: user_id.to_string(),
                username: username.to_string(),
            });
            claimed.push(station);
        }
    }
    claimed
}

/// Removes the user from crew and stations. The vessel keeps its mode; an
/// emptied crew starts the AI handoff grace period from `now_ms`.
pub fn leave_crew(vessel: &mut Vessel, user_id: &str, now_ms: u64) -> bool {
    let was_member = vessel.crew_ids.remove(user_id);
    vessel.crew_names.remove(user_id);
    let released = vessel.stations.release_all(user_id);
    if !was_member && released.is_empty() {
        return false;
    }
    vessel.last_crew_at = now_ms;
    vessel.last_update = now_ms;
    true
}

pub fn awaiting_handoff(vessel: &Vessel) -> bool {
    vessel.mode == VesselMode::Player && vessel.crew_ids.is_empty()
}

/// A crewless player vessel whose grace period has run out. A vessel marked
/// for AI has no grace period and goes on the first tick after its crew left.
pub fn due_for_demotion(vessel: &Vessel, now_ms: u64, grace_ms: u64) -> bool {
    let grace_ms = match vessel.desired_mode {
        VesselMode::Ai => 0,
        VesselMode::Player => grace_ms,
    };
    awaiting_handoff(vessel) && now_ms.saturating_sub(vessel.last_crew_at) > grace_ms
}

pub fn demote_to_ai(vessel: &mut Vessel, now_ms: u64) {
    vessel.mode = VesselMode::Ai;
    vessel.desired_mode = VesselMode::Ai;
    vessel.stations.clear();
    vessel.controls.throttle = 0.0;
    vessel.last_update = now_ms;
}

/// Claim succeeds on a free station, for the current holder, or for an admin;
/// release succeeds only for the current holder.
pub fn set_station(
    vessel: &mut Vessel,
    station: Station,
    action: StationAction,
    user_id: &str,
    username: &str,
    is_admin: bool,
) -> StationResult {
    if !vessel.has_crew_member(user_id) {
        return StationResult::rejected(station, action, "You are not crew on this vessel");
    }

    match action {
        StationAction::Claim => {
            if let Some(holder) = vessel.stations.get(station) {
                if holder.user_id != user_id && !is_admin {
                    return StationResult::rejected(
                        station,
                        action,
                        format!("{station} station held by {}", holder.username),
                    );
                }
            }
            *vessel.stations.slot_mut(station) = Some(StationHolder {
                user_id: user_id.to_string(),
                username: username.to_string(),
            });
            StationResult::ok(station, action)
        }
        StationAction::Release => {
            if !vessel.stations.is_held_by(station, user_id) {
                return StationResult::rejected(
                    station,
                    action,
                    format!("You do not hold the {station} station"),
                );
            }
            *vessel.stations.slot_mut(station) = None;
            StationResult::ok(station, action)
        }
    }
}

/// Throttle needs the engine holder (or a free engine station); rudder needs
/// the helm holder (or a free helm). Admins bypass both.
pub fn may_operate(vessel: &Vessel, station: Station, user_id: &str, is_admin: bool) -> bool {
    if is_admin {
        return true;
    }
    vessel.has_crew_member(user_id)
        && match vessel.stations.holder_id(station) {
            None => true,
            Some(holder) => holder == user_id,
        }
}

pub fn stations_reference_crew(vessel: &Vessel) -> bool {
    Station::ALL.iter().all(|station| {
        vessel
            .stations
            .holder_id(*station)
            .map_or(true, |holder| vessel.crew_ids.contains(holder))
    })
}
