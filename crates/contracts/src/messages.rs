//! Socket envelopes. Every inbound frame is decoded into [`ClientMessage`] and
//! validated before any domain state is touched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::access::Role;
use crate::environment::{Environment, WeatherOverride};
use crate::rules::EconomyProfile;
use crate::vessel::{
    Orientation, Position, Station, StationAction, Velocity, VesselMode, VesselSnapshot,
};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum MessageError {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("non-finite value in {0}")]
    NonFinite(&'static str),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct VesselUpdatePayload {
    #[serde(default)]
    pub position: Option<Position>,
    #[serde(default)]
    pub orientation: Option<Orientation>,
    #[serde(default)]
    pub velocity: Option<Velocity>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ControlPayload {
    #[serde(default)]
    pub throttle: Option<f64>,
    #[serde(default)]
    pub rudder_angle: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StationPayload {
    pub station: Station,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RepairPayload {
    #[serde(default)]
    pub vessel_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    #[serde(default)]
    pub vessel_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserMode {
    Player,
    Spectator,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserModePayload {
    pub mode: UserMode,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VesselModePayload {
    pub vessel_id: String,
    pub mode: VesselMode,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthPayload {
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ClientMessage {
    #[serde(rename = "vessel:update")]
    VesselUpdate(VesselUpdatePayload),
    #[serde(rename = "vessel:control")]
    VesselControl(ControlPayload),
    #[serde(rename = "station:claim")]
    StationClaim(StationPayload),
    #[serde(rename = "station:release")]
    StationRelease(StationPayload),
    #[serde(rename = "vessel:repair")]
    VesselRepair(RepairPayload),
    #[serde(rename = "vessel:leave")]
    VesselLeave,
    #[serde(rename = "vessel:join")]
    VesselJoin(JoinPayload),
    #[serde(rename = "user:mode")]
    UserMode(UserModePayload),
    #[serde(rename = "user:auth")]
    UserAuth(AuthPayload),
    #[serde(rename = "admin:weather")]
    AdminWeather(WeatherOverride),
    #[serde(rename = "admin:vesselMode")]
    AdminVesselMode(VesselModePayload),
}

impl ClientMessage {
    pub fn parse(raw: &str) -> Result<Self, MessageError> {
        let message: Self =
            serde_json::from_str(raw).map_err(|err| MessageError::Malformed(err.to_string()))?;
        message.validate()?;
        Ok(message)
    }

    pub fn validate(&self) -> Result<(), MessageError> {
        match self {
            Self::VesselUpdate(update) => {
                if let Some(position) = update.position {
                    ensure_finite("position", &[position.x, position.y, position.z])?;
                }
                if let Some(orientation) = update.orientation {
                    ensure_finite(
                        "orientation",
                        &[orientation.heading, orientation.roll, orientation.pitch],
                    )?;
                }
                if let Some(velocity) = update.velocity {
                    ensure_finite("velocity", &[velocity.surge, velocity.sway, velocity.heave])?;
                }
                Ok(())
            }
            Self::VesselControl(control) => {
                if let Some(throttle) = control.throttle {
                    ensure_finite("throttle", &[throttle])?;
                }
                if let Some(rudder) = control.rudder_angle {
                    ensure_finite("rudderAngle", &[rudder])?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// `user:auth` is the only event a guest may send that is not dropped.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Self::UserAuth(_))
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            Self::VesselUpdate(_) => "vessel:update",
            Self::VesselControl(_) => "vessel:control",
            Self::StationClaim(_) => "station:claim",
            Self::StationRelease(_) => "station:release",
            Self::VesselRepair(_) => "vessel:repair",
            Self::VesselLeave => "vessel:leave",
            Self::VesselJoin(_) => "vessel:join",
            Self::UserMode(_) => "user:mode",
            Self::UserAuth(_) => "user:auth",
            Self::AdminWeather(_) => "admin:weather",
            Self::AdminVesselMode(_) => "admin:vesselMode",
        }
    }
}

fn ensure_finite(field: &'static str, values: &[f64]) -> Result<(), MessageError> {
    if values.iter().all(|value| value.is_finite()) {
        Ok(())
    } else {
        Err(MessageError::NonFinite(field))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureTransition {
    EngineFailed,
    EngineRestored,
    SteeringFailed,
    SteeringRestored,
    FloodingStarted,
    FloodingCleared,
}

impl FailureTransition {
    pub fn message(self) -> &'static str {
        match self {
            Self::EngineFailed => "Engine failure",
            Self::EngineRestored => "Engine restored",
            Self::SteeringFailed => "Steering failure, rudder jammed",
            Self::SteeringRestored => "Steering restored",
            Self::FloodingStarted => "Flooding detected",
            Self::FloodingCleared => "Flooding under control",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionInfo {
    pub connection_id: u64,
    pub user_id: String,
    pub username: String,
    pub roles: Vec<Role>,
    pub permissions: Vec<String>,
    pub space_id: String,
    pub vessel_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulationUpdate {
    pub space_id: String,
    pub vessels: BTreeMap<String, VesselSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Environment>,
    pub partial: bool,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CrewNotice {
    pub user_id: String,
    pub username: String,
    pub vessel_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VesselAlert {
    pub vessel_id: String,
    pub transition: FailureTransition,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StationResult {
    pub station: Station,
    pub action: StationAction,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl StationResult {
    pub fn ok(station: Station, action: StationAction) -> Self {
        Self {
            station,
            action,
            ok: true,
            reason: None,
        }
    }

    pub fn rejected(station: Station, action: StationAction, reason: impl Into<String>) -> Self {
        Self {
            station,
            action,
            ok: false,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepairResult {
    pub vessel_id: String,
    pub cost: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ServerMessage {
    #[serde(rename = "session:ready")]
    SessionReady(SessionInfo),
    #[serde(rename = "simulation:update")]
    SimulationUpdate(SimulationUpdate),
    #[serde(rename = "vessel:joined")]
    VesselJoined(CrewNotice),
    #[serde(rename = "vessel:left")]
    VesselLeft(CrewNotice),
    #[serde(rename = "vessel:alert")]
    VesselAlert(VesselAlert),
    #[serde(rename = "station:result")]
    StationResult(StationResult),
    #[serde(rename = "repair:result")]
    RepairResult(RepairResult),
    #[serde(rename = "economy:update")]
    EconomyUpdate(EconomyProfile),
    #[serde(rename = "environment:update")]
    EnvironmentUpdate(Environment),
    #[serde(rename = "error")]
    Error(String),
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_control_message() {
        let parsed = ClientMessage::parse(
            r#"{"event":"vessel:control","data":{"throttle":0.5,"rudderAngle":-0.1}}"#,
        )
        .expect("control message");
        assert_eq!(
            parsed,
            ClientMessage::VesselControl(ControlPayload {
                throttle: Some(0.5),
                rudder_angle: Some(-0.1),
            })
        );
    }

    #[test]
    fn control_payload_uses_camel_case_on_the_wire() {
        assert!(matches!(
            ClientMessage::parse(r#"{"event":"vessel:control","data":{"rudder_angle":0.2}}"#),
            Err(MessageError::Malformed(_))
        ));
        let encoded = serde_json::to_value(ClientMessage::VesselControl(ControlPayload {
            throttle: None,
            rudder_angle: Some(0.2),
        }))
        .expect("encode");
        assert_eq!(encoded["data"]["rudderAngle"], 0.2);
    }

    #[test]
    fn parses_join_mode_and_admin_mode_events() {
        assert_eq!(
            ClientMessage::parse(r#"{"event":"vessel:join","data":{"vesselId":"v7"}}"#),
            Ok(ClientMessage::VesselJoin(JoinPayload {
                vessel_id: Some("v7".to_string()),
            }))
        );
        assert_eq!(
            ClientMessage::parse(r#"{"event":"vessel:join","data":{}}"#),
            Ok(ClientMessage::VesselJoin(JoinPayload::default()))
        );
        assert_eq!(
            ClientMessage::parse(r#"{"event":"user:mode","data":{"mode":"spectator"}}"#),
            Ok(ClientMessage::UserMode(UserModePayload {
                mode: UserMode::Spectator,
            }))
        );
        let admin = ClientMessage::parse(
            r#"{"event":"admin:vesselMode","data":{"vesselId":"v7","mode":"ai"}}"#,
        )
        .expect("admin mode");
        assert_eq!(admin.event_name(), "admin:vesselMode");
        assert_eq!(
            admin,
            ClientMessage::AdminVesselMode(VesselModePayload {
                vessel_id: "v7".to_string(),
                mode: VesselMode::Ai,
            })
        );
    }

    #[test]
    fn parses_unit_leave_event() {
        let parsed = ClientMessage::parse(r#"{"event":"vessel:leave"}"#).expect("leave");
        assert_eq!(parsed, ClientMessage::VesselLeave);
        assert!(parsed.is_mutating());
    }

    #[test]
    fn rejects_unknown_events_and_fields() {
        assert!(matches!(
            ClientMessage::parse(r#"{"event":"vessel:teleport","data":{}}"#),
            Err(MessageError::Malformed(_))
        ));
        assert!(matches!(
            ClientMessage::parse(r#"{"event":"vessel:control","data":{"warp":9}}"#),
            Err(MessageError::Malformed(_))
        ));
    }

    #[test]
    fn non_finite_values_fail_validation() {
        let message = ClientMessage::VesselControl(ControlPayload {
            throttle: Some(f64::NAN),
            rudder_angle: None,
        });
        assert_eq!(message.validate(), Err(MessageError::NonFinite("throttle")));
    }

    #[test]
    fn server_error_serializes_as_plain_string() {
        let encoded = serde_json::to_value(ServerMessage::error("Banned: spam")).expect("encode");
        assert_eq!(encoded["event"], "error");
        assert_eq!(encoded["data"], "Banned: spam");
    }
}
