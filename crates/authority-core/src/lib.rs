//! Authoritative simulation core: per-space world state, crew and station
//! arbitration, the collision and COLREGS rule engine, damage and failures,
//! and the environment model. Nothing here performs I/O; mutations hand back
//! [`effects::Effects`] for the server to route.

pub mod arbiter;
pub mod cooldown;
pub mod damage;
pub mod effects;
pub mod environment;
pub mod failure;
pub mod geometry;
pub mod rules;
pub mod world;

pub use effects::{Audience, Effect, Effects};
pub use environment::EnvironmentError;
pub use rules::{Encounter, Incident, IncidentKind};
pub use world::{
    Assignment, CommandRejection, SpaceSeed, SpaceState, SpaceTickFailure, TickError, TickReport,
    WorldState,
};
