//! Interfaces the authority consumes from the outside world: space rules,
//! bans, the economy ledger and durable vessel/environment storage.
//!
//! Every call is synchronous and may block. The server runs them on the
//! blocking pool and never while holding the world lock.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use authority_core::SpaceSeed;
use contracts::{
    EconomyCharge, EconomyProfile, Environment, RuleContext, ScheduledEnvironmentEvent, Vessel,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::persistence::PersistenceError;

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// An active or expired ban. `None` fields match anything.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BanRecord {
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub space_id: Option<String>,
    pub reason: Option<String>,
    pub expires_at: Option<u64>,
}

impl BanRecord {
    pub fn matches(&self, user_id: &str, username: &str, space_id: &str, now_ms: u64) -> bool {
        if self.user_id.is_none() && self.username.is_none() {
            return false;
        }
        let subject = self.user_id.as_deref().map_or(false, |id| id == user_id)
            || self.username.as_deref().map_or(false, |name| name == username);
        let scoped = self.space_id.as_deref().map_or(true, |space| space == space_id);
        let live = self.expires_at.map_or(true, |expires_at| expires_at > now_ms);
        subject && scoped && live
    }

    pub fn message(&self) -> String {
        format!(
            "Banned: {}",
            self.reason.as_deref().unwrap_or("Access denied")
        )
    }
}

pub trait RuleContextSource: Send + Sync {
    /// `Ok(None)` when the space has no stored metadata.
    fn rule_context(&self, space_id: &str) -> Result<Option<RuleContext>, CollaboratorError>;
}

pub trait BanList: Send + Sync {
    fn active_ban(
        &self,
        user_id: &str,
        username: &str,
        space_id: &str,
        now_ms: u64,
    ) -> Result<Option<BanRecord>, CollaboratorError>;
}

pub trait EconomyLedger: Send + Sync {
    /// Applies the adjustment atomically and returns the updated profile.
    fn apply_charge(
        &self,
        charge: &EconomyCharge,
        now_ms: u64,
    ) -> Result<EconomyProfile, CollaboratorError>;

    fn profile(&self, user_id: &str) -> Result<EconomyProfile, CollaboratorError>;
}

pub trait VesselStore: Send + Sync {
    fn load_vessels(&self, space_id: &str) -> Result<Vec<Vessel>, CollaboratorError>;
    fn save_vessel(&self, vessel: &Vessel, now_ms: u64) -> Result<(), CollaboratorError>;
    fn load_environment(&self, space_id: &str) -> Result<Option<Environment>, CollaboratorError>;
    fn save_environment(
        &self,
        space_id: &str,
        environment: &Environment,
        now_ms: u64,
    ) -> Result<(), CollaboratorError>;
    fn load_events(&self, space_id: &str)
        -> Result<Vec<ScheduledEnvironmentEvent>, CollaboratorError>;
    fn save_event(
        &self,
        event: &ScheduledEnvironmentEvent,
        now_ms: u64,
    ) -> Result<(), CollaboratorError>;
}

/// The full set of collaborators the server talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub rules: Arc<dyn RuleContextSource>,
    pub bans: Arc<dyn BanList>,
    pub ledger: Arc<dyn EconomyLedger>,
    pub store: Arc<dyn VesselStore>,
}

impl Collaborators {
    /// Uses one backend for every role.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: RuleContextSource + BanList + EconomyLedger + VesselStore + 'static,
    {
        Self {
            rules: backend.clone(),
            bans: backend.clone(),
            ledger: backend.clone(),
            store: backend,
        }
    }

    /// Everything a space needs on activation. Unknown spaces get default rules.
    pub fn load_seed(&self, space_id: &str) -> Result<SpaceSeed, CollaboratorError> {
        Ok(SpaceSeed {
            rules: self.rules.rule_context(space_id)?.unwrap_or_default(),
            vessels: self.store.load_vessels(space_id)?,
            environment: self.store.load_environment(space_id)?,
            events: self.store.load_events(space_id)?,
        })
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    rules: BTreeMap<String, RuleContext>,
    bans: Vec<BanRecord>,
    profiles: BTreeMap<String, EconomyProfile>,
    transactions: Vec<EconomyCharge>,
    vessels: BTreeMap<String, Vessel>,
    vessel_writes: Vec<(String, u64)>,
    environments: BTreeMap<String, Environment>,
    environment_writes: usize,
    events: BTreeMap<String, ScheduledEnvironmentEvent>,
    failing_writes: usize,
}

/// In-process collaborators for tests and headless runs.
#[derive(Debug, Default)]
pub struct MemoryCollaborators {
    inner: Mutex<MemoryInner>,
}

impl MemoryCollaborators {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryInner>, CollaboratorError> {
        self.inner
            .lock()
            .map_err(|_| CollaboratorError::Unavailable("memory store lock poisoned".to_string()))
    }

    pub fn set_rules(&self, space_id: &str, rules: RuleContext) {
        if let Ok(mut inner) = self.lock() {
            inner.rules.insert(space_id.to_string(), rules);
        }
    }

    pub fn add_ban(&self, ban: BanRecord) {
        if let Ok(mut inner) = self.lock() {
            inner.bans.push(ban);
        }
    }

    pub fn insert_vessel(&self, vessel: Vessel) {
        if let Ok(mut inner) = self.lock() {
            inner.vessels.insert(vessel.id.clone(), vessel);
        }
    }

    /// The next `count` vessel writes fail.
    pub fn fail_next_writes(&self, count: usize) {
        if let Ok(mut inner) = self.lock() {
            inner.failing_writes = count;
        }
    }

    /// `(vessel_id, written_at)` for every successful vessel write, in order.
    pub fn vessel_writes(&self) -> Vec<(String, u64)> {
        self.lock()
            .map(|inner| inner.vessel_writes.clone())
            .unwrap_or_default()
    }

    pub fn environment_writes(&self) -> usize {
        self.lock()
            .map(|inner| inner.environment_writes)
            .unwrap_or_default()
    }

    pub fn transactions(&self) -> Vec<EconomyCharge> {
        self.lock()
            .map(|inner| inner.transactions.clone())
            .unwrap_or_default()
    }

    pub fn stored_vessel(&self, vessel_id: &str) -> Option<Vessel> {
        self.lock()
            .ok()
            .and_then(|inner| inner.vessels.get(vessel_id).cloned())
    }

    pub fn stored_event(&self, event_id: &str) -> Option<ScheduledEnvironmentEvent> {
        self.lock()
            .ok()
            .and_then(|inner| inner.events.get(event_id).cloned())
    }
}

impl RuleContextSource for MemoryCollaborators {
    fn rule_context(&self, space_id: &str) -> Result<Option<RuleContext>, CollaboratorError> {
        Ok(self.lock()?.rules.get(space_id).cloned())
    }
}

impl BanList for MemoryCollaborators {
    fn active_ban(
        &self,
        user_id: &str,
        username: &str,
        space_id: &str,
        now_ms: u64,
    ) -> Result<Option<BanRecord>, CollaboratorError> {
        Ok(self
            .lock()?
            .bans
            .iter()
            .find(|ban| ban.matches(user_id, username, space_id, now_ms))
            .cloned())
    }
}

impl EconomyLedger for MemoryCollaborators {
    fn apply_charge(
        &self,
        charge: &EconomyCharge,
        _now_ms: u64,
    ) -> Result<EconomyProfile, CollaboratorError> {
        let mut inner = self.lock()?;
        let profile = inner
            .profiles
            .entry(charge.user_id.clone())
            .or_insert_with(|| EconomyProfile::new(charge.user_id.clone()));
        profile.apply(&charge.adjustment);
        let updated = profile.clone();
        inner.transactions.push(charge.clone());
        Ok(updated)
    }

    fn profile(&self, user_id: &str) -> Result<EconomyProfile, CollaboratorError> {
        Ok(self
            .lock()?
            .profiles
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| EconomyProfile::new(user_id)))
    }
}

impl VesselStore for MemoryCollaborators {
    fn load_vessels(&self, space_id: &str) -> Result<Vec<Vessel>, CollaboratorError> {
        Ok(self
            .lock()?
            .vessels
            .values()
            .filter(|vessel| vessel.space_id == space_id)
            .cloned()
            .collect())
    }

    fn save_vessel(&self, vessel: &Vessel, now_ms: u64) -> Result<(), CollaboratorError> {
        let mut inner = self.lock()?;
        if inner.failing_writes > 0 {
            inner.failing_writes -= 1;
            return Err(CollaboratorError::Unavailable(format!(
                "write for {} refused",
                vessel.id
            )));
        }
        inner.vessels.insert(vessel.id.clone(), vessel.clone());
        inner.vessel_writes.push((vessel.id.clone(), now_ms));
        Ok(())
    }

    fn load_environment(&self, space_id: &str) -> Result<Option<Environment>, CollaboratorError> {
        Ok(self.lock()?.environments.get(space_id).cloned())
    }

    fn save_environment(
        &self,
        space_id: &str,
        environment: &Environment,
        _now_ms: u64,
    ) -> Result<(), CollaboratorError> {
        let mut inner = self.lock()?;
        inner
            .environments
            .insert(space_id.to_string(), environment.clone());
        inner.environment_writes += 1;
        Ok(())
    }

    fn load_events(
        &self,
        space_id: &str,
    ) -> Result<Vec<ScheduledEnvironmentEvent>, CollaboratorError> {
        Ok(self
            .lock()?
            .events
            .values()
            .filter(|event| event.space_id == space_id)
            .cloned()
            .collect())
    }

    fn save_event(
        &self,
        event: &ScheduledEnvironmentEvent,
        _now_ms: u64,
    ) -> Result<(), CollaboratorError> {
        self.lock()?.events.insert(event.id.clone(), event.clone());
        Ok(())
    }
}
