//! Background tasks for work that must never run inside a tick: throttled
//! persistence writes and economy ledger adjustments.

use std::collections::HashMap;
use std::sync::Arc;

use contracts::{EconomyCharge, Environment, ScheduledEnvironmentEvent, ServerMessage, Vessel};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::collaborators::{CollaboratorError, EconomyLedger, VesselStore};
use crate::router::{encode, ConnectionDirectory};

/// At most one write per key per window, unless forced.
#[derive(Debug, Clone)]
pub struct PersistThrottle {
    window_ms: u64,
    last_write: HashMap<String, u64>,
}

impl PersistThrottle {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            last_write: HashMap::new(),
        }
    }

    /// Records and allows the write, or reports that it falls inside the window.
    pub fn admit(&mut self, key: &str, force: bool, now_ms: u64) -> bool {
        if !force {
            if let Some(last) = self.last_write.get(key) {
                if now_ms.saturating_sub(*last) < self.window_ms {
                    return false;
                }
            }
        }
        self.last_write.insert(key.to_string(), now_ms);
        true
    }

    /// Clears the key after a failed write so the next request retries.
    pub fn forget(&mut self, key: &str) {
        self.last_write.remove(key);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PersistJob {
    Vessel {
        vessel: Box<Vessel>,
        force: bool,
        at_ms: u64,
    },
    Environment {
        space_id: String,
        environment: Box<Environment>,
        force: bool,
        at_ms: u64,
    },
    Event {
        event: Box<ScheduledEnvironmentEvent>,
        at_ms: u64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EconomyJob {
    pub charge: EconomyCharge,
    pub at_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistStats {
    pub written: u64,
    pub skipped: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EconomyStats {
    pub applied: u64,
    pub failed: u64,
}

/// Drains persistence jobs in order until every sender is dropped.
pub fn spawn_persist_worker(
    store: Arc<dyn VesselStore>,
    vessel_window_ms: u64,
    environment_window_ms: u64,
) -> (mpsc::UnboundedSender<PersistJob>, JoinHandle<PersistStats>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<PersistJob>();
    let handle = tokio::spawn(async move {
        let mut vessels = PersistThrottle::new(vessel_window_ms);
        let mut environments = PersistThrottle::new(environment_window_ms);
        let mut stats = PersistStats::default();

        while let Some(job) = rx.recv().await {
            let (throttle, key) = match &job {
                PersistJob::Vessel { vessel, force, at_ms } => {
                    if !vessels.admit(&vessel.id, *force, *at_ms) {
                        stats.skipped += 1;
                        continue;
                    }
                    (Some(&mut vessels), vessel.id.clone())
                }
                PersistJob::Environment {
                    space_id,
                    force,
                    at_ms,
                    ..
                } => {
                    if !environments.admit(space_id, *force, *at_ms) {
                        stats.skipped += 1;
                        continue;
                    }
                    (Some(&mut environments), space_id.clone())
                }
                PersistJob::Event { event, .. } => (None, event.id.clone()),
            };

            let store = store.clone();
            let outcome = tokio::task::spawn_blocking(move || write_job(store.as_ref(), &job)).await;
            match outcome {
                Ok(Ok(())) => {
                    stats.written += 1;
                    debug!(key = %key, "persisted");
                }
                Ok(Err(err)) => {
                    stats.failed += 1;
                    warn!(key = %key, error = %err, "persistence write failed; will retry on next request");
                    if let Some(throttle) = throttle {
                        throttle.forget(&key);
                    }
                }
                Err(err) => {
                    stats.failed += 1;
                    warn!(key = %key, error = %err, "persistence task aborted");
                    if let Some(throttle) = throttle {
                        throttle.forget(&key);
                    }
                }
            }
        }

        stats
    });
    (tx, handle)
}

fn write_job(store: &dyn VesselStore, job: &PersistJob) -> Result<(), CollaboratorError> {
    match job {
        PersistJob::Vessel { vessel, at_ms, .. } => store.save_vessel(vessel, *at_ms),
        PersistJob::Environment {
            space_id,
            environment,
            at_ms,
            ..
        } => store.save_environment(space_id, environment, *at_ms),
        PersistJob::Event { event, at_ms } => store.save_event(event, *at_ms),
    }
}

/// Applies charges one at a time and pushes the new profile to the user.
pub fn spawn_economy_worker(
    ledger: Arc<dyn EconomyLedger>,
    directory: Arc<ConnectionDirectory>,
) -> (mpsc::UnboundedSender<EconomyJob>, JoinHandle<EconomyStats>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<EconomyJob>();
    let handle = tokio::spawn(async move {
        let mut stats = EconomyStats::default();

        while let Some(job) = rx.recv().await {
            let ledger = ledger.clone();
            let charge = job.charge.clone();
            let outcome =
                tokio::task::spawn_blocking(move || ledger.apply_charge(&charge, job.at_ms)).await;
            let charge = &job.charge;
            match outcome {
                Ok(Ok(profile)) => {
                    stats.applied += 1;
                    info!(
                        user_id = %charge.user_id,
                        space_id = %charge.space_id,
                        reason = %charge.adjustment.reason,
                        delta_credits = charge.adjustment.delta_credits,
                        credits = profile.credits,
                        "economy adjusted"
                    );
                    if let Some(payload) = encode(&ServerMessage::EconomyUpdate(profile)) {
                        directory.send_to_users(
                            Some(&charge.space_id),
                            std::slice::from_ref(&charge.user_id),
                            &payload,
                        );
                    }
                }
                Ok(Err(err)) => {
                    stats.failed += 1;
                    warn!(user_id = %charge.user_id, error = %err, "economy adjustment failed");
                }
                Err(err) => {
                    stats.failed += 1;
                    warn!(user_id = %charge.user_id, error = %err, "economy task aborted");
                }
            }
        }

        stats
    });
    (tx, handle)
}
