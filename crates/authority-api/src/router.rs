use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use authority_core::{Audience, Effect, Effects};
use contracts::{ConnectionId, EconomyCharge, ServerMessage};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::workers::{EconomyJob, PersistJob};

const ROOM_CAPACITY: usize = 4096;

/// What a socket task receives on its private channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Frame(Arc<str>),
    /// Send the reason as an `error` event, then close.
    Evict(String),
}

/// One encoded message for every socket in a space.
#[derive(Debug, Clone)]
pub struct RoomFrame {
    pub space_id: String,
    pub exclude: Option<ConnectionId>,
    pub payload: Arc<str>,
}

impl RoomFrame {
    pub fn is_for(&self, space_id: &str, connection_id: ConnectionId) -> bool {
        self.space_id == space_id && self.exclude != Some(connection_id)
    }
}

#[derive(Debug)]
struct ConnectionEntry {
    space_id: String,
    user_id: String,
    tx: mpsc::UnboundedSender<Outbound>,
}

/// Per-connection senders, looked up without touching the world lock.
#[derive(Debug, Default)]
pub struct ConnectionDirectory {
    entries: Mutex<BTreeMap<ConnectionId, ConnectionEntry>>,
}

impl ConnectionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<ConnectionId, ConnectionEntry>> {
        // Entries are inserted and removed whole; poisoning leaves them intact.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(
        &self,
        connection_id: ConnectionId,
        space_id: &str,
        user_id: &str,
        tx: mpsc::UnboundedSender<Outbound>,
    ) {
        self.entries().insert(
            connection_id,
            ConnectionEntry {
                space_id: space_id.to_string(),
                user_id: user_id.to_string(),
                tx,
            },
        );
    }

    pub fn rebind(&self, connection_id: ConnectionId, user_id: &str) {
        if let Some(entry) = self.entries().get_mut(&connection_id) {
            entry.user_id = user_id.to_string();
        }
    }

    pub fn unregister(&self, connection_id: ConnectionId) -> bool {
        self.entries().remove(&connection_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn send(&self, connection_id: ConnectionId, outbound: Outbound) -> bool {
        self.entries()
            .get(&connection_id)
            .map_or(false, |entry| entry.tx.send(outbound).is_ok())
    }

    /// Tells the connection it was replaced and stops routing to it.
    pub fn evict(&self, connection_id: ConnectionId, reason: &str) -> bool {
        let Some(entry) = self.entries().remove(&connection_id) else {
            return false;
        };
        entry.tx.send(Outbound::Evict(reason.to_string())).is_ok()
    }

    pub fn send_to_users(
        &self,
        space_id: Option<&str>,
        user_ids: &[String],
        payload: &Arc<str>,
    ) -> usize {
        self.entries()
            .values()
            .filter(|entry| space_id.map_or(true, |space| entry.space_id == space))
            .filter(|entry| user_ids.contains(&entry.user_id))
            .filter(|entry| entry.tx.send(Outbound::Frame(payload.clone())).is_ok())
            .count()
    }
}

pub fn encode(message: &ServerMessage) -> Option<Arc<str>> {
    match serde_json::to_string(message) {
        Ok(payload) => Some(Arc::from(payload)),
        Err(err) => {
            warn!(error = %err, "failed to encode server message");
            None
        }
    }
}

/// Fans effects out to sockets and background workers. Never blocks.
#[derive(Debug, Clone)]
pub struct EffectRouter {
    rooms: broadcast::Sender<RoomFrame>,
    directory: Arc<ConnectionDirectory>,
    persist_tx: mpsc::UnboundedSender<PersistJob>,
    economy_tx: mpsc::UnboundedSender<EconomyJob>,
}

impl EffectRouter {
    pub fn new(
        directory: Arc<ConnectionDirectory>,
        persist_tx: mpsc::UnboundedSender<PersistJob>,
        economy_tx: mpsc::UnboundedSender<EconomyJob>,
    ) -> Self {
        let (rooms, _) = broadcast::channel(ROOM_CAPACITY);
        Self {
            rooms,
            directory,
            persist_tx,
            economy_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoomFrame> {
        self.rooms.subscribe()
    }

    pub fn directory(&self) -> &Arc<ConnectionDirectory> {
        &self.directory
    }

    pub fn send_to(&self, connection_id: ConnectionId, message: &ServerMessage) -> bool {
        encode(message).map_or(false, |payload| {
            self.directory.send(connection_id, Outbound::Frame(payload))
        })
    }

    pub fn route(&self, effects: Effects, now_ms: u64) {
        for effect in effects {
            match effect {
                Effect::Send { audience, message } => self.deliver(audience, &message),
                Effect::PersistVessel { vessel, force } => {
                    self.enqueue_persist(PersistJob::Vessel {
                        vessel,
                        force,
                        at_ms: now_ms,
                    });
                }
                Effect::PersistEnvironment {
                    space_id,
                    environment,
                    force,
                } => {
                    self.enqueue_persist(PersistJob::Environment {
                        space_id,
                        environment,
                        force,
                        at_ms: now_ms,
                    });
                }
                Effect::PersistEvent(event) => {
                    self.enqueue_persist(PersistJob::Event {
                        event,
                        at_ms: now_ms,
                    });
                }
                Effect::Charge(charge) => self.enqueue_charge(charge, now_ms),
            }
        }
    }

    fn deliver(&self, audience: Audience, message: &ServerMessage) {
        let Some(payload) = encode(message) else {
            return;
        };
        match audience {
            Audience::Space { space_id, exclude } => {
                // No subscribers simply means nobody is listening yet.
                let _ = self.rooms.send(RoomFrame {
                    space_id,
                    exclude,
                    payload,
                });
            }
            Audience::Connection(connection_id) => {
                if !self.directory.send(connection_id, Outbound::Frame(payload)) {
                    debug!(%connection_id, "dropping message for closed connection");
                }
            }
            Audience::Users { space_id, user_ids } => {
                self.directory
                    .send_to_users(space_id.as_deref(), &user_ids, &payload);
            }
        }
    }

    fn enqueue_persist(&self, job: PersistJob) {
        if self.persist_tx.send(job).is_err() {
            warn!("persist worker is gone; dropping write");
        }
    }

    fn enqueue_charge(&self, charge: EconomyCharge, now_ms: u64) {
        let user_id = charge.user_id.clone();
        if self
            .economy_tx
            .send(EconomyJob {
                charge,
                at_ms: now_ms,
            })
            .is_err()
        {
            warn!(user_id = %user_id, "economy worker is gone; dropping charge");
        }
    }
}

#[cfg(test)]
mod tests {
    use contracts::messages::CrewNotice;

    use super::*;

    fn notice() -> ServerMessage {
        ServerMessage::VesselJoined(CrewNotice {
            user_id: "alice".to_string(),
            username: "Alice".to_string(),
            vessel_id: Some("v1".to_string()),
        })
    }

    fn router() -> (
        EffectRouter,
        mpsc::UnboundedReceiver<PersistJob>,
        mpsc::UnboundedReceiver<EconomyJob>,
    ) {
        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        let (economy_tx, economy_rx) = mpsc::unbounded_channel();
        (
            EffectRouter::new(Arc::new(ConnectionDirectory::new()), persist_tx, economy_tx),
            persist_rx,
            economy_rx,
        )
    }

    #[test]
    fn room_frames_skip_the_excluded_connection_and_other_spaces() {
        let frame = RoomFrame {
            space_id: "bay".to_string(),
            exclude: Some(ConnectionId(2)),
            payload: Arc::from("{}"),
        };
        assert!(frame.is_for("bay", ConnectionId(1)));
        assert!(!frame.is_for("bay", ConnectionId(2)));
        assert!(!frame.is_for("strait", ConnectionId(1)));
    }

    #[test]
    fn user_audience_reaches_only_matching_connections() {
        let (router, _persist, _economy) = router();
        let (alice_tx, mut alice_rx) = mpsc::unbounded_channel();
        let (bob_tx, mut bob_rx) = mpsc::unbounded_channel();
        router
            .directory()
            .register(ConnectionId(1), "bay", "alice", alice_tx);
        router
            .directory()
            .register(ConnectionId(2), "bay", "bob", bob_tx);

        let mut effects = Effects::new();
        effects.send(
            Audience::Users {
                space_id: Some("bay".to_string()),
                user_ids: vec!["alice".to_string()],
            },
            notice(),
        );
        router.route(effects, 0);

        assert!(matches!(alice_rx.try_recv(), Ok(Outbound::Frame(_))));
        assert!(bob_rx.try_recv().is_err());
    }

    #[test]
    fn evicted_connection_gets_reason_and_leaves_directory() {
        let (router, _persist, _economy) = router();
        let (tx, mut rx) = mpsc::unbounded_channel();
        router.directory().register(ConnectionId(5), "bay", "alice", tx);

        assert!(router.directory().evict(ConnectionId(5), "You were signed in elsewhere"));
        assert_eq!(
            rx.try_recv(),
            Ok(Outbound::Evict("You were signed in elsewhere".to_string()))
        );
        assert!(!router.send_to(ConnectionId(5), &notice()));
        assert!(router.directory().is_empty());
    }

    #[test]
    fn persistence_and_charges_go_to_their_workers_with_timestamp() {
        let (router, mut persist_rx, mut economy_rx) = router();
        let vessel = contracts::Vessel::new("v1", "bay", contracts::Position::default(), 0);
        let mut effects = Effects::new();
        effects.persist_vessel(&vessel, true);
        effects.charge(EconomyCharge {
            user_id: "alice".to_string(),
            space_id: "bay".to_string(),
            adjustment: contracts::EconomyAdjustment {
                delta_credits: -10,
                delta_safety_score: -0.15,
                reason: contracts::ChargeReason::Collision,
                vessel_id: None,
                meta: None,
            },
        });
        router.route(effects, 1_234);

        match persist_rx.try_recv() {
            Ok(PersistJob::Vessel { force, at_ms, .. }) => {
                assert!(force);
                assert_eq!(at_ms, 1_234);
            }
            other => panic!("unexpected persist job: {other:?}"),
        }
        let job = economy_rx.try_recv().expect("charge queued");
        assert_eq!(job.charge.user_id, "alice");
        assert_eq!(job.at_ms, 1_234);
    }
}
