use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use contracts::{
    EconomyCharge, EconomyProfile, Environment, RuleContext, ScheduledEnvironmentEvent, Vessel,
    VesselStatus,
};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::collaborators::{
    BanList, BanRecord, CollaboratorError, EconomyLedger, RuleContextSource, VesselStore,
};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("sqlite connection lock poisoned")]
    Poisoned,
}

/// SQLite-backed implementation of every collaborator the authority uses.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.configure()?;
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, PersistenceError> {
        self.conn.lock().map_err(|_| PersistenceError::Poisoned)
    }

    /// Registers or replaces a space's metadata.
    pub fn upsert_space(
        &self,
        space_id: &str,
        name: &str,
        rules: &RuleContext,
        now_ms: u64,
    ) -> Result<(), PersistenceError> {
        let rules_json = serde_json::to_string(rules)?;
        self.conn()?.execute(
            "INSERT INTO spaces (space_id, name, rules_json, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(space_id) DO UPDATE SET
                name = excluded.name,
                rules_json = excluded.rules_json,
                updated_at = excluded.updated_at",
            params![space_id, name, rules_json, stamp(now_ms)],
        )?;
        Ok(())
    }

    pub fn insert_ban(&self, ban: &BanRecord, now_ms: u64) -> Result<(), PersistenceError> {
        self.conn()?.execute(
            "INSERT INTO bans (user_id, username, space_id, reason, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                ban.user_id.as_deref(),
                ban.username.as_deref(),
                ban.space_id.as_deref(),
                ban.reason.as_deref(),
                ban.expires_at.map(stamp),
                stamp(now_ms),
            ],
        )?;
        Ok(())
    }

    pub fn transaction_count(&self, user_id: &str) -> Result<u64, PersistenceError> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM economy_transactions WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    fn configure(&self) -> Result<(), PersistenceError> {
        let conn = self.conn()?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    fn migrate(&self) -> Result<(), PersistenceError> {
        let conn = self.conn()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS spaces (
                space_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                rules_json TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS vessels (
                vessel_id TEXT PRIMARY KEY,
                space_id TEXT NOT NULL,
                owner_id TEXT,
                status TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS environments (
                space_id TEXT PRIMARY KEY,
                payload_json TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS environment_events (
                event_id TEXT PRIMARY KEY,
                space_id TEXT NOT NULL,
                run_at INTEGER NOT NULL,
                payload_json TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS users (
                user_id TEXT PRIMARY KEY,
                credits INTEGER NOT NULL,
                safety_score REAL NOT NULL,
                rank INTEGER NOT NULL,
                experience INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS economy_transactions (
                transaction_id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL REFERENCES users(user_id),
                space_id TEXT NOT NULL,
                vessel_id TEXT,
                reason TEXT NOT NULL,
                delta_credits INTEGER NOT NULL,
                delta_safety_score REAL NOT NULL,
                meta_json TEXT,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS bans (
                ban_id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT,
                username TEXT,
                space_id TEXT,
                reason TEXT,
                expires_at INTEGER,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_vessels_space ON vessels(space_id);
            CREATE INDEX IF NOT EXISTS idx_environment_events_space_run ON environment_events(space_id, run_at);
            CREATE INDEX IF NOT EXISTS idx_economy_transactions_user ON economy_transactions(user_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_bans_user ON bans(user_id);
            ",
        )?;

        conn.execute(
            "INSERT OR IGNORE INTO schema_migrations(version, name, applied_at)
             VALUES(1, 'initial_v1', 'boot')",
            [],
        )?;

        Ok(())
    }
}

impl RuleContextSource for SqliteStore {
    fn rule_context(&self, space_id: &str) -> Result<Option<RuleContext>, CollaboratorError> {
        let payload: Option<String> = self
            .conn()?
            .query_row(
                "SELECT rules_json FROM spaces WHERE space_id = ?1",
                params![space_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(PersistenceError::from)?;

        match payload {
            Some(raw) => Ok(Some(
                serde_json::from_str(&raw).map_err(PersistenceError::from)?,
            )),
            None => Ok(None),
        }
    }
}

impl BanList for SqliteStore {
    fn active_ban(
        &self,
        user_id: &str,
        username: &str,
        space_id: &str,
        now_ms: u64,
    ) -> Result<Option<BanRecord>, CollaboratorError> {
        let ban = self
            .conn()?
            .query_row(
                "SELECT user_id, username, space_id, reason, expires_at
                 FROM bans
                 WHERE (user_id = ?1 OR username = ?2)
                   AND (space_id IS NULL OR space_id = ?3)
                   AND (expires_at IS NULL OR expires_at > ?4)
                 ORDER BY ban_id DESC
                 LIMIT 1",
                params![user_id, username, space_id, stamp(now_ms)],
                |row| {
                    Ok(BanRecord {
                        user_id: row.get(0)?,
                        username: row.get(1)?,
                        space_id: row.get(2)?,
                        reason: row.get(3)?,
                        expires_at: row.get::<_, Option<i64>>(4)?.map(unstamp),
                    })
                },
            )
            .optional()
            .map_err(PersistenceError::from)?;
        Ok(ban)
    }
}

impl EconomyLedger for SqliteStore {
    fn apply_charge(
        &self,
        charge: &EconomyCharge,
        now_ms: u64,
    ) -> Result<EconomyProfile, CollaboratorError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(PersistenceError::from)?;

        let mut profile =
            load_profile(&tx, &charge.user_id)?.unwrap_or_else(|| EconomyProfile::new(&charge.user_id));
        profile.apply(&charge.adjustment);

        tx.execute(
            "INSERT INTO users (user_id, credits, safety_score, rank, experience, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(user_id) DO UPDATE SET
                credits = excluded.credits,
                safety_score = excluded.safety_score,
                updated_at = excluded.updated_at",
            params![
                profile.user_id.as_str(),
                profile.credits,
                profile.safety_score,
                i64::from(profile.rank),
                i64::try_from(profile.experience).unwrap_or(i64::MAX),
                stamp(now_ms),
            ],
        )
        .map_err(PersistenceError::from)?;

        let meta_json = charge
            .adjustment
            .meta
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(PersistenceError::from)?;
        tx.execute(
            "INSERT INTO economy_transactions (
                user_id,
                space_id,
                vessel_id,
                reason,
                delta_credits,
                delta_safety_score,
                meta_json,
                created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                charge.user_id.as_str(),
                charge.space_id.as_str(),
                charge.adjustment.vessel_id.as_deref(),
                charge.adjustment.reason.to_string(),
                charge.adjustment.delta_credits,
                charge.adjustment.delta_safety_score,
                meta_json,
                stamp(now_ms),
            ],
        )
        .map_err(PersistenceError::from)?;

        tx.commit().map_err(PersistenceError::from)?;
        Ok(profile)
    }

    fn profile(&self, user_id: &str) -> Result<EconomyProfile, CollaboratorError> {
        let conn = self.conn()?;
        Ok(load_profile(&conn, user_id)?.unwrap_or_else(|| EconomyProfile::new(user_id)))
    }
}

impl VesselStore for SqliteStore {
    fn load_vessels(&self, space_id: &str) -> Result<Vec<Vessel>, CollaboratorError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT payload_json
                 FROM vessels
                 WHERE space_id = ?1
                 ORDER BY vessel_id ASC",
            )
            .map_err(PersistenceError::from)?;
        let rows = stmt
            .query_map(params![space_id], |row| row.get::<_, String>(0))
            .map_err(PersistenceError::from)?;

        let mut vessels = Vec::new();
        for row in rows {
            let payload = row.map_err(PersistenceError::from)?;
            vessels.push(serde_json::from_str::<Vessel>(&payload).map_err(PersistenceError::from)?);
        }
        Ok(vessels)
    }

    fn save_vessel(&self, vessel: &Vessel, now_ms: u64) -> Result<(), CollaboratorError> {
        let payload_json = serde_json::to_string(vessel).map_err(PersistenceError::from)?;
        let status = match vessel.status {
            VesselStatus::Active => "active",
            VesselStatus::Stored => "stored",
        };
        self.conn()?
            .execute(
                "INSERT INTO vessels (vessel_id, space_id, owner_id, status, payload_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(vessel_id) DO UPDATE SET
                    space_id = excluded.space_id,
                    owner_id = excluded.owner_id,
                    status = excluded.status,
                    payload_json = excluded.payload_json,
                    updated_at = excluded.updated_at",
                params![
                    vessel.id.as_str(),
                    vessel.space_id.as_str(),
                    vessel.owner_id.as_deref(),
                    status,
                    payload_json,
                    stamp(now_ms),
                ],
            )
            .map_err(PersistenceError::from)?;
        Ok(())
    }

    fn load_environment(&self, space_id: &str) -> Result<Option<Environment>, CollaboratorError> {
        let payload: Option<String> = self
            .conn()?
            .query_row(
                "SELECT payload_json FROM environments WHERE space_id = ?1",
                params![space_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(PersistenceError::from)?;

        match payload {
            Some(raw) => Ok(Some(
                serde_json::from_str(&raw).map_err(PersistenceError::from)?,
            )),
            None => Ok(None),
        }
    }

    fn save_environment(
        &self,
        space_id: &str,
        environment: &Environment,
        now_ms: u64,
    ) -> Result<(), CollaboratorError> {
        let payload_json = serde_json::to_string(environment).map_err(PersistenceError::from)?;
        self.conn()?
            .execute(
                "INSERT INTO environments (space_id, payload_json, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(space_id) DO UPDATE SET
                    payload_json = excluded.payload_json,
                    updated_at = excluded.updated_at",
                params![space_id, payload_json, stamp(now_ms)],
            )
            .map_err(PersistenceError::from)?;
        Ok(())
    }

    fn load_events(
        &self,
        space_id: &str,
    ) -> Result<Vec<ScheduledEnvironmentEvent>, CollaboratorError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT payload_json
                 FROM environment_events
                 WHERE space_id = ?1
                 ORDER BY run_at ASC, event_id ASC",
            )
            .map_err(PersistenceError::from)?;
        let rows = stmt
            .query_map(params![space_id], |row| row.get::<_, String>(0))
            .map_err(PersistenceError::from)?;

        let mut events = Vec::new();
        for row in rows {
            let payload = row.map_err(PersistenceError::from)?;
            events.push(
                serde_json::from_str::<ScheduledEnvironmentEvent>(&payload)
                    .map_err(PersistenceError::from)?,
            );
        }
        Ok(events)
    }

    fn save_event(
        &self,
        event: &ScheduledEnvironmentEvent,
        now_ms: u64,
    ) -> Result<(), CollaboratorError> {
        let payload_json = serde_json::to_string(event).map_err(PersistenceError::from)?;
        self.conn()?
            .execute(
                "INSERT INTO environment_events (event_id, space_id, run_at, payload_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(event_id) DO UPDATE SET
                    run_at = excluded.run_at,
                    payload_json = excluded.payload_json,
                    updated_at = excluded.updated_at",
                params![
                    event.id.as_str(),
                    event.space_id.as_str(),
                    stamp(event.run_at),
                    payload_json,
                    stamp(now_ms),
                ],
            )
            .map_err(PersistenceError::from)?;
        Ok(())
    }
}

fn load_profile(
    conn: &Connection,
    user_id: &str,
) -> Result<Option<EconomyProfile>, PersistenceError> {
    let profile = conn
        .query_row(
            "SELECT user_id, credits, safety_score, rank, experience
             FROM users
             WHERE user_id = ?1",
            params![user_id],
            |row| {
                Ok(EconomyProfile {
                    user_id: row.get(0)?,
                    credits: row.get(1)?,
                    safety_score: row.get(2)?,
                    rank: u32::try_from(row.get::<_, i64>(3)?).unwrap_or(1),
                    experience: unstamp(row.get(4)?),
                })
            },
        )
        .optional()?;
    Ok(profile)
}

fn stamp(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}

fn unstamp(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use contracts::{ChargeReason, EconomyAdjustment, Position, VesselMode};

    use super::*;

    fn temp_db_path(name: &str) -> std::path::PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be monotonic")
            .as_nanos();

        std::env::temp_dir().join(format!("authority_store_{name}_{nanos}.sqlite"))
    }

    fn cleanup(path: &std::path::Path) {
        let _ = std::fs::remove_file(path);
        let _ = std::fs::remove_file(path.with_extension("sqlite-wal"));
        let _ = std::fs::remove_file(path.with_extension("sqlite-shm"));
    }

    fn collision_charge(user_id: &str) -> EconomyCharge {
        EconomyCharge {
            user_id: user_id.to_string(),
            space_id: "bay".to_string(),
            adjustment: EconomyAdjustment {
                delta_credits: -500,
                delta_safety_score: -0.15,
                reason: ChargeReason::Collision,
                vessel_id: Some("v1".to_string()),
                meta: Some(serde_json::json!({ "other": "v2" })),
            },
        }
    }

    #[test]
    fn vessels_round_trip_per_space() {
        let path = temp_db_path("vessels");
        let store = SqliteStore::open(&path).expect("store");

        let mut crewed = Vessel::new("v1", "bay", Position { x: 1.0, y: 2.0, z: 0.0 }, 10);
        crewed.crew_ids.insert("alice".to_string());
        crewed.mode = VesselMode::Player;
        store.save_vessel(&crewed, 10).expect("save");
        crewed.position.x = 5.0;
        store.save_vessel(&crewed, 20).expect("update");
        store
            .save_vessel(&Vessel::new("v2", "strait", Position::default(), 10), 10)
            .expect("save other");

        let loaded = store.load_vessels("bay").expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].position.x, 5.0);
        assert!(loaded[0].has_crew_member("alice"));

        cleanup(&path);
    }

    #[test]
    fn ledger_updates_profile_and_records_transaction_atomically() {
        let path = temp_db_path("ledger");
        let store = SqliteStore::open(&path).expect("store");

        store.apply_charge(&collision_charge("alice"), 100).expect("first");
        let profile = store.apply_charge(&collision_charge("alice"), 200).expect("second");

        assert_eq!(profile.credits, -1_000);
        assert!((profile.safety_score - 0.7).abs() < 1e-9);
        assert_eq!(store.profile("alice").expect("profile"), profile);
        assert_eq!(store.transaction_count("alice").expect("count"), 2);
        assert_eq!(store.profile("nobody").expect("default").credits, 0);

        cleanup(&path);
    }

    #[test]
    fn bans_respect_scope_and_expiry() {
        let path = temp_db_path("bans");
        let store = SqliteStore::open(&path).expect("store");
        store
            .insert_ban(
                &BanRecord {
                    user_id: Some("mallory".to_string()),
                    username: None,
                    space_id: Some("bay".to_string()),
                    reason: Some("ramming".to_string()),
                    expires_at: Some(1_000),
                },
                0,
            )
            .expect("ban");

        let ban = store
            .active_ban("mallory", "Mallory", "bay", 500)
            .expect("query")
            .expect("banned");
        assert_eq!(ban.message(), "Banned: ramming");
        assert!(store
            .active_ban("mallory", "Mallory", "strait", 500)
            .expect("query")
            .is_none());
        assert!(store
            .active_ban("mallory", "Mallory", "bay", 1_000)
            .expect("query")
            .is_none());

        cleanup(&path);
    }

    #[test]
    fn rules_environment_and_events_survive_reopen() {
        let path = temp_db_path("reopen");
        {
            let store = SqliteStore::open(&path).expect("store");
            let rules = RuleContext {
                colregs_enabled: true,
                collision_penalty: Some(10),
                ..RuleContext::default()
            };
            store.upsert_space("bay", "Bay", &rules, 0).expect("space");
            let mut environment = Environment::default();
            environment.wind.speed = 14.0;
            store.save_environment("bay", &environment, 0).expect("env");
            store
                .save_event(
                    &ScheduledEnvironmentEvent {
                        id: "squall".to_string(),
                        space_id: "bay".to_string(),
                        name: None,
                        pattern: Some("stormy".to_string()),
                        payload: None,
                        run_at: 5_000,
                        end_at: None,
                        end_payload: None,
                        captured_restore: None,
                        executed_at: None,
                        ended_at: None,
                        enabled: true,
                    },
                    0,
                )
                .expect("event");
        }

        let store = SqliteStore::open(&path).expect("reopen");
        let rules = store.rule_context("bay").expect("rules").expect("present");
        assert_eq!(rules.collision_penalty, Some(10));
        assert!(store.rule_context("unknown").expect("rules").is_none());
        assert_eq!(
            store
                .load_environment("bay")
                .expect("env")
                .map(|environment| environment.wind.speed),
            Some(14.0)
        );
        let events = store.load_events("bay").expect("events");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].pattern.as_deref(), Some("stormy"));

        cleanup(&path);
    }
}
