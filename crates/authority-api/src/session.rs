//! Connection admission: signed tokens, identities and the registry that keeps
//! one live session per user per space.

use std::collections::BTreeMap;

use contracts::messages::SessionInfo;
use contracts::{expand_roles, has_permission, permissions_for_roles, ConnectionId, Permission, Role};
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::collaborators::{BanRecord, CollaboratorError};

type HmacSha256 = Hmac<Sha256>;

const GUEST_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const GUEST_ID_LEN: usize = 7;

#[derive(Debug, Error, PartialEq)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,
    #[error("token signature does not match")]
    BadSignature,
    #[error("token expired at {0}")]
    Expired(u64),
    #[error("token claims are invalid: {0}")]
    Claims(String),
    #[error("signing key is unusable")]
    Key,
}

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("{}", .0.message())]
    Banned(BanRecord),
    #[error("space {space_id} could not be loaded: {source}")]
    SpaceUnavailable {
        space_id: String,
        #[source]
        source: CollaboratorError,
    },
}

impl AdmissionError {
    /// Text sent to the client in the closing `error` event.
    pub fn client_message(&self) -> String {
        match self {
            Self::Banned(ban) => ban.message(),
            Self::SpaceUnavailable { .. } => "Space unavailable".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    pub sub: String,
    pub name: String,
    #[serde(default)]
    pub roles: Vec<Role>,
    /// Expiry in epoch milliseconds.
    #[serde(default)]
    pub exp: Option<u64>,
}

/// Signs and verifies `hex(claims_json).hex(hmac_sha256)` tokens.
#[derive(Clone)]
pub struct TokenSigner {
    secret: Vec<u8>,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner").finish_non_exhaustive()
    }
}

impl TokenSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self) -> Result<HmacSha256, TokenError> {
        HmacSha256::new_from_slice(&self.secret).map_err(|_| TokenError::Key)
    }

    pub fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        let body =
            serde_json::to_vec(claims).map_err(|err| TokenError::Claims(err.to_string()))?;
        let mut mac = self.mac()?;
        mac.update(&body);
        let signature = mac.finalize().into_bytes();
        Ok(format!("{}.{}", hex::encode(&body), hex::encode(signature)))
    }

    pub fn verify(&self, token: &str, now_ms: u64) -> Result<Claims, TokenError> {
        let (body_hex, signature_hex) = token.trim().split_once('.').ok_or(TokenError::Malformed)?;
        let body = hex::decode(body_hex).map_err(|_| TokenError::Malformed)?;
        let signature = hex::decode(signature_hex).map_err(|_| TokenError::Malformed)?;

        let mut mac = self.mac()?;
        mac.update(&body);
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let claims: Claims =
            serde_json::from_slice(&body).map_err(|err| TokenError::Claims(err.to_string()))?;
        if claims.sub.trim().is_empty() {
            return Err(TokenError::Claims("sub is empty".to_string()));
        }
        if let Some(exp) = claims.exp {
            if exp <= now_ms {
                return Err(TokenError::Expired(exp));
            }
        }
        Ok(claims)
    }
}

/// Who is on the other end of a connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
    pub roles: Vec<Role>,
    pub permissions: Vec<Permission>,
}

impl Identity {
    pub fn from_claims(claims: Claims) -> Self {
        let base = if claims.roles.is_empty() {
            vec![Role::Player]
        } else {
            claims.roles
        };
        let roles = expand_roles(&base);
        let permissions = permissions_for_roles(&roles);
        let username = if claims.name.trim().is_empty() {
            claims.sub.clone()
        } else {
            claims.name
        };
        Self {
            user_id: claims.sub,
            username,
            roles,
            permissions,
        }
    }

    pub fn guest<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let suffix: String = (0..GUEST_ID_LEN)
            .map(|_| char::from(GUEST_ID_ALPHABET[rng.gen_range(0..GUEST_ID_ALPHABET.len())]))
            .collect();
        let roles = expand_roles(&[Role::Guest]);
        Self {
            user_id: format!("guest_{suffix}"),
            username: "Guest".to_string(),
            permissions: permissions_for_roles(&roles),
            roles,
        }
    }

    pub fn highest_role(&self) -> Role {
        self.roles.iter().copied().max().unwrap_or(Role::Guest)
    }

    pub fn is_guest(&self) -> bool {
        self.highest_role() == Role::Guest
    }

    pub fn is_admin(&self) -> bool {
        self.highest_role() == Role::Admin
    }

    /// Players and admins get a vessel; spectators and guests only watch.
    pub fn can_crew(&self) -> bool {
        self.can("vessel", "update")
    }

    pub fn can(&self, resource: &str, action: &str) -> bool {
        has_permission(&self.permissions, resource, action)
    }
}

/// Verifies `token` if present, degrading to a fresh guest on any failure.
pub fn resolve_identity<R: Rng + ?Sized>(
    signer: &TokenSigner,
    token: Option<&str>,
    now_ms: u64,
    rng: &mut R,
) -> (Identity, Option<TokenError>) {
    match token.filter(|token| !token.trim().is_empty()) {
        Some(token) => match signer.verify(token, now_ms) {
            Ok(claims) => (Identity::from_claims(claims), None),
            Err(err) => (Identity::guest(rng), Some(err)),
        },
        None => (Identity::guest(rng), None),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub connection_id: ConnectionId,
    pub identity: Identity,
    pub space_id: String,
    pub vessel_id: Option<String>,
}

impl Session {
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            connection_id: self.connection_id.0,
            user_id: self.identity.user_id.clone(),
            username: self.identity.username.clone(),
            roles: self.identity.roles.clone(),
            permissions: self
                .identity
                .permissions
                .iter()
                .map(ToString::to_string)
                .collect(),
            space_id: self.space_id.clone(),
            vessel_id: self.vessel_id.clone(),
        }
    }
}

/// Live sessions, indexed by connection and by `(space, user)`.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: BTreeMap<ConnectionId, Session>,
    active: BTreeMap<(String, String), ConnectionId>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `session`, returning the connection it displaced for the
    /// same user in the same space.
    pub fn admit(&mut self, session: Session) -> Option<Session> {
        let key = (session.space_id.clone(), session.identity.user_id.clone());
        let evicted = self
            .active
            .insert(key, session.connection_id)
            .filter(|previous| *previous != session.connection_id)
            .and_then(|previous| self.sessions.remove(&previous));
        self.sessions.insert(session.connection_id, session);
        evicted
    }

    /// Swaps the identity on an existing connection. Returns the displaced
    /// session, if the new identity already had one in this space.
    pub fn reidentify(
        &mut self,
        connection_id: ConnectionId,
        identity: Identity,
    ) -> Option<Session> {
        let mut session = self.remove(connection_id)?;
        session.identity = identity;
        session.vessel_id = None;
        self.admit(session)
    }

    pub fn remove(&mut self, connection_id: ConnectionId) -> Option<Session> {
        let session = self.sessions.remove(&connection_id)?;
        let key = (session.space_id.clone(), session.identity.user_id.clone());
        if self.active.get(&key) == Some(&connection_id) {
            self.active.remove(&key);
        }
        Some(session)
    }

    pub fn get(&self, connection_id: ConnectionId) -> Option<&Session> {
        self.sessions.get(&connection_id)
    }

    pub fn get_mut(&mut self, connection_id: ConnectionId) -> Option<&mut Session> {
        self.sessions.get_mut(&connection_id)
    }

    pub fn active_for(&self, space_id: &str, user_id: &str) -> Option<ConnectionId> {
        self.active
            .get(&(space_id.to_string(), user_id.to_string()))
            .copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn claims(sub: &str, roles: Vec<Role>, exp: Option<u64>) -> Claims {
        Claims {
            sub: sub.to_string(),
            name: sub.to_uppercase(),
            roles,
            exp,
        }
    }

    fn session(connection: u64, user: &str, space: &str) -> Session {
        Session {
            connection_id: ConnectionId(connection),
            identity: Identity::from_claims(claims(user, vec![Role::Player], None)),
            space_id: space.to_string(),
            vessel_id: None,
        }
    }

    #[test]
    fn signed_token_verifies_and_expands_roles() {
        let signer = TokenSigner::new("secret");
        let token = signer
            .sign(&claims("alice", vec![Role::Player], Some(10_000)))
            .expect("sign");

        let verified = signer.verify(&token, 9_999).expect("valid");
        let identity = Identity::from_claims(verified);
        assert_eq!(identity.username, "ALICE");
        assert_eq!(identity.roles, vec![Role::Guest, Role::Spectator, Role::Player]);
        assert!(identity.can_crew());
        assert!(!identity.is_admin());
    }

    #[test]
    fn tampered_expired_or_foreign_tokens_are_rejected() {
        let signer = TokenSigner::new("secret");
        let token = signer
            .sign(&claims("alice", vec![Role::Admin], Some(10_000)))
            .expect("sign");

        assert_eq!(signer.verify(&token, 10_000), Err(TokenError::Expired(10_000)));
        assert_eq!(
            TokenSigner::new("other").verify(&token, 0),
            Err(TokenError::BadSignature)
        );
        let forged_body = hex::encode(br#"{"sub":"mallory","name":"m","roles":["admin"]}"#);
        let (_, signature) = token.split_once('.').expect("two parts");
        assert_eq!(
            signer.verify(&format!("{forged_body}.{signature}"), 0),
            Err(TokenError::BadSignature)
        );
        assert_eq!(signer.verify("not-a-token", 0), Err(TokenError::Malformed));
    }

    #[test]
    fn failed_verification_degrades_to_guest() {
        let signer = TokenSigner::new("secret");
        let mut rng = StdRng::seed_from_u64(7);

        let (identity, error) = resolve_identity(&signer, Some("zz.zz"), 0, &mut rng);
        assert!(identity.is_guest());
        assert!(identity.user_id.starts_with("guest_"));
        assert_eq!(identity.user_id.len(), "guest_".len() + GUEST_ID_LEN);
        assert!(identity.permissions.is_empty());
        assert_eq!(error, Some(TokenError::Malformed));

        let (anonymous, error) = resolve_identity(&signer, None, 0, &mut rng);
        assert!(anonymous.is_guest());
        assert!(error.is_none());
    }

    #[test]
    fn second_session_for_user_evicts_first_in_same_space_only() {
        let mut registry = SessionRegistry::new();
        assert!(registry.admit(session(1, "alice", "bay")).is_none());
        assert!(registry.admit(session(2, "alice", "strait")).is_none());

        let evicted = registry.admit(session(3, "alice", "bay")).expect("evicted");
        assert_eq!(evicted.connection_id, ConnectionId(1));
        assert_eq!(registry.active_for("bay", "alice"), Some(ConnectionId(3)));
        assert!(registry.get(ConnectionId(1)).is_none());
        assert_eq!(registry.len(), 2);

        // The evicted socket's own disconnect must not unseat the new one.
        assert!(registry.remove(ConnectionId(1)).is_none());
        assert_eq!(registry.active_for("bay", "alice"), Some(ConnectionId(3)));
    }

    #[test]
    fn reidentify_moves_the_connection_to_the_new_user() {
        let mut registry = SessionRegistry::new();
        registry.admit(session(1, "guest_x", "bay"));
        registry.admit(session(2, "bob", "bay"));

        let bob = Identity::from_claims(claims("bob", vec![Role::Player], None));
        let evicted = registry.reidentify(ConnectionId(1), bob).expect("bob evicted");
        assert_eq!(evicted.connection_id, ConnectionId(2));
        assert_eq!(registry.active_for("bay", "bob"), Some(ConnectionId(1)));
        assert!(registry.active_for("bay", "guest_x").is_none());
    }
}
