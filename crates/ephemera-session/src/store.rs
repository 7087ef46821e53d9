//! The token store: the only component that creates or mutates sessions.
//!
//! # Concurrency note
//!
//! The table is behind a `std::sync::RwLock`. No method awaits while
//! holding it, so it is safe to call from any Tokio task. Uniqueness of
//! (credential, room) is enforced by a unique index consulted through the
//! `HashMap` entry API inside a single write critical section:
//! insert-or-fetch, never check-then-insert across two lock acquisitions.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use ephemera_protocol::{RoomName, SessionId};
use rand::Rng;

use crate::{
    AlphanumericPolicy, CredentialPolicy, Session, SessionError, SharedClock,
};

/// Key of the unique index: one active session per pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SessionKey {
    credential: String,
    room: RoomName,
}

#[derive(Default)]
struct SessionTable {
    sessions: HashMap<SessionId, Session>,
    /// Unique index over (credential, room). Always points at an entry
    /// in `sessions`.
    by_key: HashMap<SessionKey, SessionId>,
}

/// Maps credentials to room-scoped sessions.
///
/// ```text
/// validate_or_create(cred, room) ──→ [new Session]  (first time)
///                                └─→ [same Session, last_used_at = now]
/// resolve(session_id, room)      ──→ Session | Unauthorized
/// ```
pub struct TokenStore {
    table: RwLock<SessionTable>,
    policy: Box<dyn CredentialPolicy>,
    clock: SharedClock,
}

impl TokenStore {
    /// Creates an empty store using the default
    /// [`AlphanumericPolicy`].
    pub fn new(clock: SharedClock) -> Self {
        Self::with_policy(clock, AlphanumericPolicy::default())
    }

    /// Creates an empty store with a custom credential policy.
    pub fn with_policy(
        clock: SharedClock,
        policy: impl CredentialPolicy,
    ) -> Self {
        Self {
            table: RwLock::new(SessionTable::default()),
            policy: Box::new(policy),
            clock,
        }
    }

    /// Exchanges a credential for the session bound to `room`.
    ///
    /// Idempotent: repeated calls with the same pair return the same
    /// `session_id`, refreshing `last_used_at` each time.
    ///
    /// # Errors
    /// - [`SessionError::InvalidCredential`]: the policy rejected it
    /// - [`SessionError::StoreUnavailable`]: the table lock is poisoned
    pub fn validate_or_create(
        &self,
        credential: &str,
        room: &RoomName,
    ) -> Result<Session, SessionError> {
        self.policy.check(credential)?;

        let now = self.clock.now();
        let key = SessionKey {
            credential: credential.to_owned(),
            room: room.clone(),
        };

        let mut guard = self.write()?;
        let SessionTable { sessions, by_key } = &mut *guard;

        match by_key.entry(key) {
            Entry::Occupied(mut slot) => {
                if let Some(existing) = sessions.get_mut(slot.get()) {
                    if existing.active {
                        existing.last_used_at = now;
                        tracing::debug!(
                            session_id = %existing.session_id,
                            %room,
                            "session reused"
                        );
                        return Ok(existing.clone());
                    }
                }
                // The indexed session is gone or inactive: the pair has
                // no active session, so issue a fresh one in its place.
                let session = new_session(sessions, credential, room, now);
                slot.insert(session.session_id.clone());
                Ok(session)
            }
            Entry::Vacant(slot) => {
                let session = new_session(sessions, credential, room, now);
                slot.insert(session.session_id.clone());
                Ok(session)
            }
        }
    }

    /// Looks up the active session `session_id` and checks it is bound
    /// to `room`. Read-only: `last_used_at` is not touched.
    ///
    /// # Errors
    /// - [`SessionError::Unauthorized`]: unknown, inactive, or other room
    /// - [`SessionError::StoreUnavailable`]: the table lock is poisoned
    pub fn resolve(
        &self,
        session_id: &SessionId,
        room: &RoomName,
    ) -> Result<Session, SessionError> {
        let table = self.read()?;
        match table.sessions.get(session_id) {
            Some(session) if session.active && &session.room == room => {
                Ok(session.clone())
            }
            _ => Err(SessionError::Unauthorized(session_id.clone())),
        }
    }

    /// Returns a copy of the session, if it exists (any state, any room).
    pub fn get(&self, session_id: &SessionId) -> Option<Session> {
        self.read().ok()?.sessions.get(session_id).cloned()
    }

    /// Number of sessions ever issued.
    pub fn len(&self) -> usize {
        self.read().map_or(0, |t| t.sessions.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, SessionTable>, SessionError> {
        self.table.read().map_err(|_| {
            tracing::warn!("session table lock poisoned");
            SessionError::StoreUnavailable("session table lock poisoned")
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, SessionTable>, SessionError> {
        self.table.write().map_err(|_| {
            tracing::warn!("session table lock poisoned");
            SessionError::StoreUnavailable("session table lock poisoned")
        })
    }
}

/// Inserts a brand-new active session and returns a copy of it.
fn new_session(
    sessions: &mut HashMap<SessionId, Session>,
    credential: &str,
    room: &RoomName,
    now: chrono::DateTime<chrono::Utc>,
) -> Session {
    let mut session_id = generate_session_id();
    while sessions.contains_key(&session_id) {
        session_id = generate_session_id();
    }

    let session = Session {
        session_id: session_id.clone(),
        credential: credential.to_owned(),
        room: room.clone(),
        active: true,
        created_at: now,
        last_used_at: now,
    };
    sessions.insert(session_id.clone(), session.clone());
    tracing::info!(%session_id, %room, "session created");
    session
}

/// Generates a random 32-character hex id (128 bits from the thread RNG).
fn generate_session_id() -> SessionId {
    let bytes: [u8; 16] = rand::rng().random();
    SessionId::new(bytes.iter().map(|b| format!("{b:02x}")).collect::<String>())
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Naming: `test_{function}_{scenario}_{expected}`.
    //!
    //! Time is driven by a `ManualClock`, never by sleeping.

    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};

    use super::*;
    use crate::{Clock, ManualClock};

    // -- Helpers ----------------------------------------------------------

    fn store() -> (TokenStore, ManualClock) {
        let clock =
            ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap());
        (TokenStore::new(Arc::new(clock.clone())), clock)
    }

    fn room(name: &str) -> RoomName {
        RoomName::parse(name).unwrap()
    }

    // =====================================================================
    // validate_or_create()
    // =====================================================================

    #[test]
    fn test_validate_or_create_new_pair_returns_active_session() {
        let (store, clock) = store();

        let session = store
            .validate_or_create("abc123def456", &room("general"))
            .expect("valid credential");

        assert!(session.active);
        assert_eq!(session.room, room("general"));
        assert_eq!(session.credential, "abc123def456");
        assert_eq!(session.session_id.as_str().len(), 32);
        assert_eq!(session.created_at, clock.now());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_validate_or_create_same_pair_returns_same_session() {
        let (store, _) = store();

        let first = store.validate_or_create("abc123def456", &room("general")).unwrap();
        let second = store.validate_or_create("abc123def456", &room("general")).unwrap();

        assert_eq!(first.session_id, second.session_id);
        assert_eq!(store.len(), 1, "re-auth must not create a duplicate");
    }

    #[test]
    fn test_validate_or_create_reuse_refreshes_last_used_at() {
        let (store, clock) = store();
        let first = store.validate_or_create("abc123def456", &room("general")).unwrap();

        clock.advance(Duration::seconds(30));
        let second = store.validate_or_create("abc123def456", &room("general")).unwrap();

        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.last_used_at, first.last_used_at + Duration::seconds(30));
        assert_eq!(
            store.get(&first.session_id).unwrap().last_used_at,
            second.last_used_at,
            "refresh must be persisted, not just returned"
        );
    }

    #[test]
    fn test_validate_or_create_same_credential_other_room_is_new_session() {
        let (store, _) = store();

        let a = store.validate_or_create("abc123def456", &room("general")).unwrap();
        let b = store.validate_or_create("abc123def456", &room("random")).unwrap();

        assert_ne!(a.session_id, b.session_id);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_validate_or_create_invalid_credential_creates_nothing() {
        let (store, _) = store();

        let result = store.validate_or_create("short", &room("general"));

        assert!(matches!(result, Err(SessionError::InvalidCredential(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn test_validate_or_create_custom_policy_is_consulted() {
        struct RejectAll;
        impl CredentialPolicy for RejectAll {
            fn check(&self, _: &str) -> Result<(), SessionError> {
                Err(SessionError::InvalidCredential("closed".into()))
            }
        }
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = TokenStore::with_policy(clock, RejectAll);

        assert!(store.validate_or_create("abc123def456", &room("general")).is_err());
    }

    #[test]
    fn test_validate_or_create_concurrent_logins_share_one_session() {
        let (store, _) = store();
        let general = room("general");

        let ids: Vec<SessionId> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| {
                    scope.spawn(|| {
                        store
                            .validate_or_create("abc123def456", &general)
                            .unwrap()
                            .session_id
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(store.len(), 1);
    }

    // =====================================================================
    // resolve()
    // =====================================================================

    #[test]
    fn test_resolve_matching_room_returns_session() {
        let (store, _) = store();
        let session = store.validate_or_create("abc123def456", &room("general")).unwrap();

        let resolved = store.resolve(&session.session_id, &room("general")).unwrap();

        assert_eq!(resolved.session_id, session.session_id);
    }

    #[test]
    fn test_resolve_other_room_is_unauthorized() {
        let (store, _) = store();
        let session = store.validate_or_create("abc123def456", &room("general")).unwrap();

        let result = store.resolve(&session.session_id, &room("random"));

        assert!(matches!(result, Err(SessionError::Unauthorized(_))));
    }

    #[test]
    fn test_resolve_unknown_session_is_unauthorized() {
        let (store, _) = store();

        let result = store.resolve(&SessionId::new("nope"), &room("general"));

        assert!(matches!(result, Err(SessionError::Unauthorized(id)) if id.as_str() == "nope"));
    }

    #[test]
    fn test_resolve_does_not_touch_last_used_at() {
        let (store, clock) = store();
        let session = store.validate_or_create("abc123def456", &room("general")).unwrap();

        clock.advance(Duration::minutes(5));
        store.resolve(&session.session_id, &room("general")).unwrap();

        assert_eq!(
            store.get(&session.session_id).unwrap().last_used_at,
            session.last_used_at
        );
    }

    // =====================================================================
    // get() / len()
    // =====================================================================

    #[test]
    fn test_get_unknown_returns_none() {
        let (store, _) = store();
        assert!(store.get(&SessionId::new("missing")).is_none());
    }

    #[test]
    fn test_generate_session_id_is_unique_hex() {
        let a = generate_session_id();
        let b = generate_session_id();
        assert_ne!(a, b);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
