//! The session record: one credential admitted to one room.

use std::fmt;

use chrono::{DateTime, Utc};
use ephemera_protocol::{RoomName, SessionId};

/// Number of trailing session-id characters used in a derived label.
const LABEL_SUFFIX_CHARS: usize = 8;

/// A single authenticated client in a single room.
///
/// Created the first time a credential is validated for a room and
/// reused on every later validation of the same pair. Sessions are
/// never deleted by the store.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    /// Server-generated id; the authorization handle for every other
    /// operation.
    pub session_id: SessionId,

    /// The bearer string this session was opened with.
    pub credential: String,

    /// The one room this session may act in.
    pub room: RoomName,

    /// Inactive sessions fail authorization.
    pub active: bool,

    pub created_at: DateTime<Utc>,

    /// Refreshed on every successful re-validation of the credential.
    pub last_used_at: DateTime<Utc>,
}

impl Session {
    /// The display label used when a client does not supply one.
    pub fn default_label(&self) -> String {
        default_user_label(&self.session_id)
    }
}

// The credential is a bearer secret; keep it out of logs.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("credential", &"<redacted>")
            .field("room", &self.room)
            .field("active", &self.active)
            .field("created_at", &self.created_at)
            .field("last_used_at", &self.last_used_at)
            .finish()
    }
}

/// Derives `user_<last 8 chars of the session id>`.
pub fn default_user_label(session_id: &SessionId) -> String {
    let id = session_id.as_str();
    let start = id
        .char_indices()
        .rev()
        .nth(LABEL_SUFFIX_CHARS - 1)
        .map_or(0, |(i, _)| i);
    format!("user_{}", &id[start..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_user_label_uses_last_eight_chars() {
        let id = SessionId::new("0123456789abcdef");
        assert_eq!(default_user_label(&id), "user_89abcdef");
    }

    #[test]
    fn test_default_user_label_short_id_uses_whole_id() {
        let id = SessionId::new("abc");
        assert_eq!(default_user_label(&id), "user_abc");
    }

    #[test]
    fn test_debug_redacts_credential() {
        let now = Utc::now();
        let session = Session {
            session_id: SessionId::new("s1"),
            credential: "abc123def456".into(),
            room: RoomName::parse("general").unwrap(),
            active: true,
            created_at: now,
            last_used_at: now,
        };
        let printed = format!("{session:?}");
        assert!(!printed.contains("abc123def456"));
        assert!(printed.contains("<redacted>"));
    }
}
