//! Stored rows: messages and typing states, plus input normalization
//! shared by the ledger and the presence tracker.

use chrono::{DateTime, Utc};
use ephemera_protocol::{MessageId, MessageView, RoomName, SessionId};
use ephemera_session::Session;

use crate::RoomError;

/// Longest display label kept, in characters. Longer labels are cut.
pub const MAX_USER_LABEL_CHARS: usize = 64;

/// One chat utterance as stored by the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub room: RoomName,
    /// Author.
    pub session_id: SessionId,
    pub author_label: String,
    /// Trimmed, at most `max_content_chars` characters.
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Always `created_at + message_ttl`.
    pub expires_at: DateTime<Utc>,
    /// Tombstone set by the sweeper once expired.
    pub deleted: bool,
}

impl Message {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// The client-facing shape.
    pub fn to_view(&self) -> MessageView {
        MessageView {
            id: self.id,
            room_name: self.room.clone(),
            session_id: self.session_id.clone(),
            user_label: self.author_label.clone(),
            content: self.content.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}

/// One session's typing flag in one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingState {
    pub session_id: SessionId,
    pub room: RoomName,
    pub user_label: String,
    pub is_typing: bool,
    pub updated_at: DateTime<Utc>,
}

impl TypingState {
    /// `true` while the row was refreshed less than `staleness` ago.
    pub fn is_fresh_at(
        &self,
        now: DateTime<Utc>,
        staleness: chrono::Duration,
    ) -> bool {
        now - self.updated_at < staleness
    }
}

/// Trims and truncates message content.
///
/// Never rejects long content; only content that is empty once trimmed.
pub(crate) fn normalize_content(
    raw: &str,
    max_chars: usize,
) -> Result<String, RoomError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(RoomError::InvalidInput("message content is required".into()));
    }
    Ok(truncate_chars(trimmed, max_chars).to_owned())
}

/// Picks the display label: the client's (trimmed, capped) or the one
/// derived from the session id when the client sent none.
pub(crate) fn resolve_label(
    raw: Option<&str>,
    session: &Session,
) -> Result<String, RoomError> {
    match raw {
        None => Ok(session.default_label()),
        Some(label) => {
            let trimmed = label.trim();
            if trimmed.is_empty() {
                return Err(RoomError::InvalidInput("user label is required".into()));
            }
            Ok(truncate_chars(trimmed, MAX_USER_LABEL_CHARS).to_owned())
        }
    }
}

/// Cuts `s` to at most `max` Unicode scalar values without splitting one.
fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((byte_idx, _)) => &s[..byte_idx],
        None => s,
    }
}
