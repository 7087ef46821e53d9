//! Core protocol types for Ephemera's wire format.
//!
//! Everything in this module travels on the wire: identifiers, the
//! request/response pairs for the four chat operations, server-push
//! events, and the envelopes that wrap them.
//!
//! JSON field names are camelCase because the clients are browsers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Server-generated identifier of an authenticated session.
///
/// Clients present it on every call after authenticating, so it is
/// generated from a CSPRNG and never derived from the credential.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wraps an already-generated identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a stored message.
///
/// Assigned from a monotonically increasing counter, so it doubles as
/// the insertion-order tie-break when two messages share a timestamp.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "M-{}", self.0)
    }
}

/// The name of a chat room.
///
/// Always trimmed and non-empty. Any length is accepted. Deserialization
/// goes through the same check, so a request carrying `"roomName": "   "`
/// is rejected while decoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomName(String);

impl RoomName {
    /// Validates and normalizes a raw room name.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ProtocolError::InvalidRoomName(
                "room name is required".into(),
            ));
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RoomName {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomName> for String {
    fn from(room: RoomName) -> Self {
        room.0
    }
}

impl fmt::Display for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// A message as clients see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: MessageId,
    pub room_name: RoomName,
    pub session_id: SessionId,
    pub user_label: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Errors on the wire
// ---------------------------------------------------------------------------

/// The error taxonomy clients can observe.
///
/// Every failure inside the server is mapped to exactly one of these
/// before it leaves the process; raw storage or transport errors never
/// reach a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The credential failed the format check.
    InvalidCredential,
    /// Malformed request, empty content, bad room name, empty label.
    InvalidInput,
    /// Unknown or inactive session, or a session bound to another room.
    Unauthorized,
    /// The session posted too recently. Retry after the window.
    RateLimited,
    /// Anything else. Safe to retry with backoff.
    InternalFailure,
}

impl ErrorKind {
    /// HTTP-style status code for this kind.
    pub fn status(self) -> u16 {
        match self {
            Self::InvalidCredential | Self::InvalidInput => 400,
            Self::Unauthorized => 401,
            Self::RateLimited => 429,
            Self::InternalFailure => 500,
        }
    }

    /// Whether a client may retry the same request unchanged.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimited | Self::InternalFailure)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidCredential => "InvalidCredential",
            Self::InvalidInput => "InvalidInput",
            Self::Unauthorized => "Unauthorized",
            Self::RateLimited => "RateLimited",
            Self::InternalFailure => "InternalFailure",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Operations a client can request.
///
/// Internally tagged: `{ "type": "PostMessage", "sessionId": ..., ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum Request {
    /// Exchange a credential for a session bound to `room_name`.
    Authenticate {
        credential: String,
        room_name: RoomName,
    },

    /// The 100 most recent live messages in a room, oldest first.
    ListMessages { room_name: RoomName },

    /// Post a message. `user_label` is the author's display label; the
    /// server derives one from the session id when it is absent.
    PostMessage {
        session_id: SessionId,
        room_name: RoomName,
        content: String,
        #[serde(default)]
        user_label: Option<String>,
    },

    /// Announce the caller's typing state and read everyone else's.
    SetTyping {
        session_id: SessionId,
        room_name: RoomName,
        #[serde(default)]
        user_label: Option<String>,
        is_typing: bool,
    },

    /// Start receiving pushed [`Event`]s for a room.
    Subscribe {
        session_id: SessionId,
        room_name: RoomName,
    },

    /// Stop receiving pushed events.
    Unsubscribe,

    /// Keep-alive; echoed back as [`Response::Pong`].
    Ping { client_time: u64 },
}

impl Request {
    /// Short operation name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Authenticate { .. } => "Authenticate",
            Self::ListMessages { .. } => "ListMessages",
            Self::PostMessage { .. } => "PostMessage",
            Self::SetTyping { .. } => "SetTyping",
            Self::Subscribe { .. } => "Subscribe",
            Self::Unsubscribe => "Unsubscribe",
            Self::Ping { .. } => "Ping",
        }
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// The server's answer to exactly one [`Request`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum Response {
    Authenticated {
        session_id: SessionId,
        room_name: RoomName,
    },
    Messages { messages: Vec<MessageView> },
    MessagePosted { message: MessageView },
    TypingUsers { typing_users: Vec<String> },
    Subscribed { room_name: RoomName },
    Unsubscribed,
    Pong { client_time: u64, server_time: u64 },
    Error {
        kind: ErrorKind,
        code: u16,
        message: String,
    },
}

impl Response {
    /// Builds an error response; `code` always agrees with `kind`.
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            kind,
            code: kind.status(),
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Server-push events
// ---------------------------------------------------------------------------

/// Something that happened in a room, pushed to its subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum Event {
    /// A message was admitted to the room.
    MessageCreated { message: MessageView },

    /// The set of typing labels in the room changed.
    TypingChanged {
        room_name: RoomName,
        typing_users: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------------------

/// Everything a client sends is wrapped in one of these.
///
/// `id` is chosen by the client and echoed back as `replyTo` so it can
/// match responses to requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientEnvelope {
    pub id: u64,
    pub request: Request,
}

/// What a server frame carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum ServerPayload {
    /// The answer to the client request with id `reply_to`.
    Response { reply_to: u64, response: Response },

    /// An unsolicited room event.
    Event(Event),
}

/// Everything the server sends is wrapped in one of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEnvelope {
    /// Per-connection counter, increasing by one per frame.
    pub seq: u64,
    pub payload: ServerPayload,
}

// =========================================================================
// Tests
// =========================================================================
