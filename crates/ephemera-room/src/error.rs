//! Error types for the room layer.

use ephemera_protocol::SessionId;
use ephemera_session::SessionError;

/// Errors that can occur while posting, listing, or tracking presence.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// Authorization through the token store failed (or the store
    /// itself is unavailable).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The request was well-formed but its content is not acceptable,
    /// e.g. a message that is empty after trimming.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The session already posted within the rate-limit window.
    #[error("session {session_id} is posting too fast, retry in {retry_after_ms} ms")]
    RateLimited {
        session_id: SessionId,
        /// Milliseconds until the window reopens.
        retry_after_ms: u64,
    },

    /// A room table is unusable (a writer panicked mid-update).
    #[error("{0} unavailable")]
    StoreUnavailable(&'static str),
}
