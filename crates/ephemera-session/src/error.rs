//! Error types for the session layer.

use ephemera_protocol::SessionId;

/// Errors that can occur while issuing or resolving sessions.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The credential failed the [`CredentialPolicy`](crate::CredentialPolicy).
    /// The string says why, without echoing the credential.
    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    /// No active session with this id is bound to the requested room.
    /// Covers unknown ids, inactive sessions, and room mismatches alike
    /// so callers cannot probe which one it was.
    #[error("session {0} is not authorized for this room")]
    Unauthorized(SessionId),

    /// The session table is unusable (a writer panicked mid-update).
    #[error("session store unavailable: {0}")]
    StoreUnavailable(&'static str),
}
