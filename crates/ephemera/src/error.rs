//! Unified error type for the Ephemera server, and its mapping onto the
//! client-visible [`ErrorKind`] taxonomy.

use ephemera_protocol::{ErrorKind, ProtocolError};
use ephemera_room::RoomError;
use ephemera_session::SessionError;
use ephemera_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant auto-generates `From` impls,
/// so the `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum EphemeraError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Credential or session authorization failure.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A ledger or presence operation failed.
    #[error(transparent)]
    Room(#[from] RoomError),
}

impl EphemeraError {
    /// The kind reported to the client.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Session(e) | Self::Room(RoomError::Session(e)) => session_kind(e),
            Self::Room(RoomError::InvalidInput(_)) => ErrorKind::InvalidInput,
            Self::Room(RoomError::RateLimited { .. }) => ErrorKind::RateLimited,
            Self::Room(RoomError::StoreUnavailable(_)) => ErrorKind::InternalFailure,
            Self::Protocol(ProtocolError::Encode(_)) => ErrorKind::InternalFailure,
            Self::Protocol(_) => ErrorKind::InvalidInput,
            Self::Transport(_) => ErrorKind::InternalFailure,
        }
    }

    /// The message reported to the client. Internal failures are never
    /// described beyond their kind.
    pub fn client_message(&self) -> String {
        match self.kind() {
            ErrorKind::InternalFailure => "internal server error".to_owned(),
            _ => self.to_string(),
        }
    }
}

fn session_kind(err: &SessionError) -> ErrorKind {
    match err {
        SessionError::InvalidCredential(_) => ErrorKind::InvalidCredential,
        SessionError::Unauthorized(_) => ErrorKind::Unauthorized,
        SessionError::StoreUnavailable(_) => ErrorKind::InternalFailure,
    }
}

impl From<&EphemeraError> for ErrorKind {
    fn from(err: &EphemeraError) -> Self {
        err.kind()
    }
}

#[cfg(test)]
mod tests {
    use ephemera_protocol::{RoomName, SessionId};

    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err: EphemeraError = TransportError::ConnectionClosed("gone".into()).into();
        assert!(matches!(err, EphemeraError::Transport(_)));
        assert!(err.to_string().contains("gone"));
        assert_eq!(err.kind(), ErrorKind::InternalFailure);
    }

    #[test]
    fn test_kind_invalid_credential() {
        let err: EphemeraError = SessionError::InvalidCredential("too short".into()).into();
        assert_eq!(err.kind(), ErrorKind::InvalidCredential);
        assert_eq!(err.kind().status(), 400);
    }

    #[test]
    fn test_kind_unauthorized_through_room_layer() {
        let err: EphemeraError =
            RoomError::from(SessionError::Unauthorized(SessionId::new("s1"))).into();
        assert_eq!(ErrorKind::from(&err), ErrorKind::Unauthorized);
        assert_eq!(err.kind().status(), 401);
    }

    #[test]
    fn test_kind_rate_limited() {
        let err: EphemeraError = RoomError::RateLimited {
            session_id: SessionId::new("s1"),
            retry_after_ms: 1500,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert!(err.client_message().contains("1500"));
    }

    #[test]
    fn test_kind_bad_room_name_is_invalid_input() {
        let err: EphemeraError = RoomName::parse("   ").unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_client_message_hides_internal_details() {
        let err: EphemeraError = RoomError::StoreUnavailable("message ledger").into();
        assert_eq!(err.kind(), ErrorKind::InternalFailure);
        assert!(!err.client_message().contains("ledger"));
    }
}
