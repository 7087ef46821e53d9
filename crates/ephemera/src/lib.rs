//! # Ephemera
//!
//! Ephemeral, room-scoped chat over WebSocket.
//!
//! A client trades a bearer credential for a session bound to one room,
//! then posts messages that live for ten minutes, announces typing, and
//! subscribes to the room to have new messages and typing changes pushed
//! to it. Nothing is persisted: the server keeps all state in memory and
//! sweeps expired rows on reads and on an interval.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ephemera::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), EphemeraError> {
//!     let server = EphemeraServer::builder()
//!         .bind("0.0.0.0:8080")
//!         .build()
//!         .await?;
//!     server.run().await
//! }
//! ```

mod error;
mod handler;
mod server;

pub use error::EphemeraError;
pub use server::{
    DEFAULT_IDLE_TIMEOUT, DEFAULT_SWEEP_INTERVAL, EphemeraServer, EphemeraServerBuilder,
};

/// Re-exports of commonly used types.
pub mod prelude {
    pub use crate::{EphemeraError, EphemeraServer, EphemeraServerBuilder};
    pub use ephemera_protocol::{
        ClientEnvelope, ErrorKind, Event, MessageId, MessageView, Request, Response, RoomName,
        ServerEnvelope, ServerPayload, SessionId,
    };
    pub use ephemera_room::{HubConfig, LedgerConfig, PresenceConfig};
    pub use ephemera_session::{
        AlphanumericPolicy, Clock, CredentialPolicy, ManualClock, SessionError, SharedClock,
        SystemClock,
    };
}
