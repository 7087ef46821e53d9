//! Wire protocol for Ephemera.
//!
//! - **Types** ([`ClientEnvelope`], [`Request`], [`Response`], [`Event`],
//!   identifiers): what travels between browser and server.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how those become frames.
//! - **Errors** ([`ProtocolError`]).
//!
//! ```text
//! Transport (frames) → Protocol (envelopes) → Session / Room services
//! ```

mod codec;
mod error;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{
    ClientEnvelope, ErrorKind, Event, MessageId,
    MessageView, Request, Response, RoomName, ServerEnvelope, ServerPayload,
    SessionId,
};
