//! Codec trait and implementations for turning wire types into frames.
//!
//! The server loop only needs "something that encodes and decodes";
//! which format that is stays a deployment choice. [`JsonCodec`] is the
//! one browsers speak.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// Encodes values to frame bytes and decodes frames back.
///
/// `Send + Sync + 'static` because a single codec instance is shared by
/// every connection task for the life of the server.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into frame bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if the value cannot be represented.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes frame bytes into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` for malformed or invalid input,
    /// including fields that fail validation while decoding.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] backed by `serde_json`.
///
/// ## Example
///
/// ```rust
/// use ephemera_protocol::{ClientEnvelope, Codec, JsonCodec, Request};
///
/// let codec = JsonCodec;
/// let frame = br#"{"id":1,"request":{"type":"Ping","clientTime":5}}"#;
///
/// let envelope: ClientEnvelope = codec.decode(frame).unwrap();
/// assert_eq!(envelope.request, Request::Ping { client_time: 5 });
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
