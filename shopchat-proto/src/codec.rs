//! Serialization and deserialization for the Shopchat wire protocol.
//!
//! Thin postcard wrappers shared by the relay server and the WebSocket
//! client. WebSocket frames preserve message boundaries, so no additional
//! framing layer is needed.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Encodes a wire frame into a byte vector using postcard.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the frame cannot be serialized.
pub fn encode<T: Serialize>(frame: &T) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(frame).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a wire frame from a byte slice using postcard.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the bytes cannot be deserialized.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    postcard::from_bytes(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
}
