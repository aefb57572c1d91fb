//! Row codec for the global change feed.
//!
//! The feed delivers every inserted message system-wide as a raw JSON row;
//! the subscriber decodes each row into a [`Message`] and filters by thread
//! client-side. Encoding is used by backends pushing rows into the feed.

use serde_json::Value;

use crate::message::Message;

/// Error type for feed row encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The row is not a well-formed message record.
    #[error("malformed feed row: {0}")]
    MalformedRow(String),
}

/// Encodes a [`Message`] into a feed row.
///
/// # Errors
///
/// Returns `CodecError::MalformedRow` if the message cannot be serialized.
pub fn encode_row(message: &Message) -> Result<Value, CodecError> {
    serde_json::to_value(message).map_err(|e| CodecError::MalformedRow(e.to_string()))
}

/// Decodes a feed row back into a [`Message`].
///
/// # Errors
///
/// Returns `CodecError::MalformedRow` if the row is missing required fields
/// or carries values of the wrong shape.
pub fn decode_row(row: &Value) -> Result<Message, CodecError> {
    serde_json::from_value(row.clone()).map_err(|e| CodecError::MalformedRow(e.to_string()))
}
