//! JSON encode/decode helpers for the wire protocol.
//!
//! Decoding an unknown or malformed frame returns an error; transports
//! log it and drop the frame rather than tearing down the connection.

use crate::action::ClientAction;
use crate::event::ServerEvent;

/// Error type for protocol encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The frame is not valid JSON or names an unknown message type.
    #[error("Undecodable frame: {0}")]
    Undecodable(#[from] serde_json::Error),
}

/// Encode a client action as a JSON frame.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_action(action: &ClientAction) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(action)?)
}

/// Decode a client action from a JSON frame.
///
/// # Errors
///
/// Returns an error for malformed JSON or an unrecognized `action` tag.
pub fn decode_action(frame: &str) -> Result<ClientAction, ProtocolError> {
    Ok(serde_json::from_str(frame)?)
}

/// Encode a server event as a JSON frame.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_event(event: &ServerEvent) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(event)?)
}

/// Decode a server event from a JSON frame.
///
/// # Errors
///
/// Returns an error for malformed JSON or an unrecognized `event` tag.
pub fn decode_event(frame: &str) -> Result<ServerEvent, ProtocolError> {
    Ok(serde_json::from_str(frame)?)
}
