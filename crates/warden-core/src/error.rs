//! Unified error types for the Warden foundation layer.
//!
//! Dispatch-level errors (cooldowns, guards, validation, admission) are
//! defined in `warden-framework`; this module only covers the transport
//! collaborator.

use thiserror::Error;

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors that can occur while talking to the chat transport.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The transport session is not connected.
    #[error("transport is not connected")]
    NotConnected,

    /// Message send failed.
    #[error("failed to send message: {0}")]
    SendFailed(String),

    /// Message edit failed.
    #[error("failed to edit message '{message_id}': {reason}")]
    EditFailed {
        /// The message that could not be edited.
        message_id: String,
        /// Reason for failure.
        reason: String,
    },

    /// The transport does not implement the requested operation.
    #[error("operation '{operation}' is not supported by this transport")]
    Unsupported {
        /// The unsupported operation.
        operation: &'static str,
    },

    /// The call timed out.
    #[error("transport call timed out")]
    Timeout,

    /// Failed to serialize/deserialize a payload.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Creates a send failure.
    pub fn send_failed(msg: impl Into<String>) -> Self {
        Self::SendFailed(msg.into())
    }

    /// Creates a free-form transport error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
