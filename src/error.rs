//! Error types for the intake assistant.

use std::time::Duration;

use crate::intake::{ConversationState, Field};

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Intake error: {0}")]
    Intake(#[from] IntakeError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Socket error: {0}")]
    Socket(#[from] SocketError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Invalid question table: {0}")]
    InvalidQuestionTable(String),
}

/// A user-correctable rejection of a raw answer.
///
/// `message` is shown to the user verbatim before the prompt is repeated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid value for {field}: {message}")]
pub struct ValidationError {
    pub field: Field,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: Field, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Errors returned by the conversation engine.
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("A backend call is already in flight")]
    Busy,

    #[error("Not collecting answers in state {state}")]
    NotCollecting { state: ConversationState },

    #[error("Operation requires a completed intake (current state: {state})")]
    NotCompleted { state: ConversationState },

    #[error("An appointment has already been booked for this session")]
    AlreadyBooked,

    #[error("No specialty has been recommended yet")]
    NoSpecialty,

    #[error("The conversation was restarted while the call was in flight")]
    Restarted,

    #[error("Backend call failed: {0}")]
    Backend(#[from] GatewayError),
}

/// Failures of a remote backend call.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Network error calling {endpoint}: {reason}")]
    Network { endpoint: String, reason: String },

    #[error("Server error from {endpoint} (status {status}): {body}")]
    Server {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Request to {endpoint} timed out after {timeout:?}")]
    Timeout { endpoint: String, timeout: Duration },

    #[error("Invalid response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },
}

/// Persistent transport errors.
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("Socket is not connected")]
    NotConnected,

    #[error("Failed to connect to {url}: {reason}")]
    ConnectFailed { url: String, reason: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Failed to serialize frame: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Malformed inbound frame: {0}")]
    Protocol(String),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
