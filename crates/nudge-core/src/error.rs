//! Unified error types for Nudge.

use thiserror::Error;

use crate::types::ConnectionState;

/// Result type alias using NudgeError.
pub type Result<T> = std::result::Result<T, NudgeError>;

#[derive(Error, Debug)]
pub enum NudgeError {
    // Connection errors
    #[error("Not connected (state: {0})")]
    NotConnected(ConnectionState),

    #[error("Provisioning code unavailable (state: {0})")]
    ProvisioningUnavailable(ConnectionState),

    #[error("Session logged out: a new provisioning cycle is required")]
    LoggedOut,

    #[error("Transport error: {0}")]
    Transport(String),

    // Dispatch errors
    #[error("Invalid recipient address: {0:?}")]
    InvalidAddress(String),

    #[error("Send to {recipient} failed: {reason}")]
    SendFailed { recipient: String, reason: String },

    #[error("Dispatcher unavailable: {0}")]
    Dispatcher(String),

    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Persistence errors
    #[error("Store error: {0}")]
    Store(String),

    // Config errors
    #[error("Configuration error: {0}")]
    Config(String),

    // General errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl NudgeError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn send_failed(recipient: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SendFailed {
            recipient: recipient.into(),
            reason: reason.into(),
        }
    }
}
