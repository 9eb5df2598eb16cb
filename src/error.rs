//! Error types for Courier
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using CourierError
pub type Result<T> = std::result::Result<T, CourierError>;

/// Unified error type for Courier operations
#[derive(Debug, Error)]
pub enum CourierError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Network Errors
    // -------------------------------------------------------------------------
    /// Socket level failure. The connection has already been dropped.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Error reply sent by the store. The connection is still usable.
    #[error("Server error: {0}")]
    Server(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Unexpected reply: expected {expected}, got {found}")]
    UnexpectedReply {
        expected: &'static str,
        found: String,
    },

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    // -------------------------------------------------------------------------
    // Connector Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Digest signature failed")]
    Signature,

    /// A safely received message failed verification or decoding.
    /// It is still held in the staging list `srcack`.
    #[error("Rejected message staged in {srcack}: {reason}")]
    Rejected {
        srcack: String,
        #[source]
        reason: Box<CourierError>,
    },

    #[error("Timeout")]
    Timeout,

    #[error("Error on worker side: {0}")]
    RemoteExecution(String),

    #[error("Function {funcname} failed: {message}")]
    Handler { funcname: String, message: String },

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CourierError {
    /// True for failures that invalidated the connection
    pub fn is_transport(&self) -> bool {
        matches!(self, CourierError::Transport(_) | CourierError::Io(_))
    }

    /// Staging list still holding the message behind a rejected receive
    pub fn srcack(&self) -> Option<&str> {
        match self {
            CourierError::Rejected { srcack, .. } => Some(srcack),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for CourierError {
    fn from(err: serde_json::Error) -> Self {
        CourierError::Serialization(err.to_string())
    }
}
