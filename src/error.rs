//! zkcluster Error Types

use thiserror::Error;

/// Result type alias for zkcluster operations
pub type Result<T> = std::result::Result<T, Error>;

/// zkcluster error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to render configuration: {0}")]
    ConfigRender(#[from] toml::ser::Error),

    // Connection errors
    #[error("Connection failed to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Connection timeout to {0}")]
    ConnectionTimeout(String),

    #[error("Session expired")]
    SessionExpired,

    // Election errors
    #[error("No membership snapshot obtained for {path} within {timeout_ms}ms")]
    ElectionTimeout { path: String, timeout_ms: u64 },

    #[error("Failed to register entry under {path}: {reason}")]
    Registration { path: String, reason: String },

    #[error("Failed to delete entry {path}: {reason}")]
    Deletion { path: String, reason: String },

    #[error("Coordinator has never obtained a membership snapshot")]
    NeverConnected,

    // Coordination service errors
    #[error("No such entry: {0}")]
    NoNode(String),

    #[error("Invalid entry name: {0}")]
    InvalidEntry(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionTimeout(_) | Error::ConnectionFailed { .. }
        )
    }

    /// Check if this error means the session is gone and the entry must be
    /// re-registered rather than the call retried
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Error::SessionExpired)
    }
}
