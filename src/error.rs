//! Error types for the Tokengate service.

use thiserror::Error;

/// Main error type for Tokengate operations.
#[derive(Error, Debug)]
pub enum GateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The listener could not be bound
    #[error("Failed to bind listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The HTTP server stopped with an error after binding
    #[error("HTTP server error: {0}")]
    Serve(#[source] std::io::Error),

    /// `start` was called on a server that is not idle
    #[error("Server has already been started")]
    AlreadyStarted,
}

impl From<config::ConfigError> for GateError {
    fn from(err: config::ConfigError) -> Self {
        GateError::Config(err.to_string())
    }
}

/// Result type alias for Tokengate operations.
pub type Result<T> = std::result::Result<T, GateError>;
