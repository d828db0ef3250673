//! Error types for botbridge.

use thiserror::Error;

/// Common error type for botbridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Script compilation or execution error.
    #[error("script error: {0}")]
    Script(String),

    /// Database error.
    ///
    /// Errors from sqlx are automatically converted.
    #[error("database error: {0}")]
    Database(String),

    /// Database connection error.
    #[error("database connection error: {0}")]
    DatabaseConnection(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Chat transport error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Outbound HTTP error.
    #[error("HTTP error: {0}")]
    Http(String),
}

impl From<sqlx::Error> for BridgeError {
    fn from(e: sqlx::Error) -> Self {
        BridgeError::Database(e.to_string())
    }
}

impl From<mlua::Error> for BridgeError {
    fn from(e: mlua::Error) -> Self {
        BridgeError::Script(e.to_string())
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(e: reqwest::Error) -> Self {
        BridgeError::Http(e.without_url().to_string())
    }
}

/// Result type alias for botbridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;
