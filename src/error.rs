//! WolfLease Error Types

use thiserror::Error;

/// Result type alias for WolfLease operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfLease error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Lease store errors
    #[error("Lease store error: {0}")]
    Store(#[from] StoreError),

    #[error("Lease record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,
}

/// Failures reported by a lease store.
///
/// These never reach the host process through the election coordinator;
/// the coordinator turns them into retries or role changes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No record exists under the key (expected on first run)
    #[error("lease {key} not found")]
    NotFound { key: String },

    /// The presented fencing token does not match the stored one
    #[error("lease {key} was modified concurrently (stale fencing token)")]
    Conflict { key: String },

    /// Transient I/O, network or timeout failure
    #[error("lease store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Unavailable(format!("SQLite error: {}", e))
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            StoreError::Unavailable(format!("request timed out: {}", e))
        } else {
            StoreError::Unavailable(format!("HTTP error: {}", e))
        }
    }
}
