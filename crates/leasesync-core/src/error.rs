//! Error types for the lease sync system
//!
//! Every failure a cycle can hit maps onto one of these variants. The
//! engine uses [`Error::is_retryable`] to decide whether the next cycle may
//! start without a config change.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for lease sync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the lease sync system
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or contradictory bindings in the host configuration
    #[error("Config parse error: {0}")]
    ConfigParse(String),

    /// The host configuration could not be read at all
    #[error("Binding source error: {0}")]
    Source(String),

    /// Lease cache could not be opened, read or written
    #[error("Cache store error: {0}")]
    CacheStore(String),

    /// The update applier reported a failure
    #[error("Update applier error ({applier}): {message}")]
    Apply {
        /// Applier name
        applier: String,
        /// Exit status of the underlying protocol exchange, if any
        status: Option<i32>,
        /// Error message
        message: String,
    },

    /// The update applier did not finish in time
    #[error("Update applier timed out after {0:?}")]
    ApplyTimeout(Duration),

    /// Invalid settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a config parse error
    pub fn config_parse(msg: impl Into<String>) -> Self {
        Self::ConfigParse(msg.into())
    }

    /// Create a binding source error
    pub fn source(msg: impl Into<String>) -> Self {
        Self::Source(msg.into())
    }

    /// Create a cache store error
    pub fn cache_store(msg: impl Into<String>) -> Self {
        Self::CacheStore(msg.into())
    }

    /// Create an applier error
    pub fn apply(
        applier: impl Into<String>,
        status: Option<i32>,
        message: impl Into<String>,
    ) -> Self {
        Self::Apply {
            applier: applier.into(),
            status,
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether a failed cycle should be retried without waiting for a
    /// config change.
    ///
    /// Cache and apply failures leave the desired state untouched, so the
    /// same cycle is worth running again. Parse and config failures will
    /// fail identically until someone edits the config.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CacheStore(_) | Self::Apply { .. } | Self::ApplyTimeout(_) | Self::Io(_)
        )
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::CacheStore(err.to_string())
    }
}
