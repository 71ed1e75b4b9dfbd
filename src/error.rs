//! Unified error handling for the run-tracker library.
//!
//! Only configuration and persistence can fail recoverably. Misuse of the
//! session state machine (double start, mutation after finish, double pause)
//! is a programming error and panics instead of returning one of these.

use thiserror::Error;

/// Unified error type for run-tracker operations.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Tracking configuration is out of range
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// No energy model is registered for the activity kind
    #[error("Unknown activity kind '{0}'")]
    UnknownActivityKind(String),

    /// The persistence sink rejected an operation
    #[error("Persistence error: {message}")]
    Persistence { message: String },

    /// JSON (de)serialization of config, snapshots or preferences
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "persistence")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl TrackerError {
    pub fn config(message: impl Into<String>) -> Self {
        TrackerError::Config {
            message: message.into(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        TrackerError::Persistence {
            message: message.into(),
        }
    }
}

/// Result type alias for run-tracker operations.
pub type Result<T> = std::result::Result<T, TrackerError>;

/// Extension trait for converting Option to TrackerError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a configuration error.
    fn ok_or_config(self, message: &str) -> Result<T>;

    /// Convert Option to Result with a persistence error.
    fn ok_or_persistence(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_config(self, message: &str) -> Result<T> {
        self.ok_or_else(|| TrackerError::config(message))
    }

    fn ok_or_persistence(self, message: &str) -> Result<T> {
        self.ok_or_else(|| TrackerError::persistence(message))
    }
}
