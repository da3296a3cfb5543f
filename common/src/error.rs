//! Error types shared by the cluster member coordinator crates.

use thiserror::Error;

/// Main error type for cluster membership operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HaError {
    /// Instance identifier could not be parsed.
    #[error("Invalid instance id: {0}")]
    InvalidInstanceId(String),

    /// The election trigger can no longer accept requests.
    #[error("Election trigger closed")]
    ElectionTriggerClosed,

    /// The cluster event source stopped accepting events.
    #[error("Cluster event source closed")]
    EventSourceClosed,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl HaError {
    /// Get error code for diagnostics.
    pub fn error_code(&self) -> &'static str {
        match self {
            HaError::InvalidInstanceId(_) => "INVALID_INSTANCE_ID",
            HaError::ElectionTriggerClosed => "ELECTION_TRIGGER_CLOSED",
            HaError::EventSourceClosed => "EVENT_SOURCE_CLOSED",
            HaError::ConfigurationError(_) => "CONFIGURATION_ERROR",
        }
    }
}

/// Result type alias for cluster membership operations.
pub type Result<T> = std::result::Result<T, HaError>;
