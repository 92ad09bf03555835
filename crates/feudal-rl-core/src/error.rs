//! Error types for the feudal learner

use thiserror::Error;

/// Core error type for hierarchy operations
#[derive(Error, Debug)]
pub enum FeudalError {
    /// Illegal action, unknown state or malformed partition wiring
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Probability or mean-cost query on a pair with zero samples
    #[error("Division undefined: no samples for {0}")]
    DivisionUndefined(String),

    /// Environment-related errors
    #[error("Environment error: {0}")]
    Environment(String),

    /// Violation of the inter-level message protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Wire-format or identifier parse failure
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for hierarchy operations
pub type Result<T> = std::result::Result<T, FeudalError>;
