//! Error types for Warden

use thiserror::Error;

/// Warden error type
#[derive(Error, Debug)]
pub enum WardenError {
    /// Client address missing or unparsable
    #[error("invalid IP address: {0}")]
    InvalidIp(String),

    /// Address list entry that is neither an address nor a CIDR block
    #[error("invalid list entry: {0}")]
    InvalidEntry(String),

    /// Configuration error
    #[error("config error: {0}")]
    ConfigError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON encode/decode error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result type for Warden
pub type WardenResult<T> = Result<T, WardenError>;
