//! Error types for the Gatekeeper service.

use thiserror::Error;

/// Main error type for Gatekeeper operations.
///
/// Admission denials are not errors; they are reported through
/// [`crate::ratelimit::Decision`]. Everything here surfaces at startup or
/// while talking to the upstream portal.
#[derive(Error, Debug)]
pub enum GatekeeperError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A route or lookup referenced a policy that is not in the table
    #[error("Unknown rate limit policy: {0}")]
    UnknownPolicy(String),

    /// A policy violates its invariants
    #[error("Invalid rate limit policy '{name}': {reason}")]
    InvalidPolicy { name: String, reason: String },

    /// Forwarding to the upstream portal failed
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Layered configuration loading errors
    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Gatekeeper operations.
pub type Result<T> = std::result::Result<T, GatekeeperError>;
