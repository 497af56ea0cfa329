//! Error types for interceptor setup

use thiserror::Error;

/// Result type for configuration loading
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors raised while building the interceptor configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable present but not parseable
    #[error("Failed to read interceptor configuration from environment: {0}")]
    Env(#[from] envy::Error),

    /// Value parsed but out of range
    #[error("Invalid interceptor configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Create an invalid-value error
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}
