//! Error types shared across the Vigil workspace.

use thiserror::Error;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating configuration.
///
/// At startup a `ConfigError` is fatal; for a single ephemeral
/// registration entry it is logged and the entry is skipped.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("service `{service}`: {reason}")]
    InvalidService { service: String, reason: String },
}

impl ConfigError {
    /// Shorthand for a per-service validation failure.
    pub fn invalid(service: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidService {
            service: service.into(),
            reason: reason.into(),
        }
    }
}
