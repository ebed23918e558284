//! Preload configuration

use thiserror::Error;

/// Environment variable overriding [`PreloadConfig::max_batch_size`]
pub const MAX_BATCH_SIZE_ENV: &str = "STRATA_PRELOAD_MAX_BATCH_SIZE";

/// Environment variable overriding [`PreloadConfig::max_depth`]
pub const MAX_DEPTH_ENV: &str = "STRATA_PRELOAD_MAX_DEPTH";

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for field '{field}': '{value}'. Expected: {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Configuration validation failed: {message}")]
    ValidationFailed { message: String },
}

impl ConfigError {
    /// Create an invalid value error
    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            expected: expected.into(),
        }
    }

    /// Create a validation failed error
    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::ValidationFailed {
            message: message.into(),
        }
    }
}

impl From<ConfigError> for crate::error::ModelError {
    fn from(err: ConfigError) -> Self {
        crate::error::ModelError::Configuration(err.to_string())
    }
}

/// Configuration for batched association preloading
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreloadConfig {
    /// Maximum number of keys sent in a single batched query.
    /// `None` sends every key of a loader group in one query.
    pub max_batch_size: Option<usize>,
    /// Maximum depth of the nested association tree
    pub max_depth: usize,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            max_batch_size: None,
            max_depth: 10,
        }
    }
}

impl PreloadConfig {
    /// Build a configuration from the defaults overridden by environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var(MAX_BATCH_SIZE_ENV) {
            let size = raw.trim().parse::<usize>().map_err(|_| {
                ConfigError::invalid_value(MAX_BATCH_SIZE_ENV, &raw, "a positive integer")
            })?;
            config.max_batch_size = Some(size);
        }

        if let Ok(raw) = std::env::var(MAX_DEPTH_ENV) {
            config.max_depth = raw.trim().parse::<usize>().map_err(|_| {
                ConfigError::invalid_value(MAX_DEPTH_ENV, &raw, "a positive integer")
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Split keys into chunks of at most `max_batch_size`
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = Some(size);
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_batch_size == Some(0) {
            return Err(ConfigError::validation_failed(
                "max_batch_size must be greater than zero",
            ));
        }
        if self.max_depth == 0 {
            return Err(ConfigError::validation_failed(
                "max_depth must be greater than zero",
            ));
        }
        Ok(())
    }
}
