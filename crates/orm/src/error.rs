//! Error types for the ORM system
//!
//! Provides error handling for schema loading, attribute casting,
//! association preloading and database access.

use thiserror::Error;

/// Result type alias for model operations
pub type ModelResult<T> = Result<T, ModelError>;

/// ORM error type alias
pub type OrmError = ModelError;

/// ORM result type alias
pub type OrmResult<T> = ModelResult<T>;

/// Error types for ORM operations
///
/// Errors are `Clone` so a single failed schema load can be handed to every
/// task that was waiting on it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    /// Database connection or query error
    #[error("Database error: {0}")]
    Database(String),

    /// Query building error
    #[error("Query error: {0}")]
    Query(String),

    /// Schema metadata could not be loaded or is inconsistent
    #[error("Schema error: {0}")]
    Schema(String),

    /// The model has no table configured
    #[error("{model} has no table configured. Set one with ModelDefinition::with_table_name")]
    TableNotSpecified { model: String },

    /// A preload request named an association the model does not declare
    #[error("Association named '{association}' was not found on {model}; perhaps you misspelled it?")]
    UnknownAssociation { model: String, association: String },

    /// Attribute read or write on an undeclared attribute
    #[error("Unknown attribute '{attribute}' for {model}")]
    UnknownAttribute { model: String, attribute: String },

    /// A value could not be cast to the attribute type
    #[error("Cannot cast {value} to {target}")]
    TypeCast { value: String, target: String },

    /// Relationship resolution failed (e.g. a misconfigured through association)
    #[error("Relationship error: {0}")]
    Relationship(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid key error
    #[error("Invalid key error: {0}")]
    InvalidKey(String),
}

impl ModelError {
    pub fn unknown_association(model: impl Into<String>, association: impl Into<String>) -> Self {
        Self::UnknownAssociation {
            model: model.into(),
            association: association.into(),
        }
    }

    pub fn type_cast(value: &serde_json::Value, target: impl Into<String>) -> Self {
        Self::TypeCast {
            value: value.to_string(),
            target: target.into(),
        }
    }

    /// Returns true for errors raised while validating a preload request,
    /// before any query was issued.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownAssociation { .. } | Self::Configuration(_) | Self::TableNotSpecified { .. }
        )
    }
}

// Convert from sqlx errors
impl From<sqlx::Error> for ModelError {
    fn from(err: sqlx::Error) -> Self {
        ModelError::Database(err.to_string())
    }
}

// Convert from serde_json errors
impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        ModelError::Serialization(err.to_string())
    }
}
