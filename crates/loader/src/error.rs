//! Error types for the loader
//!
//! Every failure surfaced by plan building, SQL rendering, statement
//! execution or hydration is a [`LoaderError`]. Messages always name the
//! offending mapping, property path or bind position.

use thiserror::Error;

use crate::config::ConfigError;

/// Result type alias for loader operations
pub type LoaderResult<T> = Result<T, LoaderError>;

/// Errors raised by the loader
#[derive(Debug, Error)]
pub enum LoaderError {
    /// An invariant of the fetch graph was violated while walking the metamodel
    #[error("Walking error at '{path}': {message}")]
    Walking { path: String, message: String },

    /// The metamodel describes something the loader cannot handle
    #[error("Mapping error: {0}")]
    Mapping(String),

    /// Invalid setup (session factory, generators, dialect choices)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Malformed SQL fragment or parameter shape
    #[error("Query error: {0}")]
    Query(String),

    /// A value could not be bound at the given 1-based position
    #[error("Could not bind parameter at position {position}: {message}")]
    Binding { position: usize, message: String },

    /// Driver or connection failure
    #[error("Database error: {0}")]
    Database(String),

    /// A column value could not be read or converted
    #[error("Could not extract column '{column}': {message}")]
    Extraction { column: String, message: String },

    /// A component was used in a state it does not support
    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error("Unknown collection role: {0}")]
    UnknownCollection(String),

    /// Temporal table mapping not supported by the dialect
    #[error("Temporal table error: {0}")]
    Temporal(String),
}

impl LoaderError {
    pub fn walking(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Walking {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn binding(position: usize, message: impl Into<String>) -> Self {
        Self::Binding {
            position,
            message: message.into(),
        }
    }

    pub fn extraction(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Extraction {
            column: column.into(),
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for LoaderError {
    fn from(err: sqlx::Error) -> Self {
        LoaderError::Database(err.to_string())
    }
}

impl From<ConfigError> for LoaderError {
    fn from(err: ConfigError) -> Self {
        LoaderError::Configuration(err.to_string())
    }
}

impl From<serde_json::Error> for LoaderError {
    fn from(err: serde_json::Error) -> Self {
        LoaderError::Extraction {
            column: "<json>".to_string(),
            message: err.to_string(),
        }
    }
}
