//! Loader configuration
//!
//! `LoaderConfig` collects the settings the loader consults while building
//! and executing statements. Values come from defaults, can be overridden
//! from `ELIF_LOADER_*` environment variables and are validated before use.

use std::collections::HashMap;
use std::env;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dialect::DialectKind;
use crate::id::UuidStrategy;

/// Upper bound accepted for `max_fetch_depth`
pub const MAX_FETCH_DEPTH_LIMIT: usize = 10;

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required field: {field}. {hint}")]
    MissingRequired { field: String, hint: String },

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
    /// Create a missing required field error
    pub fn missing_required(field: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::MissingRequired {
            field: field.into(),
            hint: hint.into(),
        }
    }

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

/// Where a configuration value came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    EnvVar(String),
    Default(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    pub dialect: DialectKind,
    /// Log every statement at debug level
    pub show_sql: bool,
    /// Prepend query comments to the SQL
    pub use_sql_comments: bool,
    /// Allow scrollable cursors for offset emulation
    pub scrollable_result_sets: bool,
    /// Join fetches deeper than this become subsequent selects
    pub max_fetch_depth: usize,
    pub default_batch_fetch_size: usize,
    pub fetch_size: Option<u32>,
    pub query_timeout_seconds: Option<u32>,
    pub uuid_strategy: UuidStrategy,
    /// Address bytes embedded in time-based v1 identifiers
    pub node_address: Ipv4Addr,
    pub database_url: Option<String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            dialect: DialectKind::PostgreSQL,
            show_sql: false,
            use_sql_comments: false,
            scrollable_result_sets: true,
            max_fetch_depth: 3,
            default_batch_fetch_size: 1,
            fetch_size: None,
            query_timeout_seconds: None,
            uuid_strategy: UuidStrategy::Random,
            node_address: Ipv4Addr::LOCALHOST,
            database_url: None,
        }
    }
}

impl LoaderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for a given dialect with every other setting defaulted
    pub fn for_dialect(dialect: DialectKind) -> Self {
        Self {
            dialect,
            ..Self::default()
        }
    }

    /// Load configuration from `ELIF_LOADER_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new();

        if let Some(dialect) = lookup("ELIF_LOADER_DIALECT") {
            config.dialect = dialect.parse()?;
        }
        if let Some(value) = parse_var(&lookup, "ELIF_LOADER_SHOW_SQL", "show_sql", "true or false")? {
            config.show_sql = value;
        }
        if let Some(value) = parse_var(
            &lookup,
            "ELIF_LOADER_USE_SQL_COMMENTS",
            "use_sql_comments",
            "true or false",
        )? {
            config.use_sql_comments = value;
        }
        if let Some(value) = parse_var(
            &lookup,
            "ELIF_LOADER_SCROLLABLE_RESULTSETS",
            "scrollable_result_sets",
            "true or false",
        )? {
            config.scrollable_result_sets = value;
        }
        if let Some(value) = parse_var(
            &lookup,
            "ELIF_LOADER_MAX_FETCH_DEPTH",
            "max_fetch_depth",
            "a non-negative number",
        )? {
            config.max_fetch_depth = value;
        }
        if let Some(value) = parse_var(
            &lookup,
            "ELIF_LOADER_DEFAULT_BATCH_FETCH_SIZE",
            "default_batch_fetch_size",
            "a positive number",
        )? {
            config.default_batch_fetch_size = value;
        }
        config.fetch_size = parse_var(&lookup, "ELIF_LOADER_FETCH_SIZE", "fetch_size", "a positive number")?;
        config.query_timeout_seconds = parse_var(
            &lookup,
            "ELIF_LOADER_QUERY_TIMEOUT",
            "query_timeout_seconds",
            "a number of seconds",
        )?;
        if let Some(strategy) = lookup("ELIF_LOADER_UUID_STRATEGY") {
            config.uuid_strategy = strategy.parse()?;
        }
        if let Some(address) = parse_var(
            &lookup,
            "ELIF_LOADER_NODE_ADDRESS",
            "node_address",
            "an IPv4 address",
        )? {
            config.node_address = address;
        }
        config.database_url = lookup("DATABASE_URL");

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_batch_fetch_size == 0 {
            return Err(ConfigError::validation_failed(
                "default_batch_fetch_size must be at least 1",
            ));
        }
        if self.fetch_size == Some(0) {
            return Err(ConfigError::validation_failed(
                "fetch_size must be positive when set",
            ));
        }
        if self.max_fetch_depth > MAX_FETCH_DEPTH_LIMIT {
            return Err(ConfigError::validation_failed(format!(
                "max_fetch_depth {} exceeds the limit of {}",
                self.max_fetch_depth, MAX_FETCH_DEPTH_LIMIT
            )));
        }
        Ok(())
    }

    /// Report where each setting came from, for debugging
    pub fn config_sources(&self) -> HashMap<String, ConfigSource> {
        let vars = [
            ("dialect", "ELIF_LOADER_DIALECT", "postgresql"),
            ("show_sql", "ELIF_LOADER_SHOW_SQL", "false"),
            ("use_sql_comments", "ELIF_LOADER_USE_SQL_COMMENTS", "false"),
            ("scrollable_result_sets", "ELIF_LOADER_SCROLLABLE_RESULTSETS", "true"),
            ("max_fetch_depth", "ELIF_LOADER_MAX_FETCH_DEPTH", "3"),
            ("default_batch_fetch_size", "ELIF_LOADER_DEFAULT_BATCH_FETCH_SIZE", "1"),
            ("fetch_size", "ELIF_LOADER_FETCH_SIZE", "driver default"),
            ("query_timeout_seconds", "ELIF_LOADER_QUERY_TIMEOUT", "none"),
            ("uuid_strategy", "ELIF_LOADER_UUID_STRATEGY", "random"),
            ("node_address", "ELIF_LOADER_NODE_ADDRESS", "127.0.0.1"),
            ("database_url", "DATABASE_URL", "none"),
        ];

        vars.iter()
            .map(|(field, var, default)| {
                let source = if env::var(var).is_ok() {
                    ConfigSource::EnvVar(var.to_string())
                } else {
                    ConfigSource::Default(default.to_string())
                };
                (field.to_string(), source)
            })
            .collect()
    }
}

fn parse_var<F, T>(lookup: &F, var: &str, field: &str, expected: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::invalid_value(field, raw, expected)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = LoaderConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.dialect, DialectKind::PostgreSQL);
        assert!(!config.show_sql);
        assert!(config.scrollable_result_sets);
        assert_eq!(config.max_fetch_depth, 3);
        assert_eq!(config.default_batch_fetch_size, 1);
        assert_eq!(config.fetch_size, None);
        assert_eq!(config.uuid_strategy, UuidStrategy::Random);
        assert_eq!(config.node_address, Ipv4Addr::LOCALHOST);
    }

    #[test]
    fn test_overrides() {
        let config = LoaderConfig::from_lookup(lookup_from(&[
            ("ELIF_LOADER_DIALECT", "informix"),
            ("ELIF_LOADER_SHOW_SQL", "true"),
            ("ELIF_LOADER_SCROLLABLE_RESULTSETS", "false"),
            ("ELIF_LOADER_MAX_FETCH_DEPTH", "5"),
            ("ELIF_LOADER_FETCH_SIZE", "250"),
            ("ELIF_LOADER_UUID_STRATEGY", "v7"),
            ("ELIF_LOADER_NODE_ADDRESS", "10.1.2.3"),
            ("DATABASE_URL", "postgres://localhost/app"),
        ]))
        .unwrap();

        assert_eq!(config.dialect, DialectKind::Informix);
        assert!(config.show_sql);
        assert!(!config.scrollable_result_sets);
        assert_eq!(config.max_fetch_depth, 5);
        assert_eq!(config.fetch_size, Some(250));
        assert_eq!(config.uuid_strategy, UuidStrategy::Version7);
        assert_eq!(config.node_address, Ipv4Addr::new(10, 1, 2, 3));
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/app"));
    }

    #[test]
    fn test_invalid_value_names_field() {
        let err = LoaderConfig::from_lookup(lookup_from(&[("ELIF_LOADER_MAX_FETCH_DEPTH", "deep")]))
            .unwrap_err();
        match err {
            ConfigError::InvalidValue { field, value, .. } => {
                assert_eq!(field, "max_fetch_depth");
                assert_eq!(value, "deep");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_validation() {
        let mut config = LoaderConfig::default();
        assert!(config.validate().is_ok());

        config.default_batch_fetch_size = 0;
        assert!(config.validate().is_err());

        config.default_batch_fetch_size = 4;
        config.fetch_size = Some(0);
        assert!(config.validate().is_err());

        config.fetch_size = Some(100);
        config.max_fetch_depth = MAX_FETCH_DEPTH_LIMIT + 1;
        assert!(config.validate().is_err());
    }
}
