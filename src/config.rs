//! Store configuration
//!
//! Every field has a default, so an empty JSON object is a valid
//! configuration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::observability::{log_event, Event, Severity};

/// Configuration for a [`TreeStore`](crate::TreeStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Minimum severity written by the logger.
    pub log_severity: Severity,
    /// Evaluate non-correlated `$in`/`$nin` subqueries once per filter
    /// instead of once per candidate row.
    pub eager_subqueries: bool,
    /// Default for [`SelectOption::obscure`](crate::SelectOption).
    pub default_obscure: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            log_severity: Severity::default(),
            eager_subqueries: true,
            default_obscure: false,
        }
    }
}

impl StoreConfig {
    /// Parse a configuration from a JSON document.
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config: StoreConfig = serde_json::from_str(content)
            .map_err(|e| ConfigError::Malformed(e.to_string()))?;
        log_event(
            config.log_severity,
            Event::ConfigLoaded,
            &[("log_severity", config.log_severity.as_str())],
        );
        Ok(config)
    }

    /// Read and parse a configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json_str(&content)
    }

    /// Configuration with trace logging, handy while debugging queries.
    pub fn verbose() -> Self {
        Self {
            log_severity: Severity::Trace,
            ..Self::default()
        }
    }
}

/// Errors raised while loading configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Malformed config: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.log_severity, Severity::Warn);
        assert!(config.eager_subqueries);
        assert!(!config.default_obscure);
    }

    #[test]
    fn test_empty_object_is_default() {
        let config = StoreConfig::from_json_str("{}").unwrap();
        assert_eq!(config, StoreConfig::default());
    }

    #[test]
    fn test_partial_config_keeps_other_defaults() {
        let config = StoreConfig::from_json_str(r#"{"default_obscure": true}"#).unwrap();
        assert!(config.default_obscure);
        assert!(config.eager_subqueries);
    }

    #[test]
    fn test_malformed_config_rejected() {
        let err = StoreConfig::from_json_str(r#"{"eager_subqueries": "yes"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Malformed(_)));
    }

    #[test]
    fn test_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"log_severity": "error", "eager_subqueries": false}}"#).unwrap();

        let config = StoreConfig::from_file(file.path()).unwrap();
        assert_eq!(config.log_severity, Severity::Error);
        assert!(!config.eager_subqueries);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = StoreConfig::from_file(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_verbose_logs_trace() {
        assert_eq!(StoreConfig::verbose().log_severity, Severity::Trace);
    }
}
