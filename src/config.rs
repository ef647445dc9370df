//! Registry configuration.
//!
//! Loaded from YAML, every field optional:
//!
//! ```yaml
//! busy_timeout_ms: 5000
//! journal_mode: wal
//! foreign_keys: true
//! memory_store_prefix: memdb-registry
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default time a connection waits on a locked database (5 seconds).
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Default prefix of the memdb store names backing in-memory databases.
pub const DEFAULT_MEMORY_STORE_PREFIX: &str = "memdb-registry";

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse YAML configuration.
    #[error("failed to parse YAML config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Configuration validation failed.
    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// SQLite journal modes accepted for file-backed databases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    Delete,
    Truncate,
    Persist,
    Memory,
    Wal,
    Off,
}

impl JournalMode {
    pub fn as_sql(self) -> &'static str {
        match self {
            JournalMode::Delete => "DELETE",
            JournalMode::Truncate => "TRUNCATE",
            JournalMode::Persist => "PERSIST",
            JournalMode::Memory => "MEMORY",
            JournalMode::Wal => "WAL",
            JournalMode::Off => "OFF",
        }
    }
}

/// Settings applied by the handle factory to every connection it opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u64,

    /// Journal mode for file-backed databases; `None` keeps the engine default.
    pub journal_mode: Option<JournalMode>,

    /// Enforce foreign key constraints.
    pub foreign_keys: bool,

    /// Prefix for memdb store names.
    pub memory_store_prefix: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: None,
            foreign_keys: true,
            memory_store_prefix: DEFAULT_MEMORY_STORE_PREFIX.to_string(),
        }
    }
}

impl ManagerConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_journal_mode(mut self, mode: JournalMode) -> Self {
        self.journal_mode = Some(mode);
        self
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.busy_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "busy_timeout_ms must be greater than zero".to_string(),
            ));
        }
        // The engine takes the timeout as a C int of milliseconds.
        if self.busy_timeout_ms > i32::MAX as u64 {
            return Err(ConfigError::ValidationError(format!(
                "busy_timeout_ms must not exceed {}",
                i32::MAX
            )));
        }
        let prefix = self.memory_store_prefix.trim();
        if prefix.is_empty() {
            return Err(ConfigError::ValidationError(
                "memory_store_prefix must not be empty".to_string(),
            ));
        }
        // The prefix becomes part of a URI path segment.
        if prefix.contains(['/', '\\', '?', '#', '&']) {
            return Err(ConfigError::ValidationError(format!(
                "memory_store_prefix '{}' contains reserved characters",
                prefix
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = ManagerConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, ManagerConfig::default());
        assert_eq!(config.busy_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_yaml_overrides() {
        let yaml = r#"
busy_timeout_ms: 250
journal_mode: wal
foreign_keys: false
memory_store_prefix: tests
"#;
        let config = ManagerConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.busy_timeout_ms, 250);
        assert_eq!(config.journal_mode, Some(JournalMode::Wal));
        assert!(!config.foreign_keys);
        assert_eq!(config.memory_store_prefix, "tests");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let err = ManagerConfig::from_yaml_str("busy_timeout_ms: 0").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));

        let err = ManagerConfig::from_yaml_str("memory_store_prefix: 'a/b'").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));

        let err = ManagerConfig::from_yaml_str("journal_mode: sideways").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_busy_timeout_saturates() {
        let config = ManagerConfig::default().with_busy_timeout(Duration::MAX);
        assert_eq!(config.busy_timeout_ms, u64::MAX);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
        let config = ManagerConfig::default().with_busy_timeout(Duration::from_millis(1500));
        assert_eq!(config.busy_timeout(), Duration::from_millis(1500));
    }
}
