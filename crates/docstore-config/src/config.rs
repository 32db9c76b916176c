// crates/docstore-config/src/config.rs
// ============================================================================
// Module: Docstore Configuration
// Description: Configuration loading and validation for the document store.
// Purpose: Strict config parsing with size and path limits.
// Dependencies: docstore-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is read from a TOML file with two sections:
//!
//! ```toml
//! [store]
//! path = "data/docs.db"
//! pool_size = 4
//!
//! [logging]
//! sink = "file"
//! path = "data/events.jsonl"
//! ```
//!
//! The file path comes from the caller, then `DOCSTORE_CONFIG`, then
//! `docstore.toml` in the working directory.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use docstore_sqlite::DocStore;
use docstore_sqlite::FileEventSink;
use docstore_sqlite::NoopEventSink;
use docstore_sqlite::SqliteDocStoreConfig;
use docstore_sqlite::StderrEventSink;
use docstore_sqlite::StoreEventSink;
use docstore_sqlite::StoreOptions;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "docstore.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "DOCSTORE_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;

// ============================================================================
// SECTION: Logging
// ============================================================================

/// Destination for store events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoggingSink {
    /// JSON lines on stderr.
    #[default]
    Stderr,
    /// JSON lines appended to `logging.path`.
    File,
    /// Events are discarded.
    None,
}

/// `[logging]` section.
///
/// # Invariants
/// - `path` is set exactly when `sink` is [`LoggingSink::File`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// Event destination.
    #[serde(default)]
    pub sink: LoggingSink,
    /// Event log file for the file sink.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl LoggingConfig {
    /// Validates sink and path consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the file sink has no path or a
    /// path is given for another sink.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match (self.sink, &self.path) {
            (LoggingSink::File, None) => {
                Err(ConfigError::Invalid("logging.sink=file requires logging.path".to_string()))
            }
            (LoggingSink::File, Some(path)) => validate_path("logging.path", path),
            (_, Some(_)) => Err(ConfigError::Invalid(
                "logging.path is only valid with logging.sink=file".to_string(),
            )),
            (_, None) => Ok(()),
        }
    }
}

// ============================================================================
// SECTION: File Config
// ============================================================================

/// Parsed `docstore.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocStoreFileConfig {
    /// Store settings.
    pub store: SqliteDocStoreConfig,
    /// Event sink settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl DocStoreFileConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path, env::var(CONFIG_ENV_VAR).ok())?;
        validate_path("config path", &resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml(content)
    }

    /// Parses and validates configuration text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or
    /// [`ConfigError::Invalid`] when validation fails.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a section is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.store.validate().map_err(|err| ConfigError::Invalid(err.to_string()))?;
        self.logging.validate()
    }

    /// Builds the configured event sink.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the event log cannot be opened.
    pub fn event_sink(&self) -> Result<Arc<dyn StoreEventSink>, ConfigError> {
        match (self.logging.sink, &self.logging.path) {
            (LoggingSink::Stderr, _) => Ok(Arc::new(StderrEventSink)),
            (LoggingSink::None, _) => Ok(Arc::new(NoopEventSink)),
            (LoggingSink::File, Some(path)) => FileEventSink::new(path)
                .map(|sink| Arc::new(sink) as Arc<dyn StoreEventSink>)
                .map_err(|err| ConfigError::Io(err.to_string())),
            (LoggingSink::File, None) => {
                Err(ConfigError::Invalid("logging.sink=file requires logging.path".to_string()))
            }
        }
    }

    /// Opens the configured store with the configured event sink.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the sink or store cannot be opened.
    pub fn open_store(&self) -> Result<DocStore, ConfigError> {
        let options = StoreOptions::default().with_events(self.event_sink()?);
        DocStore::open(self.store.clone(), options).map_err(|err| ConfigError::Io(err.to_string()))
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from the argument or environment defaults.
fn resolve_path(path: Option<&Path>, env_path: Option<String>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Some(env_path) = env_path {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates a path against length limits.
fn validate_path(field: &str, path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if path.to_string_lossy().len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    for component in path.components() {
        if component.as_os_str().to_string_lossy().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
