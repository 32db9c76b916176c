// crates/docstore-sqlite/src/config.rs
// ============================================================================
// Module: Document Store Configuration
// Description: Connection, pool, and maintenance settings for the store.
// Purpose: Deserialize and validate store settings before any file is opened.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! [`SqliteDocStoreConfig`] is deserializable from the `[store]` table of a
//! config file and constructible in code. Every field but `path` has a
//! default. [`SqliteDocStoreConfig::validate`] runs on open.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::error::DocStoreError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Default pool acquire timeout (ms).
const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 5_000;
/// Default number of pooled connections.
const DEFAULT_POOL_SIZE: usize = 4;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Upper bound for the pool size.
const MAX_POOL_SIZE: usize = 256;

// ============================================================================
// SECTION: Modes
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteJournalMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode.
    Delete,
}

impl SqliteJournalMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

// ============================================================================
// SECTION: Config
// ============================================================================

/// Configuration for the `SQLite` document store.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory or `:memory:`).
/// - `busy_timeout_ms` and `acquire_timeout_ms` are milliseconds, both non-zero.
/// - `pool_size` is between 1 and 256.
/// - `maintenance_interval_ms`, when set, is greater than zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqliteDocStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout passed to the engine, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteJournalMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// Maximum number of open connections.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Maximum wait for a pooled connection, in milliseconds.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// Run a round-trip query on idle connections before handing them out.
    #[serde(default = "default_validate_on_borrow")]
    pub validate_on_borrow: bool,
    /// Interval between background maintenance passes; `None` disables them.
    #[serde(default)]
    pub maintenance_interval_ms: Option<u64>,
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Returns the default connection pool size.
const fn default_pool_size() -> usize {
    DEFAULT_POOL_SIZE
}

/// Returns the default pool acquire timeout.
const fn default_acquire_timeout_ms() -> u64 {
    DEFAULT_ACQUIRE_TIMEOUT_MS
}

/// Returns the default borrow validation flag.
const fn default_validate_on_borrow() -> bool {
    true
}

impl SqliteDocStoreConfig {
    /// Creates a config with defaults for everything but the path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: default_busy_timeout_ms(),
            journal_mode: SqliteJournalMode::default(),
            sync_mode: SqliteSyncMode::default(),
            pool_size: default_pool_size(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            validate_on_borrow: default_validate_on_borrow(),
            maintenance_interval_ms: None,
        }
    }

    /// Returns the busy timeout as a duration.
    #[must_use]
    pub const fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Returns the acquire timeout as a duration.
    #[must_use]
    pub const fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Returns the maintenance interval, when enabled.
    #[must_use]
    pub fn maintenance_interval(&self) -> Option<Duration> {
        self.maintenance_interval_ms.map(Duration::from_millis)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DocStoreError::Invalid`] when a setting is out of range.
    pub fn validate(&self) -> Result<(), DocStoreError> {
        validate_store_path(&self.path)?;
        if self.pool_size == 0 || self.pool_size > MAX_POOL_SIZE {
            return Err(DocStoreError::Invalid(format!(
                "pool_size out of range: {} (expected 1..={MAX_POOL_SIZE})",
                self.pool_size
            )));
        }
        if self.busy_timeout_ms == 0 {
            return Err(DocStoreError::Invalid(
                "busy_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.acquire_timeout_ms == 0 {
            return Err(DocStoreError::Invalid(
                "acquire_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.maintenance_interval_ms == Some(0) {
            return Err(DocStoreError::Invalid(
                "maintenance_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), DocStoreError> {
    if path.as_os_str().is_empty() {
        return Err(DocStoreError::Invalid("store path must not be empty".to_string()));
    }
    let path_string = path.display().to_string();
    if path_string == ":memory:" || path_string.starts_with("file::memory:") {
        return Err(DocStoreError::Invalid(
            "in-memory databases cannot be shared across pooled connections".to_string(),
        ));
    }
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(DocStoreError::Invalid("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(DocStoreError::Invalid(
                "store path contains an overlong component".to_string(),
            ));
        }
    }
    if path.exists() && path.is_dir() {
        return Err(DocStoreError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]
mod tests {
    use super::SqliteDocStoreConfig;
    use super::SqliteJournalMode;

    #[test]
    fn defaults_apply_when_fields_are_missing() {
        let config: SqliteDocStoreConfig =
            serde_json::from_str(r#"{"path": "store.db"}"#).unwrap();
        assert_eq!(config, SqliteDocStoreConfig::new("store.db"));
        assert_eq!(config.journal_mode, SqliteJournalMode::Wal);
        assert_eq!(config.pool_size, 4);
        assert!(config.validate_on_borrow);
    }

    #[test]
    fn validation_rejects_memory_and_zero_limits() {
        assert!(SqliteDocStoreConfig::new(":memory:").validate().is_err());
        assert!(SqliteDocStoreConfig::new("").validate().is_err());
        let mut config = SqliteDocStoreConfig::new("store.db");
        config.pool_size = 0;
        assert!(config.validate().is_err());
        let mut config = SqliteDocStoreConfig::new("store.db");
        config.maintenance_interval_ms = Some(0);
        assert!(config.validate().is_err());
        let mut config = SqliteDocStoreConfig::new("store.db");
        config.busy_timeout_ms = 0;
        assert!(config.validate().is_err());
    }
}
