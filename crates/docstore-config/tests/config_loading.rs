// crates/docstore-config/tests/config_loading.rs
// ============================================================================
// Module: Config Loading Tests
// Description: File loading, defaults, validation, and sink construction.
// Purpose: Ensure docstore.toml is parsed strictly and opens a working store.
// ============================================================================

//! ## Overview
//! Parses inline TOML for validation rules and writes files to a temporary
//! directory for size, encoding, and end-to-end store checks.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::fs;

use docstore_config::ConfigError;
use docstore_config::DocStoreFileConfig;
use docstore_config::LoggingSink;
use docstore_sqlite::SqliteJournalMode;
use docstore_sqlite::SqliteSyncMode;
use serde_json::json;
use tempfile::TempDir;

type TestResult = Result<(), String>;

fn assert_invalid(result: Result<DocStoreFileConfig, ConfigError>, needle: &str) -> TestResult {
    match result {
        Err(ConfigError::Invalid(message)) if message.contains(needle) => Ok(()),
        Err(error) => Err(format!("error {error} did not contain {needle}")),
        Ok(_) => Err("expected invalid config".to_string()),
    }
}

#[test]
fn minimal_config_applies_defaults() -> TestResult {
    let config = DocStoreFileConfig::from_toml("[store]\npath = \"docs.db\"\n")
        .map_err(|err| err.to_string())?;
    assert_eq!(config.store.pool_size, 4);
    assert_eq!(config.store.journal_mode, SqliteJournalMode::Wal);
    assert_eq!(config.store.sync_mode, SqliteSyncMode::Full);
    assert_eq!(config.store.maintenance_interval_ms, None);
    assert_eq!(config.logging.sink, LoggingSink::Stderr);
    Ok(())
}

#[test]
fn missing_store_section_is_a_parse_error() {
    let err = DocStoreFileConfig::from_toml("[logging]\nsink = \"none\"\n").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)), "{err}");
}

#[test]
fn store_settings_are_validated() -> TestResult {
    assert_invalid(
        DocStoreFileConfig::from_toml("[store]\npath = \"docs.db\"\npool_size = 0\n"),
        "pool_size",
    )?;
    assert_invalid(DocStoreFileConfig::from_toml("[store]\npath = \":memory:\"\n"), "in-memory")?;
    assert_invalid(
        DocStoreFileConfig::from_toml(
            "[store]\npath = \"docs.db\"\nmaintenance_interval_ms = 0\n",
        ),
        "maintenance_interval_ms",
    )
}

#[test]
fn file_sink_requires_a_path() -> TestResult {
    assert_invalid(
        DocStoreFileConfig::from_toml("[store]\npath = \"docs.db\"\n[logging]\nsink = \"file\"\n"),
        "requires logging.path",
    )?;
    assert_invalid(
        DocStoreFileConfig::from_toml(
            "[store]\npath = \"docs.db\"\n[logging]\nsink = \"none\"\npath = \"e.jsonl\"\n",
        ),
        "only valid",
    )
}

#[test]
fn load_rejects_non_utf8_and_oversized_files() -> TestResult {
    let dir = TempDir::new().map_err(|err| err.to_string())?;
    let binary = dir.path().join("binary.toml");
    fs::write(&binary, [0xff, 0xfe, 0x00]).map_err(|err| err.to_string())?;
    assert_invalid(DocStoreFileConfig::load(Some(&binary)), "utf-8")?;

    let large = dir.path().join("large.toml");
    let padding = format!("[store]\npath = \"docs.db\"\n#{}\n", "x".repeat(1024 * 1024));
    fs::write(&large, padding).map_err(|err| err.to_string())?;
    assert_invalid(DocStoreFileConfig::load(Some(&large)), "size limit")
}

#[test]
fn load_reports_missing_files_as_io_errors() {
    let dir = TempDir::new().unwrap();
    let err = DocStoreFileConfig::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)), "{err}");
}

#[test]
fn loaded_config_opens_a_store_that_logs_to_file() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("docs.db");
    let log = dir.path().join("events.jsonl");
    let path = dir.path().join("docstore.toml");
    fs::write(
        &path,
        format!(
            "[store]\npath = {:?}\npool_size = 2\n\n[logging]\nsink = \"file\"\npath = {:?}\n",
            db.display().to_string(),
            log.display().to_string(),
        ),
    )
    .unwrap();

    let config = DocStoreFileConfig::load(Some(&path)).unwrap();
    assert_eq!(config.store.pool_size, 2);
    let store = config.open_store().unwrap();
    store
        .with_session(|session| {
            session.collection("notes")?.insert_one(&json!({"text": "hello"}))?;
            Ok(())
        })
        .unwrap();
    store.close();

    let written = fs::read_to_string(&log).unwrap();
    let last = written.lines().last().unwrap();
    let event: serde_json::Value = serde_json::from_str(last).unwrap();
    assert_eq!(event["event"], json!("store_closed"));
}
