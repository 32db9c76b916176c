// crates/docstore-sqlite/src/schema.rs
// ============================================================================
// Module: Store Schema
// Description: Connection setup, metadata schema, and registry access.
// Purpose: Own every statement that touches store metadata tables.
// Dependencies: docstore-query, rusqlite, serde
// ============================================================================

//! ## Overview
//! Each connection is opened with the configured pragmas and busy timeout.
//! The metadata schema is versioned through `docstore_meta` and records the
//! promoted columns and check constraints of every collection, so a fresh
//! session can rebuild its field resolver without inspecting triggers.

use std::path::Path;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use docstore_query::FieldPath;
use docstore_query::FieldResolver;
use docstore_query::SqlParam;
use docstore_query::TableName;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::params;
use rusqlite::types::Value as SqlValue;
use serde::Serialize;

use crate::config::SqliteDocStoreConfig;
use crate::error::DocStoreError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Metadata schema version.
const SCHEMA_VERSION: i64 = 1;

// ============================================================================
// SECTION: Registry Types
// ============================================================================

/// A promoted column recorded for a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromotedColumn {
    /// Dotted body path.
    pub path: String,
    /// Column mirroring the path.
    pub column: String,
    /// Whether a unique index backs the column.
    pub unique: bool,
    /// Registration time (unix milliseconds).
    pub created_at: i64,
}

/// A check constraint recorded for a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckConstraint {
    /// Derived trigger base name.
    pub name: String,
    /// Path the constraint was registered under.
    pub path: String,
    /// Constraint expression as supplied.
    pub expression: String,
    /// Registration time (unix milliseconds).
    pub created_at: i64,
}

// ============================================================================
// SECTION: Connections
// ============================================================================

/// Ensures the parent directory for the store exists.
pub(crate) fn ensure_parent_dir(path: &Path) -> Result<(), DocStoreError> {
    let Some(parent) = path.parent() else {
        return Err(DocStoreError::Io("store path missing parent directory".to_string()));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| DocStoreError::Io(err.to_string()))
}

/// Opens an `SQLite` connection with the configured pragmas.
pub(crate) fn open_connection(config: &SqliteDocStoreConfig) -> Result<Connection, DocStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags)
        .map_err(|err| DocStoreError::Db(err.to_string()))?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Applies `SQLite` pragmas and the busy timeout.
fn apply_pragmas(
    connection: &Connection,
    config: &SqliteDocStoreConfig,
) -> Result<(), DocStoreError> {
    connection
        .execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(|err| DocStoreError::Db(err.to_string()))?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(|err| DocStoreError::Db(err.to_string()))?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(|err| DocStoreError::Db(err.to_string()))?;
    connection
        .busy_timeout(config.busy_timeout())
        .map_err(|err| DocStoreError::Db(err.to_string()))?;
    Ok(())
}

/// Runs a trivial round trip to check a connection is usable.
pub(crate) fn connection_is_alive(connection: &Connection) -> bool {
    connection.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).is_ok()
}

// ============================================================================
// SECTION: Metadata Schema
// ============================================================================

/// Initializes the metadata schema or validates the existing version.
pub(crate) fn initialize_schema(connection: &Connection) -> Result<(), DocStoreError> {
    let tx = connection.unchecked_transaction()?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS docstore_meta (version INTEGER NOT NULL);")?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM docstore_meta LIMIT 1", params![], |row| row.get(0))
        .optional()?;
    match version {
        None => {
            tx.execute("INSERT INTO docstore_meta (version) VALUES (?1)", params![SCHEMA_VERSION])?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS docstore_promoted_columns (
                    table_name TEXT NOT NULL,
                    path TEXT NOT NULL,
                    column_name TEXT NOT NULL,
                    is_unique INTEGER NOT NULL,
                    created_at INTEGER NOT NULL,
                    PRIMARY KEY (table_name, path)
                );
                CREATE TABLE IF NOT EXISTS docstore_check_constraints (
                    table_name TEXT NOT NULL,
                    name TEXT NOT NULL,
                    path TEXT NOT NULL,
                    expression TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    PRIMARY KEY (table_name, name)
                );",
            )?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(DocStoreError::Invalid(format!(
                "unsupported metadata schema version: {value}"
            )));
        }
    }
    tx.commit()?;
    Ok(())
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Returns the promoted columns recorded for `table`, oldest first.
pub(crate) fn list_promoted(
    connection: &Connection,
    table: &TableName,
) -> Result<Vec<PromotedColumn>, DocStoreError> {
    let mut statement = connection.prepare_cached(
        "SELECT path, column_name, is_unique, created_at FROM docstore_promoted_columns WHERE \
         table_name = ?1 ORDER BY created_at, path",
    )?;
    let rows = statement.query_map(params![table.as_str()], |row| {
        Ok(PromotedColumn {
            path: row.get(0)?,
            column: row.get(1)?,
            unique: row.get::<_, i64>(2)? != 0,
            created_at: row.get(3)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Builds a field resolver from the registry.
pub(crate) fn load_resolver(
    connection: &Connection,
    table: &TableName,
) -> Result<FieldResolver, DocStoreError> {
    let paths = list_promoted(connection, table)?
        .into_iter()
        .map(|column| FieldPath::parse(&column.path))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(FieldResolver::with_promoted(paths))
}

/// Returns the path registered for `column`, if any.
///
/// Column names match case-insensitively, as the engine resolves them.
pub(crate) fn promoted_path_for_column(
    connection: &Connection,
    table: &TableName,
    column: &str,
) -> Result<Option<String>, DocStoreError> {
    Ok(connection
        .query_row(
            "SELECT path FROM docstore_promoted_columns WHERE table_name = ?1 AND column_name = ?2 \
             COLLATE NOCASE",
            params![table.as_str(), column],
            |row| row.get(0),
        )
        .optional()?)
}

/// Records a promotion; uniqueness is sticky once granted.
pub(crate) fn record_promotion(
    connection: &Connection,
    table: &TableName,
    path: &FieldPath,
    unique: bool,
) -> Result<PromotedColumn, DocStoreError> {
    connection.execute(
        "INSERT INTO docstore_promoted_columns (table_name, path, column_name, is_unique, \
         created_at) VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (table_name, path) DO UPDATE SET is_unique = MAX(is_unique, \
         excluded.is_unique)",
        params![table.as_str(), path.as_str(), path.column_name(), i64::from(unique), unix_millis()],
    )?;
    Ok(connection.query_row(
        "SELECT path, column_name, is_unique, created_at FROM docstore_promoted_columns WHERE \
         table_name = ?1 AND path = ?2",
        params![table.as_str(), path.as_str()],
        |row| {
            Ok(PromotedColumn {
                path: row.get(0)?,
                column: row.get(1)?,
                unique: row.get::<_, i64>(2)? != 0,
                created_at: row.get(3)?,
            })
        },
    )?)
}

/// Returns the check constraints recorded for `table`, oldest first.
pub(crate) fn list_checks(
    connection: &Connection,
    table: &TableName,
) -> Result<Vec<CheckConstraint>, DocStoreError> {
    let mut statement = connection.prepare_cached(
        "SELECT name, path, expression, created_at FROM docstore_check_constraints WHERE \
         table_name = ?1 ORDER BY created_at, name",
    )?;
    let rows = statement.query_map(params![table.as_str()], |row| {
        Ok(CheckConstraint {
            name: row.get(0)?,
            path: row.get(1)?,
            expression: row.get(2)?,
            created_at: row.get(3)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Records a check constraint; re-registration keeps the original entry.
pub(crate) fn record_check(
    connection: &Connection,
    table: &TableName,
    name: &str,
    path: &FieldPath,
    expression: &str,
) -> Result<(), DocStoreError> {
    connection.execute(
        "INSERT INTO docstore_check_constraints (table_name, name, path, expression, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5) ON CONFLICT (table_name, name) DO NOTHING",
        params![table.as_str(), name, path.as_str(), expression, unix_millis()],
    )?;
    Ok(())
}

/// Returns true when `table` has a column named `column`.
pub(crate) fn column_exists(
    connection: &Connection,
    table: &TableName,
    column: &str,
) -> Result<bool, DocStoreError> {
    let mut statement = connection.prepare(&format!("PRAGMA table_info({})", table.quoted()))?;
    let names = statement.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name?.eq_ignore_ascii_case(column) {
            return Ok(true);
        }
    }
    Ok(false)
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Converts compiled parameters into bindable engine values.
pub(crate) fn bind_params(params: &[SqlParam]) -> Vec<SqlValue> {
    params
        .iter()
        .map(|param| match param {
            SqlParam::Null => SqlValue::Null,
            SqlParam::Integer(value) => SqlValue::Integer(*value),
            SqlParam::Real(value) => SqlValue::Real(*value),
            SqlParam::Text(value) => SqlValue::Text(value.clone()),
        })
        .collect()
}

/// Returns the current unix epoch in milliseconds.
pub(crate) fn unix_millis() -> i64 {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    i64::try_from(now.as_millis()).unwrap_or(i64::MAX)
}
