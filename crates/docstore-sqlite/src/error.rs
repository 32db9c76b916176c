// crates/docstore-sqlite/src/error.rs
// ============================================================================
// Module: Document Store Errors
// Description: Store-facing error taxonomy for the SQLite document store.
// Purpose: Classify compiler, engine, pool, and transaction failures.
// Dependencies: docstore-query, rusqlite, serde_json, thiserror
// ============================================================================

//! ## Overview
//! [`DocStoreError`] is the single error type returned by store operations.
//! Engine errors carrying `SQLite`'s constraint result code (unique indexes,
//! `NOT NULL`, and check triggers raised with `RAISE(ABORT, ..)`) become
//! [`DocStoreError::ConstraintViolation`] with the engine message verbatim;
//! every other engine error is [`DocStoreError::Db`].

use docstore_query::ApplyError;
use docstore_query::CompileError;
use rusqlite::ErrorCode;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors returned by the `SQLite` document store.
///
/// # Invariants
/// - `Compile` errors are raised before any statement reaches the engine.
/// - `ConstraintViolation` carries the engine message unmodified.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DocStoreError {
    /// Filter, update, or sort document failed to compile.
    #[error(transparent)]
    Compile(#[from] CompileError),
    /// Update could not be applied to a stored document.
    #[error("sqlite store update error: {0}")]
    Apply(#[from] ApplyError),
    /// `update_many` was called without a `$set` operator.
    #[error("sqlite store update error: update_many requires a $set operator")]
    MissingSetOperator,
    /// Unique promotion was requested for more than one path.
    #[error("sqlite store promotion error: unique constraints over compound keys are not supported ({paths})")]
    CompoundUniqueNotSupported {
        /// Requested paths, comma separated.
        paths: String,
    },
    /// A uniqueness or check constraint rejected a write.
    #[error("sqlite store constraint violation: {message}")]
    ConstraintViolation {
        /// Engine message, including the check expression for check triggers.
        message: String,
    },
    /// No pooled connection became available before the acquire timeout.
    #[error("sqlite store pool timeout: no connection available after {waited_ms} ms")]
    PoolTimeout {
        /// Time spent waiting in milliseconds.
        waited_ms: u64,
    },
    /// Commit or rollback issued with no open transaction.
    #[error("sqlite store transaction state error: {0}")]
    TransactionState(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// Invalid configuration or input.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
    /// Stored or supplied document could not be (de)serialized.
    #[error("sqlite store serialization error: {0}")]
    Serialization(String),
    /// The store has been closed.
    #[error("sqlite store closed")]
    Closed,
}

impl From<rusqlite::Error> for DocStoreError {
    fn from(error: rusqlite::Error) -> Self {
        if error.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) {
            let message = match &error {
                rusqlite::Error::SqliteFailure(_, Some(message)) => message.clone(),
                other => other.to_string(),
            };
            return Self::ConstraintViolation {
                message,
            };
        }
        Self::Db(error.to_string())
    }
}

impl From<serde_json::Error> for DocStoreError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}
