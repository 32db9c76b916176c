// crates/docstore-sqlite/src/session.rs
// ============================================================================
// Module: Sessions and Transactions
// Description: One borrowed connection plus savepoint-nested transactions.
// Purpose: Scoped units of work with guaranteed rollback and release.
// Dependencies: docstore-query, rusqlite
// ============================================================================

//! ## Overview
//! A [`Session`] owns a pooled connection for its lifetime. Transactions nest
//! through a depth counter: the outermost [`Session::begin`] issues
//! `BEGIN IMMEDIATE`, inner ones issue `SAVEPOINT`. Commit and rollback act on
//! the innermost level only.
//!
//! [`Session::transaction`] is the scoped form: the closure's error is
//! returned unchanged after the level it opened has been rolled back. A
//! session dropped with an open transaction rolls back fully and logs.

use std::sync::Arc;

use docstore_query::CompiledStatement;
use docstore_query::TableName;
use docstore_query::statement::compile_create_table;
use rusqlite::Connection;
use rusqlite::params_from_iter;
use serde_json::Map;
use serde_json::Value;

use crate::collection::Collection;
use crate::collection::StoredDocument;
use crate::error::DocStoreError;
use crate::events::StoreEvent;
use crate::events::StoreEventKind;
use crate::events::StoreEventSink;
use crate::ids::IdGenerator;
use crate::pool::PooledConnection;
use crate::schema::bind_params;
use crate::schema::load_resolver;

// ============================================================================
// SECTION: Types
// ============================================================================

/// A unit of work bound to one pooled connection.
///
/// # Invariants
/// - `depth` equals the number of open transaction levels on the connection.
/// - Depth 1 is a real transaction; deeper levels are savepoints.
pub struct Session {
    /// Borrowed connection, returned to the pool on drop.
    connection: PooledConnection,
    /// Open transaction levels.
    depth: u32,
    /// Identifier source for inserted documents.
    ids: Arc<dyn IdGenerator>,
}

/// Returns the savepoint name guarding nesting level `level`.
fn savepoint_name(level: u32) -> String {
    format!("docstore_sp_{level}")
}

// ============================================================================
// SECTION: Transactions
// ============================================================================

impl Session {
    /// Wraps a borrowed connection.
    pub(crate) fn new(connection: PooledConnection, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            connection,
            depth: 0,
            ids,
        }
    }

    /// Returns the number of open transaction levels.
    #[must_use]
    pub const fn depth(&self) -> u32 {
        self.depth
    }

    /// Returns true when a transaction is open.
    #[must_use]
    pub const fn in_transaction(&self) -> bool {
        self.depth > 0
    }

    /// Opens a transaction level.
    ///
    /// # Errors
    ///
    /// Returns [`DocStoreError::Db`] when the engine rejects `BEGIN` or
    /// `SAVEPOINT` (including busy timeouts).
    pub fn begin(&mut self) -> Result<(), DocStoreError> {
        let connection = self.connection.get()?;
        if self.depth == 0 {
            connection.execute_batch("BEGIN IMMEDIATE")?;
            self.connection.pool().transaction_started();
        } else {
            connection.execute_batch(&format!("SAVEPOINT {}", savepoint_name(self.depth)))?;
        }
        self.depth += 1;
        Ok(())
    }

    /// Commits the innermost transaction level.
    ///
    /// # Errors
    ///
    /// Returns [`DocStoreError::TransactionState`] at depth zero, or a database
    /// error when the commit fails (the level stays open).
    pub fn commit(&mut self) -> Result<(), DocStoreError> {
        let connection = self.connection.get()?;
        match self.depth {
            0 => Err(DocStoreError::TransactionState(
                "commit called with no open transaction".to_string(),
            )),
            1 => {
                connection.execute_batch("COMMIT")?;
                self.depth = 0;
                self.connection.pool().transaction_finished();
                Ok(())
            }
            depth => {
                connection
                    .execute_batch(&format!("RELEASE SAVEPOINT {}", savepoint_name(depth - 1)))?;
                self.depth -= 1;
                Ok(())
            }
        }
    }

    /// Rolls back the innermost transaction level.
    ///
    /// The level is closed even when the engine reports an error; a failed
    /// savepoint rollback escalates to a full rollback.
    ///
    /// # Errors
    ///
    /// Returns [`DocStoreError::TransactionState`] at depth zero, or the engine
    /// error raised while rolling back.
    pub fn rollback(&mut self) -> Result<(), DocStoreError> {
        let connection = self.connection.get()?;
        match self.depth {
            0 => Err(DocStoreError::TransactionState(
                "rollback called with no open transaction".to_string(),
            )),
            _ if connection.is_autocommit() => {
                self.reset_depth();
                Ok(())
            }
            1 => {
                let result = connection.execute_batch("ROLLBACK");
                self.reset_depth();
                Ok(result?)
            }
            depth => {
                let name = savepoint_name(depth - 1);
                let result = connection
                    .execute_batch(&format!("ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name}"));
                if let Err(err) = result {
                    let _ = connection.execute_batch("ROLLBACK");
                    self.reset_depth();
                    return Err(err.into());
                }
                self.depth -= 1;
                Ok(())
            }
        }
    }

    /// Runs `f` inside a new transaction level.
    ///
    /// Commits when `f` succeeds; otherwise rolls back every level opened
    /// since entry and returns the original error.
    ///
    /// # Errors
    ///
    /// Returns the error from `f`, or the begin/commit error.
    pub fn transaction<T, F>(&mut self, f: F) -> Result<T, DocStoreError>
    where
        F: FnOnce(&mut Self) -> Result<T, DocStoreError>,
    {
        self.begin()?;
        let level = self.depth;
        let outcome = f(self).and_then(|value| self.commit_to(level).map(|()| value));
        if let Err(err) = &outcome {
            self.unwind_to(level, err);
        }
        outcome
    }

    /// Commits levels until `level` is closed.
    fn commit_to(&mut self, level: u32) -> Result<(), DocStoreError> {
        while self.depth >= level {
            self.commit()?;
        }
        Ok(())
    }

    /// Rolls back levels until `level` is closed, logging rollback failures.
    fn unwind_to(&mut self, level: u32, cause: &DocStoreError) {
        while self.depth >= level && self.depth > 0 {
            if let Err(err) = self.rollback() {
                self.events().record(
                    &StoreEvent::new(StoreEventKind::TransactionRollbackFailed)
                        .with_message(format!("{err} (while handling: {cause})")),
                );
            }
        }
    }

    /// Closes every level without issuing SQL.
    fn reset_depth(&mut self) {
        if self.depth > 0 {
            self.connection.pool().transaction_finished();
        }
        self.depth = 0;
    }
}

// ============================================================================
// SECTION: Collections and Statements
// ============================================================================

impl Session {
    /// Opens a collection, creating its table on first use.
    ///
    /// # Errors
    ///
    /// Returns [`DocStoreError::Compile`] for invalid collection names, or a
    /// database error when the table or registry cannot be read.
    pub fn collection(&mut self, name: &str) -> Result<Collection<'_>, DocStoreError> {
        let table = TableName::parse(name)?;
        let connection = self.connection.get()?;
        connection.execute_batch(&compile_create_table(&table))?;
        let resolver = load_resolver(connection, &table)?;
        Ok(Collection::new(self, table, resolver))
    }

    /// Returns the underlying connection for statements outside the document API.
    ///
    /// # Errors
    ///
    /// Returns [`DocStoreError::Closed`] if the connection was released.
    pub fn connection(&self) -> Result<&Connection, DocStoreError> {
        self.connection.get()
    }

    /// Returns the event sink.
    pub(crate) fn events(&self) -> &Arc<dyn StoreEventSink> {
        self.connection.pool().events()
    }

    /// Returns the identifier generator.
    pub(crate) fn ids(&self) -> &Arc<dyn IdGenerator> {
        &self.ids
    }

    /// Executes a compiled statement, returning the changed row count.
    pub(crate) fn execute(&self, statement: &CompiledStatement) -> Result<usize, DocStoreError> {
        let connection = self.connection.get()?;
        let mut prepared = connection.prepare_cached(&statement.sql)?;
        Ok(prepared.execute(params_from_iter(bind_params(&statement.params)))?)
    }

    /// Executes a compiled `SELECT` returning full documents.
    pub(crate) fn query_documents(
        &self,
        statement: &CompiledStatement,
    ) -> Result<Vec<StoredDocument>, DocStoreError> {
        let connection = self.connection.get()?;
        let mut prepared = connection.prepare_cached(&statement.sql)?;
        let rows = prepared.query_map(params_from_iter(bind_params(&statement.params)), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;
        let mut documents = Vec::new();
        for row in rows {
            let (id, raw, created_at, updated_at) = row?;
            documents.push(StoredDocument {
                id,
                body: decode_body(&raw)?,
                created_at,
                updated_at,
            });
        }
        Ok(documents)
    }

    /// Executes a compiled `SELECT id, data` for the rewrite path.
    pub(crate) fn query_bodies(
        &self,
        statement: &CompiledStatement,
    ) -> Result<Vec<(String, Map<String, Value>)>, DocStoreError> {
        let connection = self.connection.get()?;
        let mut prepared = connection.prepare_cached(&statement.sql)?;
        let rows = prepared.query_map(params_from_iter(bind_params(&statement.params)), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut bodies = Vec::new();
        for row in rows {
            let (id, raw) = row?;
            bodies.push((id, decode_body(&raw)?));
        }
        Ok(bodies)
    }

    /// Executes a compiled single-value `SELECT`.
    pub(crate) fn query_scalar(&self, statement: &CompiledStatement) -> Result<i64, DocStoreError> {
        let connection = self.connection.get()?;
        let mut prepared = connection.prepare_cached(&statement.sql)?;
        Ok(prepared.query_row(params_from_iter(bind_params(&statement.params)), |row| row.get(0))?)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.depth == 0 {
            return;
        }
        if let Ok(connection) = self.connection.get()
            && !connection.is_autocommit()
        {
            let _ = connection.execute_batch("ROLLBACK");
        }
        self.events().record(
            &StoreEvent::new(StoreEventKind::SessionDroppedInTransaction)
                .with_message(format!("rolled back {} open transaction level(s)", self.depth)),
        );
        self.reset_depth();
    }
}

/// Decodes a stored body, which must be a JSON object.
pub(crate) fn decode_body(raw: &str) -> Result<Map<String, Value>, DocStoreError> {
    match serde_json::from_str(raw)? {
        Value::Object(body) => Ok(body),
        _ => Err(DocStoreError::Serialization("stored document is not a JSON object".to_string())),
    }
}
