// crates/docstore-sqlite/src/pool.rs
// ============================================================================
// Module: Connection Pool
// Description: r2d2 pool of SQLite connections with timed acquisition.
// Purpose: Hand out validated connections and guarantee their return.
// Dependencies: r2d2, rusqlite
// ============================================================================

//! ## Overview
//! [`SqliteConnectionManager`] teaches `r2d2` how to open a connection with
//! the configured pragmas and busy timeout, how to validate one before it is
//! handed out, and when a returned connection is unusable. Connections open
//! lazily up to `pool_size`; an acquisition that waits past the acquire
//! timeout fails with [`DocStoreError::PoolTimeout`].
//!
//! [`ConnectionPool`] wraps the `r2d2` pool with the close flag and the
//! count of sessions holding an open transaction, which gates maintenance.
//! [`PooledConnection`] rolls back any transaction left open before the
//! connection goes back, so every exit path releases the slot clean.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use r2d2::HandleError;
use r2d2::ManageConnection;
use r2d2::Pool;
use rusqlite::Connection;
use serde::Serialize;

use crate::config::SqliteDocStoreConfig;
use crate::error::DocStoreError;
use crate::events::StoreEvent;
use crate::events::StoreEventKind;
use crate::events::StoreEventSink;
use crate::schema::connection_is_alive;
use crate::schema::open_connection;

// ============================================================================
// SECTION: Connection Manager
// ============================================================================

/// Opens and validates store connections for `r2d2`.
#[derive(Debug, Clone)]
pub struct SqliteConnectionManager {
    /// Store configuration used to open connections.
    config: SqliteDocStoreConfig,
}

impl SqliteConnectionManager {
    /// Creates a manager for the configured store file.
    #[must_use]
    pub const fn new(config: SqliteDocStoreConfig) -> Self {
        Self {
            config,
        }
    }
}

impl ManageConnection for SqliteConnectionManager {
    type Connection = Connection;
    type Error = DocStoreError;

    fn connect(&self) -> Result<Connection, DocStoreError> {
        open_connection(&self.config)
    }

    fn is_valid(&self, connection: &mut Connection) -> Result<(), DocStoreError> {
        if connection_is_alive(connection) {
            Ok(())
        } else {
            Err(DocStoreError::Db("idle connection failed validation".to_string()))
        }
    }

    fn has_broken(&self, connection: &mut Connection) -> bool {
        !connection.is_autocommit()
    }
}

/// Routes connection failures reported by `r2d2` to the store event sink.
struct EventErrorHandler {
    /// Destination for discard events.
    events: Arc<dyn StoreEventSink>,
}

impl fmt::Debug for EventErrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventErrorHandler").finish_non_exhaustive()
    }
}

impl HandleError<DocStoreError> for EventErrorHandler {
    fn handle_error(&self, error: DocStoreError) {
        self.events.record(
            &StoreEvent::new(StoreEventKind::PoolConnectionDiscarded)
                .with_message(error.to_string()),
        );
    }
}

// ============================================================================
// SECTION: Types
// ============================================================================

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Idle connections.
    pub idle: usize,
    /// Open connections (idle plus borrowed).
    pub open: usize,
    /// Configured maximum.
    pub max: usize,
    /// Sessions with an open transaction.
    pub active_transactions: usize,
    /// Whether the pool has been closed.
    pub closed: bool,
}

/// Bounded `SQLite` connection pool.
///
/// # Invariants
/// - `open <= config.pool_size` at all times.
/// - After [`ConnectionPool::close`] no connection is handed out; borrowed
///   connections close when released.
pub struct ConnectionPool {
    /// Store configuration.
    config: SqliteDocStoreConfig,
    /// Underlying pool; `None` once closed.
    pool: Mutex<Option<Pool<SqliteConnectionManager>>>,
    /// Sessions with an open transaction.
    active_transactions: AtomicUsize,
    /// Event sink for discarded connections and timeouts.
    events: Arc<dyn StoreEventSink>,
}

/// A borrowed connection that returns to the pool on drop.
pub struct PooledConnection {
    /// Owning pool.
    pool: Arc<ConnectionPool>,
    /// Borrowed `r2d2` connection.
    connection: r2d2::PooledConnection<SqliteConnectionManager>,
}

// ============================================================================
// SECTION: Pool
// ============================================================================

impl ConnectionPool {
    /// Creates a pool; connections open on first demand.
    ///
    /// # Errors
    ///
    /// Returns [`DocStoreError::Invalid`] when the pool size does not fit
    /// `r2d2` limits, or [`DocStoreError::Db`] when the pool cannot be built.
    pub(crate) fn new(
        config: SqliteDocStoreConfig,
        events: Arc<dyn StoreEventSink>,
    ) -> Result<Arc<Self>, DocStoreError> {
        let max_size = u32::try_from(config.pool_size)
            .map_err(|_| DocStoreError::Invalid("pool_size exceeds u32".to_string()))?;
        let pool = Pool::builder()
            .max_size(max_size)
            .min_idle(Some(0))
            .connection_timeout(config.acquire_timeout())
            .test_on_check_out(config.validate_on_borrow)
            .error_handler(Box::new(EventErrorHandler {
                events: Arc::clone(&events),
            }))
            .build(SqliteConnectionManager::new(config.clone()))
            .map_err(|err| DocStoreError::Db(err.to_string()))?;
        Ok(Arc::new(Self {
            config,
            pool: Mutex::new(Some(pool)),
            active_transactions: AtomicUsize::new(0),
            events,
        }))
    }

    /// Borrows a connection, waiting up to the configured acquire timeout.
    ///
    /// # Errors
    ///
    /// Returns [`DocStoreError::PoolTimeout`] when no connection frees up in
    /// time, or [`DocStoreError::Closed`] after close.
    pub fn acquire(self: &Arc<Self>) -> Result<PooledConnection, DocStoreError> {
        let pool = self.handle()?;
        match pool.get_timeout(self.config.acquire_timeout()) {
            Ok(connection) => Ok(self.wrap(connection)),
            Err(err) => {
                let waited_ms = self.config.acquire_timeout_ms;
                self.events.record(
                    &StoreEvent::new(StoreEventKind::PoolTimeout)
                        .with_message(format!("pool of {} exhausted: {err}", self.config.pool_size))
                        .with_duration_ms(waited_ms),
                );
                Err(DocStoreError::PoolTimeout {
                    waited_ms,
                })
            }
        }
    }

    /// Borrows a connection if one frees up within `wait`; `Ok(None)` otherwise.
    pub(crate) fn try_acquire(
        self: &Arc<Self>,
        wait: Duration,
    ) -> Result<Option<PooledConnection>, DocStoreError> {
        let pool = self.handle()?;
        Ok(pool.get_timeout(wait).ok().map(|connection| self.wrap(connection)))
    }

    /// Returns current pool counters.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        let (idle, open) = pool.as_ref().map_or((0, 0), |pool| {
            let state = pool.state();
            (
                usize::try_from(state.idle_connections).unwrap_or(usize::MAX),
                usize::try_from(state.connections).unwrap_or(usize::MAX),
            )
        });
        PoolStatus {
            idle,
            open,
            max: self.config.pool_size,
            active_transactions: self.active_transactions(),
            closed: pool.is_none(),
        }
    }

    /// Returns the number of sessions with an open transaction.
    #[must_use]
    pub fn active_transactions(&self) -> usize {
        self.active_transactions.load(Ordering::Acquire)
    }

    /// Closes the pool: later acquisitions fail and idle connections close
    /// once the last borrowed connection is released.
    pub(crate) fn close(&self) {
        let pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner).take();
        drop(pool);
    }

    /// Marks a session transaction as open.
    pub(crate) fn transaction_started(&self) {
        self.active_transactions.fetch_add(1, Ordering::AcqRel);
    }

    /// Marks a session transaction as finished.
    pub(crate) fn transaction_finished(&self) {
        let _ = self.active_transactions.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
            n.checked_sub(1)
        });
    }

    /// Returns the event sink.
    pub(crate) fn events(&self) -> &Arc<dyn StoreEventSink> {
        &self.events
    }

    /// Clones the pool handle so waiting happens without holding the lock.
    fn handle(&self) -> Result<Pool<SqliteConnectionManager>, DocStoreError> {
        self.pool
            .lock()
            .map_err(|_| DocStoreError::Io("sqlite pool mutex poisoned".to_string()))?
            .clone()
            .ok_or(DocStoreError::Closed)
    }

    /// Wraps a connection in a returning guard.
    fn wrap(
        self: &Arc<Self>,
        connection: r2d2::PooledConnection<SqliteConnectionManager>,
    ) -> PooledConnection {
        PooledConnection {
            pool: Arc::clone(self),
            connection,
        }
    }
}

// ============================================================================
// SECTION: Pooled Connection
// ============================================================================

impl PooledConnection {
    /// Returns the borrowed connection.
    ///
    /// # Errors
    ///
    /// Does not fail while the guard is alive; the signature matches the
    /// session accessors that propagate [`DocStoreError::Closed`].
    pub fn get(&self) -> Result<&Connection, DocStoreError> {
        Ok(&*self.connection)
    }

    /// Returns the owning pool.
    #[must_use]
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if !self.connection.is_autocommit() && self.connection.execute_batch("ROLLBACK").is_err() {
            self.pool.events.record(
                &StoreEvent::new(StoreEventKind::PoolConnectionDiscarded)
                    .with_message("connection returned with an unrecoverable transaction"),
            );
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
