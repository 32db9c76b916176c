// crates/docstore-sqlite/src/store.rs
// ============================================================================
// Module: Document Store
// Description: Store handle owning the pool and maintenance thread.
// Purpose: Explicit open/close lifecycle with scoped sessions.
// Dependencies: rusqlite
// ============================================================================

//! ## Overview
//! [`DocStore::open`] validates the configuration, initializes the metadata
//! schema on a direct connection so open failures surface immediately, builds
//! the pool, and starts maintenance when an interval is configured. Every
//! store is an independent instance; nothing is process-global.
//!
//! Sessions borrow a pooled connection for their lifetime.
//! [`DocStore::with_session`] and [`DocStore::transaction`] scope the borrow
//! to a closure so the connection is released on every exit path.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use crate::config::SqliteDocStoreConfig;
use crate::error::DocStoreError;
use crate::events::StderrEventSink;
use crate::events::StoreEvent;
use crate::events::StoreEventKind;
use crate::events::StoreEventSink;
use crate::ids::IdGenerator;
use crate::ids::TimeOrderedIdGenerator;
use crate::maintenance::MaintenanceOutcome;
use crate::maintenance::MaintenanceWorker;
use crate::maintenance::run_maintenance_pass;
use crate::pool::ConnectionPool;
use crate::pool::PoolStatus;
use crate::schema::ensure_parent_dir;
use crate::schema::initialize_schema;
use crate::schema::open_connection;
use crate::session::Session;

// ============================================================================
// SECTION: Options
// ============================================================================

/// Collaborators injected at open time.
pub struct StoreOptions {
    /// Event sink for logged conditions.
    events: Arc<dyn StoreEventSink>,
    /// Identifier source for inserted documents.
    id_generator: Arc<dyn IdGenerator>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            events: Arc::new(StderrEventSink),
            id_generator: Arc::new(TimeOrderedIdGenerator::new()),
        }
    }
}

impl StoreOptions {
    /// Replaces the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn StoreEventSink>) -> Self {
        self.events = events;
        self
    }

    /// Replaces the identifier generator.
    #[must_use]
    pub fn with_id_generator(mut self, id_generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = id_generator;
        self
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed document store.
pub struct DocStore {
    /// Validated configuration.
    config: SqliteDocStoreConfig,
    /// Connection pool.
    pool: Arc<ConnectionPool>,
    /// Identifier source handed to sessions.
    ids: Arc<dyn IdGenerator>,
    /// Maintenance thread, when configured and not yet stopped.
    maintenance: Mutex<Option<MaintenanceWorker>>,
}

impl DocStore {
    /// Opens a store.
    ///
    /// # Errors
    ///
    /// Returns [`DocStoreError::Invalid`] for invalid configuration or an
    /// unsupported metadata version, [`DocStoreError::Io`] when the parent
    /// directory cannot be created, or a database error when the file cannot
    /// be opened.
    pub fn open(
        config: SqliteDocStoreConfig,
        options: StoreOptions,
    ) -> Result<Self, DocStoreError> {
        config.validate()?;
        ensure_parent_dir(&config.path)?;
        initialize_schema(&open_connection(&config)?)?;
        let pool = ConnectionPool::new(config.clone(), options.events)?;
        let maintenance = match config.maintenance_interval() {
            Some(interval) => Some(MaintenanceWorker::spawn(Arc::clone(&pool), interval)?),
            None => None,
        };
        Ok(Self {
            config,
            pool,
            ids: options.id_generator,
            maintenance: Mutex::new(maintenance),
        })
    }

    /// Borrows a connection as a new session.
    ///
    /// # Errors
    ///
    /// Returns [`DocStoreError::PoolTimeout`] when the pool stays exhausted
    /// past the acquire timeout, or [`DocStoreError::Closed`] after close.
    pub fn session(&self) -> Result<Session, DocStoreError> {
        Ok(Session::new(self.pool.acquire()?, Arc::clone(&self.ids)))
    }

    /// Runs `f` with a session released when it returns.
    ///
    /// # Errors
    ///
    /// Returns acquisition errors or the error from `f`.
    pub fn with_session<T, F>(&self, f: F) -> Result<T, DocStoreError>
    where
        F: FnOnce(&mut Session) -> Result<T, DocStoreError>,
    {
        let mut session = self.session()?;
        f(&mut session)
    }

    /// Runs `f` inside a transaction on a fresh session.
    ///
    /// # Errors
    ///
    /// Returns acquisition errors, or the error from `f` after rollback.
    pub fn transaction<T, F>(&self, f: F) -> Result<T, DocStoreError>
    where
        F: FnOnce(&mut Session) -> Result<T, DocStoreError>,
    {
        self.session()?.transaction(f)
    }

    /// Runs one maintenance pass on the calling thread.
    pub fn run_maintenance(&self) -> MaintenanceOutcome {
        run_maintenance_pass(&self.pool)
    }

    /// Returns current pool counters.
    #[must_use]
    pub fn pool_status(&self) -> PoolStatus {
        self.pool.status()
    }

    /// Returns the store configuration.
    #[must_use]
    pub const fn config(&self) -> &SqliteDocStoreConfig {
        &self.config
    }

    /// Stops maintenance and closes the pool. Later acquisitions fail with
    /// [`DocStoreError::Closed`]; borrowed connections close on release.
    pub fn close(&self) {
        let worker = self.maintenance.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(worker) = worker {
            worker.stop();
        }
        if self.pool.status().closed {
            return;
        }
        self.pool.close();
        self.pool.events().record(
            &StoreEvent::new(StoreEventKind::StoreClosed)
                .with_message(self.config.path.display().to_string()),
        );
    }
}

impl Drop for DocStore {
    fn drop(&mut self) {
        self.close();
    }
}
