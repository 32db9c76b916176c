// crates/docstore-sqlite/src/maintenance.rs
// ============================================================================
// Module: Background Maintenance
// Description: Periodic WAL checkpoint and query-planner optimization.
// Purpose: Keep the database tidy without touching request handling.
// Dependencies: rusqlite
// ============================================================================

//! ## Overview
//! A dedicated thread wakes every `maintenance_interval_ms` and runs one
//! maintenance pass. A pass is skipped while any session holds an open
//! transaction or when no connection is free without waiting. Outcomes are
//! reported as store events; errors never leave the maintenance thread.

use std::sync::Arc;
use std::sync::mpsc;
use std::sync::mpsc::RecvTimeoutError;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

use serde::Serialize;

use crate::error::DocStoreError;
use crate::events::StoreEvent;
use crate::events::StoreEventKind;
use crate::pool::ConnectionPool;

/// Statements run by one maintenance pass.
const MAINTENANCE_SQL: &str = "PRAGMA wal_checkpoint(PASSIVE); PRAGMA optimize;";
/// How long a pass waits for a connection before it is skipped.
const MAINTENANCE_ACQUIRE_WAIT: Duration = Duration::from_millis(250);

/// Result of one maintenance pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceOutcome {
    /// Checkpoint and optimize ran.
    Completed,
    /// The pass was skipped (open transaction, busy pool, or closed store).
    Skipped,
    /// The pass ran and failed; the failure was logged.
    Failed,
}

/// Handle to the maintenance thread; stops and joins it on drop.
pub(crate) struct MaintenanceWorker {
    /// Dropping the sender wakes and stops the thread.
    stop: Option<mpsc::Sender<()>>,
    /// Thread handle.
    handle: Option<JoinHandle<()>>,
}

impl MaintenanceWorker {
    /// Spawns the maintenance thread.
    pub(crate) fn spawn(
        pool: Arc<ConnectionPool>,
        interval: Duration,
    ) -> Result<Self, DocStoreError> {
        let (stop, receiver) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("docstore-maintenance".to_string())
            .spawn(move || maintenance_loop(&pool, interval, &receiver))
            .map_err(|err| {
                DocStoreError::Io(format!("failed to spawn maintenance thread: {err}"))
            })?;
        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    /// Stops the thread and waits for an in-progress pass to finish.
    pub(crate) fn stop(mut self) {
        self.shutdown();
    }

    /// Shared stop path for [`MaintenanceWorker::stop`] and drop.
    fn shutdown(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MaintenanceWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Runs passes on the interval until the stop channel closes.
fn maintenance_loop(pool: &Arc<ConnectionPool>, interval: Duration, receiver: &mpsc::Receiver<()>) {
    loop {
        match receiver.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {
                run_maintenance_pass(pool);
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Runs one maintenance pass and logs its outcome.
pub(crate) fn run_maintenance_pass(pool: &Arc<ConnectionPool>) -> MaintenanceOutcome {
    let events = pool.events();
    let skipped = |reason: &str| {
        events.record(&StoreEvent::new(StoreEventKind::MaintenanceSkipped).with_message(reason));
        MaintenanceOutcome::Skipped
    };
    if pool.active_transactions() > 0 {
        return skipped("transaction open");
    }
    let borrowed = match pool.try_acquire(MAINTENANCE_ACQUIRE_WAIT) {
        Ok(Some(borrowed)) => borrowed,
        Ok(None) => return skipped("no connection available"),
        Err(DocStoreError::Closed) => return skipped("store closed"),
        Err(err) => {
            events.record(
                &StoreEvent::new(StoreEventKind::MaintenanceFailed).with_message(err.to_string()),
            );
            return MaintenanceOutcome::Failed;
        }
    };
    let started = Instant::now();
    let result = borrowed
        .get()
        .and_then(|connection| connection.execute_batch(MAINTENANCE_SQL).map_err(DocStoreError::from));
    drop(borrowed);
    let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    match result {
        Ok(()) => {
            events.record(
                &StoreEvent::new(StoreEventKind::MaintenanceCompleted).with_duration_ms(elapsed),
            );
            MaintenanceOutcome::Completed
        }
        Err(err) => {
            events.record(
                &StoreEvent::new(StoreEventKind::MaintenanceFailed)
                    .with_message(err.to_string())
                    .with_duration_ms(elapsed),
            );
            MaintenanceOutcome::Failed
        }
    }
}
