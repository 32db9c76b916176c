// crates/docstore-sqlite/src/events.rs
// ============================================================================
// Module: Store Event Logging
// Description: Structured store events and pluggable JSON-line sinks.
// Purpose: Report non-fatal conditions without a hard logging dependency.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! The store reports conditions it handles internally (back-fill failures,
//! discarded connections, maintenance outcomes) as [`StoreEvent`] values.
//! Sinks serialize them as JSON lines; recording never fails the operation
//! that produced the event.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Serialize;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Store event identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreEventKind {
    /// A path was promoted to a column.
    PromotionCompleted,
    /// Promotion back-fill failed and was skipped.
    BackfillFailed,
    /// A check constraint trigger pair was installed.
    CheckConstraintInstalled,
    /// A pooled connection failed validation and was dropped.
    PoolConnectionDiscarded,
    /// An acquire timed out.
    PoolTimeout,
    /// Rolling back a failed transaction also failed.
    TransactionRollbackFailed,
    /// A session was dropped with an open transaction.
    SessionDroppedInTransaction,
    /// A maintenance pass completed.
    MaintenanceCompleted,
    /// A maintenance pass was skipped.
    MaintenanceSkipped,
    /// A maintenance pass failed.
    MaintenanceFailed,
    /// The store was closed.
    StoreClosed,
}

/// Store event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreEvent {
    /// Event identifier.
    pub event: StoreEventKind,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Collection table, when the event concerns one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    /// Field path, when the event concerns one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Free-form detail, usually an error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Elapsed time for the reported operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl StoreEvent {
    /// Creates a new event with a consistent timestamp.
    #[must_use]
    pub fn new(event: StoreEventKind) -> Self {
        let timestamp_ms =
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        Self {
            event,
            timestamp_ms,
            table: None,
            path: None,
            message: None,
            duration_ms: None,
        }
    }

    /// Sets the table.
    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Sets the field path.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Sets the message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Sets the duration.
    #[must_use]
    pub const fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Store event sink.
pub trait StoreEventSink: Send + Sync {
    /// Records a store event.
    fn record(&self, event: &StoreEvent);
}

/// Event sink that logs JSON lines to stderr.
pub struct StderrEventSink;

impl StoreEventSink for StderrEventSink {
    fn record(&self, event: &StoreEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

/// Event sink that logs JSON lines to a file.
pub struct FileEventSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
}

impl FileEventSink {
    /// Opens the event log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl StoreEventSink for FileEventSink {
    fn record(&self, event: &StoreEvent) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

/// No-op event sink.
pub struct NoopEventSink;

impl StoreEventSink for NoopEventSink {
    fn record(&self, _event: &StoreEvent) {}
}

/// Event sink that keeps events in memory.
#[derive(Default)]
pub struct MemoryEventSink {
    /// Captured events in arrival order.
    events: Mutex<Vec<StoreEvent>>,
}

impl MemoryEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the captured events.
    #[must_use]
    pub fn events(&self) -> Vec<StoreEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Returns the captured event kinds.
    #[must_use]
    pub fn kinds(&self) -> Vec<StoreEventKind> {
        self.events().into_iter().map(|event| event.event).collect()
    }
}

impl StoreEventSink for MemoryEventSink {
    fn record(&self, event: &StoreEvent) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event.clone());
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
