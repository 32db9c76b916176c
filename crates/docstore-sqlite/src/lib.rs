// crates/docstore-sqlite/src/lib.rs
// ============================================================================
// Module: Docstore SQLite
// Description: Document collections stored as JSON rows in SQLite.
// Purpose: Execute compiled document queries with pooled, nested transactions.
// Dependencies: docstore-query, rusqlite, serde, sha2, thiserror
// ============================================================================

//! ## Overview
//! A [`DocStore`] owns a bounded connection pool over one `SQLite` file.
//! Callers borrow a [`Session`], open [`Collection`]s on it, and nest
//! transactions through savepoints. Paths that are filtered or sorted often
//! can be promoted to real columns kept current by triggers; promotion can add
//! uniqueness and check constraints.
//!
//! Conditions the store handles on its own (back-fill failures, discarded
//! connections, maintenance outcomes) are reported through a
//! [`StoreEventSink`] rather than returned as errors.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod collection;
pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod maintenance;
pub mod pool;
pub mod promotion;
pub mod schema;
pub mod session;
pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use collection::Collection;
pub use collection::StoredDocument;
pub use collection::UpdateOptions;
pub use collection::UpdateResult;
pub use config::SqliteDocStoreConfig;
pub use config::SqliteJournalMode;
pub use config::SqliteSyncMode;
pub use docstore_query::FindOptions;
pub use docstore_query::RawPredicate;
pub use docstore_query::SortDirection;
pub use docstore_query::SqlParam;
pub use error::DocStoreError;
pub use events::FileEventSink;
pub use events::MemoryEventSink;
pub use events::NoopEventSink;
pub use events::StderrEventSink;
pub use events::StoreEvent;
pub use events::StoreEventKind;
pub use events::StoreEventSink;
pub use ids::IdGenerator;
pub use ids::TimeOrderedIdGenerator;
pub use maintenance::MaintenanceOutcome;
pub use pool::PoolStatus;
pub use promotion::PromoteOptions;
pub use schema::CheckConstraint;
pub use schema::PromotedColumn;
pub use session::Session;
pub use store::DocStore;
pub use store::StoreOptions;
