// crates/docstore-config/src/lib.rs
// ============================================================================
// Module: Docstore Config Library
// Description: File configuration for the document store.
// Purpose: Single source of truth for docstore.toml semantics.
// Dependencies: docstore-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! `docstore-config` loads `docstore.toml`, validates it, and turns it into
//! an opened [`docstore_sqlite::DocStore`] with the configured event sink.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::ConfigError;
pub use config::DocStoreFileConfig;
pub use config::LoggingConfig;
pub use config::LoggingSink;
