// crates/docstore-query/src/lib.rs
// ============================================================================
// Module: Docstore Query
// Description: Document filter/update/sort compilers targeting SQL.
// Purpose: Translate MongoDB-style queries into SQLite predicates and statements.
// Dependencies: serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! This crate holds the pure half of the document store: it turns filter,
//! update, and sort documents into SQL fragments with ordered parameters and
//! never touches a connection. Documents live in a single JSON `data` column;
//! fields are read with `json_extract`, or from a promoted column when one
//! mirrors the path. Everything here fails fast with [`CompileError`] before a
//! statement can reach the engine.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod error;
pub mod filter;
pub mod path;
pub mod raw;
pub mod sort;
pub mod statement;
pub mod update;
pub mod value;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use error::ApplyError;
pub use error::CompileError;
pub use filter::CompiledPredicate;
pub use filter::Condition;
pub use filter::Filter;
pub use filter::FilterClause;
pub use filter::compile_filter;
pub use path::FieldPath;
pub use path::FieldRef;
pub use path::FieldResolver;
pub use path::TableName;
pub use raw::RawPredicate;
pub use sort::FindOptions;
pub use sort::SortDirection;
pub use sort::SortSpec;
pub use statement::Cardinality;
pub use statement::CompiledStatement;
pub use update::UpdateDocument;
pub use update::UpdateGuard;
pub use update::UpdateOperators;
pub use value::SqlParam;
