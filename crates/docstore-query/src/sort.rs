// crates/docstore-query/src/sort.rs
// ============================================================================
// Module: Sort/Limit Compiler
// Description: Sort specifications and pagination compiled to SQL clauses.
// Purpose: Produce `ORDER BY` / `LIMIT` / `OFFSET` fragments.
// Dependencies: crate::{error, path}, serde, serde_json
// ============================================================================

//! ## Overview
//! Sort keys keep the caller's order. The table's `rowid` is always appended
//! as the final key, so unsorted reads return insertion order and ties break
//! deterministically.
//!
//! A skip without a limit compiles to `LIMIT -1 OFFSET m`: `SQLite` rejects a
//! bare `OFFSET`, and a negative limit is its "no upper bound" sentinel. This
//! is a dialect workaround, not a general unbounded-limit syntax.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::error::CompileError;
use crate::path::FieldRef;
use crate::path::FieldResolver;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Limit emitted when only a skip is requested.
pub const UNBOUNDED_LIMIT_SENTINEL: i64 = -1;
/// Final ordering key appended to every `ORDER BY`.
pub const INSERTION_ORDER_KEY: &str = "rowid";

// ============================================================================
// SECTION: Types
// ============================================================================

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    /// `1`.
    Ascending,
    /// `-1`.
    Descending,
}

impl SortDirection {
    /// Returns the SQL keyword.
    #[must_use]
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

/// Ordered list of sort keys.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SortSpec {
    /// Keys in priority order.
    keys: Vec<(FieldRef, SortDirection)>,
}

impl SortSpec {
    /// Parses `{"field": 1, "other": -1}`.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError`] for non-object specs, invalid paths, or
    /// directions other than `1`/`-1`.
    pub fn parse(spec: &Value) -> Result<Self, CompileError> {
        let Value::Object(map) = spec else {
            return Err(CompileError::NotAnObject {
                context: "sort specification",
            });
        };
        let mut sort = Self::default();
        for (field, direction) in map {
            let direction = match direction.as_i64() {
                Some(1) => SortDirection::Ascending,
                Some(-1) => SortDirection::Descending,
                _ => {
                    return Err(CompileError::InvalidSortDirection {
                        field: field.clone(),
                    });
                }
            };
            sort.keys.push((FieldRef::parse(field)?, direction));
        }
        Ok(sort)
    }

    /// Appends a sort key.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::InvalidFieldPath`] for invalid field names.
    pub fn push(&mut self, field: &str, direction: SortDirection) -> Result<(), CompileError> {
        self.keys.push((FieldRef::parse(field)?, direction));
        Ok(())
    }

    /// Returns the sort keys.
    #[must_use]
    pub fn keys(&self) -> &[(FieldRef, SortDirection)] {
        &self.keys
    }
}

/// Query options for `find`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FindOptions {
    /// Sort keys; `None` means insertion order.
    pub sort: Option<SortSpec>,
    /// Maximum rows to return.
    pub limit: Option<u64>,
    /// Rows to skip.
    pub skip: Option<u64>,
}

impl FindOptions {
    /// Creates empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sort key, creating the sort spec if needed.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::InvalidFieldPath`] for invalid field names.
    pub fn sort_by(mut self, field: &str, direction: SortDirection) -> Result<Self, CompileError> {
        self.sort.get_or_insert_with(SortSpec::default).push(field, direction)?;
        Ok(self)
    }

    /// Sets the limit.
    #[must_use]
    pub const fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the skip.
    #[must_use]
    pub const fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }
}

// ============================================================================
// SECTION: Compilation
// ============================================================================

/// Compiles ` ORDER BY ...` for the given sort (insertion order when absent).
#[must_use]
pub fn compile_order_by(sort: Option<&SortSpec>, resolver: &FieldResolver) -> String {
    let mut terms: Vec<String> = sort
        .map(|sort| {
            sort.keys
                .iter()
                .map(|(field, direction)| {
                    format!("{} {}", resolver.expression(field), direction.keyword())
                })
                .collect()
        })
        .unwrap_or_default();
    terms.push(format!("{INSERTION_ORDER_KEY} ASC"));
    format!(" ORDER BY {}", terms.join(", "))
}

/// Compiles ` LIMIT n OFFSET m` according to the skip-without-limit policy.
#[must_use]
pub fn compile_limit_offset(limit: Option<u64>, skip: Option<u64>) -> String {
    match (limit, skip) {
        (None, None) => String::new(),
        (Some(limit), None) => format!(" LIMIT {limit}"),
        (Some(limit), Some(skip)) => format!(" LIMIT {limit} OFFSET {skip}"),
        (None, Some(skip)) => format!(" LIMIT {UNBOUNDED_LIMIT_SENTINEL} OFFSET {skip}"),
    }
}

/// Compiles the full ordering and pagination suffix for `options`.
#[must_use]
pub fn compile_options(options: &FindOptions, resolver: &FieldResolver) -> String {
    let mut out = compile_order_by(options.sort.as_ref(), resolver);
    out.push_str(&compile_limit_offset(options.limit, options.skip));
    out
}
