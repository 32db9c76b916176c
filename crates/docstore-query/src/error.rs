// crates/docstore-query/src/error.rs
// ============================================================================
// Module: Query Compiler Errors
// Description: Failure taxonomy for filter, update, and sort compilation.
// Purpose: Reject malformed document queries before any SQL reaches the engine.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! Compilation fails fast: every unrecognized operator, malformed operand, or
//! reserved-field mutation surfaces as a [`CompileError`] naming the offending
//! key. In-memory update application has its own [`ApplyError`] because it
//! runs against stored documents rather than caller input.

use thiserror::Error;

// ============================================================================
// SECTION: Compile Errors
// ============================================================================

/// Errors raised while compiling a filter, update, or sort specification.
///
/// # Invariants
/// - Raised before any statement is sent to the storage engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// Filter operator key is not part of the supported operator set.
    #[error("filter compile error: unknown operator `{operator}` on field `{field}`")]
    UnknownOperator {
        /// Field the operator was attached to.
        field: String,
        /// Offending operator key.
        operator: String,
    },
    /// Update document carries an operator other than `$set`, `$unset`, `$inc`.
    #[error("update compile error: unknown update operator `{operator}`")]
    UnknownUpdateOperator {
        /// Offending operator key.
        operator: String,
    },
    /// Operator operand has the wrong shape.
    #[error("filter compile error: invalid operand for `{operator}` on field `{field}`: {reason}")]
    InvalidOperand {
        /// Field the operator was attached to.
        field: String,
        /// Operator key.
        operator: String,
        /// Human-readable reason.
        reason: String,
    },
    /// An object mixes `$`-prefixed operator keys with plain keys.
    #[error("filter compile error: field `{field}` mixes operators and literal keys")]
    MixedOperatorObject {
        /// Field holding the mixed object.
        field: String,
    },
    /// Field path is empty or contains unsupported characters.
    #[error("invalid field path `{path}`: {reason}")]
    InvalidFieldPath {
        /// Offending path.
        path: String,
        /// Human-readable reason.
        reason: String,
    },
    /// Update targets the identifier or a timestamp column.
    #[error("update compile error: field `{field}` is reserved and cannot be modified")]
    ProtectedField {
        /// Reserved field name.
        field: String,
    },
    /// Update document carries no operator or only empty operators.
    #[error("update compile error: update document is empty")]
    EmptyUpdate,
    /// The same path is targeted by more than one update operator.
    #[error("update compile error: path `{path}` is targeted by more than one operator")]
    ConflictingUpdatePaths {
        /// Conflicting path.
        path: String,
    },
    /// Sort direction is not `1` or `-1`.
    #[error("sort compile error: invalid direction for field `{field}` (expected 1 or -1)")]
    InvalidSortDirection {
        /// Field with the bad direction.
        field: String,
    },
    /// Top-level input has the wrong JSON type.
    #[error("{context} must be a JSON object")]
    NotAnObject {
        /// What was being parsed.
        context: &'static str,
    },
    /// Table or column identifier is not usable in SQL.
    #[error("invalid identifier `{name}`: {reason}")]
    InvalidIdentifier {
        /// Offending identifier.
        name: String,
        /// Human-readable reason.
        reason: String,
    },
}

// ============================================================================
// SECTION: Apply Errors
// ============================================================================

/// Errors raised while applying an update to a decoded document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    /// An intermediate path segment holds a scalar or array.
    #[error("cannot traverse `{path}`: segment `{segment}` is not an object")]
    NotAContainer {
        /// Full path being written.
        path: String,
        /// Segment that blocked traversal.
        segment: String,
    },
    /// `$inc` target holds a non-numeric value.
    #[error("cannot increment `{path}`: current value is not a number")]
    NonNumericIncrement {
        /// Path being incremented.
        path: String,
    },
    /// Integer increment overflowed.
    #[error("cannot increment `{path}`: integer overflow")]
    IncrementOverflow {
        /// Path being incremented.
        path: String,
    },
}
