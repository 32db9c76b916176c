// crates/docstore-query/src/path.rs
// ============================================================================
// Module: Field Paths
// Description: Dotted document paths, reserved fields, and SQL identifiers.
// Purpose: Validate every name that is spliced into SQL text.
// Dependencies: crate::error
// ============================================================================

//! ## Overview
//! Field paths are the only caller-supplied text inlined into SQL (as JSON path
//! literals and promoted column names), so they are validated once here.
//! Segments accept alphanumerics, `_`, and `-`; quotes, whitespace, and `$`
//! never pass. Reserved names route to system columns instead of the body.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::CompileError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Identifier column.
pub const ID_COLUMN: &str = "id";
/// Serialized document body column.
pub const BODY_COLUMN: &str = "data";
/// Creation timestamp column (unix milliseconds).
pub const CREATED_AT_COLUMN: &str = "created_at";
/// Last update timestamp column (unix milliseconds).
pub const UPDATED_AT_COLUMN: &str = "updated_at";
/// Columns every document table carries.
pub const SYSTEM_COLUMNS: [&str; 4] = [ID_COLUMN, BODY_COLUMN, CREATED_AT_COLUMN, UPDATED_AT_COLUMN];
/// Document field names that address the identifier column.
pub const ID_FIELDS: [&str; 2] = ["_id", "id"];
/// Separator used when flattening a dotted path into a column name.
pub const COLUMN_SEGMENT_SEPARATOR: &str = "__";
/// Maximum path length accepted.
const MAX_PATH_LENGTH: usize = 512;
/// Maximum table identifier length accepted.
const MAX_IDENTIFIER_LENGTH: usize = 64;
/// Table name prefixes owned by the engine or the store itself.
const RESERVED_TABLE_PREFIXES: [&str; 2] = ["sqlite_", "docstore_"];

// ============================================================================
// SECTION: Field Path
// ============================================================================

/// Validated dotted path into a document body.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath {
    /// Original dotted form.
    raw: String,
    /// Individual segments.
    segments: Vec<String>,
}

impl FieldPath {
    /// Parses and validates a dotted path.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::InvalidFieldPath`] for empty paths, empty
    /// segments, or segments with unsupported characters.
    pub fn parse(raw: &str) -> Result<Self, CompileError> {
        let invalid = |reason: &str| CompileError::InvalidFieldPath {
            path: raw.to_string(),
            reason: reason.to_string(),
        };
        if raw.is_empty() {
            return Err(invalid("path must not be empty"));
        }
        if raw.len() > MAX_PATH_LENGTH {
            return Err(invalid("path exceeds length limit"));
        }
        let mut segments = Vec::new();
        for segment in raw.split('.') {
            if segment.is_empty() {
                return Err(invalid("path contains an empty segment"));
            }
            if !segment.chars().all(|ch| ch.is_alphanumeric() || ch == '_' || ch == '-') {
                return Err(invalid("segments may only contain letters, digits, '_' and '-'"));
            }
            segments.push(segment.to_string());
        }
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// Returns the dotted form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns the path segments.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Returns true when the path has more than one segment.
    #[must_use]
    pub fn is_nested(&self) -> bool {
        self.segments.len() > 1
    }

    /// Returns the proper ancestors of this path, outermost first.
    #[must_use]
    pub fn ancestors(&self) -> Vec<Self> {
        (1 .. self.segments.len())
            .map(|len| Self {
                raw: self.segments[.. len].join("."),
                segments: self.segments[.. len].to_vec(),
            })
            .collect()
    }

    /// Returns the `SQLite` JSON path, e.g. `$."address"."city"`.
    #[must_use]
    pub fn json_path(&self) -> String {
        let mut out = String::from("$");
        for segment in &self.segments {
            out.push_str(".\"");
            out.push_str(segment);
            out.push('"');
        }
        out
    }

    /// Returns the JSON path as a single-quoted SQL string literal.
    #[must_use]
    pub fn json_path_literal(&self) -> String {
        format!("'{}'", self.json_path())
    }

    /// Returns the flattened promoted column name (`a.b` becomes `a__b`).
    #[must_use]
    pub fn column_name(&self) -> String {
        self.segments.join(COLUMN_SEGMENT_SEPARATOR)
    }

    /// Returns true when either path is a prefix of the other (or they match).
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        let shared = self.segments.len().min(other.segments.len());
        self.segments[.. shared] == other.segments[.. shared]
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

// ============================================================================
// SECTION: Field Reference
// ============================================================================

/// A filter or sort key resolved to its storage location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldRef {
    /// The identifier column.
    Id,
    /// The creation timestamp column.
    CreatedAt,
    /// The update timestamp column.
    UpdatedAt,
    /// A path inside the serialized body.
    Body(FieldPath),
}

impl FieldRef {
    /// Resolves a field name to a system column or body path.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::InvalidFieldPath`] when a body path is invalid.
    pub fn parse(field: &str) -> Result<Self, CompileError> {
        if ID_FIELDS.contains(&field) {
            return Ok(Self::Id);
        }
        match field {
            CREATED_AT_COLUMN => Ok(Self::CreatedAt),
            UPDATED_AT_COLUMN => Ok(Self::UpdatedAt),
            _ => FieldPath::parse(field).map(Self::Body),
        }
    }

    /// Returns the system column name when this is not a body path.
    #[must_use]
    pub const fn system_column(&self) -> Option<&'static str> {
        match self {
            Self::Id => Some(ID_COLUMN),
            Self::CreatedAt => Some(CREATED_AT_COLUMN),
            Self::UpdatedAt => Some(UPDATED_AT_COLUMN),
            Self::Body(_) => None,
        }
    }
}

/// Returns true when `field` names the identifier or a timestamp column.
#[must_use]
pub fn is_reserved_field(field: &str) -> bool {
    ID_FIELDS.contains(&field) || field == CREATED_AT_COLUMN || field == UPDATED_AT_COLUMN
}

// ============================================================================
// SECTION: Resolver
// ============================================================================

/// Maps field references to SQL expressions, preferring promoted columns.
///
/// # Invariants
/// - A promoted column holds exactly `json_extract(data, path)` for its path,
///   so reading the column is equivalent to extracting from the body.
#[derive(Debug, Clone, Default)]
pub struct FieldResolver {
    /// Promoted paths keyed by dotted path, valued by column name.
    promoted: BTreeMap<String, String>,
}

impl FieldResolver {
    /// Creates a resolver with no promoted columns.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a resolver over the given promoted paths.
    #[must_use]
    pub fn with_promoted<I>(paths: I) -> Self
    where
        I: IntoIterator<Item = FieldPath>,
    {
        let promoted =
            paths.into_iter().map(|path| (path.as_str().to_string(), path.column_name())).collect();
        Self {
            promoted,
        }
    }

    /// Returns true when the path has a promoted column.
    #[must_use]
    pub fn is_promoted(&self, path: &FieldPath) -> bool {
        self.promoted.contains_key(path.as_str())
    }

    /// Returns true when any promoted path overlaps the given path.
    #[must_use]
    pub fn touches_promoted(&self, path: &FieldPath) -> bool {
        self.promoted.keys().any(|promoted| {
            FieldPath::parse(promoted).is_ok_and(|promoted| promoted.overlaps(path))
        })
    }

    /// Returns the SQL expression that yields the field's scalar value.
    #[must_use]
    pub fn expression(&self, field: &FieldRef) -> String {
        match field {
            FieldRef::Body(path) => self.promoted.get(path.as_str()).map_or_else(
                || extract_expression(BODY_COLUMN, path),
                |column| quote_identifier(column),
            ),
            other => other.system_column().unwrap_or(ID_COLUMN).to_string(),
        }
    }
}

/// Returns `json_extract(<source>, '<path>')`.
#[must_use]
pub fn extract_expression(source: &str, path: &FieldPath) -> String {
    format!("json_extract({source}, {})", path.json_path_literal())
}

// ============================================================================
// SECTION: Identifiers
// ============================================================================

/// Validated collection table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName(String);

impl TableName {
    /// Validates a collection name for use as a table identifier.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::InvalidIdentifier`] for empty, overlong,
    /// reserved, or non-identifier names.
    pub fn parse(name: &str) -> Result<Self, CompileError> {
        let invalid = |reason: &str| CompileError::InvalidIdentifier {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        let mut chars = name.chars();
        let Some(first) = chars.next() else {
            return Err(invalid("identifier must not be empty"));
        };
        if name.len() > MAX_IDENTIFIER_LENGTH {
            return Err(invalid("identifier exceeds length limit"));
        }
        if !(first.is_ascii_alphabetic() || first == '_') {
            return Err(invalid("identifier must start with a letter or '_'"));
        }
        if !chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
            return Err(invalid("identifier may only contain ASCII letters, digits and '_'"));
        }
        let lowered = name.to_ascii_lowercase();
        if RESERVED_TABLE_PREFIXES.iter().any(|prefix| lowered.starts_with(prefix)) {
            return Err(invalid("identifier uses a reserved prefix"));
        }
        Ok(Self(name.to_string()))
    }

    /// Returns the raw table name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the double-quoted identifier.
    #[must_use]
    pub fn quoted(&self) -> String {
        quote_identifier(&self.0)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Double-quotes an identifier, doubling embedded quotes.
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Escapes text for use inside a single-quoted SQL literal.
#[must_use]
pub fn escape_literal(text: &str) -> String {
    text.replace('\'', "''")
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]
mod tests {
    use super::FieldPath;
    use super::FieldRef;
    use super::FieldResolver;
    use super::TableName;

    #[test]
    fn nested_paths_quote_every_segment() {
        let path = FieldPath::parse("address.city").unwrap();
        assert_eq!(path.json_path(), "$.\"address\".\"city\"");
        assert_eq!(path.column_name(), "address__city");
    }

    #[test]
    fn paths_reject_quotes_and_empty_segments() {
        assert!(FieldPath::parse("a..b").is_err());
        assert!(FieldPath::parse("a'b").is_err());
        assert!(FieldPath::parse("").is_err());
        assert!(FieldPath::parse("$where").is_err());
    }

    #[test]
    fn overlap_is_prefix_in_either_direction() {
        let parent = FieldPath::parse("profile").unwrap();
        let child = FieldPath::parse("profile.email").unwrap();
        let sibling = FieldPath::parse("profiles").unwrap();
        assert!(parent.overlaps(&child));
        assert!(child.overlaps(&parent));
        assert!(!parent.overlaps(&sibling));
    }

    #[test]
    fn ancestors_exclude_the_path_itself() {
        let path = FieldPath::parse("a.b.c").unwrap();
        let ancestors: Vec<String> = path.ancestors().iter().map(ToString::to_string).collect();
        assert_eq!(ancestors, ["a", "a.b"]);
        assert!(FieldPath::parse("a").unwrap().ancestors().is_empty());
    }

    #[test]
    fn resolver_prefers_promoted_columns() {
        let email = FieldPath::parse("email").unwrap();
        let resolver = FieldResolver::with_promoted([email.clone()]);
        assert_eq!(resolver.expression(&FieldRef::Body(email)), "\"email\"");
        assert_eq!(resolver.expression(&FieldRef::Id), "id");
    }

    #[test]
    fn table_names_reject_reserved_prefixes() {
        assert!(TableName::parse("users").is_ok());
        assert!(TableName::parse("sqlite_master").is_err());
        assert!(TableName::parse("docstore_meta").is_err());
        assert!(TableName::parse("1users").is_err());
        assert!(TableName::parse("user-s").is_err());
    }
}
