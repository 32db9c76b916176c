// crates/docstore-query/src/raw.rs
// ============================================================================
// Module: Raw Predicate Escape Hatch
// Description: Caller-written SQL predicates with bare field rewriting.
// Purpose: Reach `OR` and grouped conditions the filter form cannot express.
// Dependencies: crate::{path, value}
// ============================================================================

//! ## Overview
//! A raw predicate is SQL text plus positional parameters. Before use it gets
//! a `WHERE` prefix (unless one is present, case-insensitively) and bare field
//! names are rewritten to `json_extract(data, '$."field"')`.
//!
//! The rewrite is token-level and conservative:
//! - a fragment that already calls `json_extract` is left untouched;
//! - hyphenated path segments are not recognized (`a-b` reads as subtraction);
//! - system columns (`id`, `data`, `created_at`, `updated_at`, `rowid`),
//!   SQL keywords, function names, literals, quoted identifiers, and
//!   placeholders are never rewritten; `_id` becomes `id`.
//!
//! Raw predicates are NOT validated or sanitized beyond parameter binding.
//! Only pass trusted SQL text; put every untrusted value in `params`.

use crate::path::BODY_COLUMN;
use crate::path::FieldPath;
use crate::path::ID_COLUMN;
use crate::path::SYSTEM_COLUMNS;
use crate::path::extract_expression;
use crate::sort::INSERTION_ORDER_KEY;
use crate::value::SqlParam;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Words never treated as field references.
const SQL_KEYWORDS: [&str; 51] = [
    "and", "or", "not", "null", "is", "in", "like", "glob", "between", "true", "false", "where",
    "escape", "case", "when", "then", "else", "end", "collate", "nocase", "binary", "rtrim", "asc",
    "desc", "exists", "cast", "as", "real", "integer", "text", "numeric", "blob", "select", "from",
    "regexp", "match", "distinct", "all", "isnull", "notnull", "current_timestamp",
    "current_date", "current_time", "limit", "offset", "order", "by", "group", "having", "union",
    "raise",
];

// ============================================================================
// SECTION: Types
// ============================================================================

/// Unvalidated SQL predicate supplied by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPredicate {
    /// Predicate text, with or without a leading `WHERE`.
    pub sql: String,
    /// Positional parameters.
    pub params: Vec<SqlParam>,
}

impl RawPredicate {
    /// Creates a raw predicate.
    pub fn new(sql: impl Into<String>, params: Vec<SqlParam>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// Returns ` WHERE <rewritten>` ready to append to a `SELECT`.
    #[must_use]
    pub fn where_clause(&self) -> String {
        let trimmed = self.sql.trim();
        if trimmed.is_empty() {
            return String::new();
        }
        let body = strip_where(trimmed);
        format!(" WHERE {}", rewrite_field_references(body, BODY_COLUMN))
    }
}

/// Removes a leading `WHERE` keyword, case-insensitively.
fn strip_where(fragment: &str) -> &str {
    let Some(head) = fragment.get(.. 5) else {
        return fragment;
    };
    let rest = &fragment[5 ..];
    if head.eq_ignore_ascii_case("where") && rest.starts_with(|ch: char| ch.is_whitespace() || ch == '(')
    {
        rest.trim_start()
    } else {
        fragment
    }
}

// ============================================================================
// SECTION: Rewriting
// ============================================================================

/// Rewrites bare field names in `fragment` into extractions from `source`.
///
/// `source` is the body expression, e.g. `data` or `NEW.data` in triggers.
#[must_use]
pub fn rewrite_field_references(fragment: &str, source: &str) -> String {
    if fragment.to_ascii_lowercase().contains("json_extract") {
        return fragment.to_string();
    }
    let chars: Vec<char> = fragment.chars().collect();
    let mut out = String::with_capacity(fragment.len() * 2);
    let mut index = 0;
    while index < chars.len() {
        let ch = chars[index];
        match ch {
            '\'' | '"' | '`' | '[' => {
                let end = quoted_end(&chars, index);
                out.extend(&chars[index .. end]);
                index = end;
            }
            '?' | ':' | '@' | '$' => {
                let end = scan(&chars, index + 1, |c| c.is_alphanumeric() || c == '_');
                out.extend(&chars[index .. end]);
                index = end;
            }
            c if c.is_ascii_digit() => {
                let end = scan(&chars, index, |c| c.is_alphanumeric() || c == '.');
                out.extend(&chars[index .. end]);
                index = end;
            }
            c if c.is_alphabetic() || c == '_' => {
                let end = scan(&chars, index, |c| c.is_alphanumeric() || c == '_' || c == '.');
                let token: String = chars[index .. end].iter().collect();
                let next = chars[end ..].iter().find(|c| !c.is_whitespace());
                out.push_str(&rewrite_token(&token, next == Some(&'('), source));
                index = end;
            }
            _ => {
                out.push(ch);
                index += 1;
            }
        }
    }
    out
}

/// Rewrites a single identifier token.
fn rewrite_token(token: &str, is_call: bool, source: &str) -> String {
    let lowered = token.to_ascii_lowercase();
    if is_call || SQL_KEYWORDS.contains(&lowered.as_str()) {
        return token.to_string();
    }
    if token == "_id" {
        return ID_COLUMN.to_string();
    }
    let head = lowered.split('.').next().unwrap_or_default();
    if SYSTEM_COLUMNS.contains(&head) || head == INSERTION_ORDER_KEY || head == "new" || head == "old"
    {
        return token.to_string();
    }
    FieldPath::parse(token).map_or_else(|_| token.to_string(), |path| extract_expression(source, &path))
}

/// Returns the index after the last char matching `accept`, starting at `start`.
fn scan(chars: &[char], start: usize, accept: impl Fn(char) -> bool) -> usize {
    let mut end = start;
    while end < chars.len() && accept(chars[end]) {
        end += 1;
    }
    end
}

/// Returns the index after the closing delimiter of a quoted run.
fn quoted_end(chars: &[char], start: usize) -> usize {
    let close = match chars[start] {
        '[' => ']',
        other => other,
    };
    let mut end = start + 1;
    while end < chars.len() {
        if chars[end] == close {
            // Doubled delimiter is an escaped literal delimiter.
            if close != ']' && chars.get(end + 1) == Some(&close) {
                end += 2;
                continue;
            }
            return end + 1;
        }
        end += 1;
    }
    end
}

// ============================================================================
// SECTION: Tests
// ============================================================================
