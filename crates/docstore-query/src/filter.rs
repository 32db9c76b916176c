// crates/docstore-query/src/filter.rs
// ============================================================================
// Module: Filter Compiler
// Description: Document filters compiled into SQL predicates.
// Purpose: Translate field/operator mappings into `WHERE` fragments + params.
// Dependencies: crate::{error, path, value}, serde_json
// ============================================================================

//! ## Overview
//! A filter is an ordered JSON object mapping field paths to either a literal
//! (equality) or an operator object (`{"$gt": 5}`). Operator keys are decided
//! once, at parse time, into the closed [`Condition`] enum; unknown keys fail
//! with [`CompileError::UnknownOperator`]. A literal compiles to exactly the
//! same SQL as its `$eq` spelling.
//!
//! Policies:
//! - `$in: []` matches nothing (`0`); `$nin: []` matches everything (`1`).
//! - `$gt/$gte/$lt/$lte` cast body values to `REAL` when the operand is a
//!   number; string operands compare as text.
//! - `$regex` is a best-effort `LIKE` translation: `^`/`$` anchors are honored,
//!   everything else is matched literally. It is not regular-expression
//!   matching, and `LIKE` is ASCII case-insensitive in `SQLite`.
//! - `$exists` cannot tell a stored JSON `null` from a missing field.

use serde_json::Map;
use serde_json::Value;

use crate::error::CompileError;
use crate::path::FieldRef;
use crate::path::FieldResolver;
use crate::value::SqlParam;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Predicate used for `$in: []`.
pub const MATCH_NOTHING: &str = "0";
/// Predicate used for `$nin: []`.
pub const MATCH_EVERYTHING: &str = "1";
/// Escape character used for translated `LIKE` patterns.
const LIKE_ESCAPE: char = '\\';

// ============================================================================
// SECTION: Types
// ============================================================================

/// A single parsed operator applied to one field.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `$eq` or a bare literal.
    Eq(Value),
    /// `$ne`.
    Ne(Value),
    /// `$gt`.
    Gt(Value),
    /// `$gte`.
    Gte(Value),
    /// `$lt`.
    Lt(Value),
    /// `$lte`.
    Lte(Value),
    /// `$in`.
    In(Vec<Value>),
    /// `$nin`.
    Nin(Vec<Value>),
    /// `$exists`.
    Exists(bool),
    /// `$regex`, compiled to `LIKE`.
    Regex(String),
}

impl Condition {
    /// Parses an operator key and its operand.
    fn parse(field: &str, operator: &str, operand: &Value) -> Result<Self, CompileError> {
        let invalid = |reason: &str| CompileError::InvalidOperand {
            field: field.to_string(),
            operator: operator.to_string(),
            reason: reason.to_string(),
        };
        match operator {
            "$eq" => Ok(Self::Eq(operand.clone())),
            "$ne" => Ok(Self::Ne(operand.clone())),
            "$gt" | "$gte" | "$lt" | "$lte" => {
                if !(operand.is_number() || operand.is_string()) {
                    return Err(invalid("range operand must be a number or string"));
                }
                Ok(match operator {
                    "$gt" => Self::Gt(operand.clone()),
                    "$gte" => Self::Gte(operand.clone()),
                    "$lt" => Self::Lt(operand.clone()),
                    _ => Self::Lte(operand.clone()),
                })
            }
            "$in" | "$nin" => {
                let Value::Array(items) = operand else {
                    return Err(invalid("operand must be an array"));
                };
                if operator == "$in" {
                    Ok(Self::In(items.clone()))
                } else {
                    Ok(Self::Nin(items.clone()))
                }
            }
            "$exists" => {
                operand.as_bool().map(Self::Exists).ok_or_else(|| invalid("operand must be a boolean"))
            }
            "$regex" => operand
                .as_str()
                .map(|pattern| Self::Regex(pattern.to_string()))
                .ok_or_else(|| invalid("operand must be a string")),
            _ => Err(CompileError::UnknownOperator {
                field: field.to_string(),
                operator: operator.to_string(),
            }),
        }
    }
}

/// All conditions attached to one filter field.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterClause {
    /// Field name as written by the caller.
    pub field_name: String,
    /// Resolved storage location.
    pub field: FieldRef,
    /// Conditions joined with `AND`.
    pub conditions: Vec<Condition>,
}

/// A parsed document filter.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Filter {
    /// Clauses in filter iteration order.
    clauses: Vec<FilterClause>,
}

/// A compiled predicate: SQL text without `WHERE` plus positional params.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompiledPredicate {
    /// Predicate text; empty when the filter matched everything.
    pub sql: String,
    /// Parameters in placeholder order.
    pub params: Vec<SqlParam>,
}

impl CompiledPredicate {
    /// Returns true when there is no predicate.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }

    /// Returns ` WHERE <sql>` or an empty string.
    #[must_use]
    pub fn where_clause(&self) -> String {
        if self.sql.is_empty() { String::new() } else { format!(" WHERE {}", self.sql) }
    }
}

// ============================================================================
// SECTION: Parsing
// ============================================================================

impl Filter {
    /// Parses a filter document. `null` and `{}` yield the empty filter.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError`] for non-object filters, invalid paths, mixed
    /// operator objects, unknown operators, or malformed operands.
    pub fn parse(filter: &Value) -> Result<Self, CompileError> {
        match filter {
            Value::Null => Ok(Self::default()),
            Value::Object(map) => Self::parse_map(map),
            _ => Err(CompileError::NotAnObject {
                context: "filter",
            }),
        }
    }

    /// Parses a filter from an already-decoded map.
    ///
    /// # Errors
    ///
    /// See [`Filter::parse`].
    pub fn parse_map(map: &Map<String, Value>) -> Result<Self, CompileError> {
        let mut clauses = Vec::with_capacity(map.len());
        for (field_name, value) in map {
            let field = FieldRef::parse(field_name)?;
            let conditions = parse_conditions(field_name, value)?;
            clauses.push(FilterClause {
                field_name: field_name.clone(),
                field,
                conditions,
            });
        }
        Ok(Self {
            clauses,
        })
    }

    /// Returns true when the filter has no clauses.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Returns the parsed clauses.
    #[must_use]
    pub fn clauses(&self) -> &[FilterClause] {
        &self.clauses
    }

    /// Returns the `(field, value)` pairs pinned by equality, for upserts.
    #[must_use]
    pub fn equality_fields(&self) -> Vec<(&FilterClause, &Value)> {
        let mut out = Vec::new();
        for clause in &self.clauses {
            for condition in &clause.conditions {
                if let Condition::Eq(value) = condition {
                    out.push((clause, value));
                }
            }
        }
        out
    }

    /// Compiles the filter into a predicate.
    #[must_use]
    pub fn compile(&self, resolver: &FieldResolver) -> CompiledPredicate {
        let mut terms = Vec::new();
        let mut params = Vec::new();
        for clause in &self.clauses {
            let expression = resolver.expression(&clause.field);
            let cast_numeric = matches!(clause.field, FieldRef::Body(_));
            for condition in &clause.conditions {
                terms.push(compile_condition(&expression, cast_numeric, condition, &mut params));
            }
        }
        CompiledPredicate {
            sql: terms.join(" AND "),
            params,
        }
    }
}

/// Parses and compiles a filter in one step.
///
/// # Errors
///
/// See [`Filter::parse`].
pub fn compile_filter(
    filter: &Value,
    resolver: &FieldResolver,
) -> Result<CompiledPredicate, CompileError> {
    Ok(Filter::parse(filter)?.compile(resolver))
}

/// Splits a field value into literal equality or operator conditions.
fn parse_conditions(field: &str, value: &Value) -> Result<Vec<Condition>, CompileError> {
    let Value::Object(map) = value else {
        return Ok(vec![Condition::Eq(value.clone())]);
    };
    let operator_keys = map.keys().filter(|key| key.starts_with('$')).count();
    if operator_keys == 0 {
        return Ok(vec![Condition::Eq(value.clone())]);
    }
    if operator_keys != map.len() {
        return Err(CompileError::MixedOperatorObject {
            field: field.to_string(),
        });
    }
    map.iter().map(|(operator, operand)| Condition::parse(field, operator, operand)).collect()
}

// ============================================================================
// SECTION: Compilation
// ============================================================================

/// Compiles one condition against a field expression.
fn compile_condition(
    expression: &str,
    cast_numeric: bool,
    condition: &Condition,
    params: &mut Vec<SqlParam>,
) -> String {
    match condition {
        Condition::Eq(Value::Null) => format!("{expression} IS NULL"),
        Condition::Ne(Value::Null) => format!("{expression} IS NOT NULL"),
        Condition::Eq(value) => {
            params.push(SqlParam::from_json(value));
            format!("{expression} = ?")
        }
        Condition::Ne(value) => {
            params.push(SqlParam::from_json(value));
            format!("{expression} != ?")
        }
        Condition::Gt(value) => compile_range(expression, cast_numeric, ">", value, params),
        Condition::Gte(value) => compile_range(expression, cast_numeric, ">=", value, params),
        Condition::Lt(value) => compile_range(expression, cast_numeric, "<", value, params),
        Condition::Lte(value) => compile_range(expression, cast_numeric, "<=", value, params),
        Condition::In(items) => compile_membership(expression, "IN", MATCH_NOTHING, items, params),
        Condition::Nin(items) => {
            compile_membership(expression, "NOT IN", MATCH_EVERYTHING, items, params)
        }
        Condition::Exists(true) => format!("{expression} IS NOT NULL"),
        Condition::Exists(false) => format!("{expression} IS NULL"),
        Condition::Regex(pattern) => {
            params.push(SqlParam::Text(regex_to_like(pattern)));
            format!("{expression} LIKE ? ESCAPE '{LIKE_ESCAPE}'")
        }
    }
}

/// Compiles a range comparison, casting body values for numeric operands.
fn compile_range(
    expression: &str,
    cast_numeric: bool,
    operator: &str,
    value: &Value,
    params: &mut Vec<SqlParam>,
) -> String {
    if let Some(number) = SqlParam::numeric(value) {
        params.push(number);
        if cast_numeric {
            return format!("CAST({expression} AS REAL) {operator} ?");
        }
        return format!("{expression} {operator} ?");
    }
    params.push(SqlParam::from_json(value));
    format!("{expression} {operator} ?")
}

/// Compiles `IN`/`NOT IN` with one placeholder per element.
fn compile_membership(
    expression: &str,
    keyword: &str,
    empty: &str,
    items: &[Value],
    params: &mut Vec<SqlParam>,
) -> String {
    if items.is_empty() {
        return empty.to_string();
    }
    params.extend(items.iter().map(SqlParam::from_json));
    let placeholders = vec!["?"; items.len()].join(", ");
    format!("{expression} {keyword} ({placeholders})")
}

/// Translates a regular expression into a `LIKE` pattern.
///
/// `^` and `$` anchors drop the corresponding wildcard; `%`, `_`, and the
/// escape character are escaped; a backslash before punctuation is dropped.
#[must_use]
pub fn regex_to_like(pattern: &str) -> String {
    let mut body = pattern;
    let anchored_start = body.starts_with('^');
    if anchored_start {
        body = &body[1 ..];
    }
    let anchored_end = body.ends_with('$') && !body.ends_with("\\$");
    if anchored_end {
        body = &body[.. body.len() - 1];
    }
    let mut out = String::with_capacity(body.len() + 2);
    if !anchored_start {
        out.push('%');
    }
    let mut chars = body.chars().peekable();
    while let Some(ch) = chars.next() {
        let literal = if ch == '\\' {
            match chars.peek() {
                Some(next) if next.is_ascii_punctuation() => {
                    let next = *next;
                    chars.next();
                    next
                }
                _ => ch,
            }
        } else {
            ch
        };
        if matches!(literal, '%' | '_' | LIKE_ESCAPE) {
            out.push(LIKE_ESCAPE);
        }
        out.push(literal);
    }
    if !anchored_end {
        out.push('%');
    }
    out
}

// ============================================================================
// SECTION: Tests
// ============================================================================
