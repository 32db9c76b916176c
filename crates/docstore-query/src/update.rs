// crates/docstore-query/src/update.rs
// ============================================================================
// Module: Update Compiler
// Description: `$set` / `$unset` / `$inc` documents and whole-document updates.
// Purpose: Compile updates to SQL or apply them to decoded documents.
// Dependencies: crate::{error, path, value}, serde_json
// ============================================================================

//! ## Overview
//! An update document is either operator form (`$set`, `$unset`, `$inc`,
//! freely combined) or a plain object that replaces the body wholesale.
//! Operator updates support two strategies:
//! - [`UpdateOperators::compile_in_place`] yields one `json_set`/`json_remove`
//!   expression for a single `UPDATE` statement.
//! - [`UpdateDocument::apply`] mutates a decoded body in memory, for the
//!   fetch-modify-rewrite path used when promoted columns are affected.
//!
//! Both share the same semantics: `$set` creates intermediate objects,
//! `$unset` removes the leaf if present, `$inc` treats a missing value as 0.
//! `json_set` would silently skip a write through a scalar or coerce a
//! non-numeric increment target, so [`UpdateOperators::guards`] lists the
//! per-row conditions under which the in-memory path fails; the in-place
//! path checks them before writing and raises the same [`ApplyError`].

use serde_json::Map;
use serde_json::Number;
use serde_json::Value;

use crate::error::ApplyError;
use crate::error::CompileError;
use crate::path::BODY_COLUMN;
use crate::path::FieldPath;
use crate::path::extract_expression;
use crate::path::is_reserved_field;
use crate::value::SqlParam;

// ============================================================================
// SECTION: Types
// ============================================================================

/// A parsed update document.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateDocument {
    /// Operator form.
    Operators(UpdateOperators),
    /// Whole-document replacement.
    Replace(Map<String, Value>),
}

/// Operator-form update.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdateOperators {
    /// `$set` entries in document order.
    pub set: Vec<(FieldPath, Value)>,
    /// `$unset` paths in document order.
    pub unset: Vec<FieldPath>,
    /// `$inc` entries in document order; values are numbers.
    pub inc: Vec<(FieldPath, Value)>,
}

/// A single compiled `json_set` argument pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    /// Target path.
    pub path: FieldPath,
    /// Value expression containing exactly one placeholder.
    pub expression: String,
    /// Bound value.
    pub param: SqlParam,
}

/// A row condition under which an operator update cannot be applied.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateGuard {
    /// Predicate over the body column; true for a row that cannot take the update.
    pub violation: String,
    /// Parameters in placeholder order.
    pub params: Vec<SqlParam>,
    /// Error raised for a violating row.
    pub failure: ApplyError,
}

/// A compiled in-place body rewrite.
#[derive(Debug, Clone, PartialEq)]
pub struct InPlaceUpdate {
    /// Expression producing the new body.
    pub body_expression: String,
    /// Parameters in placeholder order.
    pub params: Vec<SqlParam>,
}

// ============================================================================
// SECTION: Parsing
// ============================================================================

impl UpdateDocument {
    /// Parses an update document.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError`] for non-object or empty updates, unknown
    /// operators, reserved targets, malformed operands, or overlapping paths.
    pub fn parse(update: &Value) -> Result<Self, CompileError> {
        let Value::Object(map) = update else {
            return Err(CompileError::NotAnObject {
                context: "update",
            });
        };
        if map.is_empty() {
            return Err(CompileError::EmptyUpdate);
        }
        let operator_keys = map.keys().filter(|key| key.starts_with('$')).count();
        if operator_keys == 0 {
            if let Some(field) = map.keys().find(|key| is_reserved_field(key)) {
                return Err(CompileError::ProtectedField {
                    field: field.clone(),
                });
            }
            return Ok(Self::Replace(map.clone()));
        }
        if operator_keys != map.len() {
            return Err(CompileError::MixedOperatorObject {
                field: "update document".to_string(),
            });
        }
        let mut operators = UpdateOperators::default();
        for (operator, operand) in map {
            match operator.as_str() {
                "$set" => {
                    for (path, value) in operand_object(operator, operand)? {
                        operators.set.push((update_path(path)?, value.clone()));
                    }
                }
                "$unset" => operators.unset.extend(parse_unset(operand)?),
                "$inc" => {
                    for (path, value) in operand_object(operator, operand)? {
                        if !value.is_number() {
                            return Err(CompileError::InvalidOperand {
                                field: path.clone(),
                                operator: operator.clone(),
                                reason: "increment must be a number".to_string(),
                            });
                        }
                        operators.inc.push((update_path(path)?, value.clone()));
                    }
                }
                _ => {
                    return Err(CompileError::UnknownUpdateOperator {
                        operator: operator.clone(),
                    });
                }
            }
        }
        if operators.is_empty() {
            return Err(CompileError::EmptyUpdate);
        }
        operators.ensure_disjoint()?;
        Ok(Self::Operators(operators))
    }

    /// Returns true when the update carries a non-empty `$set`.
    #[must_use]
    pub fn has_set(&self) -> bool {
        matches!(self, Self::Operators(operators) if !operators.set.is_empty())
    }

    /// Applies the update to a decoded body.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError`] when a path cannot be traversed or an increment
    /// target is not numeric.
    pub fn apply(&self, body: &mut Map<String, Value>) -> Result<(), ApplyError> {
        match self {
            Self::Replace(replacement) => {
                body.clone_from(replacement);
                Ok(())
            }
            Self::Operators(operators) => operators.apply(body),
        }
    }
}

/// Returns the operand of `$set`/`$inc` as an object.
fn operand_object<'a>(
    operator: &str,
    operand: &'a Value,
) -> Result<&'a Map<String, Value>, CompileError> {
    operand.as_object().ok_or_else(|| CompileError::InvalidOperand {
        field: operator.to_string(),
        operator: operator.to_string(),
        reason: "operand must be an object of path/value pairs".to_string(),
    })
}

/// Parses `$unset` from an object (keys are paths) or an array of paths.
fn parse_unset(operand: &Value) -> Result<Vec<FieldPath>, CompileError> {
    match operand {
        Value::Object(map) => map.keys().map(|path| update_path(path)).collect(),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str().ok_or_else(|| CompileError::InvalidOperand {
                    field: "$unset".to_string(),
                    operator: "$unset".to_string(),
                    reason: "array entries must be path strings".to_string(),
                })
            })
            .map(|path| path.and_then(update_path))
            .collect(),
        _ => Err(CompileError::InvalidOperand {
            field: "$unset".to_string(),
            operator: "$unset".to_string(),
            reason: "operand must be an object or an array of paths".to_string(),
        }),
    }
}

/// Parses an update target, rejecting reserved fields.
fn update_path(raw: &str) -> Result<FieldPath, CompileError> {
    let path = FieldPath::parse(raw)?;
    if path.segments().first().is_some_and(|head| is_reserved_field(head)) {
        return Err(CompileError::ProtectedField {
            field: raw.to_string(),
        });
    }
    Ok(path)
}

// ============================================================================
// SECTION: Operators
// ============================================================================

impl UpdateOperators {
    /// Returns true when no operator carries an entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty() && self.inc.is_empty()
    }

    /// Returns every targeted path.
    #[must_use]
    pub fn affected_paths(&self) -> Vec<&FieldPath> {
        self.set
            .iter()
            .map(|(path, _)| path)
            .chain(self.unset.iter())
            .chain(self.inc.iter().map(|(path, _)| path))
            .collect()
    }

    /// Rejects updates where two entries target overlapping paths.
    fn ensure_disjoint(&self) -> Result<(), CompileError> {
        let paths = self.affected_paths();
        for (index, path) in paths.iter().enumerate() {
            if let Some(other) = paths[index + 1 ..].iter().find(|other| path.overlaps(other)) {
                let longer = if other.segments().len() > path.segments().len() { other } else { path };
                return Err(CompileError::ConflictingUpdatePaths {
                    path: longer.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Compiles the operators into one body expression for an in-place update.
    #[must_use]
    pub fn compile_in_place(&self) -> InPlaceUpdate {
        let mut expression = BODY_COLUMN.to_string();
        if !self.unset.is_empty() {
            let paths: Vec<String> =
                self.unset.iter().map(FieldPath::json_path_literal).collect();
            expression = format!("json_remove({expression}, {})", paths.join(", "));
        }
        let mut assignments = compile_set(&self.set);
        assignments.extend(compile_inc(&self.inc));
        let mut params = Vec::with_capacity(assignments.len());
        if !assignments.is_empty() {
            let pairs: Vec<String> = assignments
                .iter()
                .map(|assignment| {
                    format!("{}, {}", assignment.path.json_path_literal(), assignment.expression)
                })
                .collect();
            expression = format!("json_set({expression}, {})", pairs.join(", "));
            params.extend(assignments.into_iter().map(|assignment| assignment.param));
        }
        InPlaceUpdate {
            body_expression: expression,
            params,
        }
    }

    /// Returns the guards an in-place update must pass, in the order the
    /// in-memory path would hit them.
    #[must_use]
    pub fn guards(&self) -> Vec<UpdateGuard> {
        let mut guards = Vec::new();
        for (path, _) in &self.set {
            guards.extend(container_guards(path));
        }
        for (path, delta) in &self.inc {
            guards.extend(container_guards(path));
            guards.push(UpdateGuard {
                violation: format!(
                    "json_type({BODY_COLUMN}, {}) NOT IN ('integer', 'real')",
                    path.json_path_literal()
                ),
                params: Vec::new(),
                failure: ApplyError::NonNumericIncrement {
                    path: path.to_string(),
                },
            });
            if let Some(guard) = overflow_guard(path, delta) {
                guards.push(guard);
            }
        }
        guards
    }

    /// Applies the operators to a decoded body.
    ///
    /// # Errors
    ///
    /// See [`UpdateDocument::apply`].
    pub fn apply(&self, body: &mut Map<String, Value>) -> Result<(), ApplyError> {
        for path in &self.unset {
            unset_path(body, path);
        }
        for (path, value) in &self.set {
            set_path(body, path, value.clone())?;
        }
        for (path, delta) in &self.inc {
            increment_path(body, path, delta)?;
        }
        Ok(())
    }
}

/// Compiles `$set` pairs into `json_set` assignments.
#[must_use]
pub fn compile_set(entries: &[(FieldPath, Value)]) -> Vec<Assignment> {
    entries
        .iter()
        .map(|(path, value)| Assignment {
            path: path.clone(),
            expression: "json(?)".to_string(),
            param: SqlParam::json_text(value),
        })
        .collect()
}

/// Compiles `$inc` pairs into `json_set` assignments.
fn compile_inc(entries: &[(FieldPath, Value)]) -> Vec<Assignment> {
    entries
        .iter()
        .map(|(path, delta)| Assignment {
            path: path.clone(),
            expression: format!("COALESCE({}, 0) + ?", extract_expression(BODY_COLUMN, path)),
            param: SqlParam::numeric(delta).unwrap_or(SqlParam::Integer(0)),
        })
        .collect()
}

/// Fails rows where an ancestor of `path` holds something other than an object.
fn container_guards(path: &FieldPath) -> Vec<UpdateGuard> {
    path.ancestors()
        .into_iter()
        .filter_map(|ancestor| {
            let segment = ancestor.segments().last()?.clone();
            Some(UpdateGuard {
                violation: format!(
                    "json_type({BODY_COLUMN}, {}) <> 'object'",
                    ancestor.json_path_literal()
                ),
                params: Vec::new(),
                failure: ApplyError::NotAContainer {
                    path: path.to_string(),
                    segment,
                },
            })
        })
        .collect()
}

/// Fails rows whose stored integer would leave the `i64` range.
fn overflow_guard(path: &FieldPath, delta: &Value) -> Option<UpdateGuard> {
    let delta = delta.as_i64()?;
    let (comparison, bound) = match delta.signum() {
        1 => (">", i64::MAX - delta),
        -1 => ("<", i64::MIN - delta),
        _ => return None,
    };
    Some(UpdateGuard {
        violation: format!(
            "(json_type({BODY_COLUMN}, {literal}) = 'integer' AND {} {comparison} ?)",
            extract_expression(BODY_COLUMN, path),
            literal = path.json_path_literal(),
        ),
        params: vec![SqlParam::Integer(bound)],
        failure: ApplyError::IncrementOverflow {
            path: path.to_string(),
        },
    })
}

// ============================================================================
// SECTION: In-Memory Mutation
// ============================================================================

/// Writes `value` at `path`, creating intermediate objects.
///
/// # Errors
///
/// Returns [`ApplyError::NotAContainer`] when an intermediate value is not an
/// object.
pub fn set_path(
    body: &mut Map<String, Value>,
    path: &FieldPath,
    value: Value,
) -> Result<(), ApplyError> {
    let parent = parent_object(body, path, true)?;
    if let (Some(parent), Some(leaf)) = (parent, path.segments().last()) {
        parent.insert(leaf.clone(), value);
    }
    Ok(())
}

/// Removes the leaf at `path` if every segment exists.
pub fn unset_path(body: &mut Map<String, Value>, path: &FieldPath) {
    if let Ok(Some(parent)) = parent_object(body, path, false)
        && let Some(leaf) = path.segments().last()
    {
        parent.shift_remove(leaf);
    }
}

/// Adds `delta` to the number at `path`, treating a missing value as 0.
fn increment_path(
    body: &mut Map<String, Value>,
    path: &FieldPath,
    delta: &Value,
) -> Result<(), ApplyError> {
    let Some(parent) = parent_object(body, path, true)? else {
        return Ok(());
    };
    let Some(leaf) = path.segments().last() else {
        return Ok(());
    };
    let current = parent.get(leaf).cloned().unwrap_or_else(|| Value::from(0));
    let next = add_numbers(&current, delta, path)?;
    parent.insert(leaf.clone(), next);
    Ok(())
}

/// Adds two JSON numbers, keeping integers integral.
fn add_numbers(current: &Value, delta: &Value, path: &FieldPath) -> Result<Value, ApplyError> {
    let (Value::Number(current), Value::Number(delta)) = (current, delta) else {
        return Err(ApplyError::NonNumericIncrement {
            path: path.to_string(),
        });
    };
    if let (Some(left), Some(right)) = (current.as_i64(), delta.as_i64()) {
        return left.checked_add(right).map(Value::from).ok_or_else(|| {
            ApplyError::IncrementOverflow {
                path: path.to_string(),
            }
        });
    }
    let sum = current.as_f64().unwrap_or(0.0) + delta.as_f64().unwrap_or(0.0);
    Number::from_f64(sum).map(Value::Number).ok_or_else(|| ApplyError::IncrementOverflow {
        path: path.to_string(),
    })
}

/// Walks to the object holding the leaf of `path`.
///
/// Returns `Ok(None)` when `create` is false and a segment is missing.
fn parent_object<'a>(
    body: &'a mut Map<String, Value>,
    path: &FieldPath,
    create: bool,
) -> Result<Option<&'a mut Map<String, Value>>, ApplyError> {
    let segments = path.segments();
    let Some((_, parents)) = segments.split_last() else {
        return Ok(None);
    };
    let mut current = body;
    for segment in parents {
        if !current.contains_key(segment) {
            if !create {
                return Ok(None);
            }
            current.insert(segment.clone(), Value::Object(Map::new()));
        }
        match current.get_mut(segment) {
            Some(Value::Object(next)) => current = next,
            Some(_) if !create => return Ok(None),
            _ => {
                return Err(ApplyError::NotAContainer {
                    path: path.to_string(),
                    segment: segment.clone(),
                });
            }
        }
    }
    Ok(Some(current))
}

// ============================================================================
// SECTION: Tests
// ============================================================================
