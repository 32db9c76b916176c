// crates/docstore-query/src/statement.rs
// ============================================================================
// Module: Statement Assembly
// Description: Concatenates compiled fragments into complete statements.
// Purpose: One place where table names, predicates, and options meet.
// Dependencies: crate::{filter, path, raw, sort, update, value}
// ============================================================================

//! ## Overview
//! The filter, update, and sort compilers each produce a fragment plus its
//! parameters independently; this module joins them into a single statement
//! with parameters in placeholder order. Single-row variants pin the first
//! matching row in insertion order through a `rowid` subquery.

use crate::filter::CompiledPredicate;
use crate::filter::Filter;
use crate::path::BODY_COLUMN;
use crate::path::CREATED_AT_COLUMN;
use crate::path::FieldResolver;
use crate::path::ID_COLUMN;
use crate::path::TableName;
use crate::path::UPDATED_AT_COLUMN;
use crate::raw::RawPredicate;
use crate::sort::FindOptions;
use crate::sort::INSERTION_ORDER_KEY;
use crate::sort::compile_options;
use crate::update::UpdateGuard;
use crate::update::UpdateOperators;
use crate::value::SqlParam;

/// A complete statement ready for execution.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompiledStatement {
    /// SQL text with `?` placeholders.
    pub sql: String,
    /// Parameters in placeholder order.
    pub params: Vec<SqlParam>,
}

/// Row cardinality for mutating statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// First matching row in insertion order.
    One,
    /// Every matching row.
    Many,
}

/// Returns the projected document columns.
fn document_columns() -> String {
    format!("{ID_COLUMN}, {BODY_COLUMN}, {CREATED_AT_COLUMN}, {UPDATED_AT_COLUMN}")
}

/// Compiles `SELECT` for a parsed filter and options.
#[must_use]
pub fn compile_find(
    table: &TableName,
    filter: &Filter,
    options: &FindOptions,
    resolver: &FieldResolver,
) -> CompiledStatement {
    let predicate = filter.compile(resolver);
    CompiledStatement {
        sql: format!(
            "SELECT {} FROM {}{}{}",
            document_columns(),
            table.quoted(),
            predicate.where_clause(),
            compile_options(options, resolver)
        ),
        params: predicate.params,
    }
}

/// Compiles `SELECT` for a raw escape-hatch predicate.
#[must_use]
pub fn compile_find_raw(
    table: &TableName,
    raw: &RawPredicate,
    options: &FindOptions,
    resolver: &FieldResolver,
) -> CompiledStatement {
    CompiledStatement {
        sql: format!(
            "SELECT {} FROM {}{}{}",
            document_columns(),
            table.quoted(),
            raw.where_clause(),
            compile_options(options, resolver)
        ),
        params: raw.params.clone(),
    }
}

/// Compiles `SELECT COUNT(*)`.
#[must_use]
pub fn compile_count(
    table: &TableName,
    filter: &Filter,
    resolver: &FieldResolver,
) -> CompiledStatement {
    let predicate = filter.compile(resolver);
    CompiledStatement {
        sql: format!("SELECT COUNT(*) FROM {}{}", table.quoted(), predicate.where_clause()),
        params: predicate.params,
    }
}

/// Compiles the row-selection predicate for mutating statements.
fn target_rows(
    table: &TableName,
    predicate: &CompiledPredicate,
    cardinality: Cardinality,
) -> String {
    match cardinality {
        Cardinality::Many => predicate.where_clause(),
        Cardinality::One => format!(
            " WHERE {INSERTION_ORDER_KEY} = (SELECT {INSERTION_ORDER_KEY} FROM {}{} ORDER BY \
             {INSERTION_ORDER_KEY} ASC LIMIT 1)",
            table.quoted(),
            predicate.where_clause()
        ),
    }
}

/// Compiles `SELECT id, data` for the fetch-modify-rewrite update path.
#[must_use]
pub fn compile_select_for_update(
    table: &TableName,
    filter: &Filter,
    resolver: &FieldResolver,
    cardinality: Cardinality,
) -> CompiledStatement {
    let predicate = filter.compile(resolver);
    let limit = match cardinality {
        Cardinality::One => " LIMIT 1",
        Cardinality::Many => "",
    };
    CompiledStatement {
        sql: format!(
            "SELECT {ID_COLUMN}, {BODY_COLUMN} FROM {}{} ORDER BY {INSERTION_ORDER_KEY} ASC{limit}",
            table.quoted(),
            predicate.where_clause()
        ),
        params: predicate.params,
    }
}

/// Compiles `SELECT COUNT(*)` over the rows a mutating statement targets.
#[must_use]
pub fn compile_count_targets(
    table: &TableName,
    filter: &Filter,
    resolver: &FieldResolver,
    cardinality: Cardinality,
) -> CompiledStatement {
    let predicate = filter.compile(resolver);
    CompiledStatement {
        sql: format!(
            "SELECT COUNT(*) FROM {}{}",
            table.quoted(),
            target_rows(table, &predicate, cardinality)
        ),
        params: predicate.params,
    }
}

/// Compiles the pre-check for an in-place update.
///
/// The statement yields the index into `guards` of the first guard violated
/// by the earliest targeted row, or `-1` when every row can take the update.
/// Returns `None` when there is nothing to check.
#[must_use]
pub fn compile_update_guard(
    table: &TableName,
    filter: &Filter,
    guards: &[UpdateGuard],
    resolver: &FieldResolver,
    cardinality: Cardinality,
) -> Option<CompiledStatement> {
    if guards.is_empty() {
        return None;
    }
    let predicate = filter.compile(resolver);
    let arms: Vec<String> = guards
        .iter()
        .enumerate()
        .map(|(index, guard)| format!("WHEN {} THEN {index}", guard.violation))
        .collect();
    let mut params: Vec<SqlParam> =
        guards.iter().flat_map(|guard| guard.params.iter().cloned()).collect();
    params.extend(predicate.params.iter().cloned());
    Some(CompiledStatement {
        sql: format!(
            "SELECT COALESCE((SELECT code FROM (SELECT CASE {} END AS code, {INSERTION_ORDER_KEY} \
             AS position FROM {}{}) WHERE code IS NOT NULL ORDER BY position ASC LIMIT 1), -1)",
            arms.join(" "),
            table.quoted(),
            target_rows(table, &predicate, cardinality)
        ),
        params,
    })
}

/// Compiles a single in-place `UPDATE` from operator-form updates.
///
/// Rows whose body the update leaves unchanged are not written, so the
/// changed-row count is the number of modified documents.
#[must_use]
pub fn compile_in_place_update(
    table: &TableName,
    filter: &Filter,
    operators: &UpdateOperators,
    resolver: &FieldResolver,
    cardinality: Cardinality,
    updated_at: i64,
) -> CompiledStatement {
    let update = operators.compile_in_place();
    let predicate = filter.compile(resolver);
    let changed = format!("{BODY_COLUMN} IS NOT {}", update.body_expression);
    let selection = match cardinality {
        Cardinality::Many if predicate.is_empty() => format!(" WHERE {changed}"),
        Cardinality::Many => format!(" WHERE ({}) AND {changed}", predicate.sql),
        Cardinality::One => format!("{} AND {changed}", target_rows(table, &predicate, cardinality)),
    };
    let mut params = update.params.clone();
    params.push(SqlParam::Integer(updated_at));
    params.extend(predicate.params.iter().cloned());
    params.extend(update.params);
    CompiledStatement {
        sql: format!(
            "UPDATE {} SET {BODY_COLUMN} = {}, {UPDATED_AT_COLUMN} = ?{selection}",
            table.quoted(),
            update.body_expression,
        ),
        params,
    }
}

/// Compiles the per-row rewrite used after an in-memory update.
#[must_use]
pub fn compile_rewrite_by_id(
    table: &TableName,
    id: &str,
    body_json: String,
    updated_at: i64,
) -> CompiledStatement {
    CompiledStatement {
        sql: format!(
            "UPDATE {} SET {BODY_COLUMN} = ?, {UPDATED_AT_COLUMN} = ? WHERE {ID_COLUMN} = ?",
            table.quoted()
        ),
        params: vec![
            SqlParam::Text(body_json),
            SqlParam::Integer(updated_at),
            SqlParam::Text(id.to_string()),
        ],
    }
}

/// Compiles an `INSERT` of one document.
#[must_use]
pub fn compile_insert(
    table: &TableName,
    id: &str,
    body_json: String,
    timestamp: i64,
) -> CompiledStatement {
    CompiledStatement {
        sql: format!(
            "INSERT INTO {} ({}) VALUES (?, ?, ?, ?)",
            table.quoted(),
            document_columns()
        ),
        params: vec![
            SqlParam::Text(id.to_string()),
            SqlParam::Text(body_json),
            SqlParam::Integer(timestamp),
            SqlParam::Integer(timestamp),
        ],
    }
}

/// Compiles `DELETE`.
#[must_use]
pub fn compile_delete(
    table: &TableName,
    filter: &Filter,
    resolver: &FieldResolver,
    cardinality: Cardinality,
) -> CompiledStatement {
    let predicate = filter.compile(resolver);
    CompiledStatement {
        sql: format!(
            "DELETE FROM {}{}",
            table.quoted(),
            target_rows(table, &predicate, cardinality)
        ),
        params: predicate.params,
    }
}

/// Compiles the `CREATE TABLE IF NOT EXISTS` for a document table.
#[must_use]
pub fn compile_create_table(table: &TableName) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (
            {ID_COLUMN} TEXT PRIMARY KEY NOT NULL,
            {BODY_COLUMN} TEXT NOT NULL CHECK (json_valid({BODY_COLUMN})),
            {CREATED_AT_COLUMN} INTEGER NOT NULL,
            {UPDATED_AT_COLUMN} INTEGER NOT NULL
        )",
        table.quoted()
    )
}
