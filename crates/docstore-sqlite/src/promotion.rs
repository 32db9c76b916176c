// crates/docstore-sqlite/src/promotion.rs
// ============================================================================
// Module: Promoted Columns
// Description: Promotes body paths to columns and installs check triggers.
// Purpose: Keep scalar mirrors of body paths live through triggers.
// Dependencies: docstore-query, rusqlite, sha2
// ============================================================================

//! ## Overview
//! Promoting a path moves it through four steps inside one transaction:
//! column added, sync triggers installed, existing rows back-filled, and the
//! registry updated. Any failure except the back-fill rolls every step back.
//! A failed back-fill is logged and the promotion continues; documents
//! written afterwards are synchronized by the triggers.
//!
//! Check constraints are `BEFORE INSERT` / `BEFORE UPDATE OF data` trigger
//! pairs raising `ABORT` with a message that embeds the expression.
//! Trigger names derive from a digest of the expression, so re-registering
//! the same expression replaces its triggers and distinct expressions on one
//! path accumulate.

use std::time::Instant;

use docstore_query::CompileError;
use docstore_query::FieldPath;
use docstore_query::TableName;
use docstore_query::path::BODY_COLUMN;
use docstore_query::path::SYSTEM_COLUMNS;
use docstore_query::path::escape_literal;
use docstore_query::path::extract_expression;
use docstore_query::path::is_reserved_field;
use docstore_query::path::quote_identifier;
use docstore_query::raw::rewrite_field_references;
use docstore_query::sort::INSERTION_ORDER_KEY;
use sha2::Digest;
use sha2::Sha256;

use crate::error::DocStoreError;
use crate::events::StoreEvent;
use crate::events::StoreEventKind;
use crate::schema::CheckConstraint;
use crate::schema::PromotedColumn;
use crate::schema::column_exists;
use crate::schema::list_checks;
use crate::schema::promoted_path_for_column;
use crate::schema::record_check;
use crate::schema::record_promotion;
use crate::session::Session;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Options for path promotion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PromoteOptions {
    /// Back the column with a unique index.
    pub unique: bool,
}

impl PromoteOptions {
    /// Options requesting a unique index.
    #[must_use]
    pub const fn unique() -> Self {
        Self {
            unique: true,
        }
    }
}

/// Hex digits of the expression digest used in check trigger names.
const CHECK_DIGEST_LENGTH: usize = 12;

// ============================================================================
// SECTION: Promotion
// ============================================================================

/// Promotes one path and logs the completed promotion.
pub(crate) fn promote(
    session: &mut Session,
    table: &TableName,
    path: &FieldPath,
    options: PromoteOptions,
) -> Result<PromotedColumn, DocStoreError> {
    let started = Instant::now();
    let column =
        session.transaction(|session| promote_path(session, table, path, options.unique))?;
    log_promotion(session, table, &column, started);
    Ok(column)
}

/// Promotes several paths under one composite index.
pub(crate) fn promote_compound(
    session: &mut Session,
    table: &TableName,
    paths: &[FieldPath],
    options: PromoteOptions,
) -> Result<Vec<PromotedColumn>, DocStoreError> {
    if options.unique && paths.len() > 1 {
        let joined: Vec<&str> = paths.iter().map(FieldPath::as_str).collect();
        return Err(DocStoreError::CompoundUniqueNotSupported {
            paths: joined.join(", "),
        });
    }
    let started = Instant::now();
    let columns = session.transaction(|session| {
        let mut columns = Vec::with_capacity(paths.len());
        for path in paths {
            columns.push(promote_path(session, table, path, options.unique)?);
        }
        if columns.len() > 1 {
            let names: Vec<&str> = columns.iter().map(|column| column.column.as_str()).collect();
            let quoted: Vec<String> = names.iter().map(|name| quote_identifier(name)).collect();
            let index = quote_identifier(&format!("{table}__{}__idx", names.join("__")));
            session.connection()?.execute_batch(&format!(
                "CREATE INDEX IF NOT EXISTS {index} ON {} ({})",
                table.quoted(),
                quoted.join(", ")
            ))?;
        }
        Ok(columns)
    })?;
    for column in &columns {
        log_promotion(session, table, column, started);
    }
    Ok(columns)
}

/// Runs the promotion steps for one path; the caller owns the transaction.
fn promote_path(
    session: &mut Session,
    table: &TableName,
    path: &FieldPath,
    unique: bool,
) -> Result<PromotedColumn, DocStoreError> {
    let column = target_column(path)?;
    let connection = session.connection()?;
    if let Some(existing) = promoted_path_for_column(connection, table, &column)?
        && existing != path.as_str()
    {
        return Err(DocStoreError::Invalid(format!(
            "column {column} already mirrors path {existing}"
        )));
    }
    let quoted_column = quote_identifier(&column);
    if !column_exists(connection, table, &column)? {
        connection.execute_batch(&format!(
            "ALTER TABLE {} ADD COLUMN {quoted_column}",
            table.quoted()
        ))?;
    }
    connection.execute_batch(&sync_trigger_sql(table, path, &column))?;

    let backfill = format!(
        "UPDATE {} SET {quoted_column} = {}",
        table.quoted(),
        extract_expression(BODY_COLUMN, path)
    );
    if let Err(err) = session.transaction(|session| {
        session.connection()?.execute_batch(&backfill)?;
        Ok(())
    }) {
        session.events().record(
            &StoreEvent::new(StoreEventKind::BackfillFailed)
                .with_table(table.as_str())
                .with_path(path.as_str())
                .with_message(err.to_string()),
        );
    }

    let connection = session.connection()?;
    let index = if unique {
        format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({quoted_column})",
            quote_identifier(&format!("{table}__{column}__uniq")),
            table.quoted()
        )
    } else {
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({quoted_column})",
            quote_identifier(&format!("{table}__{column}__idx")),
            table.quoted()
        )
    };
    connection.execute_batch(&index)?;
    record_promotion(connection, table, path, unique)
}

/// Returns the column for `path`, rejecting reserved targets.
fn target_column(path: &FieldPath) -> Result<String, DocStoreError> {
    if path.segments().first().is_some_and(|head| is_reserved_field(head)) {
        return Err(CompileError::ProtectedField {
            field: path.to_string(),
        }
        .into());
    }
    let column = path.column_name();
    let collides = SYSTEM_COLUMNS
        .iter()
        .chain(std::iter::once(&INSERTION_ORDER_KEY))
        .any(|reserved| reserved.eq_ignore_ascii_case(&column));
    if collides {
        return Err(CompileError::InvalidFieldPath {
            path: path.to_string(),
            reason: format!("column name {column} is reserved"),
        }
        .into());
    }
    Ok(column)
}

/// Returns the statements replacing the insert/update sync triggers.
fn sync_trigger_sql(table: &TableName, path: &FieldPath, column: &str) -> String {
    let copy = format!(
        "UPDATE {} SET {} = {} WHERE {INSERTION_ORDER_KEY} = NEW.{INSERTION_ORDER_KEY};",
        table.quoted(),
        quote_identifier(column),
        extract_expression(&format!("NEW.{BODY_COLUMN}"), path)
    );
    let insert = quote_identifier(&format!("{table}__{column}__sync_insert"));
    let update = quote_identifier(&format!("{table}__{column}__sync_update"));
    format!(
        "DROP TRIGGER IF EXISTS {insert};
         DROP TRIGGER IF EXISTS {update};
         CREATE TRIGGER {insert} AFTER INSERT ON {table_q} FOR EACH ROW BEGIN {copy} END;
         CREATE TRIGGER {update} AFTER UPDATE OF {BODY_COLUMN} ON {table_q} FOR EACH ROW BEGIN \
         {copy} END;",
        table_q = table.quoted()
    )
}

/// Records a completed promotion event.
fn log_promotion(session: &Session, table: &TableName, column: &PromotedColumn, started: Instant) {
    let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    session.events().record(
        &StoreEvent::new(StoreEventKind::PromotionCompleted)
            .with_table(table.as_str())
            .with_path(column.path.as_str())
            .with_message(if column.unique { "unique" } else { "indexed" })
            .with_duration_ms(elapsed),
    );
}

// ============================================================================
// SECTION: Check Constraints
// ============================================================================

/// Installs (or replaces) the check trigger pair for `expression`.
pub(crate) fn add_check_constraint(
    session: &mut Session,
    table: &TableName,
    path: &FieldPath,
    expression: &str,
) -> Result<CheckConstraint, DocStoreError> {
    let expression = expression.trim();
    if expression.is_empty() {
        return Err(DocStoreError::Invalid("check expression must not be empty".to_string()));
    }
    if expression.contains('?') {
        return Err(DocStoreError::Invalid(
            "check expressions cannot bind parameters".to_string(),
        ));
    }
    let column = target_column(path)?;
    let name = format!("{table}__{column}__check_{}", expression_digest(expression));
    let condition = rewrite_field_references(expression, &format!("NEW.{BODY_COLUMN}"));
    let message =
        escape_literal(&format!("check constraint failed on {table}.{path}: {expression}"));
    let insert = quote_identifier(&format!("{name}__insert"));
    let update = quote_identifier(&format!("{name}__update"));
    let sql = format!(
        "DROP TRIGGER IF EXISTS {insert};
         DROP TRIGGER IF EXISTS {update};
         CREATE TRIGGER {insert} BEFORE INSERT ON {table_q} FOR EACH ROW WHEN NOT ({condition}) \
         BEGIN SELECT RAISE(ABORT, '{message}'); END;
         CREATE TRIGGER {update} BEFORE UPDATE OF {BODY_COLUMN} ON {table_q} FOR EACH ROW WHEN \
         NOT ({condition}) BEGIN SELECT RAISE(ABORT, '{message}'); END;",
        table_q = table.quoted()
    );
    let constraint = session.transaction(|session| {
        let connection = session.connection()?;
        connection.execute_batch(&sql)?;
        record_check(connection, table, &name, path, expression)?;
        list_checks(connection, table)?
            .into_iter()
            .find(|check| check.name == name)
            .ok_or_else(|| DocStoreError::Invalid(format!("check constraint {name} not recorded")))
    })?;
    session.events().record(
        &StoreEvent::new(StoreEventKind::CheckConstraintInstalled)
            .with_table(table.as_str())
            .with_path(path.as_str())
            .with_message(expression),
    );
    Ok(constraint)
}

/// Returns a short lowercase hex digest of `expression`.
fn expression_digest(expression: &str) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut hasher = Sha256::new();
    hasher.update(expression.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(CHECK_DIGEST_LENGTH);
    for byte in digest.iter().take(CHECK_DIGEST_LENGTH / 2) {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]
mod tests {
    use docstore_query::FieldPath;

    use super::expression_digest;
    use super::target_column;

    #[test]
    fn digest_is_stable_and_short() {
        assert_eq!(expression_digest("age >= 18"), expression_digest("age >= 18"));
        assert_ne!(expression_digest("age >= 18"), expression_digest("age >= 21"));
        assert_eq!(expression_digest("age >= 18").len(), 12);
    }

    #[test]
    fn reserved_targets_are_rejected() {
        for raw in ["_id", "created_at", "data", "rowid", "id"] {
            let path = FieldPath::parse(raw).unwrap();
            assert!(target_column(&path).is_err(), "{raw} should be rejected");
        }
        let nested = FieldPath::parse("address.city").unwrap();
        assert_eq!(target_column(&nested).ok().as_deref(), Some("address__city"));
    }
}
