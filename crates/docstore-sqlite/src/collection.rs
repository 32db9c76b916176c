// crates/docstore-sqlite/src/collection.rs
// ============================================================================
// Module: Collections
// Description: Document CRUD over one table, bound to a session.
// Purpose: Run compiled filters, updates, and options against SQLite.
// Dependencies: docstore-query, serde_json
// ============================================================================

//! ## Overview
//! A [`Collection`] borrows its [`Session`] mutably, so every statement it
//! issues shares the session's connection and transaction depth. Filters and
//! updates are parsed before any statement runs; a malformed document never
//! reaches the engine.
//!
//! Updates use one of two strategies. Operator updates that do not touch a
//! promoted path run as a single in-place `UPDATE`, preceded by a guard
//! query that rejects rows the update cannot apply to. Whole-document
//! updates and updates touching a promoted path decode the matching bodies,
//! apply the update in memory, and rewrite changed rows by id inside one
//! transaction. Either way `matched` counts targeted rows, `modified` counts
//! rows whose body changed, and a failing row aborts the whole update.

use docstore_query::CompileError;
use docstore_query::FieldPath;
use docstore_query::FieldRef;
use docstore_query::FieldResolver;
use docstore_query::Filter;
use docstore_query::FindOptions;
use docstore_query::RawPredicate;
use docstore_query::TableName;
use docstore_query::UpdateDocument;
use docstore_query::UpdateOperators;
use docstore_query::path::ID_FIELDS;
use docstore_query::path::is_reserved_field;
use docstore_query::statement::Cardinality;
use docstore_query::statement::compile_count;
use docstore_query::statement::compile_count_targets;
use docstore_query::statement::compile_delete;
use docstore_query::statement::compile_find;
use docstore_query::statement::compile_find_raw;
use docstore_query::statement::compile_in_place_update;
use docstore_query::statement::compile_insert;
use docstore_query::statement::compile_rewrite_by_id;
use docstore_query::statement::compile_select_for_update;
use docstore_query::statement::compile_update_guard;
use docstore_query::update::set_path;
use serde_json::Map;
use serde_json::Value;

use crate::error::DocStoreError;
use crate::promotion;
use crate::promotion::PromoteOptions;
use crate::schema::CheckConstraint;
use crate::schema::PromotedColumn;
use crate::schema::list_checks;
use crate::schema::list_promoted;
use crate::schema::load_resolver;
use crate::schema::unix_millis;
use crate::session::Session;

// ============================================================================
// SECTION: Types
// ============================================================================

/// A stored document with its system columns.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    /// Document identifier.
    pub id: String,
    /// Document body without the identifier.
    pub body: Map<String, Value>,
    /// Insertion time (unix milliseconds).
    pub created_at: i64,
    /// Last update time (unix milliseconds).
    pub updated_at: i64,
}

impl StoredDocument {
    /// Returns the body value at a dotted path.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.body.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Converts the document into a JSON object with `_id` first.
    #[must_use]
    pub fn into_value(self) -> Value {
        let mut object = Map::with_capacity(self.body.len() + 1);
        object.insert("_id".to_string(), Value::String(self.id));
        object.extend(self.body);
        Value::Object(object)
    }
}

/// Options for update operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Insert a document synthesized from the filter when nothing matches.
    pub upsert: bool,
}

impl UpdateOptions {
    /// Options with upsert enabled.
    #[must_use]
    pub const fn upsert() -> Self {
        Self {
            upsert: true,
        }
    }
}

/// Outcome of an update operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateResult {
    /// Rows matched by the filter.
    pub matched: usize,
    /// Rows whose body was rewritten.
    pub modified: usize,
    /// Identifier of the inserted document, when an upsert inserted one.
    pub upserted_id: Option<String>,
}

/// A document collection bound to a session.
pub struct Collection<'s> {
    /// Session issuing every statement.
    session: &'s mut Session,
    /// Backing table.
    table: TableName,
    /// Field resolver reflecting the promotion registry.
    resolver: FieldResolver,
}

/// A validated document awaiting insertion.
struct PreparedInsert {
    /// Identifier, caller-supplied or generated.
    id: String,
    /// Body without identifier keys.
    body: Map<String, Value>,
}

// ============================================================================
// SECTION: Collection
// ============================================================================

impl<'s> Collection<'s> {
    /// Binds a collection to a session.
    pub(crate) fn new(session: &'s mut Session, table: TableName, resolver: FieldResolver) -> Self {
        Self {
            session,
            table,
            resolver,
        }
    }

    /// Returns the table name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.table.as_str()
    }

    /// Returns the underlying session.
    pub fn session(&mut self) -> &mut Session {
        &mut *self.session
    }

    // ------------------------------------------------------------------------
    // Inserts
    // ------------------------------------------------------------------------

    /// Inserts one document and returns its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`DocStoreError::Invalid`] for non-object documents or bad
    /// identifiers, [`DocStoreError::Compile`] when a timestamp field is
    /// supplied, and [`DocStoreError::ConstraintViolation`] when the id or a
    /// unique or check constraint rejects the row.
    pub fn insert_one(&mut self, document: &Value) -> Result<String, DocStoreError> {
        let prepared = self.prepare_insert(document)?;
        insert_body(self.session, &self.table, &prepared.id, &prepared.body)?;
        Ok(prepared.id)
    }

    /// Inserts documents in one transaction and returns their identifiers.
    ///
    /// Every document is validated before the first row is written.
    ///
    /// # Errors
    ///
    /// See [`Collection::insert_one`]. On error no document is inserted.
    pub fn insert_many(&mut self, documents: &[Value]) -> Result<Vec<String>, DocStoreError> {
        let prepared = documents
            .iter()
            .map(|document| self.prepare_insert(document))
            .collect::<Result<Vec<_>, _>>()?;
        let table = &self.table;
        self.session.transaction(|session| {
            let mut ids = Vec::with_capacity(prepared.len());
            for PreparedInsert {
                id,
                body,
            } in prepared
            {
                insert_body(session, table, &id, &body)?;
                ids.push(id);
            }
            Ok(ids)
        })
    }

    /// Validates a document and splits out its identifier.
    fn prepare_insert(&self, document: &Value) -> Result<PreparedInsert, DocStoreError> {
        let Value::Object(document) = document else {
            return Err(DocStoreError::Invalid("document must be a JSON object".to_string()));
        };
        let mut body = document.clone();
        let mut supplied = Vec::new();
        for field in ID_FIELDS {
            if let Some(value) = body.shift_remove(field) {
                supplied.push(value);
            }
        }
        if supplied.len() > 1 {
            return Err(DocStoreError::Invalid(
                "document carries both `_id` and `id`".to_string(),
            ));
        }
        if let Some(field) = body.keys().find(|key| is_reserved_field(key)) {
            return Err(CompileError::ProtectedField {
                field: field.clone(),
            }
            .into());
        }
        let id = match supplied.first() {
            Some(value) => identifier_from_value(value)?,
            None => self.session.ids().next_id(),
        };
        Ok(PreparedInsert {
            id,
            body,
        })
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Returns documents matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`DocStoreError::Compile`] for malformed filters.
    pub fn find(
        &self,
        filter: &Value,
        options: &FindOptions,
    ) -> Result<Vec<StoredDocument>, DocStoreError> {
        let filter = Filter::parse(filter)?;
        self.session.query_documents(&compile_find(&self.table, &filter, options, &self.resolver))
    }

    /// Returns the first document matching `filter` in insertion order.
    ///
    /// # Errors
    ///
    /// See [`Collection::find`].
    pub fn find_one(&self, filter: &Value) -> Result<Option<StoredDocument>, DocStoreError> {
        Ok(self.find(filter, &FindOptions::new().limit(1))?.into_iter().next())
    }

    /// Returns documents matching a raw SQL predicate.
    ///
    /// The predicate is not validated beyond parameter binding; bare field
    /// names are rewritten into body extractions.
    ///
    /// # Errors
    ///
    /// Returns [`DocStoreError::Db`] when the engine rejects the fragment.
    pub fn find_raw(
        &self,
        predicate: &RawPredicate,
        options: &FindOptions,
    ) -> Result<Vec<StoredDocument>, DocStoreError> {
        self.session
            .query_documents(&compile_find_raw(&self.table, predicate, options, &self.resolver))
    }

    /// Counts documents matching `filter`.
    ///
    /// # Errors
    ///
    /// See [`Collection::find`].
    pub fn count(&self, filter: &Value) -> Result<u64, DocStoreError> {
        let filter = Filter::parse(filter)?;
        let count = self.session.query_scalar(&compile_count(&self.table, &filter, &self.resolver))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    // ------------------------------------------------------------------------
    // Updates
    // ------------------------------------------------------------------------

    /// Updates the first matching document in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`DocStoreError::Compile`] for malformed documents,
    /// [`DocStoreError::Apply`] when a stored body cannot take the update, and
    /// [`DocStoreError::ConstraintViolation`] when a constraint rejects it.
    pub fn update_one(
        &mut self,
        filter: &Value,
        update: &Value,
        options: UpdateOptions,
    ) -> Result<UpdateResult, DocStoreError> {
        let filter = Filter::parse(filter)?;
        let update = UpdateDocument::parse(update)?;
        self.run_update(&filter, &update, Cardinality::One, options)
    }

    /// Updates every matching document. The update must carry `$set`.
    ///
    /// # Errors
    ///
    /// Returns [`DocStoreError::MissingSetOperator`] without touching any row
    /// when `$set` is absent; otherwise see [`Collection::update_one`].
    pub fn update_many(
        &mut self,
        filter: &Value,
        update: &Value,
        options: UpdateOptions,
    ) -> Result<UpdateResult, DocStoreError> {
        let filter = Filter::parse(filter)?;
        let update = UpdateDocument::parse(update)?;
        if !update.has_set() {
            return Err(DocStoreError::MissingSetOperator);
        }
        self.run_update(&filter, &update, Cardinality::Many, options)
    }

    /// Replaces the body of the first matching document.
    ///
    /// # Errors
    ///
    /// Returns [`DocStoreError::Invalid`] when `replacement` uses update
    /// operators; otherwise see [`Collection::update_one`].
    pub fn replace_one(
        &mut self,
        filter: &Value,
        replacement: &Value,
        options: UpdateOptions,
    ) -> Result<UpdateResult, DocStoreError> {
        let filter = Filter::parse(filter)?;
        let replacement = UpdateDocument::parse(replacement)?;
        if !matches!(replacement, UpdateDocument::Replace(_)) {
            return Err(DocStoreError::Invalid(
                "replacement document must not contain update operators".to_string(),
            ));
        }
        self.run_update(&filter, &replacement, Cardinality::One, options)
    }

    /// Runs a parsed update inside one transaction.
    fn run_update(
        &mut self,
        filter: &Filter,
        update: &UpdateDocument,
        cardinality: Cardinality,
        options: UpdateOptions,
    ) -> Result<UpdateResult, DocStoreError> {
        let table = &self.table;
        let resolver = &self.resolver;
        self.session.transaction(|session| {
            let in_place = match update {
                UpdateDocument::Operators(operators) => operators
                    .affected_paths()
                    .into_iter()
                    .all(|path| !resolver.touches_promoted(path))
                    .then_some(operators),
                UpdateDocument::Replace(_) => None,
            };
            let (matched, modified) = match in_place {
                Some(operators) => {
                    update_in_place(session, table, filter, operators, resolver, cardinality)?
                }
                None => rewrite_matching(session, table, filter, update, resolver, cardinality)?,
            };
            let upserted_id = if matched == 0 && options.upsert {
                Some(upsert(session, table, filter, update)?)
            } else {
                None
            };
            Ok(UpdateResult {
                matched,
                modified,
                upserted_id,
            })
        })
    }

    // ------------------------------------------------------------------------
    // Deletes
    // ------------------------------------------------------------------------

    /// Deletes the first matching document; returns the removed count.
    ///
    /// # Errors
    ///
    /// Returns [`DocStoreError::Compile`] for malformed filters.
    pub fn delete_one(&mut self, filter: &Value) -> Result<usize, DocStoreError> {
        self.delete(filter, Cardinality::One)
    }

    /// Deletes every matching document; returns the removed count.
    ///
    /// # Errors
    ///
    /// Returns [`DocStoreError::Compile`] for malformed filters.
    pub fn delete_many(&mut self, filter: &Value) -> Result<usize, DocStoreError> {
        self.delete(filter, Cardinality::Many)
    }

    /// Shared delete path.
    fn delete(&mut self, filter: &Value, cardinality: Cardinality) -> Result<usize, DocStoreError> {
        let filter = Filter::parse(filter)?;
        self.session.execute(&compile_delete(&self.table, &filter, &self.resolver, cardinality))
    }

    // ------------------------------------------------------------------------
    // Promotion
    // ------------------------------------------------------------------------

    /// Promotes a body path to a column kept in sync by triggers.
    ///
    /// Promoting an already promoted path only adds uniqueness when newly
    /// requested.
    ///
    /// # Errors
    ///
    /// Returns [`DocStoreError::Compile`] for invalid or reserved paths,
    /// [`DocStoreError::ConstraintViolation`] when existing rows violate a
    /// requested unique index, or a database error. A failed promotion leaves
    /// no column, trigger, or registry entry behind.
    pub fn promote(
        &mut self,
        path: &str,
        options: PromoteOptions,
    ) -> Result<PromotedColumn, DocStoreError> {
        let path = FieldPath::parse(path)?;
        let column = promotion::promote(self.session, &self.table, &path, options)?;
        self.reload_resolver()?;
        Ok(column)
    }

    /// Promotes several paths and indexes them together.
    ///
    /// # Errors
    ///
    /// Returns [`DocStoreError::CompoundUniqueNotSupported`] before any
    /// schema change when `unique` is requested for more than one path;
    /// otherwise see [`Collection::promote`].
    pub fn promote_compound(
        &mut self,
        paths: &[&str],
        options: PromoteOptions,
    ) -> Result<Vec<PromotedColumn>, DocStoreError> {
        let paths = paths.iter().map(|path| FieldPath::parse(path)).collect::<Result<Vec<_>, _>>()?;
        let columns = promotion::promote_compound(self.session, &self.table, &paths, options)?;
        self.reload_resolver()?;
        Ok(columns)
    }

    /// Installs a check constraint evaluated before every insert and body update.
    ///
    /// # Errors
    ///
    /// Returns [`DocStoreError::Invalid`] for empty or parameterized
    /// expressions, or a database error when the trigger cannot be created.
    pub fn add_check_constraint(
        &mut self,
        path: &str,
        expression: &str,
    ) -> Result<CheckConstraint, DocStoreError> {
        let path = FieldPath::parse(path)?;
        promotion::add_check_constraint(self.session, &self.table, &path, expression)
    }

    /// Returns the promotion registry for this collection.
    ///
    /// # Errors
    ///
    /// Returns a database error when the registry cannot be read.
    pub fn promoted_columns(&self) -> Result<Vec<PromotedColumn>, DocStoreError> {
        list_promoted(self.session.connection()?, &self.table)
    }

    /// Returns the check constraints registered for this collection.
    ///
    /// # Errors
    ///
    /// Returns a database error when the registry cannot be read.
    pub fn check_constraints(&self) -> Result<Vec<CheckConstraint>, DocStoreError> {
        list_checks(self.session.connection()?, &self.table)
    }

    /// Rebuilds the resolver from the registry.
    fn reload_resolver(&mut self) -> Result<(), DocStoreError> {
        self.resolver = load_resolver(self.session.connection()?, &self.table)?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Converts a supplied identifier into its stored string form.
fn identifier_from_value(value: &Value) -> Result<String, DocStoreError> {
    match value {
        Value::String(id) if !id.is_empty() => Ok(id.clone()),
        Value::Number(number) if number.is_i64() || number.is_u64() => Ok(number.to_string()),
        _ => Err(DocStoreError::Invalid(
            "document identifier must be a non-empty string or an integer".to_string(),
        )),
    }
}

/// Inserts one validated body.
fn insert_body(
    session: &Session,
    table: &TableName,
    id: &str,
    body: &Map<String, Value>,
) -> Result<(), DocStoreError> {
    let statement = compile_insert(table, id, serde_json::to_string(body)?, unix_millis());
    session.execute(&statement)?;
    Ok(())
}

/// Fetch-modify-rewrite: returns `(matched, modified)`.
fn rewrite_matching(
    session: &Session,
    table: &TableName,
    filter: &Filter,
    update: &UpdateDocument,
    resolver: &FieldResolver,
    cardinality: Cardinality,
) -> Result<(usize, usize), DocStoreError> {
    let rows = session.query_bodies(&compile_select_for_update(table, filter, resolver, cardinality))?;
    let matched = rows.len();
    let mut modified = 0;
    let now = unix_millis();
    for (id, mut body) in rows {
        let before = body.clone();
        update.apply(&mut body)?;
        if body == before {
            continue;
        }
        session.execute(&compile_rewrite_by_id(table, &id, serde_json::to_string(&body)?, now))?;
        modified += 1;
    }
    Ok((matched, modified))
}

/// Single-statement update: returns `(matched, modified)`.
///
/// Raises the same [`ApplyError`](docstore_query::ApplyError) the
/// fetch-modify-rewrite path would before any row is written.
fn update_in_place(
    session: &Session,
    table: &TableName,
    filter: &Filter,
    operators: &UpdateOperators,
    resolver: &FieldResolver,
    cardinality: Cardinality,
) -> Result<(usize, usize), DocStoreError> {
    let guards = operators.guards();
    if let Some(statement) = compile_update_guard(table, filter, &guards, resolver, cardinality) {
        let violated = session.query_scalar(&statement)?;
        if let Some(guard) = usize::try_from(violated).ok().and_then(|index| guards.get(index)) {
            return Err(guard.failure.clone().into());
        }
    }
    let matched =
        session.query_scalar(&compile_count_targets(table, filter, resolver, cardinality))?;
    let modified = session.execute(&compile_in_place_update(
        table,
        filter,
        operators,
        resolver,
        cardinality,
        unix_millis(),
    ))?;
    Ok((usize::try_from(matched).unwrap_or_default(), modified))
}

/// Inserts the document an upsert synthesizes from the filter's equalities.
fn upsert(
    session: &Session,
    table: &TableName,
    filter: &Filter,
    update: &UpdateDocument,
) -> Result<String, DocStoreError> {
    let mut body = Map::new();
    let mut id = None;
    for (clause, value) in filter.equality_fields() {
        match &clause.field {
            FieldRef::Id => id = Some(identifier_from_value(value)?),
            FieldRef::Body(path) => set_path(&mut body, path, value.clone())?,
            FieldRef::CreatedAt | FieldRef::UpdatedAt => {}
        }
    }
    update.apply(&mut body)?;
    let id = id.unwrap_or_else(|| session.ids().next_id());
    insert_body(session, table, &id, &body)?;
    Ok(id)
}
