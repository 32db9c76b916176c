// crates/docstore-sqlite/tests/promotion.rs
// ============================================================================
// Module: Promoted Column Tests
// Description: Column promotion, unique indexes, and check triggers.
// Purpose: Validate idempotence, atomicity, and constraint surfacing.
// ============================================================================

//! ## Overview
//! Inspects `sqlite_master` and `pragma_table_info` through the session
//! connection to verify schema effects alongside document-level behavior.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::sync::Arc;

use docstore_query::CompileError;
use docstore_sqlite::Collection;
use docstore_sqlite::DocStore;
use docstore_sqlite::DocStoreError;
use docstore_sqlite::FindOptions;
use docstore_sqlite::MemoryEventSink;
use docstore_sqlite::PromoteOptions;
use docstore_sqlite::SqliteDocStoreConfig;
use docstore_sqlite::StoreEventKind;
use docstore_sqlite::StoreOptions;
use docstore_sqlite::UpdateOptions;
use rusqlite::Connection;
use serde_json::json;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn open_store(dir: &TempDir) -> (DocStore, Arc<MemoryEventSink>) {
    let config = SqliteDocStoreConfig::new(dir.path().join("docs.db"));
    let events = Arc::new(MemoryEventSink::new());
    let store = DocStore::open(config, StoreOptions::default().with_events(events.clone()))
        .expect("open store");
    (store, events)
}

fn connection<'a>(collection: &'a mut Collection<'_>) -> &'a Connection {
    collection.session().connection().unwrap()
}

fn column_count(connection: &Connection, table: &str) -> i64 {
    connection
        .query_row("SELECT COUNT(*) FROM pragma_table_info(?1)", [table], |row| row.get(0))
        .unwrap()
}

fn schema_objects(connection: &Connection, kind: &str, table: &str) -> Vec<String> {
    connection
        .prepare("SELECT name FROM sqlite_master WHERE type = ?1 AND tbl_name = ?2 ORDER BY name")
        .unwrap()
        .query_map([kind, table], |row| row.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap()
}

fn column_values(connection: &Connection, sql: &str) -> Vec<Option<String>> {
    connection
        .prepare(sql)
        .unwrap()
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap()
}

// ============================================================================
// SECTION: Promotion
// ============================================================================

#[test]
fn promoting_twice_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let (store, _) = open_store(&dir);
    let mut session = store.session().unwrap();
    let mut users = session.collection("users").unwrap();
    users.insert_many(&[json!({"email": "a@x.com"}), json!({"name": "no email"})]).unwrap();

    users.promote("email", PromoteOptions::default()).unwrap();
    let conn = connection(&mut users);
    let first = (
        column_count(conn, "users"),
        schema_objects(conn, "trigger", "users"),
        column_values(conn, "SELECT email FROM users ORDER BY rowid"),
    );

    users.promote("email", PromoteOptions::default()).unwrap();
    let conn = connection(&mut users);
    let second = (
        column_count(conn, "users"),
        schema_objects(conn, "trigger", "users"),
        column_values(conn, "SELECT email FROM users ORDER BY rowid"),
    );

    assert_eq!(first, second);
    assert_eq!(first.0, 5);
    assert_eq!(first.1.len(), 2);
    assert_eq!(first.2, vec![Some("a@x.com".to_string()), None]);
    assert_eq!(users.promoted_columns().unwrap().len(), 1);
}

#[test]
fn promoted_columns_follow_inserts_and_updates() {
    let dir = TempDir::new().unwrap();
    let (store, events) = open_store(&dir);
    let mut session = store.session().unwrap();
    let mut people = session.collection("people").unwrap();
    people.promote("profile.age", PromoteOptions::default()).unwrap();
    let id = people.insert_one(&json!({"profile": {"age": 20}})).unwrap();
    people.insert_one(&json!({"profile": {"age": 40}})).unwrap();

    people
        .update_one(
            &json!({"_id": id.as_str()}),
            &json!({"$set": {"profile.age": 30}}),
            UpdateOptions::default(),
        )
        .unwrap();
    let values = column_values(
        connection(&mut people),
        "SELECT CAST(profile__age AS TEXT) FROM people ORDER BY rowid",
    );
    assert_eq!(values, vec![Some("30".to_string()), Some("40".to_string())]);

    let found = people.find(&json!({"profile.age": {"$gt": 35}}), &FindOptions::new()).unwrap();
    assert_eq!(found.len(), 1);
    assert!(events.kinds().contains(&StoreEventKind::PromotionCompleted));
}

#[test]
fn unique_promotion_rejects_duplicate_inserts() {
    let dir = TempDir::new().unwrap();
    let (store, _) = open_store(&dir);
    let mut session = store.session().unwrap();
    let mut users = session.collection("users").unwrap();
    let column = users.promote("email", PromoteOptions::unique()).unwrap();
    assert!(column.unique);

    users.insert_one(&json!({"email": "a@x.com"})).unwrap();
    let err = users.insert_one(&json!({"email": "a@x.com"})).unwrap_err();
    assert!(matches!(err, DocStoreError::ConstraintViolation { .. }), "unexpected error: {err}");
    assert_eq!(users.count(&json!({})).unwrap(), 1);
}

#[test]
fn failed_unique_promotion_leaves_no_schema_behind() {
    let dir = TempDir::new().unwrap();
    let (store, _) = open_store(&dir);
    let mut session = store.session().unwrap();
    let mut users = session.collection("users").unwrap();
    users.insert_many(&[json!({"email": "a@x.com"}), json!({"email": "a@x.com"})]).unwrap();

    let err = users.promote("email", PromoteOptions::unique()).unwrap_err();
    assert!(matches!(err, DocStoreError::ConstraintViolation { .. }));
    let conn = connection(&mut users);
    assert_eq!(column_count(conn, "users"), 4);
    assert!(schema_objects(conn, "trigger", "users").is_empty());
    assert!(users.promoted_columns().unwrap().is_empty());
}

#[test]
fn compound_unique_fails_before_any_column_exists() {
    let dir = TempDir::new().unwrap();
    let (store, _) = open_store(&dir);
    let mut session = store.session().unwrap();
    let mut users = session.collection("users").unwrap();

    let err = users.promote_compound(&["first", "last"], PromoteOptions::unique()).unwrap_err();
    assert!(matches!(err, DocStoreError::CompoundUniqueNotSupported { .. }));
    assert_eq!(column_count(connection(&mut users), "users"), 4);
    assert!(users.promoted_columns().unwrap().is_empty());
}

#[test]
fn compound_promotion_adds_a_composite_index() {
    let dir = TempDir::new().unwrap();
    let (store, _) = open_store(&dir);
    let mut session = store.session().unwrap();
    let mut users = session.collection("users").unwrap();

    let columns = users.promote_compound(&["first", "last"], PromoteOptions::default()).unwrap();
    assert_eq!(columns.len(), 2);
    let indexes = schema_objects(connection(&mut users), "index", "users");
    assert!(indexes.contains(&"users__first__last__idx".to_string()), "{indexes:?}");
}

#[test]
fn paths_differing_only_in_case_cannot_share_a_column() {
    let dir = TempDir::new().unwrap();
    let (store, _) = open_store(&dir);
    let mut session = store.session().unwrap();
    let mut users = session.collection("users").unwrap();
    users.promote("email", PromoteOptions::default()).unwrap();

    let err = users.promote("Email", PromoteOptions::default()).unwrap_err();
    assert!(matches!(err, DocStoreError::Invalid(_)), "unexpected error: {err}");
    let conn = connection(&mut users);
    assert_eq!(column_count(conn, "users"), 5);
    assert_eq!(schema_objects(conn, "trigger", "users").len(), 2);
    assert_eq!(users.promoted_columns().unwrap().len(), 1);

    users.insert_one(&json!({"email": "b@x.com", "Email": "ZZZ"})).unwrap();
    let found = users.find(&json!({"email": "b@x.com"}), &FindOptions::new()).unwrap();
    assert_eq!(found.len(), 1);
}

#[test]
fn reserved_paths_cannot_be_promoted() {
    let dir = TempDir::new().unwrap();
    let (store, _) = open_store(&dir);
    let mut session = store.session().unwrap();
    let mut users = session.collection("users").unwrap();
    for path in ["_id", "updated_at", "data"] {
        let err = users.promote(path, PromoteOptions::default()).unwrap_err();
        assert!(matches!(err, DocStoreError::Compile(_)), "{path}: {err}");
    }
}

#[test]
fn backfill_failures_are_logged_not_raised() {
    let dir = TempDir::new().unwrap();
    let (store, events) = open_store(&dir);
    let mut session = store.session().unwrap();
    let mut users = session.collection("users").unwrap();
    users.insert_one(&json!({"email": "a@x.com"})).unwrap();
    connection(&mut users)
        .execute_batch(
            "CREATE TRIGGER frozen BEFORE UPDATE ON users BEGIN SELECT RAISE(ABORT, 'frozen'); END;",
        )
        .unwrap();

    users.promote("email", PromoteOptions::default()).unwrap();
    assert!(events.kinds().contains(&StoreEventKind::BackfillFailed));
    let values = column_values(connection(&mut users), "SELECT email FROM users");
    assert_eq!(values, vec![None]);
    assert_eq!(users.promoted_columns().unwrap().len(), 1);
}

// ============================================================================
// SECTION: Check Constraints
// ============================================================================

#[test]
fn check_constraints_guard_inserts_and_updates() {
    let dir = TempDir::new().unwrap();
    let (store, _) = open_store(&dir);
    let mut session = store.session().unwrap();
    let mut people = session.collection("people").unwrap();
    people.add_check_constraint("age", "age >= 18").unwrap();

    let id = people.insert_one(&json!({"age": 20})).unwrap();
    people.insert_one(&json!({"name": "no age"})).unwrap();
    let err = people.insert_one(&json!({"age": 10})).unwrap_err();
    match err {
        DocStoreError::ConstraintViolation {
            message,
        } => assert!(message.contains("age >= 18"), "{message}"),
        other => panic!("unexpected error: {other}"),
    }

    let err = people
        .update_one(
            &json!({"_id": id.as_str()}),
            &json!({"$set": {"age": 5}}),
            UpdateOptions::default(),
        )
        .unwrap_err();
    assert!(matches!(err, DocStoreError::ConstraintViolation { .. }));
    assert_eq!(people.count(&json!({"age": 20})).unwrap(), 1);
}

#[test]
fn check_constraints_are_additive_and_replace_by_expression() {
    let dir = TempDir::new().unwrap();
    let (store, events) = open_store(&dir);
    let mut session = store.session().unwrap();
    let mut people = session.collection("people").unwrap();

    people.add_check_constraint("age", "age >= 18").unwrap();
    people.add_check_constraint("age", "age >= 18").unwrap();
    assert_eq!(people.check_constraints().unwrap().len(), 1);
    assert_eq!(schema_objects(connection(&mut people), "trigger", "people").len(), 2);

    people.add_check_constraint("age", "age < 150").unwrap();
    assert_eq!(people.check_constraints().unwrap().len(), 2);
    assert_eq!(schema_objects(connection(&mut people), "trigger", "people").len(), 4);
    assert!(matches!(
        people.insert_one(&json!({"age": 200})),
        Err(DocStoreError::ConstraintViolation { .. })
    ));
    assert!(events.kinds().contains(&StoreEventKind::CheckConstraintInstalled));

    assert!(matches!(people.add_check_constraint("age", "  "), Err(DocStoreError::Invalid(_))));
    assert!(matches!(
        people.add_check_constraint("age", "age > ?"),
        Err(DocStoreError::Invalid(_))
    ));
    assert!(matches!(
        people.add_check_constraint("_id", "1"),
        Err(DocStoreError::Compile(CompileError::ProtectedField { .. }))
    ));
}
