// crates/docstore-sqlite/tests/collection_ops.rs
// ============================================================================
// Module: Collection Operation Tests
// Description: CRUD behavior of collections against an on-disk store.
// Purpose: Pin filter results, update counts, upserts, and ordering.
// ============================================================================

//! ## Overview
//! Each test opens a fresh store in a temporary directory:
//! - filter scenarios (ranges, membership, raw predicates)
//! - update strategies (in place and rewrite agree), `update_many` guard,
//!   and upsert reporting
//! - insert identifier handling and delete counts

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::sync::Arc;

use docstore_query::ApplyError;
use docstore_query::CompileError;
use docstore_sqlite::DocStore;
use docstore_sqlite::DocStoreError;
use docstore_sqlite::FindOptions;
use docstore_sqlite::MemoryEventSink;
use docstore_sqlite::PromoteOptions;
use docstore_sqlite::RawPredicate;
use docstore_sqlite::SortDirection;
use docstore_sqlite::SqlParam;
use docstore_sqlite::SqliteDocStoreConfig;
use docstore_sqlite::StoreOptions;
use docstore_sqlite::StoredDocument;
use docstore_sqlite::UpdateOptions;
use docstore_sqlite::UpdateResult;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn open_store(dir: &TempDir) -> DocStore {
    let config = SqliteDocStoreConfig::new(dir.path().join("docs.db"));
    let options = StoreOptions::default().with_events(Arc::new(MemoryEventSink::new()));
    DocStore::open(config, options).expect("open store")
}

fn field(documents: &[StoredDocument], path: &str) -> Vec<Value> {
    documents.iter().map(|document| document.get(path).cloned().unwrap_or(Value::Null)).collect()
}

// ============================================================================
// SECTION: Queries
// ============================================================================

#[test]
fn greater_than_returns_matching_rows_in_insertion_order() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let mut session = store.session().unwrap();
    let mut people = session.collection("people").unwrap();
    for age in [20, 30, 40] {
        people.insert_one(&json!({"age": age})).unwrap();
    }

    let found = people.find(&json!({"age": {"$gt": 25}}), &FindOptions::new()).unwrap();
    assert_eq!(field(&found, "age"), vec![json!(30), json!(40)]);
}

#[test]
fn literal_and_eq_filters_select_the_same_rows() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let mut session = store.session().unwrap();
    let mut items = session.collection("items").unwrap();
    items
        .insert_many(&[
            json!({"kind": "a", "flag": true}),
            json!({"kind": "b", "flag": false}),
            json!({"kind": "a", "flag": false}),
        ])
        .unwrap();

    for (literal, operator) in [
        (json!({"kind": "a"}), json!({"kind": {"$eq": "a"}})),
        (json!({"flag": true}), json!({"flag": {"$eq": true}})),
    ] {
        let left = items.find(&literal, &FindOptions::new()).unwrap();
        let right = items.find(&operator, &FindOptions::new()).unwrap();
        assert_eq!(left, right);
        assert!(!left.is_empty());
    }
}

#[test]
fn empty_membership_lists_are_stable() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let mut session = store.session().unwrap();
    let mut items = session.collection("items").unwrap();
    items.insert_many(&[json!({"n": 1}), json!({"n": 2})]).unwrap();

    for _ in 0 .. 3 {
        assert_eq!(items.count(&json!({"n": {"$in": []}})).unwrap(), 0);
        assert_eq!(items.count(&json!({"n": {"$nin": []}})).unwrap(), 2);
    }
}

#[test]
fn sort_skip_and_limit_compose() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let mut session = store.session().unwrap();
    let mut items = session.collection("items").unwrap();
    for n in 1 ..= 5 {
        items.insert_one(&json!({"n": n})).unwrap();
    }

    let options =
        FindOptions::new().sort_by("n", SortDirection::Descending).unwrap().skip(1).limit(2);
    let page = items.find(&json!({}), &options).unwrap();
    assert_eq!(field(&page, "n"), vec![json!(4), json!(3)]);

    let tail = items.find(&json!({}), &FindOptions::new().skip(3)).unwrap();
    assert_eq!(field(&tail, "n"), vec![json!(4), json!(5)]);
}

#[test]
fn raw_predicates_reach_or_groups() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let mut session = store.session().unwrap();
    let mut items = session.collection("items").unwrap();
    for n in 1 ..= 5 {
        items.insert_one(&json!({"n": n})).unwrap();
    }

    let raw = RawPredicate::new(
        "WHERE n = ? OR n = ?",
        vec![SqlParam::Integer(1), SqlParam::Integer(5)],
    );
    let found = items.find_raw(&raw, &FindOptions::new()).unwrap();
    assert_eq!(field(&found, "n"), vec![json!(1), json!(5)]);
}

#[test]
fn malformed_filters_fail_before_execution() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let mut session = store.session().unwrap();
    let items = session.collection("items").unwrap();

    let err = items.find(&json!({"n": {"$near": 1}}), &FindOptions::new()).unwrap_err();
    assert!(matches!(err, DocStoreError::Compile(CompileError::UnknownOperator { .. })));
}

// ============================================================================
// SECTION: Inserts and Deletes
// ============================================================================

#[test]
fn supplied_identifiers_are_used_and_unique() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let mut session = store.session().unwrap();
    let mut items = session.collection("items").unwrap();

    assert_eq!(items.insert_one(&json!({"_id": "a", "x": 1})).unwrap(), "a");
    assert_eq!(items.insert_one(&json!({"id": 7})).unwrap(), "7");
    let err = items.insert_one(&json!({"_id": "a"})).unwrap_err();
    assert!(matches!(err, DocStoreError::ConstraintViolation { .. }));

    let stored = items.find_one(&json!({"_id": "a"})).unwrap().unwrap();
    assert_eq!(stored.body, json!({"x": 1}).as_object().cloned().unwrap());
    assert_eq!(stored.into_value(), json!({"_id": "a", "x": 1}));
}

#[test]
fn generated_identifiers_follow_insertion_order() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let mut session = store.session().unwrap();
    let mut items = session.collection("items").unwrap();
    let ids = items.insert_many(&[json!({}), json!({}), json!({})]).unwrap();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);
}

#[test]
fn timestamp_fields_cannot_be_written() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let mut session = store.session().unwrap();
    let mut items = session.collection("items").unwrap();
    let err = items.insert_one(&json!({"created_at": 1})).unwrap_err();
    assert!(matches!(err, DocStoreError::Compile(CompileError::ProtectedField { .. })));
    assert!(matches!(items.insert_one(&json!([1, 2])), Err(DocStoreError::Invalid(_))));
}

#[test]
fn insert_many_is_all_or_nothing() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let mut session = store.session().unwrap();
    let mut items = session.collection("items").unwrap();
    items.insert_one(&json!({"_id": "taken"})).unwrap();

    let err = items.insert_many(&[json!({"_id": "fresh"}), json!({"_id": "taken"})]).unwrap_err();
    assert!(matches!(err, DocStoreError::ConstraintViolation { .. }));
    assert_eq!(items.count(&json!({})).unwrap(), 1);
}

#[test]
fn delete_one_removes_the_first_match_only() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let mut session = store.session().unwrap();
    let mut items = session.collection("items").unwrap();
    items
        .insert_many(&[json!({"s": "x", "n": 1}), json!({"s": "x", "n": 2}), json!({"s": "y"})])
        .unwrap();

    assert_eq!(items.delete_one(&json!({"s": "x"})).unwrap(), 1);
    let left = items.find(&json!({"s": "x"}), &FindOptions::new()).unwrap();
    assert_eq!(field(&left, "n"), vec![json!(2)]);
    assert_eq!(items.delete_many(&json!({})).unwrap(), 2);
}

// ============================================================================
// SECTION: Updates
// ============================================================================

#[test]
fn update_many_modifies_exactly_the_matching_rows() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let mut session = store.session().unwrap();
    let mut tasks = session.collection("tasks").unwrap();
    tasks
        .insert_many(&[
            json!({"status": "pending"}),
            json!({"status": "new"}),
            json!({"status": "pending"}),
            json!({"status": "new"}),
            json!({"status": "pending"}),
        ])
        .unwrap();

    let result = tasks
        .update_many(
            &json!({"status": "pending"}),
            &json!({"$set": {"status": "done"}}),
            UpdateOptions::default(),
        )
        .unwrap();
    assert_eq!(result.matched, 3);
    assert_eq!(result.modified, 3);
    assert_eq!(result.upserted_id, None);
    assert_eq!(tasks.count(&json!({"status": "done"})).unwrap(), 3);
    assert_eq!(tasks.count(&json!({"status": "new"})).unwrap(), 2);
}

#[test]
fn update_many_without_set_mutates_nothing() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let mut session = store.session().unwrap();
    let mut items = session.collection("items").unwrap();
    items.insert_many(&[json!({"n": 1}), json!({"n": 2})]).unwrap();
    let before = items.find(&json!({}), &FindOptions::new()).unwrap();

    for update in [json!({"$inc": {"n": 1}}), json!({"$unset": ["n"]}), json!({"n": 0})] {
        let err = items.update_many(&json!({}), &update, UpdateOptions::upsert()).unwrap_err();
        assert_eq!(err, DocStoreError::MissingSetOperator);
    }
    assert_eq!(items.find(&json!({}), &FindOptions::new()).unwrap(), before);
}

#[test]
fn update_one_touches_the_first_match_in_insertion_order() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let mut session = store.session().unwrap();
    let mut items = session.collection("items").unwrap();
    let ids = items.insert_many(&[json!({"s": "x"}), json!({"s": "x"})]).unwrap();

    let result = items
        .update_one(&json!({"s": "x"}), &json!({"$inc": {"hits": 2}}), UpdateOptions::default())
        .unwrap();
    assert_eq!((result.matched, result.modified), (1, 1));
    let first = items.find_one(&json!({"_id": ids[0].as_str()})).unwrap().unwrap();
    let second = items.find_one(&json!({"_id": ids[1].as_str()})).unwrap().unwrap();
    assert_eq!(first.get("hits"), Some(&json!(2)));
    assert_eq!(second.get("hits"), None);
}

#[test]
fn combined_operators_apply_in_place() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let mut session = store.session().unwrap();
    let mut items = session.collection("items").unwrap();
    let id = items.insert_one(&json!({"n": 1, "old": true})).unwrap();

    items
        .update_one(
            &json!({"_id": id.as_str()}),
            &json!({"$set": {"address.city": "Oslo"}, "$unset": ["old"], "$inc": {"n": 2}}),
            UpdateOptions::default(),
        )
        .unwrap();
    let stored = items.find_one(&json!({"_id": id.as_str()})).unwrap().unwrap();
    assert_eq!(stored.get("n"), Some(&json!(3)));
    assert_eq!(stored.get("address.city"), Some(&json!("Oslo")));
    assert_eq!(stored.get("old"), None);
    assert!(stored.updated_at >= stored.created_at);
}

#[test]
fn promoted_paths_use_the_rewrite_strategy() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let mut session = store.session().unwrap();
    let mut tasks = session.collection("tasks").unwrap();
    tasks
        .insert_many(&[json!({"status": "pending"}), json!({"status": "done"})])
        .unwrap();
    tasks.promote("status", PromoteOptions::default()).unwrap();

    let result = tasks
        .update_many(&json!({}), &json!({"$set": {"status": "done"}}), UpdateOptions::default())
        .unwrap();
    assert_eq!(result.matched, 2);
    assert_eq!(result.modified, 1);

    let connection = tasks.session().connection().unwrap();
    let column: Vec<String> = connection
        .prepare("SELECT status FROM tasks ORDER BY rowid")
        .unwrap()
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(column, vec!["done".to_string(), "done".to_string()]);
}

/// Runs one `update_one` against a single seeded document, optionally after
/// promoting `promoted` so the update takes the rewrite strategy.
fn update_outcome(
    promoted: Option<&str>,
    seed: &Value,
    update: &Value,
) -> (Result<UpdateResult, DocStoreError>, Map<String, Value>) {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let mut session = store.session().unwrap();
    let mut docs = session.collection("docs").unwrap();
    if let Some(path) = promoted {
        docs.promote(path, PromoteOptions::default()).unwrap();
    }
    docs.insert_one(seed).unwrap();
    let result = docs.update_one(&json!({}), update, UpdateOptions::default());
    let stored = docs.find_one(&json!({})).unwrap().unwrap();
    (result, stored.body)
}

#[test]
fn update_strategies_agree_on_bodies_counts_and_errors() {
    let not_a_container = DocStoreError::Apply(ApplyError::NotAContainer {
        path: "a.b".to_string(),
        segment: "a".to_string(),
    });
    let non_numeric = |path: &str| {
        Err(DocStoreError::Apply(ApplyError::NonNumericIncrement {
            path: path.to_string(),
        }))
    };
    let changed = Ok(UpdateResult {
        matched: 1,
        modified: 1,
        upserted_id: None,
    });
    let unchanged = Ok(UpdateResult {
        matched: 1,
        modified: 0,
        upserted_id: None,
    });
    let cases = [
        ("a", json!({"a": {"x": 1}}), json!({"$set": {"a.b": 1}}), changed.clone()),
        ("a", json!({"z": 0}), json!({"$set": {"a.b": 1}}), changed.clone()),
        ("a", json!({"a": 5}), json!({"$set": {"a.b": 1}}), Err(not_a_container)),
        ("n", json!({"n": 3}), json!({"$set": {"n": 3}}), unchanged.clone()),
        ("m", json!({"n": 1, "m": 2}), json!({"$unset": ["m"]}), changed.clone()),
        ("m", json!({"n": 1}), json!({"$unset": ["m"]}), unchanged),
        ("n", json!({"z": 0}), json!({"$inc": {"n": 5}}), changed.clone()),
        ("n", json!({"n": 1}), json!({"$inc": {"n": 2}}), changed.clone()),
        ("n", json!({"n": 1.5}), json!({"$inc": {"n": 2.25}}), changed.clone()),
        ("n", json!({"n": 1}), json!({"$inc": {"n": 0.5}}), changed),
        ("n", json!({"n": "abc"}), json!({"$inc": {"n": 5}}), non_numeric("n")),
        ("flag", json!({"flag": true}), json!({"$inc": {"flag": 1}}), non_numeric("flag")),
        ("n", json!({"n": null}), json!({"$inc": {"n": 1}}), non_numeric("n")),
        (
            "n",
            json!({"n": i64::MAX}),
            json!({"$inc": {"n": 1}}),
            Err(DocStoreError::Apply(ApplyError::IncrementOverflow {
                path: "n".to_string(),
            })),
        ),
    ];
    for (promoted, seed, update, expected) in cases {
        let in_place = update_outcome(None, &seed, &update);
        let rewrite = update_outcome(Some(promoted), &seed, &update);
        assert_eq!(in_place.0, expected, "in place: {seed} {update}");
        assert_eq!(in_place, rewrite, "{seed} {update}");
        if expected.is_err() {
            assert_eq!(Value::Object(in_place.1), seed, "failed update changed {seed}");
        }
    }
}

#[test]
fn failing_row_aborts_an_in_place_update_many() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let mut session = store.session().unwrap();
    let mut counters = session.collection("counters").unwrap();
    counters.insert_many(&[json!({"n": 1}), json!({"n": "abc"})]).unwrap();
    let before = counters.find(&json!({}), &FindOptions::new()).unwrap();

    let err = counters
        .update_many(
            &json!({}),
            &json!({"$set": {"seen": true}, "$inc": {"n": 1}}),
            UpdateOptions::default(),
        )
        .unwrap_err();
    assert_eq!(
        err,
        DocStoreError::Apply(ApplyError::NonNumericIncrement {
            path: "n".to_string(),
        })
    );
    assert_eq!(counters.find(&json!({}), &FindOptions::new()).unwrap(), before);
}

#[test]
fn upsert_inserts_from_filter_equalities() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let mut session = store.session().unwrap();
    let mut people = session.collection("people").unwrap();

    let result = people
        .update_one(
            &json!({"_id": "u1", "name": "Ann", "age": {"$gt": 1}}),
            &json!({"$set": {"age": 3}}),
            UpdateOptions::upsert(),
        )
        .unwrap();
    assert_eq!(result.matched, 0);
    assert_eq!(result.modified, 0);
    assert_eq!(result.upserted_id.as_deref(), Some("u1"));
    let stored = people.find_one(&json!({"_id": "u1"})).unwrap().unwrap();
    assert_eq!(stored.into_value(), json!({"_id": "u1", "name": "Ann", "age": 3}));

    let again = people
        .update_one(&json!({"_id": "u1"}), &json!({"$set": {"age": 4}}), UpdateOptions::upsert())
        .unwrap();
    assert_eq!((again.matched, again.modified), (1, 1));
    assert_eq!(again.upserted_id, None);
    assert_eq!(people.count(&json!({})).unwrap(), 1);
}

#[test]
fn replace_one_swaps_the_whole_body() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let mut session = store.session().unwrap();
    let mut people = session.collection("people").unwrap();
    let id = people.insert_one(&json!({"name": "Ann", "age": 3})).unwrap();

    let result = people
        .replace_one(&json!({"name": "Ann"}), &json!({"name": "Bob"}), UpdateOptions::default())
        .unwrap();
    assert_eq!((result.matched, result.modified), (1, 1));
    let stored = people.find_one(&json!({"_id": id.as_str()})).unwrap().unwrap();
    assert_eq!(stored.into_value(), json!({"_id": id, "name": "Bob"}));

    let err = people
        .replace_one(&json!({}), &json!({"$set": {"a": 1}}), UpdateOptions::default())
        .unwrap_err();
    assert!(matches!(err, DocStoreError::Invalid(_)));
}
