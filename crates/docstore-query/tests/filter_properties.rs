// crates/docstore-query/tests/filter_properties.rs
// ============================================================================
// Module: Filter Compiler Property Tests
// Description: Property-based checks over generated filters.
// Purpose: Literal/`$eq` equivalence and deterministic compilation.
// ============================================================================

//! ## Overview
//! Generates field names and scalar operands and checks that compilation is a
//! pure function of its input.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only assertions and helpers are permitted."
)]

use docstore_query::FieldResolver;
use docstore_query::compile_filter;
use proptest::prelude::*;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Strategies
// ============================================================================

fn field_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,8}(\\.[a-z][a-z0-9_]{0,8}){0,2}"
        .prop_filter("reserved names route to columns", |name| {
            !matches!(name.as_str(), "id" | "created_at" | "updated_at")
        })
}

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
        "[ -~]{0,12}".prop_map(Value::from),
        (-1.0e9 .. 1.0e9f64).prop_map(Value::from),
        Just(Value::Null),
    ]
}

// ============================================================================
// SECTION: Properties
// ============================================================================

proptest! {
    #[test]
    fn literal_equals_explicit_eq(field in field_name(), value in scalar()) {
        let resolver = FieldResolver::new();
        let literal = compile_filter(&json!({ field.clone(): value.clone() }), &resolver).unwrap();
        let explicit = compile_filter(&json!({ field: { "$eq": value } }), &resolver).unwrap();
        prop_assert_eq!(literal, explicit);
    }

    #[test]
    fn empty_membership_is_stable(field in field_name()) {
        let resolver = FieldResolver::new();
        let first = compile_filter(&json!({ field.clone(): { "$in": [] } }), &resolver).unwrap();
        let second = compile_filter(&json!({ field.clone(): { "$in": [] } }), &resolver).unwrap();
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.sql.as_str(), "0");
        let negated = compile_filter(&json!({ field: { "$nin": [] } }), &resolver).unwrap();
        prop_assert_eq!(negated.sql.as_str(), "1");
    }

    #[test]
    fn range_params_follow_operator_order(field in field_name(), low in any::<i32>(), high in any::<i32>()) {
        let resolver = FieldResolver::new();
        let predicate = compile_filter(
            &json!({ field: { "$gte": low, "$lt": high } }),
            &resolver,
        ).unwrap();
        prop_assert_eq!(predicate.params.len(), 2);
        prop_assert_eq!(predicate.sql.matches("CAST(").count(), 2);
    }
}
