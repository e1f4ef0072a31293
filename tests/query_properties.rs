//! Property tests for query matching and namespace patterns.

use oplog_subs::{CompiledFilter, NamespacePattern};
use proptest::prelude::*;
use serde_json::{json, Value};

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-z]{0,8}".prop_map(Value::from),
    ]
}

fn field_name() -> impl Strategy<Value = String> {
    "[a-z]{1,6}"
}

fn flat_document() -> impl Strategy<Value = Value> {
    prop::collection::btree_map(field_name(), scalar(), 0..6)
        .prop_map(|fields| Value::Object(fields.into_iter().collect()))
}

proptest! {
    #[test]
    fn prop_empty_filter_matches_everything(doc in flat_document()) {
        let empty = json!({});
        prop_assert!(CompiledFilter::compile(&empty).unwrap().matches(&doc));
        prop_assert!(CompiledFilter::compile(&Value::Null).unwrap().matches(&doc));
    }

    #[test]
    fn prop_document_matches_its_own_fields(doc in flat_document()) {
        let filter = CompiledFilter::compile(&doc).unwrap();
        prop_assert!(filter.matches(&doc));
    }

    #[test]
    fn prop_eq_and_ne_are_complementary(
        doc in flat_document(),
        field in field_name(),
        value in scalar(),
    ) {
        let eq = CompiledFilter::compile(&json!({ field.clone(): value.clone() })).unwrap();
        let ne = CompiledFilter::compile(&json!({ field: {"$ne": value} })).unwrap();
        prop_assert_ne!(eq.matches(&doc), ne.matches(&doc));
    }

    #[test]
    fn prop_in_singleton_equals_literal(
        doc in flat_document(),
        field in field_name(),
        value in scalar(),
    ) {
        let literal = CompiledFilter::compile(&json!({ field.clone(): value.clone() })).unwrap();
        let within = CompiledFilter::compile(&json!({ field: {"$in": [value]} })).unwrap();
        prop_assert_eq!(literal.matches(&doc), within.matches(&doc));
    }

    #[test]
    fn prop_gt_and_lte_partition_numbers(x in any::<i32>(), bound in any::<i32>()) {
        let doc = json!({"n": x});
        let gt = CompiledFilter::compile(&json!({"n": {"$gt": bound}})).unwrap();
        let lte = CompiledFilter::compile(&json!({"n": {"$lte": bound}})).unwrap();
        prop_assert_ne!(gt.matches(&doc), lte.matches(&doc));
    }

    #[test]
    fn prop_literal_namespace_matches_itself(db in "[a-z]{1,8}", coll in "[a-z.]{1,8}") {
        let namespace = format!("{}.{}", db, coll);
        let pattern = NamespacePattern::compile(&namespace).unwrap();
        prop_assert!(pattern.matches(&namespace));
        prop_assert!(pattern.matches(&namespace.to_uppercase()));
    }

    #[test]
    fn prop_wildcard_database_matches_any_database(db in "[a-zA-Z0-9_]{1,8}", coll in "[a-z]{1,8}") {
        let pattern = NamespacePattern::compile(&format!("*.{}", coll)).unwrap();
        let namespace = format!("{}.{}", db, coll);
        let other = format!("{}.{}x", db, coll);
        prop_assert!(pattern.matches(&namespace));
        prop_assert!(!pattern.matches(&other));
    }
}
