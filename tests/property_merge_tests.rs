use plotly_panel::empty_data::classify;
use plotly_panel::merge::{merge, ArrayMerge};
use proptest::collection::{btree_map, vec};
use proptest::prelude::*;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

fn to_object(entries: &BTreeMap<String, i64>) -> Value {
    Value::Object(
        entries
            .iter()
            .map(|(k, v)| (k.clone(), json!(v)))
            .collect::<Map<String, Value>>(),
    )
}

fn to_array(items: &[i64]) -> Value {
    Value::Array(items.iter().map(|v| json!(v)).collect())
}

proptest! {
    #[test]
    fn merge_keeps_base_only_keys_and_takes_override_scalars(
        base in btree_map("[a-f]", -1_000i64..1_000, 0..6),
        over in btree_map("[a-f]", -1_000i64..1_000, 0..6)
    ) {
        let merged = merge(&to_object(&base), &to_object(&over), ArrayMerge::CombineByIndex);

        for (key, value) in &base {
            if !over.contains_key(key) {
                prop_assert_eq!(&merged[key.as_str()], &json!(value));
            }
        }
        for (key, value) in &over {
            prop_assert_eq!(&merged[key.as_str()], &json!(value));
        }
        let merged_len = merged.as_object().map(Map::len).unwrap_or(0);
        let union: std::collections::BTreeSet<_> = base.keys().chain(over.keys()).collect();
        prop_assert_eq!(merged_len, union.len());
    }

    #[test]
    fn combine_by_index_never_drops_scalars(
        target in vec(-20i64..20, 0..8),
        source in vec(-20i64..20, 0..8)
    ) {
        let merged = merge(&to_array(&target), &to_array(&source), ArrayMerge::CombineByIndex);
        let merged = merged.as_array().cloned().unwrap_or_default();

        for item in target.iter().chain(source.iter()) {
            prop_assert!(merged.contains(&json!(item)), "{} missing from {:?}", item, merged);
        }
    }

    #[test]
    fn combine_by_index_keeps_every_trace(
        target_len in 0usize..6,
        source_len in 0usize..6
    ) {
        let target: Vec<Value> = (0..target_len).map(|i| json!({ "name": i })).collect();
        let source: Vec<Value> = (0..source_len).map(|i| json!({ "x": [i] })).collect();

        let merged = merge(&Value::Array(target), &Value::Array(source), ArrayMerge::CombineByIndex);
        let merged = merged.as_array().cloned().unwrap_or_default();

        prop_assert_eq!(merged.len(), target_len.max(source_len));
        for (i, trace) in merged.iter().enumerate() {
            if i < target_len {
                prop_assert_eq!(&trace["name"], &json!(i));
            }
            if i < source_len {
                prop_assert_eq!(&trace["x"], &json!([i]));
            }
        }
    }

    #[test]
    fn replace_with_source_takes_source_sequence(
        target in vec(-20i64..20, 0..8),
        source in vec(-20i64..20, 0..8)
    ) {
        let base = json!({ "values": to_array(&target) });
        let over = json!({ "values": to_array(&source) });
        let merged = merge(&base, &over, ArrayMerge::ReplaceWithSource);
        prop_assert_eq!(&merged["values"], &to_array(&source));
    }

    #[test]
    fn classify_matches_trace_content(
        traces in vec(prop::option::of(-5i64..5), 0..6)
    ) {
        let data = Value::Array(
            traces
                .iter()
                .map(|v| match v {
                    Some(v) => json!({ "y": v }),
                    None => json!({ "y": null }),
                })
                .collect(),
        );
        let check = classify(&data);
        let expect_empty = traces.iter().all(Option::is_none);
        prop_assert_eq!(check.is_empty, expect_empty);
    }
}
