//! Structural merge of configuration layers.
//!
//! Mappings merge key by key with the source winning on conflicts. Sequences
//! follow an [`ArrayMerge`] policy chosen by the caller. Neither input is
//! modified; the merged value is always a fresh tree.

use serde_json::{Map, Value};

/// How two sequences at the same path are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArrayMerge {
    /// Align by index: merge mappings pairwise, fill missing indices from the
    /// source and append source scalars the target does not already contain.
    #[default]
    CombineByIndex,
    /// The source sequence replaces the target sequence.
    ReplaceWithSource,
}

/// Merge `source` on top of `target`.
///
/// A top-level `null` on either side counts as a missing layer and yields a
/// copy of the other side.
pub fn merge(target: &Value, source: &Value, arrays: ArrayMerge) -> Value {
    match (target, source) {
        (_, Value::Null) => target.clone(),
        (Value::Null, _) => source.clone(),
        _ => merge_value(target, source, arrays),
    }
}

/// Fold `layers` left to right; later layers take precedence.
pub fn merge_layers(layers: &[&Value], arrays: ArrayMerge) -> Value {
    layers
        .iter()
        .fold(Value::Null, |acc, layer| merge(&acc, layer, arrays))
}

fn is_mergeable(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}

fn merge_value(target: &Value, source: &Value, arrays: ArrayMerge) -> Value {
    match (target, source) {
        (Value::Object(t), Value::Object(s)) => Value::Object(merge_objects(t, s, arrays)),
        (Value::Array(t), Value::Array(s)) => match arrays {
            ArrayMerge::CombineByIndex => Value::Array(combine_by_index(t, s, arrays)),
            ArrayMerge::ReplaceWithSource => source.clone(),
        },
        // Scalars and mismatched shapes: the source wins.
        _ => source.clone(),
    }
}

fn merge_objects(target: &Map<String, Value>, source: &Map<String, Value>, arrays: ArrayMerge) -> Map<String, Value> {
    let mut out = target.clone();
    for (key, value) in source {
        let merged = match target.get(key) {
            Some(existing) if is_mergeable(existing) && is_mergeable(value) => {
                merge_value(existing, value, arrays)
            }
            _ => value.clone(),
        };
        out.insert(key.clone(), merged);
    }
    out
}

fn combine_by_index(target: &[Value], source: &[Value], arrays: ArrayMerge) -> Vec<Value> {
    let mut out = target.to_vec();
    for (index, item) in source.iter().enumerate() {
        match target.get(index) {
            None => out.push(item.clone()),
            Some(existing) if same_shape(existing, item) => {
                out[index] = merge_value(existing, item, arrays);
            }
            Some(_) => {
                if !target.contains(item) {
                    out.push(item.clone());
                }
            }
        }
    }
    out
}

fn same_shape(a: &Value, b: &Value) -> bool {
    matches!(
        (a, b),
        (Value::Object(_), Value::Object(_)) | (Value::Array(_), Value::Array(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_source_wins_on_scalars() {
        let base = json!({ "a": 1, "nested": { "keep": true, "color": "red" } });
        let over = json!({ "nested": { "color": "blue" }, "b": 2 });
        let merged = merge(&base, &over, ArrayMerge::CombineByIndex);
        assert_eq!(
            merged,
            json!({ "a": 1, "b": 2, "nested": { "keep": true, "color": "blue" } })
        );
    }

    #[test]
    fn test_inputs_untouched() {
        let base = json!({ "a": [1, 2] });
        let over = json!({ "a": [3] });
        let base_copy = base.clone();
        let over_copy = over.clone();
        let _ = merge(&base, &over, ArrayMerge::CombineByIndex);
        assert_eq!(base, base_copy);
        assert_eq!(over, over_copy);
    }

    #[test]
    fn test_combine_by_index_merges_mappings_pairwise() {
        let target = json!([{ "x": [1, 2], "type": "scatter" }, { "name": "b" }]);
        let source = json!([{ "mode": "lines" }]);
        let merged = merge(&target, &source, ArrayMerge::CombineByIndex);
        assert_eq!(
            merged,
            json!([{ "x": [1, 2], "type": "scatter", "mode": "lines" }, { "name": "b" }])
        );
    }

    #[test]
    fn test_combine_by_index_fills_and_appends() {
        let merged = merge(&json!([1, 2]), &json!([2, 5, 7]), ArrayMerge::CombineByIndex);
        // index 0: 2 already present, skipped; index 1: 5 appended; index 2: filled
        assert_eq!(merged, json!([1, 2, 5, 7]));

        let merged = merge(&json!(["a"]), &json!(["b"]), ArrayMerge::CombineByIndex);
        assert_eq!(merged, json!(["a", "b"]));
    }

    #[test]
    fn test_combine_by_index_keeps_scalar_when_mapping_arrives() {
        let merged = merge(&json!([1]), &json!([{ "a": 1 }]), ArrayMerge::CombineByIndex);
        assert_eq!(merged, json!([1, { "a": 1 }]));
    }

    #[test]
    fn test_replace_with_source() {
        let target = json!({ "marker": { "color": ["red", "green"] } });
        let source = json!({ "marker": { "color": ["blue"] } });
        let merged = merge(&target, &source, ArrayMerge::ReplaceWithSource);
        assert_eq!(merged, json!({ "marker": { "color": ["blue"] } }));
    }

    #[test]
    fn test_null_layers_are_missing() {
        let layer = json!({ "a": 1 });
        assert_eq!(merge(&Value::Null, &layer, ArrayMerge::CombineByIndex), layer);
        assert_eq!(merge(&layer, &Value::Null, ArrayMerge::CombineByIndex), layer);
        // nested null is an explicit value
        assert_eq!(
            merge(&layer, &json!({ "a": null }), ArrayMerge::CombineByIndex),
            json!({ "a": null })
        );
    }

    #[test]
    fn test_mismatched_shapes_take_source() {
        let merged = merge(&json!({ "a": { "b": 1 } }), &json!({ "a": [1] }), ArrayMerge::CombineByIndex);
        assert_eq!(merged, json!({ "a": [1] }));
    }

    #[test]
    fn test_merge_layers_precedence() {
        let theme = json!({ "font": { "color": "white" }, "margin": { "l": 0 } });
        let user = json!({ "font": { "size": 12 } });
        let script = json!({ "font": { "color": "black" } });
        let merged = merge_layers(&[&theme, &user, &script], ArrayMerge::CombineByIndex);
        assert_eq!(
            merged,
            json!({ "font": { "color": "black", "size": 12 }, "margin": { "l": 0 } })
        );
    }
}
