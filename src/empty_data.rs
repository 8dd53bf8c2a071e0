//! "No data" detection for composed traces.

use serde::Serialize;
use serde_json::Value;

pub const NOT_AN_ARRAY: &str = "Data is empty or not an array of traces";
pub const ALL_TRACES_EMPTY: &str = "All traces are empty";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmptyDataCheck {
    pub is_empty: bool,
    pub message: String,
}

impl EmptyDataCheck {
    fn empty(message: &str) -> Self {
        Self {
            is_empty: true,
            message: message.to_string(),
        }
    }

    fn renderable() -> Self {
        Self {
            is_empty: false,
            message: String::new(),
        }
    }
}

/// A trace has content when any of its keys carries a non-null value.
fn has_content(trace: &Value) -> bool {
    match trace {
        Value::Object(map) => map.values().any(|v| !v.is_null()),
        _ => false,
    }
}

/// Decide whether the composed `data` sequence has anything to draw.
pub fn classify(data: &Value) -> EmptyDataCheck {
    let traces = match data {
        Value::Array(traces) if !traces.is_empty() => traces,
        _ => return EmptyDataCheck::empty(NOT_AN_ARRAY),
    };

    if traces.iter().any(has_content) {
        EmptyDataCheck::renderable()
    } else {
        EmptyDataCheck::empty(ALL_TRACES_EMPTY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_or_non_array() {
        assert_eq!(classify(&json!([])).message, NOT_AN_ARRAY);
        assert!(classify(&json!({ "x": [1] })).is_empty);
        assert!(classify(&Value::Null).is_empty);
    }

    #[test]
    fn test_all_traces_empty() {
        let check = classify(&json!([{}, {}]));
        assert!(check.is_empty);
        assert_eq!(check.message, ALL_TRACES_EMPTY);

        assert!(classify(&json!([{ "x": null }, 3])).is_empty);
    }

    #[test]
    fn test_any_populated_trace_renders() {
        let check = classify(&json!([{}, { "x": 1 }]));
        assert!(!check.is_empty);
        assert!(check.message.is_empty());
    }
}
