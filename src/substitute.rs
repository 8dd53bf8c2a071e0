//! Template-variable substitution over configuration trees.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;

/// Rewrite every string leaf of `value` through `replace`.
///
/// Mapping keys and non-string scalars are left alone.
pub fn substitute<F>(value: &Value, replace: &F) -> Value
where
    F: Fn(&str) -> String + ?Sized,
{
    match value {
        Value::String(s) => Value::String(replace(s)),
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute(v, replace)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute(v, replace)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn variable_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{(\w+)(?::[^}]*)?\}|\[\[(\w+)(?::[^\]]*)?\]\]|\$(\w+)")
            .expect("variable pattern is valid")
    })
}

/// A name → text table that expands `$name`, `${name}`, `${name:fmt}` and
/// `[[name]]` references. Unknown names are left as written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateVariables {
    values: HashMap<String, String>,
}

impl TemplateVariables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, text: impl Into<String>) {
        self.values.insert(name.into(), text.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Entries sorted by name.
    pub fn entries(&self) -> Vec<(&str, &str)> {
        let mut entries: Vec<_> = self
            .values
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        entries.sort_unstable();
        entries
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn replace(&self, text: &str) -> String {
        if !text.contains('$') && !text.contains("[[") {
            return text.to_string();
        }
        variable_pattern()
            .replace_all(text, |caps: &Captures| {
                let name = caps
                    .get(1)
                    .or_else(|| caps.get(2))
                    .or_else(|| caps.get(3))
                    .map(|m| m.as_str())
                    .unwrap_or_default();
                match self.values.get(name) {
                    Some(value) => value.clone(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TemplateVariables {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut vars = Self::new();
        for (k, v) in iter {
            vars.insert(k, v);
        }
        vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars() -> TemplateVariables {
        [("host", "web-1"), ("__from", "1000"), ("unit", "ms")]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_substitute_every_string_leaf() {
        let vars = vars();
        let layout = json!({
            "title": { "text": "CPU on $host" },
            "xaxis": { "range": ["${__from}", 5] },
            "annotations": [{ "text": "[[unit]]", "showarrow": false }],
            "$host": null
        });
        let out = substitute(&layout, &|s: &str| vars.replace(s));
        assert_eq!(
            out,
            json!({
                "title": { "text": "CPU on web-1" },
                "xaxis": { "range": ["1000", 5] },
                "annotations": [{ "text": "ms", "showarrow": false }],
                "$host": null
            })
        );
    }

    #[test]
    fn test_unknown_variables_left_alone() {
        let vars = vars();
        assert_eq!(vars.replace("$missing and ${host:raw}"), "$missing and web-1");
        assert_eq!(vars.replace("costs $5"), "costs $5");
    }

    #[test]
    fn test_non_strings_pass_through() {
        let out = substitute(&json!([1, true, null, 2.5]), &|_: &str| "x".to_string());
        assert_eq!(out, json!([1, true, null, 2.5]));
    }
}
