//! Assembly of the values a script is called with.
//!
//! Parameter order is fixed: `data`, `variables`, `options`, `utils`, and
//! `event` for interaction scripts.

use std::rc::Rc;

use rhai::Dynamic;
use serde_json::{json, Map, Value};

use crate::host::{PanelHost, PlotEvent};
use crate::panel_data::{PanelData, TimeRange};
use crate::script_diagnostics::ScriptError;
use crate::script_utils::ScriptUtils;
use crate::scripting::ScriptContext;
use crate::substitute::TemplateVariables;
use crate::timezone::{OffsetDirection, OffsetSource};

/// Ask the host to expand a built-in variable; `fallback` is used when the
/// host leaves the reference untouched.
fn builtin(host: &dyn PanelHost, name: &str, fallback: Option<String>) -> Value {
    let token = format!("${name}");
    let expanded = host.replace_variables(&token);
    if expanded != token {
        return Value::String(expanded);
    }
    fallback.map(Value::String).unwrap_or(Value::Null)
}

/// The `variables` map: built-ins, then dashboard variables (which may
/// shadow them).
pub fn script_variables(
    data: &PanelData,
    time_range: Option<TimeRange>,
    host: &dyn PanelHost,
) -> Map<String, Value> {
    let range = time_range.or(data.time_range);
    let request = data.request.as_ref();

    let mut variables = Map::new();
    variables.insert(
        "__from".into(),
        builtin(host, "__from", range.map(|r| r.from.to_string())),
    );
    variables.insert(
        "__to".into(),
        builtin(host, "__to", range.map(|r| r.to.to_string())),
    );
    variables.insert(
        "__interval".into(),
        builtin(host, "__interval", request.map(|r| r.interval.clone())),
    );
    variables.insert(
        "__interval_ms".into(),
        builtin(host, "__interval_ms", request.map(|r| r.interval_ms.to_string())),
    );
    variables.insert(
        "__dashboard".into(),
        builtin(host, "__dashboard", request.and_then(|r| r.dashboard_uid.clone())),
    );

    for variable in host.template_variables() {
        variables.insert(variable.name, Value::String(variable.text));
    }
    variables
}

/// Name → text table for `utils.replaceVariables`.
pub fn variable_table(variables: &Map<String, Value>) -> TemplateVariables {
    variables
        .iter()
        .filter_map(|(name, value)| match value {
            Value::String(text) => Some((name.clone(), text.clone())),
            Value::Null => None,
            other => Some((name.clone(), other.to_string())),
        })
        .collect()
}

/// Build the `utils` object for one evaluation.
pub fn script_utils(
    time_zone: &str,
    time_range: Option<TimeRange>,
    variables: &Map<String, Value>,
    offsets: Rc<dyn OffsetSource>,
    direction: OffsetDirection,
) -> ScriptUtils {
    ScriptUtils::new(
        time_zone,
        time_range,
        Rc::new(variable_table(variables)),
        offsets,
        direction,
    )
}

/// Assemble the full context. `event` is only bound for interaction scripts.
pub fn build_context(
    data: &Value,
    variables: &Map<String, Value>,
    options: &Value,
    utils: ScriptUtils,
    event: Option<&PlotEvent>,
) -> Result<ScriptContext, ScriptError> {
    let mut context = ScriptContext::new();
    context.insert_json("data", data)?;
    context.insert_json("variables", &Value::Object(variables.clone()))?;
    context.insert_json("options", options)?;
    context.insert("utils", Dynamic::from(utils));
    if let Some(event) = event {
        context.insert_json("event", &json!({ "type": event.kind, "data": event.payload }))?;
    }
    Ok(context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{PlotEventKind, StaticHost};
    use crate::panel_data::DataRequest;
    use crate::timezone::FixedOffsets;

    fn data() -> PanelData {
        PanelData {
            request: Some(DataRequest {
                interval: "1m".into(),
                interval_ms: 60_000,
                ..DataRequest::default()
            }),
            ..PanelData::default()
        }
    }

    #[test]
    fn test_builtins_fall_back_to_data() {
        let host = StaticHost::new().with_variable("host", "web-1");
        let vars = script_variables(&data(), Some(TimeRange::new(10, 20)), &host);

        assert_eq!(vars["__from"], json!("10"));
        assert_eq!(vars["__to"], json!("20"));
        assert_eq!(vars["__interval"], json!("1m"));
        assert_eq!(vars["__interval_ms"], json!("60000"));
        assert_eq!(vars["__dashboard"], Value::Null);
        assert_eq!(vars["host"], json!("web-1"));
    }

    #[test]
    fn test_host_expansion_wins() {
        let host = StaticHost::new().with_variable("__from", "now-6h");
        let vars = script_variables(&data(), Some(TimeRange::new(10, 20)), &host);
        assert_eq!(vars["__from"], json!("now-6h"));
    }

    #[test]
    fn test_context_order_and_event() {
        let vars = script_variables(&data(), None, &StaticHost::new());
        let utils = script_utils("utc", None, &vars, Rc::new(FixedOffsets::new(0)), OffsetDirection::Subtract);
        let event = PlotEvent::new(PlotEventKind::Click, json!({ "points": [] }));
        let context = build_context(&json!({}), &vars, &json!({}), utils, Some(&event)).unwrap();

        let names: Vec<_> = context.names().collect();
        assert_eq!(names, vec!["data", "variables", "options", "utils", "event"]);

        let event: Value = rhai::serde::from_dynamic(context.get("event").unwrap()).unwrap();
        assert_eq!(event["type"], json!("click"));
    }
}
