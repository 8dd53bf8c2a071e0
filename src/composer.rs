//! Configuration composer.
//!
//! Builds the final `{data, layout, config, frames}` from, lowest precedence
//! first:
//!
//! 1. the theme-derived layout skeleton and base layout defaults
//! 2. the static per-panel layers (variables substituted)
//! 3. the script's output
//! 4. the cross-trace overlay, applied per trace as a floor
//!
//! [`finalize`] then forces the panel height and installs the export button.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::merge::{merge, merge_layers, ArrayMerge};
use crate::options::{ImageFormat, ResolvedLayers};
use crate::substitute::substitute;

/// Name of the toolbar button that exports through the host.
pub const EXPORT_BUTTON: &str = "toImageGrafana";

/// Colors the layout skeleton is derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Theme {
    pub text: String,
    pub background: String,
    pub background_secondary: String,
}

impl Theme {
    pub fn dark() -> Self {
        Self {
            text: "#ccccdc".to_string(),
            background: "#181b1f".to_string(),
            background_secondary: "#22252b".to_string(),
        }
    }

    pub fn light() -> Self {
        Self {
            text: "#24292e".to_string(),
            background: "#ffffff".to_string(),
            background_secondary: "#f4f5f5".to_string(),
        }
    }

    /// Look up a preset by name (`dark` or `light`).
    pub fn preset(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "dark" => Some(Self::dark()),
            "light" => Some(Self::light()),
            _ => None,
        }
    }
}

impl Default for Theme {
    fn default() -> Self {
        Self::dark()
    }
}

/// Everything the plotting surface needs for one chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderTriple {
    pub data: Value,
    pub layout: Value,
    pub config: Value,
    pub frames: Value,
}

impl Default for RenderTriple {
    fn default() -> Self {
        Self {
            data: json!([]),
            layout: json!({}),
            config: json!({}),
            frames: json!([]),
        }
    }
}

/// Layout defaults every chart starts from.
pub fn base_layout() -> Value {
    json!({
        "font": { "family": "Inter, Helvetica, Arial, sans-serif" },
        "xaxis": { "type": "date", "autorange": true, "automargin": true },
        "yaxis": { "autorange": true, "automargin": true },
        "title": { "automargin": true },
        "margin": { "l": 0, "r": 0, "b": 0, "t": 0 }
    })
}

/// Layout colors taken from the dashboard theme.
pub fn themed_layout(theme: &Theme) -> Value {
    json!({
        "font": { "color": theme.text },
        "paper_bgcolor": theme.background,
        "plot_bgcolor": theme.background,
        "hoverlabel": { "bgcolor": theme.text },
        "xaxis": { "gridcolor": theme.background_secondary },
        "yaxis": { "gridcolor": theme.background_secondary }
    })
}

fn is_empty_overlay(overlay: &Value) -> bool {
    match overlay {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Apply `overlay` under every trace; per-trace fields win and sequences in
/// the trace replace the overlay's.
fn apply_overlay(data: Value, overlay: &Value) -> Value {
    if is_empty_overlay(overlay) {
        return data;
    }
    match data {
        Value::Array(traces) => Value::Array(
            traces
                .iter()
                .map(|trace| merge(overlay, trace, ArrayMerge::ReplaceWithSource))
                .collect(),
        ),
        other => other,
    }
}

/// Drop entries of the `data` sequence that are not trace mappings.
fn retain_traces(data: Value) -> Value {
    match data {
        Value::Array(traces) => {
            let before = traces.len();
            let kept: Vec<Value> = traces.into_iter().filter(Value::is_object).collect();
            if kept.len() != before {
                log::warn!("Dropped {} data entries that are not trace objects", before - kept.len());
            }
            Value::Array(kept)
        }
        other => other,
    }
}

/// Merge the script's value for `key` (if any) over `current`.
fn overlay_evaluated(current: Value, evaluated: Option<&Value>, key: &str) -> Value {
    match evaluated.and_then(|e| e.get(key)) {
        Some(Value::Null) | None => current,
        Some(produced) => merge(&current, produced, ArrayMerge::CombineByIndex),
    }
}

/// Compose the render triple from decoded layers and the script's output.
pub fn compose(
    layers: &ResolvedLayers,
    evaluated: Option<&Value>,
    theme: &Theme,
    replace_variables: &dyn Fn(&str) -> String,
) -> RenderTriple {
    let layout = merge_layers(
        &[&base_layout(), &themed_layout(theme), &layers.layout],
        ArrayMerge::CombineByIndex,
    );
    let layout = substitute(&layout, replace_variables);
    let data = substitute(&layers.data, replace_variables);
    let config = substitute(&layers.config, replace_variables);
    let frames = substitute(&layers.frames, replace_variables);
    let overlay = substitute(&layers.all_data, replace_variables);

    let data = overlay_evaluated(data, evaluated, "data");
    let layout = overlay_evaluated(layout, evaluated, "layout");
    let config = overlay_evaluated(config, evaluated, "config");
    let frames = overlay_evaluated(frames, evaluated, "frames");

    let data = retain_traces(apply_overlay(data, &overlay));

    RenderTriple {
        data,
        layout,
        config,
        frames,
    }
}

/// Image export parameters baked into the toolbar button.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportSettings {
    pub format: ImageFormat,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub scale: f64,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            format: ImageFormat::Png,
            width: None,
            height: None,
            scale: 2.0,
        }
    }
}

fn as_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Force panel sizing and install the export button.
pub fn finalize(triple: RenderTriple, height: u32, export: &ExportSettings) -> RenderTriple {
    let mut layout = as_object(triple.layout);
    layout.insert("autosize".into(), json!(true));
    layout.insert("height".into(), json!(height));

    let mut config = as_object(triple.config);

    let button = json!({
        "name": EXPORT_BUTTON,
        "title": "Export plot as an image",
        "icon": "camera",
        "format": export.format.extension(),
        "width": export.width,
        "height": export.height,
        "scale": export.scale,
    });
    let mut buttons = match config.remove("modeBarButtonsToAdd") {
        Some(Value::Array(existing)) => existing,
        _ => Vec::new(),
    };
    buttons.retain(|b| b.get("name").and_then(Value::as_str) != Some(EXPORT_BUTTON));
    buttons.push(button);
    config.insert("modeBarButtonsToAdd".into(), Value::Array(buttons));

    let mut removed = match config.remove("modeBarButtonsToRemove") {
        Some(Value::Array(existing)) => existing,
        _ => Vec::new(),
    };
    if !removed.iter().any(|b| b == "toImage") {
        removed.push(json!("toImage"));
    }
    config.insert("modeBarButtonsToRemove".into(), Value::Array(removed));
    config.insert("displaylogo".into(), json!(false));

    RenderTriple {
        layout: Value::Object(layout),
        config: Value::Object(config),
        ..triple
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(text: &str) -> String {
        text.to_string()
    }

    fn layers() -> ResolvedLayers {
        ResolvedLayers {
            data: json!([{ "type": "scatter", "name": "$host" }]),
            layout: json!({ "title": { "text": "CPU on $host" }, "margin": { "t": 30 } }),
            ..ResolvedLayers::default()
        }
    }

    #[test]
    fn test_base_and_theme_are_lowest_layer() {
        let triple = compose(&ResolvedLayers::default(), None, &Theme::light(), &identity);
        assert_eq!(triple.layout["paper_bgcolor"], json!("#ffffff"));
        assert_eq!(triple.layout["xaxis"]["type"], json!("date"));
        assert_eq!(triple.layout["xaxis"]["gridcolor"], json!("#f4f5f5"));
        assert_eq!(triple.layout["margin"]["l"], json!(0));
        assert_eq!(triple.data, json!([]));
    }

    #[test]
    fn test_static_layers_are_substituted_and_override_base() {
        let replace = |text: &str| text.replace("$host", "web-1");
        let triple = compose(&layers(), None, &Theme::dark(), &replace);
        assert_eq!(triple.layout["title"]["text"], json!("CPU on web-1"));
        assert_eq!(triple.layout["title"]["automargin"], json!(true));
        assert_eq!(triple.layout["margin"]["t"], json!(30));
        assert_eq!(triple.layout["margin"]["b"], json!(0));
        assert_eq!(triple.data[0]["name"], json!("web-1"));
    }

    #[test]
    fn test_script_output_merges_by_index() {
        let evaluated = json!({
            "data": [{ "x": [1, 2], "y": [3, 4] }, { "x": [5], "type": "bar" }],
            "layout": { "margin": { "t": 5 } }
        });
        let triple = compose(&layers(), Some(&evaluated), &Theme::dark(), &identity);
        let data = triple.data.as_array().unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0]["type"], json!("scatter"));
        assert_eq!(data[0]["x"], json!([1, 2]));
        assert_eq!(data[1]["type"], json!("bar"));
        assert_eq!(triple.layout["margin"]["t"], json!(5));
    }

    #[test]
    fn test_script_output_keeps_static_only_traces() {
        let static_layers = ResolvedLayers {
            data: json!([{ "name": "a" }, { "name": "b" }]),
            ..ResolvedLayers::default()
        };
        let evaluated = json!({ "data": [{ "x": [1] }] });
        let triple = compose(&static_layers, Some(&evaluated), &Theme::dark(), &identity);
        assert_eq!(triple.data.as_array().unwrap().len(), 2);
        assert_eq!(triple.data[1]["name"], json!("b"));
    }

    #[test]
    fn test_overlay_is_floor_for_every_trace() {
        let static_layers = ResolvedLayers {
            all_data: json!({ "line": { "width": 2 }, "marker": { "size": [4] } }),
            ..ResolvedLayers::default()
        };
        let evaluated = json!({ "data": [
            { "x": [1] },
            { "x": [2], "line": { "width": 5 }, "marker": { "size": [1, 2] } }
        ] });
        let triple = compose(&static_layers, Some(&evaluated), &Theme::dark(), &identity);
        assert_eq!(triple.data[0]["line"]["width"], json!(2));
        assert_eq!(triple.data[0]["marker"]["size"], json!([4]));
        assert_eq!(triple.data[1]["line"]["width"], json!(5));
        assert_eq!(triple.data[1]["marker"]["size"], json!([1, 2]));
    }

    #[test]
    fn test_non_object_traces_are_dropped() {
        let evaluated = json!({ "data": [{ "x": [1] }, 7, "text"] });
        let triple = compose(&ResolvedLayers::default(), Some(&evaluated), &Theme::dark(), &identity);
        assert_eq!(triple.data, json!([{ "x": [1] }]));
    }

    #[test]
    fn test_finalize_installs_export_button() {
        let triple = RenderTriple {
            config: json!({
                "modeBarButtonsToAdd": [{ "name": "custom" }],
                "modeBarButtonsToRemove": ["lasso2d"],
                "displaylogo": true
            }),
            ..RenderTriple::default()
        };
        let export = ExportSettings {
            format: ImageFormat::Svg,
            width: Some(800),
            ..ExportSettings::default()
        };
        let done = finalize(triple, 320, &export);

        assert_eq!(done.layout["autosize"], json!(true));
        assert_eq!(done.layout["height"], json!(320));

        let buttons = done.config["modeBarButtonsToAdd"].as_array().unwrap();
        assert_eq!(buttons.len(), 2);
        assert_eq!(buttons[1]["name"], json!(EXPORT_BUTTON));
        assert_eq!(buttons[1]["format"], json!("svg"));
        assert_eq!(buttons[1]["width"], json!(800));
        assert_eq!(buttons[1]["scale"], json!(2.0));
        assert_eq!(done.config["modeBarButtonsToRemove"], json!(["lasso2d", "toImage"]));
        assert_eq!(done.config["displaylogo"], json!(false));
    }

    #[test]
    fn test_finalize_twice_keeps_one_export_button() {
        let once = finalize(RenderTriple::default(), 100, &ExportSettings::default());
        let twice = finalize(once.clone(), 100, &ExportSettings::default());
        assert_eq!(once, twice);
    }
}
