//! Panel options and configuration layers.
//!
//! The four configuration layers (`data`, `layout`, `config`, `frames`) and
//! the cross-trace overlay (`allData`) are stored either as structured JSON or
//! as text edited in YAML/JSON mode. [`PanelOptions::resolve_layers`] decodes
//! them once; downstream code only ever sees [`ResolvedLayers`].

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Image export format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Svg,
    #[default]
    Png,
    Jpeg,
    Webp,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Svg => "svg",
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Webp => "webp",
        }
    }
}

/// A configuration layer as stored: structured, or text to decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigLayer {
    Encoded(String),
    Structured(Value),
}

impl Default for ConfigLayer {
    fn default() -> Self {
        ConfigLayer::Structured(Value::Null)
    }
}

impl From<Value> for ConfigLayer {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => ConfigLayer::Encoded(text),
            other => ConfigLayer::Structured(other),
        }
    }
}

/// Text encoding used by the editor for encoded layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorMode {
    Yaml,
    Json,
}

/// Which empty value a layer falls back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LayerShape {
    Sequence,
    Mapping,
}

impl LayerShape {
    fn empty(self) -> Value {
        match self {
            LayerShape::Sequence => Value::Array(Vec::new()),
            LayerShape::Mapping => Value::Object(Default::default()),
        }
    }
}

impl ConfigLayer {
    fn resolve(&self, name: &str, mode: EditorMode, shape: LayerShape) -> Value {
        let decoded = match self {
            ConfigLayer::Structured(value) => Some(value.clone()),
            ConfigLayer::Encoded(text) if text.trim().is_empty() => None,
            ConfigLayer::Encoded(text) => {
                let parsed = match mode {
                    EditorMode::Yaml => serde_yaml::from_str::<Value>(text).map_err(|e| e.to_string()),
                    EditorMode::Json => serde_json::from_str::<Value>(text).map_err(|e| e.to_string()),
                };
                match parsed {
                    Ok(value) => Some(value),
                    Err(e) => {
                        log::warn!("Ignoring malformed '{}' layer: {}", name, e);
                        None
                    }
                }
            }
        };

        match decoded {
            None | Some(Value::Null) => shape.empty(),
            Some(value) => value,
        }
    }
}

/// Decoded configuration layers.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLayers {
    /// Cross-trace overlay.
    pub all_data: Value,
    pub data: Value,
    pub layout: Value,
    pub config: Value,
    pub frames: Value,
}

impl Default for ResolvedLayers {
    fn default() -> Self {
        Self {
            all_data: json!({}),
            data: json!([]),
            layout: json!({}),
            config: json!({}),
            frames: json!([]),
        }
    }
}

impl ResolvedLayers {
    /// The layers as the JSON map scripts see.
    pub fn to_value(&self) -> Value {
        json!({
            "allData": self.all_data,
            "data": self.data,
            "layout": self.layout,
            "config": self.config,
            "frames": self.frames,
        })
    }
}

fn default_res_scale() -> f64 {
    2.0
}

fn default_sync_time_range() -> bool {
    true
}

fn default_title() -> String {
    "Plotly panel".to_string()
}

fn default_yaml_mode() -> bool {
    true
}

fn default_script() -> String {
    DEFAULT_SCRIPT.to_string()
}

fn default_data_layer() -> ConfigLayer {
    ConfigLayer::Structured(json!([]))
}

/// Script installed in new panels: plots the first two fields of the first
/// series, kept commented out.
pub const DEFAULT_SCRIPT: &str = r#"// Basic timeseries plot
// 'data', 'variables', 'options', and 'utils' are passed as arguments
/*
let series = data.series[0];
let x = series.fields[0];
let y = series.fields[1];

return #{
  data: [#{
    x: x.values,
    y: y.values,
    type: "scatter",
    mode: "lines",
    name: x.name
  }],
  layout: #{
    xaxis: #{ title: x.name },
    yaxis: #{ title: y.name }
  }
};
*/
return #{};
"#;

/// The option bag a panel is configured with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelOptions {
    #[serde(default)]
    pub img_format: ImageFormat,

    #[serde(default)]
    pub export_width: Option<u32>,

    #[serde(default)]
    pub export_height: Option<u32>,

    #[serde(default = "default_res_scale")]
    pub res_scale: f64,

    /// Field to timezone-correct; empty disables correction.
    #[serde(default)]
    pub time_col: String,

    #[serde(default = "default_sync_time_range")]
    pub sync_time_range: bool,

    #[serde(default = "default_title")]
    pub title: String,

    #[serde(default)]
    pub all_data: ConfigLayer,

    #[serde(default = "default_data_layer")]
    pub data: ConfigLayer,

    #[serde(default)]
    pub layout: ConfigLayer,

    #[serde(default)]
    pub config: ConfigLayer,

    #[serde(default = "default_data_layer")]
    pub frames: ConfigLayer,

    #[serde(default = "default_script")]
    pub script: String,

    #[serde(default)]
    pub onclick: String,

    /// Encoded layers are YAML when true, JSON otherwise.
    #[serde(default = "default_yaml_mode")]
    pub yaml_mode: bool,
}

impl Default for PanelOptions {
    fn default() -> Self {
        Self {
            img_format: ImageFormat::default(),
            export_width: None,
            export_height: None,
            res_scale: default_res_scale(),
            time_col: String::new(),
            sync_time_range: default_sync_time_range(),
            title: default_title(),
            all_data: ConfigLayer::default(),
            data: default_data_layer(),
            layout: ConfigLayer::default(),
            config: ConfigLayer::default(),
            frames: default_data_layer(),
            script: default_script(),
            onclick: String::new(),
            yaml_mode: default_yaml_mode(),
        }
    }
}

impl PanelOptions {
    pub fn editor_mode(&self) -> EditorMode {
        if self.yaml_mode {
            EditorMode::Yaml
        } else {
            EditorMode::Json
        }
    }

    /// Decode every layer; malformed or missing layers become empty.
    pub fn resolve_layers(&self) -> ResolvedLayers {
        let mode = self.editor_mode();
        ResolvedLayers {
            all_data: self.all_data.resolve("allData", mode, LayerShape::Mapping),
            data: self.data.resolve("data", mode, LayerShape::Sequence),
            layout: self.layout.resolve("layout", mode, LayerShape::Mapping),
            config: self.config.resolve("config", mode, LayerShape::Mapping),
            frames: self.frames.resolve("frames", mode, LayerShape::Sequence),
        }
    }

    /// Resolution scale for exports; non-positive values fall back to 2.
    pub fn effective_scale(&self) -> f64 {
        if self.res_scale.is_finite() && self.res_scale > 0.0 {
            self.res_scale
        } else {
            default_res_scale()
        }
    }

    /// The `options` value scripts receive: scalar options plus decoded layers.
    pub fn script_value(&self, layers: &ResolvedLayers) -> Value {
        let mut value = layers.to_value();
        if let Value::Object(map) = &mut value {
            map.insert("imgFormat".into(), json!(self.img_format.extension()));
            map.insert("exportWidth".into(), json!(self.export_width));
            map.insert("exportHeight".into(), json!(self.export_height));
            map.insert("resScale".into(), json!(self.effective_scale()));
            map.insert("timeCol".into(), json!(self.time_col));
            map.insert("syncTimeRange".into(), json!(self.sync_time_range));
            map.insert("title".into(), json!(self.title));
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let options: PanelOptions = serde_json::from_value(json!({})).unwrap();
        assert_eq!(options, PanelOptions::default());
        assert_eq!(options.img_format, ImageFormat::Png);
        assert_eq!(options.res_scale, 2.0);
        assert!(options.sync_time_range);
        assert!(options.script.contains("return #{};"));
    }

    #[test]
    fn test_yaml_layers_decode() {
        let options: PanelOptions = serde_json::from_value(json!({
            "yamlMode": true,
            "layout": "xaxis:\n  title: time\nmargin:\n  t: 10\n",
            "data": "- type: bar\n  name: $host\n",
            "config": { "responsive": true }
        }))
        .unwrap();

        let layers = options.resolve_layers();
        assert_eq!(layers.layout, json!({ "xaxis": { "title": "time" }, "margin": { "t": 10 } }));
        assert_eq!(layers.data, json!([{ "type": "bar", "name": "$host" }]));
        assert_eq!(layers.config, json!({ "responsive": true }));
        assert_eq!(layers.frames, json!([]));
        assert_eq!(layers.all_data, json!({}));
    }

    #[test]
    fn test_json_mode_and_malformed_text() {
        let options: PanelOptions = serde_json::from_value(json!({
            "yamlMode": false,
            "layout": "{\"title\": \"x\"}",
            "config": "{ not json",
            "frames": ""
        }))
        .unwrap();

        let layers = options.resolve_layers();
        assert_eq!(layers.layout, json!({ "title": "x" }));
        assert_eq!(layers.config, json!({}));
        assert_eq!(layers.frames, json!([]));
    }

    #[test]
    fn test_null_layers_become_empty() {
        let options: PanelOptions =
            serde_json::from_value(json!({ "data": null, "allData": null })).unwrap();
        let layers = options.resolve_layers();
        assert_eq!(layers.data, json!([]));
        assert_eq!(layers.all_data, json!({}));
    }

    #[test]
    fn test_effective_scale() {
        let mut options = PanelOptions::default();
        options.res_scale = 0.0;
        assert_eq!(options.effective_scale(), 2.0);
        options.res_scale = 3.0;
        assert_eq!(options.effective_scale(), 3.0);
    }

    #[test]
    fn test_script_value_contains_layers_and_scalars() {
        let options = PanelOptions {
            time_col: "time".into(),
            ..PanelOptions::default()
        };
        let value = options.script_value(&options.resolve_layers());
        assert_eq!(value["timeCol"], json!("time"));
        assert_eq!(value["data"], json!([]));
        assert_eq!(value["imgFormat"], json!("png"));
    }
}
