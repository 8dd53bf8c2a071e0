//! Host data contract.
//!
//! These types mirror the shape of the data frames a dashboard host hands to a
//! panel (`series[].fields[].values`, `timeRange`, `request`). They are
//! deserialized straight from the host's JSON and are never mutated by the
//! pipeline; every transform produces a new `PanelData`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Loading state reported by the data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LoadingState {
    NotStarted,
    Loading,
    Streaming,
    #[default]
    Done,
    Error,
}

/// Declared role of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Time,
    Number,
    String,
    Boolean,
    #[default]
    #[serde(other)]
    Other,
}

/// A named column of values.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub name: String,

    #[serde(rename = "type", default)]
    pub field_type: FieldType,

    #[serde(default)]
    pub values: Vec<Value>,

    /// Display configuration attached by the host (units, display name...).
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub config: Value,
}

impl Field {
    pub fn new(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            field_type: FieldType::Other,
            values,
            config: Value::Null,
        }
    }

    pub fn with_type(mut self, field_type: FieldType) -> Self {
        self.field_type = field_type;
        self
    }
}

/// One data frame: an ordered list of fields sharing a row index.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Series {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_id: Option<String>,

    #[serde(default)]
    pub fields: Vec<Field>,
}

impl Series {
    pub fn new(fields: Vec<Field>) -> Self {
        Self {
            name: None,
            ref_id: None,
            fields,
        }
    }
}

/// Absolute time range in epoch milliseconds.
///
/// Hosts send either epoch numbers or RFC 3339 strings; both are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    #[serde(deserialize_with = "deserialize_instant")]
    pub from: i64,
    #[serde(deserialize_with = "deserialize_instant")]
    pub to: i64,
}

impl TimeRange {
    pub fn new(from: i64, to: i64) -> Self {
        Self { from, to }
    }
}

fn deserialize_instant<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Instant {
        Millis(i64),
        Float(f64),
        Text(String),
    }

    match Instant::deserialize(deserializer)? {
        Instant::Millis(ms) => Ok(ms),
        Instant::Float(ms) => Ok(ms.round() as i64),
        Instant::Text(text) => chrono::DateTime::parse_from_rfc3339(&text)
            .map(|dt| dt.timestamp_millis())
            .map_err(|e| serde::de::Error::custom(format!("invalid instant {text:?}: {e}"))),
    }
}

/// Query metadata attached to the data.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataRequest {
    #[serde(default)]
    pub interval: String,

    #[serde(default)]
    pub interval_ms: u64,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub scoped_vars: Value,

    #[serde(rename = "dashboardUID", default, skip_serializing_if = "Option::is_none")]
    pub dashboard_uid: Option<String>,
}

/// Everything the host delivers for one query result.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelData {
    #[serde(default)]
    pub state: LoadingState,

    #[serde(default)]
    pub series: Vec<Series>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<DataRequest>,
}

impl PanelData {
    pub fn from_series(series: Vec<Series>) -> Self {
        Self {
            series,
            ..Default::default()
        }
    }

    /// JSON snapshot handed to scripts as `data`.
    pub fn to_script_value(&self) -> Value {
        match serde_json::to_value(self) {
            Ok(value) => value,
            Err(e) => {
                log::error!("Failed to snapshot panel data for scripts: {}", e);
                Value::Null
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_host_frames() {
        let data: PanelData = serde_json::from_value(json!({
            "state": "Done",
            "series": [{
                "refId": "A",
                "fields": [
                    { "name": "time", "type": "time", "values": [1000, 2000] },
                    { "name": "value", "type": "number", "values": [1.5, null] },
                    { "name": "blob", "type": "frame", "values": [] }
                ]
            }],
            "timeRange": { "from": "2024-01-01T00:00:00Z", "to": 1704070800000_i64 },
            "request": { "interval": "1m", "intervalMs": 60000, "dashboardUID": "abc" }
        }))
        .unwrap();

        let fields = &data.series[0].fields;
        assert_eq!(fields[0].field_type, FieldType::Time);
        assert_eq!(fields[1].values[1], Value::Null);
        assert_eq!(fields[2].field_type, FieldType::Other);

        let range = data.time_range.unwrap();
        assert_eq!(range.from, 1_704_067_200_000);
        assert_eq!(range.to, 1_704_070_800_000);
        assert_eq!(data.request.unwrap().dashboard_uid.as_deref(), Some("abc"));
    }

    #[test]
    fn test_missing_sections_default() {
        let data: PanelData = serde_json::from_value(json!({})).unwrap();
        assert_eq!(data.state, LoadingState::Done);
        assert!(data.series.is_empty());
    }

    #[test]
    fn test_script_snapshot_shape() {
        let data = PanelData::from_series(vec![Series::new(vec![Field::new(
            "x",
            vec![json!(1), json!(2)],
        )])]);
        let snapshot = data.to_script_value();
        assert_eq!(snapshot["series"][0]["fields"][0]["values"], json!([1, 2]));
        assert_eq!(snapshot["state"], json!("Done"));
    }
}
