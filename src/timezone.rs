//! Timestamp column correction.
//!
//! The plotting surface re-localizes absolute timestamps into the viewer's
//! local zone. To display a column in the dashboard's zone instead, every
//! value of the configured time column is shifted by the difference between
//! the local offset and the target offset.

use chrono::Local;
use serde_json::{Number, Value};

use crate::panel_data::{Field, PanelData, Series};

/// Sentinel meaning "use the viewer's local zone".
pub const BROWSER_TIMEZONE: &str = "browser";

const MS_PER_MINUTE: i64 = 60_000;

/// Resolves UTC offsets (in minutes east of UTC) for timezone identifiers.
pub trait OffsetSource {
    /// Offset of the ambient zone the plotting surface localizes into.
    fn local_offset_minutes(&self) -> i32;

    /// Offset of `tz`, or `None` if the identifier is not understood.
    fn offset_minutes(&self, tz: &str) -> Option<i32>;
}

/// Offsets backed by `chrono::Local` plus fixed-offset parsing.
///
/// Named zones (`Europe/Paris`) need a host-provided `OffsetSource`; this one
/// only understands `browser`, `utc` and literal offsets such as `+05:30`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChronoOffsets;

impl OffsetSource for ChronoOffsets {
    fn local_offset_minutes(&self) -> i32 {
        Local::now().offset().local_minus_utc() / 60
    }

    fn offset_minutes(&self, tz: &str) -> Option<i32> {
        if is_local(tz) {
            return Some(self.local_offset_minutes());
        }
        parse_fixed_offset(tz)
    }
}

/// An offset source with fixed answers, for hosts that resolve zones
/// themselves and for deterministic tests.
#[derive(Debug, Clone, Default)]
pub struct FixedOffsets {
    pub local_minutes: i32,
    pub zones: Vec<(String, i32)>,
}

impl FixedOffsets {
    pub fn new(local_minutes: i32) -> Self {
        Self {
            local_minutes,
            zones: Vec::new(),
        }
    }

    pub fn with_zone(mut self, name: impl Into<String>, minutes: i32) -> Self {
        self.zones.push((name.into(), minutes));
        self
    }
}

impl OffsetSource for FixedOffsets {
    fn local_offset_minutes(&self) -> i32 {
        self.local_minutes
    }

    fn offset_minutes(&self, tz: &str) -> Option<i32> {
        if is_local(tz) {
            return Some(self.local_minutes);
        }
        self.zones
            .iter()
            .find(|(name, _)| name == tz)
            .map(|(_, minutes)| *minutes)
            .or_else(|| parse_fixed_offset(tz))
    }
}

fn is_local(tz: &str) -> bool {
    let tz = tz.trim();
    tz.is_empty() || tz == BROWSER_TIMEZONE
}

/// Parse `utc`, `Z`, `+05:30`, `-0800`, `UTC+2`, `GMT-03:00` into minutes.
pub fn parse_fixed_offset(tz: &str) -> Option<i32> {
    let tz = tz.trim();
    if tz.eq_ignore_ascii_case("z") {
        return Some(0);
    }

    let upper = tz.to_ascii_uppercase();
    let (rest, had_prefix) = match upper
        .strip_prefix("UTC")
        .or_else(|| upper.strip_prefix("GMT"))
    {
        Some(rest) => (rest, true),
        None => (upper.as_str(), false),
    };

    if rest.is_empty() {
        return had_prefix.then_some(0);
    }

    let (sign, digits) = match rest.as_bytes()[0] {
        b'+' => (1, &rest[1..]),
        b'-' => (-1, &rest[1..]),
        _ => return None,
    };
    if !digits.bytes().all(|b| b.is_ascii_digit() || b == b':') {
        return None;
    }

    let (hours, minutes) = match digits.split_once(':') {
        Some((h, m)) => (h, m),
        None if digits.len() > 2 => digits.split_at(digits.len() - 2),
        None => (digits, "0"),
    };

    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 14 || minutes >= 60 {
        return None;
    }
    Some(sign * (hours * 60 + minutes))
}

/// Which way the offset is applied to each timestamp.
///
/// `Subtract` implements `value - (local - target) * 60000`, which is what the
/// plotting surface needs; `Add` exists for surfaces that localize the other
/// way round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetDirection {
    #[default]
    Subtract,
    Add,
}

/// Signed correction in milliseconds for displaying in `tz`.
pub fn offset_millis(offsets: &dyn OffsetSource, tz: &str) -> i64 {
    let local = offsets.local_offset_minutes();
    let target = offsets.offset_minutes(tz).unwrap_or_else(|| {
        log::warn!("Unknown timezone '{}', falling back to the local zone", tz);
        local
    });
    i64::from(local - target) * MS_PER_MINUTE
}

/// Shift one timestamp. Non-numeric values pass through untouched.
pub fn shift_timestamp(value: &Value, offset_ms: i64, direction: OffsetDirection) -> Value {
    let delta = match direction {
        OffsetDirection::Subtract => -offset_ms,
        OffsetDirection::Add => offset_ms,
    };
    if delta == 0 {
        return value.clone();
    }

    match value {
        Value::Number(n) => {
            if let Some(ms) = n.as_i64() {
                match ms.checked_add(delta) {
                    Some(shifted) => Value::from(shifted),
                    None => value.clone(),
                }
            } else if let Some(ms) = n.as_f64() {
                Number::from_f64(ms + delta as f64)
                    .map(Value::Number)
                    .unwrap_or_else(|| value.clone())
            } else {
                value.clone()
            }
        }
        other => other.clone(),
    }
}

/// Shift a column of timestamps so they display in `tz`.
pub fn match_timezone(
    values: &[Value],
    tz: &str,
    offsets: &dyn OffsetSource,
    direction: OffsetDirection,
) -> Vec<Value> {
    let offset = offset_millis(offsets, tz);
    values
        .iter()
        .map(|v| shift_timestamp(v, offset, direction))
        .collect()
}

/// Correct every field named `time_col` in every series.
///
/// Returns a new `PanelData`; the input is left untouched so the correction
/// can be recomputed from the untouched snapshot on each render. An empty
/// `time_col` or a column that does not exist leaves the data unchanged.
pub fn correct_panel_data(
    data: &PanelData,
    time_zone: &str,
    time_col: &str,
    offsets: &dyn OffsetSource,
    direction: OffsetDirection,
) -> PanelData {
    if time_col.is_empty() || data.series.is_empty() {
        return data.clone();
    }

    let offset = offset_millis(offsets, time_zone);
    let mut matched = 0usize;

    let series = data
        .series
        .iter()
        .map(|series| Series {
            fields: series
                .fields
                .iter()
                .map(|field| {
                    if field.name != time_col {
                        return field.clone();
                    }
                    matched += 1;
                    Field {
                        values: field
                            .values
                            .iter()
                            .map(|v| shift_timestamp(v, offset, direction))
                            .collect(),
                        ..field.clone()
                    }
                })
                .collect(),
            ..series.clone()
        })
        .collect();

    if matched == 0 {
        log::debug!("Time column '{}' not present, no correction applied", time_col);
    }

    PanelData {
        series,
        ..data.clone()
    }
}
