//! The `utils` object handed to scripts.
//!
//! ```rhai
//! let tz = utils.timeZone;
//! let shifted = utils.matchTimezone(field.values, "utc");
//! let label = utils.formatTime(utils.from, "%Y-%m-%d %H:%M");
//! utils.log.info(utils.replaceVariables("host is $host"));
//! utils.log.info(utils.dayjs(variables.__from).format());
//! utils.locationService.partial(#{ "var-host": "web-1" }, true);
//! utils.changeTimeRange(utils.from, utils.to);
//! ```
//!
//! Calls that act on the dashboard are queued on a [`CommandQueue`] and
//! applied by the panel once the script returns.

use std::rc::Rc;

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use rhai::{Array, Dynamic, Engine, EvalAltResult, ImmutableString, Map};
use serde_json::Value;

use crate::host::{CommandQueue, HostCommand};
use crate::panel_data::TimeRange;
use crate::script_log::ScriptLogger;
use crate::substitute::TemplateVariables;
use crate::timezone::{offset_millis, OffsetDirection, OffsetSource};

/// Host services exposed to a single evaluation.
#[derive(Clone)]
pub struct ScriptUtils {
    time_zone: String,
    time_range: Option<TimeRange>,
    variables: Rc<TemplateVariables>,
    offsets: Rc<dyn OffsetSource>,
    direction: OffsetDirection,
    commands: CommandQueue,
}

impl ScriptUtils {
    pub fn new(
        time_zone: impl Into<String>,
        time_range: Option<TimeRange>,
        variables: Rc<TemplateVariables>,
        offsets: Rc<dyn OffsetSource>,
        direction: OffsetDirection,
    ) -> Self {
        Self {
            time_zone: time_zone.into(),
            time_range,
            variables,
            offsets,
            direction,
            commands: CommandQueue::new(),
        }
    }

    pub fn time_zone(&self) -> &str {
        &self.time_zone
    }

    /// Handle on the queue this evaluation pushes host commands to.
    pub fn commands(&self) -> CommandQueue {
        self.commands.clone()
    }

    /// UTC offset of the panel's zone in minutes.
    fn zone_minutes(&self) -> i32 {
        self.offsets
            .offset_minutes(&self.time_zone)
            .unwrap_or_else(|| self.offsets.local_offset_minutes())
    }

    /// Shift numeric timestamps so they display in `tz`.
    pub fn match_timezone(&self, values: &Array, tz: &str) -> Array {
        let offset = offset_millis(self.offsets.as_ref(), tz);
        let delta = match self.direction {
            OffsetDirection::Subtract => -offset,
            OffsetDirection::Add => offset,
        };
        values.iter().map(|v| shift_dynamic(v, delta)).collect()
    }

    pub fn replace_variables(&self, text: &str) -> String {
        self.variables.replace(text)
    }

    /// Format epoch milliseconds as wall time in the panel's zone.
    pub fn format_time(&self, millis: i64, format: &str) -> String {
        match self.date(millis).local() {
            Some(local) => local.format(format).to_string(),
            None => String::new(),
        }
    }

    /// `millis` as a date displayed in the panel's zone.
    pub fn date(&self, millis: i64) -> ScriptDate {
        ScriptDate {
            millis,
            offset_minutes: self.zone_minutes(),
        }
    }

    pub fn change_time_range(&self, from: i64, to: i64) {
        self.commands.push(HostCommand::ChangeTimeRange { from, to });
    }
}

/// A point in time handed to scripts by `utils.dayjs(...)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptDate {
    millis: i64,
    offset_minutes: i32,
}

impl ScriptDate {
    fn local(&self) -> Option<DateTime<FixedOffset>> {
        let zone = FixedOffset::east_opt(self.offset_minutes * 60)?;
        DateTime::<Utc>::from_timestamp_millis(self.millis).map(|utc| utc.with_timezone(&zone))
    }

    pub fn millis(&self) -> i64 {
        self.millis
    }

    /// RFC 3339 with the zone's offset, or a `strftime` pattern.
    pub fn format(&self, pattern: Option<&str>) -> String {
        match (self.local(), pattern) {
            (Some(local), Some(pattern)) => local.format(pattern).to_string(),
            (Some(local), None) => local.to_rfc3339_opts(SecondsFormat::Secs, false),
            (None, _) => "Invalid Date".to_string(),
        }
    }
}

/// Parse epoch milliseconds or an RFC 3339 string.
fn parse_instant(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Ok(ms) = text.parse::<i64>() {
        return Some(ms);
    }
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

/// `utils.locationService`: URL updates.
#[derive(Clone)]
pub struct LocationService {
    commands: CommandQueue,
}

impl LocationService {
    pub fn partial(&self, query: Value, replace: bool) {
        self.commands
            .push(HostCommand::UpdateLocation { query, replace });
    }
}

/// `utils.getTemplateSrv()`: read access to dashboard variables.
#[derive(Clone)]
pub struct TemplateSrv {
    variables: Rc<TemplateVariables>,
}

impl TemplateSrv {
    fn variables(&self) -> Array {
        self.variables
            .entries()
            .into_iter()
            .map(|(name, text)| {
                let mut entry = Map::new();
                entry.insert("name".into(), Dynamic::from(name.to_string()));
                entry.insert("text".into(), Dynamic::from(text.to_string()));
                Dynamic::from_map(entry)
            })
            .collect()
    }
}

fn shift_dynamic(value: &Dynamic, delta: i64) -> Dynamic {
    if let Ok(ms) = value.as_int() {
        return Dynamic::from(ms.saturating_add(delta));
    }
    if let Ok(ms) = value.as_float() {
        return Dynamic::from(ms + delta as f64);
    }
    value.clone()
}

fn range_bound(utils: &ScriptUtils, pick: fn(&TimeRange) -> i64) -> Dynamic {
    utils
        .time_range
        .as_ref()
        .map(|r| Dynamic::from(pick(r)))
        .unwrap_or(Dynamic::UNIT)
}

/// Register the `Utils` type and its members with a Rhai engine.
pub fn register_utils_api(engine: &mut Engine) {
    engine.register_type_with_name::<ScriptUtils>("Utils");

    engine.register_get("timeZone", |u: &mut ScriptUtils| -> ImmutableString {
        u.time_zone.as_str().into()
    });
    engine.register_get("from", |u: &mut ScriptUtils| range_bound(u, |r| r.from));
    engine.register_get("to", |u: &mut ScriptUtils| range_bound(u, |r| r.to));
    engine.register_get("log", |_u: &mut ScriptUtils| ScriptLogger::new());

    engine.register_fn(
        "matchTimezone",
        |u: &mut ScriptUtils, values: Array, tz: ImmutableString| -> Array {
            u.match_timezone(&values, tz.as_str())
        },
    );
    engine.register_fn("matchTimezone", |u: &mut ScriptUtils, values: Array| -> Array {
        let tz = u.time_zone.clone();
        u.match_timezone(&values, &tz)
    });

    engine.register_fn(
        "replaceVariables",
        |u: &mut ScriptUtils, text: ImmutableString| -> String { u.replace_variables(text.as_str()) },
    );

    engine.register_fn(
        "formatTime",
        |u: &mut ScriptUtils, millis: i64, format: ImmutableString| -> String {
            u.format_time(millis, format.as_str())
        },
    );
    engine.register_fn(
        "formatTime",
        |u: &mut ScriptUtils, millis: f64, format: ImmutableString| -> String {
            u.format_time(millis.round() as i64, format.as_str())
        },
    );

    engine.register_fn("now", |_u: &mut ScriptUtils| -> i64 { Utc::now().timestamp_millis() });

    engine.register_fn(
        "changeTimeRange",
        |u: &mut ScriptUtils, from: i64, to: i64| u.change_time_range(from, to),
    );
    engine.register_fn(
        "changeTimeRange",
        |u: &mut ScriptUtils, from: f64, to: f64| {
            u.change_time_range(from.round() as i64, to.round() as i64)
        },
    );

    register_date_api(engine);
    register_location_api(engine);
    register_template_api(engine);
}

fn register_date_api(engine: &mut Engine) {
    engine.register_type_with_name::<ScriptDate>("Date");

    engine.register_fn("dayjs", |u: &mut ScriptUtils| u.date(Utc::now().timestamp_millis()));
    engine.register_fn("dayjs", |u: &mut ScriptUtils, millis: i64| u.date(millis));
    engine.register_fn("dayjs", |u: &mut ScriptUtils, millis: f64| u.date(millis.round() as i64));
    engine.register_fn(
        "dayjs",
        |u: &mut ScriptUtils, text: ImmutableString| -> Result<ScriptDate, Box<EvalAltResult>> {
            parse_instant(text.as_str())
                .map(|millis| u.date(millis))
                .ok_or_else(|| format!("Invalid date: '{}'", text).into())
        },
    );

    engine.register_fn("format", |d: &mut ScriptDate| d.format(None));
    engine.register_fn("format", |d: &mut ScriptDate, pattern: ImmutableString| {
        d.format(Some(pattern.as_str()))
    });
    engine.register_fn("valueOf", |d: &mut ScriptDate| d.millis());
    engine.register_fn("to_string", |d: &mut ScriptDate| d.format(None));
    engine.register_fn("to_debug", |d: &mut ScriptDate| d.format(None));
}

fn register_location_api(engine: &mut Engine) {
    engine.register_type_with_name::<LocationService>("LocationService");

    engine.register_get("locationService", |u: &mut ScriptUtils| LocationService {
        commands: u.commands(),
    });

    engine.register_fn(
        "partial",
        |l: &mut LocationService, query: Map, replace: bool| -> Result<(), Box<EvalAltResult>> {
            let query: Value = rhai::serde::from_dynamic(&Dynamic::from_map(query))?;
            l.partial(query, replace);
            Ok(())
        },
    );
    engine.register_fn(
        "partial",
        |l: &mut LocationService, query: Map| -> Result<(), Box<EvalAltResult>> {
            let query: Value = rhai::serde::from_dynamic(&Dynamic::from_map(query))?;
            l.partial(query, false);
            Ok(())
        },
    );
}

fn register_template_api(engine: &mut Engine) {
    engine.register_type_with_name::<TemplateSrv>("TemplateSrv");

    // Both `utils.getTemplateSrv()` and the migrated bare `utils.getTemplateSrv`.
    engine.register_fn("getTemplateSrv", |u: &mut ScriptUtils| TemplateSrv {
        variables: u.variables.clone(),
    });
    engine.register_get("getTemplateSrv", |u: &mut ScriptUtils| TemplateSrv {
        variables: u.variables.clone(),
    });

    engine.register_fn(
        "replace",
        |t: &mut TemplateSrv, text: ImmutableString| -> String { t.variables.replace(text.as_str()) },
    );
    engine.register_fn("getVariables", |t: &mut TemplateSrv| t.variables());
}
