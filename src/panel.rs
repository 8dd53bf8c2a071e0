//! The panel pipeline.
//!
//! [`PlotlyPanel::render`] runs one render pass:
//!
//! 1. skip everything when the inputs are unchanged since the last pass
//! 2. timezone-correct the host's data snapshot
//! 3. evaluate the transformation script
//! 4. compose and finalize the render triple, then check it has data
//! 5. hand the triple to the plotting surface
//!
//! Exactly one [`PanelView`] comes out of every pass. Interaction events and
//! image export are handled by [`PlotlyPanel::handle_event`] and
//! [`PlotlyPanel::export_image`].

use std::rc::Rc;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::composer::{compose, finalize, ExportSettings, RenderTriple, Theme};
use crate::context::{build_context, script_utils, script_variables};
use crate::empty_data::classify;
use crate::host::{ImageRequest, PanelHost, PlotEvent, PlotEventKind, PlotSurface, RenderRequest};
use crate::options::PanelOptions;
use crate::panel_data::{LoadingState, PanelData, TimeRange};
use crate::script_diagnostics::ScriptError;
use crate::scripting::{ScriptEvaluator, ScriptLimits};
use crate::timezone::{correct_panel_data, ChronoOffsets, OffsetDirection, OffsetSource, BROWSER_TIMEZONE};

pub const DATA_ERROR_MESSAGE: &str = "The data source returned an error";
pub const EMPTY_SCRIPT_MESSAGE: &str =
    "Please define a valid transformation within the Script Editor panel";

fn default_time_zone() -> String {
    BROWSER_TIMEZONE.to_string()
}

fn default_width() -> u32 {
    800
}

fn default_height() -> u32 {
    400
}

/// Everything a render pass depends on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelProps {
    #[serde(default)]
    pub options: PanelOptions,

    #[serde(default)]
    pub data: PanelData,

    /// Dashboard time range; falls back to the range carried by `data`.
    #[serde(default)]
    pub time_range: Option<TimeRange>,

    #[serde(default = "default_time_zone")]
    pub time_zone: String,

    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    /// Panel title; the `title` option is used when empty.
    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub theme: Theme,
}

impl Default for PanelProps {
    fn default() -> Self {
        Self {
            options: PanelOptions::default(),
            data: PanelData::default(),
            time_range: None,
            time_zone: default_time_zone(),
            width: default_width(),
            height: default_height(),
            title: String::new(),
            theme: Theme::default(),
        }
    }
}

impl PanelProps {
    pub fn new(options: PanelOptions, data: PanelData) -> Self {
        Self {
            options,
            data,
            ..Self::default()
        }
    }

    fn effective_time_range(&self) -> Option<TimeRange> {
        self.time_range.or(self.data.time_range)
    }

    fn effective_title(&self) -> &str {
        if self.title.trim().is_empty() {
            &self.options.title
        } else {
            &self.title
        }
    }

    fn export_settings(&self) -> ExportSettings {
        ExportSettings {
            format: self.options.img_format,
            width: self.options.export_width,
            height: self.options.export_height,
            scale: self.options.effective_scale(),
        }
    }
}

/// What the panel shows after a render pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "view", rename_all = "camelCase")]
pub enum PanelView {
    Chart { triple: RenderTriple },
    NoData { message: String },
    ScriptError { error: ScriptError },
    Error { message: String },
}

impl PanelView {
    pub fn is_chart(&self) -> bool {
        matches!(self, PanelView::Chart { .. })
    }

    pub fn triple(&self) -> Option<&RenderTriple> {
        match self {
            PanelView::Chart { triple } => Some(triple),
            _ => None,
        }
    }
}

/// Stage of the panel that produced a [`PanelError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelPhase {
    Context,
    Handler,
    Export,
}

impl std::fmt::Display for PanelPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PanelPhase::Context => write!(f, "Context"),
            PanelPhase::Handler => write!(f, "Click Handler"),
            PanelPhase::Export => write!(f, "Image Export"),
        }
    }
}

/// Error raised outside a render pass (events, export).
#[derive(Debug)]
pub struct PanelError {
    pub phase: PanelPhase,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl std::fmt::Display for PanelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.phase, self.message)?;
        if let Some(ref source) = self.source {
            write!(f, ": {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for PanelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl PanelError {
    pub fn new(phase: PanelPhase, message: impl Into<String>) -> Self {
        Self {
            phase,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        phase: PanelPhase,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            phase,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Outcome of [`PlotlyPanel::handle_event`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventOutcome {
    /// Value returned by the click script, if any.
    pub handler_result: Option<Value>,
    /// Time range pushed to the host by a zoom.
    pub time_range: Option<TimeRange>,
}

/// Memoized result of the last render pass.
struct Memo {
    fingerprint: [u8; 32],
    view: PanelView,
}

/// A plotly panel bound to one evaluator.
pub struct PlotlyPanel {
    evaluator: ScriptEvaluator,
    offsets: Rc<dyn OffsetSource>,
    direction: OffsetDirection,
    memo: Option<Memo>,
}

impl Default for PlotlyPanel {
    fn default() -> Self {
        Self::new()
    }
}

impl PlotlyPanel {
    pub fn new() -> Self {
        Self {
            evaluator: ScriptEvaluator::new(),
            offsets: Rc::new(ChronoOffsets),
            direction: OffsetDirection::default(),
            memo: None,
        }
    }

    pub fn with_limits(mut self, limits: &ScriptLimits) -> Self {
        self.evaluator = ScriptEvaluator::with_limits(limits);
        self.memo = None;
        self
    }

    pub fn with_offsets(mut self, offsets: Rc<dyn OffsetSource>) -> Self {
        self.offsets = offsets;
        self.memo = None;
        self
    }

    pub fn with_direction(mut self, direction: OffsetDirection) -> Self {
        self.direction = direction;
        self.memo = None;
        self
    }

    /// Forget the memoized view; the next render re-runs the pipeline.
    pub fn invalidate(&mut self) {
        self.memo = None;
    }

    /// The last script failure, cleared by the next successful evaluation.
    pub fn last_error(&self) -> Option<&ScriptError> {
        self.evaluator.last_error.as_ref()
    }

    /// Run one render pass.
    pub fn render(
        &mut self,
        props: &PanelProps,
        host: &dyn PanelHost,
        surface: &mut dyn PlotSurface,
    ) -> PanelView {
        let fingerprint = fingerprint(props, host);
        if let (Some(memo), Some(fp)) = (&self.memo, &fingerprint) {
            if memo.fingerprint == *fp {
                log::debug!("Inputs unchanged, reusing previous view");
                return memo.view.clone();
            }
        }

        let (view, cacheable) = self.render_pass(props, host, surface);
        self.memo = match (fingerprint, cacheable) {
            (Some(fingerprint), true) => Some(Memo {
                fingerprint,
                view: view.clone(),
            }),
            _ => None,
        };
        view
    }

    fn render_pass(
        &mut self,
        props: &PanelProps,
        host: &dyn PanelHost,
        surface: &mut dyn PlotSurface,
    ) -> (PanelView, bool) {
        if props.data.state == LoadingState::Error {
            log::warn!("Data source reported an error, skipping script");
            return (
                PanelView::Error {
                    message: DATA_ERROR_MESSAGE.to_string(),
                },
                true,
            );
        }

        let options = &props.options;
        if options.script.trim().is_empty() {
            return (
                PanelView::Error {
                    message: EMPTY_SCRIPT_MESSAGE.to_string(),
                },
                true,
            );
        }

        let layers = options.resolve_layers();
        let corrected = self.correct(&props.data, props);

        let time_range = props.effective_time_range();
        let variables = script_variables(&corrected, time_range, host);
        let utils = script_utils(
            &props.time_zone,
            time_range,
            &variables,
            self.offsets.clone(),
            self.direction,
        );
        let commands = utils.commands();
        let context = match build_context(
            &corrected.to_script_value(),
            &variables,
            &options.script_value(&layers),
            utils,
            None,
        ) {
            Ok(context) => context,
            Err(error) => return (PanelView::ScriptError { error }, true),
        };

        let evaluated = self.evaluator.evaluate(&options.script, &context);
        commands.dispatch(host);
        let evaluated = match evaluated {
            Ok(value) => value,
            Err(error) => return (PanelView::ScriptError { error }, true),
        };

        let replace = |text: &str| host.replace_variables(text);
        let triple = compose(&layers, Some(&evaluated), &props.theme, &replace);
        let triple = finalize(triple, props.height, &props.export_settings());

        let check = classify(&triple.data);
        if check.is_empty {
            log::debug!("No data to plot: {}", check.message);
            return (
                PanelView::NoData {
                    message: check.message,
                },
                true,
            );
        }

        let title = host.replace_variables(props.effective_title());
        let request = RenderRequest {
            triple: &triple,
            width: props.width,
            height: props.height,
            title: &title,
        };
        match surface.render(request) {
            Ok(()) => (PanelView::Chart { triple }, true),
            Err(message) => {
                log::error!("Plot surface failed to render: {}", message);
                (PanelView::Error { message }, false)
            }
        }
    }

    /// Timezone-correct from the untouched host snapshot.
    fn correct(&self, data: &PanelData, props: &PanelProps) -> PanelData {
        correct_panel_data(
            data,
            &props.time_zone,
            &props.options.time_col,
            self.offsets.as_ref(),
            self.direction,
        )
    }

    /// React to an interaction reported by the surface.
    ///
    /// Every event runs the `onclick` script with the event bound as `event`.
    /// Zooms first push the new x range to the host when `syncTimeRange` is
    /// on.
    pub fn handle_event(
        &mut self,
        event: &PlotEvent,
        props: &PanelProps,
        host: &dyn PanelHost,
    ) -> Result<EventOutcome, PanelError> {
        let mut outcome = EventOutcome::default();

        if event.kind == PlotEventKind::Zoom && props.options.sync_time_range {
            if let Some(range) = self.zoom_range(&event.payload, &props.time_zone) {
                host.change_time_range(range.from, range.to);
                outcome.time_range = Some(range);
            }
        }
        outcome.handler_result = self.run_click_script(event, props, host)?;

        Ok(outcome)
    }

    fn run_click_script(
        &mut self,
        event: &PlotEvent,
        props: &PanelProps,
        host: &dyn PanelHost,
    ) -> Result<Option<Value>, PanelError> {
        let source = &props.options.onclick;
        if source.trim().is_empty() {
            return Ok(None);
        }

        let corrected = self.correct(&props.data, props);
        let time_range = props.effective_time_range();
        let variables = script_variables(&corrected, time_range, host);
        let utils = script_utils(
            &props.time_zone,
            time_range,
            &variables,
            self.offsets.clone(),
            self.direction,
        );
        let commands = utils.commands();
        let layers = props.options.resolve_layers();
        let context = build_context(
            &corrected.to_script_value(),
            &variables,
            &props.options.script_value(&layers),
            utils,
            Some(event),
        )
        .map_err(|e| PanelError::with_source(PanelPhase::Context, "Failed to build click context", e))?;

        let result = self.evaluator.run_handler(source, &context);
        commands.dispatch(host);
        result.map_err(|e| PanelError::with_source(PanelPhase::Handler, "Click script failed", e))
    }

    /// Extract the new x range from a zoom payload.
    fn zoom_range(&self, payload: &Value, time_zone: &str) -> Option<TimeRange> {
        let (start, end) = match (payload.get("xaxis.range[0]"), payload.get("xaxis.range[1]")) {
            (Some(start), Some(end)) => (start, end),
            _ => {
                let range = payload.get("xaxis.range")?.as_array()?;
                (range.first()?, range.get(1)?)
            }
        };

        let from = self.instant_millis(start, time_zone)?;
        let to = self.instant_millis(end, time_zone)?;
        if from >= to {
            log::warn!("Ignoring zoom with an empty range ({} - {})", from, to);
            return None;
        }
        Some(TimeRange::new(from, to))
    }

    /// Epoch milliseconds from a number or a date string. Strings without an
    /// offset are wall time in `time_zone`.
    fn instant_millis(&self, value: &Value, time_zone: &str) -> Option<i64> {
        if let Some(ms) = value.as_i64() {
            return Some(ms);
        }
        if let Some(ms) = value.as_f64() {
            return Some(ms.round() as i64);
        }

        let text = value.as_str()?.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Some(dt.timestamp_millis());
        }

        let naive = parse_wall_time(text)?;
        let minutes = self
            .offsets
            .offset_minutes(time_zone)
            .unwrap_or_else(|| self.offsets.local_offset_minutes());
        Some(naive.and_utc().timestamp_millis() - i64::from(minutes) * 60_000)
    }

    /// Render the current chart to an image and hand it to the host.
    ///
    /// Returns the file name the host saved it under.
    pub fn export_image(
        &mut self,
        props: &PanelProps,
        host: &dyn PanelHost,
        surface: &mut dyn PlotSurface,
    ) -> Result<String, PanelError> {
        let options = &props.options;
        let current = surface.current_size();
        let request = ImageRequest {
            format: options.img_format,
            width: options
                .export_width
                .or(current.map(|(w, _)| w))
                .unwrap_or(props.width),
            height: options
                .export_height
                .or(current.map(|(_, h)| h))
                .unwrap_or(props.height),
            scale: options.effective_scale(),
        };

        let bytes = surface
            .to_image(&request)
            .map_err(|e| PanelError::new(PanelPhase::Export, format!("Surface could not export: {}", e)))?;

        let title = host.replace_variables(props.effective_title());
        let file_name = format!("{}.{}", title, options.img_format.extension());
        host.save_image(&bytes, &file_name)
            .map_err(|e| PanelError::new(PanelPhase::Export, format!("Failed to save {}: {}", file_name, e)))?;

        log::info!("Exported {} ({}x{} @{}x)", file_name, request.width, request.height, request.scale);
        Ok(file_name)
    }
}

fn parse_wall_time(text: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Hash of every input a render pass reads.
fn fingerprint(props: &PanelProps, host: &dyn PanelHost) -> Option<[u8; 32]> {
    let props_bytes = serde_json::to_vec(props).ok()?;
    let variables_bytes = serde_json::to_vec(&host.template_variables()).ok()?;

    let mut hasher = Sha256::new();
    hasher.update(&props_bytes);
    hasher.update([0u8]);
    hasher.update(&variables_bytes);
    Some(hasher.finalize().into())
}
