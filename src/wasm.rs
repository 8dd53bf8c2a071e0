use serde::Serialize;
use serde_json::Value;
use wasm_bindgen::prelude::*;

use crate::host::{HostCommand, PlotEvent, RecordingSurface, StaticHost, TemplateVariable};
use crate::migrations::migrate_options;
use crate::panel::{PanelProps, PlotlyPanel};
use crate::panel_data::TimeRange;
use crate::scripting::ScriptEvaluator;

/// Event result as seen by the page.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EventResultJson {
    handler_result: Option<Value>,
    time_range: Option<TimeRange>,
    commands: Vec<HostCommand>,
}

#[derive(Serialize)]
struct MigrationJson {
    options: Value,
    changed: bool,
}

#[wasm_bindgen]
pub fn init_panic_hook() {
    console_error_panic_hook::set_once();
    let _ = console_log::init_with_level(log::Level::Info);
}

fn to_js_error(message: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&message.to_string())
}

/// Rewrite legacy identifiers in stored options. Returns `{options, changed}`.
#[wasm_bindgen]
pub fn migrate(options_json: &str, stored_version: Option<String>) -> Result<String, JsValue> {
    let options: Value = serde_json::from_str(options_json).map_err(to_js_error)?;
    let migration = migrate_options(options, stored_version.as_deref());
    serde_json::to_string(&MigrationJson {
        options: migration.options,
        changed: migration.changed,
    })
    .map_err(to_js_error)
}

/// Compile a script. Returns an empty string when it compiles, otherwise the
/// diagnostics as JSON.
#[wasm_bindgen]
pub fn check_script(source: &str, onclick: bool) -> String {
    let mut params = vec!["data", "variables", "options", "utils"];
    if onclick {
        params.push("event");
    }
    match ScriptEvaluator::new().check(source, &params) {
        Ok(()) => String::new(),
        Err(e) => serde_json::to_string(&e).unwrap_or_else(|_| e.to_string()),
    }
}

/// A panel driven from the page. The page owns the plotting library: it draws
/// the `triple` of a chart view and reports interactions back.
#[wasm_bindgen]
pub struct WasmPanel {
    panel: PlotlyPanel,
    host: StaticHost,
    surface: RecordingSurface,
}

#[wasm_bindgen]
impl WasmPanel {
    #[wasm_bindgen(constructor)]
    pub fn new() -> Self {
        Self {
            panel: PlotlyPanel::new(),
            host: StaticHost::new(),
            surface: RecordingSurface::new(),
        }
    }

    /// Replace the dashboard variables (`[{name, text}]`).
    pub fn set_variables(&mut self, variables_json: &str) -> Result<(), JsValue> {
        let variables: Vec<TemplateVariable> =
            serde_json::from_str(variables_json).map_err(to_js_error)?;
        self.host = variables
            .into_iter()
            .fold(StaticHost::new(), |host, v| host.with_variable(v.name, v.text));
        log::info!("Dashboard variables updated");
        Ok(())
    }

    /// Run a render pass. Returns the panel view as JSON.
    pub fn render(&mut self, props_json: &str) -> Result<String, JsValue> {
        let props: PanelProps = serde_json::from_str(props_json).map_err(to_js_error)?;
        let view = self.panel.render(&props, &self.host, &mut self.surface);
        serde_json::to_string(&view).map_err(to_js_error)
    }

    /// Handle a plot interaction (`{kind, payload}`).
    ///
    /// Time range changes requested by zooms are returned in `timeRange`, and
    /// everything the dashboard should do (including that change) in
    /// `commands`; the page applies them.
    pub fn handle_event(&mut self, event_json: &str, props_json: &str) -> Result<String, JsValue> {
        let event: PlotEvent = serde_json::from_str(event_json).map_err(to_js_error)?;
        let props: PanelProps = serde_json::from_str(props_json).map_err(to_js_error)?;
        let outcome = self
            .panel
            .handle_event(&event, &props, &self.host)
            .map_err(to_js_error)?;
        serde_json::to_string(&EventResultJson {
            handler_result: outcome.handler_result,
            time_range: outcome.time_range,
            commands: self.host.take_commands(),
        })
        .map_err(to_js_error)
    }

    /// Drain commands queued by render scripts, as a JSON array.
    pub fn take_commands(&mut self) -> Result<String, JsValue> {
        serde_json::to_string(&self.host.take_commands()).map_err(to_js_error)
    }

    /// Forget the memoized view.
    pub fn invalidate(&mut self) {
        self.panel.invalidate();
    }
}

impl Default for WasmPanel {
    fn default() -> Self {
        Self::new()
    }
}
