//! Interfaces to the embedding dashboard and the plotting surface.
//!
//! The panel never reaches for globals: everything it needs from the outside
//! comes through [`PanelHost`] and [`PlotSurface`]. [`StaticHost`] and
//! [`RecordingSurface`] are in-memory implementations used by the CLI and tests.

use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::composer::RenderTriple;
use crate::options::ImageFormat;
use crate::substitute::TemplateVariables;

/// A dashboard template variable and its current text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateVariable {
    pub name: String,
    pub text: String,
}

impl TemplateVariable {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

/// Services provided by the dashboard the panel is embedded in.
pub trait PanelHost {
    /// Expand template variable references in `text`.
    fn replace_variables(&self, text: &str) -> String;

    /// Current dashboard variables, in dashboard order.
    fn template_variables(&self) -> Vec<TemplateVariable>;

    /// Move the dashboard time range (epoch milliseconds).
    fn change_time_range(&self, from: i64, to: i64);

    /// Merge `query` into the dashboard URL. `replace` swaps the current
    /// history entry instead of pushing a new one.
    fn update_location(&self, query: &Value, replace: bool);

    /// Hand an exported image to the user under `file_name`.
    fn save_image(&self, bytes: &[u8], file_name: &str) -> Result<(), String>;
}

/// A request from a script or an interaction for the dashboard to act.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum HostCommand {
    ChangeTimeRange { from: i64, to: i64 },
    UpdateLocation { query: Value, replace: bool },
}

impl HostCommand {
    pub fn apply(&self, host: &dyn PanelHost) {
        match self {
            HostCommand::ChangeTimeRange { from, to } => host.change_time_range(*from, *to),
            HostCommand::UpdateLocation { query, replace } => host.update_location(query, *replace),
        }
    }
}

/// Commands queued while a script runs. Clones share one queue.
#[derive(Debug, Clone, Default)]
pub struct CommandQueue(Rc<RefCell<Vec<HostCommand>>>);

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, command: HostCommand) {
        self.0.borrow_mut().push(command);
    }

    pub fn take(&self) -> Vec<HostCommand> {
        std::mem::take(&mut *self.0.borrow_mut())
    }

    /// Apply and clear every queued command. Returns how many ran.
    pub fn dispatch(&self, host: &dyn PanelHost) -> usize {
        let commands = self.take();
        for command in &commands {
            log::debug!("Dispatching {:?}", command);
            command.apply(host);
        }
        commands.len()
    }
}

/// Host backed by a fixed variable table. Records outbound calls until they
/// are taken.
#[derive(Debug, Default)]
pub struct StaticHost {
    variables: Vec<TemplateVariable>,
    table: TemplateVariables,
    commands: RefCell<Vec<HostCommand>>,
    saved_images: RefCell<Vec<(String, usize)>>,
}

impl StaticHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variable(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        let variable = TemplateVariable::new(name, text);
        self.table.insert(variable.name.clone(), variable.text.clone());
        self.variables.retain(|v| v.name != variable.name);
        self.variables.push(variable);
        self
    }

    /// Time ranges requested and not yet taken.
    pub fn time_range_changes(&self) -> Vec<(i64, i64)> {
        self.commands
            .borrow()
            .iter()
            .filter_map(|c| match c {
                HostCommand::ChangeTimeRange { from, to } => Some((*from, *to)),
                _ => None,
            })
            .collect()
    }

    /// Location updates requested and not yet taken.
    pub fn location_updates(&self) -> Vec<(Value, bool)> {
        self.commands
            .borrow()
            .iter()
            .filter_map(|c| match c {
                HostCommand::UpdateLocation { query, replace } => Some((query.clone(), *replace)),
                _ => None,
            })
            .collect()
    }

    /// Drain every recorded command, oldest first.
    pub fn take_commands(&self) -> Vec<HostCommand> {
        std::mem::take(&mut *self.commands.borrow_mut())
    }

    /// File names and byte counts of saved images.
    pub fn saved_images(&self) -> Vec<(String, usize)> {
        self.saved_images.borrow().clone()
    }
}

impl PanelHost for StaticHost {
    fn replace_variables(&self, text: &str) -> String {
        self.table.replace(text)
    }

    fn template_variables(&self) -> Vec<TemplateVariable> {
        self.variables.clone()
    }

    fn change_time_range(&self, from: i64, to: i64) {
        log::info!("Time range change requested: {} - {}", from, to);
        self.commands
            .borrow_mut()
            .push(HostCommand::ChangeTimeRange { from, to });
    }

    fn update_location(&self, query: &Value, replace: bool) {
        log::info!("Location update requested: {}", query);
        self.commands.borrow_mut().push(HostCommand::UpdateLocation {
            query: query.clone(),
            replace,
        });
    }

    fn save_image(&self, bytes: &[u8], file_name: &str) -> Result<(), String> {
        self.saved_images
            .borrow_mut()
            .push((file_name.to_string(), bytes.len()));
        Ok(())
    }
}

/// One render call handed to the plotting surface.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    pub triple: &'a RenderTriple,
    pub width: u32,
    pub height: u32,
    pub title: &'a str,
}

/// Parameters for an image export.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRequest {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub scale: f64,
}

/// The external plotting library.
pub trait PlotSurface {
    fn render(&mut self, request: RenderRequest<'_>) -> Result<(), String>;

    /// Size the chart currently occupies, when known.
    fn current_size(&self) -> Option<(u32, u32)>;

    fn to_image(&mut self, request: &ImageRequest) -> Result<Vec<u8>, String>;
}

/// Surface that keeps the last triple it was asked to draw.
#[derive(Debug, Default)]
pub struct RecordingSurface {
    pub last: Option<RenderTriple>,
    pub renders: usize,
    pub size: Option<(u32, u32)>,
    pub image_requests: Vec<ImageRequest>,
    /// When set, every render fails with this message.
    pub fail_with: Option<String>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render_count(&self) -> usize {
        self.renders
    }

    pub fn last(&self) -> Option<&RenderTriple> {
        self.last.as_ref()
    }
}

impl PlotSurface for RecordingSurface {
    fn render(&mut self, request: RenderRequest<'_>) -> Result<(), String> {
        if let Some(message) = &self.fail_with {
            return Err(message.clone());
        }
        self.size = Some((request.width, request.height));
        self.last = Some(request.triple.clone());
        self.renders += 1;
        Ok(())
    }

    fn current_size(&self) -> Option<(u32, u32)> {
        self.size
    }

    fn to_image(&mut self, request: &ImageRequest) -> Result<Vec<u8>, String> {
        let triple = self
            .last
            .as_ref()
            .ok_or_else(|| "Nothing has been rendered yet".to_string())?;
        self.image_requests.push(request.clone());
        serde_json::to_vec(triple).map_err(|e| e.to_string())
    }
}

/// Kind of interaction reported by the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlotEventKind {
    Click,
    Select,
    Zoom,
}

/// An interaction event as delivered by the surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotEvent {
    pub kind: PlotEventKind,
    #[serde(default)]
    pub payload: Value,
}

impl PlotEvent {
    pub fn new(kind: PlotEventKind, payload: Value) -> Self {
        Self { kind, payload }
    }
}
