pub mod panel_data;
pub mod options;
pub mod host;
pub mod panel;

// Configuration pipeline
pub mod merge;
pub mod substitute;
pub mod composer;
pub mod empty_data;
pub mod migrations;

// Time handling
pub mod timezone;

// Scripting
pub mod scripting;
pub mod script_log;
pub mod script_utils;
pub mod script_diagnostics;
pub mod context;

#[cfg(not(target_arch = "wasm32"))]
pub mod cli;

#[cfg(target_arch = "wasm32")]
pub mod wasm;

pub use composer::{RenderTriple, Theme};
pub use host::{PanelHost, PlotEvent, PlotEventKind, PlotSurface};
pub use options::PanelOptions;
pub use panel::{PanelProps, PanelView, PlotlyPanel};
pub use panel_data::PanelData;
