use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::composer::Theme;
use crate::host::{RecordingSurface, StaticHost};
use crate::migrations::migrate_options;
use crate::options::PanelOptions;
use crate::panel::{PanelProps, PanelView, PlotlyPanel};
use crate::panel_data::{PanelData, TimeRange};
use crate::scripting::ScriptEvaluator;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a panel against a data file and write the resulting view as JSON
    Render {
        /// Panel options (JSON or YAML)
        #[arg(long)]
        options: PathBuf,

        /// Panel data (JSON or YAML), as delivered by the data source
        #[arg(long)]
        data: PathBuf,

        /// Panel width
        #[arg(long, default_value_t = 800)]
        width: u32,

        /// Panel height
        #[arg(long, default_value_t = 400)]
        height: u32,

        /// Display timezone ("browser", "utc", "+02:00", ...)
        #[arg(long, default_value = "browser")]
        timezone: String,

        /// Theme preset (dark or light)
        #[arg(long, default_value = "dark")]
        theme: String,

        /// Panel title
        #[arg(long)]
        title: Option<String>,

        /// Dashboard time range start (epoch ms)
        #[arg(long, requires = "to")]
        from: Option<i64>,

        /// Dashboard time range end (epoch ms)
        #[arg(long, requires = "from")]
        to: Option<i64>,

        /// Dashboard variable as name=value (repeatable)
        #[arg(long = "var", value_name = "NAME=VALUE")]
        vars: Vec<String>,

        /// Output file; stdout when omitted
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Rewrite legacy identifiers in stored panel scripts
    Migrate {
        /// Stored panel options (JSON or YAML)
        #[arg(long)]
        options: PathBuf,

        /// Panel version the options were saved with
        #[arg(long)]
        from_version: Option<String>,

        /// Output file; stdout when omitted
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Compile a script and report diagnostics
    Check {
        /// Script file
        #[arg(long)]
        script: PathBuf,

        /// Check as a click handler (adds the `event` parameter)
        #[arg(long)]
        onclick: bool,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Render {
            options,
            data,
            width,
            height,
            timezone,
            theme,
            title,
            from,
            to,
            vars,
            out,
        } => {
            let theme = Theme::preset(&theme)
                .with_context(|| format!("Unknown theme '{}', expected dark or light", theme))?;
            let time_range = match (from, to) {
                (Some(from), Some(to)) => Some(TimeRange::new(from, to)),
                _ => None,
            };
            let props = PanelProps {
                options: serde_json::from_value::<PanelOptions>(load_value(&options)?)
                    .context("Invalid panel options")?,
                data: serde_json::from_value::<PanelData>(load_value(&data)?)
                    .context("Invalid panel data")?,
                time_range,
                time_zone: timezone,
                width,
                height,
                title: title.unwrap_or_default(),
                theme,
            };
            let host = static_host(&vars)?;
            render(&props, &host, out.as_deref())?;
        }
        Commands::Migrate {
            options,
            from_version,
            out,
        } => {
            let migration = migrate_options(load_value(&options)?, from_version.as_deref());
            if migration.changed {
                log::info!("Scripts migrated to current identifiers");
            } else {
                log::info!("Nothing to migrate");
            }
            write_output(out.as_deref(), &serde_json::to_string_pretty(&migration.options)?)?;
        }
        Commands::Check { script, onclick } => {
            let source = fs::read_to_string(&script)
                .with_context(|| format!("Failed to read script {:?}", script))?;
            let mut params = vec!["data", "variables", "options", "utils"];
            if onclick {
                params.push("event");
            }
            let mut evaluator = ScriptEvaluator::new();
            if let Err(e) = evaluator.check(&source, &params) {
                bail!("{}", e);
            }
            println!("{:?}: OK", script);
        }
    }
    Ok(())
}

fn render(props: &PanelProps, host: &StaticHost, out: Option<&Path>) -> Result<()> {
    let mut panel = PlotlyPanel::new();
    let mut surface = RecordingSurface::new();
    let view = panel.render(props, host, &mut surface);

    match &view {
        PanelView::Chart { triple } => {
            let traces = triple.data.as_array().map(Vec::len).unwrap_or(0);
            log::info!("Rendered {} traces at {}x{}", traces, props.width, props.height);
        }
        PanelView::NoData { message } => log::warn!("No data: {}", message),
        PanelView::ScriptError { error } => log::error!("{}", error),
        PanelView::Error { message } => log::error!("{}", message),
    }
    for command in host.take_commands() {
        log::info!("Script requested {:?}", command);
    }

    write_output(out, &serde_json::to_string_pretty(&view)?)
}

fn static_host(vars: &[String]) -> Result<StaticHost> {
    vars.iter().try_fold(StaticHost::new(), |host, var| {
        let Some((name, value)) = var.split_once('=') else {
            bail!("Invalid variable '{}', expected NAME=VALUE", var);
        };
        Ok(host.with_variable(name.trim(), value))
    })
}

/// Read a JSON or YAML document; `.yaml`/`.yml` files are parsed as YAML.
fn load_value(path: &Path) -> Result<Value> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    let value: Value = if is_yaml {
        serde_yaml::from_str(&contents).with_context(|| format!("Invalid YAML in {:?}", path))?
    } else {
        serde_json::from_str(&contents).with_context(|| format!("Invalid JSON in {:?}", path))?
    };
    Ok(value)
}

fn write_output(out: Option<&Path>, text: &str) -> Result<()> {
    match out {
        Some(path) => {
            fs::write(path, text).with_context(|| format!("Failed to write {:?}", path))?;
            log::info!("Wrote {:?}", path);
        }
        None => println!("{}", text),
    }
    Ok(())
}
