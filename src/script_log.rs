//! Script logging.
//!
//! Scripts reach the host log through `print(..)`, `debug(..)` and the
//! `utils.log` object (`info`, `warn`, `error`). Messages go through the `log`
//! facade under the `script` target, so they land in `env_logger` output on
//! native builds and in the browser console on WASM builds.

use std::cell::Cell;

use rhai::{Dynamic, Engine};

/// Maximum number of log messages allowed per evaluation to prevent spam.
const MAX_LOGS_PER_EVALUATION: u32 = 100;

const LOG_TARGET: &str = "script";

// Evaluations are synchronous on the calling thread, so the counters are
// thread-local rather than process-wide.
thread_local! {
    static LOG_COUNT: Cell<u32> = const { Cell::new(0) };
    static WARNED_LIMIT: Cell<bool> = const { Cell::new(false) };
}

/// Log level for script messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_log_level(self) -> log::Level {
        match self {
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Info => log::Level::Info,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        }
    }
}

/// Reset the per-evaluation log counter. Called before each script run.
pub fn reset_script_log_count() {
    LOG_COUNT.with(|count| count.set(0));
    WARNED_LIMIT.with(|warned| warned.set(false));
}

/// Check if we can log another message in this evaluation.
fn can_log() -> bool {
    let count = LOG_COUNT.with(|count| {
        let current = count.get();
        count.set(current.saturating_add(1));
        current
    });
    if count >= MAX_LOGS_PER_EVALUATION {
        // Only warn once per evaluation about exceeding limit
        if !WARNED_LIMIT.with(|warned| warned.replace(true)) {
            emit_log(
                LogLevel::Warn,
                &format!(
                    "Script log limit exceeded ({} messages/evaluation). Further logs dropped.",
                    MAX_LOGS_PER_EVALUATION
                ),
            );
        }
        false
    } else {
        true
    }
}

fn emit_log(level: LogLevel, message: &str) {
    log::log!(target: LOG_TARGET, level.as_log_level(), "{}", message);
}

/// Log a message from a script, respecting the per-evaluation limit.
pub fn script_log(level: LogLevel, message: &str) {
    if can_log() {
        emit_log(level, message);
    }
}

/// Convert a Rhai Dynamic value to a string safely.
/// Never panics, handles all types gracefully.
pub fn stringify_dynamic(value: &Dynamic) -> String {
    if let Ok(s) = value.clone().into_string() {
        return s;
    }

    if let Some(arr) = value.clone().try_cast::<rhai::Array>() {
        let parts: Vec<String> = arr.iter().map(stringify_dynamic).collect();
        return format!("[{}]", parts.join(", "));
    }

    if let Some(map) = value.clone().try_cast::<rhai::Map>() {
        let parts: Vec<String> = map
            .iter()
            .map(|(k, v)| format!("{}: {}", k, stringify_dynamic(v)))
            .collect();
        return format!("{{{}}}", parts.join(", "));
    }

    if let Ok(i) = value.as_int() {
        return i.to_string();
    }

    if let Ok(f) = value.as_float() {
        return format!("{}", f);
    }

    if let Ok(b) = value.as_bool() {
        return b.to_string();
    }

    if value.is_unit() {
        return "()".to_string();
    }

    // Fallback: debug format
    format!("{:?}", value)
}

/// Logger handed to scripts as `utils.log`.
#[derive(Debug, Clone, Default)]
pub struct ScriptLogger;

impl ScriptLogger {
    pub fn new() -> Self {
        Self
    }

    pub fn info(&self, value: Dynamic) {
        script_log(LogLevel::Info, &stringify_dynamic(&value));
    }

    pub fn warn(&self, value: Dynamic) {
        script_log(LogLevel::Warn, &stringify_dynamic(&value));
    }

    pub fn error(&self, value: Dynamic) {
        script_log(LogLevel::Error, &stringify_dynamic(&value));
    }
}

/// Register the logger type and route `print`/`debug` to the log facade.
pub fn register_log_api(engine: &mut Engine) {
    engine.on_print(|text| script_log(LogLevel::Info, text));
    engine.on_debug(|text, source, pos| {
        let message = match (source, pos.line()) {
            (Some(src), Some(line)) => format!("{src} @ {line}: {text}"),
            (None, Some(line)) => format!("@ {line}: {text}"),
            _ => text.to_string(),
        };
        script_log(LogLevel::Debug, &message);
    });

    engine
        .register_type_with_name::<ScriptLogger>("Log")
        .register_fn("info", |logger: &mut ScriptLogger, value: Dynamic| logger.info(value))
        .register_fn("warn", |logger: &mut ScriptLogger, value: Dynamic| logger.warn(value))
        .register_fn("error", |logger: &mut ScriptLogger, value: Dynamic| logger.error(value));
}
