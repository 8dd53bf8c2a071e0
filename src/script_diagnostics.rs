//! Structured script errors.
//!
//! Rhai reports parse and runtime failures with positions relative to the
//! compiled text, which includes the wrapper the evaluator puts around the
//! user's function body. This module maps those positions back onto the
//! user's script and packages everything into a JSON-serializable
//! [`ScriptError`] the panel can show instead of the chart.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use rhai::{EvalAltResult, ParseError, Position};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScriptErrorKind {
    /// Syntax/parse errors (compile time).
    ParseError,
    /// Runtime errors in user code.
    RuntimeError,
    /// Script used the host values incorrectly (missing members, wrong types, etc).
    HostApiMisuse,
    /// Script ran but broke the return-value contract.
    Contract,
    /// Internal/host error (e.g. the context could not be converted).
    HostError,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScriptPhase {
    Compile,
    Execute,
    Validate,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScriptError {
    pub kind: ScriptErrorKind,
    pub phase: ScriptPhase,
    pub message: String,
    /// 1-based line number in the user script (never a wrapper line).
    pub line_number: Option<u32>,
    /// 1-based column number.
    pub column: Option<u32>,
    /// Text of the offending line; empty when the line is unknown.
    pub line: String,
    /// Raw engine error string (useful for bug reports).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl ScriptError {
    /// A contract violation found after the script returned.
    pub fn contract(message: impl Into<String>) -> Self {
        Self {
            kind: ScriptErrorKind::Contract,
            phase: ScriptPhase::Validate,
            message: message.into(),
            line_number: None,
            column: None,
            line: String::new(),
            raw: None,
        }
    }

    /// A failure on the host side of the boundary.
    pub fn host(message: impl Into<String>) -> Self {
        Self {
            kind: ScriptErrorKind::HostError,
            ..Self::contract(message)
        }
    }

    /// Line label for display: the number, or `unknown`.
    pub fn line_label(&self) -> String {
        self.line_number
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error on line {}: {}", self.line_label(), self.message)?;
        if !self.line.is_empty() {
            write!(f, "\n    {}", self.line.trim_end())?;
        }
        Ok(())
    }
}

impl std::error::Error for ScriptError {}

fn classify_message(message: &str) -> ScriptErrorKind {
    // Rhai error strings are fairly stable; this provides a pragmatic
    // classification without depending on Rhai's internal enum variants.
    let lower = message.to_ascii_lowercase();

    if lower.contains("property not found")
        || lower.contains("variable not found")
        || lower.contains("function not found")
        || lower.contains("unknown property")
        || lower.contains("not registered")
        || lower.contains("index")
        || lower.contains("map key")
        || lower.contains("mismatched types")
        || lower.contains("invalid")
    {
        return ScriptErrorKind::HostApiMisuse;
    }

    ScriptErrorKind::RuntimeError
}

/// Map a wrapper position onto the user script.
///
/// Returns `None` for positions inside the wrapper (before the body, or the
/// closing line after it).
fn map_position_to_user(
    line: u32,
    column: u32,
    user_line_offset: usize,
    user_line_count: usize,
) -> Option<(u32, u32)> {
    let offset = user_line_offset as u32;
    if line == 0 || line <= offset {
        return None;
    }
    let user_line = line - offset;
    if user_line as usize > user_line_count {
        return None;
    }
    Some((user_line, column.max(1)))
}

fn position_parts(pos: Position) -> Option<(u32, u32)> {
    let line = pos.line()? as u32;
    let column = pos.position().unwrap_or(0) as u32;
    Some((line, column))
}

fn position_marker() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| {
        Regex::new(r"\(line (\d+), position (\d+)\)").expect("position marker pattern is valid")
    })
}

/// Fallback: find a `(line N, position M)` marker in the engine's text.
fn position_from_text(raw: &str) -> Option<(u32, u32)> {
    let caps = position_marker().captures(raw)?;
    let line = caps[1].parse().ok()?;
    let column = caps[2].parse().ok()?;
    Some((line, column))
}

/// Drop the engine's `(line N, position M)` suffix from a message.
fn strip_position(message: &str) -> String {
    position_marker().replace_all(message, "").trim_end().to_string()
}

/// Descend through function-call wrappers to the error raised in user code.
fn innermost(err: &EvalAltResult) -> &EvalAltResult {
    let mut current = err;
    while let EvalAltResult::ErrorInFunctionCall(_, _, inner, _) = current {
        current = inner.as_ref();
    }
    current
}

fn locate(
    position: Option<(u32, u32)>,
    raw: &str,
    source: &str,
    user_line_offset: usize,
) -> (Option<u32>, Option<u32>, String) {
    let user_line_count = source.lines().count();
    let mapped = position
        .or_else(|| position_from_text(raw))
        .and_then(|(line, column)| {
            map_position_to_user(line, column, user_line_offset, user_line_count)
        });

    match mapped {
        Some((line, column)) => {
            let text = source
                .lines()
                .nth(line as usize - 1)
                .unwrap_or_default()
                .to_string();
            (Some(line), Some(column), text)
        }
        None => (None, None, String::new()),
    }
}

pub fn from_parse_error(err: &ParseError, source: &str, user_line_offset: usize) -> ScriptError {
    let raw = err.to_string();
    let message = err.err_type().to_string();
    let (line_number, column, line) =
        locate(position_parts(err.position()), &raw, source, user_line_offset);

    ScriptError {
        kind: ScriptErrorKind::ParseError,
        phase: ScriptPhase::Compile,
        message,
        line_number,
        column,
        line,
        raw: Some(raw),
    }
}

pub fn from_eval_error(
    phase: ScriptPhase,
    err: &EvalAltResult,
    source: &str,
    user_line_offset: usize,
) -> ScriptError {
    let raw = err.to_string();

    // Report the innermost error without its position suffix; the position is
    // surfaced separately after mapping.
    let inner = innermost(err);
    let position = inner.position();
    let message = strip_position(&inner.to_string());
    let kind = classify_message(&message);

    let (line_number, column, line) =
        locate(position_parts(position), &raw, source, user_line_offset);

    ScriptError {
        kind,
        phase,
        message,
        line_number,
        column,
        line,
        raw: Some(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_position_skips_wrapper_lines() {
        assert_eq!(map_position_to_user(1, 5, 1, 3), None);
        assert_eq!(map_position_to_user(2, 5, 1, 3), Some((1, 5)));
        assert_eq!(map_position_to_user(4, 0, 1, 3), Some((3, 1)));
        // closing brace of the wrapper
        assert_eq!(map_position_to_user(5, 1, 1, 3), None);
        assert_eq!(map_position_to_user(0, 1, 1, 3), None);
    }

    #[test]
    fn test_position_from_text() {
        assert_eq!(
            position_from_text("Variable not found: y (line 6, position 3)"),
            Some((6, 3))
        );
        assert_eq!(position_from_text("no marker here"), None);
    }

    #[test]
    fn test_message_from_nested_call_has_no_position() {
        let source = "let a = 1;\nlet b = missing + a;";
        let wrapped = format!("fn f() {{\n{source}\n}}\nf()");
        let err = rhai::Engine::new().run(&wrapped).unwrap_err();

        let mapped = from_eval_error(ScriptPhase::Execute, &err, source, 1);
        assert_eq!(mapped.line_number, Some(2));
        assert!(mapped.message.contains("missing"), "{}", mapped.message);
        assert!(!mapped.message.contains("(line"), "{}", mapped.message);
        assert_eq!(
            strip_position("Variable not found: y (line 6, position 3)"),
            "Variable not found: y"
        );
    }

    #[test]
    fn test_classify_message() {
        assert_eq!(
            classify_message("Variable not found: foo"),
            ScriptErrorKind::HostApiMisuse
        );
        assert_eq!(classify_message("Runtime error: boom"), ScriptErrorKind::RuntimeError);
    }

    #[test]
    fn test_display_with_and_without_line() {
        let mut err = ScriptError::contract("Script must return a value");
        assert_eq!(err.to_string(), "Error on line unknown: Script must return a value");

        err.line_number = Some(3);
        err.line = "  let x = ;".to_string();
        assert_eq!(
            err.to_string(),
            "Error on line 3: Script must return a value\n      let x = ;"
        );
    }

    #[test]
    fn test_serializes_camel_case() {
        let err = ScriptError::host("context conversion failed");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "host_error");
        assert_eq!(json["lineNumber"], serde_json::Value::Null);
        assert!(json.get("raw").is_none());
    }
}
