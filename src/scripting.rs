//! Rhai evaluation of panel scripts.
//!
//! A panel script is the body of a function. The evaluator wraps it as
//!
//! ```text
//! fn __panel_script(data, variables, options, utils) {
//! <user script>
//! }
//! ```
//!
//! where the parameter list is exactly the keys of the [`ScriptContext`], then
//! calls it once with the context values. The value the function returns is
//! converted back to JSON and checked against the return contract:
//!
//! - something must be returned (`()` is an error)
//! - if the result has a `data` member it must be an array of traces
//!
//! Failures never escape as panics; they come back as [`ScriptError`] with the
//! line number mapped onto the user's script.

use std::collections::{HashMap, VecDeque};

use rhai::{Dynamic, Engine, Scope, AST};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::script_diagnostics::{from_eval_error, from_parse_error, ScriptError, ScriptPhase};
use crate::script_log::{register_log_api, reset_script_log_count};
use crate::script_utils::register_utils_api;

/// Name of the synthetic function wrapping the user's script.
const SCRIPT_FN: &str = "__panel_script";

/// Number of wrapper lines before the first line of the user's script.
pub const WRAPPER_LINES: usize = 1;

/// Compiled scripts kept around between evaluations.
const MAX_CACHED_SCRIPTS: usize = 16;

/// Sandbox limits applied to the engine.
///
/// These guard against programmer error (runaway loops, unbounded growth),
/// not against hostile scripts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptLimits {
    pub max_expr_depth: usize,
    pub max_function_expr_depth: usize,
    pub max_call_levels: usize,
    /// 0 disables the operation limit.
    pub max_operations: u64,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            max_expr_depth: 64,
            max_function_expr_depth: 64,
            max_call_levels: 64,
            max_operations: 50_000_000,
            max_string_size: 10_000_000,
            max_array_size: 5_000_000,
            max_map_size: 100_000,
        }
    }
}

/// Named values bound as the script's parameters, in order.
#[derive(Debug, Clone, Default)]
pub struct ScriptContext {
    entries: Vec<(String, Dynamic)>,
}

impl ScriptContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to `value`, replacing an earlier binding of the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: Dynamic) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Bind `name` to a JSON value converted into Rhai values.
    pub fn insert_json(&mut self, name: impl Into<String>, value: &Value) -> Result<(), ScriptError> {
        let name = name.into();
        let dynamic = rhai::serde::to_dynamic(value).map_err(|e| {
            ScriptError::host(format!("Failed to convert '{}' for the script: {}", name, e))
        })?;
        self.insert(name, dynamic);
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&Dynamic> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn values(&self) -> Vec<Dynamic> {
        self.entries.iter().map(|(_, v)| v.clone()).collect()
    }
}

/// Wrap a user script in the synthetic function declaration.
fn wrap_script(source: &str, params: &[&str]) -> String {
    format!("fn {SCRIPT_FN}({}) {{\n{source}\n}}\n", params.join(", "))
}

fn cache_key(source: &str, params: &[&str]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for param in params {
        hasher.update(param.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update(source.as_bytes());
    hasher.finalize().into()
}

/// Compiles and runs panel scripts with sandboxed settings.
pub struct ScriptEvaluator {
    engine: Engine,
    /// Compiled scripts by hash of (parameters, source).
    cache: HashMap<[u8; 32], AST>,
    /// Insertion order of `cache`, oldest first.
    cache_order: VecDeque<[u8; 32]>,
    /// Last failure, cleared by the next successful evaluation.
    pub last_error: Option<ScriptError>,
}

impl ScriptEvaluator {
    pub fn new() -> Self {
        Self::with_limits(&ScriptLimits::default())
    }

    pub fn with_limits(limits: &ScriptLimits) -> Self {
        let mut engine = Engine::new();

        // Sandbox settings
        engine.set_max_expr_depths(limits.max_expr_depth, limits.max_function_expr_depth);
        engine.set_max_call_levels(limits.max_call_levels);
        engine.set_max_operations(limits.max_operations);
        engine.set_max_string_size(limits.max_string_size);
        engine.set_max_array_size(limits.max_array_size);
        engine.set_max_map_size(limits.max_map_size);

        register_log_api(&mut engine);
        register_utils_api(&mut engine);

        Self {
            engine,
            cache: HashMap::new(),
            cache_order: VecDeque::new(),
            last_error: None,
        }
    }

    /// Compile `source` as a function body taking `params`, reusing a cached
    /// compilation when the same script was seen before.
    fn compile(&mut self, source: &str, params: &[&str]) -> Result<AST, ScriptError> {
        let key = cache_key(source, params);
        if let Some(ast) = self.cache.get(&key) {
            return Ok(ast.clone());
        }

        let wrapped = wrap_script(source, params);
        let ast = self
            .engine
            .compile(&wrapped)
            .map_err(|e| from_parse_error(&e, source, WRAPPER_LINES))?;

        if self.cache.len() >= MAX_CACHED_SCRIPTS {
            if let Some(oldest) = self.cache_order.pop_front() {
                self.cache.remove(&oldest);
            }
        }
        self.cache.insert(key, ast.clone());
        self.cache_order.push_back(key);
        log::debug!("Compiled script ({} lines, {} parameters)", source.lines().count(), params.len());
        Ok(ast)
    }

    /// Check that `source` compiles as a body taking `params`.
    pub fn check(&mut self, source: &str, params: &[&str]) -> Result<(), ScriptError> {
        self.compile(source, params).map(|_| ())
    }

    /// Run `source` once against `context` and return its validated result.
    pub fn evaluate(&mut self, source: &str, context: &ScriptContext) -> Result<Value, ScriptError> {
        let result = self.call(source, context).and_then(validate_result);
        self.record(&result);
        result
    }

    /// Run an interaction handler. Handlers may return nothing; whatever they
    /// do return is converted to JSON when possible.
    pub fn run_handler(
        &mut self,
        source: &str,
        context: &ScriptContext,
    ) -> Result<Option<Value>, ScriptError> {
        let result = self.call(source, context).map(|returned| {
            if returned.is_unit() {
                return None;
            }
            let converted: Result<Value, _> = rhai::serde::from_dynamic(&returned);
            match converted {
                Ok(value) => Some(value),
                Err(e) => {
                    log::debug!("Ignoring handler result: {}", e);
                    None
                }
            }
        });
        self.record(&result);
        result
    }

    fn record<T>(&mut self, result: &Result<T, ScriptError>) {
        match result {
            Ok(_) => self.last_error = None,
            Err(e) => {
                log::warn!("Script failed: {}", e);
                self.last_error = Some(e.clone());
            }
        }
    }

    fn call(&mut self, source: &str, context: &ScriptContext) -> Result<Dynamic, ScriptError> {
        reset_script_log_count();

        let params: Vec<&str> = context.names().collect();
        let ast = self.compile(source, &params)?;

        let mut scope = Scope::new();
        self.engine
            .call_fn(&mut scope, &ast, SCRIPT_FN, context.values())
            .map_err(|e| from_eval_error(ScriptPhase::Execute, &e, source, WRAPPER_LINES))
    }
}

impl Default for ScriptEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// Enforce the return contract and convert the result to JSON.
fn validate_result(returned: Dynamic) -> Result<Value, ScriptError> {
    if returned.is_unit() {
        return Err(ScriptError::contract("Script must return a value"));
    }

    let value: Value = rhai::serde::from_dynamic(&returned).map_err(|e| {
        ScriptError::contract(format!(
            "Script returned a value that cannot be used as configuration: {}",
            e
        ))
    })?;

    if let Some(data) = value.get("data") {
        if !data.is_array() {
            return Err(ScriptError::contract("The 'data' property must be an array"));
        }
    }

    Ok(value)
}
