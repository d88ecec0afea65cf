//! Shared types for plugin script execution.
//!
//! Defines [`ExecutionContext`] (what a script sees), [`ExecutionResult`]
//! (what the caller gets back) and [`ScriptError`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::DbId;

/// Everything a single plugin run is allowed to know about its invocation.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Plugin being executed (`0` for ad-hoc test runs).
    pub plugin_id: DbId,
    /// Environment the submission targets (`0` for ad-hoc test runs).
    pub environment_id: DbId,
    /// Value passed to the script's entry function.
    pub value: String,
    /// Parsed binding configuration, exposed to the script as `config()`.
    pub config: Value,
    /// Unix seconds at which the run was prepared.
    pub timestamp: i64,
}

impl ExecutionContext {
    /// Build a context stamped with the current time.
    pub fn new(plugin_id: DbId, environment_id: DbId, value: impl Into<String>, config: Value) -> Self {
        Self {
            plugin_id,
            environment_id,
            value: value.into(),
            config,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    /// Parse a binding's raw configuration blob.
    ///
    /// Missing, blank or malformed blobs become an empty object so a broken
    /// binding config never prevents the script from running.
    pub fn parse_config(raw: Option<&str>) -> Value {
        raw.map(str::trim)
            .filter(|s| !s.is_empty())
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_else(|| Value::Object(Default::default()))
    }
}

/// Outcome of one plugin run. Never persisted by the sandbox itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    /// The entry function's return value, converted to JSON.
    pub output: Option<Value>,
    pub error_message: Option<String>,
    pub stack_trace: Option<String>,
    pub elapsed_ms: u64,
}

impl ExecutionResult {
    pub fn succeeded(output: Value, elapsed_ms: u64) -> Self {
        Self {
            success: true,
            output: (!output.is_null()).then_some(output),
            error_message: None,
            stack_trace: None,
            elapsed_ms,
        }
    }

    pub fn failed(error: &ScriptError, elapsed_ms: u64) -> Self {
        Self {
            success: false,
            output: None,
            error_message: Some(error.to_string()),
            stack_trace: error.trace().map(str::to_string),
            elapsed_ms,
        }
    }

    /// Whether the failure was a timeout (used for execution log status).
    pub fn timed_out(&self) -> bool {
        !self.success
            && self
                .error_message
                .as_deref()
                .is_some_and(|m| m.starts_with(TIMEOUT_PREFIX))
    }
}

const TIMEOUT_PREFIX: &str = "Plugin execution timed out";

/// Errors that can end a plugin run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScriptError {
    /// The script failed to parse.
    #[error("Script compilation failed: {0}")]
    Compile(String),

    /// The script parsed but defines no `main(value)` function.
    #[error("Script must define an entry function `fn main(value)`")]
    MissingEntryPoint,

    /// The script raised an error while running.
    #[error("{message}")]
    Runtime { message: String, trace: String },

    /// The run did not finish within its wall-clock budget.
    #[error("Plugin execution timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// The return value could not be converted to JSON.
    #[error("Cannot serialize plugin output: {0}")]
    Output(String),

    /// The worker thread could not be started or died without reporting.
    #[error("Plugin worker failed: {0}")]
    Worker(String),

    /// A panic escaped the interpreter and was caught at the worker boundary.
    #[error("Plugin execution panicked: {message}")]
    Panicked { message: String, trace: String },
}

impl ScriptError {
    /// Trace text for errors that carry one.
    pub fn trace(&self) -> Option<&str> {
        match self {
            Self::Runtime { trace, .. } | Self::Panicked { trace, .. } => Some(trace),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
