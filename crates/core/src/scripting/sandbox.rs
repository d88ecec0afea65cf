//! Rhai-based sandbox for plugin scripts.
//!
//! Every run gets a fresh [`rhai::Engine`] on a dedicated worker thread, so
//! no state leaks between runs and a busy script never stalls the async
//! runtime. The caller waits under a wall-clock timeout; when it fires the
//! worker is told to stop at its next progress check.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rhai::module_resolvers::DummyModuleResolver;
use rhai::{Dynamic, Engine, EvalAltResult, Map, Scope};
use serde_json::Value;
use tokio::sync::oneshot;

use super::executor::{ExecutionContext, ExecutionResult, ScriptError};
use super::request::{perform_request, RequestPolicy};

/// Name and arity of the function every plugin must define.
pub const ENTRY_POINT: &str = "main";

/// Placeholder value used by [`PluginSandbox::validate`].
pub const VALIDATION_VALUE: &str = "test_env_value";

/// Timeout for ad-hoc test runs.
pub const TEST_RUN_TIMEOUT: Duration = Duration::from_secs(10);

/// Progress callbacks between deadline checks.
const DEADLINE_CHECK_INTERVAL: u64 = 1024;

/// Resource caps applied to every engine.
#[derive(Debug, Clone, Copy)]
pub struct SandboxLimits {
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            max_operations: 50_000_000,
            max_call_levels: 64,
            max_string_size: 1024 * 1024,
            max_array_size: 10_000,
            max_map_size: 10_000,
        }
    }
}

/// Runs plugin scripts in isolation.
#[derive(Debug, Clone)]
pub struct PluginSandbox {
    default_timeout: Duration,
    limits: SandboxLimits,
}

impl PluginSandbox {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            default_timeout,
            limits: SandboxLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: SandboxLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Execute `script`'s entry function with `ctx.value`.
    ///
    /// `timeout` of `None` or zero uses the sandbox default. Never returns an
    /// error: every failure is reported inside the [`ExecutionResult`].
    pub async fn execute(
        &self,
        script: &str,
        ctx: ExecutionContext,
        timeout: Option<Duration>,
    ) -> ExecutionResult {
        let timeout = timeout
            .filter(|t| !t.is_zero())
            .unwrap_or(self.default_timeout);
        let plugin_id = ctx.plugin_id;
        let (outcome, elapsed_ms) = self.run(script, ctx, timeout, RequestPolicy::PublicOnly).await;

        match outcome {
            Ok(output) => ExecutionResult::succeeded(output, elapsed_ms),
            Err(err) => {
                tracing::debug!(plugin_id, error = %err, "Plugin run failed");
                ExecutionResult::failed(&err, elapsed_ms)
            }
        }
    }

    /// Compile `script` and run it once against a placeholder value with
    /// outbound requests disabled.
    pub async fn validate(&self, script: &str) -> Result<(), ScriptError> {
        let ctx = ExecutionContext::new(0, 0, VALIDATION_VALUE, Value::Object(Default::default()));
        let (outcome, _) = self
            .run(script, ctx, self.default_timeout, RequestPolicy::Deny)
            .await;
        outcome.map(|_| ())
    }

    /// Run `script` against a caller-supplied sample without any binding.
    pub async fn test_script(&self, script: &str, sample: &str) -> ExecutionResult {
        let ctx = ExecutionContext::new(0, 0, sample, Value::Object(Default::default()));
        self.execute(script, ctx, Some(TEST_RUN_TIMEOUT)).await
    }

    async fn run(
        &self,
        script: &str,
        ctx: ExecutionContext,
        timeout: Duration,
        policy: RequestPolicy,
    ) -> (Result<Value, ScriptError>, u64) {
        let started = Instant::now();
        let cancel = Arc::new(AtomicBool::new(false));
        let job = SandboxJob {
            script: script.to_owned(),
            ctx,
            limits: self.limits,
            policy,
            cancel: Arc::clone(&cancel),
            started,
            deadline: started + timeout,
        };

        let (tx, rx) = oneshot::channel();
        let spawned = std::thread::Builder::new()
            .name("plugin-sandbox".to_string())
            .spawn(move || {
                let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| job.run()))
                    .unwrap_or_else(|payload| {
                        Err(ScriptError::Panicked {
                            message: panic_message(payload.as_ref()),
                            trace: "panic caught at the plugin worker boundary".to_string(),
                        })
                    });
                // The receiver is gone when the caller already timed out.
                let _ = tx.send(outcome);
            });
        if let Err(e) = spawned {
            return (Err(ScriptError::Worker(e.to_string())), elapsed_ms(started));
        }

        let outcome = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ScriptError::Worker(
                "worker exited without a result".to_string(),
            )),
            Err(_) => {
                cancel.store(true, Ordering::Relaxed);
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Plugin run timed out, worker signalled to stop"
                );
                Err(ScriptError::Timeout {
                    elapsed_ms: timeout.as_millis() as u64,
                })
            }
        };
        (outcome, elapsed_ms(started))
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

// ---------------------------------------------------------------------------
// Worker side
// ---------------------------------------------------------------------------

struct SandboxJob {
    script: String,
    ctx: ExecutionContext,
    limits: SandboxLimits,
    policy: RequestPolicy,
    cancel: Arc<AtomicBool>,
    started: Instant,
    deadline: Instant,
}

impl SandboxJob {
    fn run(self) -> Result<Value, ScriptError> {
        let engine = self.build_engine();
        let ast = engine
            .compile(&self.script)
            .map_err(|e| ScriptError::Compile(e.to_string()))?;

        let has_entry = ast
            .iter_functions()
            .any(|f| f.name == ENTRY_POINT && f.params.len() == 1);
        if !has_entry {
            return Err(ScriptError::MissingEntryPoint);
        }

        let mut scope = Scope::new();
        let result: Dynamic = engine
            .call_fn(&mut scope, &ast, ENTRY_POINT, (self.ctx.value.clone(),))
            .map_err(|e| self.classify(*e))?;

        rhai::serde::from_dynamic::<Value>(&result).map_err(|e| ScriptError::Output(e.to_string()))
    }

    fn classify(&self, err: EvalAltResult) -> ScriptError {
        if matches!(innermost(&err), EvalAltResult::ErrorTerminated(..)) {
            return ScriptError::Timeout {
                elapsed_ms: elapsed_ms(self.started),
            };
        }
        ScriptError::Runtime {
            message: innermost(&err).to_string(),
            trace: call_trace(&err),
        }
    }

    fn build_engine(&self) -> Engine {
        let mut engine = Engine::new();
        engine
            .set_max_operations(self.limits.max_operations)
            .set_max_call_levels(self.limits.max_call_levels)
            .set_max_string_size(self.limits.max_string_size)
            .set_max_array_size(self.limits.max_array_size)
            .set_max_map_size(self.limits.max_map_size)
            .set_max_expr_depths(64, 32)
            .set_module_resolver(DummyModuleResolver::new());
        engine.disable_symbol("eval");

        let cancel = Arc::clone(&self.cancel);
        let deadline = self.deadline;
        engine.on_progress(move |ops| {
            let stop = cancel.load(Ordering::Relaxed)
                || (ops % DEADLINE_CHECK_INTERVAL == 0 && Instant::now() >= deadline);
            stop.then(|| Dynamic::from("timeout".to_string()))
        });

        let plugin_id = self.ctx.plugin_id;
        engine.on_print(move |text| tracing::info!(plugin_id, "[plugin] {text}"));
        engine.on_debug(move |text, source, pos| {
            tracing::debug!(plugin_id, source = source.unwrap_or(""), %pos, "[plugin] {text}")
        });
        engine.register_fn("log_info", move |value: Dynamic| {
            tracing::info!(plugin_id, "[plugin] {value}")
        });
        engine.register_fn("log_error", move |value: Dynamic| {
            tracing::error!(plugin_id, "[plugin] {value}")
        });

        let context = context_map(&self.ctx);
        engine.register_fn("context", move || context.clone());

        let config = rhai::serde::to_dynamic(&self.ctx.config).unwrap_or_else(|_| Dynamic::from(Map::new()));
        engine.register_fn("config", move || config.clone());

        engine.register_fn("now_ms", || chrono::Utc::now().timestamp_millis());
        engine.register_fn(
            "json_parse",
            |text: &str| -> Result<Dynamic, Box<EvalAltResult>> {
                let value: Value =
                    serde_json::from_str(text).map_err(|e| format!("json_parse: {e}"))?;
                rhai::serde::to_dynamic(&value)
            },
        );
        engine.register_fn(
            "json_stringify",
            |value: Dynamic| -> Result<String, Box<EvalAltResult>> {
                Ok(serde_json::to_string(&value).map_err(|e| format!("json_stringify: {e}"))?)
            },
        );

        let policy = self.policy;
        engine.register_fn("request", move |options: Map| {
            let options = rhai::serde::from_dynamic::<Value>(&Dynamic::from(options))
                .unwrap_or(Value::Null);
            to_script_value(&perform_request(&options, policy))
        });
        engine.register_fn("request", move |url: &str| {
            let options = serde_json::json!({ "url": url });
            to_script_value(&perform_request(&options, policy))
        });

        engine
    }
}

fn context_map(ctx: &ExecutionContext) -> Map {
    let mut map = Map::new();
    map.insert("plugin_id".into(), Dynamic::from(ctx.plugin_id));
    map.insert("env_id".into(), Dynamic::from(ctx.environment_id));
    map.insert("timestamp".into(), Dynamic::from(ctx.timestamp));
    map
}

fn to_script_value(value: &Value) -> Dynamic {
    rhai::serde::to_dynamic(value).unwrap_or(Dynamic::UNIT)
}

fn innermost(err: &EvalAltResult) -> &EvalAltResult {
    match err {
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => innermost(inner),
        other => other,
    }
}

/// One line per script function the error passed through, innermost last.
fn call_trace(err: &EvalAltResult) -> String {
    let mut frames = Vec::new();
    let mut current = err;
    while let EvalAltResult::ErrorInFunctionCall(name, _, inner, pos) = current {
        frames.push(format!("at {name} ({pos})"));
        current = inner;
    }
    frames.push(format!("{current} ({})", current.position()));
    frames.join("\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
