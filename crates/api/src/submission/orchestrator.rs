//! Stage-by-stage submission pipeline.
//!
//! ```text
//! 1. value not blank
//! 2. environment exists and is enabled
//! 3. quota gate (lock held until 8)
//! 4. content pattern (match / extract)
//! 5. capacity
//! 6. plugin chain
//! 7. placement (create, or update with create fallback)
//! 8. quota deduction
//! ```
//!
//! Every stage short-circuits. Domain failures come back as a rejected
//! [`SubmissionOutcome`]; only database failures surface as [`AppError`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use futures::FutureExt;
use panelgate_core::content::{apply_pattern, compile_pattern, is_blank, RegexPolicy};
use panelgate_core::error::CoreError;
use panelgate_core::quota::{evaluate_quota, QuotaCheck, QuotaLockGuard, QuotaLockManager};
use panelgate_core::scripting::{
    interpret_output, ExecutionContext, ExecutionResult, PluginSandbox, PluginVerdict,
};
use panelgate_core::slots::SlotSummary;
use panelgate_core::types::DbId;
use panelgate_db::models::environment::Environment;
use panelgate_db::models::plugin::{CreatePluginExecutionLog, ExecutionStatus, PluginBinding};
use panelgate_panel::{NewEnv, PanelConnector, RetryPolicy};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::selector::{create_on_best_panel, rank_for_create, update_matching};
use super::slots::{slot_summary, survey_panels, PanelSurvey};
use super::store::SubmissionStore;
use super::{OnlineService, OnlineServices, SubmissionError, SubmissionOutcome, SubmissionRequest};
use crate::error::{AppError, AppResult};

/// Quota key held for the rest of a submission.
struct QuotaHold {
    _guard: QuotaLockGuard,
    key: String,
    cost: i32,
}

pub struct SubmissionService {
    store: Arc<dyn SubmissionStore>,
    panels: Arc<dyn PanelConnector>,
    sandbox: PluginSandbox,
    quota_locks: Arc<QuotaLockManager>,
    retry: RetryPolicy,
}

impl SubmissionService {
    pub fn new(
        store: Arc<dyn SubmissionStore>,
        panels: Arc<dyn PanelConnector>,
        sandbox: PluginSandbox,
        quota_locks: Arc<QuotaLockManager>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            panels,
            sandbox,
            quota_locks,
            retry,
        }
    }

    pub fn quota_locks(&self) -> &Arc<QuotaLockManager> {
        &self.quota_locks
    }

    /// Whether the backing store answers.
    pub async fn store_healthy(&self) -> bool {
        self.store.health_check().await.is_ok()
    }

    // -----------------------------------------------------------------------
    // Public operations
    // -----------------------------------------------------------------------

    /// Run the full pipeline for one submitted value.
    ///
    /// A panic anywhere in the pipeline is reported as an internal failure;
    /// the quota lock is released while unwinding.
    pub async fn submit_variable(&self, request: SubmissionRequest) -> AppResult<SubmissionOutcome> {
        let env_id = request.env_id;
        let result = AssertUnwindSafe(self.run_submission(request))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                tracing::error!(env_id, "Submission pipeline panicked");
                Err(SubmissionError::Internal)
            });

        match result {
            Ok(outcome) => Ok(outcome),
            Err(SubmissionError::Database(e)) => Err(AppError::Database(e)),
            Err(e) => {
                tracing::info!(env_id, reason = %e, stack_trace = ?e.stack_trace(), "Submission rejected");
                Ok(SubmissionOutcome::from_error(&e))
            }
        }
    }

    /// Live slot usage of an enabled environment.
    pub async fn calculate_available_slots(&self, env_id: DbId) -> AppResult<SlotSummary> {
        let env = self
            .store
            .find_enabled_environment(env_id)
            .await?
            .ok_or(AppError::Core(CoreError::NotFound {
                entity: "Environment",
                id: env_id,
            }))?;
        let surveys = self.survey(&env).await?;
        Ok(slot_summary(&env, &surveys))
    }

    /// Every enabled environment with its live free-slot count.
    ///
    /// Environments are surveyed concurrently; an unreachable panel counts as
    /// holding nothing, exactly as in [`Self::calculate_available_slots`].
    pub async fn online_services(&self) -> AppResult<OnlineServices> {
        let envs = self.store.enabled_environments().await?;
        let list = try_join_all(envs.into_iter().map(|env| async move {
            let surveys = self.survey(&env).await?;
            let slots = slot_summary(&env, &surveys);
            Ok::<_, sqlx::Error>(OnlineService {
                id: env.id,
                name: env.name,
                remarks: env.remarks,
                quantity: env.quantity,
                is_quota_required: env.is_quota_required,
                quota_cost: env.quota_cost,
                available_slots: slots.available,
            })
        }))
        .await?;

        Ok(OnlineServices {
            total: list.len(),
            list,
        })
    }

    /// Report whether `key` could pay for one submission, without locking or
    /// charging it.
    pub async fn check_quota(&self, key: &str) -> AppResult<QuotaCheck> {
        let key = key.trim();
        if key.is_empty() {
            return Err(AppError::BadRequest("key is required".to_string()));
        }
        Ok(match self.store.find_quota_key(key).await? {
            Some(stored) => QuotaCheck::from_state(stored.is_enabled, stored.remaining_uses),
            None => QuotaCheck::missing(),
        })
    }

    /// Run a plugin script against a sample value outside any binding.
    pub async fn test_plugin_script(&self, script: &str, sample_value: &str) -> ExecutionResult {
        self.sandbox.test_script(script, sample_value).await
    }

    /// Drop quota locks unused for `max_idle`.
    pub fn prune_locks(&self, max_idle: Duration) -> usize {
        self.quota_locks.prune_idle(max_idle)
    }

    // -----------------------------------------------------------------------
    // Pipeline
    // -----------------------------------------------------------------------

    async fn run_submission(
        &self,
        request: SubmissionRequest,
    ) -> Result<SubmissionOutcome, SubmissionError> {
        if is_blank(&request.value) {
            return Err(SubmissionError::EmptyValue);
        }

        let env = self
            .store
            .find_enabled_environment(request.env_id)
            .await?
            .ok_or(SubmissionError::EnvironmentUnavailable)?;

        let quota = if env.is_quota_required {
            Some(self.acquire_quota(&env, request.quota_key.as_deref()).await?)
        } else {
            None
        };

        let value = self.validate_content(&env, &request.value)?;

        let surveys = self.survey(&env).await?;
        let slots = slot_summary(&env, &surveys);
        tracing::debug!(env_id = env.id, total = slots.total, used = slots.used, "Capacity checked");
        if slots.is_full() {
            return Err(SubmissionError::ServiceFull);
        }

        let value = self.run_plugins(&env, value).await?;

        let panels_affected = self
            .place(&env, &value, request.remarks.as_deref(), &surveys)
            .await?;

        let remaining_quota = match quota {
            Some(hold) => self.deduct(&hold).await?,
            None => None,
        };

        tracing::info!(env_id = env.id, panels_affected, "Submission completed");
        Ok(SubmissionOutcome::accepted(panels_affected, remaining_quota))
    }

    async fn acquire_quota(
        &self,
        env: &Environment,
        supplied: Option<&str>,
    ) -> Result<QuotaHold, SubmissionError> {
        let key = supplied
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or(SubmissionError::QuotaKeyRequired)?;

        let guard = self.quota_locks.lock_for(key).await;
        let stored = self
            .store
            .find_quota_key(key)
            .await?
            .ok_or(SubmissionError::UnknownQuotaKey)?;

        let decision = evaluate_quota(stored.is_enabled, stored.remaining_uses, env.quota_cost);
        if !decision.is_granted() {
            return Err(SubmissionError::QuotaDenied(decision.message()));
        }

        Ok(QuotaHold {
            _guard: guard,
            key: key.to_string(),
            cost: env.quota_cost,
        })
    }

    fn validate_content(&self, env: &Environment, value: &str) -> Result<String, SubmissionError> {
        let policy = RegexPolicy::from_db(&env.regex_policy);
        match apply_pattern(env.regex.as_deref(), policy, value) {
            Ok(Some(value)) if !is_blank(&value) => Ok(value),
            Ok(_) => Err(SubmissionError::FormatMismatch),
            Err(e) => {
                tracing::warn!(env_id = env.id, error = %e, "Environment pattern does not compile");
                Err(SubmissionError::InvalidPattern(e.to_string()))
            }
        }
    }

    async fn survey(&self, env: &Environment) -> Result<Vec<PanelSurvey>, sqlx::Error> {
        let panels = self.store.enabled_panels(env.id).await?;
        Ok(survey_panels(self.panels.as_ref(), self.retry, &panels).await)
    }

    /// Feed `value` through the environment's plugins in order.
    async fn run_plugins(&self, env: &Environment, value: String) -> Result<String, SubmissionError> {
        let bindings = self.store.enabled_plugin_bindings(env.id).await?;
        let mut current = value;

        for binding in &bindings {
            let ctx = ExecutionContext::new(
                binding.plugin_id,
                env.id,
                current.clone(),
                ExecutionContext::parse_config(binding.config.as_deref()),
            );
            let timeout = Duration::from_millis(u64::try_from(binding.execution_timeout_ms).unwrap_or(0));
            let result = self
                .sandbox
                .execute(&binding.script_content, ctx, Some(timeout))
                .await;
            self.record_execution(binding, env.id, &current, &result);

            if !result.success {
                tracing::warn!(
                    plugin_id = binding.plugin_id,
                    error = ?result.error_message,
                    stack_trace = ?result.stack_trace,
                    "Plugin failed, aborting submission"
                );
                return Err(SubmissionError::PluginFailed {
                    plugin: binding.plugin_name.clone(),
                    message: result.error_message.unwrap_or_default(),
                    trace: result.stack_trace,
                });
            }

            match interpret_output(result.output.as_ref()) {
                PluginVerdict::Keep => {}
                PluginVerdict::Replace(next) if is_blank(&next) => {
                    return Err(SubmissionError::PluginEmptied(binding.plugin_name.clone()));
                }
                PluginVerdict::Replace(next) => current = next,
                PluginVerdict::Reject(message) => {
                    tracing::info!(plugin_id = binding.plugin_id, %message, "Plugin rejected value");
                    return Err(SubmissionError::PluginRejected(message));
                }
            }
        }

        Ok(current)
    }

    /// Write the execution log in the background; failures are only logged.
    fn record_execution(
        &self,
        binding: &PluginBinding,
        env_id: DbId,
        input: &str,
        result: &ExecutionResult,
    ) {
        let status = if result.success {
            ExecutionStatus::Success
        } else if result.timed_out() {
            ExecutionStatus::Timeout
        } else {
            ExecutionStatus::Error
        };
        let log = CreatePluginExecutionLog {
            plugin_id: binding.plugin_id,
            environment_id: env_id,
            status,
            execution_time_ms: i64::try_from(result.elapsed_ms).unwrap_or(i64::MAX),
            input_value: Some(input.to_string()),
            output_value: result.output.as_ref().map(|output| match output {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
            error_message: result.error_message.clone(),
            stack_trace: result.stack_trace.clone(),
        };

        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Err(e) = store.record_plugin_execution(&log).await {
                tracing::warn!(plugin_id = log.plugin_id, error = %e, "Failed to record plugin execution");
            }
        });
    }

    /// Put the value on the panels. Returns the number of panels changed.
    async fn place(
        &self,
        env: &Environment,
        value: &str,
        remarks: Option<&str>,
        surveys: &[PanelSurvey],
    ) -> Result<usize, SubmissionError> {
        if env.is_update_mode() {
            let pattern = env
                .regex_update
                .as_deref()
                .filter(|p| !p.trim().is_empty())
                .ok_or(SubmissionError::MissingUpdatePattern)?;
            let pattern =
                compile_pattern(pattern).map_err(|e| SubmissionError::InvalidPattern(e.to_string()))?;

            let updated = update_matching(surveys, &pattern, &env.name, value, remarks).await;
            if updated > 0 {
                return Ok(updated);
            }
            tracing::info!(env_id = env.id, "No existing variable matched, creating instead");
        }

        let candidates = rank_for_create(&env.name, surveys);
        let new_env = NewEnv {
            name: env.name.clone(),
            value: value.to_string(),
            remarks: remarks.map(str::to_string).or_else(|| env.remarks.clone()),
        };
        let placement = create_on_best_panel(&candidates, &new_env)
            .await
            .map_err(|e| SubmissionError::Panel(e.to_string()))?;

        if let Err(e) = self.store.increment_panel_usage(placement.panel_id).await {
            tracing::warn!(panel_id = placement.panel_id, error = %e, "Failed to bump panel usage");
        }

        if env.is_auto_enable && !placement.created_ids.is_empty() {
            let api = Arc::clone(&placement.api);
            let ids = placement.created_ids.clone();
            let panel_id = placement.panel_id;
            tokio::spawn(async move {
                match api.enable_envs(&ids).await {
                    Ok(()) => tracing::debug!(target: "panelgate::auto_enable", panel_id, ?ids, "Enabled"),
                    Err(e) => tracing::warn!(
                        target: "panelgate::auto_enable",
                        panel_id,
                        ?ids,
                        error = %e,
                        "Auto-enable failed"
                    ),
                }
            });
        }

        Ok(1)
    }

    /// Charge the held key. The balance was checked under the same lock, so a
    /// refused deduction means the key changed underneath us.
    async fn deduct(&self, hold: &QuotaHold) -> Result<Option<i32>, SubmissionError> {
        let remaining = self.store.deduct_quota(&hold.key, hold.cost).await?;
        if remaining.is_none() {
            tracing::error!(cost = hold.cost, "Quota deduction refused after placement");
        }
        Ok(remaining)
    }
}

/// Periodically prune idle quota locks until `cancel` fires.
pub fn start_lock_pruner(
    locks: Arc<QuotaLockManager>,
    interval: Duration,
    max_idle: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
        ticker.tick().await;
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = locks.prune_idle(max_idle);
                    tracing::debug!(removed, tracked = locks.len(), "Quota lock sweep");
                }
            }
        }
        tracing::info!("Quota lock pruner stopped");
    })
}
