//! Repositories for plugin bindings and plugin execution logs.

use panelgate_core::types::DbId;
use sqlx::PgPool;

use crate::models::plugin::{CreatePluginExecutionLog, PluginBinding, PluginExecutionLog};

/// Column list for `plugin_execution_logs` queries.
const LOG_COLUMNS: &str = "\
    id, plugin_id, environment_id, status, execution_time_ms, input_value, \
    output_value, error_message, stack_trace, created_at";

pub struct PluginRepo;

impl PluginRepo {
    /// Bindings of an environment where both the binding and the plugin are
    /// enabled, in execution order.
    pub async fn list_enabled_bindings(
        pool: &PgPool,
        environment_id: DbId,
    ) -> Result<Vec<PluginBinding>, sqlx::Error> {
        sqlx::query_as::<_, PluginBinding>(
            "SELECT ep.id AS binding_id, p.id AS plugin_id, p.name AS plugin_name, \
                    p.script_content, p.execution_timeout_ms, ep.environment_id, \
                    ep.execution_order, ep.config \
             FROM environment_plugins ep \
             JOIN plugins p ON p.id = ep.plugin_id \
             WHERE ep.environment_id = $1 AND ep.is_enabled = true AND p.is_enabled = true \
             ORDER BY ep.execution_order ASC, ep.id ASC",
        )
        .bind(environment_id)
        .fetch_all(pool)
        .await
    }
}

pub struct PluginExecutionLogRepo;

impl PluginExecutionLogRepo {
    pub async fn create(
        pool: &PgPool,
        input: &CreatePluginExecutionLog,
    ) -> Result<PluginExecutionLog, sqlx::Error> {
        let query = format!(
            "INSERT INTO plugin_execution_logs \
                (plugin_id, environment_id, status, execution_time_ms, input_value, \
                 output_value, error_message, stack_trace) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {LOG_COLUMNS}"
        );
        sqlx::query_as::<_, PluginExecutionLog>(&query)
            .bind(input.plugin_id)
            .bind(input.environment_id)
            .bind(input.status.as_str())
            .bind(input.execution_time_ms)
            .bind(&input.input_value)
            .bind(&input.output_value)
            .bind(&input.error_message)
            .bind(&input.stack_trace)
            .fetch_one(pool)
            .await
    }
}
