//! Plugin script test runs.

use axum::extract::State;
use axum::Json;
use panelgate_core::scripting::sandbox::VALIDATION_VALUE;
use panelgate_core::scripting::ExecutionResult;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Request body for the test execution endpoint.
#[derive(Debug, Deserialize)]
pub struct TestPluginRequest {
    pub script: String,
    /// Value passed to the entry function (default: `test_env_value`).
    #[serde(default)]
    pub sample_value: Option<String>,
}

/// POST /plugins/test
///
/// Run a script once against a sample value. Script failures are reported in
/// the result, not as an HTTP error.
pub async fn test_plugin(
    State(state): State<AppState>,
    Json(input): Json<TestPluginRequest>,
) -> AppResult<Json<DataResponse<ExecutionResult>>> {
    if input.script.trim().is_empty() {
        return Err(AppError::BadRequest("script is required".to_string()));
    }
    let sample = input.sample_value.as_deref().unwrap_or(VALIDATION_VALUE);

    let result = state.submissions.test_plugin_script(&input.script, sample).await;
    if !result.success {
        tracing::debug!(error = ?result.error_message, "Plugin test run failed");
    }
    Ok(Json(DataResponse { data: result }))
}
